//! Interactive line-editor REPL driving [`RaftModel`]/[`Controller`]
//! exclusively through their public operations.

use std::fs;

use raft_sim_core::controller::Controller;
use raft_sim_core::model::DumpKind;
use raft_sim_core::model::RaftModel;
use raft_sim_core::scenario;
use raft_sim_core::NodeId;
use raft_sim_core::SimConfig;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

/// Run the REPL until `quit` or EOF. Returns `Ok(true)` on a clean exit.
pub fn run() -> anyhow::Result<bool> {
    let mut session = Session::default();
    let mut editor = DefaultEditor::new()?;

    loop {
        match editor.readline("raft-sim> ") {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let _ = editor.add_history_entry(line);
                if line == "quit" {
                    return Ok(true);
                }
                if let Err(err) = session.dispatch(line) {
                    eprintln!("error: {err:#}");
                }
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => return Ok(true),
            Err(err) => return Err(err.into()),
        }
    }
}

#[derive(Default)]
struct Session {
    model: Option<RaftModel>,
    controller: Option<Controller>,
}

impl Session {
    fn dispatch(&mut self, line: &str) -> anyhow::Result<()> {
        let mut parts = line.split_whitespace();
        let Some(cmd) = parts.next() else { return Ok(()) };
        let rest: Vec<&str> = parts.collect();

        match cmd {
            "load" => self.cmd_load(&rest),
            "init" => self.cmd_init(&rest),
            "step" => self.cmd_step(&rest),
            "play" => self.cmd_play(),
            "write" => self.cmd_write(line),
            "crash" => self.cmd_crash(&rest),
            "recover" => self.cmd_recover(&rest),
            "partition" => self.cmd_partition(&rest),
            "delay" => self.cmd_delay(&rest),
            "drop" => self.cmd_drop(&rest),
            "dump" => self.cmd_dump(&rest),
            other => {
                println!("unrecognized command: {other}");
                Ok(())
            }
        }
    }

    fn model_mut(&mut self) -> anyhow::Result<&mut RaftModel> {
        self.model
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("no model loaded; run `init` or `load` first"))
    }

    fn cmd_load(&mut self, args: &[&str]) -> anyhow::Result<()> {
        let path = args.first().ok_or_else(|| anyhow::anyhow!("usage: load <path>"))?;
        let text = fs::read_to_string(path)?;
        let parsed = scenario::parse(&text)?;
        let (model, controller) = scenario::build(&parsed, SimConfig::default(), 0)?;
        self.model = Some(model);
        self.controller = Some(controller);
        println!("loaded scenario from {path}");
        Ok(())
    }

    fn cmd_init(&mut self, args: &[&str]) -> anyhow::Result<()> {
        if args.first() != Some(&"raft") {
            anyhow::bail!("usage: init raft --nodes N --seed S");
        }
        let nodes = parse_flag(&args[1..], "--nodes")
            .ok_or_else(|| anyhow::anyhow!("--nodes is required"))?
            .parse::<u32>()?;
        let seed = parse_flag(&args[1..], "--seed").map(|s| s.parse::<u64>()).transpose()?.unwrap_or(0);

        let node_ids: Vec<NodeId> = (1..=nodes).map(|i| NodeId::from(format!("n{i}"))).collect();
        self.model = Some(RaftModel::new(node_ids, seed, SimConfig::default())?);
        self.controller = None;
        println!("initialized {nodes}-node cluster with seed {seed}");
        Ok(())
    }

    fn cmd_step(&mut self, args: &[&str]) -> anyhow::Result<()> {
        let n: u64 = args.first().map(|s| s.parse()).transpose()?.unwrap_or(1);
        let model = self.model_mut()?;
        for _ in 0..n {
            model.step()?;
        }
        println!("now at tick {}", self.model.as_ref().unwrap().current_tick());
        Ok(())
    }

    fn cmd_play(&mut self) -> anyhow::Result<()> {
        let controller = self
            .controller
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("no scenario loaded; `play` requires `load`"))?;
        let model = self.model.as_mut().expect("model set alongside controller");
        controller.play_to_end(model)?;
        for result in controller.evaluate_assertions(model)? {
            let verdict = if result.passed { "PASS" } else { "FAIL" };
            println!("{verdict} {:?} (after={})", result.kind, result.after);
        }
        Ok(())
    }

    fn cmd_write(&mut self, line: &str) -> anyhow::Result<()> {
        let command = line["write".len()..].trim().trim_matches('"').to_string();
        if command.is_empty() {
            anyhow::bail!("usage: write \"<cmd>\"");
        }
        let outcome = self.model_mut()?.client_write(command);
        println!("{outcome:?}");
        Ok(())
    }

    fn cmd_crash(&mut self, args: &[&str]) -> anyhow::Result<()> {
        let id = args.first().ok_or_else(|| anyhow::anyhow!("usage: crash <id>"))?;
        self.model_mut()?.crash(&NodeId::from(*id));
        Ok(())
    }

    fn cmd_recover(&mut self, args: &[&str]) -> anyhow::Result<()> {
        let id = args.first().ok_or_else(|| anyhow::anyhow!("usage: recover <id>"))?;
        self.model_mut()?.recover(&NodeId::from(*id))?;
        Ok(())
    }

    fn cmd_partition(&mut self, args: &[&str]) -> anyhow::Result<()> {
        match args.first() {
            Some(&"clear") => {
                self.model_mut()?.clear_partitions();
            }
            Some(&"add") => {
                let a = args.get(1).ok_or_else(|| anyhow::anyhow!("usage: partition add <A> <B>"))?;
                let b = args.get(2).ok_or_else(|| anyhow::anyhow!("usage: partition add <A> <B>"))?;
                self.model_mut()?.partition(&[NodeId::from(*a)], &[NodeId::from(*b)]);
            }
            _ => anyhow::bail!("usage: partition add <A> <B> | partition clear"),
        }
        Ok(())
    }

    fn cmd_delay(&mut self, args: &[&str]) -> anyhow::Result<()> {
        use raft_sim_core::network::Action;
        use raft_sim_core::network::Endpoint;
        use raft_sim_core::network::KindFilter;
        use raft_sim_core::network::NetworkRule;

        let from = parse_flag(args, "from=").ok_or_else(|| anyhow::anyhow!("usage: delay from=A to=B steps=k"))?;
        let to = parse_flag(args, "to=").ok_or_else(|| anyhow::anyhow!("usage: delay from=A to=B steps=k"))?;
        let steps: u64 = parse_flag(args, "steps=")
            .ok_or_else(|| anyhow::anyhow!("steps is required"))?
            .parse()?;
        self.model_mut()?.add_rule(NetworkRule::new(
            Endpoint::Node(NodeId::from(from)),
            Endpoint::Node(NodeId::from(to)),
            KindFilter::Any,
            Action::Delay(steps),
        ));
        Ok(())
    }

    fn cmd_drop(&mut self, args: &[&str]) -> anyhow::Result<()> {
        use raft_sim_core::network::Action;
        use raft_sim_core::network::Endpoint;
        use raft_sim_core::network::KindFilter;
        use raft_sim_core::network::NetworkRule;

        let from = parse_flag(args, "from=").ok_or_else(|| anyhow::anyhow!("usage: drop from=A to=B [pct=p]"))?;
        let to = parse_flag(args, "to=").ok_or_else(|| anyhow::anyhow!("usage: drop from=A to=B [pct=p]"))?;
        let action = match parse_flag(args, "pct=") {
            Some(pct) => Action::DropProb(pct.parse()?),
            None => Action::Drop,
        };
        self.model_mut()?.add_rule(NetworkRule::new(
            Endpoint::Node(NodeId::from(from)),
            Endpoint::Node(NodeId::from(to)),
            KindFilter::Any,
            action,
        ));
        Ok(())
    }

    fn cmd_dump(&mut self, args: &[&str]) -> anyhow::Result<()> {
        let kind = match args.first() {
            None | Some(&"state") => DumpKind::State,
            Some(&"nodes") => DumpKind::Nodes,
            Some(&"logs") => DumpKind::Logs,
            Some(&"net") => DumpKind::Net,
            Some(other) => anyhow::bail!("unrecognized dump target: {other}"),
        };
        let value = self.model_mut()?.dump(kind);
        println!("{}", serde_json::to_string_pretty(&value)?);
        Ok(())
    }
}

/// Find `--flag value` or `flag=value` style arguments in a token list.
fn parse_flag<'a>(args: &[&'a str], flag: &str) -> Option<&'a str> {
    if flag.ends_with('=') {
        return args.iter().find_map(|a| a.strip_prefix(flag));
    }
    args.iter()
        .position(|a| *a == flag)
        .and_then(|i| args.get(i + 1))
        .copied()
}
