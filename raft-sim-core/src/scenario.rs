//! Parses a scenario YAML document into typed structures and wires a
//! [`RaftModel`]/[`Controller`] pair from it.
//!
//! This loader's only surface onto the core is through [`RaftModel`]'s and
//! [`Controller`]'s public operations — it never reaches into
//! [`crate::raft::RaftNode`] internals directly.

use std::collections::HashMap;

use serde::Deserialize;

use crate::config::SimConfig;
use crate::controller::Assertion;
use crate::controller::AssertionKind;
use crate::controller::Controller;
use crate::controller::TimelineAction;
use crate::controller::TimelineEntry;
use crate::error::SimError;
use crate::error::SimResult;
use crate::message::LogEntry;
use crate::message::MessageKind;
use crate::message::NodeId;
use crate::model::RaftModel;
use crate::network::Action;
use crate::network::Endpoint;
use crate::network::KindFilter;
use crate::network::NetworkRule;

#[derive(Debug, Deserialize)]
pub struct Scenario {
    pub model: String,
    pub seed: Option<u64>,
    pub cluster: ClusterSpec,
    #[serde(default)]
    pub initial: InitialSpec,
    #[serde(default)]
    pub network: NetworkSpec,
    #[serde(default)]
    pub timeline: Vec<TimelineEntrySpec>,
    #[serde(default)]
    pub assertions: Vec<AssertionSpec>,
}

#[derive(Debug, Deserialize)]
pub struct ClusterSpec {
    pub nodes: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct InitialSpec {
    #[serde(default)]
    pub node_state: HashMap<String, NodeInitialState>,
    #[serde(default)]
    pub logs: HashMap<String, Vec<LogEntrySpec>>,
}

#[derive(Debug, Deserialize)]
pub struct NodeInitialState {
    #[serde(default)]
    pub crashed: bool,
}

#[derive(Debug, Deserialize)]
pub struct LogEntrySpec {
    pub term: u64,
    pub cmd: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct NetworkSpec {
    #[serde(default)]
    pub rules: Vec<RuleSpec>,
}

#[derive(Debug, Deserialize)]
pub struct RuleSpec {
    #[serde(rename = "match")]
    pub matcher: MatchSpec,
    pub action: ActionKindSpec,
    #[serde(default)]
    pub delay_steps: Option<u64>,
    #[serde(default)]
    pub pct: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct MatchSpec {
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub to: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub bidirectional: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKindSpec {
    Pass,
    Drop,
    Delay,
    DropProb,
}

#[derive(Debug, Deserialize)]
pub struct TimelineEntrySpec {
    pub at: u64,
    pub actions: Vec<ActionSpec>,
}

#[derive(Debug, Deserialize)]
pub struct ActionSpec {
    pub kind: String,
    #[serde(default)]
    pub args: HashMap<String, serde_yaml::Value>,
}

#[derive(Debug, Deserialize)]
pub struct AssertionSpec {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub args: HashMap<String, serde_yaml::Value>,
}

/// Parse `text` into a [`Scenario`].
pub fn parse(text: &str) -> SimResult<Scenario> {
    Ok(serde_yaml::from_str(text)?)
}

fn endpoint(s: &Option<String>) -> Endpoint {
    match s {
        None => Endpoint::Any,
        Some(s) if s == "*" => Endpoint::Any,
        Some(s) => Endpoint::Node(NodeId::from(s.as_str())),
    }
}

fn kind_filter(s: &Option<String>) -> SimResult<KindFilter> {
    match s {
        None => Ok(KindFilter::Any),
        Some(s) if s == "*" => Ok(KindFilter::Any),
        Some(s) => {
            let kind = match s.as_str() {
                "vote_request" => MessageKind::VoteRequest,
                "vote_response" => MessageKind::VoteResponse,
                "append_entries_request" => MessageKind::AppendEntriesRequest,
                "append_entries_response" => MessageKind::AppendEntriesResponse,
                other => {
                    return Err(SimError::InvalidArgument(format!(
                        "unrecognized message type filter: {other:?}"
                    )))
                }
            };
            Ok(KindFilter::Kind(kind))
        }
    }
}

fn build_rule(spec: &RuleSpec) -> SimResult<NetworkRule> {
    let from = endpoint(&spec.matcher.from);
    let to = endpoint(&spec.matcher.to);
    let kind = kind_filter(&spec.matcher.kind)?;
    let action = match spec.action {
        ActionKindSpec::Pass => Action::Pass,
        ActionKindSpec::Drop => Action::Drop,
        ActionKindSpec::Delay => {
            let steps = spec.delay_steps.ok_or_else(|| {
                SimError::InvalidArgument("delay rule requires delay_steps".to_string())
            })?;
            Action::Delay(steps)
        }
        ActionKindSpec::DropProb => {
            let pct = spec
                .pct
                .ok_or_else(|| SimError::InvalidArgument("drop_prob rule requires pct".to_string()))?;
            if !(0.0..=1.0).contains(&pct) {
                return Err(SimError::InvalidArgument(format!(
                    "pct must be within [0, 1], got {pct}"
                )));
            }
            Action::DropProb(pct)
        }
    };
    let mut rule = NetworkRule::new(from, to, kind, action);
    if spec.matcher.bidirectional {
        rule = rule.bidirectional();
    }
    Ok(rule)
}

fn arg_str(args: &HashMap<String, serde_yaml::Value>, key: &str) -> SimResult<String> {
    args.get(key)
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or_else(|| SimError::InvalidArgument(format!("action missing required arg {key:?}")))
}

fn arg_u64(args: &HashMap<String, serde_yaml::Value>, key: &str) -> SimResult<u64> {
    args.get(key)
        .and_then(|v| v.as_u64())
        .ok_or_else(|| SimError::InvalidArgument(format!("action missing required arg {key:?}")))
}

fn arg_f64_opt(args: &HashMap<String, serde_yaml::Value>, key: &str) -> Option<f64> {
    args.get(key).and_then(|v| v.as_f64())
}

fn arg_node_list(args: &HashMap<String, serde_yaml::Value>, key: &str) -> SimResult<Vec<NodeId>> {
    let value = args
        .get(key)
        .ok_or_else(|| SimError::InvalidArgument(format!("action missing required arg {key:?}")))?;
    let seq = value
        .as_sequence()
        .ok_or_else(|| SimError::InvalidArgument(format!("arg {key:?} must be a list")))?;
    seq.iter()
        .map(|v| {
            v.as_str()
                .map(NodeId::from)
                .ok_or_else(|| SimError::InvalidArgument(format!("arg {key:?} must be a list of strings")))
        })
        .collect()
}

fn build_timeline_action(spec: &ActionSpec) -> SimResult<TimelineAction> {
    match spec.kind.as_str() {
        "crash" => Ok(TimelineAction::Crash { node: NodeId::from(arg_str(&spec.args, "node")?.as_str()) }),
        "recover" => Ok(TimelineAction::Recover { node: NodeId::from(arg_str(&spec.args, "node")?.as_str()) }),
        "clientwrite" => Ok(TimelineAction::ClientWrite { command: arg_str(&spec.args, "command")? }),
        "partition" => Ok(TimelineAction::Partition {
            group_a: arg_node_list(&spec.args, "group_a")?,
            group_b: arg_node_list(&spec.args, "group_b")?,
        }),
        "partition_clear" => Ok(TimelineAction::PartitionClear),
        "delay" => Ok(TimelineAction::Delay {
            from: Endpoint::Node(NodeId::from(arg_str(&spec.args, "from")?.as_str())),
            to: Endpoint::Node(NodeId::from(arg_str(&spec.args, "to")?.as_str())),
            kind: KindFilter::Any,
            steps: arg_u64(&spec.args, "steps")?,
        }),
        "drop" => Ok(TimelineAction::Drop {
            from: Endpoint::Node(NodeId::from(arg_str(&spec.args, "from")?.as_str())),
            to: Endpoint::Node(NodeId::from(arg_str(&spec.args, "to")?.as_str())),
            kind: KindFilter::Any,
            pct: arg_f64_opt(&spec.args, "pct"),
        }),
        "run" => Ok(TimelineAction::Run { ticks: arg_u64(&spec.args, "ticks")? }),
        other => Err(SimError::InvalidArgument(format!("unrecognized action kind: {other:?}"))),
    }
}

fn build_assertion(spec: &AssertionSpec) -> SimResult<Assertion> {
    let kind = match spec.kind.as_str() {
        "leader_exists" => AssertionKind::LeaderExists,
        "log_consistency" => AssertionKind::LogConsistency,
        other => {
            return Err(SimError::InvalidArgument(format!(
                "unrecognized assertion type: {other:?}"
            )))
        }
    };
    let after = arg_u64(&spec.args, "after")?;
    Ok(Assertion { kind, after })
}

/// Build a fully-wired [`RaftModel`] and [`Controller`] from a parsed
/// scenario, applying initial state and network rules.
pub fn build(scenario: &Scenario, config: SimConfig, fallback_seed: u64) -> SimResult<(RaftModel, Controller)> {
    if scenario.model != "raft" {
        return Err(SimError::UnknownModel(scenario.model.clone()));
    }
    if scenario.cluster.nodes.is_empty() {
        return Err(SimError::InvalidArgument("cluster.nodes must be non-empty".to_string()));
    }

    let node_ids: Vec<NodeId> = scenario.cluster.nodes.iter().map(|n| NodeId::from(n.as_str())).collect();
    let seed = scenario.seed.unwrap_or(fallback_seed);
    let max_run_ticks = config.max_run_ticks;
    let settle_buffer_ticks = config.settle_buffer_ticks;
    let mut model = RaftModel::new(node_ids, seed, config)?;

    for (node, state) in &scenario.initial.node_state {
        if state.crashed {
            model.crash(&NodeId::from(node.as_str()));
        }
    }
    for (node, entries) in &scenario.initial.logs {
        let log: Vec<LogEntry> = entries
            .iter()
            .enumerate()
            .map(|(i, e)| LogEntry { term: e.term, index: (i + 1) as u64, command: e.cmd.clone() })
            .collect();
        model.seed_log(&NodeId::from(node.as_str()), log);
    }
    for rule_spec in &scenario.network.rules {
        model.add_rule(build_rule(rule_spec)?);
    }

    let timeline: Vec<TimelineEntry> = scenario
        .timeline
        .iter()
        .map(|entry| {
            let actions = entry
                .actions
                .iter()
                .map(build_timeline_action)
                .collect::<SimResult<Vec<_>>>()?;
            Ok(TimelineEntry { at: entry.at, actions })
        })
        .collect::<SimResult<Vec<_>>>()?;
    let assertions: Vec<Assertion> = scenario
        .assertions
        .iter()
        .map(build_assertion)
        .collect::<SimResult<Vec<_>>>()?;

    let controller = Controller::new(timeline, assertions, max_run_ticks, settle_buffer_ticks);
    Ok((model, controller))
}
