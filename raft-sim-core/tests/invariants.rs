//! Quantified invariants that must hold at every tick, for every run.

mod fixtures;

use fixtures::default_config;
use fixtures::node_ids;
use raft_sim_core::model::DumpKind;
use raft_sim_core::model::RaftModel;

fn node_entries(model: &RaftModel) -> Vec<serde_json::Value> {
    model.dump(DumpKind::Nodes).as_array().unwrap().clone()
}

#[test]
fn at_most_one_leader_per_term_at_every_tick() {
    let mut model = RaftModel::new(node_ids(5), 12345, default_config()).unwrap();
    for _ in 0..200 {
        model.step().unwrap();
        let nodes = node_entries(&model);
        let mut leaders_by_term = std::collections::HashMap::<u64, u32>::new();
        for n in &nodes {
            if n["up"].as_bool().unwrap() && n["role"] == "leader" {
                let term = n["current_term"].as_u64().unwrap();
                *leaders_by_term.entry(term).or_insert(0) += 1;
            }
        }
        for (term, count) in leaders_by_term {
            assert!(count <= 1, "term {term} had {count} leaders");
        }
    }
}

#[test]
fn current_term_is_monotonically_non_decreasing() {
    let mut model = RaftModel::new(node_ids(3), 999, default_config()).unwrap();
    let mut last_terms: Vec<u64> = vec![0; 3];
    for _ in 0..150 {
        model.step().unwrap();
        let nodes = node_entries(&model);
        for (i, n) in nodes.iter().enumerate() {
            let term = n["current_term"].as_u64().unwrap();
            assert!(term >= last_terms[i], "term decreased for node {i}");
            last_terms[i] = term;
        }
    }
}

#[test]
fn log_indices_are_contiguous_and_terms_non_decreasing() {
    let mut model = RaftModel::new(node_ids(3), 42, default_config()).unwrap();
    model.client_write("a");
    for _ in 0..60 {
        model.step().unwrap();
    }
    let logs = model.dump(DumpKind::Logs);
    for entry in logs.as_array().unwrap() {
        let log = entry["log"].as_array().unwrap();
        let mut last_term = 0u64;
        for (i, e) in log.iter().enumerate() {
            assert_eq!(e["index"].as_u64().unwrap(), (i + 1) as u64);
            let term = e["term"].as_u64().unwrap();
            assert!(term >= last_term);
            last_term = term;
        }
    }
}

#[test]
fn committed_entries_agree_across_nodes_with_entries_at_that_index() {
    let mut model = RaftModel::new(node_ids(3), 7, default_config()).unwrap();
    model.client_write("cmd-a");
    for _ in 0..60 {
        model.step().unwrap();
    }
    let logs = model.dump(DumpKind::Logs);
    let nodes = node_entries(&model);
    let commit_indices: Vec<u64> = nodes.iter().map(|n| n["commit_index"].as_u64().unwrap()).collect();
    let max_commit = commit_indices.into_iter().max().unwrap_or(0);
    if max_commit == 0 {
        return;
    }
    let mut committed_entry: Option<(u64, String)> = None;
    for entry in logs.as_array().unwrap() {
        let log = entry["log"].as_array().unwrap();
        if let Some(e) = log.iter().find(|e| e["index"].as_u64().unwrap() == max_commit) {
            let term = e["term"].as_u64().unwrap();
            let command = e["command"].as_str().unwrap().to_string();
            match &committed_entry {
                None => committed_entry = Some((term, command)),
                Some((t, c)) => {
                    assert_eq!(*t, term, "committed term mismatch across nodes");
                    assert_eq!(*c, command, "committed command mismatch across nodes");
                }
            }
        }
    }
}
