//! Shared scenario-building helpers for the integration test suite, in the
//! spirit of the crate's own `tests/fixtures` pattern: a common harness,
//! not a copy-pasted setup per test file.

use raft_sim_core::config::SimConfig;
use raft_sim_core::message::NodeId;
use raft_sim_core::model::DumpKind;
use raft_sim_core::model::RaftModel;

/// Build `n` nodes named `n1..nN`.
pub fn node_ids(n: usize) -> Vec<NodeId> {
    (1..=n).map(|i| NodeId::from(format!("n{i}"))).collect()
}

/// Step `model` until a live leader exists, or `max_ticks` is exhausted.
/// Returns whether a leader was found.
pub fn run_until_leader(model: &mut RaftModel, max_ticks: u64) -> bool {
    for _ in 0..max_ticks {
        model.step().unwrap();
        if model.current_leader_id().is_some() {
            return true;
        }
    }
    model.current_leader_id().is_some()
}

/// Step `model` exactly `ticks` times.
pub fn run_ticks(model: &mut RaftModel, ticks: u64) {
    for _ in 0..ticks {
        model.step().unwrap();
    }
}

/// A standard cluster config used across the scenario tests, matching the
/// defaults pinned in the specification.
pub fn default_config() -> SimConfig {
    SimConfig::default()
}

/// Snapshot state as JSON text, for determinism comparisons.
pub fn dump_json(model: &RaftModel) -> String {
    serde_json::to_string(&model.dump(DumpKind::State)).unwrap()
}
