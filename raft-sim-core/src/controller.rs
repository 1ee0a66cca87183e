//! The simulation controller: executes a scenario's timeline at the ticks
//! it schedules them for, and evaluates its assertions against live model
//! state.

use tracing::info;
use tracing::warn;

use crate::error::SimError;
use crate::error::SimResult;
use crate::message::NodeId;
use crate::model::RaftModel;
use crate::network::Action;
use crate::network::Endpoint;
use crate::network::KindFilter;
use crate::network::NetworkRule;

/// A single scripted action, scheduled as part of a [`TimelineEntry`].
#[derive(Clone, Debug, PartialEq)]
pub enum TimelineAction {
    Crash { node: NodeId },
    Recover { node: NodeId },
    ClientWrite { command: String },
    Partition { group_a: Vec<NodeId>, group_b: Vec<NodeId> },
    PartitionClear,
    Delay { from: Endpoint, to: Endpoint, kind: KindFilter, steps: u64 },
    Drop { from: Endpoint, to: Endpoint, kind: KindFilter, pct: Option<f64> },
    Run { ticks: u64 },
}

/// One or more actions scheduled to fire at a given tick.
#[derive(Clone, Debug, PartialEq)]
pub struct TimelineEntry {
    pub at: u64,
    pub actions: Vec<TimelineAction>,
}

/// The kind of condition an [`Assertion`] checks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AssertionKind {
    LeaderExists,
    LogConsistency,
}

/// A single named check, evaluated no earlier than tick `after`.
#[derive(Clone, Debug, PartialEq)]
pub struct Assertion {
    pub kind: AssertionKind,
    pub after: u64,
}

/// The verdict on one [`Assertion`], produced by [`Controller::evaluate_assertions`].
#[derive(Clone, Debug, PartialEq, serde::Serialize)]
pub struct AssertionResult {
    pub kind: AssertionKind,
    pub after: u64,
    pub passed: bool,
}

/// Drives a [`RaftModel`] through a scenario's timeline and assertions.
pub struct Controller {
    timeline: Vec<TimelineEntry>,
    assertions: Vec<Assertion>,
    next_action_index: usize,
    current_tick: u64,
    max_run_ticks: u64,
    settle_buffer_ticks: u64,
}

impl Controller {
    /// Build a controller over a time-sorted timeline and its assertions.
    pub fn new(
        mut timeline: Vec<TimelineEntry>,
        assertions: Vec<Assertion>,
        max_run_ticks: u64,
        settle_buffer_ticks: u64,
    ) -> Self {
        timeline.sort_by_key(|e| e.at);
        Self {
            timeline,
            assertions,
            next_action_index: 0,
            current_tick: 0,
            max_run_ticks,
            settle_buffer_ticks,
        }
    }

    pub fn current_tick(&self) -> u64 {
        self.current_tick
    }

    /// Fire every timeline action scheduled at the current tick, advance
    /// the model one tick, then advance the controller's own clock.
    pub fn step(&mut self, model: &mut RaftModel) -> SimResult<()> {
        self.fire_due_actions(model)?;
        model.step()?;
        self.current_tick += 1;
        Ok(())
    }

    fn fire_due_actions(&mut self, model: &mut RaftModel) -> SimResult<()> {
        while self.next_action_index < self.timeline.len()
            && self.timeline[self.next_action_index].at == self.current_tick
        {
            let actions = self.timeline[self.next_action_index].actions.clone();
            self.next_action_index += 1;
            for action in actions {
                self.execute_action(action, model)?;
            }
        }
        Ok(())
    }

    fn execute_action(&mut self, action: TimelineAction, model: &mut RaftModel) -> SimResult<()> {
        match action {
            TimelineAction::Crash { node } => {
                info!(tick = self.current_tick, %node, "timeline: crash");
                model.crash(&node);
            }
            TimelineAction::Recover { node } => {
                info!(tick = self.current_tick, %node, "timeline: recover");
                model.recover(&node)?;
            }
            TimelineAction::ClientWrite { command } => {
                info!(tick = self.current_tick, "timeline: clientwrite");
                model.client_write(command);
            }
            TimelineAction::Partition { group_a, group_b } => {
                info!(tick = self.current_tick, "timeline: partition");
                model.partition(&group_a, &group_b);
            }
            TimelineAction::PartitionClear => {
                info!(tick = self.current_tick, "timeline: partition_clear");
                model.clear_partitions();
            }
            TimelineAction::Delay { from, to, kind, steps } => {
                model.add_rule(NetworkRule::new(from, to, kind, Action::Delay(steps)));
            }
            TimelineAction::Drop { from, to, kind, pct } => {
                let action = match pct {
                    Some(p) => {
                        if !(0.0..=1.0).contains(&p) {
                            return Err(SimError::InvalidArgument(format!(
                                "drop pct must be within [0, 1], got {p}"
                            )));
                        }
                        Action::DropProb(p)
                    }
                    None => Action::Drop,
                };
                model.add_rule(NetworkRule::new(from, to, kind, action));
            }
            TimelineAction::Run { ticks } => {
                if ticks > self.max_run_ticks {
                    return Err(SimError::InvalidArgument(format!(
                        "run action requests {ticks} ticks, exceeding the configured ceiling of {}",
                        self.max_run_ticks
                    )));
                }
                for _ in 0..ticks {
                    self.step(model)?;
                }
            }
        }
        Ok(())
    }

    fn max_scheduled_tick(&self) -> u64 {
        let max_action = self.timeline.iter().map(|e| e.at).max().unwrap_or(0);
        let max_assertion = self.assertions.iter().map(|a| a.after).max().unwrap_or(0);
        max_action.max(max_assertion)
    }

    /// Step until the tick horizon implied by the timeline and assertions
    /// is passed, plus a small settle buffer for quiescence.
    pub fn play_to_end(&mut self, model: &mut RaftModel) -> SimResult<()> {
        let horizon = self.max_scheduled_tick() + self.settle_buffer_ticks;
        while self.current_tick <= horizon {
            self.step(model)?;
        }
        Ok(())
    }

    /// Evaluate every assertion, advancing the model to each one's `after`
    /// tick if not already there. Always evaluates every assertion, even
    /// after an earlier one fails.
    pub fn evaluate_assertions(&mut self, model: &mut RaftModel) -> SimResult<Vec<AssertionResult>> {
        let mut results = Vec::with_capacity(self.assertions.len());
        for assertion in self.assertions.clone() {
            while self.current_tick < assertion.after {
                self.step(model)?;
            }
            let passed = match assertion.kind {
                AssertionKind::LeaderExists => model.current_leader_id().is_some(),
                AssertionKind::LogConsistency => model.logs_are_prefix_consistent(),
            };
            if !passed {
                warn!(kind = ?assertion.kind, after = assertion.after, "assertion failed");
            }
            results.push(AssertionResult {
                kind: assertion.kind,
                after: assertion.after,
                passed,
            });
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimConfig;

    fn ids(names: &[&str]) -> Vec<NodeId> {
        names.iter().map(|n| NodeId::from(*n)).collect()
    }

    #[test]
    fn run_action_bounded_by_sanity_ceiling() {
        let mut model = RaftModel::new(ids(&["a"]), 1, SimConfig::default()).unwrap();
        let timeline = vec![TimelineEntry {
            at: 0,
            actions: vec![TimelineAction::Run { ticks: 1_000_000 }],
        }];
        let mut controller = Controller::new(timeline, vec![], 100_000, 5);
        assert!(controller.step(&mut model).is_err());
    }

    #[test]
    fn leader_exists_assertion_passes_after_election() {
        let mut model = RaftModel::new(ids(&["a", "b", "c"]), 1, SimConfig::default()).unwrap();
        let assertions = vec![Assertion { kind: AssertionKind::LeaderExists, after: 30 }];
        let mut controller = Controller::new(vec![], assertions, 100_000, 5);
        let results = controller.evaluate_assertions(&mut model).unwrap();
        assert_eq!(results.len(), 1);
        assert!(results[0].passed);
    }

    #[test]
    fn crash_then_assertion_evaluates_every_entry_even_if_one_fails() {
        let mut model = RaftModel::new(ids(&["a"]), 1, SimConfig::default()).unwrap();
        let timeline = vec![TimelineEntry {
            at: 0,
            actions: vec![TimelineAction::Crash { node: NodeId::from("a") }],
        }];
        let assertions = vec![
            Assertion { kind: AssertionKind::LeaderExists, after: 20 },
            Assertion { kind: AssertionKind::LogConsistency, after: 20 },
        ];
        let mut controller = Controller::new(timeline, assertions, 100_000, 5);
        let results = controller.evaluate_assertions(&mut model).unwrap();
        assert_eq!(results.len(), 2);
        assert!(!results[0].passed);
        assert!(results[1].passed);
    }
}
