//! The programmable message bus: rule matching, delayed delivery, and
//! per-recipient inboxes.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::collections::HashMap;
use std::collections::VecDeque;

use serde::Deserialize;
use serde::Serialize;
use tracing::trace;

use crate::error::SimError;
use crate::error::SimResult;
use crate::message::Message;
use crate::message::MessageKind;
use crate::message::NodeId;
use crate::prng::Prng;

/// One side of a [`NetworkRule`]'s node match: a specific id, or the
/// wildcard matching any id.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Endpoint {
    Any,
    Node(NodeId),
}

impl Endpoint {
    fn matches(&self, id: &NodeId) -> bool {
        match self {
            Endpoint::Any => true,
            Endpoint::Node(n) => n == id,
        }
    }
}

/// A [`MessageKind`] match: a specific kind, or the wildcard.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum KindFilter {
    Any,
    Kind(MessageKind),
}

impl KindFilter {
    fn matches(&self, kind: MessageKind) -> bool {
        match self {
            KindFilter::Any => true,
            KindFilter::Kind(k) => *k == kind,
        }
    }
}

/// What happens to a message matching a [`NetworkRule`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Action {
    Pass,
    Drop,
    Delay(u64),
    DropProb(f64),
}

/// A single entry in the bus's ordered rule list.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NetworkRule {
    pub from: Endpoint,
    pub to: Endpoint,
    pub kind: KindFilter,
    /// When true, the rule also matches with `from`/`to` swapped.
    pub bidirectional: bool,
    pub action: Action,
}

impl NetworkRule {
    pub fn new(from: Endpoint, to: Endpoint, kind: KindFilter, action: Action) -> Self {
        Self {
            from,
            to,
            kind,
            bidirectional: false,
            action,
        }
    }

    pub fn bidirectional(mut self) -> Self {
        self.bidirectional = true;
        self
    }

    fn matches(&self, msg: &Message) -> bool {
        let kind_ok = self.kind.matches(msg.kind());
        if !kind_ok {
            return false;
        }
        let forward = self.from.matches(&msg.from) && self.to.matches(&msg.to);
        if forward {
            return true;
        }
        self.bidirectional && self.from.matches(&msg.to) && self.to.matches(&msg.from)
    }
}

/// An entry in the delay queue: a message due for delivery at `delivery_tick`.
///
/// Ordered by `(delivery_tick, insertion_seq)` so that messages due at the
/// same tick drain in the order they were scheduled, with `BinaryHeap`'s
/// max-heap semantics inverted via `Ord`/`Reverse`-style comparison.
struct Delayed {
    delivery_tick: u64,
    insertion_seq: u64,
    message: Message,
}

impl PartialEq for Delayed {
    fn eq(&self, other: &Self) -> bool {
        self.delivery_tick == other.delivery_tick && self.insertion_seq == other.insertion_seq
    }
}
impl Eq for Delayed {}

impl Ord for Delayed {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse so BinaryHeap (a max-heap) pops the smallest key first.
        (other.delivery_tick, other.insertion_seq).cmp(&(self.delivery_tick, self.insertion_seq))
    }
}

impl PartialOrd for Delayed {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// The message bus owned by a [`crate::cluster::Cluster`].
pub struct Bus {
    rules: Vec<NetworkRule>,
    delay_queue: BinaryHeap<Delayed>,
    inboxes: HashMap<NodeId, VecDeque<Message>>,
    next_insertion_seq: u64,
    now: u64,
}

impl Default for Bus {
    fn default() -> Self {
        Self::new()
    }
}

impl Bus {
    pub fn new() -> Self {
        Self {
            rules: Vec::new(),
            delay_queue: BinaryHeap::new(),
            inboxes: HashMap::new(),
            next_insertion_seq: 0,
            now: 0,
        }
    }

    pub fn add_rule(&mut self, rule: NetworkRule) {
        self.rules.push(rule);
    }

    pub fn remove_rule(&mut self, index: usize) -> SimResult<()> {
        if index >= self.rules.len() {
            return Err(SimError::InvalidArgument(format!(
                "rule index {index} out of range (have {} rules)",
                self.rules.len()
            )));
        }
        self.rules.remove(index);
        Ok(())
    }

    pub fn clear_rules(&mut self) {
        self.rules.clear();
    }

    pub fn rules(&self) -> &[NetworkRule] {
        &self.rules
    }

    /// Apply the rule chain to `msg` and route it to an inbox or the delay
    /// queue. The only fall-through in the model is a `DropProb` miss,
    /// which continues evaluation as if the rule had not matched.
    pub fn send(&mut self, msg: Message, prng: &mut Prng) -> SimResult<()> {
        let mut idx = 0;
        while idx < self.rules.len() {
            if !self.rules[idx].matches(&msg) {
                idx += 1;
                continue;
            }
            let action = self.rules[idx].action.clone();
            match action {
                Action::Pass => {
                    self.deliver_immediate(msg);
                    return Ok(());
                }
                Action::Drop => {
                    trace!(from = %msg.from, to = %msg.to, "message dropped by rule");
                    return Ok(());
                }
                Action::Delay(k) => {
                    self.schedule(msg, k);
                    return Ok(());
                }
                Action::DropProb(p) => {
                    if prng.chance(p)? {
                        trace!(from = %msg.from, to = %msg.to, p, "message dropped probabilistically");
                        return Ok(());
                    }
                    idx += 1;
                }
            }
        }
        self.deliver_immediate(msg);
        Ok(())
    }

    fn deliver_immediate(&mut self, msg: Message) {
        self.inboxes.entry(msg.to.clone()).or_default().push_back(msg);
    }

    fn schedule(&mut self, msg: Message, k: u64) {
        let seq = self.next_insertion_seq;
        self.next_insertion_seq += 1;
        self.delay_queue.push(Delayed {
            delivery_tick: self.now + k,
            insertion_seq: seq,
            message: msg,
        });
    }

    /// Advance the bus clock by one tick and drain every delay-queue entry
    /// whose `delivery_tick` has matured into its recipient's inbox.
    pub fn tick(&mut self) {
        self.now += 1;
        while let Some(top) = self.delay_queue.peek() {
            if top.delivery_tick > self.now {
                break;
            }
            let due = self.delay_queue.pop().expect("peeked entry must pop");
            self.deliver_immediate(due.message);
        }
    }

    /// Remove and return all queued messages for `node_id`, in FIFO order.
    /// Idempotent: an empty or absent inbox returns an empty vector.
    pub fn drain(&mut self, node_id: &NodeId) -> Vec<Message> {
        match self.inboxes.get_mut(node_id) {
            Some(q) => q.drain(..).collect(),
            None => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessagePayload;
    use crate::message::VoteRequest;

    fn vote_msg(from: &str, to: &str) -> Message {
        Message::new(
            NodeId::from(from),
            NodeId::from(to),
            MessagePayload::VoteRequest(VoteRequest {
                term: 1,
                candidate_id: NodeId::from(from),
                last_log_index: 0,
                last_log_term: 0,
            }),
        )
    }

    #[test]
    fn pass_through_delivers_immediately() {
        let mut bus = Bus::new();
        let mut prng = Prng::new(1);
        bus.send(vote_msg("a", "b"), &mut prng).unwrap();
        let got = bus.drain(&NodeId::from("b"));
        assert_eq!(got.len(), 1);
    }

    #[test]
    fn drop_rule_discards() {
        let mut bus = Bus::new();
        let mut prng = Prng::new(1);
        bus.add_rule(NetworkRule::new(
            Endpoint::Any,
            Endpoint::Any,
            KindFilter::Any,
            Action::Drop,
        ));
        bus.send(vote_msg("a", "b"), &mut prng).unwrap();
        assert!(bus.drain(&NodeId::from("b")).is_empty());
    }

    #[test]
    fn delay_rule_matures_on_schedule() {
        let mut bus = Bus::new();
        let mut prng = Prng::new(1);
        bus.add_rule(NetworkRule::new(
            Endpoint::Any,
            Endpoint::Any,
            KindFilter::Any,
            Action::Delay(2),
        ));
        bus.send(vote_msg("a", "b"), &mut prng).unwrap();
        bus.tick();
        assert!(bus.drain(&NodeId::from("b")).is_empty());
        bus.tick();
        assert_eq!(bus.drain(&NodeId::from("b")).len(), 1);
    }

    #[test]
    fn drop_prob_miss_falls_through_to_next_rule() {
        let mut bus = Bus::new();
        let mut prng = Prng::new(1);
        bus.add_rule(NetworkRule::new(
            Endpoint::Any,
            Endpoint::Any,
            KindFilter::Any,
            Action::DropProb(0.0),
        ));
        bus.add_rule(NetworkRule::new(
            Endpoint::Any,
            Endpoint::Any,
            KindFilter::Any,
            Action::Delay(1),
        ));
        bus.send(vote_msg("a", "b"), &mut prng).unwrap();
        bus.tick();
        assert_eq!(bus.drain(&NodeId::from("b")).len(), 1);
    }

    #[test]
    fn bidirectional_rule_matches_either_direction() {
        let mut bus = Bus::new();
        let mut prng = Prng::new(1);
        bus.add_rule(
            NetworkRule::new(
                Endpoint::Node(NodeId::from("a")),
                Endpoint::Node(NodeId::from("b")),
                KindFilter::Any,
                Action::Drop,
            )
            .bidirectional(),
        );
        bus.send(vote_msg("b", "a"), &mut prng).unwrap();
        assert!(bus.drain(&NodeId::from("a")).is_empty());
    }

    #[test]
    fn fifo_order_preserved_without_delay() {
        let mut bus = Bus::new();
        let mut prng = Prng::new(1);
        bus.send(vote_msg("a", "b"), &mut prng).unwrap();
        bus.send(vote_msg("c", "b"), &mut prng).unwrap();
        let got = bus.drain(&NodeId::from("b"));
        assert_eq!(got[0].from, NodeId::from("a"));
        assert_eq!(got[1].from, NodeId::from("c"));
    }

    #[test]
    fn drain_on_empty_inbox_is_idempotent() {
        let mut bus = Bus::new();
        assert!(bus.drain(&NodeId::from("x")).is_empty());
        assert!(bus.drain(&NodeId::from("x")).is_empty());
    }

    #[test]
    fn remove_rule_rejects_out_of_range_index() {
        let mut bus = Bus::new();
        assert!(bus.remove_rule(0).is_err());
    }
}
