//! The discrete-event cluster driver: tick counter, node registry, and
//! per-tick dispatch order.

use std::collections::HashMap;

use tracing::instrument;

use crate::config::SimConfig;
use crate::error::SimError;
use crate::error::SimResult;
use crate::message::NodeId;
use crate::network::Bus;
use crate::prng::Prng;
use crate::raft::RaftNode;

/// Owns every node and the bus for the lifetime of one simulation run.
///
/// Node iteration always goes through `order`, never through the backing
/// `HashMap`, so dispatch is insertion-ordered and reproducible regardless
/// of the map's internal layout.
pub struct Cluster {
    order: Vec<NodeId>,
    nodes: HashMap<NodeId, RaftNode>,
    bus: Bus,
    current_tick: u64,
    config: SimConfig,
}

impl Cluster {
    /// Build a cluster with one fresh Follower per id, in the given order.
    pub fn new(node_ids: Vec<NodeId>, config: SimConfig, prng: &mut Prng) -> SimResult<Self> {
        if node_ids.is_empty() {
            return Err(SimError::InvalidArgument(
                "cluster must have at least one node".to_string(),
            ));
        }
        let mut order = Vec::with_capacity(node_ids.len());
        let mut nodes = HashMap::with_capacity(node_ids.len());
        for id in &node_ids {
            let peers: Vec<NodeId> = node_ids.iter().filter(|p| *p != id).cloned().collect();
            let node = RaftNode::new(id.clone(), peers, &config, prng)?;
            order.push(id.clone());
            nodes.insert(id.clone(), node);
        }
        Ok(Self {
            order,
            nodes,
            bus: Bus::new(),
            current_tick: 0,
            config,
        })
    }

    pub fn current_tick(&self) -> u64 {
        self.current_tick
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn order(&self) -> &[NodeId] {
        &self.order
    }

    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut Bus {
        &mut self.bus
    }

    pub fn node(&self, id: &NodeId) -> Option<&RaftNode> {
        self.nodes.get(id)
    }

    pub fn node_mut(&mut self, id: &NodeId) -> Option<&mut RaftNode> {
        self.nodes.get_mut(id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &RaftNode> {
        self.order.iter().filter_map(|id| self.nodes.get(id))
    }

    pub fn crash(&mut self, id: &NodeId) {
        match self.nodes.get_mut(id) {
            Some(node) => node.crash(),
            None => tracing::debug!(node = %id, "crash: unknown node id, ignored"),
        }
    }

    pub fn recover(&mut self, id: &NodeId, prng: &mut Prng) -> SimResult<()> {
        match self.nodes.get_mut(id) {
            Some(node) => node.recover(self.current_tick, self.config.election_timeout_range, prng),
            None => {
                tracing::debug!(node = %id, "recover: unknown node id, ignored");
                Ok(())
            }
        }
    }

    /// Advance the cluster by exactly one tick: increment the clock, run
    /// every live node's `on_tick`, drain matured delayed messages, then
    /// run every live node's `on_message` over its drained inbox.
    #[instrument(skip(self, prng), fields(tick = self.current_tick + 1))]
    pub fn step(&mut self, prng: &mut Prng) -> SimResult<()> {
        self.current_tick += 1;
        let now = self.current_tick;
        let range = self.config.election_timeout_range;

        for id in self.order.clone() {
            if let Some(node) = self.nodes.get_mut(&id) {
                if node.is_up() {
                    node.on_tick(now, range, &mut self.bus, prng)?;
                }
            }
        }

        self.bus.tick();

        for id in self.order.clone() {
            let up = self.nodes.get(&id).map(|n| n.is_up()).unwrap_or(false);
            if !up {
                continue;
            }
            let inbox = self.bus.drain(&id);
            for msg in inbox {
                if let Some(node) = self.nodes.get_mut(&id) {
                    node.on_message(msg, now, &mut self.bus, prng)?;
                }
            }
        }

        self.check_invariants()
    }

    fn check_invariants(&self) -> SimResult<()> {
        let mut leaders_by_term: HashMap<u64, u32> = HashMap::new();
        for node in self.nodes() {
            if node.is_up() && node.role() == crate::raft::Role::Leader {
                *leaders_by_term.entry(node.current_term()).or_insert(0) += 1;
            }
        }
        for (term, count) in &leaders_by_term {
            if *count > 1 {
                let msg = format!("{count} leaders observed in term {term}");
                debug_assert!(false, "{msg}");
                return Err(SimError::InternalInvariantViolated(msg));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(names: &[&str]) -> Vec<NodeId> {
        names.iter().map(|n| NodeId::from(*n)).collect()
    }

    #[test]
    fn rejects_empty_cluster() {
        let mut prng = Prng::new(1);
        let result = Cluster::new(vec![], SimConfig::default(), &mut prng);
        assert!(result.is_err());
    }

    #[test]
    fn registry_preserves_insertion_order() {
        let mut prng = Prng::new(1);
        let cluster = Cluster::new(ids(&["c", "a", "b"]), SimConfig::default(), &mut prng).unwrap();
        assert_eq!(cluster.order(), &ids(&["c", "a", "b"])[..]);
    }

    #[test]
    fn single_node_cluster_eventually_elects_itself_leader() {
        let mut prng = Prng::new(1);
        let mut cluster = Cluster::new(ids(&["a"]), SimConfig::default(), &mut prng).unwrap();
        for _ in 0..20 {
            cluster.step(&mut prng).unwrap();
        }
        assert_eq!(
            cluster.node(&NodeId::from("a")).unwrap().role(),
            crate::raft::Role::Leader
        );
    }
}
