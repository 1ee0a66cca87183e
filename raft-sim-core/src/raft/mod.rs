//! The Raft node state machine: roles, elections, log replication, commit
//! advancement, and crash/recover semantics.

use std::collections::HashMap;

use serde::Serialize;
use tracing::debug;
use tracing::info;
use tracing::instrument;

use crate::config::SimConfig;
use crate::error::SimResult;
use crate::message::AppendEntriesRequest;
use crate::message::AppendEntriesResponse;
use crate::message::LogEntry;
use crate::message::Message;
use crate::message::MessagePayload;
use crate::message::NodeId;
use crate::message::VoteRequest;
use crate::message::VoteResponse;
use crate::network::Bus;
use crate::prng::Prng;

/// A node's position in the Raft role machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Follower,
    Candidate,
    Leader,
}

/// The outcome of offering a command to a node via [`RaftNode::client_write`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClientWriteOutcome {
    /// Accepted and appended at `index`.
    Accepted { index: u64 },
    /// Rejected: this node is not the leader.
    NotLeader,
}

/// One cluster member's full Raft state.
///
/// Persistent fields (`current_term`, `voted_for`, `log`) survive a crash.
/// Volatile fields reset on crash per [`RaftNode::crash`].
pub struct RaftNode {
    id: NodeId,
    peers: Vec<NodeId>,

    // Persistent state.
    current_term: u64,
    voted_for: Option<NodeId>,
    log: Vec<LogEntry>,

    // Volatile state, all roles.
    commit_index: u64,
    last_applied: u64,

    // Volatile state, leader only (cleared outside of Leader role).
    next_index: HashMap<NodeId, u64>,
    match_index: HashMap<NodeId, u64>,

    // Control state.
    role: Role,
    up: bool,
    last_activity_tick: u64,
    election_timeout_ticks: u64,
    heartbeat_period_ticks: u64,
    votes_received: u64,
}

impl RaftNode {
    /// Construct a fresh node as a Follower with a freshly drawn election
    /// timeout.
    pub fn new(
        id: NodeId,
        peers: Vec<NodeId>,
        config: &SimConfig,
        prng: &mut Prng,
    ) -> SimResult<Self> {
        let (lo, hi) = config.election_timeout_range;
        let election_timeout_ticks = prng.jitter(lo, hi)?;
        Ok(Self {
            id,
            peers,
            current_term: 0,
            voted_for: None,
            log: Vec::new(),
            commit_index: 0,
            last_applied: 0,
            next_index: HashMap::new(),
            match_index: HashMap::new(),
            role: Role::Follower,
            up: true,
            last_activity_tick: 0,
            election_timeout_ticks,
            heartbeat_period_ticks: config.heartbeat_period_ticks,
            votes_received: 0,
        })
    }

    pub fn id(&self) -> &NodeId {
        &self.id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn is_up(&self) -> bool {
        self.up
    }

    pub fn current_term(&self) -> u64 {
        self.current_term
    }

    pub fn voted_for(&self) -> Option<&NodeId> {
        self.voted_for.as_ref()
    }

    pub fn commit_index(&self) -> u64 {
        self.commit_index
    }

    pub fn last_applied(&self) -> u64 {
        self.last_applied
    }

    pub fn log(&self) -> &[LogEntry] {
        &self.log
    }

    pub fn last_activity_tick(&self) -> u64 {
        self.last_activity_tick
    }

    pub fn election_timeout_ticks(&self) -> u64 {
        self.election_timeout_ticks
    }

    pub fn next_index_for(&self, peer: &NodeId) -> Option<u64> {
        self.next_index.get(peer).copied()
    }

    pub fn match_index_for(&self, peer: &NodeId) -> Option<u64> {
        self.match_index.get(peer).copied()
    }

    /// Seed the in-memory log directly, for scenario `initial.logs` loading.
    /// Only meaningful before the simulation starts driving ticks.
    pub fn seed_log(&mut self, entries: Vec<LogEntry>) {
        self.log = entries;
    }

    fn last_log_index(&self) -> u64 {
        self.log.last().map(|e| e.index).unwrap_or(0)
    }

    fn last_log_term(&self) -> u64 {
        self.log.last().map(|e| e.term).unwrap_or(0)
    }

    fn term_at(&self, index: u64) -> u64 {
        if index == 0 {
            return 0;
        }
        self.log
            .iter()
            .find(|e| e.index == index)
            .map(|e| e.term)
            .unwrap_or(0)
    }

    fn send_via(
        &self,
        bus: &mut Bus,
        prng: &mut Prng,
        to: NodeId,
        payload: MessagePayload,
    ) -> SimResult<()> {
        bus.send(Message::new(self.id.clone(), to, payload), prng)
    }

    /// Crash this node: stop scheduling it, drop volatile leader state, but
    /// keep persistent state intact.
    pub fn crash(&mut self) {
        info!(node = %self.id, "node crashed");
        self.up = false;
        self.role = Role::Follower;
        self.next_index.clear();
        self.match_index.clear();
        self.votes_received = 0;
    }

    /// Recover a crashed node: restart its election timer from now. `range`
    /// is the configured election timeout window (the node does not retain
    /// its own copy of [`SimConfig`]).
    #[instrument(skip(self, prng), fields(node = %self.id))]
    pub fn recover(&mut self, now: u64, range: (u64, u64), prng: &mut Prng) -> SimResult<()> {
        info!("node recovered");
        self.up = true;
        self.role = Role::Follower;
        self.last_activity_tick = now;
        self.election_timeout_ticks = self.draw_election_timeout_in_range(prng, range)?;
        Ok(())
    }

    fn draw_election_timeout_in_range(
        &self,
        prng: &mut Prng,
        range: (u64, u64),
    ) -> SimResult<u64> {
        prng.jitter(range.0, range.1)
    }

    /// Offer a client command. Only a Leader accepts directly.
    pub fn client_write(&mut self, command: String) -> ClientWriteOutcome {
        if self.role != Role::Leader {
            return ClientWriteOutcome::NotLeader;
        }
        let index = self.last_log_index() + 1;
        let entry = LogEntry {
            term: self.current_term,
            index,
            command,
        };
        debug!(node = %self.id, index, term = entry.term, "client write appended");
        self.log.push(entry);
        // A lone leader (no peers) needs no AppendEntriesResponse to reach
        // a majority of itself; recompute here so it does not wait forever
        // for a response that will never arrive.
        self.advance_commit_index();
        ClientWriteOutcome::Accepted { index }
    }

    /// Advance this node by one tick. `range` is the configured election
    /// timeout window, threaded in because the node does not retain a copy
    /// of [`SimConfig`].
    #[instrument(skip(self, bus, prng), fields(node = %self.id, role = ?self.role))]
    pub fn on_tick(
        &mut self,
        now: u64,
        range: (u64, u64),
        bus: &mut Bus,
        prng: &mut Prng,
    ) -> SimResult<()> {
        match self.role {
            Role::Follower => {
                if now.saturating_sub(self.last_activity_tick) > self.election_timeout_ticks {
                    self.start_election(now, range, bus, prng)?;
                }
            }
            Role::Candidate => {
                if now.saturating_sub(self.last_activity_tick) > self.election_timeout_ticks {
                    self.start_election(now, range, bus, prng)?;
                }
            }
            Role::Leader => {
                if now.saturating_sub(self.last_activity_tick) >= self.heartbeat_period_ticks {
                    self.send_heartbeats(bus, prng)?;
                    self.last_activity_tick = now;
                }
            }
        }
        Ok(())
    }

    fn start_election(
        &mut self,
        now: u64,
        range: (u64, u64),
        bus: &mut Bus,
        prng: &mut Prng,
    ) -> SimResult<()> {
        self.current_term += 1;
        self.role = Role::Candidate;
        self.voted_for = Some(self.id.clone());
        self.votes_received = 1;
        self.election_timeout_ticks = self.draw_election_timeout_in_range(prng, range)?;
        self.last_activity_tick = now;
        info!(node = %self.id, term = self.current_term, "starting election");

        let request = VoteRequest {
            term: self.current_term,
            candidate_id: self.id.clone(),
            last_log_index: self.last_log_index(),
            last_log_term: self.last_log_term(),
        };
        for peer in self.peers.clone() {
            self.send_via(
                bus,
                prng,
                peer,
                MessagePayload::VoteRequest(request.clone()),
            )?;
        }

        // A lone node (no peers) already holds a trivial majority of its
        // own vote and would otherwise wait forever for a response that
        // never comes.
        let cluster_size = self.peers.len() as u64 + 1;
        if self.votes_received > cluster_size / 2 {
            self.become_leader(now, bus, prng)?;
        }
        Ok(())
    }

    fn become_leader(&mut self, now: u64, bus: &mut Bus, prng: &mut Prng) -> SimResult<()> {
        info!(node = %self.id, term = self.current_term, "became leader");
        self.role = Role::Leader;
        self.votes_received = 0;
        let next = self.last_log_index() + 1;
        self.next_index.clear();
        self.match_index.clear();
        for peer in &self.peers {
            self.next_index.insert(peer.clone(), next);
            self.match_index.insert(peer.clone(), 0);
        }
        self.last_activity_tick = now;
        self.send_heartbeats(bus, prng)
    }

    fn send_heartbeats(&mut self, bus: &mut Bus, prng: &mut Prng) -> SimResult<()> {
        for peer in self.peers.clone() {
            let next = *self.next_index.get(&peer).unwrap_or(&(self.last_log_index() + 1));
            let prev_log_index = next.saturating_sub(1);
            let prev_log_term = self.term_at(prev_log_index);
            let entries: Vec<LogEntry> = self
                .log
                .iter()
                .filter(|e| e.index >= next)
                .cloned()
                .collect();
            let request = AppendEntriesRequest {
                term: self.current_term,
                leader_id: self.id.clone(),
                prev_log_index,
                prev_log_term,
                entries,
                leader_commit: self.commit_index,
            };
            self.send_via(bus, prng, peer, MessagePayload::AppendEntriesRequest(request))?;
        }
        Ok(())
    }

    /// Dispatch a single message to its handler.
    #[instrument(skip(self, msg, bus, prng), fields(node = %self.id, from = %msg.from))]
    pub fn on_message(
        &mut self,
        msg: Message,
        now: u64,
        bus: &mut Bus,
        prng: &mut Prng,
    ) -> SimResult<()> {
        let from = msg.from.clone();
        match msg.payload {
            MessagePayload::VoteRequest(req) => self.handle_vote_request(from, req, now, bus, prng),
            MessagePayload::VoteResponse(resp) => {
                self.handle_vote_response(resp, now, bus, prng)
            }
            MessagePayload::AppendEntriesRequest(req) => {
                self.handle_append_entries(from, req, now, bus, prng)
            }
            MessagePayload::AppendEntriesResponse(resp) => {
                self.handle_append_entries_response(from, resp)
            }
        }
    }

    fn step_down_if_stale(&mut self, term: u64) {
        if term > self.current_term {
            self.current_term = term;
            self.voted_for = None;
            self.role = Role::Follower;
            self.votes_received = 0;
            self.next_index.clear();
            self.match_index.clear();
        }
    }

    fn handle_vote_request(
        &mut self,
        candidate: NodeId,
        req: VoteRequest,
        now: u64,
        bus: &mut Bus,
        prng: &mut Prng,
    ) -> SimResult<()> {
        self.step_down_if_stale(req.term);

        let log_ok = req.last_log_term > self.last_log_term()
            || (req.last_log_term == self.last_log_term() && req.last_log_index >= self.last_log_index());
        let can_vote = match &self.voted_for {
            None => true,
            Some(c) => *c == candidate,
        };
        let grant = req.term == self.current_term && can_vote && log_ok;

        if grant {
            self.voted_for = Some(candidate.clone());
            self.last_activity_tick = now;
            debug!(node = %self.id, candidate = %candidate, term = req.term, "vote granted");
        }

        self.send_via(
            bus,
            prng,
            candidate,
            MessagePayload::VoteResponse(VoteResponse {
                term: self.current_term,
                vote_granted: grant,
            }),
        )
    }

    fn handle_vote_response(
        &mut self,
        resp: VoteResponse,
        now: u64,
        bus: &mut Bus,
        prng: &mut Prng,
    ) -> SimResult<()> {
        if resp.term > self.current_term {
            self.step_down_if_stale(resp.term);
            return Ok(());
        }
        if self.role != Role::Candidate {
            return Ok(());
        }
        if resp.term == self.current_term && resp.vote_granted {
            self.votes_received += 1;
            let cluster_size = self.peers.len() as u64 + 1;
            if self.votes_received > cluster_size / 2 {
                self.become_leader(now, bus, prng)?;
            }
        }
        Ok(())
    }

    fn handle_append_entries(
        &mut self,
        leader: NodeId,
        req: AppendEntriesRequest,
        now: u64,
        bus: &mut Bus,
        prng: &mut Prng,
    ) -> SimResult<()> {
        if req.term < self.current_term {
            return self.send_via(
                bus,
                prng,
                leader,
                MessagePayload::AppendEntriesResponse(AppendEntriesResponse {
                    term: self.current_term,
                    success: false,
                    match_index: 0,
                }),
            );
        }

        let term_increased = req.term > self.current_term;
        self.current_term = req.term;
        self.role = Role::Follower;
        if term_increased {
            self.voted_for = None;
        }
        self.votes_received = 0;
        self.last_activity_tick = now;

        if req.prev_log_index > 0
            && (req.prev_log_index > self.last_log_index()
                || self.term_at(req.prev_log_index) != req.prev_log_term)
        {
            return self.send_via(
                bus,
                prng,
                leader,
                MessagePayload::AppendEntriesResponse(AppendEntriesResponse {
                    term: self.current_term,
                    success: false,
                    match_index: 0,
                }),
            );
        }

        for entry in &req.entries {
            match self.log.iter().position(|e| e.index == entry.index) {
                Some(pos) => {
                    if self.log[pos].term != entry.term {
                        self.log.truncate(pos);
                        self.log.push(entry.clone());
                    }
                }
                None => self.log.push(entry.clone()),
            }
        }

        if req.leader_commit > self.commit_index {
            self.commit_index = req.leader_commit.min(self.last_log_index());
        }

        let match_index = req.prev_log_index + req.entries.len() as u64;
        self.send_via(
            bus,
            prng,
            leader,
            MessagePayload::AppendEntriesResponse(AppendEntriesResponse {
                term: self.current_term,
                success: true,
                match_index,
            }),
        )
    }

    fn handle_append_entries_response(
        &mut self,
        follower: NodeId,
        resp: AppendEntriesResponse,
    ) -> SimResult<()> {
        if resp.term > self.current_term {
            self.step_down_if_stale(resp.term);
            return Ok(());
        }
        if self.role != Role::Leader || resp.term != self.current_term {
            return Ok(());
        }

        if resp.success {
            self.match_index.insert(follower.clone(), resp.match_index);
            self.next_index.insert(follower, resp.match_index + 1);
            self.advance_commit_index();
        } else {
            let next = self
                .next_index
                .get(&follower)
                .copied()
                .unwrap_or(self.last_log_index() + 1);
            self.next_index.insert(follower, next.saturating_sub(1).max(1));
        }
        Ok(())
    }

    fn advance_commit_index(&mut self) {
        let cluster_size = self.peers.len() + 1;
        let majority = cluster_size / 2 + 1;

        let mut candidate_indices: Vec<u64> = self.match_index.values().copied().collect();
        candidate_indices.push(self.last_log_index());

        let mut new_commit = self.commit_index;
        for &n in &candidate_indices {
            if n <= new_commit {
                continue;
            }
            if self.term_at(n) != self.current_term {
                continue;
            }
            let count = self
                .match_index
                .values()
                .filter(|&&m| m >= n)
                .count()
                + 1; // self
            if count >= majority {
                new_commit = new_commit.max(n);
            }
        }
        if new_commit > self.commit_index {
            debug!(node = %self.id, new_commit, "commit index advanced");
            self.commit_index = new_commit;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RANGE: (u64, u64) = (9, 15);

    fn node(id: &str, peers: &[&str]) -> RaftNode {
        let config = SimConfig::builder().election_timeout_range(RANGE.0, RANGE.1).build();
        let mut prng = Prng::new(1);
        RaftNode::new(
            NodeId::from(id),
            peers.iter().map(|p| NodeId::from(*p)).collect(),
            &config,
            &mut prng,
        )
        .unwrap()
    }

    #[test]
    fn follower_times_out_and_becomes_candidate() {
        let mut n = node("a", &["b", "c"]);
        let mut bus = Bus::new();
        let mut prng = Prng::new(2);
        let timeout = n.election_timeout_ticks();
        for tick in 1..=(timeout + 1) {
            n.on_tick(tick, RANGE, &mut bus, &mut prng).unwrap();
        }
        assert_eq!(n.role(), Role::Candidate);
        assert_eq!(n.current_term(), 1);
        assert_eq!(bus.drain(&NodeId::from("b")).len(), 1);
        assert_eq!(bus.drain(&NodeId::from("c")).len(), 1);
    }

    #[test]
    fn candidate_becomes_leader_on_majority_votes() {
        let mut n = node("a", &["b", "c"]);
        let mut bus = Bus::new();
        let mut prng = Prng::new(2);
        n.on_tick(n.election_timeout_ticks() + 1, RANGE, &mut bus, &mut prng)
            .unwrap();
        assert_eq!(n.role(), Role::Candidate);

        let term = n.current_term();
        n.on_message(
            Message::new(
                NodeId::from("b"),
                NodeId::from("a"),
                MessagePayload::VoteResponse(VoteResponse {
                    term,
                    vote_granted: true,
                }),
            ),
            1,
            &mut bus,
            &mut prng,
        )
        .unwrap();

        assert_eq!(n.role(), Role::Leader);
    }

    #[test]
    fn vote_rejected_for_stale_log() {
        let mut n = node("a", &["b"]);
        n.seed_log(vec![
            LogEntry { term: 1, index: 1, command: "x".into() },
            LogEntry { term: 2, index: 2, command: "y".into() },
        ]);
        let mut bus = Bus::new();
        let mut prng = Prng::new(3);
        n.on_message(
            Message::new(
                NodeId::from("b"),
                NodeId::from("a"),
                MessagePayload::VoteRequest(VoteRequest {
                    term: 3,
                    candidate_id: NodeId::from("b"),
                    last_log_index: 1,
                    last_log_term: 1,
                }),
            ),
            1,
            &mut bus,
            &mut prng,
        )
        .unwrap();
        let resp = bus.drain(&NodeId::from("b"));
        match &resp[0].payload {
            MessagePayload::VoteResponse(v) => assert!(!v.vote_granted),
            _ => panic!("expected vote response"),
        }
    }

    #[test]
    fn append_entries_truncates_on_conflict() {
        let mut n = node("a", &["leader"]);
        n.seed_log(vec![
            LogEntry { term: 1, index: 1, command: "x".into() },
            LogEntry { term: 1, index: 2, command: "stale".into() },
        ]);
        let mut bus = Bus::new();
        let mut prng = Prng::new(4);
        n.on_message(
            Message::new(
                NodeId::from("leader"),
                NodeId::from("a"),
                MessagePayload::AppendEntriesRequest(AppendEntriesRequest {
                    term: 2,
                    leader_id: NodeId::from("leader"),
                    prev_log_index: 1,
                    prev_log_term: 1,
                    entries: vec![LogEntry { term: 2, index: 2, command: "fresh".into() }],
                    leader_commit: 0,
                }),
            ),
            1,
            &mut bus,
            &mut prng,
        )
        .unwrap();
        assert_eq!(n.log().len(), 2);
        assert_eq!(n.log()[1].command, "fresh");
        assert_eq!(n.current_term(), 2);
    }

    #[test]
    fn append_entries_consistency_check_rejects_gap() {
        let mut n = node("a", &["leader"]);
        let mut bus = Bus::new();
        let mut prng = Prng::new(5);
        n.on_message(
            Message::new(
                NodeId::from("leader"),
                NodeId::from("a"),
                MessagePayload::AppendEntriesRequest(AppendEntriesRequest {
                    term: 1,
                    leader_id: NodeId::from("leader"),
                    prev_log_index: 5,
                    prev_log_term: 1,
                    entries: vec![],
                    leader_commit: 0,
                }),
            ),
            1,
            &mut bus,
            &mut prng,
        )
        .unwrap();
        let resp = bus.drain(&NodeId::from("leader"));
        match &resp[0].payload {
            MessagePayload::AppendEntriesResponse(r) => assert!(!r.success),
            _ => panic!("expected append entries response"),
        }
    }

    #[test]
    fn client_write_rejected_when_not_leader() {
        let mut n = node("a", &["b"]);
        assert_eq!(n.client_write("cmd".into()), ClientWriteOutcome::NotLeader);
    }

    #[test]
    fn crash_clears_leader_volatile_state_but_keeps_log() {
        let mut n = node("a", &["b"]);
        n.seed_log(vec![LogEntry { term: 1, index: 1, command: "x".into() }]);
        n.crash();
        assert!(!n.is_up());
        assert_eq!(n.role(), Role::Follower);
        assert_eq!(n.log().len(), 1);
    }

    #[test]
    fn recover_restarts_election_timer_from_now() {
        let mut n = node("a", &["b"]);
        n.crash();
        let mut prng = Prng::new(6);
        n.recover(42, RANGE, &mut prng).unwrap();
        assert!(n.is_up());
        assert_eq!(n.last_activity_tick(), 42);
    }
}
