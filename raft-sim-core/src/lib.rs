//! Deterministic discrete-event simulator core for the Raft consensus
//! algorithm.
//!
//! Three tightly coupled subsystems make up the core: the cluster driver
//! ([`cluster`]), the programmable message bus ([`network`]), and the Raft
//! node state machine ([`raft`]). Everything else — [`model`], the facade,
//! and [`controller`], the scenario driver — is built on top of them and
//! never reaches past the facade into node internals.

pub mod cluster;
pub mod config;
pub mod controller;
pub mod error;
pub mod message;
pub mod model;
pub mod network;
pub mod prng;
pub mod raft;
pub mod scenario;

pub use config::SimConfig;
pub use controller::Controller;
pub use error::SimError;
pub use error::SimResult;
pub use message::NodeId;
pub use model::RaftModel;
pub use model::WriteOutcome;
