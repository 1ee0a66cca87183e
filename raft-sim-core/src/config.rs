//! Tunable run configuration.
//!
//! Mirrors the teacher's `Config` builder: a handful of tick-denominated
//! constants with sensible defaults, all overridable by the scenario
//! loader or the CLI.

/// Runtime configuration for a single simulated cluster.
#[derive(Clone, Debug)]
pub struct SimConfig {
    /// Ticks a leader waits between heartbeats to its peers.
    pub heartbeat_period_ticks: u64,
    /// Inclusive `[lo, hi]` window a follower/candidate draws its election
    /// timeout from, in ticks.
    pub election_timeout_range: (u64, u64),
    /// Extra empty ticks run past the last timeline action / assertion
    /// horizon in `play_to_end`, to let heartbeats and commits settle.
    pub settle_buffer_ticks: u64,
    /// Upper bound on a single `run{ticks=k}` timeline action, so a
    /// malformed scenario cannot hang the simulator.
    pub max_run_ticks: u64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            heartbeat_period_ticks: 3,
            election_timeout_range: (9, 15),
            settle_buffer_ticks: 5,
            max_run_ticks: 100_000,
        }
    }
}

impl SimConfig {
    pub fn builder() -> SimConfigBuilder {
        SimConfigBuilder::default()
    }
}

/// Builder for [`SimConfig`], following the teacher's `Config` construction style.
#[derive(Default)]
pub struct SimConfigBuilder {
    inner: Option<SimConfig>,
}

impl SimConfigBuilder {
    fn base(&mut self) -> &mut SimConfig {
        self.inner.get_or_insert_with(SimConfig::default)
    }

    pub fn heartbeat_period_ticks(mut self, ticks: u64) -> Self {
        self.base().heartbeat_period_ticks = ticks;
        self
    }

    pub fn election_timeout_range(mut self, lo: u64, hi: u64) -> Self {
        self.base().election_timeout_range = (lo, hi);
        self
    }

    pub fn settle_buffer_ticks(mut self, ticks: u64) -> Self {
        self.base().settle_buffer_ticks = ticks;
        self
    }

    pub fn max_run_ticks(mut self, ticks: u64) -> Self {
        self.base().max_run_ticks = ticks;
        self
    }

    pub fn build(mut self) -> SimConfig {
        self.inner.take().unwrap_or_default()
    }
}
