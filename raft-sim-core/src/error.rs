//! The simulator's error taxonomy.

/// All error conditions the simulator core can surface.
///
/// Per the propagation policy: user mistakes (unknown node ids, redundant
/// `recover`) are tolerated silently and never appear here. Assertion
/// failures are data (see [`crate::controller::AssertionResult`]), not
/// errors. Only malformed input, invalid arguments, and broken invariants
/// are represented as `Err`.
#[derive(Debug, thiserror::Error)]
pub enum SimError {
    #[error("failed to parse scenario: {0}")]
    ScenarioParse(#[from] serde_yaml::Error),

    #[error("unknown consensus model: {0:?} (only \"raft\" is recognized)")]
    UnknownModel(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid bound: {0}")]
    InvalidBound(String),

    #[error("internal invariant violated: {0}")]
    InternalInvariantViolated(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type SimResult<T> = Result<T, SimError>;
