use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Precondition violated: {0}")]
    PreconditionViolation(String),

    #[error("Invariant violated: {0}")]
    InvariantViolation(String),

    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("Invalid operator: {0}")]
    InvalidOperator(String),

    #[error("Invalid graph structure: {0}")]
    InvalidGraph(String),

    #[error("Runtime {runtime} failed to allocate {bytes} bytes: {reason}")]
    RuntimeAllocation {
        runtime: String,
        bytes: usize,
        reason: String,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
