use thiserror::Error;

/// Convenience type alias for Results with [`AofError`].
pub type Result<T> = std::result::Result<T, AofError>;

/// Main error type for the AOF control plane.
///
/// Every fallible operation across the store, lease manager, analyzer,
/// throttle controller, planner, executor, and gate engine returns one of
/// these variants. Scheduler and CLI callers match on these to decide
/// whether an error is per-task (logged, tick continues) or process-wide
/// (platform limit, configuration).
#[derive(Error, Debug)]
pub enum AofError {
    #[error("task not found: {0}")]
    NotFound(String),

    #[error("invalid transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    #[error("lease held by another agent: {0}")]
    Leased(String),

    #[error("task is in a terminal state: {0}")]
    Terminal(String),

    #[error("failed to parse task record {path}: {message}")]
    Parse { path: String, message: String },

    #[error("platform concurrency limit reached: {0}")]
    PlatformLimit(u32),

    #[error("executor spawn failed: {0}")]
    SpawnFailure(String),

    #[error("operation timed out: {0}")]
    Timeout(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("manifest error: {0}")]
    Manifest(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AofError {
    /// True for errors that represent a single task's problem rather than
    /// a process-wide fault — the scheduler logs these and continues the
    /// tick instead of aborting it.
    pub fn is_task_scoped(&self) -> bool {
        matches!(
            self,
            AofError::NotFound(_)
                | AofError::InvalidTransition { .. }
                | AofError::InvariantViolation(_)
                | AofError::Leased(_)
                | AofError::Terminal(_)
                | AofError::Parse { .. }
                | AofError::SpawnFailure(_)
                | AofError::Timeout(_)
        )
    }
}
