//! The executor contract: the thing that actually runs work is out of
//! scope for this crate, so this module only ships the trait seam and a
//! deterministic in-memory test double alongside it.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use once_cell_shim::Lazy;
use regex::Regex;
use tokio::sync::Mutex;

use crate::model::{Priority, TaskId};

/// Minimal `once_cell`-free lazy static for a single compiled regex.
mod once_cell_shim {
    use std::sync::OnceLock;

    pub struct Lazy<T>(OnceLock<T>, fn() -> T);

    impl<T> Lazy<T> {
        pub const fn new(f: fn() -> T) -> Self {
            Self(OnceLock::new(), f)
        }

        pub fn get(&self) -> &T {
            self.0.get_or_init(self.1)
        }
    }
}

static PLATFORM_LIMIT_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"max active children for this session \(\d+/(\d+)\)").unwrap()
});

/// Extracts `Y` from an executor error of the form "...max active children
/// for this session (X/Y)".
pub fn parse_platform_limit(message: &str) -> Option<u32> {
    PLATFORM_LIMIT_PATTERN
        .get()
        .captures(message)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Read-only summary of a task's current gate, passed to the executor so it
/// can brief the agent.
#[derive(Debug, Clone)]
pub struct GateContext {
    pub gate_id: String,
    pub rejection_summary: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TaskContext {
    pub task_id: TaskId,
    pub path: PathBuf,
    pub agent: Option<String>,
    pub role: Option<String>,
    pub team: Option<String>,
    pub priority: Priority,
    pub gate_context: Option<GateContext>,
}

#[derive(Debug, Clone)]
pub struct SpawnOpts {
    pub timeout: Duration,
}

#[derive(Debug, Clone, Default)]
pub struct SpawnResult {
    pub success: bool,
    pub session_id: Option<String>,
    pub error: Option<String>,
    pub platform_limit: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct SessionStatus {
    pub alive: bool,
    pub last_heartbeat_at: Option<DateTime<Utc>>,
}

/// The executor contract consumed, not implemented, by this crate.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn spawn(&self, ctx: TaskContext, opts: SpawnOpts) -> SpawnResult;
    async fn get_session_status(&self, session_id: &str) -> Option<SessionStatus>;
    async fn force_complete_session(&self, session_id: &str);
}

/// Deterministic test double: callers queue up responses, in order; each
/// `spawn` call pops the next one (or reports failure once the queue is
/// empty), and every call is recorded for assertions.
pub struct MockExecutor {
    responses: Mutex<VecDeque<SpawnResult>>,
    calls: Mutex<Vec<TaskContext>>,
}

impl MockExecutor {
    pub fn new() -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_responses(responses: impl IntoIterator<Item = SpawnResult>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().collect()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub async fn queue(&self, result: SpawnResult) {
        self.responses.lock().await.push_back(result);
    }

    pub async fn calls(&self) -> Vec<TaskContext> {
        self.calls.lock().await.clone()
    }
}

impl Default for MockExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Executor for MockExecutor {
    async fn spawn(&self, ctx: TaskContext, _opts: SpawnOpts) -> SpawnResult {
        self.calls.lock().await.push(ctx);
        self.responses.lock().await.pop_front().unwrap_or(SpawnResult {
            success: false,
            error: Some("mock executor has no queued response".into()),
            ..Default::default()
        })
    }

    async fn get_session_status(&self, _session_id: &str) -> Option<SessionStatus> {
        Some(SessionStatus {
            alive: true,
            last_heartbeat_at: Some(Utc::now()),
        })
    }

    async fn force_complete_session(&self, _session_id: &str) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_platform_limit_from_error_string() {
        let msg = "Error: max active children for this session (3/3)";
        assert_eq!(parse_platform_limit(msg), Some(3));
    }

    #[test]
    fn returns_none_for_unrelated_error() {
        assert_eq!(parse_platform_limit("connection refused"), None);
    }

    #[tokio::test]
    async fn mock_executor_returns_queued_responses_in_order() {
        let executor = MockExecutor::with_responses([
            SpawnResult {
                success: true,
                session_id: Some("s1".into()),
                ..Default::default()
            },
            SpawnResult {
                success: false,
                platform_limit: Some(1),
                ..Default::default()
            },
        ]);
        let ctx = TaskContext {
            task_id: "TASK-2026-07-31-001".parse().unwrap(),
            path: PathBuf::from("/tmp/t"),
            agent: Some("agent-a".into()),
            role: None,
            team: None,
            priority: Priority::Normal,
            gate_context: None,
        };
        let first = executor.spawn(ctx.clone(), SpawnOpts { timeout: Duration::from_secs(1) }).await;
        assert!(first.success);
        let second = executor.spawn(ctx, SpawnOpts { timeout: Duration::from_secs(1) }).await;
        assert_eq!(second.platform_limit, Some(1));
        assert_eq!(executor.calls().await.len(), 2);
    }
}
