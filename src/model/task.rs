use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::gate::{GateHistoryEntry, GateState, ReviewContext};
use crate::error::AofError;

/// Identity of a task: `TASK-YYYY-MM-DD-NNN`, monotonic per day.
///
/// Stored as the validated string rather than split fields so that it
/// serializes/deserializes verbatim in the frontmatter header and compares
/// with simple string/derived `Ord`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TaskId(String);

impl TaskId {
    /// Builds an id from a date and sequence number, zero-padding the
    /// sequence to three digits.
    pub fn new(date: NaiveDate, seq: u32) -> Self {
        Self(format!("TASK-{}-{:03}", date.format("%Y-%m-%d"), seq))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The date component of this id, used by `Create` to scan for the
    /// highest sequence number already used today.
    pub fn date(&self) -> Option<NaiveDate> {
        let rest = self.0.strip_prefix("TASK-")?;
        let date_part = rest.get(0..10)?;
        NaiveDate::parse_from_str(date_part, "%Y-%m-%d").ok()
    }

    pub fn seq(&self) -> Option<u32> {
        let rest = self.0.strip_prefix("TASK-")?;
        let seq_part = rest.get(11..)?;
        seq_part.parse().ok()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for TaskId {
    type Err = AofError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rest = s
            .strip_prefix("TASK-")
            .ok_or_else(|| AofError::InvariantViolation(format!("malformed task id: {s}")))?;
        if rest.len() < 12 {
            return Err(AofError::InvariantViolation(format!(
                "malformed task id: {s}"
            )));
        }
        let date_part = &rest[0..10];
        let seq_part = &rest[11..];
        NaiveDate::parse_from_str(date_part, "%Y-%m-%d")
            .map_err(|_| AofError::InvariantViolation(format!("malformed task id: {s}")))?;
        seq_part
            .parse::<u32>()
            .map_err(|_| AofError::InvariantViolation(format!("malformed task id: {s}")))?;
        Ok(Self(s.to_string()))
    }
}

impl TryFrom<String> for TaskId {
    type Error = AofError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TaskId> for String {
    fn from(id: TaskId) -> Self {
        id.0
    }
}

/// Task priority, ordered low-to-critical so `Priority::cmp` sorts the
/// way the planner's "priority descending" tie-break expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

/// Lifecycle position of a task. Encoded structurally as the directory a
/// task's record lives under; this enum is the in-memory mirror that must
/// always agree with the containing directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskStatus {
    Backlog,
    Ready,
    InProgress,
    Blocked,
    Review,
    Done,
    Cancelled,
    Deadletter,
}

impl TaskStatus {
    /// All eight statuses, in the order they are scanned for id generation
    /// and listing.
    pub const ALL: [TaskStatus; 8] = [
        TaskStatus::Backlog,
        TaskStatus::Ready,
        TaskStatus::InProgress,
        TaskStatus::Blocked,
        TaskStatus::Review,
        TaskStatus::Done,
        TaskStatus::Cancelled,
        TaskStatus::Deadletter,
    ];

    /// Terminal statuses are never re-mutated except by explicit
    /// resurrection.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Done | TaskStatus::Cancelled | TaskStatus::Deadletter
        )
    }

    /// Directory name this status is partitioned under on disk.
    pub fn dir_name(self) -> &'static str {
        match self {
            TaskStatus::Backlog => "backlog",
            TaskStatus::Ready => "ready",
            TaskStatus::InProgress => "in-progress",
            TaskStatus::Blocked => "blocked",
            TaskStatus::Review => "review",
            TaskStatus::Done => "done",
            TaskStatus::Cancelled => "cancelled",
            TaskStatus::Deadletter => "deadletter",
        }
    }

    pub fn from_dir_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.dir_name() == name)
    }

    /// The transition validity matrix. `to == self` is always allowed
    /// (idempotent no-op) and is checked separately by the store before
    /// consulting this table.
    pub fn allowed_transitions(self) -> &'static [TaskStatus] {
        use TaskStatus::*;
        match self {
            Backlog => &[Ready, Cancelled, Blocked],
            Ready => &[InProgress, Blocked, Cancelled, Backlog, Deadletter],
            InProgress => &[Review, Blocked, Ready, Cancelled, Deadletter, Done],
            Blocked => &[Ready, Cancelled, Deadletter],
            Review => &[InProgress, Done, Blocked, Cancelled],
            Done => &[],
            Cancelled => &[Ready],
            Deadletter => &[Ready],
        }
    }

    pub fn can_transition_to(self, to: TaskStatus) -> bool {
        to == self || self.allowed_transitions().contains(&to)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// An exclusive, time-bounded hold identifying the agent executing a task.
/// Present iff the task's status is `in-progress`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lease {
    pub agent: String,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub renew_count: u32,
}

/// An upper bound on how long a task may remain `in-progress`, and what to
/// do when it is exceeded.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlaPolicy {
    pub max_in_progress_ms: i64,
    pub on_violation: SlaViolationAction,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlaViolationAction {
    Alert,
    Block,
    Deadletter,
}

/// A unit of work tracked through the AOF state machine.
///
/// Serializes to/from the YAML frontmatter header of a task record file;
/// `body` is stored separately as free text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: TaskId,
    pub project: String,
    pub schema_version: u32,

    pub title: String,
    #[serde(skip)]
    pub body: String,
    pub priority: Priority,
    #[serde(default)]
    pub tags: BTreeSet<String>,

    pub status: TaskStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lease: Option<Lease>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<TaskId>,
    #[serde(default)]
    pub depends_on: Vec<TaskId>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_transition_at: DateTime<Utc>,

    pub content_hash: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gate: Option<GateState>,
    #[serde(default)]
    pub gate_history: Vec<GateHistoryEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub review_context: Option<ReviewContext>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sla: Option<SlaPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,

    #[serde(flatten)]
    pub metadata: HashMap<String, String>,
}

impl Task {
    /// SHA-256 over the body bytes only, first 16 hex characters.
    pub fn hash_body(body: &str) -> String {
        use sha2::{Digest, Sha256};
        let digest = Sha256::digest(body.as_bytes());
        hex::encode(digest)[..16].to_string()
    }

    /// Recomputes and stores `content_hash` from the current body.
    pub fn recompute_hash(&mut self) {
        self.content_hash = Self::hash_body(&self.body);
    }

    /// Checks that the stored hash matches the body.
    pub fn hash_matches(&self) -> bool {
        self.content_hash == Self::hash_body(&self.body)
    }

    /// Whether this task participates in a workflow.
    pub fn in_workflow(&self) -> bool {
        self.workflow.is_some() && self.gate.is_some()
    }
}
