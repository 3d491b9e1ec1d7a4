use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A task's current position in its workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateState {
    pub current: String,
    pub entered: DateTime<Utc>,
}

/// Outcome recorded when a gate is exited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateOutcome {
    Complete,
    NeedsReview,
    Blocked,
}

/// A single append-only entry in a task's `gateHistory`. Entries are never
/// edited in place; `exited`, `outcome`, and `duration` are populated when
/// the engine records the gate's exit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GateHistoryEntry {
    pub gate: String,
    pub role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    pub entered: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exited: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<GateOutcome>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default)]
    pub blockers: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejection_notes: Option<String>,
    /// Milliseconds between `entered` and `exited`, set on exit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<i64>,
}

/// The blockers and notes carried from a rejection back to the
/// implementer, cleared the next time the gate advances.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewContext {
    pub from_gate: String,
    pub from_role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_agent: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub blockers: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// How the gate pointer rewinds on a `needs_review` outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RejectionStrategy {
    Origin,
    Previous,
}

/// A restricted, typed predicate over a task's tags and routing, evaluated
/// at gate-advance time to decide whether a conditional gate should be
/// skipped. A typed grammar rather than a string-eval expression language;
/// see DESIGN.md.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum GatePredicate {
    /// `tags` contains the given tag.
    Tag { tag: String },
    /// A routing field (`agent`, `role`, `team`, `workflow`) equals value.
    RoutingEq { field: String, value: String },
    And { all: Vec<GatePredicate> },
    Or { any: Vec<GatePredicate> },
    Not { not: Box<GatePredicate> },
}

/// Read-only view a `GatePredicate` is evaluated against.
pub struct PredicateContext<'a> {
    pub tags: &'a std::collections::BTreeSet<String>,
    pub agent: Option<&'a str>,
    pub role: Option<&'a str>,
    pub team: Option<&'a str>,
    pub workflow: Option<&'a str>,
}

impl GatePredicate {
    pub fn evaluate(&self, ctx: &PredicateContext<'_>) -> bool {
        match self {
            GatePredicate::Tag { tag } => ctx.tags.contains(tag),
            GatePredicate::RoutingEq { field, value } => {
                let actual = match field.as_str() {
                    "agent" => ctx.agent,
                    "role" => ctx.role,
                    "team" => ctx.team,
                    "workflow" => ctx.workflow,
                    _ => None,
                };
                actual == Some(value.as_str())
            }
            GatePredicate::And { all } => all.iter().all(|p| p.evaluate(ctx)),
            GatePredicate::Or { any } => any.iter().any(|p| p.evaluate(ctx)),
            GatePredicate::Not { not } => !not.evaluate(ctx),
        }
    }
}

/// One named checkpoint in a workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GateDef {
    pub id: String,
    pub role: String,
    #[serde(default)]
    pub can_reject: bool,
    /// Gate timeout in milliseconds before escalation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub escalate_to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when: Option<GatePredicate>,
}

/// Read-only input from the project manifest describing a task's workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowDefinition {
    pub name: String,
    pub rejection_strategy: RejectionStrategy,
    pub gates: Vec<GateDef>,
}

impl WorkflowDefinition {
    pub fn gate(&self, id: &str) -> Option<&GateDef> {
        self.gates.iter().find(|g| g.id == id)
    }

    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.gates.iter().position(|g| g.id == id)
    }

    pub fn first_gate(&self) -> Option<&GateDef> {
        self.gates.first()
    }

    pub fn is_last(&self, id: &str) -> bool {
        self.gates.last().map(|g| g.id.as_str()) == Some(id)
    }
}
