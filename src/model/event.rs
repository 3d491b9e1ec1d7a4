use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::task::TaskId;

/// The closed namespace of event types the control plane emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventType {
    #[serde(rename = "task.created")]
    TaskCreated,
    #[serde(rename = "task.transitioned")]
    TaskTransitioned,
    #[serde(rename = "task.updated")]
    TaskUpdated,
    #[serde(rename = "task.blocked")]
    TaskBlocked,
    #[serde(rename = "task.unblocked")]
    TaskUnblocked,
    #[serde(rename = "task.dep.added")]
    TaskDepAdded,
    #[serde(rename = "task.dep.removed")]
    TaskDepRemoved,
    #[serde(rename = "task.cancelled")]
    TaskCancelled,
    #[serde(rename = "task.completed")]
    TaskCompleted,
    #[serde(rename = "task.validation.failed")]
    TaskValidationFailed,
    #[serde(rename = "task.assigned")]
    TaskAssigned,
    #[serde(rename = "dispatch.matched")]
    DispatchMatched,
    #[serde(rename = "dispatch.error")]
    DispatchError,
    #[serde(rename = "action.started")]
    ActionStarted,
    #[serde(rename = "action.completed")]
    ActionCompleted,
    #[serde(rename = "scheduler.poll")]
    SchedulerPoll,
    #[serde(rename = "lease.expired")]
    LeaseExpired,
    #[serde(rename = "gate.entered")]
    GateEntered,
    #[serde(rename = "gate.exited")]
    GateExited,
    #[serde(rename = "gate_timeout_escalation")]
    GateTimeoutEscalation,
    #[serde(rename = "sla.violation")]
    SlaViolation,
    #[serde(rename = "concurrency.platformLimit")]
    ConcurrencyPlatformLimit,
}

/// An immutable record in the event log describing a state change or
/// scheduler decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub event_id: Uuid,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub timestamp: DateTime<Utc>,
    pub actor: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<TaskId>,
    #[serde(default)]
    pub payload: Value,
}

impl Event {
    pub fn new(event_type: EventType, actor: impl Into<String>, payload: Value) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            event_type,
            timestamp: Utc::now(),
            actor: actor.into(),
            task_id: None,
            payload,
        }
    }

    pub fn for_task(mut self, task_id: TaskId) -> Self {
        self.task_id = Some(task_id);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn event_serializes_with_flat_taskid() {
        let id: TaskId = "TASK-2026-07-31-001".parse().unwrap();
        let event = Event::new(EventType::TaskCreated, "store", json!({"title": "x"}))
            .for_task(id.clone());
        let s = serde_json::to_string(&event).unwrap();
        assert!(s.contains("\"type\":\"task.created\""));
        assert!(s.contains("TASK-2026-07-31-001"));
        let back: Event = serde_json::from_str(&s).unwrap();
        assert_eq!(back.task_id, Some(id));
    }
}
