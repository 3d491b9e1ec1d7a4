//! Workflow Gate Engine: a per-project, multi-gate review state machine
//! layered on top of task status. Activates for tasks whose routing
//! identifies a workflow present in the project manifest.

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;

use crate::error::AofError;
use crate::model::{
    Event, EventType, GateHistoryEntry, GateOutcome, GatePredicate, GateState, PredicateContext,
    RejectionStrategy, ReviewContext, Task, TaskId, TaskStatus, WorkflowDefinition,
};
use crate::store::TaskStore;

/// Context supplied when an agent (or operator) reports a gate outcome.
#[derive(Debug, Clone, Default)]
pub struct GateTransitionCtx {
    pub summary: Option<String>,
    pub agent: Option<String>,
    pub blockers: Vec<String>,
    pub rejection_notes: Option<String>,
}

#[derive(Debug, Clone)]
pub struct GateTransitionResult {
    pub task: Task,
    pub skipped: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct TimeoutEscalation {
    pub task: TaskId,
    pub escalated_to: Option<String>,
}

pub struct GateEngine {
    store: Arc<TaskStore>,
}

impl GateEngine {
    pub fn new(store: Arc<TaskStore>) -> Self {
        Self { store }
    }

    /// Records a gate outcome and advances, rewinds, or blocks the task
    /// accordingly.
    pub async fn handle_gate_transition(
        &self,
        id: &TaskId,
        workflow: &WorkflowDefinition,
        outcome: GateOutcome,
        ctx: GateTransitionCtx,
    ) -> Result<GateTransitionResult, AofError> {
        let mut task = self
            .store
            .get(id)
            .await?
            .ok_or_else(|| AofError::NotFound(id.to_string()))?;
        let gate_state = task
            .gate
            .clone()
            .ok_or_else(|| AofError::InvariantViolation(format!("{id} has no active gate")))?;
        let gate_def = workflow
            .gate(&gate_state.current)
            .ok_or_else(|| AofError::InvariantViolation(format!(
                "gate {} is not defined in this workflow",
                gate_state.current
            )))?
            .clone();

        let now = Utc::now();
        let duration = (now - gate_state.entered).num_milliseconds();
        let mut skipped = Vec::new();

        match outcome {
            GateOutcome::Complete => {
                task.gate_history.push(GateHistoryEntry {
                    gate: gate_state.current.clone(),
                    role: gate_def.role.clone(),
                    agent: ctx.agent.clone(),
                    entered: gate_state.entered,
                    exited: Some(now),
                    outcome: Some(GateOutcome::Complete),
                    summary: ctx.summary.clone(),
                    blockers: vec![],
                    rejection_notes: None,
                    duration: Some(duration),
                });

                if workflow.is_last(&gate_state.current) {
                    task.review_context = None;
                    self.store.save(&task).await?;
                    self.nudge_status(id, TaskStatus::Done).await?;
                } else {
                    let start = workflow.index_of(&gate_state.current).unwrap() + 1;
                    let mut next_gate = None;
                    for candidate in &workflow.gates[start..] {
                        let allowed = candidate
                            .when
                            .as_ref()
                            .is_none_or(|predicate| predicate_holds(predicate, &task));
                        if allowed {
                            next_gate = Some(candidate.clone());
                            break;
                        }
                        skipped.push(candidate.id.clone());
                    }
                    let next_gate = next_gate.ok_or_else(|| {
                        AofError::InvariantViolation(format!(
                            "no surviving gate after {}",
                            gate_state.current
                        ))
                    })?;
                    task.gate = Some(GateState {
                        current: next_gate.id.clone(),
                        entered: now,
                    });
                    task.role = Some(next_gate.role.clone());
                    task.review_context = None;
                    self.store.save(&task).await?;
                    self.store
                        .events()
                        .append(
                            Event::new(
                                EventType::GateEntered,
                                ctx.agent.clone().unwrap_or_else(|| "gate-engine".into()),
                                json!({ "gate": next_gate.id }),
                            )
                            .for_task(id.clone()),
                        )
                        .await?;
                    self.nudge_status(id, TaskStatus::Ready).await?;
                }
            }
            GateOutcome::NeedsReview => {
                if !gate_def.can_reject {
                    return Err(AofError::InvariantViolation(format!(
                        "gate {} does not allow rejection",
                        gate_def.id
                    )));
                }
                task.gate_history.push(GateHistoryEntry {
                    gate: gate_state.current.clone(),
                    role: gate_def.role.clone(),
                    agent: ctx.agent.clone(),
                    entered: gate_state.entered,
                    exited: Some(now),
                    outcome: Some(GateOutcome::NeedsReview),
                    summary: ctx.summary.clone(),
                    blockers: ctx.blockers.clone(),
                    rejection_notes: ctx.rejection_notes.clone(),
                    duration: Some(duration),
                });

                let rewind = match workflow.rejection_strategy {
                    RejectionStrategy::Origin => workflow.first_gate().cloned(),
                    RejectionStrategy::Previous => {
                        let idx = workflow.index_of(&gate_state.current).unwrap_or(0);
                        workflow.gates.get(idx.saturating_sub(1)).cloned()
                    }
                }
                .ok_or_else(|| AofError::InvariantViolation("workflow has no gates".into()))?;

                task.gate = Some(GateState {
                    current: rewind.id.clone(),
                    entered: now,
                });
                task.role = Some(rewind.role.clone());
                task.review_context = Some(ReviewContext {
                    from_gate: gate_state.current.clone(),
                    from_role: gate_def.role.clone(),
                    from_agent: ctx.agent.clone(),
                    timestamp: now,
                    blockers: ctx.blockers.clone(),
                    notes: ctx.rejection_notes.clone(),
                });
                self.store.save(&task).await?;
                self.store
                    .events()
                    .append(
                        Event::new(
                            EventType::GateEntered,
                            ctx.agent.clone().unwrap_or_else(|| "gate-engine".into()),
                            json!({ "gate": rewind.id }),
                        )
                        .for_task(id.clone()),
                    )
                    .await?;
                self.nudge_status(id, TaskStatus::Ready).await?;
            }
            GateOutcome::Blocked => {
                task.gate_history.push(GateHistoryEntry {
                    gate: gate_state.current.clone(),
                    role: gate_def.role.clone(),
                    agent: ctx.agent.clone(),
                    entered: gate_state.entered,
                    exited: Some(now),
                    outcome: Some(GateOutcome::Blocked),
                    summary: ctx.summary.clone(),
                    blockers: ctx.blockers.clone(),
                    rejection_notes: None,
                    duration: Some(duration),
                });
                self.store.save(&task).await?;
                self.nudge_status(id, TaskStatus::Blocked).await?;
            }
        }

        self.store
            .events()
            .append(
                Event::new(
                    EventType::GateExited,
                    ctx.agent.clone().unwrap_or_else(|| "gate-engine".into()),
                    json!({ "gate": gate_state.current, "outcome": outcome, "skipped": skipped }),
                )
                .for_task(id.clone()),
            )
            .await?;

        let task = self
            .store
            .get(id)
            .await?
            .ok_or_else(|| AofError::NotFound(id.to_string()))?;
        Ok(GateTransitionResult { task, skipped })
    }

    /// Checks every in-progress gated task whose gate carries a `timeout`
    /// against `age = now - gate.entered`, escalating to a different role
    /// once the timeout elapses without moving the gate pointer.
    pub async fn check_timeouts(
        &self,
        workflow: &WorkflowDefinition,
        now: chrono::DateTime<Utc>,
    ) -> Result<Vec<TimeoutEscalation>, AofError> {
        let mut escalations = Vec::new();
        let tasks = self.store.list_all().await?;
        for mut task in tasks {
            if task.status != TaskStatus::InProgress {
                continue;
            }
            let Some(gate_state) = task.gate.clone() else { continue };
            let Some(gate_def) = workflow.gate(&gate_state.current) else { continue };
            let Some(timeout_ms) = gate_def.timeout else { continue };
            let age_ms = (now - gate_state.entered).num_milliseconds();
            if age_ms <= timeout_ms {
                continue;
            }

            task.gate_history.push(GateHistoryEntry {
                gate: gate_state.current.clone(),
                role: gate_def.role.clone(),
                agent: None,
                entered: gate_state.entered,
                exited: Some(now),
                outcome: Some(GateOutcome::Blocked),
                summary: Some(format!("Timeout after {age_ms}ms")),
                blockers: vec![],
                rejection_notes: None,
                duration: Some(age_ms),
            });
            task.role = gate_def.escalate_to.clone();
            self.store.save(&task).await?;

            self.store
                .events()
                .append(
                    Event::new(
                        EventType::GateTimeoutEscalation,
                        "gate-engine",
                        json!({ "gate": gate_state.current, "escalateTo": gate_def.escalate_to }),
                    )
                    .for_task(task.id.clone()),
                )
                .await?;
            escalations.push(TimeoutEscalation {
                task: task.id,
                escalated_to: gate_def.escalate_to.clone(),
            });
        }
        Ok(escalations)
    }

    /// Opportunistically moves status towards the gate-implied target. The
    /// transition matrix is never bypassed: if the current status cannot
    /// reach `desired`, the status is left as-is and only the gate fields
    /// (already saved by the caller) change.
    async fn nudge_status(&self, id: &TaskId, desired: TaskStatus) -> Result<(), AofError> {
        let task = self
            .store
            .get(id)
            .await?
            .ok_or_else(|| AofError::NotFound(id.to_string()))?;
        if !task.status.can_transition_to(desired) {
            return Ok(());
        }
        self.store
            .transition(id, desired, crate::store::TransitionOpts::default())
            .await?;
        Ok(())
    }
}

fn predicate_holds(predicate: &GatePredicate, task: &Task) -> bool {
    let ctx = PredicateContext {
        tags: &task.tags,
        agent: task.agent.as_deref(),
        role: task.role.as_deref(),
        team: task.team.as_deref(),
        workflow: task.workflow.as_deref(),
    };
    predicate.evaluate(&ctx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::GateDef;
    use crate::store::CreateParams;

    fn workflow() -> WorkflowDefinition {
        WorkflowDefinition {
            name: "demo".into(),
            rejection_strategy: RejectionStrategy::Origin,
            gates: vec![
                GateDef {
                    id: "implement".into(),
                    role: "backend".into(),
                    can_reject: false,
                    timeout: None,
                    escalate_to: None,
                    when: None,
                },
                GateDef {
                    id: "review".into(),
                    role: "architect".into(),
                    can_reject: true,
                    timeout: None,
                    escalate_to: None,
                    when: None,
                },
            ],
        }
    }

    async fn seeded_task() -> (Arc<TaskStore>, Task, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(TaskStore::new(dir.path(), "demo"));
        store.init().await.unwrap();
        let task = store
            .create(CreateParams {
                title: "t".into(),
                created_by: "tester".into(),
                workflow: Some("demo".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        store
            .transition(&task.id, TaskStatus::Ready, Default::default())
            .await
            .unwrap();
        let mut task = store
            .transition(
                &task.id,
                TaskStatus::InProgress,
                crate::store::TransitionOpts {
                    reason: None,
                    agent: Some("backend-agent".into()),
                },
            )
            .await
            .unwrap();
        task.gate = Some(GateState {
            current: "implement".into(),
            entered: Utc::now(),
        });
        task.role = Some("backend".into());
        store.save(&task).await.unwrap();
        (store, task, dir)
    }

    #[tokio::test]
    async fn complete_advances_to_next_gate() {
        let (store, task, _dir) = seeded_task().await;
        let engine = GateEngine::new(Arc::clone(&store));
        let result = engine
            .handle_gate_transition(&task.id, &workflow(), GateOutcome::Complete, GateTransitionCtx::default())
            .await
            .unwrap();
        assert_eq!(result.task.gate.unwrap().current, "review");
        assert_eq!(result.task.role.as_deref(), Some("architect"));
        assert!(result.skipped.is_empty());

        let events = store.events().read_partition(Utc::now().date_naive()).await.unwrap();
        assert!(events.iter().any(|e| e.event_type == EventType::GateEntered));
    }

    #[tokio::test]
    async fn complete_on_last_gate_transitions_to_done() {
        let (store, task, _dir) = seeded_task().await;
        let engine = GateEngine::new(Arc::clone(&store));
        engine
            .handle_gate_transition(&task.id, &workflow(), GateOutcome::Complete, GateTransitionCtx::default())
            .await
            .unwrap();
        // Re-acquire for the next gate's work, mirroring the real lease cycle.
        store
            .transition(
                &task.id,
                TaskStatus::InProgress,
                crate::store::TransitionOpts {
                    reason: None,
                    agent: Some("architect-agent".into()),
                },
            )
            .await
            .unwrap();
        let result = engine
            .handle_gate_transition(&task.id, &workflow(), GateOutcome::Complete, GateTransitionCtx::default())
            .await
            .unwrap();
        assert_eq!(result.task.status, TaskStatus::Done);
        assert_eq!(result.task.gate.unwrap().current, "review");
    }

    #[tokio::test]
    async fn needs_review_rewinds_to_origin_and_sets_review_context() {
        let (store, task, _dir) = seeded_task().await;
        let engine = GateEngine::new(Arc::clone(&store));
        engine
            .handle_gate_transition(&task.id, &workflow(), GateOutcome::Complete, GateTransitionCtx::default())
            .await
            .unwrap();
        let result = engine
            .handle_gate_transition(
                &task.id,
                &workflow(),
                GateOutcome::NeedsReview,
                GateTransitionCtx {
                    blockers: vec!["X".into()],
                    rejection_notes: Some("fix X".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(result.task.gate.as_ref().unwrap().current, "implement");
        assert_eq!(result.task.role.as_deref(), Some("backend"));
        let review_ctx = result.task.review_context.unwrap();
        assert_eq!(review_ctx.blockers, vec!["X".to_string()]);
        assert_eq!(review_ctx.notes.as_deref(), Some("fix X"));

        let events = store.events().read_partition(Utc::now().date_naive()).await.unwrap();
        let entered_count = events.iter().filter(|e| e.event_type == EventType::GateEntered).count();
        assert_eq!(entered_count, 2, "one gate.entered for the earlier complete(), one for the rewind");
    }

    #[tokio::test]
    async fn conditional_gate_is_skipped_when_predicate_fails() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(TaskStore::new(dir.path(), "demo"));
        store.init().await.unwrap();
        let mut task = store
            .create(CreateParams {
                title: "t".into(),
                created_by: "tester".into(),
                workflow: Some("demo".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        task.gate = Some(GateState {
            current: "implement".into(),
            entered: Utc::now(),
        });
        store.save(&task).await.unwrap();

        let wf = WorkflowDefinition {
            name: "demo".into(),
            rejection_strategy: RejectionStrategy::Origin,
            gates: vec![
                GateDef {
                    id: "implement".into(),
                    role: "backend".into(),
                    can_reject: false,
                    timeout: None,
                    escalate_to: None,
                    when: None,
                },
                GateDef {
                    id: "security".into(),
                    role: "security".into(),
                    can_reject: true,
                    timeout: None,
                    escalate_to: None,
                    when: Some(GatePredicate::Tag { tag: "security".into() }),
                },
                GateDef {
                    id: "deploy".into(),
                    role: "ops".into(),
                    can_reject: false,
                    timeout: None,
                    escalate_to: None,
                    when: None,
                },
            ],
        };
        let engine = GateEngine::new(Arc::clone(&store));
        let result = engine
            .handle_gate_transition(&task.id, &wf, GateOutcome::Complete, GateTransitionCtx::default())
            .await
            .unwrap();
        assert_eq!(result.task.gate.unwrap().current, "deploy");
        assert_eq!(result.skipped, vec!["security".to_string()]);
    }

    #[tokio::test]
    async fn timeout_escalates_role_without_moving_gate_pointer() {
        let (store, mut task, _dir) = seeded_task().await;
        task.gate = Some(GateState {
            current: "implement".into(),
            entered: Utc::now() - chrono::Duration::milliseconds(500),
        });
        store.save(&task).await.unwrap();

        let mut wf = workflow();
        wf.gates[0].timeout = Some(100);
        wf.gates[0].escalate_to = Some("lead".into());

        let engine = GateEngine::new(Arc::clone(&store));
        let escalations = engine.check_timeouts(&wf, Utc::now()).await.unwrap();
        assert_eq!(escalations.len(), 1);
        assert_eq!(escalations[0].escalated_to.as_deref(), Some("lead"));

        let after = store.get(&task.id).await.unwrap().unwrap();
        assert_eq!(after.gate.unwrap().current, "implement");
        assert_eq!(after.role.as_deref(), Some("lead"));
    }
}
