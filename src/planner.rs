//! Dispatch Planner: given ready tasks, analyzer output, and throttle
//! state, produces a typed list of intended actions. Pure with respect to
//! the store — the planner never mutates a task itself, it only describes
//! what the executor should do next.

use chrono::Utc;

use crate::analyzer::Analysis;
use crate::model::{ProjectManifest, SlaViolationAction, Task, TaskId, TaskStatus};
use crate::throttle::{Candidate, ThrottleController};

#[derive(Debug, Clone, PartialEq)]
pub enum PlannedAction {
    Assign { task: TaskId, target: String },
    Alert { task: TaskId, reason: String },
    Block { task: TaskId, reason: String },
    SlaViolation { task: TaskId, on_violation: SlaViolationAction },
    Promote { task: TaskId },
}

/// Resolves the dispatch target via preference order agent → role → team.
fn resolve_target(task: &Task) -> Option<String> {
    task.agent
        .clone()
        .or_else(|| task.role.clone())
        .or_else(|| task.team.clone())
}

fn sort_ready(tasks: &mut [Task]) {
    tasks.sort_by(|a, b| {
        b.priority
            .cmp(&a.priority)
            .then(a.created_at.cmp(&b.created_at))
            .then(a.id.as_str().cmp(b.id.as_str()))
    });
}

pub struct DispatchPlanner;

impl DispatchPlanner {
    pub fn new() -> Self {
        Self
    }

    /// `ready_tasks` and `all_tasks` both come from the same store-list
    /// snapshot for this tick.
    pub async fn plan(
        &self,
        ready_tasks: &[Task],
        all_tasks: &[Task],
        analysis: &Analysis,
        manifest: Option<&ProjectManifest>,
        throttle: &ThrottleController,
    ) -> Vec<PlannedAction> {
        let mut actions = Vec::new();

        actions.extend(self.plan_sla_violations(all_tasks));
        actions.extend(self.plan_promotions(all_tasks, analysis));

        let mut ordered: Vec<Task> = ready_tasks.to_vec();
        sort_ready(&mut ordered);

        for task in &ordered {
            // Structural blockers never depend on routing or throttle, so
            // they're cheap to rule out first.
            if analysis.circular_deps.contains(&task.id) {
                actions.push(PlannedAction::Block {
                    task: task.id.clone(),
                    reason: "participates in a circular dependency".into(),
                });
                continue;
            }
            if analysis.blocked_by_subtasks.contains(&task.id) {
                actions.push(PlannedAction::Block {
                    task: task.id.clone(),
                    reason: "has an incomplete subtask".into(),
                });
                continue;
            }
            let deps_satisfied = task.depends_on.iter().all(|dep| {
                all_tasks
                    .iter()
                    .find(|t| &t.id == dep)
                    .map(|t| t.status == TaskStatus::Done)
                    .unwrap_or(false)
            });
            if !deps_satisfied {
                actions.push(PlannedAction::Block {
                    task: task.id.clone(),
                    reason: "unsatisfied dependency".into(),
                });
                continue;
            }
            if task.lease.is_some() {
                actions.push(PlannedAction::Block {
                    task: task.id.clone(),
                    reason: "already leased".into(),
                });
                continue;
            }
            if let Some(resource) = &task.resource {
                if analysis.occupied_resources.get(resource) != Some(&task.id)
                    && analysis.occupied_resources.contains_key(resource)
                {
                    actions.push(PlannedAction::Block {
                        task: task.id.clone(),
                        reason: format!("resource {resource} occupied"),
                    });
                    continue;
                }
            }

            // Routing-target resolution has to run before the participant
            // check since the participant check needs a resolved target;
            // see DESIGN.md for the sequencing rationale.
            let Some(target) = resolve_target(task) else {
                actions.push(PlannedAction::Alert {
                    task: task.id.clone(),
                    reason: "no viable routing target".into(),
                });
                continue;
            };

            if let Some(manifest) = manifest {
                if let Some(agent) = &task.agent {
                    if !manifest.participant_allowed(agent) {
                        actions.push(PlannedAction::Alert {
                            task: task.id.clone(),
                            reason: "not a participant".into(),
                        });
                        continue;
                    }
                }
            }

            let candidate = Candidate {
                team: task.team.as_deref(),
                current_in_progress: all_tasks
                    .iter()
                    .filter(|t| t.status == TaskStatus::InProgress)
                    .count() as u32,
                team_in_progress: task
                    .team
                    .as_ref()
                    .and_then(|team| analysis.in_progress_by_team.get(team))
                    .copied()
                    .unwrap_or(0),
            };
            let decision = throttle.check(&candidate).await;
            if !decision.allowed {
                if decision.stop_tick {
                    break;
                }
                continue;
            }

            throttle.record_dispatch(task.team.as_deref()).await;
            actions.push(PlannedAction::Assign {
                task: task.id.clone(),
                target,
            });
        }

        actions
    }

    fn plan_sla_violations(&self, all_tasks: &[Task]) -> Vec<PlannedAction> {
        let now = Utc::now();
        all_tasks
            .iter()
            .filter(|t| t.status == TaskStatus::InProgress)
            .filter_map(|t| {
                let sla = t.sla.as_ref()?;
                let lease = t.lease.as_ref()?;
                let in_progress_ms = (now - lease.acquired_at).num_milliseconds();
                if in_progress_ms > sla.max_in_progress_ms {
                    Some(PlannedAction::SlaViolation {
                        task: t.id.clone(),
                        on_violation: sla.on_violation,
                    })
                } else {
                    None
                }
            })
            .collect()
    }

    /// Surfaces `promote` as advisory output only; the actual mutation
    /// happens through `Store::promote`, a separate code path (see
    /// DESIGN.md Open Question 2).
    fn plan_promotions(&self, all_tasks: &[Task], analysis: &Analysis) -> Vec<PlannedAction> {
        all_tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Backlog)
            .filter(|t| !analysis.blocked_by_subtasks.contains(&t.id))
            .filter(|t| !analysis.circular_deps.contains(&t.id))
            .filter(|t| t.lease.is_none())
            .filter(|t| resolve_target(t).is_some())
            .filter(|t| {
                t.depends_on.iter().all(|dep| {
                    all_tasks
                        .iter()
                        .find(|c| &c.id == dep)
                        .map(|c| c.status == TaskStatus::Done)
                        .unwrap_or(false)
                })
            })
            .map(|t| PlannedAction::Promote { task: t.id.clone() })
            .collect()
    }
}

impl Default for DispatchPlanner {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Priority;
    use chrono::Duration as ChronoDuration;

    fn task(id: &str, priority: Priority, agent: Option<&str>) -> Task {
        let now = Utc::now();
        Task {
            id: id.parse().unwrap(),
            project: "demo".into(),
            schema_version: 1,
            title: id.into(),
            body: String::new(),
            priority,
            tags: Default::default(),
            status: TaskStatus::Ready,
            agent: agent.map(String::from),
            role: None,
            team: None,
            workflow: None,
            lease: None,
            parent_id: None,
            depends_on: vec![],
            created_at: now,
            updated_at: now,
            last_transition_at: now,
            content_hash: String::new(),
            gate: None,
            gate_history: vec![],
            review_context: None,
            sla: None,
            resource: None,
            metadata: Default::default(),
        }
    }

    fn unlimited_throttle() -> ThrottleController {
        ThrottleController::new(crate::throttle::ThrottleConfig {
            configured_max: 100,
            per_tick_cap: 100,
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn assigns_task_with_routing_target() {
        let planner = DispatchPlanner::new();
        let t = task("TASK-2026-07-31-001", Priority::Normal, Some("agent-a"));
        let analysis = crate::analyzer::build(std::slice::from_ref(&t));
        let throttle = unlimited_throttle();
        let actions = planner
            .plan(std::slice::from_ref(&t), std::slice::from_ref(&t), &analysis, None, &throttle)
            .await;
        assert_eq!(
            actions,
            vec![PlannedAction::Assign {
                task: t.id,
                target: "agent-a".into()
            }]
        );
    }

    #[tokio::test]
    async fn alerts_when_no_routing_target() {
        let planner = DispatchPlanner::new();
        let t = task("TASK-2026-07-31-001", Priority::Normal, None);
        let analysis = crate::analyzer::build(std::slice::from_ref(&t));
        let throttle = ThrottleController::new(Default::default());
        let actions = planner
            .plan(std::slice::from_ref(&t), std::slice::from_ref(&t), &analysis, None, &throttle)
            .await;
        assert_eq!(
            actions,
            vec![PlannedAction::Alert {
                task: t.id,
                reason: "no viable routing target".into()
            }]
        );
    }

    #[tokio::test]
    async fn blocks_on_circular_dependency() {
        let planner = DispatchPlanner::new();
        let mut t1 = task("TASK-2026-07-31-001", Priority::Normal, Some("a"));
        let mut t2 = task("TASK-2026-07-31-002", Priority::Normal, Some("b"));
        t1.depends_on = vec![t2.id.clone()];
        t2.depends_on = vec![t1.id.clone()];
        let all = vec![t1.clone(), t2.clone()];
        let analysis = crate::analyzer::build(&all);
        let throttle = ThrottleController::new(Default::default());
        let actions = planner.plan(&all, &all, &analysis, None, &throttle).await;
        assert!(actions
            .iter()
            .all(|a| matches!(a, PlannedAction::Block { .. })));
    }

    #[tokio::test]
    async fn tie_break_orders_by_priority_then_age_then_id() {
        let planner = DispatchPlanner::new();
        let now = Utc::now();
        let mut low = task("TASK-2026-07-31-002", Priority::Low, Some("a"));
        low.created_at = now;
        let mut high = task("TASK-2026-07-31-001", Priority::High, Some("b"));
        high.created_at = now + ChronoDuration::seconds(10);
        let all = vec![low.clone(), high.clone()];
        let analysis = crate::analyzer::build(&all);
        let throttle = ThrottleController::new(crate::throttle::ThrottleConfig {
            configured_max: 1,
            per_tick_cap: 1,
            ..Default::default()
        });
        let actions = planner.plan(&all, &all, &analysis, None, &throttle).await;
        assert_eq!(
            actions,
            vec![PlannedAction::Assign {
                task: high.id,
                target: "b".into()
            }]
        );
    }

    #[tokio::test]
    async fn sla_violation_surfaced_for_overrunning_task() {
        use crate::model::{Lease, SlaPolicy};
        let planner = DispatchPlanner::new();
        let mut t = task("TASK-2026-07-31-001", Priority::Normal, Some("a"));
        t.status = TaskStatus::InProgress;
        t.sla = Some(SlaPolicy {
            max_in_progress_ms: 1,
            on_violation: SlaViolationAction::Alert,
        });
        t.lease = Some(Lease {
            agent: "a".into(),
            acquired_at: Utc::now() - ChronoDuration::seconds(10),
            expires_at: Utc::now() + ChronoDuration::seconds(60),
            renew_count: 0,
        });
        let analysis = crate::analyzer::build(&[t.clone()]);
        let throttle = ThrottleController::new(Default::default());
        let actions = planner.plan(&[], &[t.clone()], &analysis, None, &throttle).await;
        assert!(actions.iter().any(|a| matches!(a, PlannedAction::SlaViolation { task, .. } if *task == t.id)));
    }
}
