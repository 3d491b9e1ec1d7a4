//! Scheduler Poll Loop + Dispatch Executor: the orchestrator tying every
//! other component together into one tick.

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tracing::{error, info, warn};

use crate::analyzer;
use crate::config::Config;
use crate::error::AofError;
use crate::event_log::EventLog;
use crate::executor::{Executor, GateContext, SpawnOpts, TaskContext};
use crate::gate::GateEngine;
use crate::lease::LeaseManager;
use crate::model::{Event, EventType, ProjectManifest, SlaViolationAction, TaskStatus};
use crate::planner::{DispatchPlanner, PlannedAction};
use crate::store::{TaskStore, TransitionOpts};
use crate::throttle::ThrottleController;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickStats {
    pub actions_planned: u32,
    pub actions_executed: u32,
    pub actions_failed: u32,
}

/// Health of a single component, as surfaced by an external health check.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ComponentStatus {
    Healthy,
    Degraded { reason: String },
}

/// Component-health record for the daemon: `{scheduler, store, eventLogger}`.
/// Library-level equivalent of what an external health endpoint would
/// expose; this crate has no HTTP surface of its own.
#[derive(Debug, Clone, serde::Serialize)]
pub struct DaemonHealth {
    pub scheduler: ComponentStatus,
    pub store: ComponentStatus,
    #[serde(rename = "eventLogger")]
    pub event_logger: ComponentStatus,
}

pub struct Scheduler {
    store: Arc<TaskStore>,
    lease: Arc<LeaseManager>,
    gate: Arc<GateEngine>,
    throttle: Arc<ThrottleController>,
    planner: DispatchPlanner,
    executor: Option<Arc<dyn Executor>>,
    manifest: Option<ProjectManifest>,
    config: Config,
}

impl Scheduler {
    pub fn new(
        store: Arc<TaskStore>,
        lease: Arc<LeaseManager>,
        gate: Arc<GateEngine>,
        throttle: Arc<ThrottleController>,
        executor: Option<Arc<dyn Executor>>,
        manifest: Option<ProjectManifest>,
        config: Config,
    ) -> Self {
        Self {
            store,
            lease,
            gate,
            throttle,
            planner: DispatchPlanner::new(),
            executor,
            manifest,
            config,
        }
    }

    pub fn events(&self) -> &EventLog {
        self.store.events()
    }

    /// Component-health snapshot: each check is a lightweight probe, not a
    /// full tick, so it's cheap enough for a liveness check to call often.
    pub async fn health(&self) -> DaemonHealth {
        let store = match tokio::fs::metadata(self.store.layout().tasks_dir()).await {
            Ok(meta) if meta.is_dir() => ComponentStatus::Healthy,
            Ok(_) => ComponentStatus::Degraded {
                reason: "tasks path exists but is not a directory".into(),
            },
            Err(e) => ComponentStatus::Degraded { reason: e.to_string() },
        };

        let event_logger = match tokio::fs::metadata(self.store.layout().events_dir()).await {
            Ok(meta) if meta.is_dir() => ComponentStatus::Healthy,
            Ok(_) => ComponentStatus::Degraded {
                reason: "events path exists but is not a directory".into(),
            },
            Err(e) => ComponentStatus::Degraded { reason: e.to_string() },
        };

        let scheduler = if self.executor.is_none() && !self.config.dry_run {
            ComponentStatus::Degraded {
                reason: "no executor configured, ticks plan but never dispatch".into(),
            }
        } else {
            ComponentStatus::Healthy
        };

        DaemonHealth { scheduler, store, event_logger }
    }

    /// Runs one scheduler tick. Steps run strictly in order; the planner
    /// and dispatch executor never run concurrently with each other (the
    /// store assumes a single writer).
    pub async fn tick(&self) -> Result<TickStats, AofError> {
        let now = Utc::now();

        let expired = self.lease.expire_stale(now).await?;
        if !expired.is_empty() {
            info!(count = expired.len(), "expired stale leases");
        }

        if let Some(manifest) = &self.manifest {
            if let Some(workflow) = &manifest.workflow {
                match self.gate.check_timeouts(workflow, now).await {
                    Ok(escalations) if !escalations.is_empty() => {
                        info!(count = escalations.len(), "gate timeouts escalated");
                    }
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "gate timeout check failed"),
                }
            }
        }

        let tasks = self.store.list_all().await?;
        let ready: Vec<_> = tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Ready)
            .cloned()
            .collect();
        let analysis = analyzer::build(&tasks);

        self.throttle.begin_tick();
        let actions = self
            .planner
            .plan(&ready, &tasks, &analysis, self.manifest.as_ref(), &self.throttle)
            .await;

        let mut stats = TickStats::default();
        let mut stop_reason = None;

        if self.config.dry_run {
            stats.actions_planned = actions
                .iter()
                .filter(|a| matches!(a, PlannedAction::Assign { .. }))
                .count() as u32;
            stop_reason = Some("dry_run_mode");
        } else if self.executor.is_none() {
            stats.actions_planned = actions
                .iter()
                .filter(|a| matches!(a, PlannedAction::Assign { .. }))
                .count() as u32;
            stop_reason = Some("no_executor");
        } else {
            for action in actions {
                match action {
                    PlannedAction::Assign { task, target } => {
                        stats.actions_planned += 1;
                        match self.dispatch(&task, &target).await {
                            Ok(DispatchOutcome::Executed) => stats.actions_executed += 1,
                            Ok(DispatchOutcome::Skipped) => {}
                            Ok(DispatchOutcome::PlatformLimited) => {
                                stop_reason = Some("action_failed");
                                break;
                            }
                            Err(e) => {
                                error!(task = %task, error = %e, "dispatch failed");
                                stats.actions_failed += 1;
                            }
                        }
                    }
                    PlannedAction::Block { task, reason } => {
                        if let Err(e) = self.store.block(&task, reason).await {
                            warn!(task = %task, error = %e, "failed to apply planner block action");
                        }
                    }
                    PlannedAction::Alert { task, reason } => {
                        let _ = self
                            .events()
                            .append(
                                Event::new(EventType::DispatchError, "scheduler", json!({ "reason": reason }))
                                    .for_task(task),
                            )
                            .await;
                    }
                    PlannedAction::SlaViolation { task, on_violation } => {
                        self.handle_sla_violation(&task, on_violation).await;
                    }
                    PlannedAction::Promote { .. } => {
                        // Advisory only; promotion is a separate, explicit command path.
                    }
                }
            }
            if stats.actions_failed > 0 && stop_reason.is_none() {
                stop_reason = Some("action_failed");
            }
        }

        let in_progress = tasks.iter().filter(|t| t.status == TaskStatus::InProgress).count();
        let ready_count = ready.len();
        self.events()
            .append(Event::new(
                EventType::SchedulerPoll,
                "scheduler",
                json!({
                    "actionsPlanned": stats.actions_planned,
                    "actionsExecuted": stats.actions_executed,
                    "actionsFailed": stats.actions_failed,
                    "reason": stop_reason,
                    "dryRun": self.config.dry_run,
                    "inProgress": in_progress,
                    "ready": ready_count,
                }),
            ))
            .await?;

        Ok(stats)
    }

    /// Carries out a single `assign` action: acquires the lease, spawns the
    /// executor, and records the outcome.
    async fn dispatch(&self, task_id: &crate::model::TaskId, target: &str) -> Result<DispatchOutcome, AofError> {
        let Some(executor) = &self.executor else {
            return Ok(DispatchOutcome::Skipped);
        };

        let task = self
            .store
            .get(task_id)
            .await?
            .ok_or_else(|| AofError::NotFound(task_id.to_string()))?;
        if task.status != TaskStatus::Ready || task.lease.is_some() {
            return Ok(DispatchOutcome::Skipped);
        }

        self.events()
            .append(Event::new(EventType::ActionStarted, "scheduler", json!({ "target": target })).for_task(task_id.clone()))
            .await?;

        let leased = self
            .lease
            .acquire(task_id, target, self.config.default_lease_ttl)
            .await?;

        let gate_context = leased.gate.as_ref().map(|g| GateContext {
            gate_id: g.current.clone(),
            rejection_summary: leased.review_context.as_ref().and_then(|r| r.notes.clone()),
        });
        let ctx = TaskContext {
            task_id: task_id.clone(),
            path: self.store.layout().record_path(TaskStatus::InProgress, task_id),
            agent: leased.agent.clone(),
            role: leased.role.clone(),
            team: leased.team.clone(),
            priority: leased.priority,
            gate_context,
        };

        let result = executor
            .spawn(ctx, SpawnOpts { timeout: self.config.spawn_timeout })
            .await;

        if result.success {
            self.events()
                .append(
                    Event::new(
                        EventType::DispatchMatched,
                        "scheduler",
                        json!({ "sessionId": result.session_id }),
                    )
                    .for_task(task_id.clone()),
                )
                .await?;
            self.events()
                .append(
                    Event::new(EventType::ActionCompleted, "scheduler", json!({ "success": true }))
                        .for_task(task_id.clone()),
                )
                .await?;
            self.lease.start_background_renewal(
                task_id.clone(),
                target.to_string(),
                self.config.default_lease_ttl,
                self.config.max_lease_renewals,
            );
            return Ok(DispatchOutcome::Executed);
        }

        if let Some(limit) = result.platform_limit {
            self.lease.release(task_id, target).await?;
            self.throttle.tighten_cap(limit);
            self.events()
                .append(
                    Event::new(
                        EventType::ConcurrencyPlatformLimit,
                        "scheduler",
                        json!({ "platformLimit": limit }),
                    )
                    .for_task(task_id.clone()),
                )
                .await?;
            return Ok(DispatchOutcome::PlatformLimited);
        }

        let message = result.error.unwrap_or_else(|| "spawn failed".into());
        self.record_dispatch_failure(task_id, &message).await?;
        Err(AofError::SpawnFailure(message))
    }

    async fn record_dispatch_failure(&self, task_id: &crate::model::TaskId, message: &str) -> Result<(), AofError> {
        let mut task = self
            .store
            .get(task_id)
            .await?
            .ok_or_else(|| AofError::NotFound(task_id.to_string()))?;
        let retries: u32 = task
            .metadata
            .get("retryCount")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        task.metadata.insert("retryCount".into(), (retries + 1).to_string());
        task.metadata.insert("lastBlockedAt".into(), Utc::now().to_rfc3339());
        self.store.save(&task).await?;

        self.store.block(task_id, message.to_string()).await?;
        self.events()
            .append(
                Event::new(EventType::DispatchError, "scheduler", json!({ "error": message }))
                    .for_task(task_id.clone()),
            )
            .await?;
        self.events()
            .append(
                Event::new(EventType::ActionCompleted, "scheduler", json!({ "success": false }))
                    .for_task(task_id.clone()),
            )
            .await?;
        Ok(())
    }

    async fn handle_sla_violation(&self, task_id: &crate::model::TaskId, action: SlaViolationAction) {
        let _ = self
            .events()
            .append(Event::new(EventType::SlaViolation, "scheduler", json!({ "onViolation": action })).for_task(task_id.clone()))
            .await;
        let result = match action {
            SlaViolationAction::Alert => Ok(()),
            SlaViolationAction::Block => self
                .store
                .block(task_id, "SLA exceeded".into())
                .await
                .map(|_| ()),
            SlaViolationAction::Deadletter => self
                .store
                .transition(task_id, TaskStatus::Deadletter, TransitionOpts::default())
                .await
                .map(|_| ()),
        };
        if let Err(e) = result {
            warn!(task = %task_id, error = %e, "failed to apply SLA violation action");
        }
    }

    /// Runs the poll loop at `config.poll_interval` until `stop` fires.
    /// Polls never overlap: each iteration awaits the previous tick's
    /// completion before sleeping.
    pub async fn run(self: Arc<Self>, mut stop: tokio::sync::watch::Receiver<bool>) {
        loop {
            if *stop.borrow() {
                return;
            }
            match self.tick().await {
                Ok(stats) => info!(?stats, "scheduler tick complete"),
                Err(e) => error!(error = %e, "scheduler tick failed"),
            }
            tokio::select! {
                _ = stop.changed() => return,
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }
    }
}

enum DispatchOutcome {
    Executed,
    Skipped,
    PlatformLimited,
}
