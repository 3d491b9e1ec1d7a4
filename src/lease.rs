//! Lease Manager: short-lived exclusive holds identifying the agent
//! responsible for an `in-progress` task. Layered on the Task Store; every
//! operation here ends in a store call so status and lease presence stay
//! consistent on disk.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::error::AofError;
use crate::model::{Event, EventType, Lease, Task, TaskId, TaskStatus};
use crate::store::{ListFilter, TaskStore, TransitionOpts};

pub struct LeaseManager {
    store: Arc<TaskStore>,
    renewal_stops: Mutex<HashMap<TaskId, watch::Sender<bool>>>,
}

impl LeaseManager {
    pub fn new(store: Arc<TaskStore>) -> Self {
        Self {
            store,
            renewal_stops: Mutex::new(HashMap::new()),
        }
    }

    /// Succeeds from `ready`, or idempotently re-fires a fresh lease when
    /// the same agent already holds it.
    pub async fn acquire(&self, id: &TaskId, agent: &str, ttl: Duration) -> Result<Task, AofError> {
        let task = self
            .store
            .get(id)
            .await?
            .ok_or_else(|| AofError::NotFound(id.to_string()))?;
        match task.status {
            TaskStatus::Ready => {}
            TaskStatus::InProgress
                if task.lease.as_ref().map(|l| l.agent.as_str()) == Some(agent) => {}
            TaskStatus::InProgress => {
                let holder = task
                    .lease
                    .as_ref()
                    .map(|l| l.agent.clone())
                    .unwrap_or_else(|| "<unknown>".into());
                return Err(AofError::Leased(holder));
            }
            other => {
                return Err(AofError::InvalidTransition {
                    from: other.to_string(),
                    to: TaskStatus::InProgress.to_string(),
                })
            }
        }

        self.store
            .transition(
                id,
                TaskStatus::InProgress,
                TransitionOpts {
                    reason: None,
                    agent: Some(agent.to_string()),
                },
            )
            .await?;

        let now = Utc::now();
        let lease = Lease {
            agent: agent.to_string(),
            acquired_at: now,
            expires_at: now + chrono::Duration::from_std(ttl).unwrap_or_default(),
            renew_count: 0,
        };
        self.store.set_lease(id, Some(lease)).await
    }

    /// Extends the lease if the calling agent is the current holder and
    /// has renewals remaining.
    pub async fn renew(
        &self,
        id: &TaskId,
        agent: &str,
        ttl: Duration,
        max_renewals: u32,
    ) -> Result<Task, AofError> {
        let task = self
            .store
            .get(id)
            .await?
            .ok_or_else(|| AofError::NotFound(id.to_string()))?;
        if task.status != TaskStatus::InProgress {
            return Err(AofError::Leased(format!("{id} is not in-progress")));
        }
        let lease = task
            .lease
            .clone()
            .ok_or_else(|| AofError::Leased(format!("{id} has no active lease")))?;
        if lease.agent != agent {
            return Err(AofError::Leased(lease.agent));
        }
        if lease.renew_count >= max_renewals {
            return Err(AofError::Leased(format!(
                "max renewals ({max_renewals}) exceeded for {id}"
            )));
        }
        let now = Utc::now();
        let renewed = Lease {
            expires_at: now + chrono::Duration::from_std(ttl).unwrap_or_default(),
            renew_count: lease.renew_count + 1,
            ..lease
        };
        debug!(task = %id, renew_count = renewed.renew_count, "lease renewed");
        self.store.set_lease(id, Some(renewed)).await
    }

    /// Releases the lease. Holder-only.
    pub async fn release(&self, id: &TaskId, agent: &str) -> Result<Task, AofError> {
        let task = self
            .store
            .get(id)
            .await?
            .ok_or_else(|| AofError::NotFound(id.to_string()))?;
        let holder = task
            .lease
            .as_ref()
            .map(|l| l.agent.clone())
            .ok_or_else(|| AofError::Leased(format!("{id} has no active lease")))?;
        if holder != agent {
            return Err(AofError::Leased(holder));
        }
        self.stop_background_renewal(id);
        self.store
            .transition(id, TaskStatus::Ready, TransitionOpts::default())
            .await
    }

    /// Scans all in-progress tasks, requeues any with an expired lease to
    /// `ready`, and emits `lease.expired`.
    pub async fn expire_stale(&self, now: chrono::DateTime<Utc>) -> Result<Vec<TaskId>, AofError> {
        let in_progress = self
            .store
            .list(&ListFilter {
                status: Some(TaskStatus::InProgress),
                ..Default::default()
            })
            .await?;
        let mut expired = Vec::new();
        for task in in_progress {
            let Some(lease) = &task.lease else { continue };
            if lease.expires_at > now {
                continue;
            }
            self.stop_background_renewal(&task.id);
            self.store
                .transition(&task.id, TaskStatus::Ready, TransitionOpts::default())
                .await?;
            self.store
                .events()
                .append(
                    Event::new(
                        EventType::LeaseExpired,
                        "lease-manager",
                        json!({ "agent": lease.agent }),
                    )
                    .for_task(task.id.clone()),
                )
                .await?;
            expired.push(task.id);
        }
        Ok(expired)
    }

    /// Starts a background renewal loop that fires at `ttl / 2` intervals
    /// until the task leaves `in-progress` or is stopped explicitly.
    pub fn start_background_renewal(
        self: &Arc<Self>,
        id: TaskId,
        agent: String,
        ttl: Duration,
        max_renewals: u32,
    ) {
        let (tx, mut rx) = watch::channel(false);
        self.renewal_stops.lock().unwrap().insert(id.clone(), tx);
        let this = Arc::clone(self);
        let period = (ttl / 2).max(Duration::from_millis(1));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = rx.changed() => break,
                    _ = interval.tick() => {
                        match this.store.get(&id).await {
                            Ok(Some(task))
                                if task.status == TaskStatus::InProgress
                                    && task.lease.as_ref().map(|l| l.agent.as_str()) == Some(agent.as_str()) =>
                            {
                                if let Err(e) = this.renew(&id, &agent, ttl, max_renewals).await {
                                    warn!(task = %id, error = %e, "background lease renewal failed, stopping");
                                    break;
                                }
                            }
                            _ => break,
                        }
                    }
                }
            }
            this.renewal_stops.lock().unwrap().remove(&id);
        });
    }

    pub fn stop_background_renewal(&self, id: &TaskId) {
        if let Some(tx) = self.renewal_stops.lock().unwrap().remove(id) {
            let _ = tx.send(true);
        }
    }
}
