//! Throttle Controller: per-tick policy gate enforcing global/per-team
//! concurrency caps and minimum dispatch intervals.
//!
//! The effective cap is tightened for the daemon's lifetime when the
//! executor reports a platform limit; it lives on this struct's instance,
//! never in a process-global, so two schedulers in the same process never
//! share state.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use tracing::warn;

#[derive(Debug, Clone, Default)]
pub struct ThrottleConfig {
    pub configured_max: u32,
    pub team_caps: HashMap<String, u32>,
    pub min_dispatch_interval: Option<Duration>,
    pub team_min_interval: HashMap<String, Duration>,
    pub per_tick_cap: u32,
}

/// What the planner considers when checking one candidate.
pub struct Candidate<'a> {
    pub team: Option<&'a str>,
    pub current_in_progress: u32,
    pub team_in_progress: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub allowed: bool,
    pub reason: Option<String>,
    /// When true and `allowed` is false, the planner must stop considering
    /// further candidates this tick rather than skip to the next one.
    pub stop_tick: bool,
}

impl Decision {
    fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
            stop_tick: false,
        }
    }

    fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
            stop_tick: false,
        }
    }

    fn deny_stop(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
            stop_tick: true,
        }
    }
}

pub struct ThrottleController {
    config: ThrottleConfig,
    effective_cap: AtomicU32,
    dispatches_this_tick: AtomicU32,
    last_dispatch_at: RwLock<Option<Instant>>,
    team_last_dispatch_at: RwLock<HashMap<String, Instant>>,
}

impl ThrottleController {
    pub fn new(config: ThrottleConfig) -> Self {
        let effective_cap = AtomicU32::new(config.configured_max);
        Self {
            config,
            effective_cap,
            dispatches_this_tick: AtomicU32::new(0),
            last_dispatch_at: RwLock::new(None),
            team_last_dispatch_at: RwLock::new(HashMap::new()),
        }
    }

    pub fn effective_cap(&self) -> u32 {
        self.effective_cap.load(Ordering::Relaxed)
    }

    /// Tightens the cap to `min(limit, current)` on a discovered platform
    /// limit. The new ceiling persists for the process's lifetime.
    pub fn tighten_cap(&self, limit: u32) {
        let previous = self
            .effective_cap
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
                Some(current.min(limit))
            })
            .unwrap();
        if limit < previous {
            warn!(previous, limit, "effective concurrency cap tightened by platform limit");
        }
    }

    pub fn begin_tick(&self) {
        self.dispatches_this_tick.store(0, Ordering::Relaxed);
    }

    pub fn dispatches_this_tick(&self) -> u32 {
        self.dispatches_this_tick.load(Ordering::Relaxed)
    }

    pub async fn check(&self, candidate: &Candidate<'_>) -> Decision {
        let pending = self.dispatches_this_tick.load(Ordering::Relaxed);
        let global_cap = self.effective_cap();
        if candidate.current_in_progress + pending >= global_cap {
            return Decision::deny("global_cap");
        }
        if let Some(team) = candidate.team {
            if let Some(&cap) = self.config.team_caps.get(team) {
                if candidate.team_in_progress + pending >= cap {
                    return Decision::deny("team_cap");
                }
            }
        }
        if let Some(interval) = self.config.min_dispatch_interval {
            let last = *self.last_dispatch_at.read().await;
            if let Some(last) = last {
                if last.elapsed() < interval {
                    return Decision::deny_stop("min_dispatch_interval");
                }
            }
        }
        if let Some(team) = candidate.team {
            if let Some(&interval) = self.config.team_min_interval.get(team) {
                let last = self.team_last_dispatch_at.read().await.get(team).copied();
                if let Some(last) = last {
                    if last.elapsed() < interval {
                        return Decision::deny(format!("team_min_dispatch_interval:{team}"));
                    }
                }
            }
        }
        if self.config.per_tick_cap > 0 && pending >= self.config.per_tick_cap {
            return Decision::deny("per_tick_cap");
        }
        Decision::allow()
    }

    /// Records that a dispatch was planned for `team`, so subsequent
    /// `check` calls within the same tick see the updated pending count.
    pub async fn record_dispatch(&self, team: Option<&str>) {
        self.dispatches_this_tick.fetch_add(1, Ordering::Relaxed);
        let now = Instant::now();
        *self.last_dispatch_at.write().await = Some(now);
        if let Some(team) = team {
            self.team_last_dispatch_at
                .write()
                .await
                .insert(team.to_string(), now);
        }
    }
}
