//! The Task Store: sole authority for task persistence.
//!
//! Status is encoded structurally by which directory contains a task's
//! record; every mutation here is implemented as an atomic write followed
//! by an atomic rename between status directories, so a reader never sees
//! a task missing mid-transition.

mod atomic;
pub mod layout;
pub mod record;

use std::collections::{HashMap, HashSet};

use chrono::Utc;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::error::AofError;
use crate::event_log::EventLog;
use crate::model::{Event, EventType, Lease, Priority, Task, TaskId, TaskStatus};

pub use layout::Layout;

/// A single invariant violation surfaced by [`TaskStore::lint`].
#[derive(Debug, Clone, PartialEq)]
pub struct LintIssue {
    pub task: TaskId,
    pub issue: String,
}

/// Restricts [`TaskStore::list`] to tasks matching all given fields.
#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    pub status: Option<TaskStatus>,
    pub agent: Option<String>,
    pub team: Option<String>,
}

impl ListFilter {
    fn matches(&self, task: &Task) -> bool {
        if let Some(status) = self.status {
            if task.status != status {
                return false;
            }
        }
        if let Some(agent) = &self.agent {
            if task.lease.as_ref().map(|l| &l.agent) != Some(agent) {
                return false;
            }
        }
        if let Some(team) = &self.team {
            if task.team.as_deref() != Some(team.as_str()) {
                return false;
            }
        }
        true
    }
}

/// Options accepted by [`TaskStore::transition`].
#[derive(Debug, Clone, Default)]
pub struct TransitionOpts {
    pub reason: Option<String>,
    pub agent: Option<String>,
}

/// Fields accepted by [`TaskStore::create`].
#[derive(Debug, Clone, Default)]
pub struct CreateParams {
    pub title: String,
    pub body: String,
    pub priority: Priority,
    pub agent: Option<String>,
    pub role: Option<String>,
    pub team: Option<String>,
    pub workflow: Option<String>,
    pub tags: std::collections::BTreeSet<String>,
    pub metadata: HashMap<String, String>,
    pub created_by: String,
    pub parent_id: Option<TaskId>,
    pub depends_on: Vec<TaskId>,
}

/// Fields accepted by [`TaskStore::update`].
#[derive(Debug, Clone, Default)]
pub struct UpdatePatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub priority: Option<Priority>,
    pub agent: Option<String>,
    pub role: Option<String>,
    pub team: Option<String>,
}

pub struct TaskStore {
    layout: Layout,
    events: EventLog,
    project: String,
}

impl TaskStore {
    pub fn new(root: impl Into<std::path::PathBuf>, project: impl Into<String>) -> Self {
        let layout = Layout::new(root.into());
        let events = EventLog::new(layout.clone());
        Self {
            layout,
            events,
            project: project.into(),
        }
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn events(&self) -> &EventLog {
        &self.events
    }

    pub async fn init(&self) -> Result<(), AofError> {
        self.layout.ensure_dirs().await?;
        Ok(())
    }

    // ---- reads -------------------------------------------------------

    /// Probes every status directory for `id`.
    pub async fn get(&self, id: &TaskId) -> Result<Option<Task>, AofError> {
        for status in TaskStatus::ALL {
            let path = self.layout.record_path(status, id);
            match tokio::fs::read_to_string(&path).await {
                Ok(content) => {
                    let task = self.parse_or_report(&content, &path, id).await?;
                    return Ok(task);
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(None)
    }

    async fn parse_or_report(
        &self,
        content: &str,
        path: &std::path::Path,
        expected_id: &TaskId,
    ) -> Result<Option<Task>, AofError> {
        match record::parse(content, &path.display().to_string()) {
            Ok(task) => Ok(Some(task)),
            Err(AofError::Parse { path, message }) => {
                warn!(path = %path, %message, "task record failed validation");
                let _ = self
                    .events
                    .append(Event::new(
                        EventType::TaskValidationFailed,
                        "store",
                        json!({ "path": path, "message": message, "taskId": expected_id.as_str() }),
                    ))
                    .await;
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// For human-facing CLIs: the first task whose id starts with `prefix`.
    pub async fn get_by_prefix(&self, prefix: &str) -> Result<Option<Task>, AofError> {
        let all = self.list_all().await?;
        Ok(all.into_iter().find(|t| t.id.as_str().starts_with(prefix)))
    }

    /// Lists every task whose record parses cleanly, across all status
    /// directories. Malformed files are skipped and reported via
    /// `task.validation.failed`, never fatal to the rest of the listing.
    pub async fn list_all(&self) -> Result<Vec<Task>, AofError> {
        let mut out = Vec::new();
        for status in TaskStatus::ALL {
            let dir = self.layout.status_dir(status);
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some(layout::RECORD_EXT) {
                    continue;
                }
                let content = tokio::fs::read_to_string(&path).await?;
                match record::parse(&content, &path.display().to_string()) {
                    Ok(task) => out.push(task),
                    Err(AofError::Parse { path, message }) => {
                        warn!(path = %path, %message, "skipping malformed task record");
                        let _ = self
                            .events
                            .append(Event::new(
                                EventType::TaskValidationFailed,
                                "store",
                                json!({ "path": path, "message": message }),
                            ))
                            .await;
                    }
                    Err(e) => return Err(e),
                }
            }
        }
        Ok(out)
    }

    pub async fn list(&self, filter: &ListFilter) -> Result<Vec<Task>, AofError> {
        Ok(self
            .list_all()
            .await?
            .into_iter()
            .filter(|t| filter.matches(t))
            .collect())
    }

    /// Invariant checks across the whole corpus.
    pub async fn lint(&self) -> Result<Vec<LintIssue>, AofError> {
        let mut issues = Vec::new();
        for status in TaskStatus::ALL {
            let dir = self.layout.status_dir(status);
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some(layout::RECORD_EXT) {
                    continue;
                }
                let content = tokio::fs::read_to_string(&path).await?;
                let task = match record::parse(&content, &path.display().to_string()) {
                    Ok(task) => task,
                    Err(AofError::Parse { message, .. }) => {
                        let id = path
                            .file_stem()
                            .and_then(|s| s.to_str())
                            .unwrap_or("<unknown>");
                        issues.push(LintIssue {
                            task: id.parse().unwrap_or_else(|_| {
                                TaskId::new(Utc::now().date_naive(), 0)
                            }),
                            issue: format!("parse error: {message}"),
                        });
                        continue;
                    }
                    Err(e) => return Err(e),
                };
                if task.status != status {
                    issues.push(LintIssue {
                        task: task.id.clone(),
                        issue: format!(
                            "status field {:?} does not match containing directory {:?}",
                            task.status, status
                        ),
                    });
                }
                if task.lease.is_some() != (status == TaskStatus::InProgress) {
                    issues.push(LintIssue {
                        task: task.id.clone(),
                        issue: "lease presence does not match in-progress status".into(),
                    });
                }
                if !task.hash_matches() {
                    issues.push(LintIssue {
                        task: task.id.clone(),
                        issue: "contentHash does not match body".into(),
                    });
                }
            }
        }
        Ok(issues)
    }

    // ---- mutations -----------------------------------------------------

    /// Assigns the next id for today, writes to `backlog/`, creates
    /// companion subdirectories, emits `task.created`.
    pub async fn create(&self, params: CreateParams) -> Result<Task, AofError> {
        let existing = self.list_all().await?;
        for dep in &params.depends_on {
            if !existing.iter().any(|t| &t.id == dep) {
                return Err(AofError::InvariantViolation(format!(
                    "dependsOn references nonexistent task: {dep}"
                )));
            }
        }

        let today = Utc::now().date_naive();
        let next_seq = existing
            .iter()
            .filter_map(|t| t.id.date().filter(|d| *d == today).and(t.id.seq()))
            .max()
            .map(|n| n + 1)
            .unwrap_or(1);
        let id = TaskId::new(today, next_seq);

        let now = Utc::now();
        let mut task = Task {
            id: id.clone(),
            project: self.project.clone(),
            schema_version: 1,
            title: params.title,
            body: params.body,
            priority: params.priority,
            tags: params.tags,
            status: TaskStatus::Backlog,
            agent: params.agent,
            role: params.role,
            team: params.team,
            workflow: params.workflow,
            lease: None,
            parent_id: params.parent_id,
            depends_on: params.depends_on,
            created_at: now,
            updated_at: now,
            last_transition_at: now,
            content_hash: String::new(),
            gate: None,
            gate_history: vec![],
            review_context: None,
            sla: None,
            resource: None,
            metadata: params.metadata,
        };
        task.recompute_hash();

        let path = self.layout.record_path(TaskStatus::Backlog, &id);
        atomic::write_atomic(&path, record::serialize(&task)?).await?;
        for dir in layout::COMPANION_DIRS {
            let _ = tokio::fs::create_dir_all(
                self.layout.companion_dir(TaskStatus::Backlog, &id).join(dir),
            )
            .await;
        }

        info!(task = %id, "task created");
        self.events
            .append(
                Event::new(
                    EventType::TaskCreated,
                    params.created_by,
                    json!({ "title": task.title, "priority": task.priority }),
                )
                .for_task(id),
            )
            .await?;
        Ok(task)
    }

    /// Mechanical core of every status mutation: validate against the
    /// transition matrix, apply `mutate`, write to the old location, then
    /// rename the record and companion directory into the new status.
    ///
    /// Returns `None` when the transition is a no-op (new status equals
    /// current).
    async fn apply_transition(
        &self,
        id: &TaskId,
        new_status: TaskStatus,
        mutate: impl FnOnce(&mut Task),
    ) -> Result<Option<(TaskStatus, Task)>, AofError> {
        let mut task = self
            .get(id)
            .await?
            .ok_or_else(|| AofError::NotFound(id.to_string()))?;
        let old_status = task.status;
        if old_status == new_status {
            return Ok(None);
        }
        if !old_status.allowed_transitions().contains(&new_status) {
            return Err(AofError::InvalidTransition {
                from: old_status.to_string(),
                to: new_status.to_string(),
            });
        }

        mutate(&mut task);
        task.status = new_status;
        let now = Utc::now();
        task.updated_at = now;
        task.last_transition_at = now;
        if matches!(
            new_status,
            TaskStatus::Ready | TaskStatus::Backlog | TaskStatus::Done
        ) {
            task.lease = None;
        }

        let old_path = self.layout.record_path(old_status, id);
        let new_path = self.layout.record_path(new_status, id);
        let old_companion = self.layout.companion_dir(old_status, id);
        let new_companion = self.layout.companion_dir(new_status, id);

        atomic::write_atomic(&old_path, record::serialize(&task)?).await?;
        tokio::fs::create_dir_all(self.layout.status_dir(new_status)).await?;
        tokio::fs::rename(&old_path, &new_path).await?;
        atomic::rename_best_effort(&old_companion, &new_companion).await;

        debug!(task = %id, from = %old_status, to = %new_status, "task transitioned");
        Ok(Some((old_status, task)))
    }

    /// Validates and applies a status transition, recording it as a
    /// `task.transitioned` event.
    pub async fn transition(
        &self,
        id: &TaskId,
        new_status: TaskStatus,
        opts: TransitionOpts,
    ) -> Result<Task, AofError> {
        let agent = opts.agent.clone();
        let result = self
            .apply_transition(id, new_status, |task| {
                if let Some(agent) = &agent {
                    task.agent = Some(agent.clone());
                }
            })
            .await?;
        let Some((from, task)) = result else {
            return self.get(id).await?.ok_or_else(|| AofError::NotFound(id.to_string()));
        };

        self.events
            .append(
                Event::new(
                    EventType::TaskTransitioned,
                    "scheduler",
                    json!({ "from": from, "to": new_status, "reason": opts.reason }),
                )
                .for_task(id.clone()),
            )
            .await?;
        if new_status == TaskStatus::InProgress && agent.is_some() {
            self.events
                .append(
                    Event::new(EventType::TaskAssigned, "scheduler", json!({ "agent": agent }))
                        .for_task(id.clone()),
                )
                .await?;
        }
        if new_status == TaskStatus::Done {
            self.events
                .append(Event::new(EventType::TaskCompleted, "scheduler", json!({})).for_task(id.clone()))
                .await?;
        }
        if new_status == TaskStatus::Cancelled {
            self.events
                .append(Event::new(EventType::TaskCancelled, "scheduler", json!({})).for_task(id.clone()))
                .await?;
        }
        Ok(task)
    }

    /// Recomputes `contentHash`, bumps `updatedAt`; rejected on terminal
    /// states.
    pub async fn update_body(&self, id: &TaskId, body: String) -> Result<Task, AofError> {
        let mut task = self
            .get(id)
            .await?
            .ok_or_else(|| AofError::NotFound(id.to_string()))?;
        if task.status.is_terminal() {
            return Err(AofError::Terminal(id.to_string()));
        }
        task.body = body;
        task.recompute_hash();
        task.updated_at = Utc::now();
        self.write_in_place(&task).await?;
        self.events
            .append(
                Event::new(EventType::TaskUpdated, "store", json!({ "field": "body" }))
                    .for_task(id.clone()),
            )
            .await?;
        Ok(task)
    }

    /// Applies a title/description/priority/routing patch.
    pub async fn update(&self, id: &TaskId, patch: UpdatePatch) -> Result<Task, AofError> {
        let mut task = self
            .get(id)
            .await?
            .ok_or_else(|| AofError::NotFound(id.to_string()))?;
        if task.status.is_terminal() {
            return Err(AofError::Terminal(id.to_string()));
        }
        let mut diff = serde_json::Map::new();
        if let Some(title) = patch.title {
            diff.insert("title".into(), json!({ "from": task.title, "to": title }));
            task.title = title;
        }
        if let Some(description) = patch.description {
            task.body = description;
            task.recompute_hash();
            diff.insert("body".into(), json!("updated"));
        }
        if let Some(priority) = patch.priority {
            diff.insert(
                "priority".into(),
                json!({ "from": task.priority, "to": priority }),
            );
            task.priority = priority;
        }
        if let Some(agent) = patch.agent {
            diff.insert("agent".into(), json!(agent));
            task.agent = Some(agent);
        }
        if let Some(role) = patch.role {
            diff.insert("role".into(), json!(role));
            task.role = Some(role);
        }
        if let Some(team) = patch.team {
            diff.insert("team".into(), json!(team));
            task.team = Some(team);
        }
        task.updated_at = Utc::now();
        self.write_in_place(&task).await?;
        self.events
            .append(
                Event::new(EventType::TaskUpdated, "store", serde_json::Value::Object(diff))
                    .for_task(id.clone()),
            )
            .await?;
        Ok(task)
    }

    async fn write_in_place(&self, task: &Task) -> Result<(), AofError> {
        let path = self.layout.record_path(task.status, &task.id);
        atomic::write_atomic(&path, record::serialize(task)?).await
    }

    /// Used by the Lease Manager to write/clear the lease in place without
    /// a status change (status changes clear the lease themselves via
    /// [`Self::apply_transition`]).
    pub async fn set_lease(&self, id: &TaskId, lease: Option<Lease>) -> Result<Task, AofError> {
        let mut task = self
            .get(id)
            .await?
            .ok_or_else(|| AofError::NotFound(id.to_string()))?;
        task.lease = lease;
        task.updated_at = Utc::now();
        self.write_in_place(&task).await?;
        Ok(task)
    }

    /// Rejects self-dependency, a missing blocker, and any addition that
    /// would create a cycle (depth-first search from the proposed blocker;
    /// if the walk reaches `id`, refuse). Idempotent.
    pub async fn add_dep(&self, id: &TaskId, blocker_id: &TaskId) -> Result<Task, AofError> {
        if id == blocker_id {
            return Err(AofError::InvariantViolation(format!(
                "task cannot depend on itself: {id}"
            )));
        }
        let mut task = self
            .get(id)
            .await?
            .ok_or_else(|| AofError::NotFound(id.to_string()))?;
        if task.depends_on.contains(blocker_id) {
            return Ok(task);
        }
        let all = self.list_all().await?;
        if !all.iter().any(|t| &t.id == blocker_id) {
            return Err(AofError::NotFound(blocker_id.to_string()));
        }
        if would_create_cycle(&all, id, blocker_id) {
            return Err(AofError::InvariantViolation(format!(
                "adding dependency {blocker_id} -> {id} would create a circular dependency"
            )));
        }

        task.depends_on.push(blocker_id.clone());
        task.updated_at = Utc::now();
        self.write_in_place(&task).await?;
        self.events
            .append(
                Event::new(
                    EventType::TaskDepAdded,
                    "store",
                    json!({ "blocker": blocker_id.as_str() }),
                )
                .for_task(id.clone()),
            )
            .await?;
        Ok(task)
    }

    /// Removes a dependency edge. Idempotent.
    pub async fn remove_dep(&self, id: &TaskId, blocker_id: &TaskId) -> Result<Task, AofError> {
        let mut task = self
            .get(id)
            .await?
            .ok_or_else(|| AofError::NotFound(id.to_string()))?;
        if !task.depends_on.contains(blocker_id) {
            return Ok(task);
        }
        task.depends_on.retain(|d| d != blocker_id);
        task.updated_at = Utc::now();
        self.write_in_place(&task).await?;
        self.events
            .append(
                Event::new(
                    EventType::TaskDepRemoved,
                    "store",
                    json!({ "blocker": blocker_id.as_str() }),
                )
                .for_task(id.clone()),
            )
            .await?;
        Ok(task)
    }

    /// Sets status to `blocked`, stores `reason` in metadata. Rejected on
    /// terminal states.
    pub async fn block(&self, id: &TaskId, reason: String) -> Result<Task, AofError> {
        let current = self
            .get(id)
            .await?
            .ok_or_else(|| AofError::NotFound(id.to_string()))?;
        if current.status.is_terminal() {
            return Err(AofError::Terminal(id.to_string()));
        }
        let reason_for_metadata = reason.clone();
        let result = self
            .apply_transition(id, TaskStatus::Blocked, |task| {
                task.metadata
                    .insert("blockReason".to_string(), reason_for_metadata);
            })
            .await?;
        let task = match result {
            Some((_, task)) => task,
            None => current,
        };
        self.events
            .append(
                Event::new(EventType::TaskBlocked, "store", json!({ "reason": reason }))
                    .for_task(id.clone()),
            )
            .await?;
        Ok(task)
    }

    /// Returns a blocked task to `ready`, clearing `blockReason` and any
    /// stale lease.
    pub async fn unblock(&self, id: &TaskId) -> Result<Task, AofError> {
        let result = self
            .apply_transition(id, TaskStatus::Ready, |task| {
                task.metadata.remove("blockReason");
                task.lease = None;
            })
            .await?;
        let task = match result {
            Some((_, task)) => task,
            None => self.get(id).await?.ok_or_else(|| AofError::NotFound(id.to_string()))?,
        };
        self.events
            .append(Event::new(EventType::TaskUnblocked, "store", json!({})).for_task(id.clone()))
            .await?;
        Ok(task)
    }

    /// Terminal transition; reject if already terminal.
    pub async fn cancel(&self, id: &TaskId, reason: Option<String>) -> Result<Task, AofError> {
        let current = self
            .get(id)
            .await?
            .ok_or_else(|| AofError::NotFound(id.to_string()))?;
        if current.status.is_terminal() {
            return Err(AofError::Terminal(id.to_string()));
        }
        let reason_for_metadata = reason.clone();
        let (_, task) = self
            .apply_transition(id, TaskStatus::Cancelled, |task| {
                if let Some(reason) = reason_for_metadata {
                    task.metadata.insert("cancellationReason".to_string(), reason);
                }
            })
            .await?
            .expect("status differs, checked above");
        self.events
            .append(
                Event::new(
                    EventType::TaskCancelled,
                    "store",
                    json!({ "reason": reason }),
                )
                .for_task(id.clone()),
            )
            .await?;
        Ok(task)
    }

    /// Terminal transition to `done`; reject if already terminal.
    pub async fn close(&self, id: &TaskId) -> Result<Task, AofError> {
        let current = self
            .get(id)
            .await?
            .ok_or_else(|| AofError::NotFound(id.to_string()))?;
        if current.status.is_terminal() {
            return Err(AofError::Terminal(id.to_string()));
        }
        let (_, task) = self
            .apply_transition(id, TaskStatus::Done, |_| {})
            .await?
            .expect("status differs, checked above");
        self.events
            .append(Event::new(EventType::TaskCompleted, "store", json!({})).for_task(id.clone()))
            .await?;
        Ok(task)
    }

    /// The planner's `promote` action is advisory only; this is the single
    /// code path that actually mutates a `backlog` task to `ready`. See
    /// DESIGN.md.
    pub async fn promote(&self, id: &TaskId) -> Result<Task, AofError> {
        let (_, task) = self
            .apply_transition(id, TaskStatus::Ready, |_| {})
            .await?
            .ok_or_else(|| AofError::NotFound(id.to_string()))?;
        self.events
            .append(
                Event::new(EventType::TaskTransitioned, "store", json!({ "reason": "promote" }))
                    .for_task(id.clone()),
            )
            .await?;
        Ok(task)
    }

    /// Direct in-place persist used by the Gate Engine, which mutates
    /// `gate`/`gateHistory`/`reviewContext`/`routing.role` without a status
    /// change.
    pub async fn save(&self, task: &Task) -> Result<(), AofError> {
        self.write_in_place(task).await
    }
}

/// Depth-first search from `blocker_id` through the `dependsOn` graph; if
/// the walk reaches `id`, adding `blocker_id` as a dependency of `id` would
/// create a cycle.
fn would_create_cycle(all: &[Task], id: &TaskId, blocker_id: &TaskId) -> bool {
    let by_id: HashMap<&TaskId, &Task> = all.iter().map(|t| (&t.id, t)).collect();
    let mut visited = HashSet::new();
    let mut stack = vec![blocker_id.clone()];
    while let Some(current) = stack.pop() {
        if &current == id {
            return true;
        }
        if !visited.insert(current.clone()) {
            continue;
        }
        if let Some(task) = by_id.get(&current) {
            stack.extend(task.depends_on.iter().cloned());
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store() -> (TaskStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = TaskStore::new(dir.path(), "demo");
        store.init().await.unwrap();
        (store, dir)
    }

    #[tokio::test]
    async fn create_lists_and_gets() {
        let (store, _dir) = store().await;
        let task = store
            .create(CreateParams {
                title: "first".into(),
                body: "do the thing".into(),
                created_by: "tester".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(task.status, TaskStatus::Backlog);
        assert!(task.id.as_str().ends_with("-001"));

        let fetched = store.get(&task.id).await.unwrap().unwrap();
        assert_eq!(fetched.title, "first");

        let all = store.list(&ListFilter::default()).await.unwrap();
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn create_assigns_sequential_ids_same_day() {
        let (store, _dir) = store().await;
        for i in 0..3 {
            let task = store
                .create(CreateParams {
                    title: format!("t{i}"),
                    created_by: "tester".into(),
                    ..Default::default()
                })
                .await
                .unwrap();
            assert_eq!(task.id.seq(), Some(i + 1));
        }
    }

    #[tokio::test]
    async fn create_rejects_missing_dependency() {
        let (store, _dir) = store().await;
        let bogus: TaskId = "TASK-2020-01-01-999".parse().unwrap();
        let err = store
            .create(CreateParams {
                title: "t".into(),
                created_by: "tester".into(),
                depends_on: vec![bogus],
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AofError::InvariantViolation(_)));
    }

    #[tokio::test]
    async fn transition_moves_between_directories() {
        let (store, _dir) = store().await;
        let task = store
            .create(CreateParams {
                title: "t".into(),
                created_by: "tester".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        let updated = store
            .transition(&task.id, TaskStatus::Ready, TransitionOpts::default())
            .await
            .unwrap();
        assert_eq!(updated.status, TaskStatus::Ready);
        assert!(!store
            .layout
            .record_path(TaskStatus::Backlog, &task.id)
            .exists());
        assert!(store
            .layout
            .record_path(TaskStatus::Ready, &task.id)
            .exists());
    }

    #[tokio::test]
    async fn transition_is_idempotent_noop() {
        let (store, _dir) = store().await;
        let task = store
            .create(CreateParams {
                title: "t".into(),
                created_by: "tester".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        let again = store
            .transition(&task.id, TaskStatus::Backlog, TransitionOpts::default())
            .await
            .unwrap();
        assert_eq!(again, task);
    }

    #[tokio::test]
    async fn transition_rejects_invalid_matrix_entry() {
        let (store, _dir) = store().await;
        let task = store
            .create(CreateParams {
                title: "t".into(),
                created_by: "tester".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        let err = store
            .transition(&task.id, TaskStatus::Done, TransitionOpts::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AofError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn dependency_cycle_is_rejected() {
        let (store, _dir) = store().await;
        let t1 = store
            .create(CreateParams {
                title: "t1".into(),
                created_by: "tester".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        let t2 = store
            .create(CreateParams {
                title: "t2".into(),
                created_by: "tester".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        let t3 = store
            .create(CreateParams {
                title: "t3".into(),
                created_by: "tester".into(),
                ..Default::default()
            })
            .await
            .unwrap();

        store.add_dep(&t1.id, &t2.id).await.unwrap();
        store.add_dep(&t2.id, &t3.id).await.unwrap();

        let err = store.add_dep(&t3.id, &t1.id).await.unwrap_err();
        assert!(matches!(err, AofError::InvariantViolation(ref msg) if msg.contains("circular")));

        let t3_after = store.get(&t3.id).await.unwrap().unwrap();
        assert!(t3_after.depends_on.is_empty());
    }

    #[tokio::test]
    async fn block_and_unblock_round_trip() {
        let (store, _dir) = store().await;
        let task = store
            .create(CreateParams {
                title: "t".into(),
                created_by: "tester".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        store
            .transition(&task.id, TaskStatus::Ready, TransitionOpts::default())
            .await
            .unwrap();
        let blocked = store.block(&task.id, "waiting on X".into()).await.unwrap();
        assert_eq!(blocked.status, TaskStatus::Blocked);
        assert_eq!(
            blocked.metadata.get("blockReason"),
            Some(&"waiting on X".to_string())
        );

        let unblocked = store.unblock(&task.id).await.unwrap();
        assert_eq!(unblocked.status, TaskStatus::Ready);
        assert!(!unblocked.metadata.contains_key("blockReason"));
    }

    #[tokio::test]
    async fn cancel_and_close_reject_terminal() {
        let (store, _dir) = store().await;
        let task = store
            .create(CreateParams {
                title: "t".into(),
                created_by: "tester".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        let cancelled = store.cancel(&task.id, Some("not needed".into())).await.unwrap();
        assert_eq!(cancelled.status, TaskStatus::Cancelled);
        let err = store.cancel(&task.id, None).await.unwrap_err();
        assert!(matches!(err, AofError::Terminal(_)));
    }

    #[tokio::test]
    async fn lint_reports_hash_mismatch() {
        let (store, _dir) = store().await;
        let task = store
            .create(CreateParams {
                title: "t".into(),
                body: "original".into(),
                created_by: "tester".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        let path = store.layout.record_path(TaskStatus::Backlog, &task.id);
        let content = tokio::fs::read_to_string(&path).await.unwrap();
        let tampered = content.replace("original", "tampered out of band");
        tokio::fs::write(&path, tampered).await.unwrap();

        let issues = store.lint().await.unwrap();
        assert!(issues.iter().any(|i| i.issue.contains("contentHash")));
    }
}
