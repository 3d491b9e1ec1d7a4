//! Dependency Analyzer: a pure function over the in-memory task set.
//! Computed once per scheduler tick; nothing here touches disk or keeps
//! state across calls.

use std::collections::{HashMap, HashSet};

use crate::model::{Task, TaskId, TaskStatus};

#[derive(Debug, Clone, Default)]
pub struct Analysis {
    pub children_by_parent: HashMap<TaskId, Vec<TaskId>>,
    pub blocked_by_subtasks: HashSet<TaskId>,
    pub circular_deps: HashSet<TaskId>,
    pub in_progress_by_team: HashMap<String, u32>,
    pub occupied_resources: HashMap<String, TaskId>,
}

pub fn build(tasks: &[Task]) -> Analysis {
    let mut children_by_parent: HashMap<TaskId, Vec<TaskId>> = HashMap::new();
    let mut in_progress_by_team: HashMap<String, u32> = HashMap::new();
    let mut occupied_resources: HashMap<String, TaskId> = HashMap::new();
    let by_id: HashMap<&TaskId, &Task> = tasks.iter().map(|t| (&t.id, t)).collect();

    for task in tasks {
        if let Some(parent) = &task.parent_id {
            children_by_parent
                .entry(parent.clone())
                .or_default()
                .push(task.id.clone());
        }
        if task.status == TaskStatus::InProgress {
            if let Some(team) = &task.team {
                *in_progress_by_team.entry(team.clone()).or_insert(0) += 1;
            }
        }
        if !task.status.is_terminal() {
            if let Some(resource) = &task.resource {
                occupied_resources
                    .entry(resource.clone())
                    .or_insert_with(|| task.id.clone());
            }
        }
    }

    let blocked_by_subtasks = children_by_parent
        .iter()
        .filter(|(_, children)| {
            children.iter().any(|child| {
                by_id
                    .get(child)
                    .map(|c| c.status != TaskStatus::Done)
                    .unwrap_or(false)
            })
        })
        .map(|(parent, _)| parent.clone())
        .collect();

    Analysis {
        children_by_parent,
        blocked_by_subtasks,
        circular_deps: circular_deps(tasks),
        in_progress_by_team,
        occupied_resources,
    }
}

/// Three-colour depth-first search over the `dependsOn` graph (white =
/// unvisited, grey = on the current path, black = fully explored). When the
/// walk reaches a grey node, every id on the path from that node to the top
/// of the stack participates in a cycle.
fn circular_deps(tasks: &[Task]) -> HashSet<TaskId> {
    #[derive(Clone, Copy, PartialEq)]
    enum Color {
        White,
        Grey,
        Black,
    }

    let adjacency: HashMap<&TaskId, &[TaskId]> = tasks
        .iter()
        .map(|t| (&t.id, t.depends_on.as_slice()))
        .collect();
    let mut color: HashMap<TaskId, Color> = tasks.iter().map(|t| (t.id.clone(), Color::White)).collect();
    let mut path: Vec<TaskId> = Vec::new();
    let mut cyclic = HashSet::new();

    fn visit(
        node: &TaskId,
        adjacency: &HashMap<&TaskId, &[TaskId]>,
        color: &mut HashMap<TaskId, Color>,
        path: &mut Vec<TaskId>,
        cyclic: &mut HashSet<TaskId>,
    ) {
        color.insert(node.clone(), Color::Grey);
        path.push(node.clone());
        if let Some(deps) = adjacency.get(node) {
            for dep in deps.iter() {
                match color.get(dep).copied() {
                    Some(Color::White) | None => visit(dep, adjacency, color, path, cyclic),
                    Some(Color::Grey) => {
                        if let Some(start) = path.iter().position(|n| n == dep) {
                            cyclic.extend(path[start..].iter().cloned());
                        }
                    }
                    Some(Color::Black) => {}
                }
            }
        }
        path.pop();
        color.insert(node.clone(), Color::Black);
    }

    for task in tasks {
        if color.get(&task.id).copied() == Some(Color::White) {
            visit(&task.id, &adjacency, &mut color, &mut path, &mut cyclic);
        }
    }
    cyclic
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Priority;
    use chrono::Utc;

    fn task(id: &str, parent: Option<&str>, status: TaskStatus, depends_on: Vec<&str>) -> Task {
        let now = Utc::now();
        Task {
            id: id.parse().unwrap(),
            project: "demo".into(),
            schema_version: 1,
            title: id.into(),
            body: String::new(),
            priority: Priority::Normal,
            tags: Default::default(),
            status,
            agent: None,
            role: None,
            team: None,
            workflow: None,
            lease: None,
            parent_id: parent.map(|p| p.parse().unwrap()),
            depends_on: depends_on.into_iter().map(|d| d.parse().unwrap()).collect(),
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

    #[test]
    fn detects_subtask_blocked_parent() {
        let parent = task("TASK-2026-07-31-001", None, TaskStatus::Ready, vec![]);
        let child = task("TASK-2026-07-31-002", Some("TASK-2026-07-31-001"), TaskStatus::InProgress, vec![]);
        let analysis = build(&[parent.clone(), child]);
        assert!(analysis.blocked_by_subtasks.contains(&parent.id));
    }

    #[test]
    fn detects_cycle() {
        let t1 = task("TASK-2026-07-31-001", None, TaskStatus::Ready, vec!["TASK-2026-07-31-002"]);
        let t2 = task("TASK-2026-07-31-002", None, TaskStatus::Ready, vec!["TASK-2026-07-31-003"]);
        let t3 = task("TASK-2026-07-31-003", None, TaskStatus::Ready, vec!["TASK-2026-07-31-001"]);
        let analysis = build(&[t1.clone(), t2.clone(), t3.clone()]);
        assert!(analysis.circular_deps.contains(&t1.id));
        assert!(analysis.circular_deps.contains(&t2.id));
        assert!(analysis.circular_deps.contains(&t3.id));
    }

    #[test]
    fn no_false_positive_cycle_on_dag() {
        let t1 = task("TASK-2026-07-31-001", None, TaskStatus::Ready, vec!["TASK-2026-07-31-002"]);
        let t2 = task("TASK-2026-07-31-002", None, TaskStatus::Ready, vec![]);
        let analysis = build(&[t1, t2]);
        assert!(analysis.circular_deps.is_empty());
    }

    #[test]
    fn counts_in_progress_by_team_and_occupied_resources() {
        let mut t1 = task("TASK-2026-07-31-001", None, TaskStatus::InProgress, vec![]);
        t1.team = Some("backend".into());
        t1.resource = Some("db-migration-lock".into());
        let analysis = build(&[t1.clone()]);
        assert_eq!(analysis.in_progress_by_team.get("backend"), Some(&1));
        assert_eq!(analysis.occupied_resources.get("db-migration-lock"), Some(&t1.id));
    }
}
