//! Parsing and serialization of the on-disk task record format: a YAML
//! frontmatter header fenced by `---` lines, followed by free-text body.

use crate::error::AofError;
use crate::model::Task;

const FENCE: &str = "---";

/// Splits a record file's raw contents into its YAML header and body text.
fn split_frontmatter(content: &str) -> Result<(&str, &str), AofError> {
    let mut lines = content.splitn(2, '\n');
    let first = lines.next().unwrap_or("");
    if first.trim_end() != FENCE {
        return Err(AofError::Parse {
            path: String::new(),
            message: "record does not start with a `---` frontmatter fence".into(),
        });
    }
    let rest = lines.next().unwrap_or("");
    let end = rest.find("\n---\n").or_else(|| {
        // Allow a record whose body is empty and whose closing fence is the
        // final line with no trailing newline.
        if rest.trim_end() == FENCE {
            Some(rest.trim_end().len())
        } else {
            None
        }
    });
    let end = end.ok_or_else(|| AofError::Parse {
        path: String::new(),
        message: "record is missing its closing `---` frontmatter fence".into(),
    })?;
    let header = &rest[..end];
    let body_start = (end + "\n---\n".len()).min(rest.len());
    let body = rest.get(body_start..).unwrap_or("");
    Ok((header, body))
}

/// Parses a full record file into a [`Task`]. Unknown frontmatter keys are
/// preserved verbatim in `Task::metadata`; `contentHash` is not recomputed
/// here — callers that need to detect out-of-band body edits compare
/// against `Task::hash_matches`.
pub fn parse(content: &str, path_hint: &str) -> Result<Task, AofError> {
    let (header, body) = split_frontmatter(content).map_err(|e| match e {
        AofError::Parse { message, .. } => AofError::Parse {
            path: path_hint.to_string(),
            message,
        },
        other => other,
    })?;
    let mut task: Task = serde_yaml::from_str(header).map_err(|e| AofError::Parse {
        path: path_hint.to_string(),
        message: e.to_string(),
    })?;
    task.body = body.to_string();
    Ok(task)
}

/// Serializes a [`Task`] back into the on-disk record format. The body is
/// written verbatim after the closing fence.
pub fn serialize(task: &Task) -> Result<String, AofError> {
    let header = serde_yaml::to_string(task)?;
    let mut out = String::with_capacity(header.len() + task.body.len() + 16);
    out.push_str(FENCE);
    out.push('\n');
    out.push_str(&header);
    out.push_str(FENCE);
    out.push('\n');
    out.push_str(&task.body);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Priority, TaskStatus};
    use chrono::Utc;

    fn sample() -> Task {
        let now = Utc::now();
        Task {
            id: "TASK-2026-07-31-001".parse().unwrap(),
            project: "demo".into(),
            schema_version: 1,
            title: "Write docs".into(),
            body: "Explain the frontmatter format.\n".into(),
            priority: Priority::Normal,
            tags: Default::default(),
            status: TaskStatus::Backlog,
            agent: None,
            role: None,
            team: None,
            workflow: None,
            lease: None,
            parent_id: None,
            depends_on: vec![],
            created_at: now,
            updated_at: now,
            last_transition_at: now,
            content_hash: Task::hash_body("Explain the frontmatter format.\n"),
            gate: None,
            gate_history: vec![],
            review_context: None,
            sla: None,
            resource: None,
            metadata: Default::default(),
        }
    }

    #[test]
    fn round_trips_through_serialize_and_parse() {
        let task = sample();
        let text = serialize(&task).unwrap();
        assert!(text.starts_with("---\n"));
        let parsed = parse(&text, "test").unwrap();
        assert_eq!(parsed.id, task.id);
        assert_eq!(parsed.title, task.title);
        assert_eq!(parsed.body, task.body);
        assert!(parsed.hash_matches());
    }

    #[test]
    fn preserves_unknown_metadata_keys() {
        let mut task = sample();
        task.metadata
            .insert("retryCount".to_string(), "2".to_string());
        let text = serialize(&task).unwrap();
        let parsed = parse(&text, "test").unwrap();
        assert_eq!(parsed.metadata.get("retryCount"), Some(&"2".to_string()));
    }

    #[test]
    fn rejects_missing_fence() {
        let err = parse("no frontmatter here", "test").unwrap_err();
        assert!(matches!(err, AofError::Parse { .. }));
    }
}
