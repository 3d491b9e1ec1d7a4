//! Project Manifest Loader: reads `project.yaml` into a validated
//! [`ProjectManifest`], eagerly checking the things a malformed workflow
//! definition would otherwise only surface as a confusing runtime error
//! deep inside the Gate Engine.

use std::collections::HashSet;
use std::path::Path;

use crate::error::AofError;
use crate::model::{GatePredicate, ProjectManifest};

pub struct ManifestLoader;

impl ManifestLoader {
    /// Reads and validates the manifest at `path`. Returns `Ok(None)` when
    /// no manifest file is present — workflows are opt-in per project.
    pub async fn load(path: &Path) -> Result<Option<ProjectManifest>, AofError> {
        let content = match tokio::fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let manifest: ProjectManifest = serde_yaml::from_str(&content).map_err(AofError::Yaml)?;
        validate(&manifest)?;
        Ok(Some(manifest))
    }
}

fn validate(manifest: &ProjectManifest) -> Result<(), AofError> {
    let Some(workflow) = &manifest.workflow else {
        return Ok(());
    };
    if workflow.gates.is_empty() {
        return Err(AofError::Manifest("workflow defines no gates".into()));
    }

    let mut seen = HashSet::new();
    for gate in &workflow.gates {
        if !seen.insert(gate.id.as_str()) {
            return Err(AofError::Manifest(format!("duplicate gate id: {}", gate.id)));
        }
    }
    let ids: HashSet<&str> = workflow.gates.iter().map(|g| g.id.as_str()).collect();
    for gate in &workflow.gates {
        if let Some(escalate_to) = &gate.escalate_to {
            if escalate_to.trim().is_empty() {
                return Err(AofError::Manifest(format!(
                    "gate {} has an empty escalateTo",
                    gate.id
                )));
            }
            if !ids.contains(escalate_to.as_str()) {
                return Err(AofError::Manifest(format!(
                    "gate {} escalates to unknown gate `{escalate_to}`",
                    gate.id
                )));
            }
        }
        if let Some(predicate) = &gate.when {
            validate_predicate(&gate.id, predicate)?;
        }
    }
    Ok(())
}

const KNOWN_ROUTING_FIELDS: [&str; 4] = ["agent", "role", "team", "workflow"];

fn validate_predicate(gate_id: &str, predicate: &GatePredicate) -> Result<(), AofError> {
    match predicate {
        GatePredicate::Tag { tag } => {
            if tag.trim().is_empty() {
                return Err(AofError::Manifest(format!(
                    "gate {gate_id} has a `when` tag predicate with an empty tag"
                )));
            }
            Ok(())
        }
        GatePredicate::RoutingEq { field, .. } => {
            if !KNOWN_ROUTING_FIELDS.contains(&field.as_str()) {
                return Err(AofError::Manifest(format!(
                    "gate {gate_id} references unknown routing field `{field}` in `when`"
                )));
            }
            Ok(())
        }
        GatePredicate::And { all } => all.iter().try_for_each(|p| validate_predicate(gate_id, p)),
        GatePredicate::Or { any } => any.iter().try_for_each(|p| validate_predicate(gate_id, p)),
        GatePredicate::Not { not } => validate_predicate(gate_id, not),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn write(dir: &tempfile::TempDir, content: &str) -> std::path::PathBuf {
        let path = dir.path().join("project.yaml");
        tokio::fs::write(&path, content).await.unwrap();
        path
    }

    #[tokio::test]
    async fn missing_manifest_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = ManifestLoader::load(&dir.path().join("project.yaml")).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn loads_valid_manifest_with_workflow() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            &dir,
            r#"
id: demo
title: Demo project
status: active
type: feature
owner: alice
participants: [agent-a, agent-b]
workflow:
  name: standard
  rejectionStrategy: origin
  gates:
    - id: implement
      role: backend
    - id: review
      role: architect
      canReject: true
      when:
        op: tag
        tag: needs-review
"#,
        )
        .await;
        let manifest = ManifestLoader::load(&path).await.unwrap().unwrap();
        assert_eq!(manifest.id, "demo");
        assert_eq!(manifest.workflow.unwrap().gates.len(), 2);
    }

    #[tokio::test]
    async fn rejects_duplicate_gate_ids() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            &dir,
            r#"
id: demo
title: Demo
status: active
type: feature
owner: alice
workflow:
  name: standard
  rejectionStrategy: origin
  gates:
    - id: implement
      role: backend
    - id: implement
      role: architect
"#,
        )
        .await;
        let err = ManifestLoader::load(&path).await.unwrap_err();
        assert!(matches!(err, AofError::Manifest(_)));
    }

    #[tokio::test]
    async fn rejects_escalate_to_unknown_gate() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            &dir,
            r#"
id: demo
title: Demo
status: active
type: feature
owner: alice
workflow:
  name: standard
  rejectionStrategy: origin
  gates:
    - id: implement
      role: backend
      escalateTo: nonexistent
"#,
        )
        .await;
        let err = ManifestLoader::load(&path).await.unwrap_err();
        assert!(matches!(err, AofError::Manifest(_)));
    }

    #[tokio::test]
    async fn rejects_unknown_routing_field_in_predicate() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            &dir,
            r#"
id: demo
title: Demo
status: active
type: feature
owner: alice
workflow:
  name: standard
  rejectionStrategy: origin
  gates:
    - id: implement
      role: backend
      when:
        op: routing_eq
        field: nonsense
        value: x
"#,
        )
        .await;
        let err = ManifestLoader::load(&path).await.unwrap_err();
        assert!(matches!(err, AofError::Manifest(_)));
    }
}
