use serde::{Deserialize, Serialize};

use super::gate::WorkflowDefinition;

/// Default routing applied to tasks created without explicit routing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoutingDefaults {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team: Option<String>,
}

/// The per-project document defining workflow, participants, and routing
/// defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectManifest {
    pub id: String,
    pub title: String,
    pub status: String,
    #[serde(rename = "type")]
    pub project_type: String,
    pub owner: String,
    #[serde(default)]
    pub participants: Vec<String>,
    #[serde(default)]
    pub routing: RoutingDefaults,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow: Option<WorkflowDefinition>,
}

impl ProjectManifest {
    /// If the manifest enumerates `participants` non-empty, the target
    /// agent must be in the list.
    pub fn participant_allowed(&self, agent: &str) -> bool {
        self.participants.is_empty() || self.participants.iter().any(|p| p == agent)
    }
}
