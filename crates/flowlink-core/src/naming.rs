//! Naming conventions for workflow resources.
//!
//! The orchestrator and the steps embedded in node jobs never talk to each
//! other directly, so both sides derive topic, subscription and artifact
//! names from the project and workflow IDs with these functions.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{Error, Result, WorkflowId};

/// URI scheme for artifact locations.
pub const ARTIFACT_SCHEME: &str = "artifacts://";

/// Log line the bootstrap job prints once the workflow topic exists.
pub const TOPIC_CREATED_MARKER: &str = "Created topic";

pub fn topic_name(project_id: &str, workflow_id: &WorkflowId) -> String {
    format!("projects/{}/topics/workflow-{}", project_id, workflow_id)
}

/// Subscription for the node at `index` in the workflow spec.
pub fn subscription_name(project_id: &str, workflow_id: &WorkflowId, index: usize) -> String {
    format!(
        "projects/{}/subscriptions/workflow-{}-{}",
        project_id, workflow_id, index
    )
}

/// Subscription the bootstrap job tails for its own log.
pub fn coord_subscription_name(project_id: &str, workflow_id: &WorkflowId) -> String {
    format!("projects/{}/subscriptions/coord-{}", project_id, workflow_id)
}

pub fn artifact_bucket(project_id: &str) -> String {
    format!("{}_workflow_artifacts", project_id)
}

/// A bucket plus key prefix, rendered as `artifacts://bucket/key`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArtifactLocation {
    pub bucket: String,
    pub key: String,
}

impl ArtifactLocation {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }

    /// Root location for all artifacts of one workflow run.
    pub fn for_workflow(project_id: &str, workflow_id: &WorkflowId) -> Self {
        Self::new(artifact_bucket(project_id), workflow_id.as_str())
    }

    pub fn parse(location: &str) -> Result<Self> {
        let invalid = || Error::InvalidInput(format!("invalid artifact location {:?}", location));
        let rest = location.strip_prefix(ARTIFACT_SCHEME).ok_or_else(invalid)?;
        let (bucket, key) = rest.split_once('/').ok_or_else(invalid)?;
        if bucket.is_empty() || key.is_empty() {
            return Err(invalid());
        }
        Ok(Self::new(bucket, key.trim_end_matches('/')))
    }

    pub fn join(&self, segment: &str) -> Self {
        Self::new(
            self.bucket.clone(),
            format!("{}/{}", self.key, segment.trim_matches('/')),
        )
    }

    /// Key prefix that matches only objects strictly beneath this location.
    pub fn dir_prefix(&self) -> String {
        format!("{}/", self.key)
    }
}

impl fmt::Display for ArtifactLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}/{}", ARTIFACT_SCHEME, self.bucket, self.key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_names() {
        let id = WorkflowId::new("abc");
        assert_eq!(topic_name("proj", &id), "projects/proj/topics/workflow-abc");
        assert_eq!(
            subscription_name("proj", &id, 3),
            "projects/proj/subscriptions/workflow-abc-3"
        );
        assert_eq!(
            coord_subscription_name("proj", &id),
            "projects/proj/subscriptions/coord-abc"
        );
        assert_eq!(artifact_bucket("proj"), "proj_workflow_artifacts");
    }

    #[test]
    fn test_location_display_and_parse() {
        let loc = ArtifactLocation::for_workflow("proj", &WorkflowId::new("abc"));
        let rendered = loc.to_string();
        assert_eq!(rendered, "artifacts://proj_workflow_artifacts/abc");
        assert_eq!(ArtifactLocation::parse(&rendered).unwrap(), loc);
    }

    #[test]
    fn test_location_join() {
        let loc = ArtifactLocation::new("bucket", "wf").join("build");
        assert_eq!(loc.key, "wf/build");
        assert_eq!(loc.dir_prefix(), "wf/build/");
    }

    #[test]
    fn test_invalid_locations() {
        assert!(ArtifactLocation::parse("gs://bucket/key").is_err());
        assert!(ArtifactLocation::parse("artifacts://bucket").is_err());
        assert!(ArtifactLocation::parse("artifacts:///key").is_err());
        assert!(matches!(
            ArtifactLocation::parse("bucket/key"),
            Err(Error::InvalidInput(_))
        ));
    }
}
