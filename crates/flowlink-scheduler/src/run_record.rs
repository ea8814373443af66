//! Persisted record of a workflow run.
//!
//! The orchestrator writes the record next to the run's artifacts so that a
//! crashed or restarted operator can see what was provisioned and which node
//! jobs were in flight.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use flowlink_core::artifact::ArtifactStore;
use flowlink_core::job::JobHandle;
use flowlink_core::workflow::{WorkflowRun, WorkflowSpec};
use flowlink_core::{ArtifactLocation, Error, JobRunId, Result, WorkflowId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Key of the record beneath a workflow's artifact prefix.
pub const RUN_RECORD_KEY: &str = ".flowlink/run.json";

/// Launch state of one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum LaunchStatus {
    Pending,
    Submitted { run_id: JobRunId },
    Failed { message: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeLaunch {
    pub name: String,
    pub subscription: String,
    pub status: LaunchStatus,
}

impl NodeLaunch {
    pub fn run_id(&self) -> Option<&JobRunId> {
        match &self.status {
            LaunchStatus::Submitted { run_id } => Some(run_id),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRecord {
    pub project_id: String,
    pub run: WorkflowRun,
    /// Run ID of the bootstrap job.
    pub bootstrap: JobHandle,
    pub spec: WorkflowSpec,
    /// One entry per node, in spec order.
    pub nodes: Vec<NodeLaunch>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RunRecord {
    pub fn new(
        project_id: impl Into<String>,
        run: WorkflowRun,
        bootstrap: JobHandle,
        spec: WorkflowSpec,
        subscriptions: Vec<String>,
    ) -> Self {
        let nodes = spec
            .nodes
            .iter()
            .zip(subscriptions)
            .map(|(node, subscription)| NodeLaunch {
                name: node.name.clone(),
                subscription,
                status: LaunchStatus::Pending,
            })
            .collect();
        let now = Utc::now();
        Self {
            project_id: project_id.into(),
            run,
            bootstrap,
            spec,
            nodes,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn workflow_id(&self) -> &WorkflowId {
        &self.run.workflow_id
    }

    pub fn node(&self, name: &str) -> Option<&NodeLaunch> {
        self.nodes.iter().find(|n| n.name == name)
    }

    pub fn set_status(&mut self, index: usize, status: LaunchStatus) {
        if let Some(node) = self.nodes.get_mut(index) {
            node.status = status;
            self.updated_at = Utc::now();
        }
    }

    /// Nodes whose job was accepted by the job service.
    pub fn submitted(&self) -> impl Iterator<Item = (&str, &JobRunId)> {
        self.nodes
            .iter()
            .filter_map(|n| n.run_id().map(|id| (n.name.as_str(), id)))
    }

    pub fn failed(&self) -> impl Iterator<Item = &NodeLaunch> {
        self.nodes
            .iter()
            .filter(|n| matches!(n.status, LaunchStatus::Failed { .. }))
    }
}

/// Reads and writes run records in the artifact store.
#[derive(Clone)]
pub struct RunRecordStore {
    store: Arc<dyn ArtifactStore>,
}

impl RunRecordStore {
    pub fn new(store: Arc<dyn ArtifactStore>) -> Self {
        Self { store }
    }

    fn location(prefix: &ArtifactLocation) -> ArtifactLocation {
        prefix.join(RUN_RECORD_KEY)
    }

    pub async fn save(&self, record: &RunRecord) -> Result<()> {
        let location = Self::location(&record.run.artifact_prefix);
        let data =
            serde_json::to_vec_pretty(record).map_err(|e| Error::Internal(e.to_string()))?;
        self.store
            .write_object(&location.bucket, &location.key, Bytes::from(data))
            .await?;
        debug!(location = %location, "Saved run record");
        Ok(())
    }

    pub async fn load(&self, project_id: &str, workflow_id: &WorkflowId) -> Result<RunRecord> {
        let location = Self::location(&ArtifactLocation::for_workflow(project_id, workflow_id));
        let data = self
            .store
            .read_object(&location.bucket, &location.key)
            .await?;
        serde_json::from_slice(&data)
            .map_err(|e| Error::Decode(format!("run record {}: {}", location, e)))
    }
}
