//! Complete step: publish a node's outputs and announce its completion.

use bytes::Bytes;
use flowlink_core::artifact::ArtifactStore;
use flowlink_core::bus::{CompletionBus, CompletionMessage};
use flowlink_core::{ArtifactLocation, Error, Result, WorkflowId, naming};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::{StepLog, WorkArea};

/// Arguments of the complete step: `ARTIFACTS WORKFLOW_ID NODE`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompleteArgs {
    /// Where this node's outputs are uploaded to.
    pub artifacts: ArtifactLocation,
    pub workflow_id: WorkflowId,
    pub node: String,
}

impl CompleteArgs {
    pub fn to_args(&self) -> Vec<String> {
        vec![
            self.artifacts.to_string(),
            self.workflow_id.to_string(),
            self.node.clone(),
        ]
    }

    pub fn from_args(args: &[String]) -> Result<Self> {
        let [artifacts, workflow_id, node] = args else {
            return Err(Error::InvalidInput(
                "usage: complete ARTIFACTS WORKFLOW_ID NODE".to_string(),
            ));
        };
        Ok(Self {
            artifacts: ArtifactLocation::parse(artifacts)?,
            workflow_id: WorkflowId::new(workflow_id.as_str()),
            node: node.clone(),
        })
    }
}

/// Runs the complete step at the end of a node's job.
pub struct CompletionSignaler {
    bus: Arc<dyn CompletionBus>,
    store: Arc<dyn ArtifactStore>,
    work_area: WorkArea,
    project_id: String,
    log: StepLog,
}

impl CompletionSignaler {
    pub fn new(
        bus: Arc<dyn CompletionBus>,
        store: Arc<dyn ArtifactStore>,
        work_area: WorkArea,
        project_id: impl Into<String>,
    ) -> Self {
        Self {
            bus,
            store,
            work_area,
            project_id: project_id.into(),
            log: StepLog::new(),
        }
    }

    pub fn with_log(mut self, log: StepLog) -> Self {
        self.log = log;
        self
    }

    /// Upload the node's outputs, then publish exactly one completion
    /// message to the workflow topic. Returns the published message ID.
    pub async fn run(&self, args: &CompleteArgs) -> Result<String> {
        let uploaded = self.upload_outputs(&args.artifacts).await?;

        let topic = naming::topic_name(&self.project_id, &args.workflow_id);
        let message = CompletionMessage::new(&args.node, args.artifacts.to_string());
        let data = message.encode()?;

        let message_id = self.bus.publish(&topic, data).await.map_err(|e| {
            Error::Bus(format!(
                "could not publish completion of {:?}: {}",
                args.node, e
            ))
        })?;

        info!(
            node = %args.node,
            topic = %topic,
            message_id = %message_id,
            uploaded,
            "Published completion"
        );
        self.log
            .emit(format!("Published completion of {} ({})", args.node, message_id));
        Ok(message_id)
    }

    /// Upload every file under the output directory beneath `target`.
    /// A missing output directory uploads nothing.
    pub async fn upload_outputs(&self, target: &ArtifactLocation) -> Result<usize> {
        let out = self.work_area.output_dir();
        let files = tokio::task::spawn_blocking(move || collect_files(&out))
            .await
            .map_err(|e| Error::Internal(e.to_string()))??;

        for (path, relative) in &files {
            let data = tokio::fs::read(path).await.map_err(|e| {
                Error::Relay(format!("could not read output {}: {}", path.display(), e))
            })?;
            let key = format!("{}{}", target.dir_prefix(), relative);
            self.store
                .write_object(&target.bucket, &key, Bytes::from(data))
                .await
                .map_err(|e| Error::Relay(format!("could not upload {:?}: {}", key, e)))?;
            debug!(key = %key, "Uploaded artifact");
            self.log.emit(format!("Uploaded {} to {}", relative, key));
        }

        Ok(files.len())
    }
}

/// Files under `root` paired with their `/`-separated relative paths.
fn collect_files(root: &Path) -> Result<Vec<(PathBuf, String)>> {
    if !root.is_dir() {
        return Ok(Vec::new());
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(|e| Error::Relay(format!("could not walk outputs: {}", e)))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(root)
            .map_err(|e| Error::Internal(e.to_string()))?
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        files.push((entry.path().to_path_buf(), relative));
    }
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MapStore, ScriptedBus};
    use flowlink_core::bus::decode_payload;

    fn complete_args() -> CompleteArgs {
        CompleteArgs {
            artifacts: ArtifactLocation::new("bucket", "wf/build"),
            workflow_id: WorkflowId::new("wf"),
            node: "build".to_string(),
        }
    }

    #[test]
    fn test_args_round_trip() {
        let rendered = complete_args().to_args();
        assert_eq!(rendered, vec!["artifacts://bucket/wf/build", "wf", "build"]);
        assert_eq!(CompleteArgs::from_args(&rendered).unwrap(), complete_args());
        assert!(CompleteArgs::from_args(&rendered[..2]).is_err());
    }

    #[tokio::test]
    async fn test_publishes_one_completion_to_workflow_topic() {
        let bus = Arc::new(ScriptedBus::default());
        let dir = tempfile::tempdir().unwrap();
        let signaler = CompletionSignaler::new(
            bus.clone(),
            Arc::new(MapStore::default()),
            WorkArea::new(dir.path()),
            "proj",
        );

        signaler.run(&complete_args()).await.unwrap();

        let published = bus.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].0, "projects/proj/topics/workflow-wf");
        assert_eq!(
            decode_payload(&published[0].1).unwrap(),
            r#"{"completed":"build","artifacts":"artifacts://bucket/wf/build"}"#
        );
    }

    #[tokio::test]
    async fn test_uploads_outputs_before_publishing() {
        let store = Arc::new(MapStore::default());
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("out/bin")).unwrap();
        std::fs::write(dir.path().join("out/report.txt"), "green").unwrap();
        std::fs::write(dir.path().join("out/bin/app"), "elf").unwrap();

        let signaler = CompletionSignaler::new(
            Arc::new(ScriptedBus::default()),
            store.clone(),
            WorkArea::new(dir.path()),
            "proj",
        );
        let uploaded = signaler.upload_outputs(&complete_args().artifacts).await.unwrap();

        assert_eq!(uploaded, 2);
        assert_eq!(
            store.get("bucket", "wf/build/report.txt").unwrap(),
            Bytes::from("green")
        );
        assert_eq!(
            store.get("bucket", "wf/build/bin/app").unwrap(),
            Bytes::from("elf")
        );
    }

    #[tokio::test]
    async fn test_publish_failure_is_fatal() {
        let bus = Arc::new(ScriptedBus {
            fail_publish: true,
            ..Default::default()
        });
        let dir = tempfile::tempdir().unwrap();
        let signaler = CompletionSignaler::new(
            bus,
            Arc::new(MapStore::default()),
            WorkArea::new(dir.path()),
            "proj",
        );

        let err = signaler.run(&complete_args()).await.unwrap_err();
        assert!(matches!(err, Error::Bus(_)));
    }
}
