//! Bootstrap step: create the workflow topic and echo its traffic.
//!
//! The orchestrator launches this as a job of its own. The run ID of that
//! job becomes the workflow ID, and the orchestrator watches the job's log
//! for [`naming::TOPIC_CREATED_MARKER`] before launching any node.

use flowlink_core::bus::{CompletionBus, decode_payload};
use flowlink_core::{Error, Result, WorkflowId, naming};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::StepLog;

/// Arguments of the bootstrap step: `WORKFLOW_ID`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordArgs {
    pub workflow_id: WorkflowId,
}

impl CoordArgs {
    pub fn from_args(args: &[String]) -> Result<Self> {
        match args {
            [workflow_id] => Ok(Self {
                workflow_id: WorkflowId::new(workflow_id.as_str()),
            }),
            _ => Err(Error::InvalidInput("usage: coord WORKFLOW_ID".to_string())),
        }
    }
}

pub struct Coordinator {
    bus: Arc<dyn CompletionBus>,
    project_id: String,
    interval: Duration,
    log: StepLog,
}

impl Coordinator {
    pub fn new(bus: Arc<dyn CompletionBus>, project_id: impl Into<String>) -> Self {
        Self {
            bus,
            project_id: project_id.into(),
            interval: Duration::from_secs(1),
            log: StepLog::new(),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_log(mut self, log: StepLog) -> Self {
        self.log = log;
        self
    }

    /// Create the topic and a subscription of our own, then print every
    /// message published to the topic until `cancel` fires.
    pub async fn run(&self, args: &CoordArgs, cancel: CancellationToken) -> Result<()> {
        let topic = naming::topic_name(&self.project_id, &args.workflow_id);
        self.bus
            .create_topic(&topic)
            .await
            .map_err(|e| Error::Provision(format!("could not create topic {}: {}", topic, e)))?;

        let subscription = naming::coord_subscription_name(&self.project_id, &args.workflow_id);
        self.bus
            .create_subscription(&subscription, &topic)
            .await
            .map_err(|e| {
                Error::Provision(format!(
                    "could not create subscription {}: {}",
                    subscription, e
                ))
            })?;

        info!(topic = %topic, "Created workflow topic");
        self.log
            .emit(format!("{} {}", naming::TOPIC_CREATED_MARKER, topic));

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }

            let messages = match self.bus.pull(&subscription, 1).await {
                Ok(messages) => messages,
                Err(e) => {
                    warn!(subscription = %subscription, error = %e, "Error pulling subscription");
                    continue;
                }
            };

            for message in messages {
                match decode_payload(&message.data) {
                    Ok(text) => self.log.emit(text),
                    Err(e) => warn!(message_id = %message.message_id, error = %e, "Undecodable message"),
                }
                if let Err(e) = self
                    .bus
                    .acknowledge(&subscription, std::slice::from_ref(&message.ack_id))
                    .await
                {
                    warn!(ack_id = %message.ack_id, error = %e, "Failed to ack message");
                }
            }
        }

        info!(topic = %topic, "Coordinator stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ScriptedBus, completion};

    #[test]
    fn test_args() {
        let args = CoordArgs::from_args(&["run-1".to_string()]).unwrap();
        assert_eq!(args.workflow_id, WorkflowId::new("run-1"));
        assert!(CoordArgs::from_args(&[]).is_err());
    }

    #[tokio::test]
    async fn test_creates_topic_and_echoes_messages() {
        let bus = Arc::new(ScriptedBus::default());
        bus.push_batch(vec![completion("1", "build")]);

        let log = StepLog::new();
        let coord = Coordinator::new(bus.clone(), "proj")
            .with_interval(Duration::from_millis(5))
            .with_log(log.clone());
        let cancel = CancellationToken::new();
        let args = CoordArgs {
            workflow_id: WorkflowId::new("run-1"),
        };

        let stopper = cancel.clone();
        let watcher = log.clone();
        tokio::spawn(async move {
            while !watcher.contents().contains("\"completed\":\"build\"") {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            stopper.cancel();
        });

        coord.run(&args, cancel).await.unwrap();

        assert_eq!(
            *bus.topics.lock().unwrap(),
            vec!["projects/proj/topics/workflow-run-1"]
        );
        assert!(
            bus.subscriptions
                .lock()
                .unwrap()
                .contains_key("projects/proj/subscriptions/coord-run-1")
        );
        let lines = log.lines();
        assert_eq!(lines[0], "Created topic projects/proj/topics/workflow-run-1");
        assert_eq!(bus.acked(), vec!["1"]);
    }

    #[tokio::test]
    async fn test_existing_topic_is_a_provisioning_error() {
        let bus = Arc::new(ScriptedBus::default());
        bus.create_topic("projects/proj/topics/workflow-run-1")
            .await
            .unwrap();

        let err = Coordinator::new(bus, "proj")
            .run(
                &CoordArgs {
                    workflow_id: WorkflowId::new("run-1"),
                },
                CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Provision(_)));
    }
}
