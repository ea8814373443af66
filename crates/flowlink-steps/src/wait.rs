//! Wait step: block a node's job until its dependencies have completed.

use flowlink_core::artifact::ArtifactStore;
use flowlink_core::bus::{CompletionBus, CompletionMessage};
use flowlink_core::workflow::Dependency;
use flowlink_core::{ArtifactLocation, Error, PollPolicy, Result, WorkflowId};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::relay::ArtifactRelay;
use crate::{StepLog, WorkArea};

/// Default number of messages requested per pull.
pub const DEFAULT_BATCH_SIZE: usize = 10;

/// Arguments of the wait step, as passed on its command line:
/// `ARTIFACT_PREFIX WORKFLOW_ID SUBSCRIPTION BLOCKING_NODE*`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaitArgs {
    pub artifact_prefix: ArtifactLocation,
    pub workflow_id: WorkflowId,
    pub subscription: String,
    pub dependencies: Vec<Dependency>,
}

impl WaitArgs {
    pub fn to_args(&self) -> Vec<String> {
        let mut args = vec![
            self.artifact_prefix.to_string(),
            self.workflow_id.to_string(),
            self.subscription.clone(),
        ];
        args.extend(self.dependencies.iter().map(Dependency::to_arg));
        args
    }

    pub fn from_args(args: &[String]) -> Result<Self> {
        let [prefix, workflow_id, subscription, blocking @ ..] = args else {
            return Err(Error::InvalidInput(
                "usage: wait ARTIFACT_PREFIX WORKFLOW_ID SUBSCRIPTION BLOCKING_NODE*".to_string(),
            ));
        };
        Ok(Self {
            artifact_prefix: ArtifactLocation::parse(prefix)?,
            workflow_id: WorkflowId::new(workflow_id.as_str()),
            subscription: subscription.clone(),
            dependencies: blocking.iter().map(|a| Dependency::from_arg(a)).collect(),
        })
    }
}

/// Outstanding dependencies of one node.
///
/// Only ever shrinks; resolving a name that is already gone is a no-op.
#[derive(Debug, Clone, Default)]
pub struct BlockSet {
    pending: HashMap<String, Dependency>,
}

impl BlockSet {
    pub fn new(dependencies: &[Dependency]) -> Self {
        Self {
            pending: dependencies
                .iter()
                .map(|d| (d.name.clone(), d.clone()))
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.pending.contains_key(name)
    }

    /// Remove `name`, returning its dependency if it was still pending.
    pub fn resolve(&mut self, name: &str) -> Option<Dependency> {
        self.pending.remove(name)
    }

    /// Pending names, sorted.
    pub fn pending(&self) -> Vec<String> {
        let mut names: Vec<String> = self.pending.keys().cloned().collect();
        names.sort();
        names
    }
}

/// Runs the wait step inside a node's job.
pub struct WaitCoordinator {
    bus: Arc<dyn CompletionBus>,
    relay: ArtifactRelay,
    work_area: WorkArea,
    poll: PollPolicy,
    batch_size: usize,
    log: StepLog,
}

impl WaitCoordinator {
    pub fn new(
        bus: Arc<dyn CompletionBus>,
        store: Arc<dyn ArtifactStore>,
        work_area: WorkArea,
    ) -> Self {
        Self {
            bus,
            relay: ArtifactRelay::new(store),
            work_area,
            poll: PollPolicy::default(),
            batch_size: DEFAULT_BATCH_SIZE,
            log: StepLog::new(),
        }
    }

    pub fn with_poll_policy(mut self, poll: PollPolicy) -> Self {
        self.poll = poll;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_log(mut self, log: StepLog) -> Self {
        self.log = log;
        self
    }

    /// Block until every dependency in `args` has completed and its
    /// artifacts have been relayed, then create the node's output directory.
    pub async fn run(&self, args: &WaitArgs) -> Result<()> {
        let mut blocks = BlockSet::new(&args.dependencies);
        let started = Instant::now();

        info!(
            workflow_id = %args.workflow_id,
            subscription = %args.subscription,
            blocking = ?blocks.pending(),
            "Waiting for dependencies"
        );

        while !blocks.is_empty() {
            if self.poll.expired(started) {
                return Err(Error::DependencyTimeout {
                    pending: blocks.pending(),
                });
            }

            let messages = self
                .bus
                .pull(&args.subscription, self.batch_size)
                .await
                .map_err(|e| {
                    Error::Bus(format!(
                        "could not pull from subscription {}: {}",
                        args.subscription, e
                    ))
                })?;

            if messages.is_empty() {
                tokio::time::sleep(self.poll.interval).await;
                continue;
            }

            for message in messages {
                if let Err(e) = self
                    .bus
                    .acknowledge(&args.subscription, std::slice::from_ref(&message.ack_id))
                    .await
                {
                    warn!(ack_id = %message.ack_id, error = %e, "Could not ack message");
                }

                let completion = match CompletionMessage::decode(&message.data) {
                    Ok(completion) => completion,
                    Err(e) => {
                        warn!(message_id = %message.message_id, error = %e, "Dropping undecodable message");
                        continue;
                    }
                };

                self.observe(&mut blocks, &completion, &args.artifact_prefix)
                    .await?;
            }
        }

        let out = self.work_area.output_dir();
        tokio::fs::create_dir_all(&out).await.map_err(|e| {
            Error::Internal(format!(
                "could not make artifact out directory {}: {}",
                out.display(),
                e
            ))
        })?;

        info!(workflow_id = %args.workflow_id, "All dependencies complete");
        Ok(())
    }

    /// Apply one completion to the block set, relaying artifacts if it
    /// resolved a pending dependency. Returns whether it did.
    pub async fn observe(
        &self,
        blocks: &mut BlockSet,
        completion: &CompletionMessage,
        prefix: &ArtifactLocation,
    ) -> Result<bool> {
        let Some(dependency) = blocks.resolve(&completion.completed) else {
            debug!(completed = %completion.completed, "Ignoring completion");
            return Ok(false);
        };

        info!(
            completed = %completion.completed,
            artifacts = %completion.artifacts,
            remaining = blocks.len(),
            "Got completion"
        );
        self.log.emit(format!("Got completion {}", completion.completed));

        self.relay
            .relay(prefix, &dependency, &self.work_area.input_dir(), &self.log)
            .await
            .map_err(|e| match e {
                Error::Relay(message) => Error::Relay(format!(
                    "could not fetch artifacts for {:?}: {}",
                    dependency.name, message
                )),
                other => other,
            })?;
        Ok(true)
    }
}
