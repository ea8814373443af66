//! Workflow orchestrator - provisions a run and launches every node's job.

use flowlink_config::jobspec::load_node_job_spec;
use flowlink_config::{ConfigResult, Settings, validate};
use flowlink_core::artifact::ArtifactStore;
use flowlink_core::bus::CompletionBus;
use flowlink_core::job::{BuildStep, JobHandle, JobService, JobSpec, StepImages};
use flowlink_core::workflow::{ExecutionNode, WorkflowRun, WorkflowSpec};
use flowlink_core::{ArtifactLocation, Error, JobRunId, PollPolicy, Result, WorkflowId, naming};
use flowlink_steps::{CompleteArgs, WaitArgs};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::run_record::{LaunchStatus, RunRecord, RunRecordStore};

/// Settings the orchestrator needs for one run.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub project_id: String,
    pub images: StepImages,
    /// How the bootstrap job's log is polled for the topic marker.
    pub bootstrap_poll: PollPolicy,
}

impl OrchestratorConfig {
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            images: StepImages::default(),
            bootstrap_poll: PollPolicy::new(Duration::from_secs(1)),
        }
    }

    pub fn from_settings(settings: &Settings) -> ConfigResult<Self> {
        Ok(Self {
            project_id: settings.project_id()?.to_string(),
            images: settings.images.clone(),
            bootstrap_poll: settings.bootstrap_poll,
        })
    }
}

/// Result of one node's launch task.
#[derive(Debug)]
struct NodeOutcome {
    index: usize,
    node: String,
    result: Result<JobHandle>,
}

/// Drives one workflow run from a parsed spec to launched node jobs.
pub struct WorkflowOrchestrator {
    jobs: Arc<dyn JobService>,
    bus: Arc<dyn CompletionBus>,
    store: Arc<dyn ArtifactStore>,
    records: RunRecordStore,
    config: OrchestratorConfig,
}

impl WorkflowOrchestrator {
    pub fn new(
        jobs: Arc<dyn JobService>,
        bus: Arc<dyn CompletionBus>,
        store: Arc<dyn ArtifactStore>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            jobs,
            bus,
            records: RunRecordStore::new(store.clone()),
            store,
            config,
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Start a workflow run.
    ///
    /// Loads every node's job spec, bootstraps the workflow topic, ensures
    /// the artifact bucket, then launches all nodes concurrently. A node that
    /// fails to launch does not stop its siblings; the first such failure is
    /// returned once every launch task has finished. Resources created
    /// before a failure are left in place.
    pub async fn start(&self, spec: &WorkflowSpec) -> Result<RunRecord> {
        if spec.is_empty() {
            return Err(Error::Load("workflow has no nodes".to_string()));
        }
        validate(spec).map_err(|e| Error::Load(e.to_string()))?;
        let job_specs = self.load_job_specs(spec)?;

        let bootstrap = self.bootstrap().await?;
        let workflow_id = WorkflowId::from(bootstrap.run_id.clone());
        let run = WorkflowRun {
            topic: naming::topic_name(&self.config.project_id, &workflow_id),
            artifact_prefix: ArtifactLocation::for_workflow(&self.config.project_id, &workflow_id),
            workflow_id,
        };
        info!(workflow_id = %run.workflow_id, topic = %run.topic, "Workflow topic ready");

        self.ensure_bucket(&run.artifact_prefix.bucket).await?;

        let subscriptions = (0..spec.len())
            .map(|i| naming::subscription_name(&self.config.project_id, &run.workflow_id, i))
            .collect();
        let mut record = RunRecord::new(
            &self.config.project_id,
            run.clone(),
            bootstrap,
            spec.clone(),
            subscriptions,
        );
        self.save_record(&record).await;

        let first_error = self.launch_nodes(spec, job_specs, &mut record).await;
        self.save_record(&record).await;

        match first_error {
            Some(e) => Err(e),
            None => {
                info!(workflow_id = %run.workflow_id, nodes = spec.len(), "Workflow launched");
                Ok(record)
            }
        }
    }

    /// Load every node's job spec, keyed by position. Any failure aborts
    /// before anything is provisioned.
    fn load_job_specs(&self, spec: &WorkflowSpec) -> Result<Vec<JobSpec>> {
        let base_dir = spec.base_dir();
        spec.nodes
            .iter()
            .map(|node| {
                load_node_job_spec(&base_dir, &node.job_spec_path).map_err(|e| {
                    Error::Load(format!(
                        "could not load job spec {:?} of node {:?}: {}",
                        node.job_spec_path, node.name, e
                    ))
                })
            })
            .collect()
    }

    /// Launch the bootstrap job and wait until its log shows the workflow
    /// topic exists.
    async fn bootstrap(&self) -> Result<JobHandle> {
        let job = JobSpec::new(vec![BuildStep::new(
            self.config.images.coord.clone(),
            vec!["$BUILD_ID".to_string()],
        )]);
        let handle = self
            .jobs
            .submit(&self.config.project_id, job)
            .await
            .map_err(|e| Error::Provision(format!("could not create bootstrap job: {}", e)))?;
        info!(workflow_id = %handle.run_id, "Started bootstrap job");

        self.wait_for_topic(&handle.run_id).await?;
        Ok(handle)
    }

    async fn wait_for_topic(&self, run_id: &JobRunId) -> Result<()> {
        let poll = self.config.bootstrap_poll;
        let started = Instant::now();

        loop {
            match self.jobs.fetch_log(run_id).await {
                Ok(log) if log.contains(naming::TOPIC_CREATED_MARKER) => return Ok(()),
                Ok(_) | Err(Error::NotFound(_)) => {}
                Err(e) => {
                    return Err(Error::Provision(format!(
                        "could not fetch workflow log: {}",
                        e
                    )));
                }
            }

            let status = self.jobs.status(run_id).await?;
            if status.is_terminal() {
                return Err(Error::Provision(format!(
                    "bootstrap job {} ended before creating the workflow topic: {:?}",
                    run_id, status
                )));
            }

            if poll.expired(started) {
                return Err(Error::Timeout(format!(
                    "workflow topic was not created by bootstrap job {}",
                    run_id
                )));
            }
            tokio::time::sleep(poll.interval).await;
        }
    }

    /// Create the project's artifact bucket, or verify we own the existing
    /// one so another project cannot read our artifacts.
    async fn ensure_bucket(&self, bucket: &str) -> Result<()> {
        let project_id = &self.config.project_id;
        match self.store.create_bucket(bucket, project_id).await {
            Ok(()) => {
                info!(bucket, "Created artifact bucket");
                Ok(())
            }
            Err(Error::Conflict(_)) => {
                let policy = self.store.bucket_policy(bucket).await.map_err(|e| {
                    Error::Provision(format!("could not check policy of {}: {}", bucket, e))
                })?;
                if policy.is_owned_by(project_id) {
                    return Ok(());
                }
                let rendered = serde_json::to_string_pretty(&policy).unwrap_or_default();
                warn!(bucket, policy = %rendered, "Artifact bucket policy");
                Err(Error::OwnershipConflict {
                    bucket: bucket.to_string(),
                })
            }
            Err(e) => Err(Error::Provision(format!(
                "could not create artifact bucket {}: {}",
                bucket, e
            ))),
        }
    }

    /// Launch one task per node and collect their outcomes into `record`.
    /// Returns the first reported failure.
    async fn launch_nodes(
        &self,
        spec: &WorkflowSpec,
        job_specs: Vec<JobSpec>,
        record: &mut RunRecord,
    ) -> Option<Error> {
        let mut first_error = None;

        // Every subscription exists before any node job is submitted, so no
        // completion can be published ahead of a dependent's subscription.
        let topic = record.run.topic.clone();
        let created = futures::future::join_all(record.nodes.iter().map(|launch| {
            let bus = self.bus.clone();
            let subscription = launch.subscription.clone();
            let topic = topic.clone();
            tokio::spawn(async move { bus.create_subscription(&subscription, &topic).await })
        }))
        .await;

        let (tx, mut rx) = mpsc::unbounded_channel::<NodeOutcome>();
        let mut tasks = Vec::with_capacity(spec.len());
        let nodes = spec.nodes.iter().cloned().zip(job_specs).zip(created);
        for (index, ((node, job), created)) in nodes.enumerate() {
            let subscription = record.nodes[index].subscription.clone();
            let created = created.unwrap_or_else(|e| {
                Err(Error::Internal(format!("subscription task panicked: {}", e)))
            });
            if let Err(e) = created {
                let e = Error::Provision(format!(
                    "could not create {:?} subscription: {}",
                    node.name, e
                ));
                self.record_outcome(record, index, &node.name, Err(e), &mut first_error)
                    .await;
                continue;
            }
            info!(node = %node.name, subscription = %subscription, "Created node subscription");

            let launch = NodeLauncher {
                jobs: self.jobs.clone(),
                project_id: self.config.project_id.clone(),
                images: self.config.images.clone(),
                run: record.run.clone(),
                subscription,
            };
            let tx = tx.clone();
            tasks.push(tokio::spawn(async move {
                let name = node.name.clone();
                let result = launch.launch(node, job).await;
                // The receiver outlives every task.
                let _ = tx.send(NodeOutcome {
                    index,
                    node: name,
                    result,
                });
            }));
        }
        drop(tx);

        while let Some(outcome) = rx.recv().await {
            self.record_outcome(
                record,
                outcome.index,
                &outcome.node,
                outcome.result,
                &mut first_error,
            )
            .await;
        }

        for task in futures::future::join_all(tasks).await {
            if let Err(e) = task {
                error!(error = %e, "Node launch task panicked");
                first_error.get_or_insert(Error::Internal(format!(
                    "node launch task panicked: {}",
                    e
                )));
            }
        }

        first_error
    }

    async fn record_outcome(
        &self,
        record: &mut RunRecord,
        index: usize,
        node: &str,
        result: Result<JobHandle>,
        first_error: &mut Option<Error>,
    ) {
        let status = match result {
            Ok(handle) => {
                info!(node = %node, run_id = %handle.run_id, "Launched node");
                LaunchStatus::Submitted {
                    run_id: handle.run_id,
                }
            }
            Err(e) => {
                error!(node = %node, error = %e, "Node launch failed");
                let message = e.to_string();
                first_error.get_or_insert(Error::NodeLaunch {
                    node: node.to_string(),
                    message: message.clone(),
                });
                LaunchStatus::Failed { message }
            }
        };
        record.set_status(index, status);
        self.save_record(record).await;
    }

    async fn save_record(&self, record: &RunRecord) {
        if let Err(e) = self.records.save(record).await {
            warn!(workflow_id = %record.workflow_id(), error = %e, "Could not save run record");
        }
    }
}

/// What one node's launch task needs.
struct NodeLauncher {
    jobs: Arc<dyn JobService>,
    project_id: String,
    images: StepImages,
    run: WorkflowRun,
    subscription: String,
}

impl NodeLauncher {
    async fn launch(&self, node: ExecutionNode, job: JobSpec) -> Result<JobHandle> {
        let job = self.wrap(&node, job);
        self.jobs.submit(&self.project_id, job).await
    }

    /// Surround the node's own steps with the wait and complete steps.
    fn wrap(&self, node: &ExecutionNode, job: JobSpec) -> JobSpec {
        let wait = WaitArgs {
            artifact_prefix: self.run.artifact_prefix.clone(),
            workflow_id: self.run.workflow_id.clone(),
            subscription: self.subscription.clone(),
            dependencies: node.dependencies.clone(),
        };
        let complete = CompleteArgs {
            artifacts: self.run.artifact_prefix.join(&node.name),
            workflow_id: self.run.workflow_id.clone(),
            node: node.name.clone(),
        };
        job.wrapped(
            BuildStep::new(self.images.wait.clone(), wait.to_args()),
            BuildStep::new(self.images.complete.clone(), complete.to_args()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use flowlink_core::job::JobStatus;
    use flowlink_core::workflow::Dependency;
    use flowlink_core::bus::ReceivedMessage;
    use flowlink_executor::{FsArtifactStore, MemoryBus};
    use std::sync::Mutex;

    /// Job service whose bootstrap job never writes a log.
    struct SilentJobs {
        submitted: Mutex<Vec<JobSpec>>,
        status: JobStatus,
    }

    impl SilentJobs {
        fn new(status: JobStatus) -> Self {
            Self {
                submitted: Mutex::new(Vec::new()),
                status,
            }
        }
    }

    #[async_trait]
    impl JobService for SilentJobs {
        fn name(&self) -> &'static str {
            "silent"
        }

        async fn submit(&self, project_id: &str, spec: JobSpec) -> Result<JobHandle> {
            self.submitted.lock().unwrap().push(spec);
            Ok(JobHandle {
                run_id: JobRunId::new("silent-1"),
                project_id: project_id.to_string(),
                service_name: self.name().to_string(),
            })
        }

        async fn fetch_log(&self, run_id: &JobRunId) -> Result<String> {
            Err(Error::NotFound(run_id.to_string()))
        }

        async fn status(&self, _run_id: &JobRunId) -> Result<JobStatus> {
            Ok(self.status.clone())
        }
    }

    fn node(name: &str, deps: Vec<Dependency>) -> ExecutionNode {
        ExecutionNode {
            kind: "exec".to_string(),
            name: name.to_string(),
            dependencies: deps,
            job_spec_path: "-".to_string(),
        }
    }

    fn orchestrator(jobs: Arc<dyn JobService>, dir: &std::path::Path) -> WorkflowOrchestrator {
        let mut config = OrchestratorConfig::new("proj");
        config.bootstrap_poll =
            PollPolicy::new(Duration::from_millis(5)).with_timeout(Duration::from_millis(50));
        WorkflowOrchestrator::new(
            jobs,
            Arc::new(MemoryBus::new()),
            Arc::new(FsArtifactStore::new(dir)),
            config,
        )
    }

    #[tokio::test]
    async fn test_bootstrap_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let jobs = Arc::new(SilentJobs::new(JobStatus::Running {
            started_at: Utc::now(),
        }));
        let orch = orchestrator(jobs.clone(), dir.path());

        let err = orch
            .start(&WorkflowSpec::new(vec![node("build", vec![])]))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout(_)), "{}", err);

        let submitted = jobs.submitted.lock().unwrap();
        assert_eq!(submitted.len(), 1);
        assert_eq!(submitted[0].steps[0].name, "flowlink/coord");
        assert_eq!(submitted[0].steps[0].args, vec!["$BUILD_ID"]);
    }

    #[tokio::test]
    async fn test_bootstrap_job_dying_early() {
        let dir = tempfile::tempdir().unwrap();
        let jobs = Arc::new(SilentJobs::new(JobStatus::Failed {
            started_at: None,
            finished_at: Utc::now(),
            message: "image not found".to_string(),
        }));

        let err = orchestrator(jobs, dir.path())
            .start(&WorkflowSpec::new(vec![node("build", vec![])]))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Provision(_)), "{}", err);
    }

    #[tokio::test]
    async fn test_invalid_graph_launches_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let jobs = Arc::new(SilentJobs::new(JobStatus::Pending));
        let orch = orchestrator(jobs.clone(), dir.path());

        let dangling = WorkflowSpec::new(vec![node("test", vec![Dependency::new("build")])]);
        assert!(matches!(orch.start(&dangling).await, Err(Error::Load(_))));
        assert!(matches!(
            orch.start(&WorkflowSpec::default()).await,
            Err(Error::Load(_))
        ));
        assert!(jobs.submitted.lock().unwrap().is_empty());
    }

    #[test]
    fn test_wrap_surrounds_node_steps() {
        let workflow_id = WorkflowId::new("wf");
        let launcher = NodeLauncher {
            jobs: Arc::new(SilentJobs::new(JobStatus::Pending)),
            project_id: "proj".to_string(),
            images: StepImages::default(),
            run: WorkflowRun {
                topic: naming::topic_name("proj", &workflow_id),
                artifact_prefix: ArtifactLocation::for_workflow("proj", &workflow_id),
                workflow_id,
            },
            subscription: "projects/proj/subscriptions/workflow-wf-2".to_string(),
        };
        let node = node(
            "deploy",
            vec![Dependency::new("build"), Dependency::aliased("test", "t")],
        );
        let own = JobSpec::new(vec![BuildStep::new("sh", vec!["deploy.sh".to_string()])]);

        let job = launcher.wrap(&node, own);

        assert_eq!(job.steps.len(), 3);
        assert_eq!(job.steps[0].name, "flowlink/wait");
        assert_eq!(
            job.steps[0].args,
            vec![
                "artifacts://proj_workflow_artifacts/wf",
                "wf",
                "projects/proj/subscriptions/workflow-wf-2",
                "build",
                "test=t",
            ]
        );
        assert_eq!(job.steps[1].name, "sh");
        assert_eq!(job.steps[2].name, "flowlink/complete");
        assert_eq!(
            job.steps[2].args,
            vec!["artifacts://proj_workflow_artifacts/wf/deploy", "wf", "deploy"]
        );
    }

    /// Bus that panics while creating subscriptions ending in `-1`.
    struct PanickingBus {
        inner: MemoryBus,
    }

    #[async_trait]
    impl CompletionBus for PanickingBus {
        async fn create_topic(&self, topic: &str) -> Result<()> {
            self.inner.create_topic(topic).await
        }

        async fn create_subscription(&self, subscription: &str, topic: &str) -> Result<()> {
            if subscription.ends_with("-1") {
                panic!("subscription backend crashed");
            }
            self.inner.create_subscription(subscription, topic).await
        }

        async fn publish(&self, topic: &str, data: String) -> Result<String> {
            self.inner.publish(topic, data).await
        }

        async fn pull(&self, subscription: &str, max_messages: usize) -> Result<Vec<ReceivedMessage>> {
            self.inner.pull(subscription, max_messages).await
        }

        async fn acknowledge(&self, subscription: &str, ack_ids: &[String]) -> Result<()> {
            self.inner.acknowledge(subscription, ack_ids).await
        }
    }

    #[tokio::test]
    async fn test_panicking_subscription_fails_only_its_node() {
        let dir = tempfile::tempdir().unwrap();
        let jobs = Arc::new(SilentJobs::new(JobStatus::Pending));
        let bus = Arc::new(PanickingBus {
            inner: MemoryBus::new(),
        });
        let orch = WorkflowOrchestrator::new(
            jobs.clone(),
            bus.clone(),
            Arc::new(FsArtifactStore::new(dir.path())),
            OrchestratorConfig::new("proj"),
        );

        let workflow_id = WorkflowId::new("wf");
        let run = WorkflowRun {
            topic: naming::topic_name("proj", &workflow_id),
            artifact_prefix: ArtifactLocation::for_workflow("proj", &workflow_id),
            workflow_id: workflow_id.clone(),
        };
        bus.create_topic(&run.topic).await.unwrap();
        let spec = WorkflowSpec::new(vec![node("a", vec![]), node("b", vec![])]);
        let subscriptions = (0..spec.len())
            .map(|i| naming::subscription_name("proj", &workflow_id, i))
            .collect();
        let bootstrap = JobHandle {
            run_id: JobRunId::new("wf"),
            project_id: "proj".to_string(),
            service_name: "silent".to_string(),
        };
        let mut record = RunRecord::new("proj", run, bootstrap, spec.clone(), subscriptions);

        let job_specs = vec![JobSpec::new(vec![]), JobSpec::new(vec![])];
        let err = tokio::time::timeout(
            Duration::from_secs(5),
            orch.launch_nodes(&spec, job_specs, &mut record),
        )
        .await
        .expect("launch hung after a panic")
        .unwrap();

        assert!(
            matches!(&err, Error::NodeLaunch { node, .. } if node == "b"),
            "{}",
            err
        );
        assert!(matches!(
            record.nodes[0].status,
            LaunchStatus::Submitted { .. }
        ));
        assert!(matches!(record.nodes[1].status, LaunchStatus::Failed { .. }));
        assert_eq!(jobs.submitted.lock().unwrap().len(), 1);
    }
}
