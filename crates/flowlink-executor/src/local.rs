//! Local job service.
//!
//! Runs each submitted job as a tokio task on this machine. Steps naming
//! one of the coordination images run in-process against the shared bus
//! and artifact store; every other step runs as a child process inside the
//! job's work area.

use async_trait::async_trait;
use chrono::Utc;
use flowlink_core::artifact::ArtifactStore;
use flowlink_core::bus::CompletionBus;
use flowlink_core::job::{BuildStep, JobHandle, JobService, JobSpec, JobStatus, StepImages};
use flowlink_core::{Error, JobRunId, PollPolicy, Result};
use flowlink_steps::wait::DEFAULT_BATCH_SIZE;
use flowlink_steps::{
    CompleteArgs, CompletionSignaler, CoordArgs, Coordinator, StepLog, WaitArgs, WaitCoordinator,
    WorkArea,
};
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Placeholder in step arguments replaced by the job's run ID.
pub const BUILD_ID_VAR: &str = "$BUILD_ID";
/// Placeholder in step arguments replaced by the owning project.
pub const PROJECT_ID_VAR: &str = "$PROJECT_ID";

struct RunEntry {
    project_id: String,
    log: StepLog,
    status: JobStatus,
}

#[derive(Default)]
struct Runs {
    entries: HashMap<JobRunId, RunEntry>,
    order: Vec<JobRunId>,
}

type SharedRuns = Arc<Mutex<Runs>>;

fn set_status(runs: &SharedRuns, run_id: &JobRunId, status: JobStatus) {
    if let Ok(mut runs) = runs.lock() {
        if let Some(entry) = runs.entries.get_mut(run_id) {
            entry.status = status;
        }
    }
}

/// Job service that executes jobs on the local machine.
pub struct LocalJobService {
    bus: Arc<dyn CompletionBus>,
    store: Arc<dyn ArtifactStore>,
    workspace_root: PathBuf,
    images: StepImages,
    wait_poll: PollPolicy,
    batch_size: usize,
    runs: SharedRuns,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    cancel: CancellationToken,
}

impl LocalJobService {
    /// Create a service whose jobs get work areas under `workspace_root`.
    pub fn new(
        bus: Arc<dyn CompletionBus>,
        store: Arc<dyn ArtifactStore>,
        workspace_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            bus,
            store,
            workspace_root: workspace_root.into(),
            images: StepImages::default(),
            wait_poll: PollPolicy::default(),
            batch_size: DEFAULT_BATCH_SIZE,
            runs: Arc::new(Mutex::new(Runs::default())),
            tasks: Mutex::new(Vec::new()),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_images(mut self, images: StepImages) -> Self {
        self.images = images;
        self
    }

    pub fn with_wait_poll(mut self, poll: PollPolicy) -> Self {
        self.wait_poll = poll;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Work area of a job run.
    pub fn work_area(&self, run_id: &JobRunId) -> WorkArea {
        WorkArea::new(self.workspace_root.join(run_id.as_str()))
    }

    /// Run IDs in submission order.
    pub fn run_ids(&self) -> Vec<JobRunId> {
        self.runs
            .lock()
            .map(|r| r.order.clone())
            .unwrap_or_default()
    }

    /// Wait until the job reaches a terminal status.
    pub async fn wait(&self, run_id: &JobRunId) -> Result<JobStatus> {
        loop {
            let status = self.status(run_id).await?;
            if status.is_terminal() {
                return Ok(status);
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    }

    /// Cancel every running job and wait for their tasks to finish.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let tasks = self
            .tasks
            .lock()
            .map(|mut t| std::mem::take(&mut *t))
            .unwrap_or_default();
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Job task panicked");
            }
        }
        info!("Local job service stopped");
    }
}

#[async_trait]
impl JobService for LocalJobService {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn submit(&self, project_id: &str, spec: JobSpec) -> Result<JobHandle> {
        if self.cancel.is_cancelled() {
            return Err(Error::InvalidInput("job service is shut down".to_string()));
        }

        let run_id = JobRunId::generate();
        let log = StepLog::new();
        {
            let mut runs = self
                .runs
                .lock()
                .map_err(|_| Error::Internal("job table poisoned".to_string()))?;
            runs.entries.insert(
                run_id.clone(),
                RunEntry {
                    project_id: project_id.to_string(),
                    log: log.clone(),
                    status: JobStatus::Pending,
                },
            );
            runs.order.push(run_id.clone());
        }

        let runner = JobRunner {
            bus: self.bus.clone(),
            store: self.store.clone(),
            images: self.images.clone(),
            wait_poll: self.wait_poll,
            batch_size: self.batch_size,
            project_id: project_id.to_string(),
            run_id: run_id.clone(),
            work_area: self.work_area(&run_id),
            log,
            cancel: self.cancel.child_token(),
        };
        let runs = self.runs.clone();

        info!(run_id = %run_id, project = project_id, steps = spec.steps.len(), "Submitted job");
        let task = tokio::spawn(async move {
            let started_at = Utc::now();
            set_status(&runs, &runner.run_id, JobStatus::Running { started_at });
            let status = runner.execute(spec, started_at).await;
            set_status(&runs, &runner.run_id, status);
        });

        if let Ok(mut tasks) = self.tasks.lock() {
            tasks.retain(|t| !t.is_finished());
            tasks.push(task);
        }

        Ok(JobHandle {
            run_id,
            project_id: project_id.to_string(),
            service_name: self.name().to_string(),
        })
    }

    async fn fetch_log(&self, run_id: &JobRunId) -> Result<String> {
        let runs = self
            .runs
            .lock()
            .map_err(|_| Error::Internal("job table poisoned".to_string()))?;
        let entry = runs
            .entries
            .get(run_id)
            .ok_or_else(|| Error::NotFound(format!("job run {}", run_id)))?;
        if entry.log.is_empty() {
            return Err(Error::NotFound(format!("no log yet for job run {}", run_id)));
        }
        Ok(entry.log.contents())
    }

    async fn status(&self, run_id: &JobRunId) -> Result<JobStatus> {
        let runs = self
            .runs
            .lock()
            .map_err(|_| Error::Internal("job table poisoned".to_string()))?;
        let entry = runs
            .entries
            .get(run_id)
            .ok_or_else(|| Error::NotFound(format!("job run {}", run_id)))?;
        debug!(run_id = %run_id, project = %entry.project_id, "Fetched job status");
        Ok(entry.status.clone())
    }
}

/// Everything one job needs while it runs.
struct JobRunner {
    bus: Arc<dyn CompletionBus>,
    store: Arc<dyn ArtifactStore>,
    images: StepImages,
    wait_poll: PollPolicy,
    batch_size: usize,
    project_id: String,
    run_id: JobRunId,
    work_area: WorkArea,
    log: StepLog,
    cancel: CancellationToken,
}

impl JobRunner {
    async fn execute(&self, spec: JobSpec, started_at: chrono::DateTime<Utc>) -> JobStatus {
        let outcome = match spec.timeout {
            Some(limit) => match tokio::time::timeout(limit, self.run_steps(&spec.steps)).await {
                Ok(outcome) => outcome,
                Err(_) => Err(Error::Timeout(format!(
                    "job timed out after {}s",
                    limit.as_secs_f64()
                ))),
            },
            None => self.run_steps(&spec.steps).await,
        };

        match outcome {
            Ok(()) if self.cancel.is_cancelled() => {
                info!(run_id = %self.run_id, "Job cancelled");
                JobStatus::Cancelled {
                    started_at: Some(started_at),
                    cancelled_at: Utc::now(),
                }
            }
            Ok(()) => {
                info!(run_id = %self.run_id, "Job succeeded");
                JobStatus::Succeeded {
                    started_at,
                    finished_at: Utc::now(),
                }
            }
            Err(e) => {
                error!(run_id = %self.run_id, error = %e, "Job failed");
                self.log.emit(format!("ERROR: {}", e));
                JobStatus::Failed {
                    started_at: Some(started_at),
                    finished_at: Utc::now(),
                    message: e.to_string(),
                }
            }
        }
    }

    async fn run_steps(&self, steps: &[BuildStep]) -> Result<()> {
        tokio::fs::create_dir_all(self.work_area.root()).await?;
        for (index, step) in steps.iter().enumerate() {
            if self.cancel.is_cancelled() {
                return Ok(());
            }
            debug!(run_id = %self.run_id, step = index, name = %step.name, "Running step");
            self.run_step(step).await?;
        }
        Ok(())
    }

    fn substitute(&self, arg: &str) -> String {
        arg.replace(BUILD_ID_VAR, self.run_id.as_str())
            .replace(PROJECT_ID_VAR, &self.project_id)
    }

    async fn run_step(&self, step: &BuildStep) -> Result<()> {
        let args: Vec<String> = step.args.iter().map(|a| self.substitute(a)).collect();

        if step.name == self.images.coord {
            Coordinator::new(self.bus.clone(), &self.project_id)
                .with_interval(self.wait_poll.interval)
                .with_log(self.log.clone())
                .run(&CoordArgs::from_args(&args)?, self.cancel.child_token())
                .await
        } else if step.name == self.images.wait {
            let wait = WaitCoordinator::new(
                self.bus.clone(),
                self.store.clone(),
                self.work_area.clone(),
            )
            .with_poll_policy(self.wait_poll)
            .with_batch_size(self.batch_size)
            .with_log(self.log.clone());
            let args = WaitArgs::from_args(&args)?;
            tokio::select! {
                result = wait.run(&args) => result,
                _ = self.cancel.cancelled() => Ok(()),
            }
        } else if step.name == self.images.complete {
            CompletionSignaler::new(
                self.bus.clone(),
                self.store.clone(),
                self.work_area.clone(),
                &self.project_id,
            )
            .with_log(self.log.clone())
            .run(&CompleteArgs::from_args(&args)?)
            .await
            .map(|_| ())
        } else {
            self.run_process(step, &args).await
        }
    }

    async fn run_process(&self, step: &BuildStep, args: &[String]) -> Result<()> {
        let dir = match &step.dir {
            Some(dir) => self.work_area.root().join(dir),
            None => self.work_area.root().to_path_buf(),
        };

        let child = Command::new(&step.name)
            .args(args)
            .envs(&step.env)
            .env("BUILD_ID", self.run_id.as_str())
            .env("PROJECT_ID", &self.project_id)
            .current_dir(&dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::StepFailed {
                step: step.name.clone(),
                message: format!("could not start: {}", e),
            })?;

        let output = tokio::select! {
            output = child.wait_with_output() => output?,
            _ = self.cancel.cancelled() => return Ok(()),
        };

        for line in String::from_utf8_lossy(&output.stdout).lines() {
            self.log.emit(line);
        }
        for line in String::from_utf8_lossy(&output.stderr).lines() {
            self.log.emit(line);
        }

        if !output.status.success() {
            return Err(Error::StepFailed {
                step: step.name.clone(),
                message: format!("exited with {}", output.status),
            });
        }
        Ok(())
    }
}
