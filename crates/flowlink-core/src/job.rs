//! Job service trait and job types.
//!
//! The job service runs one job as an ordered list of steps, each naming an
//! executable image and its arguments. It knows nothing about workflows: the
//! orchestrator wraps every node's job with coordination steps instead.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::{JobRunId, Result};

/// Specification for a job to execute.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSpec {
    /// Steps to run in order; the job fails at the first failing step.
    pub steps: Vec<BuildStep>,
    /// Maximum execution time.
    #[serde(default)]
    pub timeout: Option<Duration>,
    /// Free-form labels attached to the job.
    #[serde(default)]
    pub tags: Vec<String>,
}

impl JobSpec {
    pub fn new(steps: Vec<BuildStep>) -> Self {
        Self {
            steps,
            ..Default::default()
        }
    }

    /// Wrap the job's own steps with a leading and a trailing step.
    pub fn wrapped(mut self, first: BuildStep, last: BuildStep) -> Self {
        self.steps.insert(0, first);
        self.steps.push(last);
        self
    }
}

/// A single step of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildStep {
    /// Image (or executable) to run.
    pub name: String,
    /// Arguments passed to the image.
    #[serde(default)]
    pub args: Vec<String>,
    /// Environment variables.
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Working directory, relative to the job's work area.
    #[serde(default)]
    pub dir: Option<String>,
}

impl BuildStep {
    pub fn new(name: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            name: name.into(),
            args,
            env: HashMap::new(),
            dir: None,
        }
    }
}

/// Images that implement the coordination steps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepImages {
    /// Bootstrap step that creates the workflow topic.
    pub coord: String,
    /// Step prepended to every node job.
    pub wait: String,
    /// Step appended to every node job.
    pub complete: String,
}

impl Default for StepImages {
    fn default() -> Self {
        Self {
            coord: "flowlink/coord".to_string(),
            wait: "flowlink/wait".to_string(),
            complete: "flowlink/complete".to_string(),
        }
    }
}

/// Handle to a submitted job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobHandle {
    /// Run ID assigned by the job service.
    pub run_id: JobRunId,
    /// Project the job runs in.
    pub project_id: String,
    /// Name of the job service that accepted the job.
    pub service_name: String,
}

/// Status of a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum JobStatus {
    /// Job is waiting to start.
    Pending,
    /// Job is currently running.
    Running { started_at: DateTime<Utc> },
    /// Job completed successfully.
    Succeeded {
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
    },
    /// Job failed.
    Failed {
        started_at: Option<DateTime<Utc>>,
        finished_at: DateTime<Utc>,
        message: String,
    },
    /// Job was cancelled.
    Cancelled {
        started_at: Option<DateTime<Utc>>,
        cancelled_at: DateTime<Utc>,
    },
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded { .. } | JobStatus::Failed { .. } | JobStatus::Cancelled { .. }
        )
    }

    pub fn is_success(&self) -> bool {
        matches!(self, JobStatus::Succeeded { .. })
    }
}

/// Trait for job services.
#[async_trait]
pub trait JobService: Send + Sync {
    /// Name of this job service.
    fn name(&self) -> &'static str;

    /// Submit a job owned by `project_id`.
    async fn submit(&self, project_id: &str, spec: JobSpec) -> Result<JobHandle>;

    /// Fetch the job's output log so far.
    ///
    /// Returns `Error::NotFound` while no log has been written yet.
    async fn fetch_log(&self, run_id: &JobRunId) -> Result<String>;

    /// Get the current status of a job.
    async fn status(&self, run_id: &JobRunId) -> Result<JobStatus>;
}
