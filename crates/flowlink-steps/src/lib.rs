//! Coordination steps embedded into flowlink node jobs.
//!
//! Every node job runs inside its own opaque process. The orchestrator wraps
//! the node's real steps with:
//! - a wait step that blocks until every dependency has announced completion
//!   and pulls the dependencies' artifacts into the node's input area
//! - a complete step that uploads the node's outputs and announces completion
//!
//! A separate bootstrap step creates the workflow's completion topic.

pub mod complete;
pub mod coord;
pub mod relay;
pub mod wait;

pub use complete::{CompleteArgs, CompletionSignaler};
pub use coord::{CoordArgs, Coordinator};
pub use relay::ArtifactRelay;
pub use wait::{BlockSet, WaitArgs, WaitCoordinator};

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Default root of a job's local work area.
pub const DEFAULT_WORK_ROOT: &str = "/workflow_artifacts";

/// Local directories a node job reads inputs from and writes outputs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkArea {
    root: PathBuf,
}

impl WorkArea {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Where dependency artifacts are relayed to, one directory per dependency.
    pub fn input_dir(&self) -> PathBuf {
        self.root.join("in")
    }

    /// Where the node's real steps leave artifacts for dependents.
    pub fn output_dir(&self) -> PathBuf {
        self.root.join("out")
    }
}

impl Default for WorkArea {
    fn default() -> Self {
        Self::new(DEFAULT_WORK_ROOT)
    }
}

/// Output lines a step writes to its job's log.
#[derive(Debug, Clone, Default)]
pub struct StepLog {
    lines: Arc<Mutex<Vec<String>>>,
}

impl StepLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn emit(&self, line: impl Into<String>) {
        if let Ok(mut lines) = self.lines.lock() {
            lines.push(line.into());
        }
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().map(|l| l.clone()).unwrap_or_default()
    }

    pub fn contents(&self) -> String {
        let mut out = self.lines().join("\n");
        if !out.is_empty() {
            out.push('\n');
        }
        out
    }

    pub fn is_empty(&self) -> bool {
        self.lines.lock().map(|l| l.is_empty()).unwrap_or(true)
    }
}

#[cfg(test)]
pub(crate) mod testing;
