//! Workflow graph and run definitions.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::{ArtifactLocation, WorkflowId};

/// A parsed workflow graph.
///
/// Nodes keep the order they were declared in. The spec is immutable once
/// loaded and is owned by the orchestrator for the lifetime of one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowSpec {
    /// Execution nodes in declaration order.
    pub nodes: Vec<ExecutionNode>,
    /// Path of the graph config this spec was loaded from, if any.
    pub path: Option<PathBuf>,
}

impl WorkflowSpec {
    pub fn new(nodes: Vec<ExecutionNode>) -> Self {
        Self { nodes, path: None }
    }

    pub fn node(&self, name: &str) -> Option<&ExecutionNode> {
        self.nodes.iter().find(|n| n.name == name)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Directory job spec paths are resolved against.
    pub fn base_dir(&self) -> PathBuf {
        self.path
            .as_deref()
            .and_then(Path::parent)
            .map(Path::to_path_buf)
            .unwrap_or_default()
    }
}

/// One named unit of work in the graph, backed by a job spec file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionNode {
    /// Node kind (e.g. "exec").
    pub kind: String,
    /// Name, unique within the spec.
    pub name: String,
    /// Nodes that must complete before this one may start its real work.
    pub dependencies: Vec<Dependency>,
    /// Job spec file, relative to the graph config's directory.
    pub job_spec_path: String,
}

impl ExecutionNode {
    pub fn dependency_names(&self) -> Vec<String> {
        self.dependencies.iter().map(|d| d.name.clone()).collect()
    }
}

/// A reference to another node, optionally renamed for artifact relay.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dependency {
    pub name: String,
    pub alias: Option<String>,
}

impl Dependency {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            alias: None,
        }
    }

    pub fn aliased(name: impl Into<String>, alias: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            alias: Some(alias.into()),
        }
    }

    /// Directory name the dependency's artifacts are relayed into.
    pub fn local_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }

    /// Encode as a wait step argument: `name` or `name=alias`.
    pub fn to_arg(&self) -> String {
        match &self.alias {
            Some(alias) => format!("{}={}", self.name, alias),
            None => self.name.clone(),
        }
    }

    pub fn from_arg(arg: &str) -> Self {
        match arg.split_once('=') {
            Some((name, alias)) if !alias.is_empty() => Self::aliased(name, alias),
            Some((name, _)) => Self::new(name),
            None => Self::new(arg),
        }
    }
}

/// Identity of a workflow run once provisioning has begun.
///
/// Lives in the orchestrator's memory for the duration of the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowRun {
    pub workflow_id: WorkflowId,
    /// Fully-qualified completion topic name.
    pub topic: String,
    /// Root under which every node's artifacts are stored.
    pub artifact_prefix: ArtifactLocation,
}
