//! Workflow orchestration for flowlink.
//!
//! Turns a parsed workflow graph into a running workflow: bootstraps the
//! completion topic, guards the artifact bucket, and launches each node's
//! job wrapped with the wait and complete steps. Every run's state is kept
//! in a [`RunRecord`] stored beside its artifacts.

pub mod orchestrator;
pub mod run_record;

pub use orchestrator::{OrchestratorConfig, WorkflowOrchestrator};
pub use run_record::{LaunchStatus, NodeLaunch, RunRecord, RunRecordStore};
