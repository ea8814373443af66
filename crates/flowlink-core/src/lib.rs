//! Core domain types and traits for flowlink.
//!
//! This crate contains:
//! - Workflow graph types (nodes, dependencies, runs)
//! - Job service trait and job specification types
//! - Completion bus trait and the completion wire message
//! - Artifact store trait and bucket ownership policies
//! - Naming conventions shared by the orchestrator and the embedded steps

pub mod artifact;
pub mod bus;
pub mod error;
pub mod id;
pub mod job;
pub mod naming;
pub mod poll;
pub mod workflow;

pub use error::{Error, Result};
pub use id::{JobRunId, WorkflowId};
pub use naming::ArtifactLocation;
pub use poll::PollPolicy;
