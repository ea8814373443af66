//! Error types for flowlink.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Bad graph config or job spec file.
    #[error("load error: {0}")]
    Load(String),

    /// Topic, subscription or bucket creation failed.
    #[error("provisioning failed: {0}")]
    Provision(String),

    #[error("artifact bucket {bucket} exists but is owned by someone else")]
    OwnershipConflict { bucket: String },

    #[error("could not launch node {node:?}: {message}")]
    NodeLaunch { node: String, message: String },

    #[error("artifact relay failed: {0}")]
    Relay(String),

    #[error("could not decode message: {0}")]
    Decode(String),

    #[error("bus error: {0}")]
    Bus(String),

    #[error("dependencies never completed: {}", pending.join(", "))]
    DependencyTimeout { pending: Vec<String> },

    #[error("step {step:?} failed: {message}")]
    StepFailed { step: String, message: String },

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;
