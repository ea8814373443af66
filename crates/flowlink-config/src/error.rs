//! Configuration parsing errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("line {line}: expected '<kind> :'")]
    MissingSeparator { line: usize },

    #[error("line {line}: expected '<name> ('")]
    MissingOpenParen { line: usize },

    #[error("line {line}: expected '( param, param, ... )'")]
    MissingCloseParen { line: usize },

    #[error("line {line}: wrong number of tokens for param {param:?}")]
    BadParam { line: usize, param: String },

    #[error("line {line}: '=' is not allowed in name {name:?}")]
    BadName { line: usize, name: String },

    #[error("repeated name {0:?}")]
    Duplicate(String),

    #[error("invalid reference: {0}")]
    InvalidReference(String),

    #[error("cycle detected in dependencies: {}", .0.join(" -> "))]
    CycleDetected(Vec<String>),

    #[error("KDL parse error: {0}")]
    Kdl(#[from] kdl::KdlError),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("missing required field: {0}")]
    MissingField(String),

    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("could not read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl ConfigError {
    /// 0-based line number of a malformed graph line, if any.
    pub fn line(&self) -> Option<usize> {
        match self {
            ConfigError::MissingSeparator { line }
            | ConfigError::MissingOpenParen { line }
            | ConfigError::MissingCloseParen { line }
            | ConfigError::BadParam { line, .. }
            | ConfigError::BadName { line, .. } => Some(*line),
            _ => None,
        }
    }
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;
