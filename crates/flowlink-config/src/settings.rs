//! System settings parsing.

use crate::{ConfigError, ConfigResult};
use flowlink_core::PollPolicy;
use flowlink_core::job::StepImages;
use kdl::{KdlDocument, KdlNode};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// File name settings are looked up under next to a graph config.
pub const SETTINGS_FILE: &str = "flowlink.kdl";

/// System-wide settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// Project that owns jobs, topics and the artifact bucket.
    pub project: Option<String>,
    /// How the orchestrator polls for the bootstrap job's topic.
    pub bootstrap_poll: PollPolicy,
    /// How wait steps poll their subscription.
    pub wait_poll: PollPolicy,
    /// Maximum messages per pull.
    pub pull_batch_size: usize,
    /// Data directory for the local backends.
    pub artifact_root: Option<PathBuf>,
    /// Images implementing the coordination steps.
    pub images: StepImages,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            project: None,
            bootstrap_poll: PollPolicy::new(Duration::from_secs(1)),
            wait_poll: PollPolicy::new(Duration::from_secs(1)),
            pull_batch_size: 10,
            artifact_root: None,
            images: StepImages::default(),
        }
    }
}

impl Settings {
    pub fn project_id(&self) -> ConfigResult<&str> {
        self.project
            .as_deref()
            .filter(|p| !p.is_empty())
            .ok_or_else(|| ConfigError::MissingField("project".to_string()))
    }
}

pub fn load_settings(path: impl AsRef<Path>) -> ConfigResult<Settings> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;
    parse_settings(&text)
}

/// Parse settings from KDL text. Unset values keep their defaults.
pub fn parse_settings(kdl: &str) -> ConfigResult<Settings> {
    let doc: KdlDocument = kdl.parse()?;
    let mut settings = Settings::default();

    for node in doc.nodes() {
        let field = node.name().value();
        match field {
            "project" => settings.project = get_first_string_arg(node),
            "bootstrap-poll-interval-ms" => {
                settings.bootstrap_poll.interval = Duration::from_millis(get_u64(node, field)?);
            }
            "bootstrap-timeout-secs" => {
                settings.bootstrap_poll.timeout = Some(Duration::from_secs(get_u64(node, field)?));
            }
            "wait-poll-interval-ms" => {
                settings.wait_poll.interval = Duration::from_millis(get_u64(node, field)?);
            }
            "wait-timeout-secs" => {
                settings.wait_poll.timeout = Some(Duration::from_secs(get_u64(node, field)?));
            }
            "pull-batch-size" => {
                let size = get_u64(node, field)?;
                if size == 0 {
                    return Err(ConfigError::InvalidValue {
                        field: field.to_string(),
                        message: "must be at least 1".to_string(),
                    });
                }
                settings.pull_batch_size = size as usize;
            }
            "artifact-root" => settings.artifact_root = get_first_string_arg(node).map(PathBuf::from),
            "images" => {
                if let Some(children) = node.children() {
                    for child in children.nodes() {
                        let Some(image) = get_first_string_arg(child) else {
                            continue;
                        };
                        match child.name().value() {
                            "coord" => settings.images.coord = image,
                            "wait" => settings.images.wait = image,
                            "complete" => settings.images.complete = image,
                            _ => {}
                        }
                    }
                }
            }
            _ => {} // Ignore unknown nodes
        }
    }

    Ok(settings)
}

fn get_first_string_arg(node: &KdlNode) -> Option<String> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_string())
        .map(|s| s.to_string())
}

fn get_u64(node: &KdlNode, field: &str) -> ConfigResult<u64> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_integer())
        .and_then(|v| u64::try_from(v).ok())
        .ok_or_else(|| ConfigError::InvalidValue {
            field: field.to_string(),
            message: "expected a non-negative integer".to_string(),
        })
}
