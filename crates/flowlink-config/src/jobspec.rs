//! Job spec file parsing.
//!
//! Each node's job is described in its own file. KDL is the native format:
//!
//! ```kdl
//! timeout 600
//! step "sh" "-c" "make release"
//! step "alpine" {
//!     args "sh" "-c" "cp -r dist out/"
//!     env RELEASE="1"
//!     dir "src"
//! }
//! ```
//!
//! Files ending in `.json` are read as a serialized [`JobSpec`] instead.

use crate::{ConfigError, ConfigResult};
use flowlink_core::job::{BuildStep, JobSpec};
use kdl::{KdlDocument, KdlNode};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Job spec path marking a node with no steps of its own.
pub const PASS_THROUGH: &str = "-";

/// Load the job spec for a node, resolving `path` against `base_dir`.
pub fn load_node_job_spec(base_dir: &Path, path: &str) -> ConfigResult<JobSpec> {
    if path == PASS_THROUGH {
        return Ok(JobSpec::default());
    }
    load_job_spec(base_dir.join(path))
}

pub fn load_job_spec(path: impl AsRef<Path>) -> ConfigResult<JobSpec> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;

    if path.extension().is_some_and(|ext| ext == "json") {
        return Ok(serde_json::from_str(&text)?);
    }
    parse_job_spec(&text)
}

/// Parse a KDL job spec.
pub fn parse_job_spec(kdl: &str) -> ConfigResult<JobSpec> {
    let doc: KdlDocument = kdl.parse()?;
    let mut spec = JobSpec::default();

    for node in doc.nodes() {
        match node.name().value() {
            "step" => spec.steps.push(parse_step(node)?),
            "timeout" => {
                let secs = node
                    .entries()
                    .iter()
                    .find(|e| e.name().is_none())
                    .and_then(|e| e.value().as_integer())
                    .and_then(|v| u64::try_from(v).ok())
                    .ok_or_else(|| ConfigError::InvalidValue {
                        field: "timeout".to_string(),
                        message: "expected a whole number of seconds".to_string(),
                    })?;
                spec.timeout = Some(Duration::from_secs(secs));
            }
            "tag" => spec.tags.extend(get_all_string_args(node)),
            _ => {} // Ignore unknown nodes
        }
    }

    Ok(spec)
}

fn parse_step(node: &KdlNode) -> ConfigResult<BuildStep> {
    let mut positional = get_all_string_args(node).into_iter();
    let name = positional
        .next()
        .ok_or_else(|| ConfigError::MissingField("step image".to_string()))?;

    let mut args: Vec<String> = positional.collect();
    let mut env = HashMap::new();
    let mut dir = None;

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "args" | "arg" => args.extend(get_all_string_args(child)),
                "env" => {
                    for entry in child.entries() {
                        if let (Some(key), Some(val)) = (entry.name(), entry.value().as_string())
                        {
                            env.insert(key.value().to_string(), val.to_string());
                        }
                    }
                }
                "dir" => dir = get_all_string_args(child).into_iter().next(),
                _ => {}
            }
        }
    }

    Ok(BuildStep {
        name,
        args,
        env,
        dir,
    })
}

fn get_all_string_args(node: &KdlNode) -> Vec<String> {
    node.entries()
        .iter()
        .filter(|e| e.name().is_none())
        .filter_map(|e| e.value().as_string())
        .map(|s| s.to_string())
        .collect()
}
