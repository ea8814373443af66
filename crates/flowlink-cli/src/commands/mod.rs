//! CLI command implementations.

pub mod describe;
pub mod start;

use anyhow::{Context, Result};
use flowlink_config::jobspec::load_node_job_spec;
use flowlink_config::settings::SETTINGS_FILE;
use flowlink_config::{Settings, load_graph, load_settings, validate as validate_graph};
use flowlink_executor::{FsArtifactStore, LocalJobService, MemoryBus};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Data directory of the local backends when the settings name none.
pub const DEFAULT_ARTIFACT_ROOT: &str = ".flowlink";

/// Load settings from `explicit`, else from `flowlink.kdl` next to the
/// workflow config, else from the current directory, else use defaults.
/// A `project` given on the command line wins over the file.
pub fn resolve_settings(
    explicit: Option<&Path>,
    config: Option<&Path>,
    project: Option<String>,
) -> Result<Settings> {
    let candidate = match explicit {
        Some(path) => Some(path.to_path_buf()),
        None => config
            .and_then(Path::parent)
            .map(|dir| dir.join(SETTINGS_FILE))
            .filter(|p| p.is_file())
            .or_else(|| Some(PathBuf::from(SETTINGS_FILE)).filter(|p| p.is_file())),
    };

    let mut settings = match candidate {
        Some(path) => load_settings(&path)
            .with_context(|| format!("Failed to load settings: {}", path.display()))?,
        None => Settings::default(),
    };
    if project.is_some() {
        settings.project = project;
    }
    Ok(settings)
}

/// Local bus, artifact store and job service configured from `settings`.
pub struct LocalBackends {
    pub bus: Arc<MemoryBus>,
    pub store: Arc<FsArtifactStore>,
    pub jobs: Arc<LocalJobService>,
}

impl LocalBackends {
    pub fn new(settings: &Settings) -> Self {
        let root = artifact_root(settings);
        let bus = Arc::new(MemoryBus::new());
        let store = Arc::new(FsArtifactStore::new(root.join("store")));
        let jobs = Arc::new(
            LocalJobService::new(bus.clone(), store.clone(), root.join("jobs"))
                .with_images(settings.images.clone())
                .with_wait_poll(settings.wait_poll)
                .with_batch_size(settings.pull_batch_size),
        );
        Self { bus, store, jobs }
    }
}

pub fn artifact_root(settings: &Settings) -> PathBuf {
    settings
        .artifact_root
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_ARTIFACT_ROOT))
}

pub fn validate(config: &Path, settings: &Settings) -> Result<()> {
    let spec = load_graph(config)
        .with_context(|| format!("Failed to parse workflow config: {}", config.display()))?;
    let order = validate_graph(&spec).context("Invalid workflow graph")?;

    let base_dir = spec.base_dir();
    for node in &spec.nodes {
        load_node_job_spec(&base_dir, &node.job_spec_path).with_context(|| {
            format!(
                "Failed to load job spec {} of node {}",
                node.job_spec_path, node.name
            )
        })?;
    }

    println!("Configuration is valid");
    println!("Nodes: {}", spec.len());
    println!("Order: {}", order.join(" -> "));
    match settings.project.as_deref() {
        Some(project) => println!("Project: {}", project),
        None => println!("Project: (not set)"),
    }
    Ok(())
}

pub fn wait(workflow: &str) {
    println!("Waiting for {}", workflow);
    println!("Wait not yet implemented");
}

pub fn retry(workflow: &str, node: &str) {
    println!("Retrying {} in {}", node, workflow);
    println!("Retry not yet implemented");
}

pub fn skip(workflow: &str, node: &str) {
    println!("Skipping {} in {}", node, workflow);
    println!("Skip not yet implemented");
}
