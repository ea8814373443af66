//! Run inspection command.

use anyhow::{Context, Result};
use flowlink_config::Settings;
use flowlink_core::WorkflowId;
use flowlink_executor::FsArtifactStore;
use flowlink_scheduler::{LaunchStatus, RunRecordStore};
use std::sync::Arc;

use super::artifact_root;

pub async fn describe(workflow: &str, settings: &Settings, json: bool) -> Result<()> {
    let project = settings.project_id().context("No project configured")?;
    let store = Arc::new(FsArtifactStore::new(artifact_root(settings).join("store")));
    let record = RunRecordStore::new(store)
        .load(project, &WorkflowId::new(workflow))
        .await
        .with_context(|| format!("Failed to load run record of workflow {}", workflow))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&record)?);
        return Ok(());
    }

    println!("Workflow: {}", record.workflow_id());
    println!("Project: {}", record.project_id);
    println!("Topic: {}", record.run.topic);
    println!("Artifacts: {}", record.run.artifact_prefix);
    println!("Created: {}", record.created_at.format("%Y-%m-%d %H:%M:%S UTC"));
    println!("Updated: {}", record.updated_at.format("%Y-%m-%d %H:%M:%S UTC"));
    println!("\nNodes:");
    for (launch, node) in record.nodes.iter().zip(&record.spec.nodes) {
        let deps = node.dependency_names();
        let deps = if deps.is_empty() {
            String::new()
        } else {
            format!(" (after {})", deps.join(", "))
        };
        let status = match &launch.status {
            LaunchStatus::Pending => "○ not launched".to_string(),
            LaunchStatus::Submitted { run_id } => format!("▶ job {}", run_id),
            LaunchStatus::Failed { message } => format!("✗ {}", message),
        };
        println!("  {}{} - {}", launch.name, deps, status);
    }

    Ok(())
}
