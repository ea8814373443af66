//! Local workflow execution command.

use anyhow::{Context, Result};
use flowlink_config::{Settings, load_graph};
use flowlink_core::JobRunId;
use flowlink_core::job::{JobService, JobStatus};
use flowlink_scheduler::{OrchestratorConfig, WorkflowOrchestrator};
use std::collections::BTreeMap;
use std::path::Path;

use super::LocalBackends;

/// Launch a workflow on the local backends and wait for every node job.
///
/// When a node job fails, its dependents can never unblock, so the
/// remaining jobs are cancelled.
pub async fn start(config: &Path, settings: Settings) -> Result<()> {
    let spec = load_graph(config)
        .with_context(|| format!("Failed to parse workflow config: {}", config.display()))?;
    let orch_config =
        OrchestratorConfig::from_settings(&settings).context("No project configured")?;

    println!("Starting workflow: {}", config.display());
    println!("Nodes: {}", spec.len());

    let backends = LocalBackends::new(&settings);
    let orchestrator = WorkflowOrchestrator::new(
        backends.jobs.clone(),
        backends.bus.clone(),
        backends.store.clone(),
        orch_config,
    );

    let record = match orchestrator.start(&spec).await {
        Ok(record) => record,
        Err(e) => {
            backends.jobs.shutdown().await;
            return Err(e).context("Workflow failed to start");
        }
    };
    println!("Workflow ID: {}", record.workflow_id());
    println!("Artifacts: {}", record.run.artifact_prefix);
    println!("\n--- Waiting for node jobs ---\n");

    let mut pending: BTreeMap<String, JobRunId> = record
        .submitted()
        .map(|(name, id)| (name.to_string(), id.clone()))
        .collect();
    let mut results: BTreeMap<String, JobStatus> = BTreeMap::new();

    while !pending.is_empty() {
        let mut finished = Vec::new();
        for (name, run_id) in &pending {
            let status = backends.jobs.status(run_id).await?;
            if status.is_terminal() {
                finished.push((name.clone(), run_id.clone(), status));
            }
        }

        for (name, run_id, status) in finished {
            pending.remove(&name);
            if let Ok(log) = backends.jobs.fetch_log(&run_id).await {
                for line in log.lines() {
                    println!("  [{}] {}", name, line);
                }
            }
            if status.is_success() {
                println!("✓ Node '{}' completed successfully\n", name);
            } else {
                println!("✗ Node '{}' failed\n", name);
            }
            results.insert(name, status);
        }

        if results.values().any(|s| !s.is_success()) {
            break;
        }
        tokio::time::sleep(settings.wait_poll.interval).await;
    }

    backends.jobs.shutdown().await;
    for (name, run_id) in &pending {
        let status = backends.jobs.status(run_id).await?;
        results.insert(name.clone(), status);
    }

    println!("--- Node Summary ---");
    let mut success = true;
    for (name, status) in &results {
        let rendered = match status {
            JobStatus::Succeeded { .. } => "✓ succeeded".to_string(),
            JobStatus::Failed { message, .. } => format!("✗ failed: {}", message),
            JobStatus::Cancelled { .. } => "⊘ cancelled".to_string(),
            JobStatus::Pending => "○ pending".to_string(),
            JobStatus::Running { .. } => "▶ running".to_string(),
        };
        success &= status.is_success();
        println!("  {} - {}", name, rendered);
    }

    if success {
        println!("\n✓ Workflow succeeded!");
        Ok(())
    } else {
        anyhow::bail!("Workflow {} failed", record.workflow_id());
    }
}
