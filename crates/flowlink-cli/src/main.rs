//! flowlink CLI tool.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "flowlink")]
#[command(about = "Run dependent build jobs as one workflow", long_about = None)]
struct Cli {
    /// Project that owns jobs, topics and the artifact bucket
    #[arg(long, env = "FLOWLINK_PROJECT", global = true)]
    project: Option<String>,

    /// Settings file [default: flowlink.kdl next to the workflow config]
    #[arg(long, env = "FLOWLINK_SETTINGS", global = true)]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Launch a workflow and wait for its jobs
    Start {
        /// Path to the workflow config
        config: PathBuf,
    },
    /// Check a workflow config and its job specs without launching anything
    Validate {
        /// Path to the workflow config
        config: PathBuf,
    },
    /// Show the recorded state of a workflow run
    Describe {
        /// Workflow ID
        workflow: String,
        /// Print the raw run record
        #[arg(long)]
        json: bool,
    },
    /// Wait for a workflow run to finish
    Wait {
        /// Workflow ID
        workflow: String,
    },
    /// Relaunch a failed node
    Retry {
        /// Workflow ID
        workflow: String,
        /// Node name
        node: String,
    },
    /// Mark a node as completed without running it
    Skip {
        /// Workflow ID
        workflow: String,
        /// Node name
        node: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Start { config } => {
            let settings =
                commands::resolve_settings(cli.settings.as_deref(), Some(config.as_path()), cli.project)?;
            commands::start::start(&config, settings).await?;
        }
        Commands::Validate { config } => {
            let settings =
                commands::resolve_settings(cli.settings.as_deref(), Some(config.as_path()), cli.project)?;
            commands::validate(&config, &settings)?;
        }
        Commands::Describe { workflow, json } => {
            let settings = commands::resolve_settings(cli.settings.as_deref(), None, cli.project)?;
            commands::describe::describe(&workflow, &settings, json).await?;
        }
        Commands::Wait { workflow } => {
            commands::wait(&workflow);
        }
        Commands::Retry { workflow, node } => {
            commands::retry(&workflow, &node);
        }
        Commands::Skip { workflow, node } => {
            commands::skip(&workflow, &node);
        }
    }

    Ok(())
}
