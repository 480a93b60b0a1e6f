//! CLI for the HLS download engine.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use hlsdl_core::config;
use hlsdl_core::registry::TaskRegistry;

use commands::{
    run_add, run_cancel, run_list, run_pause, run_remove, run_resume, run_run, run_run_all,
    run_status, run_verify,
};

/// Top-level CLI for the HLS download engine.
#[derive(Debug, Parser)]
#[command(name = "hlsdl")]
#[command(about = "hlsdl: resilient HLS download engine", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Register a new download task.
    Add {
        /// Master or media playlist URL.
        url: String,
        /// Output file path for the merged result.
        output: String,
        /// Scheduling priority: low, normal, or high.
        #[arg(long, default_value = "normal")]
        priority: String,
    },

    /// Run a single task by id.
    Run {
        /// Task identifier.
        task_id: i64,
    },

    /// Run every pending task under the Task Manager's concurrency cap.
    RunAll,

    /// Show one task's status, or every task if no id is given.
    Status {
        /// Task identifier.
        task_id: Option<i64>,
    },

    /// Pause a task. It will not be admitted by the next `run-all`.
    Pause {
        /// Task identifier.
        task_id: i64,
    },

    /// Resume a paused task.
    Resume {
        /// Task identifier.
        task_id: i64,
    },

    /// Cancel a task.
    Cancel {
        /// Task identifier.
        task_id: i64,
    },

    /// Remove a task from the registry.
    Remove {
        /// Task identifier.
        task_id: i64,
        /// Also delete the task's output file.
        #[arg(long)]
        delete_output: bool,
    },

    /// List tasks, optionally filtered by status.
    List {
        /// Filter: pending, running, paused, completed, failed, or canceled.
        #[arg(long)]
        status: Option<String>,
    },

    /// Verify a merged output file's integrity.
    Verify {
        /// Path to the merged output file.
        output: String,
        /// Verification depth: checksum, content, or deep.
        #[arg(long, default_value = "checksum")]
        level: String,
    },
}

impl CliCommand {
    pub async fn run_from_args() -> Result<()> {
        let cli = Cli::parse();
        let cfg = config::load_or_init()?;
        tracing::debug!("loaded config: {:?}", cfg);
        let registry = TaskRegistry::open_default().await?;

        match cli.command {
            CliCommand::Add { url, output, priority } => {
                run_add(&registry, &url, &output, &priority).await?
            }
            CliCommand::Run { task_id } => run_run(&registry, &cfg, task_id).await?,
            CliCommand::RunAll => run_run_all(&registry, &cfg).await?,
            CliCommand::Status { task_id } => run_status(&registry, task_id).await?,
            CliCommand::Pause { task_id } => run_pause(&registry, task_id).await?,
            CliCommand::Resume { task_id } => run_resume(&registry, task_id).await?,
            CliCommand::Cancel { task_id } => run_cancel(&registry, task_id).await?,
            CliCommand::Remove { task_id, delete_output } => {
                run_remove(&registry, task_id, delete_output).await?
            }
            CliCommand::List { status } => run_list(&registry, status.as_deref()).await?,
            CliCommand::Verify { output, level } => run_verify(&cfg, &output, &level).await?,
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests;
