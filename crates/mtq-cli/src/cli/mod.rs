//! CLI for the MTQ media transfer queue.

mod commands;
mod control_socket;

use anyhow::Result;
use clap::{Parser, Subcommand};
use clap_complete::Shell;
use mtq_core::config::{self, MtqConfig};
use mtq_core::queue_store::QueueStore;
use mtq_core::task::TaskStatus;

use commands::{
    run_add, run_cancel, run_completions, run_history, run_pause, run_pending, run_queue,
    run_resume, run_retry, run_stats, run_status, AddArgs, HistoryArgs, RunArgs,
};

/// Top-level CLI for the MTQ media transfer queue.
#[derive(Debug, Parser)]
#[command(name = "mtq")]
#[command(about = "MTQ: persistent media transfer queue with retries, pause/cancel and live progress", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Queue items of a source collection.
    Add {
        /// Source collection id (may be negative).
        #[arg(allow_negative_numbers = true)]
        collection: i64,
        /// Item ids inside the collection.
        #[arg(required = true, allow_negative_numbers = true)]
        items: Vec<i64>,
        /// Dequeue priority; higher runs first (default from config).
        #[arg(long, allow_negative_numbers = true)]
        priority: Option<i64>,
        /// Attempt budget per item (default from config).
        #[arg(long, value_name = "N")]
        max_retries: Option<u32>,
        /// Re-queue items that already reached a terminal status.
        #[arg(long)]
        reset: bool,
    },

    /// Drain the queue with the built-in simulated transfer, printing progress.
    Run {
        /// Concurrent transfers (default: max_parallel_transfers from config).
        #[arg(long, value_name = "N")]
        jobs: Option<usize>,
        /// Simulated size of each item in bytes.
        #[arg(long, default_value = "1048576", value_name = "BYTES")]
        item_size: u64,
        /// Simulated transfer rate per item in bytes per second.
        #[arg(long, default_value = "4194304", value_name = "BYTES_PER_SEC")]
        rate: u64,
    },

    /// Show queue counts and, if a run is active, live progress.
    Status {
        /// Print machine-readable JSON.
        #[arg(long)]
        json: bool,
    },

    /// Pause the active run (in-flight transfers finish, nothing new starts).
    Pause,

    /// Resume a paused run.
    Resume,

    /// Cancel the active run, or all pending tasks if no run is active.
    Cancel,

    /// Re-queue a terminal task with a fresh retry budget.
    Retry {
        #[arg(allow_negative_numbers = true)]
        collection: i64,
        #[arg(allow_negative_numbers = true)]
        item: i64,
    },

    /// List tasks waiting for a (re)try with their last error.
    Pending,

    /// Show terminal outcomes, newest first.
    History {
        #[arg(long, allow_negative_numbers = true)]
        collection: Option<i64>,
        /// completed, failed, skipped or cancelled.
        #[arg(long)]
        status: Option<TaskStatus>,
        #[arg(long, default_value = "1")]
        page: u32,
        #[arg(long, default_value = "20")]
        page_size: u32,
    },

    /// Show daily success/failure/skip counts and bytes.
    Stats {
        #[arg(long, allow_negative_numbers = true)]
        collection: Option<i64>,
    },

    /// Print shell completions to stdout.
    Completions {
        shell: Shell,
    },
}

async fn open_store(cfg: &MtqConfig) -> Result<QueueStore> {
    let store = match &cfg.database_path {
        Some(path) => QueueStore::open_at(path).await?,
        None => QueueStore::open_default().await?,
    };
    Ok(store.with_storage_retry(cfg.storage_retry()))
}

impl CliCommand {
    pub async fn run_from_args() -> Result<()> {
        let cli = Cli::parse();
        if let CliCommand::Completions { shell } = cli.command {
            run_completions(shell);
            return Ok(());
        }

        let cfg = config::load_or_init()?;
        tracing::debug!("loaded config: {:?}", cfg);
        let store = open_store(&cfg).await?;

        match cli.command {
            CliCommand::Add {
                collection,
                items,
                priority,
                max_retries,
                reset,
            } => {
                let args = AddArgs {
                    collection,
                    items,
                    priority: priority.unwrap_or(cfg.default_priority),
                    max_retries: max_retries.unwrap_or(cfg.default_max_retries),
                    reset,
                };
                run_add(&store, &args).await?
            }
            CliCommand::Run {
                jobs,
                item_size,
                rate,
            } => {
                let args = RunArgs {
                    jobs,
                    item_size,
                    rate,
                };
                run_queue(store, &cfg, &args).await?
            }
            CliCommand::Status { json } => run_status(&store, json).await?,
            CliCommand::Pause => run_pause().await?,
            CliCommand::Resume => run_resume().await?,
            CliCommand::Cancel => run_cancel(&store).await?,
            CliCommand::Retry { collection, item } => run_retry(&store, collection, item).await?,
            CliCommand::Pending => run_pending(&store).await?,
            CliCommand::History {
                collection,
                status,
                page,
                page_size,
            } => {
                let args = HistoryArgs {
                    collection,
                    status,
                    page,
                    page_size,
                };
                run_history(&store, &args).await?
            }
            CliCommand::Stats { collection } => run_stats(&store, collection).await?,
            CliCommand::Completions { .. } => {}
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests;
