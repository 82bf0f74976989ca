//! `shuttle` CLI entry-point.
//!
//! Available sub-commands:
//! - `run`: run a JSON task plan and print every state change.
//! - `validate`: check a plan's labels and dependency graph without running it.

mod plan;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use shuttle_core::{
    DispatchConfig, DispatcherBuilder, QueueMode, QueueOptions, StateChange, TaskQueue,
    TracingObserver,
};

use crate::plan::Plan;

/// Environment variable overriding the configured log filter.
const LOG_ENV: &str = "SHUTTLE_LOG";

#[derive(Parser)]
#[command(name = "shuttle", about = "Cooperative task dispatcher", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a task plan to completion.
    Run {
        /// Path to the plan JSON file.
        plan: PathBuf,

        /// TOML dispatcher configuration.
        #[arg(long)]
        config: Option<PathBuf>,

        #[arg(long, value_enum)]
        mode: Option<ModeArg>,

        /// Maximum number of tasks running at once.
        #[arg(long)]
        concurrency: Option<usize>,

        /// Label of a task to cancel. Repeatable.
        #[arg(long = "cancel", value_name = "LABEL")]
        cancel: Vec<String>,

        /// Delay before `--cancel` takes effect. 0 cancels before anything starts.
        #[arg(long, default_value_t = 0)]
        cancel_after_ms: u64,
    },
    /// Validate a plan without running it.
    Validate {
        /// Path to the plan JSON file.
        plan: PathBuf,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ModeArg {
    Serial,
    Concurrent,
}

impl From<ModeArg> for QueueMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Serial => QueueMode::Serial,
            ModeArg::Concurrent => QueueMode::Concurrent,
        }
    }
}

fn init_logging(level: &str) -> anyhow::Result<()> {
    let filter = match EnvFilter::try_from_env(LOG_ENV) {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(level)
            .with_context(|| format!("invalid log level {level:?}"))?,
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            plan,
            config,
            mode,
            concurrency,
            cancel,
            cancel_after_ms,
        } => {
            let mut config = match config {
                Some(path) => DispatchConfig::load(&path)?,
                None => DispatchConfig::default(),
            };
            if let Some(mode) = mode {
                config.mode = mode.into();
            }
            if let Some(n) = concurrency {
                config.max_concurrency = n;
                config.workers = config.workers.max(n);
            }
            init_logging(&config.log.level)?;
            run(Plan::load(&plan)?, config, cancel, cancel_after_ms).await
        }
        Command::Validate { plan } => {
            init_logging(&DispatchConfig::default().log.level)?;
            validate(&Plan::load(&plan)?)
        }
    }
}

async fn run(
    plan: Plan,
    config: DispatchConfig,
    cancel: Vec<String>,
    cancel_after_ms: u64,
) -> anyhow::Result<()> {
    let dispatcher = DispatcherBuilder::from_config(config)
        .start_paused()
        .observer(Arc::new(TracingObserver))
        .observer(Arc::new(|change: &StateChange| {
            match serde_json::to_string(change) {
                Ok(line) => println!("{line}"),
                Err(err) => warn!(%err, "failed to encode state change"),
            }
        }))
        .build()?;

    let submitted = plan.submit_to(dispatcher.queue())?;
    let mut targets = Vec::with_capacity(cancel.len());
    for label in &cancel {
        match submitted.id_of(label) {
            Some(id) => targets.push(id),
            None => bail!("--cancel names unknown task {label:?}"),
        }
    }

    if cancel_after_ms == 0 {
        for &id in &targets {
            dispatcher.cancel(id)?;
        }
    } else {
        let queue = dispatcher.queue().clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(cancel_after_ms)).await;
            for id in targets {
                match queue.cancel(id) {
                    Ok(outcome) => info!(task_id = %id, ?outcome, "cancel applied"),
                    Err(err) => warn!(task_id = %id, %err, "cancel failed"),
                }
            }
        });
    }

    info!(tasks = plan.tasks.len(), "running plan");
    dispatcher.resume();
    tokio::select! {
        _ = dispatcher.drain() => {}
        _ = tokio::signal::ctrl_c() => {
            warn!("interrupted, cancelling remaining tasks");
        }
    }
    // no-op after a completed drain
    dispatcher.shutdown().await;

    let counts = dispatcher.counts();
    println!("{}", serde_json::to_string(&counts)?);
    if counts.failed > 0 {
        bail!("{} task(s) failed", counts.failed);
    }
    Ok(())
}

fn validate(plan: &Plan) -> anyhow::Result<()> {
    let queue = TaskQueue::new(QueueOptions {
        start_paused: true,
        ..QueueOptions::default()
    })?;
    let submitted = plan.submit_to(&queue)?;
    println!(
        "plan is valid: {} task(s), {} ready at start",
        submitted.handles.len(),
        queue.counts().ready
    );
    Ok(())
}
