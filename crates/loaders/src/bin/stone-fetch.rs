//! Fetch URLs and files through the priority scheduler.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use parking_lot::Mutex;
use serde::Serialize;
use stone_core::config::load_dotenv;
use stone_core::{StoneConfig, StoneError};
use stone_loaders::{GenericLoadersContext, LoadersContext};
use stone_messaging::ReceiverHandle;
use stone_oracle::command::{HttpCommand, ReadFileCommand};
use stone_oracle::{Command, HttpSuccess, OracleCommandException, ReadFileSuccess};
use tracing::{info, warn};

/// Download URLs or read files using the loaders scheduler.
#[derive(Parser, Debug)]
#[command(name = "stone-fetch", about = "Fetch resources through the oracle scheduler")]
struct Args {
    /// URLs (http:// or https://) or file paths to fetch
    #[arg(required = true)]
    targets: Vec<String>,

    /// Path to a TOML configuration file (environment only if not set)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Scheduling priority of every target; lower is more urgent
    #[arg(long, default_value = "0", allow_hyphen_values = true)]
    priority: i32,

    /// Worker thread count override
    #[arg(long)]
    threads: Option<u32>,

    /// Base directory for relative file paths
    #[arg(long)]
    root: Option<PathBuf>,

    /// HTTP timeout in seconds
    #[arg(long, default_value = "60")]
    timeout: u64,

    /// Print the final report as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Clone, Serialize)]
struct Outcome {
    target: String,
    ok: bool,
    bytes: usize,
    detail: String,
}

/// Collects one outcome per completed command.
#[derive(Default)]
struct Report {
    outcomes: Mutex<Vec<Outcome>>,
}

impl Report {
    fn push(&self, outcome: Outcome) {
        if outcome.ok {
            info!(item = %outcome.target, bytes = outcome.bytes, "fetched");
        } else {
            warn!(item = %outcome.target, detail = %outcome.detail, "failed");
        }
        self.outcomes.lock().push(outcome);
    }

    fn on_http(&self, message: &HttpSuccess) -> Result<(), StoneError> {
        self.push(Outcome {
            target: message.origin.caller_name().to_string(),
            ok: true,
            bytes: message.answer.len(),
            detail: format!("HTTP {}", message.status),
        });
        Ok(())
    }

    fn on_file(&self, message: &ReadFileSuccess) -> Result<(), StoneError> {
        self.push(Outcome {
            target: message.origin.caller_name().to_string(),
            ok: true,
            bytes: message.content.len(),
            detail: "file".into(),
        });
        Ok(())
    }

    fn on_failure(&self, message: &OracleCommandException) -> Result<(), StoneError> {
        self.push(Outcome {
            target: message.origin.caller_name().to_string(),
            ok: false,
            bytes: 0,
            detail: format!("{}: {}", message.exception.code, message.exception.details),
        });
        Ok(())
    }
}

fn load_config(args: &Args) -> Result<StoneConfig> {
    load_dotenv();
    let mut config = match &args.config {
        Some(path) => StoneConfig::from_file(path)
            .with_context(|| format!("failed to load configuration from {}", path.display()))?,
        None => StoneConfig::from_env().context("failed to load configuration from environment")?,
    };
    if let Some(threads) = args.threads {
        config.oracle.threads = threads;
    }
    if let Some(root) = &args.root {
        config.oracle.root_directory = root.clone();
    }
    config.validate()?;
    Ok(config)
}

fn command_for(target: &str, timeout: u64) -> Command {
    let command = if target.starts_with("http://") || target.starts_with("https://") {
        Command::new(HttpCommand::new(target).with_timeout(timeout))
    } else {
        Command::new(ReadFileCommand::new(target))
    };
    command.with_caller_name(target)
}

fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = Args::parse();
    let config = load_config(&args)?;
    config.log_summary();

    let context = GenericLoadersContext::from_config(&config).context("failed to create loaders context")?;
    let report = Arc::new(Report::default());
    {
        let lock = context.lock();
        let observable = lock.oracle_observable();
        observable.register(&report, Report::on_http);
        observable.register(&report, Report::on_file);
        observable.register(&report, Report::on_failure);
    }

    context.start_oracle().context("failed to start oracle")?;

    let started = Instant::now();
    {
        let lock = context.lock();
        for target in &args.targets {
            lock.schedule(
                ReceiverHandle::new(&report),
                args.priority,
                command_for(target, args.timeout),
            );
        }
    }

    context.wait_until_complete();
    context.stop_oracle();

    let statistics = context.statistics();
    let outcomes = report.outcomes.lock().clone();
    let failures = outcomes.iter().filter(|o| !o.ok).count();

    if args.json {
        let document = serde_json::json!({
            "outcomes": outcomes,
            "statistics": statistics,
            "elapsed_ms": started.elapsed().as_millis() as u64,
        });
        println!("{}", serde_json::to_string_pretty(&document)?);
    } else {
        for outcome in &outcomes {
            let status = if outcome.ok { "ok" } else { "FAILED" };
            println!("{status:>6}  {:>10}  {}  ({})", outcome.bytes, outcome.target, outcome.detail);
        }
        println!(
            "scheduled {}, processed {}, {} failed, {:.2?}",
            statistics.scheduled,
            statistics.processed,
            failures,
            started.elapsed()
        );
    }

    Ok(if failures == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
