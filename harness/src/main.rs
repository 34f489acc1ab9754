//! Worker Harness Runner
//!
//! Runs a single worker under a janitor-managed session:
//! - Prepares its working directory and config file
//! - Launches it and waits for the requested output events
//! - Optionally keeps it running until Ctrl+C
//! - Stops it and removes the repo root

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::Parser;
use serde::Serialize;
use tokio::time::timeout;

use harness::{
    EventStatus, EventWaiter, HarnessError, HarnessResult, HarnessSettings, ProcessConfigBuilder, ProcessJanitor,
    ProcessSupervisor, SupervisorState, WorkerRole, flavors,
};

#[derive(Parser)]
#[command(name = "harness")]
#[command(about = "Run a worker binary and wait for events in its output")]
struct Args {
    /// Worker executable (defaults to the role's binary in WORKER_BUILD_DIR)
    #[arg(long)]
    exe: Option<PathBuf>,

    /// Use the presets of a worker role (client or injector)
    #[arg(long)]
    role: Option<WorkerRole>,

    /// Name of the worker's working directory and log prefix
    #[arg(long, default_value = "worker")]
    app_name: String,

    /// Shared directory for working directories (overrides HARNESS_REPO_ROOT)
    #[arg(long)]
    repo_root: Option<PathBuf>,

    /// Config file written into the working directory before launch
    #[arg(long, requires = "config_content")]
    config_file: Option<PathBuf>,

    /// Content of --config-file
    #[arg(long, requires = "config_file")]
    config_content: Option<String>,

    /// Output pattern to wait for (repeatable, waited on in order)
    #[arg(long = "wait", value_name = "PATTERN")]
    wait: Vec<String>,

    /// Overall timeout in seconds
    #[arg(long, default_value = "30")]
    timeout_secs: u64,

    /// Grace period between SIGTERM and SIGKILL (overrides HARNESS_GRACE_PERIOD_SECS)
    #[arg(long)]
    grace_secs: Option<u64>,

    /// Keep the worker running after the events were seen (until Ctrl+C)
    #[arg(long)]
    keep_running: bool,

    /// Print a JSON report of the observed events
    #[arg(long)]
    report: bool,

    /// Enable verbose tracing output
    #[arg(long)]
    verbose: bool,

    /// Extra arguments passed to the worker after `--repo <dir>`
    #[arg(last = true)]
    worker_args: Vec<String>,
}

#[derive(Serialize)]
struct RunReport {
    app_name: String,
    pid: Option<u32>,
    state: SupervisorState,
    exit_status: Option<String>,
    events: Vec<EventStatus>,
    output_tail: Vec<String>,
}

impl RunReport {
    fn from_supervisor(supervisor: &ProcessSupervisor) -> Self {
        Self {
            app_name: supervisor.app_name().to_string(),
            pid: supervisor.pid(),
            state: supervisor.state(),
            exit_status: supervisor.exit_status().map(|status| status.to_string()),
            events: supervisor.events().snapshot(),
            output_tail: supervisor.output_tail(),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut settings = HarnessSettings::from_env().context("loading harness settings")?;
    if let Some(repo_root) = &args.repo_root {
        settings = settings.with_repo_root(repo_root);
    }
    if let Some(grace) = args.grace_secs {
        settings = settings.with_grace_period(Duration::from_secs(grace));
    }
    settings = settings.with_process_timeout(Duration::from_secs(args.timeout_secs));

    let log_level = if args.verbose { "debug" } else { settings.log_level.as_str() };
    shared::init_tracing(Some(log_level));

    tracing::info!("🧪 Starting worker harness");
    tracing::info!(
        "App: {}, Waiting for: {:?}, Timeout: {}s",
        args.app_name,
        args.wait,
        args.timeout_secs
    );

    let builder = config_builder(&args, &settings)?;
    let config = builder.build().context("invalid worker configuration")?;

    let overall = Duration::from_secs(args.timeout_secs);
    let result = ProcessJanitor::session(settings.clone(), |janitor| async move {
        let supervisor = janitor.launch(config).await?;
        let waiter = EventWaiter::from_settings(&settings);

        match timeout(overall, waiter.await_all(&supervisor, &args.wait)).await {
            Ok(events) => {
                for event in events? {
                    tracing::info!("🎯 '{}' at line {}: {}", event.pattern, event.line_number, event.line);
                }
            }
            Err(_) => {
                let pending = supervisor.events().pending();
                tracing::error!("⏰ Timed out after {}s, still waiting for {:?}", args.timeout_secs, pending);
                return Err(HarnessError::EventTimeout {
                    app: supervisor.app_name().to_string(),
                    pattern: pending.into_iter().next().unwrap_or_default(),
                    timeout: overall,
                });
            }
        }

        if args.keep_running {
            keep_running(&supervisor, &waiter).await?;
        }

        supervisor.stop().await?;

        if args.report {
            let report = RunReport::from_supervisor(&supervisor);
            match serde_json::to_string_pretty(&report) {
                Ok(json) => println!("{json}"),
                Err(e) => tracing::warn!("⚠️ Failed to render report: {}", e),
            }
        }
        Ok(())
    })
    .await;

    match result {
        Ok(()) => {
            tracing::info!("🏁 Worker harness completed");
            Ok(())
        }
        Err(e) => {
            tracing::error!("❌ Worker harness failed: {}", e);
            Err(e.into())
        }
    }
}

fn config_builder(args: &Args, settings: &HarnessSettings) -> anyhow::Result<ProcessConfigBuilder> {
    let mut builder = match (args.role, &args.exe) {
        (Some(role), _) => flavors::worker(settings, role, &args.app_name)?,
        (None, Some(_)) => settings.process(&args.app_name),
        (None, None) => bail!("either --exe or --role is required"),
    };

    if let Some(exe) = &args.exe {
        builder = builder.executable(exe);
    }
    if let (Some(name), Some(content)) = (&args.config_file, &args.config_content) {
        builder = builder.config_file(name, content);
    }

    let extra = extra_patterns(builder.patterns(), &args.wait);
    Ok(builder.event_patterns(extra).args(&args.worker_args))
}

/// Waited-on patterns that still need a registry entry, each listed once
fn extra_patterns(registered: &[String], wait: &[String]) -> Vec<String> {
    let mut extra: Vec<String> = Vec::new();
    for pattern in wait {
        if !registered.contains(pattern) && !extra.contains(pattern) {
            extra.push(pattern.clone());
        }
    }
    extra
}

/// Block until Ctrl+C, failing early if the worker dies
async fn keep_running(supervisor: &ProcessSupervisor, waiter: &EventWaiter) -> HarnessResult<()> {
    tracing::info!("🔄 Keeping worker running (--keep-running flag set)");
    tracing::info!("Press Ctrl+C to stop");

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => return Ok(()),
            _ = tokio::time::sleep(waiter.poll_interval()) => {
                if let Some(error) = supervisor.failure() {
                    return Err(error);
                }
                supervisor.assert_alive()?;
            }
        }
    }
}
