//! Scriptable stand-in for a worker binary
//!
//! Accepts the `--repo <dir>` convention of the real workers, prints the
//! scripted lines and then behaves as told: exits with a code, lingers until
//! SIGTERM, or ignores SIGTERM and waits to be killed.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::signal::unix::{SignalKind, signal};

#[derive(Parser)]
#[command(name = "mock-worker")]
#[command(about = "Scriptable worker used by the harness integration tests")]
struct Args {
    /// Working directory handed over by the supervisor
    #[arg(long)]
    repo: PathBuf,

    /// Line to print (repeatable); prefix with `stderr:` to print to stderr
    #[arg(long = "line", value_name = "TEXT", allow_hyphen_values = true)]
    lines: Vec<String>,

    /// Delay before each line in milliseconds
    #[arg(long, default_value = "0")]
    line_delay_ms: u64,

    /// Exit with this code once all lines are printed
    #[arg(long)]
    exit_code: Option<i32>,

    /// Keep running after SIGTERM
    #[arg(long)]
    ignore_term: bool,

    /// Line to print when SIGTERM arrives (repeatable)
    #[arg(long = "on-term-line", value_name = "TEXT")]
    on_term_lines: Vec<String>,

    /// Write the process id to this file inside the repo directory
    #[arg(long)]
    pid_file: Option<String>,

    /// Abort unless this file exists inside the repo directory
    #[arg(long)]
    expect_config: Option<String>,
}

fn emit(line: &str) {
    match line.strip_prefix("stderr:") {
        Some(text) => eprintln!("{text}"),
        None => println!("{line}"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let mut term = signal(SignalKind::terminate()).context("installing SIGTERM handler")?;

    if let Some(name) = &args.pid_file {
        let path = args.repo.join(name);
        std::fs::write(&path, std::process::id().to_string())
            .with_context(|| format!("writing {}", path.display()))?;
    }

    if let Some(name) = &args.expect_config {
        if !args.repo.join(name).is_file() {
            println!("[ABORT] missing config file {name}");
            std::process::exit(1);
        }
        println!("loaded config {name}");
    }

    let delay = Duration::from_millis(args.line_delay_ms);
    for line in &args.lines {
        if !delay.is_zero() {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = term.recv(), if !args.ignore_term => {
                    shut_down(&args.on_term_lines);
                    return Ok(());
                }
            }
        }
        emit(line);
    }

    if let Some(code) = args.exit_code {
        std::process::exit(code);
    }

    loop {
        term.recv().await;
        if args.ignore_term {
            eprintln!("ignoring SIGTERM");
            continue;
        }
        shut_down(&args.on_term_lines);
        return Ok(());
    }
}

fn shut_down(lines: &[String]) {
    for line in lines {
        emit(line);
    }
}
