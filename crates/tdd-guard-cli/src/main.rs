//! TDD Guard hook binary.
//!
//! Reads one pre-tool-use payload from stdin and runs it through the guard:
//!
//! ```text
//! {"tool_name": "Write", "tool_input": {"file_path": "src/a.ts", "content": "..."}, "cwd": "/repo"}
//! ```
//!
//! Exit codes: 0 allows the tool call, 2 blocks it (reason on stderr),
//! 1 means the payload itself could not be read.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use serde::Deserialize;
use tdd_guard::TddGuardPlugin;
use tokio::io::AsyncReadExt;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Exit code that tells the host to block the tool call.
const EXIT_BLOCK: u8 = 2;

/// TDD Guard - blocks file edits that skip the red/green/refactor cycle
#[derive(Parser, Debug)]
#[command(name = "tdd-guard")]
#[command(about = "Pre-tool-use hook enforcing test-driven development")]
struct Args {
    /// Project root (defaults to the payload's `cwd`, then the current directory)
    #[arg(long)]
    project_root: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
struct HookPayload {
    tool_name: String,
    #[serde(default)]
    tool_input: serde_json::Value,
    #[serde(default)]
    cwd: Option<PathBuf>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    // Stdout belongs to the host protocol; diagnostics go to stderr.
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let args = Args::parse();

    let payload = match read_payload().await {
        Ok(p) => p,
        Err(e) => {
            eprintln!("tdd-guard: {e:#}");
            return ExitCode::FAILURE;
        }
    };

    let project_root = match args.project_root.or(payload.cwd) {
        Some(root) => root,
        None => match std::env::current_dir() {
            Ok(dir) => dir,
            Err(e) => {
                eprintln!("tdd-guard: cannot determine project root: {e}");
                return ExitCode::FAILURE;
            }
        },
    };

    tracing::debug!(tool = %payload.tool_name, root = %project_root.display(), "checking tool call");

    let plugin = TddGuardPlugin::new(project_root, None);
    match plugin
        .before_tool(&payload.tool_name, &payload.tool_input)
        .await
    {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{e}");
            ExitCode::from(EXIT_BLOCK)
        }
    }
}

async fn read_payload() -> anyhow::Result<HookPayload> {
    let mut input = String::new();
    tokio::io::stdin()
        .read_to_string(&mut input)
        .await
        .context("failed to read stdin")?;
    serde_json::from_str(input.trim()).context("invalid hook payload")
}
