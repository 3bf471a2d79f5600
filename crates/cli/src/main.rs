//! `devcraft` -- command-line client for the DevCraft generation API.
//!
//! Submits project descriptions, follows generation jobs through their
//! log stream and status endpoint, and downloads the finished artifact.
//!
//! # Environment variables
//!
//! | Variable                        | Default                 | Description                      |
//! |---------------------------------|-------------------------|----------------------------------|
//! | `DEVCRAFT_API_URL`              | `http://localhost:8000` | HTTP base URL of the API         |
//! | `DEVCRAFT_WS_URL`               | derived from API URL    | WebSocket base URL               |
//! | `DEVCRAFT_REQUEST_TIMEOUT_SECS` | `30`                    | Per-request HTTP timeout         |
//! | `DEVCRAFT_POLL_INTERVAL_MS`     | `1000`                  | Delay between status queries     |
//! | `DEVCRAFT_MAX_POLL_FAILURES`    | `5`                     | Failed queries before giving up  |
//!
//! Command-line flags take precedence over the environment.

mod commands;

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use devcraft_tracker::{ClientConfig, TrackerConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "devcraft")]
#[command(about = "Generate projects with DevCraft and follow their progress", long_about = None)]
struct Cli {
    /// HTTP base URL of the DevCraft API
    #[arg(long, global = true)]
    api_url: Option<String>,

    /// WebSocket base URL (derived from the API URL if omitted)
    #[arg(long, global = true)]
    ws_url: Option<String>,

    /// Delay between status queries in milliseconds
    #[arg(long, global = true)]
    poll_interval_ms: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Classify a project description without generating anything
    Analyze {
        /// Natural-language project description
        description: String,
    },

    /// Analyze, submit and follow a new generation job
    Generate {
        /// Name of the project to generate
        #[arg(long)]
        name: String,

        /// Natural-language project description
        description: String,

        /// Download the artifact here once the job completes
        #[arg(long, short)]
        output: Option<PathBuf>,
    },

    /// Follow an existing job until it finishes
    Track {
        /// Job identifier returned by `generate`
        job_id: String,

        /// Download the artifact here once the job completes
        #[arg(long, short)]
        output: Option<PathBuf>,
    },

    /// Download the artifact of a completed job
    Download {
        /// Job identifier returned by `generate`
        job_id: String,

        /// Destination file (defaults to `<job_id>.zip`)
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "devcraft=info,devcraft_tracker=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %e, "Command failed");
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let client_config = client_config(&cli)?;
    let tracker_config = tracker_config(&cli)?;

    tracing::debug!(
        api_url = %client_config.api_url,
        ws_url = %client_config.ws_url,
        poll_interval_ms = tracker_config.poll_interval.as_millis() as u64,
        "Configuration loaded",
    );

    let ctx = commands::Context::new(&client_config, tracker_config)?;

    match cli.command {
        Command::Analyze { description } => commands::analyze(&ctx, &description).await,
        Command::Generate {
            name,
            description,
            output,
        } => commands::generate(&ctx, &name, &description, output).await,
        Command::Track { job_id, output } => commands::track(&ctx, &job_id, output).await,
        Command::Download { job_id, output } => commands::download(&ctx, &job_id, output).await,
    }
}

fn client_config(cli: &Cli) -> anyhow::Result<ClientConfig> {
    let mut config = ClientConfig::from_env().context("invalid client configuration")?;

    if let Some(api_url) = &cli.api_url {
        let request_timeout = config.request_timeout;
        config = ClientConfig::for_api_url(api_url);
        config.request_timeout = request_timeout;
    }
    if let Some(ws_url) = &cli.ws_url {
        config.ws_url = ws_url.trim_end_matches('/').to_string();
    }

    Ok(config)
}

fn tracker_config(cli: &Cli) -> anyhow::Result<TrackerConfig> {
    let mut config = TrackerConfig::from_env().context("invalid tracking configuration")?;

    if let Some(ms) = cli.poll_interval_ms {
        anyhow::ensure!(ms > 0, "--poll-interval-ms must be greater than zero");
        config.poll_interval = Duration::from_millis(ms);
    }

    Ok(config)
}
