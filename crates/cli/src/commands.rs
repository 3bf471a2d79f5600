//! Subcommand implementations.

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context as _;
use devcraft_core::status::{download_path, TerminalOutcome};
use devcraft_core::types::JobHandle;
use devcraft_tracker::{
    ClientConfig, JobProgressOrchestrator, ProgressEvent, TrackerConfig, TransportClient,
};

/// Exit code reported when tracking is interrupted with Ctrl-C.
const EXIT_INTERRUPTED: u8 = 130;

/// Clients shared by every subcommand.
pub struct Context {
    client: TransportClient,
    orchestrator: JobProgressOrchestrator,
}

impl Context {
    pub fn new(client_config: &ClientConfig, tracker_config: TrackerConfig) -> anyhow::Result<Self> {
        let client = TransportClient::new(client_config).context("failed to build HTTP client")?;
        let orchestrator = JobProgressOrchestrator::for_client(&client, tracker_config);
        Ok(Self {
            client,
            orchestrator,
        })
    }
}

pub async fn analyze(ctx: &Context, description: &str) -> anyhow::Result<ExitCode> {
    let analysis = ctx
        .client
        .analyze(description)
        .await
        .context("analysis request failed")?;

    println!("Project type: {}", analysis.project_type);
    for suggestion in &analysis.suggestions {
        println!("  - {suggestion}");
    }
    Ok(ExitCode::SUCCESS)
}

pub async fn generate(
    ctx: &Context,
    name: &str,
    description: &str,
    output: Option<PathBuf>,
) -> anyhow::Result<ExitCode> {
    analyze(ctx, description).await?;

    let job = ctx
        .client
        .generate(name, description)
        .await
        .context("generation request failed")?;
    println!("Job submitted: {job}");

    follow(ctx, job, output).await
}

pub async fn track(
    ctx: &Context,
    job_id: &str,
    output: Option<PathBuf>,
) -> anyhow::Result<ExitCode> {
    let job = JobHandle::new(job_id).context("invalid job id")?;
    follow(ctx, job, output).await
}

pub async fn download(
    ctx: &Context,
    job_id: &str,
    output: Option<PathBuf>,
) -> anyhow::Result<ExitCode> {
    let job = JobHandle::new(job_id).context("invalid job id")?;
    let dest = output.unwrap_or_else(|| default_output(&job));
    fetch_artifact(ctx, &download_path(&job), &dest).await?;
    Ok(ExitCode::SUCCESS)
}

/// Stream a job's log to stdout until it finishes or Ctrl-C is pressed.
async fn follow(ctx: &Context, job: JobHandle, output: Option<PathBuf>) -> anyhow::Result<ExitCode> {
    let session = ctx.orchestrator.start_tracking(job.clone()).await?;

    ctx.orchestrator.on_log_chunk(&session, |chunk| {
        let mut stdout = std::io::stdout().lock();
        let _ = stdout.write_all(chunk.text.as_bytes());
        let _ = stdout.flush();
    });
    session.on_progress(|event| match event {
        ProgressEvent::StatusChanged { snapshot } => {
            eprintln!("[status] {}", snapshot.status);
        }
        ProgressEvent::LogChannelClosed { reason } => {
            tracing::debug!(?reason, "Log stream closed");
        }
        ProgressEvent::StatusQueryFailed {
            consecutive_failures,
            error,
        } => {
            eprintln!("[status] query failed ({consecutive_failures} in a row): {error}");
        }
    });

    let outcome = tokio::select! {
        outcome = session.wait() => outcome,
        _ = tokio::signal::ctrl_c() => {
            eprintln!("Interrupted, stopping tracking of {job}");
            ctx.orchestrator.cancel(&session).await;
            session.outcome()
        }
    };

    match outcome {
        Some(TerminalOutcome::Completed { artifact_location }) => {
            println!("Job {job} completed: {}", ctx.client.artifact_url(&artifact_location));
            if let Some(dest) = output {
                fetch_artifact(ctx, &artifact_location, &dest).await?;
            }
            Ok(ExitCode::SUCCESS)
        }
        Some(TerminalOutcome::Error { detail }) => {
            eprintln!("Job {job} failed: {detail}");
            Ok(ExitCode::FAILURE)
        }
        None => Ok(ExitCode::from(EXIT_INTERRUPTED)),
    }
}

async fn fetch_artifact(ctx: &Context, location: &str, dest: &std::path::Path) -> anyhow::Result<()> {
    let bytes = ctx
        .client
        .download(location, dest)
        .await
        .with_context(|| format!("failed to download {location}"))?;
    println!("Saved {} ({bytes} bytes)", dest.display());
    Ok(())
}

fn default_output(job: &JobHandle) -> PathBuf {
    PathBuf::from(format!("{job}.zip"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_output_named_after_job() {
        let job = JobHandle::new("job-42").unwrap();
        assert_eq!(default_output(&job), PathBuf::from("job-42.zip"));
    }
}
