// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! cifix-sandbox entry point.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use colored::Colorize;

use cifix_sandbox::config::load_config;
use cifix_sandbox::credentials::sanitize_file_name;
use cifix_sandbox::telemetry::{init_telemetry, TelemetryConfig};
use cifix_sandbox::{Job, JobRequest, JobStatus, SandboxProcessor, VERSION};

/// Runs automated code-fix jobs in throwaway workspaces.
#[derive(Parser)]
#[command(name = "cifix-sandbox")]
#[command(author, version, about = "Runs automated code-fix jobs in throwaway workspaces", long_about = None)]
struct Cli {
    /// Configuration file (JSON or YAML)
    #[arg(short, long, env = "CIFIX_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Show debug output and a metrics report at exit
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one job descriptor to completion
    Run {
        /// Job descriptor (JSON)
        job: PathBuf,

        /// Directory for the patch and result archive
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// Status poll interval in milliseconds
        #[arg(long, default_value_t = 1000)]
        poll_ms: u64,
    },

    /// Show configuration
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },

    /// Show version information
    Version,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show the resolved configuration (secrets redacted)
    Show,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let telemetry = if cli.debug {
        TelemetryConfig::debug()
    } else {
        TelemetryConfig::default()
    };
    let _guard = init_telemetry(&telemetry)?;

    match cli.command {
        Commands::Run {
            job,
            output_dir,
            poll_ms,
        } => {
            let status = run_job(
                cli.config.as_deref(),
                &job,
                output_dir.as_deref(),
                Duration::from_millis(poll_ms.max(10)),
            )
            .await?;
            if status != JobStatus::Completed {
                anyhow::bail!("job finished with status {status}");
            }
        }
        Commands::Config { action } => match action {
            Some(ConfigAction::Show) | None => {
                let config = load_config(cli.config.as_deref())?;
                println!("{config:#?}");
            }
        },
        Commands::Version => {
            println!("cifix-sandbox {VERSION}");
        }
    }
    Ok(())
}

async fn run_job(
    config_file: Option<&Path>,
    job_file: &Path,
    output_dir: Option<&Path>,
    poll: Duration,
) -> anyhow::Result<JobStatus> {
    let config = Arc::new(load_config(config_file)?);
    let processor = SandboxProcessor::from_config(config)?;

    let body = tokio::fs::read_to_string(job_file)
        .await
        .with_context(|| format!("reading {}", job_file.display()))?;
    let request: JobRequest = serde_json::from_str(&body)
        .with_context(|| format!("parsing job descriptor {}", job_file.display()))?;

    let submitted = processor.submit(request).await;
    eprintln!(
        "{} Job {} submitted",
        "→".cyan(),
        submitted.id.bright_white().bold()
    );

    let job = processor
        .wait(&submitted.id, poll)
        .await
        .with_context(|| format!("job {} disappeared", submitted.id))?;

    println!("{}", serde_json::to_string_pretty(&job.view())?);

    if let Some(dir) = output_dir {
        write_outputs(&job, dir).await?;
    }

    match job.status {
        JobStatus::Completed => eprintln!(
            "{} Job completed, {} files changed",
            "✓".green(),
            job.output.changed_files.len()
        ),
        _ => eprintln!(
            "{} Job failed: {}",
            "✗".red(),
            job.error.as_deref().unwrap_or("unknown error").red()
        ),
    }
    if let Some(url) = &job.output.pull_request_url {
        eprintln!("Pull request: {}", url.bright_blue());
    }
    Ok(job.status)
}

async fn write_outputs(job: &Job, dir: &Path) -> anyhow::Result<()> {
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("creating {}", dir.display()))?;

    if let Some(patch) = job.output.patch.as_deref().filter(|p| !p.is_empty()) {
        let stem = sanitize_file_name(&job.id).unwrap_or_else(|| "job".to_string());
        let path = dir.join(format!("{stem}.patch"));
        tokio::fs::write(&path, patch).await?;
        eprintln!("Patch written to {}", path.display().to_string().bright_white());
    }
    if let Some(archive) = &job.output.result_archive {
        let name = sanitize_file_name(&archive.name).unwrap_or_else(|| "result.zip".to_string());
        let path = dir.join(name);
        tokio::fs::write(&path, &archive.bytes).await?;
        eprintln!(
            "Result archive written to {}",
            path.display().to_string().bright_white()
        );
    }
    Ok(())
}
