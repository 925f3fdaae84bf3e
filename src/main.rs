use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use packsmith::config::PacksmithConfig;
use packsmith::generator::CommandModel;
use packsmith::ledger::{Ledger, LedgerHandle};
use packsmith::models::JobStatus;
use packsmith::orchestrator::Orchestrator;
use packsmith::progress::WebhookSink;
use packsmith::publisher::GitHubFactory;

#[derive(Parser)]
#[command(name = "packsmith")]
#[command(version, about = "Brief-to-repository generation pipeline")]
struct Cli {
    /// Path to the ledger database. Overrides packsmith.toml and PACKSMITH_DB.
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Command invoked for planning and generation; the prompt is appended
    /// as the final argument.
    #[arg(long, global = true, default_value = "claude -p")]
    model_cmd: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit a project brief and run the job to completion
    Submit {
        #[arg(long)]
        title: String,
        #[arg(long, default_value = "")]
        description: String,
        /// Comma-separated technologies the generated project should use
        #[arg(long, default_value = "")]
        tech: String,
        #[arg(long, default_value = "")]
        pack: String,
        /// URL that receives progress events as JSON POSTs
        #[arg(long)]
        callback_url: Option<String>,
    },
    /// Run an existing queued job
    Run {
        #[arg(long)]
        job: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = PacksmithConfig::load_or_default()?;
    if let Some(db) = cli.db {
        config.db_path = db;
    }

    let ledger = LedgerHandle::new(Ledger::open(&config.db_path)?);

    let mut tokens = cli.model_cmd.split_whitespace().map(str::to_string);
    let program = tokens
        .next()
        .context("--model-cmd must name a command to run")?;
    let model = Arc::new(CommandModel::new(program, tokens.collect()));

    let hosts = Arc::new(GitHubFactory::new(
        Some(config.github_api_base.clone()),
        config.request_timeout(),
    ));
    let sink = Arc::new(WebhookSink::new(config.request_timeout()));
    let orchestrator = Orchestrator::new(ledger.clone(), model, hosts, sink, config);

    match cli.command {
        Commands::Submit {
            title,
            description,
            tech,
            pack,
            callback_url,
        } => {
            let token = std::env::var("GITHUB_TOKEN")
                .context("GITHUB_TOKEN must be set to publish repositories")?;
            let job = ledger
                .call(move |l| {
                    let user = l.create_user(None, &token)?;
                    let project = l.create_project(&title, &description, &tech, &pack)?;
                    l.create_job(None, user.id, project.id, callback_url.as_deref())
                })
                .await?;
            info!("[packsmith] submitted job {}", job.id);
            finish(orchestrator.run_job(&job.id).await?, &job.id)
        }
        Commands::Run { job } => finish(orchestrator.run_job(&job).await?, &job),
    }
}

fn finish(status: JobStatus, job_id: &str) -> Result<()> {
    match status {
        JobStatus::Completed => {
            info!("[packsmith] job {} completed", job_id);
            Ok(())
        }
        other => anyhow::bail!("job {} ended as {}", job_id, other.as_str()),
    }
}
