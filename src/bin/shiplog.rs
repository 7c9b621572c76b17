//! shiplog CLI: run the service, manage scan jobs, or scan inline.

use clap::{Parser, Subcommand, ValueEnum};
use secrecy::ExposeSecret;
use shiplog_rs::config::Config;
use shiplog_rs::context::Context;
use shiplog_rs::db::{Db, SCAN_QUEUE};
use shiplog_rs::docs::{DocumentSource, GoogleDocsClient, Unconfigured};
use shiplog_rs::engine::{ControlConfig, ControlPlane};
use shiplog_rs::github::GitHubClient;
use shiplog_rs::model::Environment;
use shiplog_rs::model::job::{JobId, JobSpec, JobState};
use shiplog_rs::scan::{NoProgress, run_job};
use shiplog_rs::server::{AppState, router};
use shiplog_rs::telemetry::{TelemetryConfig, init_telemetry};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "shiplog", about = "Deployment ledger for GitHub repositories")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP server and the job control plane
    Serve {
        /// Maximum scan jobs running at once
        #[arg(long, default_value_t = 4)]
        max_concurrent: usize,
    },
    /// Scan job operations
    Job {
        #[command(subcommand)]
        action: JobAction,
    },
    /// Run one scan inline, without the queue
    Scan {
        #[command(subcommand)]
        target: ScanTarget,
    },
}

#[derive(Subcommand)]
enum JobAction {
    /// Queue a scan job
    Submit {
        #[command(subcommand)]
        target: ScanTarget,
    },
    /// List recent jobs
    List {
        /// Filter by state
        #[arg(long, value_enum)]
        state: Option<StateArg>,
        /// Maximum jobs to show
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
    /// Show a job
    Show {
        /// Job ID (full UUID or prefix)
        id: String,
    },
}

#[derive(Subcommand, Clone)]
enum ScanTarget {
    /// Backfill commits and workflow deployments of one repository
    Dev {
        /// `owner/name` or repository URL
        repo_ref: String,
    },
    /// Correlate the UAT release log
    Uat {
        /// Document id; defaults to UAT_DOC_ID
        #[arg(long)]
        doc_id: Option<String>,
    },
    /// Correlate the production release log
    Prod {
        /// Document id; defaults to PROD_DOC_ID
        #[arg(long)]
        doc_id: Option<String>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum StateArg {
    Queued,
    Active,
    Completed,
    Failed,
}

impl From<StateArg> for JobState {
    fn from(s: StateArg) -> Self {
        match s {
            StateArg::Queued => JobState::Queued,
            StateArg::Active => JobState::Active,
            StateArg::Completed => JobState::Completed,
            StateArg::Failed => JobState::Failed,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = Config::from_env()?;

    match cli.command {
        Command::Serve { max_concurrent } => cmd_serve(config, max_concurrent).await,
        Command::Job { action } => {
            let db = Db::connect(config.database_url.expose_secret()).await?;
            db.migrate().await?;
            db.create_queue(SCAN_QUEUE).await?;

            match action {
                JobAction::Submit { target } => cmd_job_submit(&db, &config, target).await,
                JobAction::List { state, limit } => {
                    cmd_job_list(&db, state.map(Into::into), limit).await
                }
                JobAction::Show { id } => cmd_job_show(&db, id).await,
            }
        }
        Command::Scan { target } => cmd_scan(config, target).await,
    }
}

/// Wire the production collaborators around a ledger store.
fn build_context(config: &Config, db: Arc<Db>) -> anyhow::Result<Context> {
    let scm = GitHubClient::new(&config.github_api_url, config.github_token.clone())?;
    let docs: Arc<dyn DocumentSource> = match &config.google_docs_token {
        Some(token) => Arc::new(GoogleDocsClient::new(token.clone())),
        None => Arc::new(Unconfigured),
    };
    Ok(Context::new(db, Arc::new(scm), docs)
        .with_concurrency(config.scan_concurrency)
        .with_workflow_filter(config.workflow_filter.clone()))
}

fn job_spec(config: &Config, target: ScanTarget) -> anyhow::Result<JobSpec> {
    let (environment, doc_id) = match target {
        ScanTarget::Dev { repo_ref } => return Ok(JobSpec::Dev { repo_ref }),
        ScanTarget::Uat { doc_id } => (Environment::Uat, doc_id),
        ScanTarget::Prod { doc_id } => (Environment::Prod, doc_id),
    };
    let doc_id = doc_id
        .or_else(|| config.release_docs.doc_id_for(environment).map(str::to_string))
        .ok_or_else(|| anyhow::anyhow!("no document id given or configured for {environment}"))?;
    JobSpec::release_log(environment, doc_id)
        .ok_or_else(|| anyhow::anyhow!("{environment} has no release log"))
}

async fn cmd_serve(config: Config, max_concurrent: usize) -> anyhow::Result<()> {
    let _guard = init_telemetry(TelemetryConfig::from_config(&config))?;

    let db = Arc::new(Db::connect(config.database_url.expose_secret()).await?);
    db.migrate().await?;
    db.create_queue(SCAN_QUEUE).await?;

    let ctx = build_context(&config, Arc::clone(&db))?;

    let control = ControlPlane::new(
        Arc::clone(&db),
        ctx.clone(),
        ControlConfig {
            max_concurrent,
            ..ControlConfig::default()
        },
    );

    let state = Arc::new(AppState {
        ctx,
        webhook_secret: config.github_webhook_secret.clone(),
        queue: Some(db),
        github_org: config.github_org.clone(),
        release_docs: config.release_docs.clone(),
    });

    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    tracing::info!(addr = %config.listen_addr, "listening");

    let ctrl = control.clone();
    let control_task = tokio::spawn(async move { ctrl.run().await });

    let shutdown_ctrl = control.clone();
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            tokio::signal::ctrl_c().await.ok();
            shutdown_ctrl.shutdown();
        })
        .await?;

    control_task.await??;
    Ok(())
}

async fn cmd_job_submit(db: &Db, config: &Config, target: ScanTarget) -> anyhow::Result<()> {
    let job = db.submit_job(job_spec(config, target)?).await?;
    println!("Queued: {} (kind: {})", job.id, job.spec.kind());
    Ok(())
}

async fn cmd_job_list(db: &Db, state: Option<JobState>, limit: i64) -> anyhow::Result<()> {
    let jobs = db.list_jobs(state, limit).await?;

    if jobs.is_empty() {
        println!("No jobs found.");
        return Ok(());
    }

    println!(
        "{:<8}  {:<5}  {:<10}  {:>4}  {:<16}  TARGET",
        "ID", "KIND", "STATE", "PCT", "CREATED"
    );
    println!("{}", "-".repeat(80));

    for job in &jobs {
        let target = match &job.spec {
            JobSpec::Dev { repo_ref } => repo_ref.as_str(),
            JobSpec::Uat { doc_id } | JobSpec::Prod { doc_id } => doc_id.as_str(),
        };
        println!(
            "{:<8}  {:<5}  {:<10}  {:>3}%  {:<16}  {}",
            &job.id.to_string()[..8],
            job.spec.kind(),
            job.state,
            job.progress,
            job.created_at.format("%Y-%m-%d %H:%M"),
            target
        );
    }

    println!("\n{} job(s)", jobs.len());
    Ok(())
}

async fn cmd_job_show(db: &Db, id_str: String) -> anyhow::Result<()> {
    let id = if id_str.len() < 36 {
        let jobs = db.list_jobs(None, 100).await?;
        let matches: Vec<_> = jobs
            .iter()
            .filter(|job| job.id.to_string().starts_with(&id_str))
            .collect();
        match matches.as_slice() {
            [] => anyhow::bail!("no job matching prefix '{id_str}'"),
            [job] => job.id,
            more => anyhow::bail!(
                "{} jobs match prefix '{id_str}', be more specific",
                more.len()
            ),
        }
    } else {
        JobId(uuid::Uuid::parse_str(&id_str)?)
    };

    let job = db.get_job(id).await?;

    println!("ID:         {}", job.id);
    println!("Kind:       {}", job.spec.kind());
    println!("State:      {}", job.state);
    println!("Progress:   {}%", job.progress);
    println!("Spec:       {}", serde_json::to_string(&job.spec)?);
    println!("Created:    {}", job.created_at);
    println!("Updated:    {}", job.updated_at);
    if let Some(finished) = job.finished_at {
        println!("Finished:   {finished}");
    }
    if let Some(ref reason) = job.failed_reason {
        println!("Failure:    {reason}");
    }

    Ok(())
}

async fn cmd_scan(config: Config, target: ScanTarget) -> anyhow::Result<()> {
    let _guard = init_telemetry(TelemetryConfig::from_config(&config))?;

    let db = Arc::new(Db::connect(config.database_url.expose_secret()).await?);
    db.migrate().await?;

    let spec = job_spec(&config, target)?;
    let ctx = build_context(&config, db)?;
    let report = run_job(&ctx, &spec, &NoProgress).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
