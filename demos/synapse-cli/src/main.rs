//! Command-line front end for chat sessions and workflow jobs.
//!
//! Run with: cargo run -p synapse-cli -- sessions
//!
//! Settings are read from the platform config dir (`synapse/settings.json`)
//! or `--settings`, with `SYNAPSE_*` environment overrides on top.

use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use serde_json::Value;
use synapse_core::{
    ClientSettings, Job, JobKind, Role, SessionId,
    settings::{load_settings, load_settings_from_path},
};
use synapse_executor::{CancellationToken, PollOptions, PollingExecutor};
use synapse_session::{
    History, LoadSource, SendOutcome, SessionSynchronizer, SyncOptions, storage::FileCache,
};
use synapse_transport::{HttpSessionRemote, WorkflowClient};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Settings file to use instead of the default location
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List chat sessions
    Sessions,
    /// Start a new chat session
    New,
    /// Show the history of a session
    History { session_id: String },
    /// Send a message in a session
    Send {
        session_id: String,
        /// Message text
        message: String,
    },
    /// Delete a session
    Delete { session_id: String },
    /// Submit a workflow or agent job and wait for its outcome
    Run {
        /// Workflow id (defaults to the configured workflow)
        #[arg(long, conflicts_with = "agent")]
        workflow: Option<String>,
        /// Agent id
        #[arg(long)]
        agent: Option<String>,
        /// JSON payload
        #[arg(short, long, default_value = "{}")]
        payload: String,
        /// Seconds between status checks
        #[arg(long)]
        interval: Option<u64>,
        /// Total polling budget in seconds
        #[arg(long)]
        timeout: Option<u64>,
    },
}

type Synchronizer = SessionSynchronizer<HttpSessionRemote, FileCache>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    let settings = match &cli.settings {
        Some(path) => load_settings_from_path(path),
        None => load_settings(),
    }
    .context("loading settings")?;

    match cli.command {
        Commands::Sessions => list_sessions(&synchronizer(&settings)?).await,
        Commands::New => {
            let sync = synchronizer(&settings)?;
            sync.load_sessions().await;
            let session = sync.create_session().await?;
            println!("{}\t{}", session.id, session.title);
            Ok(())
        }
        Commands::History { session_id } => {
            let sync = synchronizer(&settings)?;
            let id = open_session(&sync, &session_id).await?;
            let history = sync.history(&id).await;
            for message in history.messages().unwrap_or_default() {
                print_message(message.role, &message.content);
            }
            if let History::Partial {
                fetch_error: Some(error),
                ..
            } = &history
            {
                eprintln!("history incomplete: {error}");
            }
            Ok(())
        }
        Commands::Send {
            session_id,
            message,
        } => {
            let sync = synchronizer(&settings)?;
            let id = open_session(&sync, &session_id).await?;
            match sync.send_message(&id, &message).await? {
                SendOutcome::Delivered(reply) => {
                    print_message(reply.role, &reply.content);
                    Ok(())
                }
                SendOutcome::Failed { notice, error } => {
                    print_message(notice.role, &notice.content);
                    Err(error).context("sending message")
                }
            }
        }
        Commands::Delete { session_id } => {
            let sync = synchronizer(&settings)?;
            sync.load_sessions().await;
            let id = SessionId::from_remote(session_id);
            let Some(remote_delete) = sync.delete_session(&id).await else {
                bail!("unknown session {id}");
            };
            remote_delete.await?;
            println!("deleted {id}");
            Ok(())
        }
        Commands::Run {
            workflow,
            agent,
            payload,
            interval,
            timeout,
        } => {
            let payload: Value = serde_json::from_str(&payload).context("parsing --payload")?;
            let job = match agent {
                Some(agent_id) => Job::new(JobKind::Agent, agent_id, payload),
                None => Job::workflow(
                    workflow.unwrap_or_else(|| settings.workflow.default_workflow_id.clone()),
                    payload,
                ),
            };
            run_job(&settings, &job, interval, timeout).await
        }
    }
}

fn synchronizer(settings: &ClientSettings) -> anyhow::Result<Synchronizer> {
    let remote = HttpSessionRemote::new(&settings.api_base_url)?;
    let cache = FileCache::from_settings(&settings.cache);
    tracing::debug!(cache = ?cache.path(), "using session cache");
    Ok(SessionSynchronizer::new(
        Arc::new(remote),
        cache,
        SyncOptions::from(&settings.sync),
    ))
}

async fn list_sessions(sync: &Synchronizer) -> anyhow::Result<()> {
    if sync.initialize().await == LoadSource::Cache {
        eprintln!("chat service unreachable, showing cached sessions");
    }
    for session in sync.sessions().await {
        println!(
            "{}\t{}\t{}",
            session.id,
            session.created_at.format("%Y-%m-%d %H:%M"),
            session.title
        );
    }
    Ok(())
}

async fn open_session(sync: &Synchronizer, raw_id: &str) -> anyhow::Result<SessionId> {
    sync.load_sessions().await;
    let id = SessionId::from_remote(raw_id);
    if !sync.select_session(&id).await? {
        bail!("unknown session {id}");
    }
    Ok(id)
}

fn print_message(role: Role, content: &str) {
    let label = match role {
        Role::User => "you",
        Role::Assistant => "assistant",
        Role::System => "system",
    };
    println!("[{label}] {content}");
}

async fn run_job(
    settings: &ClientSettings,
    job: &Job,
    interval: Option<u64>,
    timeout: Option<u64>,
) -> anyhow::Result<()> {
    let client = WorkflowClient::from_settings(&settings.workflow)?;
    let mut options = PollOptions::from(&settings.polling);
    if let Some(secs) = interval {
        options.poll_interval = Duration::from_secs(secs);
    }
    if let Some(secs) = timeout {
        options.timeout_budget = Duration::from_secs(secs);
    }

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupted, abandoning job");
            on_interrupt.cancel();
        }
    });

    let outcome = PollingExecutor::new(options)
        .run_with_cancel(&client, job, &cancel)
        .await;
    println!("{}", serde_json::to_string_pretty(&outcome)?);

    if outcome.is_success() {
        Ok(())
    } else {
        bail!(
            "job {} ended with status {}: {}",
            job.job_id,
            outcome.status_code(),
            outcome.message().unwrap_or("no message")
        )
    }
}
