mod face;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use cua_agent::provider::{self, InstanceProvider};
use cua_agent::{Agent, AgentConfig, AgentEvent, Message, OpenAiResponses, Session};
use dotenvy::dotenv;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "agent")]
#[command(about = "Computer-use agent driving a remote browser or desktop")]
#[command(version)]
struct Args {
    /// Run this single task and exit instead of serving the web UI
    #[arg(short, long)]
    task: Option<String>,

    /// Configuration file (defaults to <config dir>/cua-agent/config.json)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Instance provider: scrapybara or hyperbrowser
    #[arg(long)]
    provider: Option<String>,

    /// Environment: web, ubuntu or windows
    #[arg(long)]
    environment: Option<String>,

    /// Zero data retention: resend the full log every turn
    #[arg(long)]
    zdr: bool,

    /// System prompt sent ahead of the log
    #[arg(long)]
    prompt: Option<String>,

    /// Model name
    #[arg(long)]
    model: Option<String>,

    /// Maximum model calls per task
    #[arg(long)]
    max_turns: Option<usize>,

    /// Write the message log here as JSON after each task
    #[arg(long)]
    transcript: Option<PathBuf>,

    /// Leave the remote instance running on exit
    #[arg(long)]
    keep_instance: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("cua_agent=info,agent=info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    tracing::info!("[Agent] Starting computer-use agent...");

    let config = load_config(&args)?;
    let descriptor = config.resolve().context("Invalid configuration")?;
    tracing::info!(
        provider = descriptor.provider.as_str(),
        environment = descriptor.environment.as_str(),
        zdr = descriptor.zdr_enabled,
        "[Agent] Configuration resolved"
    );

    let provider = provider::from_descriptor(&descriptor)?;
    let model = Arc::new(OpenAiResponses::from_env(config.openai_base_url.clone())?);
    let mut agent = Agent::new(descriptor, provider.clone(), model);
    let mut session = Session::default();

    let outcome = match &args.task {
        Some(task) => run_once(&mut agent, &mut session, task, args.transcript.as_deref()).await,
        None => serve(agent, &mut session, args.transcript.as_deref()).await,
    };

    if !args.keep_instance {
        release(provider.as_ref(), &session).await;
    }
    outcome
}

/// Defaults, then the config file, then `CUA_*` variables, then flags.
fn load_config(args: &Args) -> Result<AgentConfig> {
    let path = args.config.clone().or_else(AgentConfig::default_path);
    let mut config = match &path {
        Some(path) => AgentConfig::load(path)?,
        None => AgentConfig::default(),
    };
    config.apply_env();

    if let Some(provider) = &args.provider {
        config.provider = provider.clone();
    }
    if let Some(environment) = &args.environment {
        config.environment = environment.clone();
    }
    if args.zdr {
        config.zdr_enabled = true;
    }
    if let Some(prompt) = &args.prompt {
        config.prompt = Some(prompt.clone());
    }
    if let Some(model) = &args.model {
        config.model = model.clone();
    }
    if let Some(max_turns) = args.max_turns {
        config.max_turns = max_turns;
    }
    Ok(config)
}

async fn run_once(
    agent: &mut Agent,
    session: &mut Session,
    task: &str,
    transcript: Option<&Path>,
) -> Result<()> {
    session.messages = vec![Message::user(task)];
    let outcome = agent.run(session).await;
    write_transcript(session, transcript);

    let answer = outcome?;
    println!("{answer}");
    Ok(())
}

/// Serve the web UI and run each submitted command as a new task on the same
/// instance, until the command channel closes or Ctrl-C.
async fn serve(agent: Agent, session: &mut Session, transcript: Option<&Path>) -> Result<()> {
    let (mut cmd_rx, event_tx) = face::start_server().await?;
    let mut agent = agent.with_events(event_tx.clone());
    tracing::info!("[Agent] Waiting for commands...");

    loop {
        let command = tokio::select! {
            command = cmd_rx.recv() => command,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("[Agent] Interrupted, shutting down");
                None
            }
        };
        let Some(command) = command else { break };

        tracing::info!(%command, "[Agent] Received command");
        session.messages = vec![Message::user(command)];
        if let Err(e) = agent.run(session).await {
            tracing::error!(error = %e, "[Agent] Task failed");
            let _ = event_tx.send(AgentEvent::TaskError {
                message: e.to_string(),
            });
        }
        write_transcript(session, transcript);
        let _ = event_tx.send(AgentEvent::Ready);
    }
    Ok(())
}

fn write_transcript(session: &Session, path: Option<&Path>) {
    let Some(path) = path else { return };
    match session.save_transcript(path) {
        Ok(()) => tracing::info!(path = %path.display(), "[Agent] Transcript written"),
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "[Agent] Failed to write transcript"),
    }
}

async fn release(provider: &dyn InstanceProvider, session: &Session) {
    let Some(id) = &session.instance_id else { return };
    match provider.release(id).await {
        Ok(()) => tracing::info!(instance_id = %id, "[Agent] Instance released"),
        Err(e) => tracing::warn!(instance_id = %id, error = %e, "[Agent] Failed to release instance"),
    }
}
