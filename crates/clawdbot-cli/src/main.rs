//! # clawdbot
//!
//! Command-line client for the Clawdbot Gateway.

#![deny(unsafe_code)]

mod output;
mod watch;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use clawdbot_gateway::{ClawdbotClient, ClientOptions, HistoryOptions, ListSessionsParams};
use clawdbot_settings::GatewaySettings;
use serde::Serialize;

/// Clawdbot Gateway client.
#[derive(Parser, Debug)]
#[command(name = "clawdbot", version, about = "Talk to a Clawdbot Gateway")]
struct Cli {
    /// Gateway WebSocket URL (overrides settings).
    #[arg(long, global = true)]
    url: Option<String>,

    /// Auth token (overrides settings).
    #[arg(long, global = true)]
    token: Option<String>,

    /// Settings file (default `~/.clawdbot/settings.json`).
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// Log filter, e.g. `debug` or `clawdbot_gateway=trace`.
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Print raw JSON instead of text.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    #[command(flatten)]
    Rpc(RpcCommand),
    /// Stay connected, print pushes and poll sessions until Ctrl-C.
    Watch {
        /// Seconds between session polls (default from settings).
        #[arg(long)]
        poll_secs: Option<u64>,
        /// Sessions fetched per poll.
        #[arg(long, default_value = "10")]
        limit: u32,
    },
}

/// One request, one response.
#[derive(Subcommand, Debug)]
enum RpcCommand {
    /// Gateway version, uptime and session count.
    Status,
    /// Inspect and message sessions.
    #[command(subcommand)]
    Sessions(SessionsCommand),
    /// Inspect and trigger cron jobs.
    #[command(subcommand)]
    Cron(CronCommand),
}

#[derive(Subcommand, Debug)]
enum SessionsCommand {
    /// List sessions.
    List {
        /// Maximum sessions.
        #[arg(long)]
        limit: Option<u32>,
        /// Maximum messages per session.
        #[arg(long)]
        message_limit: Option<u32>,
    },
    /// Show a session's messages.
    History {
        /// Session key.
        session_key: String,
        /// Maximum messages.
        #[arg(long)]
        limit: Option<u32>,
        /// Include tool messages.
        #[arg(long)]
        include_tools: bool,
    },
    /// Post a message into a session.
    Send {
        /// Session key.
        session_key: String,
        /// Message text.
        message: String,
    },
}

#[derive(Subcommand, Debug)]
enum CronCommand {
    /// List cron jobs.
    List {
        /// Include disabled jobs.
        #[arg(long)]
        all: bool,
    },
    /// Run a job now.
    Run {
        /// Job id.
        job_id: String,
    },
}

impl Cli {
    fn load_settings(&self) -> Result<GatewaySettings> {
        self.resolve_settings(|name| std::env::var(name).ok())
    }

    /// Settings file and env layers, then the command-line flags on top.
    fn resolve_settings<F>(&self, lookup: F) -> Result<GatewaySettings>
    where
        F: Fn(&str) -> Option<String>,
    {
        let path = self
            .settings
            .clone()
            .unwrap_or_else(clawdbot_settings::settings_path);
        let mut settings = clawdbot_settings::load_settings_with_env(&path, lookup)
            .with_context(|| format!("Failed to load settings: {}", path.display()))?;
        if let Some(url) = &self.url {
            settings.url.clone_from(url);
        }
        if let Some(token) = &self.token {
            settings.token = Some(token.clone());
        }
        if let Some(level) = &self.log_level {
            settings.log_level.clone_from(level);
        }
        clawdbot_settings::loader::validate(&settings).context("Invalid settings")?;
        Ok(settings)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = cli.load_settings()?;
    clawdbot_core::logging::init_subscriber(&settings.log_level);
    tracing::debug!(url = %settings.url, "settings loaded");

    let command = match cli.command {
        Command::Watch { poll_secs, limit } => {
            return watch::run(&settings, poll_secs, limit, cli.json).await;
        }
        Command::Rpc(command) => command,
    };

    let client = ClawdbotClient::new(ClientOptions::from_settings(&settings));
    client
        .connect()
        .await
        .with_context(|| format!("Failed to connect to {}", settings.url))?;
    let result = run_command(&client, command, cli.json).await;
    client.disconnect();
    result
}

async fn run_command(client: &ClawdbotClient, command: RpcCommand, json: bool) -> Result<()> {
    match command {
        RpcCommand::Status => {
            let status = client.status().await.context("status failed")?;
            emit(json, &status, output::status)
        }
        RpcCommand::Sessions(SessionsCommand::List {
            limit,
            message_limit,
        }) => {
            let sessions = client
                .list_sessions(ListSessionsParams {
                    limit,
                    message_limit,
                })
                .await
                .context("sessions.list failed")?;
            emit(json, &sessions, |s| output::sessions(s))
        }
        RpcCommand::Sessions(SessionsCommand::History {
            session_key,
            limit,
            include_tools,
        }) => {
            let options = HistoryOptions {
                limit,
                include_tools: include_tools.then_some(true),
            };
            let messages = client
                .get_session_history(&session_key, options)
                .await
                .with_context(|| format!("sessions.history failed for {session_key}"))?;
            emit(json, &messages, |m| output::history(m))
        }
        RpcCommand::Sessions(SessionsCommand::Send {
            session_key,
            message,
        }) => {
            let result = client
                .send_to_session(&session_key, &message)
                .await
                .with_context(|| format!("sessions.send failed for {session_key}"))?;
            emit(json, &result, output::opaque)
        }
        RpcCommand::Cron(CronCommand::List { all }) => {
            let jobs = client
                .list_cron_jobs(all)
                .await
                .context("cron.list failed")?;
            emit(json, &jobs, |j| output::cron_jobs(j))
        }
        RpcCommand::Cron(CronCommand::Run { job_id }) => {
            let result = client
                .run_cron_job(&job_id)
                .await
                .with_context(|| format!("cron.run failed for {job_id}"))?;
            emit(json, &result, output::opaque)
        }
    }
}

/// Print `value` as pretty JSON or through its text renderer.
fn emit<T: Serialize + ?Sized>(json: bool, value: &T, render: impl Fn(&T) -> String) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        print!("{}", render(value));
    }
    Ok(())
}
