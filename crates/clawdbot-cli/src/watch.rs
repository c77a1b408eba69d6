//! `clawdbot watch`: a long-lived connection that polls sessions.

use std::pin::Pin;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clawdbot_core::ConnectionState;
use clawdbot_gateway::{
    ClawdbotClient, ClientOptions, ListSessionsParams, ReconnectPolicy, connect_with_retry,
};
use clawdbot_settings::GatewaySettings;
use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;
use tracing::warn;

use crate::output;

pub async fn run(
    settings: &GatewaySettings,
    poll_secs: Option<u64>,
    limit: u32,
    json: bool,
) -> Result<()> {
    let reconnect = settings.reconnect.enabled;
    let policy = ReconnectPolicy::from_settings(&settings.reconnect);
    let poll = Duration::from_secs(poll_secs.unwrap_or(settings.poll_interval_secs).max(1));

    let options = ClientOptions::from_settings(settings)
        .on_state_change(|state| println!("state: {state}"))
        .on_message(move |frame| print_push(frame, json));
    let client = ClawdbotClient::new(options);

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    let mut states = client.subscribe_state();
    match or_shutdown(shutdown.as_mut(), establish(&client, reconnect, &policy)).await {
        Some(outcome) => outcome?,
        None => {
            client.disconnect();
            return Ok(());
        }
    }

    let mut ticker = tokio::time::interval(poll);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        let step = tokio::select! {
            _ = &mut shutdown => break,
            _ = ticker.tick() => Step::Poll,
            state = states.recv() => match state {
                Ok(ConnectionState::Disconnected | ConnectionState::Error) => Step::Lost,
                Ok(_) | Err(RecvError::Lagged(_)) => Step::Idle,
                Err(RecvError::Closed) => break,
            },
        };

        // Slow work still yields to Ctrl-C.
        match step {
            Step::Poll if client.is_connected() => {
                if or_shutdown(shutdown.as_mut(), poll_sessions(&client, limit, json))
                    .await
                    .is_none()
                {
                    break;
                }
            }
            Step::Lost if client.state() != ConnectionState::Connected
                && client.state() != ConnectionState::Connecting =>
            {
                if !reconnect {
                    bail!("connection to {} lost", settings.url);
                }
                match or_shutdown(shutdown.as_mut(), establish(&client, true, &policy)).await {
                    Some(outcome) => outcome?,
                    None => break,
                }
                // Drop the transitions the reconnect itself produced.
                states = states.resubscribe();
            }
            _ => {}
        }
    }

    client.disconnect();
    Ok(())
}

/// Run `work` unless `shutdown` completes first.
async fn or_shutdown<S, F>(shutdown: Pin<&mut S>, work: F) -> Option<F::Output>
where
    S: Future,
    F: Future,
{
    tokio::select! {
        _ = shutdown => None,
        out = work => Some(out),
    }
}

enum Step {
    Poll,
    Lost,
    Idle,
}

async fn establish(client: &ClawdbotClient, retry: bool, policy: &ReconnectPolicy) -> Result<()> {
    let outcome = if retry {
        connect_with_retry(client, policy).await.map(|_| ())
    } else {
        client.connect().await
    };
    outcome.with_context(|| format!("Failed to connect to {}", client.url()))
}

async fn poll_sessions(client: &ClawdbotClient, limit: u32, json: bool) {
    let params = ListSessionsParams {
        limit: Some(limit),
        message_limit: None,
    };
    match client.list_sessions(params).await {
        Ok(sessions) if json => match serde_json::to_string(&sessions) {
            Ok(line) => println!("{line}"),
            Err(e) => warn!(error = %e, "failed to encode sessions"),
        },
        Ok(sessions) => print!("{}", output::sessions(&sessions)),
        Err(e) => warn!(error = %e, "session poll failed"),
    }
}

/// Print server pushes; responses to our own calls are printed elsewhere.
fn print_push(frame: &Value, json: bool) {
    if frame.get("id").is_some() {
        return;
    }
    if json {
        println!("{frame}");
    } else {
        let method = frame.get("method").and_then(Value::as_str).unwrap_or("push");
        let params = frame.get("params").unwrap_or(&Value::Null);
        println!("push: {method} {params}");
    }
}
