//! Plain-text rendering of Gateway results.

use std::fmt::Write;

use clawdbot_core::{CronJob, GatewayStatus, Message, MessageRole, Session};
use serde_json::Value;

pub fn status(status: &GatewayStatus) -> String {
    format!(
        "version  {}\nuptime   {}\nsessions {}\nmodel    {}\n",
        or_dash(&status.version),
        uptime(status.uptime),
        status.sessions,
        or_dash(&status.model),
    )
}

pub fn sessions(sessions: &[Session]) -> String {
    if sessions.is_empty() {
        return "no sessions\n".to_string();
    }
    let mut out = String::new();
    for session in sessions {
        let _ = writeln!(
            out,
            "{:<32} {:<10} {:<24} {}",
            session.key,
            or_dash(&session.kind),
            session.model.as_deref().unwrap_or("-"),
            session.last_activity.as_deref().unwrap_or("-"),
        );
    }
    out
}

pub fn history(messages: &[Message]) -> String {
    let mut out = String::new();
    for message in messages {
        let _ = writeln!(
            out,
            "[{}] {}",
            role(message.role),
            message.content.trim_end()
        );
    }
    out
}

pub fn cron_jobs(jobs: &[CronJob]) -> String {
    if jobs.is_empty() {
        return "no cron jobs\n".to_string();
    }
    let mut out = String::new();
    for job in jobs {
        let _ = writeln!(
            out,
            "{:<20} {:<16} {:<8} {}",
            job.id,
            job.schedule,
            if job.enabled { "enabled" } else { "disabled" },
            job.text,
        );
    }
    out
}

/// Results whose shape the Gateway does not pin down.
pub fn opaque(value: &Value) -> String {
    match value {
        Value::Null => "ok\n".to_string(),
        Value::String(s) => format!("{s}\n"),
        other => format!("{other}\n"),
    }
}

fn role(role: MessageRole) -> &'static str {
    match role {
        MessageRole::User => "user",
        MessageRole::Assistant => "assistant",
        MessageRole::System => "system",
        MessageRole::Tool => "tool",
        MessageRole::Other => "other",
    }
}

fn or_dash(s: &str) -> &str {
    if s.is_empty() { "-" } else { s }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn uptime(secs: f64) -> String {
    let total = secs.max(0.0) as u64;
    let (h, m, s) = (total / 3600, (total % 3600) / 60, total % 60);
    if h > 0 {
        format!("{h}h {m}m {s}s")
    } else if m > 0 {
        format!("{m}m {s}s")
    } else {
        format!("{s}s")
    }
}
