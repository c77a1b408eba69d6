//! Typed wrappers over [`ClawdbotClient::call`].
//!
//! Each operation only shapes params and types the result; correlation,
//! deadlines and error mapping are the generic call's.

use clawdbot_core::{CronJob, GatewayStatus, Message, Result, Session};
use serde::Serialize;
use serde_json::{Value, json};

use crate::client::ClawdbotClient;

/// Gateway method names.
pub mod methods {
    /// Gateway status.
    pub const STATUS: &str = "status";
    /// List sessions.
    pub const SESSIONS_LIST: &str = "sessions.list";
    /// Message history of one session.
    pub const SESSIONS_HISTORY: &str = "sessions.history";
    /// Post a message into a session.
    pub const SESSIONS_SEND: &str = "sessions.send";
    /// List cron jobs.
    pub const CRON_LIST: &str = "cron.list";
    /// Trigger a cron job now.
    pub const CRON_RUN: &str = "cron.run";
}

/// Params for [`ClawdbotClient::list_sessions`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListSessionsParams {
    /// Maximum sessions returned.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    /// Maximum messages included per session.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_limit: Option<u32>,
}

/// Options for [`ClawdbotClient::get_session_history`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryOptions {
    /// Maximum messages returned.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    /// Include tool-call messages.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub include_tools: Option<bool>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HistoryParams<'a> {
    session_key: &'a str,
    #[serde(flatten)]
    options: HistoryOptions,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SendParams<'a> {
    session_key: &'a str,
    message: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CronListParams {
    include_disabled: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CronRunParams<'a> {
    job_id: &'a str,
}

fn to_params<T: Serialize>(params: &T) -> Result<Value> {
    Ok(serde_json::to_value(params)?)
}

impl ClawdbotClient {
    /// Gateway version, uptime and load.
    pub async fn status(&self) -> Result<GatewayStatus> {
        self.call_as(methods::STATUS, json!({})).await
    }

    /// Sessions known to the Gateway.
    pub async fn list_sessions(&self, params: ListSessionsParams) -> Result<Vec<Session>> {
        self.call_as(methods::SESSIONS_LIST, to_params(&params)?)
            .await
    }

    /// Message history of one session.
    pub async fn get_session_history(
        &self,
        session_key: &str,
        options: HistoryOptions,
    ) -> Result<Vec<Message>> {
        let params = to_params(&HistoryParams {
            session_key,
            options,
        })?;
        self.call_as(methods::SESSIONS_HISTORY, params).await
    }

    /// Post `message` into a session. The result is Gateway-defined.
    pub async fn send_to_session(&self, session_key: &str, message: &str) -> Result<Value> {
        let params = to_params(&SendParams {
            session_key,
            message,
        })?;
        self.call(methods::SESSIONS_SEND, params).await
    }

    /// Scheduled jobs; disabled ones only when asked for.
    pub async fn list_cron_jobs(&self, include_disabled: bool) -> Result<Vec<CronJob>> {
        let params = to_params(&CronListParams { include_disabled })?;
        self.call_as(methods::CRON_LIST, params).await
    }

    /// Trigger a cron job immediately. The result is Gateway-defined.
    pub async fn run_cron_job(&self, job_id: &str) -> Result<Value> {
        let params = to_params(&CronRunParams { job_id })?;
        self.call(methods::CRON_RUN, params).await
    }
}
