//! Error taxonomy shared across the dispatcher, poller, registry and listener.
//!
//! Every HTTP call into the upstream server returns one of these at its
//! boundary; nothing propagates past the Connection Supervisor as an
//! uncaught panic or unhandled `Result`.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AgentError {
    /// Socket refused, timed out, DNS failed, TLS handshake failed.
    #[error("transport error: {0}")]
    Transport(String),

    /// 503 with a maintenance marker in the body.
    #[error("server is in maintenance")]
    ServerMaintenance,

    /// 401 from any endpoint.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// 404 from a command call.
    #[error("not found: {0}")]
    NotFound(String),

    /// Response body could not be parsed as the expected XML/JSON shape.
    #[error("failed to parse response: {0}")]
    Parse(String),

    /// Non-2xx on a set-streams call that wasn't 401/404/503.
    #[error("command rejected: {0}")]
    CommandRejected(String),

    /// The SSE stream ended or errored.
    #[error("event stream disconnected: {0}")]
    Disconnected(String),

    /// Anything else: unexpected status code, logic error surfaced as data.
    #[error("{0}")]
    Other(String),
}

impl AgentError {
    /// Classify an HTTP status code from a command-class response.
    pub fn from_status(status: u16, body_snippet: &str) -> Self {
        match status {
            401 => AgentError::Auth(format!("401 Unauthorized: {body_snippet}")),
            404 => AgentError::NotFound(format!("404 Not Found: {body_snippet}")),
            503 if body_snippet.to_lowercase().contains("maintenance") => {
                AgentError::ServerMaintenance
            }
            _ => AgentError::CommandRejected(format!("HTTP {status}: {body_snippet}")),
        }
    }

    /// True when the supervisor should stop reconnecting and surface a
    /// fatal result upward instead of backing off and retrying forever.
    pub fn is_fatal_auth(&self) -> bool {
        matches!(self, AgentError::Auth(_))
    }
}

impl From<reqwest::Error> for AgentError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() {
            AgentError::Transport(err.to_string())
        } else if let Some(status) = err.status() {
            AgentError::from_status(status.as_u16(), &err.to_string())
        } else {
            AgentError::Transport(err.to_string())
        }
    }
}

impl From<quick_xml::Error> for AgentError {
    fn from(err: quick_xml::Error) -> Self {
        AgentError::Parse(err.to_string())
    }
}
