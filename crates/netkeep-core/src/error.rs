//! Error types for portal calls and the control channel.

use serde_json::Value;
use thiserror::Error;

/// Failure of a single portal operation.
#[derive(Debug, Error)]
pub enum PortalError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("portal returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("parse error: {0}")]
    Parse(String),

    /// Well-formed reply whose result code is not "1".
    #[error("portal rejected request with result {code:?}")]
    Rejected { code: String, payload: Value },
}

impl PortalError {
    /// Text placed after the status frame separator.
    ///
    /// Rejections carry the raw portal payload so the controller sees exactly
    /// what the portal said.
    pub fn detail(&self) -> String {
        match self {
            PortalError::Rejected { payload, .. } => netkeep_proto::python_literal(payload),
            other => other.to_string(),
        }
    }
}

impl From<reqwest::Error> for PortalError {
    fn from(value: reqwest::Error) -> Self {
        if value.is_timeout() {
            PortalError::Transport(format!("request timed out: {}", value))
        } else {
            PortalError::Transport(value.to_string())
        }
    }
}

/// Control channel errors.
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("invalid control URL: {0}")]
    InvalidUrl(String),

    #[error("connection lost: {0}")]
    ConnectionLost(String),

    #[error("giving up after {failures} consecutive connection failures")]
    RetriesExhausted { failures: u32 },
}

impl From<url::ParseError> for SupervisorError {
    fn from(value: url::ParseError) -> Self {
        SupervisorError::InvalidUrl(value.to_string())
    }
}
