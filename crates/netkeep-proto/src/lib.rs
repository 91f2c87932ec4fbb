//! Wire formats spoken by netkeep.
//!
//! Three formats cross the process boundary:
//! - the portal's callback-wrapped JSON replies (`jsonp`),
//! - JSON command envelopes pushed by the remote controller (`command`),
//! - plain-text status frames written back to the controller (`status`).

pub mod command;
pub mod jsonp;
pub mod status;

pub use command::{parse_command, CommandEnvelope, CommandKind, Credential};
pub use status::{python_literal, Operation, StatusFrame, DETAIL_SEPARATOR};

#[derive(Debug)]
pub enum FrameError {
    /// No `identifier(...)` pair could be located.
    MissingWrapper,
    Json(serde_json::Error),
    InvalidStatus(String),
}

impl std::fmt::Display for FrameError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FrameError::MissingWrapper => write!(f, "no callback wrapper found in response"),
            FrameError::Json(e) => write!(f, "invalid json: {}", e),
            FrameError::InvalidStatus(msg) => write!(f, "invalid status frame: {}", msg),
        }
    }
}

impl std::error::Error for FrameError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            FrameError::Json(e) => Some(e),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for FrameError {
    fn from(value: serde_json::Error) -> Self {
        FrameError::Json(value)
    }
}
