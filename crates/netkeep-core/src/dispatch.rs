//! Routes controller commands to portal calls and renders status frames.
//!
//! Nothing a command does can fail the caller: transport errors, undecodable
//! replies and rejections all become `code 0` frames.

use crate::error::PortalError;
use crate::journal::OutcomeJournal;
use crate::policy::{Decision, Policy};
use crate::portal::{LogoutDefaults, Portal, PortalResult};
use netkeep_proto::{parse_command, CommandEnvelope, CommandKind, Credential, Operation, StatusFrame};
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

pub type SharedJournal = Arc<Mutex<OutcomeJournal>>;

pub struct Dispatcher {
    portal: Arc<dyn Portal>,
    logout_defaults: LogoutDefaults,
    policy: Option<Policy>,
    journal: Option<SharedJournal>,
}

impl Dispatcher {
    pub fn new(portal: Arc<dyn Portal>, logout_defaults: LogoutDefaults) -> Self {
        Self {
            portal,
            logout_defaults,
            policy: None,
            journal: None,
        }
    }

    pub fn with_policy(mut self, policy: Option<Policy>) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_journal(mut self, journal: Option<SharedJournal>) -> Self {
        self.journal = journal;
        self
    }

    /// Parses an inbound frame. Unparseable frames and unknown command types
    /// are logged and dropped.
    pub fn parse(&self, raw: &str) -> Option<CommandEnvelope> {
        match parse_command(raw) {
            Ok(cmd) => match &cmd.kind {
                CommandKind::Unknown(kind) => {
                    warn!(kind = %kind, username = %cmd.credential.username, "ignoring unknown command type");
                    None
                }
                _ => Some(cmd),
            },
            Err(e) => {
                warn!(error = %e, frame_len = raw.len(), "discarding unparseable control frame");
                None
            }
        }
    }

    /// Parses and executes one inbound frame.
    pub async fn handle(&self, raw: &str) -> Vec<StatusFrame> {
        match self.parse(raw) {
            Some(cmd) => self.execute(cmd).await,
            None => Vec::new(),
        }
    }

    pub async fn execute(&self, cmd: CommandEnvelope) -> Vec<StatusFrame> {
        match cmd.kind {
            CommandKind::Login => vec![self.login(&cmd.credential, &cmd.email).await],
            CommandKind::Logout => vec![self.logout(&cmd.credential, &cmd.email).await],
            CommandKind::All => {
                let logout = self.logout(&cmd.credential, &cmd.email).await;
                let login = self.login(&cmd.credential, &cmd.email).await;
                vec![logout, login]
            }
            CommandKind::Unknown(kind) => {
                warn!(kind = %kind, "ignoring unknown command type");
                Vec::new()
            }
        }
    }

    pub async fn login(&self, credential: &Credential, email: &str) -> StatusFrame {
        let result = match self.check_policy(credential) {
            Err(reason) => Err(reason),
            Ok(()) => Self::settle(self.portal.authenticate(credential).await),
        };
        self.finish(Operation::Login, credential, email, result)
    }

    pub async fn logout(&self, credential: &Credential, email: &str) -> StatusFrame {
        let result = match self.check_policy(credential) {
            Err(reason) => Err(reason),
            Ok(()) => {
                let request = self.logout_defaults.request_for(credential);
                Self::settle(self.portal.deauthenticate(&request).await)
            }
        };
        self.finish(Operation::Logout, credential, email, result)
    }

    fn check_policy(&self, credential: &Credential) -> Result<(), String> {
        match self.policy.as_ref().map(|p| p.evaluate(&credential.wlan_user_ip)) {
            Some(Decision::Deny { reason }) => Err(format!("policy denied: {}", reason)),
            _ => Ok(()),
        }
    }

    fn settle(result: Result<PortalResult, PortalError>) -> Result<(), String> {
        result
            .and_then(PortalResult::ensure_success)
            .map(|_| ())
            .map_err(|e| e.detail())
    }

    fn finish(
        &self,
        op: Operation,
        credential: &Credential,
        email: &str,
        result: Result<(), String>,
    ) -> StatusFrame {
        let frame = match result {
            Ok(()) => {
                info!(op = %op, username = %credential.username, "portal operation succeeded");
                StatusFrame::success(op, email, credential.username.as_str())
            }
            Err(detail) => {
                warn!(op = %op, username = %credential.username, detail = %detail, "portal operation failed");
                StatusFrame::failure(op, email, credential.username.as_str(), detail)
            }
        };
        if let Some(journal) = &self.journal {
            let mut journal = journal.lock().unwrap_or_else(|e| e.into_inner());
            if let Err(e) = journal.record(&frame) {
                warn!(error = %e, path = %journal.path().display(), "failed to journal outcome");
            }
        }
        frame
    }
}
