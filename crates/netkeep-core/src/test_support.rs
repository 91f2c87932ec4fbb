use crate::error::PortalError;
use crate::portal::{LogoutRequest, Portal, PortalResult};
use async_trait::async_trait;
use netkeep_proto::{Credential, Operation};
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

// Shared lock for tests that touch process-wide environment variables.
pub static ENV_LOCK: Mutex<()> = Mutex::new(());

/// Canned portal answer.
#[derive(Debug, Clone)]
pub enum Reply {
    Payload(Value),
    Transport(String),
}

/// In-memory [`Portal`] that records calls and answers from per-operation
/// queues. An empty queue answers `{"result":"1"}`.
#[derive(Default)]
pub struct ScriptedPortal {
    calls: Mutex<Vec<(Operation, String)>>,
    login: Mutex<VecDeque<Reply>>,
    logout: Mutex<VecDeque<Reply>>,
    delays: Mutex<HashMap<String, Duration>>,
    active: Mutex<HashMap<String, usize>>,
    overlapped: AtomicBool,
}

impl ScriptedPortal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_login(&self, reply: Reply) {
        lock(&self.login).push_back(reply);
    }

    pub fn push_logout(&self, reply: Reply) {
        lock(&self.logout).push_back(reply);
    }

    /// Makes every call for `username` take at least `delay`.
    pub fn delay_user(&self, username: &str, delay: Duration) {
        lock(&self.delays).insert(username.to_string(), delay);
    }

    /// Calls in the order they started.
    pub fn calls(&self) -> Vec<(Operation, String)> {
        lock(&self.calls).clone()
    }

    /// Whether two calls for the same username were ever in flight together.
    pub fn overlapped(&self) -> bool {
        self.overlapped.load(Ordering::SeqCst)
    }

    async fn answer(&self, op: Operation, username: &str) -> Result<PortalResult, PortalError> {
        lock(&self.calls).push((op, username.to_string()));
        {
            let mut active = lock(&self.active);
            let count = active.entry(username.to_string()).or_insert(0);
            if *count > 0 {
                self.overlapped.store(true, Ordering::SeqCst);
            }
            *count += 1;
        }

        let delay = lock(&self.delays).get(username).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(count) = lock(&self.active).get_mut(username) {
            *count -= 1;
        }

        let queue = match op {
            Operation::Login => &self.login,
            Operation::Logout => &self.logout,
        };
        let reply = lock(queue).pop_front();
        match reply {
            None => PortalResult::from_payload(json!({"result": "1"})),
            Some(Reply::Payload(payload)) => PortalResult::from_payload(payload),
            Some(Reply::Transport(msg)) => Err(PortalError::Transport(msg)),
        }
    }
}

#[async_trait]
impl Portal for ScriptedPortal {
    async fn authenticate(&self, credential: &Credential) -> Result<PortalResult, PortalError> {
        self.answer(Operation::Login, &credential.username).await
    }

    async fn deauthenticate(&self, request: &LogoutRequest) -> Result<PortalResult, PortalError> {
        self.answer(Operation::Logout, &request.account).await
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// Credential with distinct values in every field.
pub fn credential(username: &str) -> Credential {
    Credential {
        username: username.to_string(),
        password: format!("{username}-pw"),
        wlan_user_ip: "10.0.0.5".to_string(),
        wlan_user_mac: "aabbccddeeff".to_string(),
        wlan_ac_ip: "10.0.0.1".to_string(),
        wlan_ac_name: "ac-main".to_string(),
    }
}
