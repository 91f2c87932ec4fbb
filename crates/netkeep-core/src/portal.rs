//! HTTP client for the campus ePortal login API.
//!
//! Both operations are a single GET with the whole request in the query
//! string. The portal answers with a callback-wrapped JSON object whose
//! `result` field is `"1"` on success.

use crate::error::PortalError;
use async_trait::async_trait;
use netkeep_proto::{jsonp, Credential};
use serde::Deserialize;
use serde_json::Value;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::debug;

pub const DEFAULT_BASE_URL: &str = "http://10.160.63.9:801/eportal/";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
const JS_VERSION: &str = "3.0";
const BODY_PREVIEW_CHARS: usize = 200;

/// Decoded portal reply.
#[derive(Debug, Clone, PartialEq)]
pub struct PortalResult {
    pub result_code: String,
    pub payload: Value,
}

impl PortalResult {
    /// Wraps a decoded reply. Replies without a `result` field get an empty
    /// code and therefore count as rejections.
    pub fn from_payload(payload: Value) -> Result<Self, PortalError> {
        let object = payload.as_object().ok_or_else(|| {
            PortalError::Parse(format!("expected a JSON object, got {}", payload))
        })?;
        let result_code = match object.get("result") {
            Some(Value::String(code)) => code.clone(),
            Some(Value::Number(code)) => code.to_string(),
            _ => String::new(),
        };
        Ok(Self {
            result_code,
            payload,
        })
    }

    pub fn is_success(&self) -> bool {
        self.result_code == "1"
    }

    pub fn ensure_success(self) -> Result<Self, PortalError> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(PortalError::Rejected {
                code: self.result_code,
                payload: self.payload,
            })
        }
    }
}

/// Fields the portal requires to end a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogoutRequest {
    pub wlan_user_ip: String,
    pub account: String,
    pub password: String,
    pub wlan_user_mac: String,
    pub wlan_vlan_id: String,
    pub wlan_ac_ip: String,
    pub wlan_ac_name: String,
}

/// Values sent on logout when the caller leaves a field blank.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct LogoutDefaults {
    pub account: String,
    pub password: String,
    pub mac: String,
    pub vlan_id: String,
}

impl Default for LogoutDefaults {
    fn default() -> Self {
        Self {
            account: "drcom".to_string(),
            password: "123".to_string(),
            mac: "000000000000".to_string(),
            vlan_id: "0".to_string(),
        }
    }
}

impl LogoutDefaults {
    /// Builds a logout request from the credential of a command, falling back
    /// to the configured values for blank fields.
    pub fn request_for(&self, credential: &Credential) -> LogoutRequest {
        fn pick(value: &str, fallback: &str) -> String {
            if value.trim().is_empty() {
                fallback.to_string()
            } else {
                value.to_string()
            }
        }
        LogoutRequest {
            wlan_user_ip: credential.wlan_user_ip.clone(),
            account: pick(&credential.username, &self.account),
            password: pick(&credential.password, &self.password),
            wlan_user_mac: pick(&credential.wlan_user_mac, &self.mac),
            wlan_vlan_id: self.vlan_id.clone(),
            wlan_ac_ip: credential.wlan_ac_ip.clone(),
            wlan_ac_name: credential.wlan_ac_name.clone(),
        }
    }
}

/// The two portal operations.
#[async_trait]
pub trait Portal: Send + Sync {
    async fn authenticate(&self, credential: &Credential) -> Result<PortalResult, PortalError>;
    async fn deauthenticate(&self, request: &LogoutRequest) -> Result<PortalResult, PortalError>;
}

#[derive(Debug, Clone)]
pub struct PortalClient {
    base_url: String,
    http: reqwest::Client,
}

impl PortalClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, PortalError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.into(),
            http,
        })
    }

    async fn call(
        &self,
        action: &'static str,
        fields: Vec<(&'static str, String)>,
    ) -> Result<PortalResult, PortalError> {
        let ts = unix_millis().to_string();
        let mut query: Vec<(&str, String)> = vec![
            ("c", "Portal".to_string()),
            ("a", action.to_string()),
            ("login_method", "1".to_string()),
        ];
        query.extend(fields);
        query.push(("jsVersion", JS_VERSION.to_string()));
        query.push(("callback", format!("dr{}", ts)));
        query.push(("_", ts));

        debug!(action, url = %self.base_url, "portal request");
        let resp = self.http.get(&self.base_url).query(&query).send().await?;
        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(PortalError::Http {
                status: status.as_u16(),
                body: preview(&body),
            });
        }

        let payload = jsonp::decode(&body)
            .map_err(|e| PortalError::Parse(format!("{} in {:?}", e, preview(&body))))?;
        let result = PortalResult::from_payload(payload)?;
        debug!(action, result = %result.result_code, "portal reply");
        Ok(result)
    }
}

#[async_trait]
impl Portal for PortalClient {
    async fn authenticate(&self, credential: &Credential) -> Result<PortalResult, PortalError> {
        self.call(
            "login",
            vec![
                ("user_account", credential.username.clone()),
                ("user_password", credential.password.clone()),
                ("wlan_user_ip", credential.wlan_user_ip.clone()),
                ("wlan_user_mac", credential.wlan_user_mac.clone()),
                ("wlan_ac_ip", credential.wlan_ac_ip.clone()),
                ("wlan_ac_name", credential.wlan_ac_name.clone()),
            ],
        )
        .await
    }

    async fn deauthenticate(&self, request: &LogoutRequest) -> Result<PortalResult, PortalError> {
        self.call(
            "logout",
            vec![
                ("user_account", request.account.clone()),
                ("user_password", request.password.clone()),
                ("ac_logout", "1".to_string()),
                ("register_mode", "1".to_string()),
                ("wlan_user_ip", request.wlan_user_ip.clone()),
                ("wlan_user_ipv6", String::new()),
                ("wlan_vlan_id", request.wlan_vlan_id.clone()),
                ("wlan_user_mac", request.wlan_user_mac.clone()),
                ("wlan_ac_ip", request.wlan_ac_ip.clone()),
                ("wlan_ac_name", request.wlan_ac_name.clone()),
            ],
        )
        .await
    }
}

pub(crate) fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

fn preview(body: &str) -> String {
    if body.chars().count() <= BODY_PREVIEW_CHARS {
        body.to_string()
    } else {
        let head: String = body.chars().take(BODY_PREVIEW_CHARS).collect();
        format!("{}...(truncated)", head)
    }
}
