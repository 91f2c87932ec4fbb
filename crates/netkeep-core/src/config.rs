use crate::policy::Policy;
use crate::portal::{LogoutDefaults, DEFAULT_BASE_URL};
use netkeep_proto::Credential;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_ENV: &str = "NETKEEP_CONFIG";

#[derive(Deserialize, Debug, Clone, PartialEq, Eq, Default)]
#[serde(default)]
pub struct Config {
    pub control: ControlConfig,
    pub portal: PortalConfig,
    pub poll: PollConfig,
    pub journal: JournalConfig,
    pub policy: Option<PolicyConfig>,
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct ControlConfig {
    /// `ws://` or `wss://` URL of the remote controller.
    pub url: Option<String>,
    pub max_retries: u32,
    pub retry_delay_secs: u64,
    pub connect_timeout_secs: u64,
    pub keepalive_interval_secs: u64,
    pub keepalive_timeout_secs: u64,
    pub workers: usize,
    pub queue_depth: usize,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_retries: 5,
            retry_delay_secs: 5,
            connect_timeout_secs: 10,
            keepalive_interval_secs: 20,
            keepalive_timeout_secs: 60,
            workers: 1,
            queue_depth: 32,
        }
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct PortalConfig {
    pub base_url: String,
    pub timeout_secs: u64,
    pub logout: LogoutDefaults,
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout_secs: 5,
            logout: LogoutDefaults::default(),
        }
    }
}

impl PortalConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct PollConfig {
    pub accounts_path: PathBuf,
    pub interval_secs: u64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            accounts_path: PathBuf::from("userInfo.json"),
            interval_secs: 6,
        }
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq, Default)]
#[serde(default)]
pub struct JournalConfig {
    pub path: Option<PathBuf>,
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct PolicyConfig {
    #[serde(default)]
    pub allow: Vec<String>,
}

impl Config {
    pub fn validate(&self) -> Result<(), String> {
        let control = &self.control;
        if let Some(raw) = &control.url {
            if raw.trim().is_empty() {
                return Err("control.url must not be empty".to_string());
            }
            let url = url::Url::parse(raw)
                .map_err(|e| format!("invalid control.url {}: {}", raw, e))?;
            if url.scheme() != "ws" && url.scheme() != "wss" {
                return Err(format!(
                    "control.url must use ws:// or wss://, got {}",
                    url.scheme()
                ));
            }
        }
        if control.retry_delay_secs == 0 {
            return Err("control.retry_delay_secs must be non-zero".to_string());
        }
        if control.connect_timeout_secs == 0 {
            return Err("control.connect_timeout_secs must be non-zero".to_string());
        }
        if control.keepalive_interval_secs == 0 {
            return Err("control.keepalive_interval_secs must be non-zero".to_string());
        }
        if control.keepalive_timeout_secs < control.keepalive_interval_secs {
            return Err(
                "control.keepalive_timeout_secs must be >= keepalive_interval_secs".to_string(),
            );
        }
        if control.workers == 0 {
            return Err("control.workers must be non-zero".to_string());
        }
        if control.queue_depth == 0 {
            return Err("control.queue_depth must be non-zero".to_string());
        }

        let portal = &self.portal;
        let base = url::Url::parse(&portal.base_url)
            .map_err(|e| format!("invalid portal.base_url {}: {}", portal.base_url, e))?;
        if base.scheme() != "http" && base.scheme() != "https" {
            return Err(format!(
                "portal.base_url must use http:// or https://, got {}",
                base.scheme()
            ));
        }
        if !(1..=9).contains(&portal.timeout_secs) {
            return Err("portal.timeout_secs must be between 1 and 9".to_string());
        }

        if self.poll.interval_secs == 0 {
            return Err("poll.interval_secs must be non-zero".to_string());
        }
        if let Some(policy) = &self.policy {
            Policy::from_config(&policy.allow)?;
        }
        Ok(())
    }

    /// Builds the configured policy, if any. Call after [`Config::validate`].
    pub fn policy(&self) -> Result<Option<Policy>, String> {
        self.policy
            .as_ref()
            .map(|p| Policy::from_config(&p.allow))
            .transpose()
    }
}

pub fn default_config_path() -> PathBuf {
    // ~/.config/netkeep/config.toml
    if let Some(home) = env::var_os("HOME") {
        PathBuf::from(home)
            .join(".config")
            .join("netkeep")
            .join("config.toml")
    } else {
        PathBuf::from(".config/netkeep/config.toml")
    }
}

/// Path from `NETKEEP_CONFIG`, falling back to [`default_config_path`].
pub fn config_path() -> PathBuf {
    env::var(CONFIG_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|_| default_config_path())
}

pub fn load_config() -> Result<(Config, PathBuf), String> {
    let path = config_path();
    let cfg = load_config_from(&path)?;
    Ok((cfg, path))
}

pub fn load_config_from(path: &Path) -> Result<Config, String> {
    let data = fs::read_to_string(path)
        .map_err(|e| format!("failed to read config {}: {}", path.display(), e))?;
    toml::from_str(&data).map_err(|e| format!("failed to parse TOML: {}", e))
}

/// Reads the standalone accounts file: a JSON list of credentials or a
/// single credential object.
pub fn load_accounts(path: &Path) -> Result<Vec<Credential>, String> {
    let data = fs::read_to_string(path)
        .map_err(|e| format!("failed to read accounts {}: {}", path.display(), e))?;
    let value: serde_json::Value = serde_json::from_str(&data)
        .map_err(|e| format!("failed to parse accounts {}: {}", path.display(), e))?;
    let accounts = if value.is_array() {
        serde_json::from_value::<Vec<Credential>>(value)
    } else {
        serde_json::from_value::<Credential>(value).map(|c| vec![c])
    };
    accounts.map_err(|e| format!("invalid account record in {}: {}", path.display(), e))
}
