//! Implementation of the `doctor` diagnostics used by the CLI.
//!
//! Each check has an identifier, a status ("pass", "warn" or "fail") and a
//! one-line summary. The overall status is the worst status of any check.
//! Network checks can be forced with `NETKEEP_DOCTOR_NET=pass|fail|skip`.

use crate::config::{self, Config};
use crate::journal;
use crate::policy::Decision;
use serde::Serialize;
use std::env;
use std::fs::OpenOptions;
use std::net::ToSocketAddrs;
use std::path::{Path, PathBuf};

pub const NET_ENV: &str = "NETKEEP_DOCTOR_NET";
pub const TARGET_ENV: &str = "NETKEEP_DOCTOR_TARGET";

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct DoctorReport {
    pub version: String,
    pub overall: String,
    pub checks: Vec<DoctorCheck>,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct DoctorCheck {
    pub id: String,
    pub status: String,
    pub summary: String,
}

fn mk(id: &str, status: &str, summary: impl Into<String>) -> DoctorCheck {
    DoctorCheck {
        id: id.to_string(),
        status: status.to_string(),
        summary: summary.into(),
    }
}

fn aggregate_overall(checks: &[DoctorCheck]) -> String {
    // fail > warn > pass
    if checks.iter().any(|c| c.status == "fail") {
        "fail".to_string()
    } else if checks.iter().any(|c| c.status == "warn") {
        "warn".to_string()
    } else {
        "pass".to_string()
    }
}

fn control_dns_check(cfg: &Config) -> DoctorCheck {
    let Some(raw) = cfg.control.url.as_deref() else {
        return mk("control.dns", "warn", "control.url not set; only standalone polling is available");
    };
    let url = match url::Url::parse(raw) {
        Ok(url) => url,
        Err(e) => return mk("control.dns", "fail", format!("invalid control.url {}: {}", raw, e)),
    };
    let host = url.host_str().unwrap_or_default();
    let port = url.port_or_known_default().unwrap_or(80);
    let addr = format!("{}:{}", host, port);
    match addr.to_socket_addrs() {
        Ok(addrs) => {
            let count = addrs.count();
            if count == 0 {
                mk("control.dns", "fail", format!("dns resolution returned no addresses for {}", addr))
            } else {
                mk("control.dns", "pass", format!("resolved {} to {} addr(s)", addr, count))
            }
        }
        Err(e) => mk("control.dns", "fail", format!("dns resolution failed for {}: {}", addr, e)),
    }
}

/// Any HTTP answer counts: the portal only needs to be reachable.
fn portal_reach_check(cfg: &Config) -> Result<u16, String> {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| format!("tokio init failed: {}", e))?;
    rt.block_on(async {
        let client = reqwest::Client::builder()
            .timeout(cfg.portal.timeout())
            .build()
            .map_err(|e| format!("http client init failed: {}", e))?;
        let resp = client
            .get(&cfg.portal.base_url)
            .send()
            .await
            .map_err(|e| format!("portal {} unreachable: {}", cfg.portal.base_url, e))?;
        Ok::<u16, String>(resp.status().as_u16())
    })
}

fn journal_check(path: Option<&Path>) -> DoctorCheck {
    let Some(path) = path else {
        return mk("journal.write", "pass", "journal not configured");
    };
    if path.exists() {
        if let Err(e) = journal::verify_chain(path) {
            return mk("journal.write", "fail", format!("journal {} failed verification: {}", path.display(), e));
        }
    }
    match OpenOptions::new().create(true).append(true).open(path) {
        Ok(_) => mk("journal.write", "pass", format!("journal writable: {}", path.display())),
        Err(e) => mk("journal.write", "fail", format!("cannot open {}: {}", path.display(), e)),
    }
}

fn accounts_check(path: &Path) -> DoctorCheck {
    if !path.exists() {
        return mk(
            "poll.accounts",
            "warn",
            format!("{} not found; standalone polling unavailable", path.display()),
        );
    }
    match config::load_accounts(path) {
        Ok(accounts) => mk(
            "poll.accounts",
            "pass",
            format!("{} account(s) in {}", accounts.len(), path.display()),
        ),
        Err(e) => mk("poll.accounts", "fail", e),
    }
}

fn policy_target_check(cfg: &Config, target: &str) -> DoctorCheck {
    match cfg.policy() {
        Ok(Some(policy)) => match policy.evaluate(target) {
            Decision::Allow => mk("policy.target", "pass", format!("client ip {} allowed", target.trim())),
            Decision::Deny { reason } => mk("policy.target", "fail", reason),
        },
        Ok(None) => mk("policy.target", "warn", "policy not configured"),
        Err(e) => mk("policy.target", "fail", e),
    }
}

/// Runs all checks against the config named by `NETKEEP_CONFIG` or the
/// default path.
pub fn doctor_check() -> DoctorReport {
    run_checks(config::load_config())
}

/// Runs all checks against an explicit config file.
pub fn doctor_check_at(path: &Path) -> DoctorReport {
    run_checks(config::load_config_from(path).map(|cfg| (cfg, path.to_path_buf())))
}

fn run_checks(loaded: Result<(Config, PathBuf), String>) -> DoctorReport {
    let mut checks: Vec<DoctorCheck> = Vec::new();

    let cfg_res = loaded.and_then(|(cfg, path)| {
        cfg.validate()
            .map_err(|e| format!("config validation failed: {}", e))?;
        Ok((cfg, path))
    });
    match &cfg_res {
        Ok((_, path)) => checks.push(mk("cfg.load", "pass", format!("loaded config: {}", path.display()))),
        Err(err) => checks.push(mk("cfg.load", "fail", err)),
    }

    match &cfg_res {
        Ok((cfg, _)) => {
            checks.push(control_dns_check(cfg));
            match env::var(NET_ENV).as_deref() {
                Ok("pass") => checks.push(mk("portal.reach", "pass", format!("forced pass via {}", NET_ENV))),
                Ok("fail") => checks.push(mk("portal.reach", "fail", format!("forced fail via {}", NET_ENV))),
                Ok("skip") => checks.push(mk("portal.reach", "warn", format!("skipped via {}", NET_ENV))),
                _ => match portal_reach_check(cfg) {
                    Ok(status) => checks.push(mk(
                        "portal.reach",
                        "pass",
                        format!("portal {} answered HTTP {}", cfg.portal.base_url, status),
                    )),
                    Err(e) => checks.push(mk("portal.reach", "fail", e)),
                },
            }
            checks.push(journal_check(cfg.journal.path.as_deref()));
            checks.push(accounts_check(&cfg.poll.accounts_path));
        }
        Err(_) => {
            let hint = format!(
                "skipped because config load failed (set {} or create {})",
                config::CONFIG_ENV,
                config::default_config_path().display()
            );
            for id in ["control.dns", "portal.reach", "journal.write", "poll.accounts"] {
                checks.push(mk(id, "warn", hint.clone()));
            }
        }
    }

    if let Ok(target) = env::var(TARGET_ENV) {
        match &cfg_res {
            Ok((cfg, _)) => checks.push(policy_target_check(cfg, &target)),
            Err(_) => checks.push(mk("policy.target", "warn", "skipped because config load failed")),
        }
    }

    let overall = aggregate_overall(&checks);
    DoctorReport {
        version: env!("CARGO_PKG_VERSION").to_string(),
        overall,
        checks,
    }
}
