//! Tests for the `doctor` module.

use std::env;
use std::fs;
use std::io::{Read, Write};
use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::thread;

use netkeep_core::config::CONFIG_ENV;
use netkeep_core::doctor::{doctor_check, doctor_check_at, NET_ENV, TARGET_ENV};

fn restore(key: &str, prev: Option<String>) {
    if let Some(value) = prev {
        env::set_var(key, value);
    } else {
        env::remove_var(key);
    }
}

fn write_config(dir: &Path, portal: &str, extra: &str) -> PathBuf {
    let accounts = dir.join("userInfo.json");
    fs::write(
        &accounts,
        r#"{"username":"u1","password":"p1","wlan_user_ip":"10.0.0.5","wlan_user_mac":"m","wlan_ac_ip":"10.0.0.1","wlan_ac_name":"ac"}"#,
    )
    .expect("write accounts");
    let path = dir.join("config.toml");
    let data = format!(
        "[control]\nurl = \"ws://127.0.0.1:9000/control\"\n\n[portal]\nbase_url = \"{}\"\ntimeout_secs = 2\n\n[poll]\naccounts_path = \"{}\"\n\n[journal]\npath = \"{}\"\n{}",
        portal,
        accounts.display(),
        dir.join("outcomes.jsonl").display(),
        extra
    );
    fs::write(&path, data).expect("write config");
    path
}

/// Answers a single HTTP request with `200 OK`.
fn one_shot_http_server() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("addr");
    thread::spawn(move || {
        if let Ok((mut socket, _)) = listener.accept() {
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf);
            let _ = socket.write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\nConnection: close\r\n\r\nok");
        }
    });
    format!("http://{}/eportal/", addr)
}

#[test]
fn doctor_passes_when_config_and_network_ok() {
    let _guard = netkeep_core::test_support::ENV_LOCK
        .lock()
        .unwrap_or_else(|e| e.into_inner());
    let dir = tempfile::tempdir().expect("tempdir");
    let path = write_config(dir.path(), "http://10.160.63.9:801/eportal/", "");
    let prev = env::var(CONFIG_ENV).ok();
    let prev_net = env::var(NET_ENV).ok();
    env::set_var(CONFIG_ENV, &path);
    env::set_var(NET_ENV, "pass");

    let report = doctor_check();
    assert_eq!(report.overall, "pass", "{:?}", report.checks);
    for id in ["cfg.load", "control.dns", "portal.reach", "journal.write", "poll.accounts"] {
        assert!(
            report.checks.iter().any(|c| c.id == id && c.status == "pass"),
            "{} did not pass",
            id
        );
    }

    restore(CONFIG_ENV, prev);
    restore(NET_ENV, prev_net);
}

#[test]
fn doctor_fails_when_config_missing() {
    let _guard = netkeep_core::test_support::ENV_LOCK
        .lock()
        .unwrap_or_else(|e| e.into_inner());
    let dir = tempfile::tempdir().expect("tempdir");
    let prev = env::var(CONFIG_ENV).ok();
    let prev_net = env::var(NET_ENV).ok();
    env::set_var(CONFIG_ENV, dir.path().join("missing.toml"));
    env::set_var(NET_ENV, "pass");

    let report = doctor_check();
    assert_eq!(report.overall, "fail");
    assert!(report
        .checks
        .iter()
        .any(|c| c.id == "cfg.load" && c.status == "fail"));
    assert!(report
        .checks
        .iter()
        .any(|c| c.id == "portal.reach" && c.status == "warn"));
    assert_eq!(report.version, env!("CARGO_PKG_VERSION"));

    restore(CONFIG_ENV, prev);
    restore(NET_ENV, prev_net);
}

#[test]
fn doctor_probes_portal_over_http() {
    let _guard = netkeep_core::test_support::ENV_LOCK
        .lock()
        .unwrap_or_else(|e| e.into_inner());
    let dir = tempfile::tempdir().expect("tempdir");
    let portal = one_shot_http_server();
    let path = write_config(dir.path(), &portal, "");
    let prev_net = env::var(NET_ENV).ok();
    env::remove_var(NET_ENV);

    let report = doctor_check_at(&path);
    let reach = report
        .checks
        .iter()
        .find(|c| c.id == "portal.reach")
        .expect("portal.reach");
    assert_eq!(reach.status, "pass", "{}", reach.summary);
    assert!(reach.summary.contains("HTTP 200"));

    restore(NET_ENV, prev_net);
}

#[test]
fn doctor_reports_unreachable_portal() {
    let _guard = netkeep_core::test_support::ENV_LOCK
        .lock()
        .unwrap_or_else(|e| e.into_inner());
    let dir = tempfile::tempdir().expect("tempdir");
    let port = TcpListener::bind("127.0.0.1:0")
        .expect("bind")
        .local_addr()
        .expect("addr")
        .port();
    let path = write_config(dir.path(), &format!("http://127.0.0.1:{}/eportal/", port), "");
    let prev_net = env::var(NET_ENV).ok();
    env::remove_var(NET_ENV);

    let report = doctor_check_at(&path);
    assert_eq!(report.overall, "fail");
    assert!(report
        .checks
        .iter()
        .any(|c| c.id == "portal.reach" && c.status == "fail"));

    restore(NET_ENV, prev_net);
}

#[test]
fn doctor_reports_policy_denied_reason() {
    let _guard = netkeep_core::test_support::ENV_LOCK
        .lock()
        .unwrap_or_else(|e| e.into_inner());
    let dir = tempfile::tempdir().expect("tempdir");
    let path = write_config(
        dir.path(),
        "http://10.160.63.9:801/eportal/",
        "\n[policy]\nallow = [\"10.0.0.0/24\"]\n",
    );
    let prev_net = env::var(NET_ENV).ok();
    let prev_target = env::var(TARGET_ENV).ok();
    env::set_var(NET_ENV, "skip");
    env::set_var(TARGET_ENV, "10.0.9.9");

    let report = doctor_check_at(&path);
    let policy_check = report
        .checks
        .iter()
        .find(|c| c.id == "policy.target")
        .expect("policy.target");
    assert_eq!(policy_check.status, "fail");
    assert!(policy_check.summary.contains("not allowed"));

    env::set_var(TARGET_ENV, "10.0.0.9");
    let report = doctor_check_at(&path);
    assert!(report
        .checks
        .iter()
        .any(|c| c.id == "policy.target" && c.status == "pass"));
    assert_eq!(report.overall, "warn");

    restore(NET_ENV, prev_net);
    restore(TARGET_ENV, prev_target);
}
