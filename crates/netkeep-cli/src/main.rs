use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use netkeep_core::config::{self, Config};
use netkeep_core::dispatch::{Dispatcher, SharedJournal};
use netkeep_core::error::SupervisorError;
use netkeep_core::journal::{self, OutcomeJournal};
use netkeep_core::poll::Poller;
use netkeep_core::portal::PortalClient;
use netkeep_core::supervisor::{Supervisor, SupervisorConfig};
use netkeep_proto::Credential;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::EnvFilter;

const EXIT_FATAL: i32 = 1;
const EXIT_RETRIES_EXHAUSTED: i32 = 2;

/// Netkeep command-line interface
#[derive(Parser)]
#[command(name = "netkeep", author, version, about = "Keeps captive portal sessions logged in", long_about = None)]
struct Cli {
    /// Config file (defaults to $NETKEEP_CONFIG or ~/.config/netkeep/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,
    /// Append logs to this file instead of stderr
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to the controller and execute its commands
    Run,
    /// Keep every account in the accounts file logged in
    Poll {
        /// Accounts file (JSON list or single object)
        #[arg(long)]
        accounts: Option<PathBuf>,
        /// Run a single pass and exit
        #[arg(long)]
        once: bool,
    },
    /// Log one account in and print the status frame
    Login(AccountArgs),
    /// Log one account out and print the status frame
    Logout(AccountArgs),
    /// Run diagnostic checks
    Doctor {
        /// Output JSON instead of human-readable text
        #[arg(long)]
        json: bool,
    },
    /// Check the hash chain of an outcome journal
    VerifyJournal { path: PathBuf },
}

#[derive(Args, Debug, Clone)]
struct AccountArgs {
    #[arg(long)]
    username: String,
    #[arg(long, default_value = "")]
    password: String,
    #[arg(long)]
    ip: String,
    #[arg(long, default_value = "")]
    mac: String,
    #[arg(long, default_value = "")]
    ac_ip: String,
    #[arg(long, default_value = "")]
    ac_name: String,
    /// Echoed back in the status frame
    #[arg(long, default_value = "")]
    email: String,
}

impl AccountArgs {
    fn credential(&self) -> Credential {
        Credential {
            username: self.username.clone(),
            password: self.password.clone(),
            wlan_user_ip: self.ip.clone(),
            wlan_user_mac: self.mac.clone(),
            wlan_ac_ip: self.ac_ip.clone(),
            wlan_ac_name: self.ac_name.clone(),
        }
    }
}

fn init_tracing(log_file: Option<&Path>, json: bool) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let (writer, ansi) = match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("failed to open log file {}", path.display()))?;
            (BoxMakeWriter::new(Mutex::new(file)), false)
        }
        None => (BoxMakeWriter::new(std::io::stderr), true),
    };
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(ansi);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
    Ok(())
}

/// Loads and validates the config. Without `--config`, a missing file means
/// built-in defaults.
fn resolve_config(explicit: Option<&Path>) -> anyhow::Result<Config> {
    let path = explicit
        .map(Path::to_path_buf)
        .unwrap_or_else(config::config_path);
    let cfg = if explicit.is_none() && !path.exists() {
        info!(path = %path.display(), "no config file, using defaults");
        Config::default()
    } else {
        config::load_config_from(&path).map_err(anyhow::Error::msg)?
    };
    cfg.validate()
        .map_err(anyhow::Error::msg)
        .with_context(|| format!("config validation failed ({})", path.display()))?;
    Ok(cfg)
}

fn build_dispatcher(cfg: &Config) -> anyhow::Result<Dispatcher> {
    let portal = PortalClient::new(cfg.portal.base_url.clone(), cfg.portal.timeout())
        .context("failed to build portal client")?;
    let policy = cfg.policy().map_err(anyhow::Error::msg)?;
    let journal: Option<SharedJournal> = match &cfg.journal.path {
        Some(path) => {
            let journal = OutcomeJournal::open(path)
                .with_context(|| format!("failed to open journal {}", path.display()))?;
            Some(Arc::new(Mutex::new(journal)))
        }
        None => None,
    };
    Ok(Dispatcher::new(Arc::new(portal), cfg.portal.logout.clone())
        .with_policy(policy)
        .with_journal(journal))
}

fn runtime() -> anyhow::Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("tokio init failed")
}

fn run_controller(cfg: &Config) -> anyhow::Result<i32> {
    let supervisor_cfg = SupervisorConfig::from_control(&cfg.control)?;
    let dispatcher = Arc::new(build_dispatcher(cfg)?);
    runtime()?.block_on(async move {
        let mut supervisor = Supervisor::new(supervisor_cfg, dispatcher);
        tokio::select! {
            res = supervisor.run() => match res {
                Err(SupervisorError::RetriesExhausted { failures }) => {
                    error!(failures, "stopping: control channel unavailable");
                    Ok(EXIT_RETRIES_EXHAUSTED)
                }
                Err(e) => Err(anyhow::Error::new(e)),
                Ok(()) => Ok(0),
            },
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted, shutting down");
                Ok(0)
            }
        }
    })
}

fn run_poll(cfg: &Config, accounts: Option<PathBuf>, once: bool) -> anyhow::Result<i32> {
    let path = accounts.unwrap_or_else(|| cfg.poll.accounts_path.clone());
    let accounts = config::load_accounts(&path).map_err(anyhow::Error::msg)?;
    let dispatcher = Arc::new(build_dispatcher(cfg)?);
    let poller = Poller::new(dispatcher, accounts, Duration::from_secs(cfg.poll.interval_secs));
    runtime()?.block_on(async move {
        if once {
            let report = poller.run_once().await;
            info!(succeeded = report.succeeded, failed = report.failed, "poll pass finished");
            return Ok(if report.all_succeeded() { 0 } else { EXIT_FATAL });
        }
        tokio::select! {
            _ = poller.run() => Ok(0),
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted, shutting down");
                Ok(0)
            }
        }
    })
}

fn run_single(cfg: &Config, args: &AccountArgs, logout: bool) -> anyhow::Result<i32> {
    let dispatcher = build_dispatcher(cfg)?;
    let credential = args.credential();
    let frame = runtime()?.block_on(async {
        if logout {
            dispatcher.logout(&credential, &args.email).await
        } else {
            dispatcher.login(&credential, &args.email).await
        }
    });
    println!("{}", frame);
    Ok(if frame.success { 0 } else { EXIT_FATAL })
}

fn print_doctor(explicit: Option<&Path>, json: bool) {
    let report = match explicit {
        Some(path) => netkeep_core::doctor::doctor_check_at(path),
        None => netkeep_core::doctor::doctor_check(),
    };
    if json {
        match serde_json::to_string_pretty(&report) {
            Ok(json) => println!("{}", json),
            Err(e) => eprintln!("Failed to serialize doctor report: {}", e),
        }
    } else {
        println!("doctor: {}", report.overall);
        println!("version: {}", report.version);
        for check in report.checks {
            println!("- [{}] {}: {}", check.status, check.id, check.summary);
        }
    }
}

fn main() {
    let cli = Cli::parse();
    if let Err(err) = init_tracing(cli.log_file.as_deref(), cli.log_json) {
        eprintln!("Failed to initialise logging: {:#}", err);
        std::process::exit(EXIT_FATAL);
    }

    let result = match cli.command {
        Commands::Doctor { json } => {
            print_doctor(cli.config.as_deref(), json);
            Ok(0)
        }
        Commands::VerifyJournal { path } => match journal::verify_chain(&path) {
            Ok(count) => {
                println!("journal ok: {} entries ({})", count, path.display());
                Ok(0)
            }
            Err(e) => Err(anyhow::Error::new(e).context(format!("journal {} is invalid", path.display()))),
        },
        command => resolve_config(cli.config.as_deref()).and_then(|cfg| match command {
            Commands::Run => run_controller(&cfg),
            Commands::Poll { accounts, once } => run_poll(&cfg, accounts, once),
            Commands::Login(args) => run_single(&cfg, &args, false),
            Commands::Logout(args) => run_single(&cfg, &args, true),
            Commands::Doctor { .. } | Commands::VerifyJournal { .. } => Ok(0),
        }),
    };

    match result {
        Ok(0) => {}
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("Error: {:#}", err);
            std::process::exit(EXIT_FATAL);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_poll_with_global_flags() {
        let cli = Cli::try_parse_from([
            "netkeep",
            "poll",
            "--once",
            "--accounts",
            "users.json",
            "--config",
            "/etc/netkeep.toml",
            "--log-json",
        ])
        .expect("parse");
        assert_eq!(cli.config.as_deref(), Some(Path::new("/etc/netkeep.toml")));
        assert!(cli.log_json);
        match cli.command {
            Commands::Poll { accounts, once } => {
                assert!(once);
                assert_eq!(accounts.as_deref(), Some(Path::new("users.json")));
            }
            _ => panic!("expected poll"),
        }
    }

    #[test]
    fn login_args_build_credential() {
        let cli = Cli::try_parse_from([
            "netkeep", "login", "--username", "u1", "--password", "p1", "--ip", "10.0.0.5",
        ])
        .expect("parse");
        let Commands::Login(args) = cli.command else {
            panic!("expected login");
        };
        let credential = args.credential();
        assert_eq!(credential.username, "u1");
        assert_eq!(credential.wlan_user_ip, "10.0.0.5");
        assert_eq!(credential.wlan_ac_name, "");
    }

    #[test]
    fn login_requires_username() {
        assert!(Cli::try_parse_from(["netkeep", "login", "--ip", "10.0.0.5"]).is_err());
    }

    #[test]
    fn explicit_missing_config_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let missing = dir.path().join("nope.toml");
        let err = resolve_config(Some(missing.as_path())).unwrap_err();
        assert!(format!("{:#}", err).contains("failed to read config"));
    }

    #[test]
    fn explicit_config_is_validated() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[portal]\ntimeout_secs = 30\n").expect("write");
        let err = resolve_config(Some(path.as_path())).unwrap_err();
        assert!(format!("{:#}", err).contains("timeout"));
    }
}
