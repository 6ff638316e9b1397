//! valanse - terminal host for the valanse client session.
//!
//! Plays the part of the page header: it mounts the session on the shared
//! API client, runs activation (code exchange and silent refresh), logs out,
//! and issues resource requests that carry the current credential.

use std::io;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use valanse_core::api::{ApiClient, Gateway, HttpGateway};
use valanse_core::auth::{
    open_store, ActivationReport, CredentialStore, LogNavigator, Navigator, SessionManager,
    SessionPolicy, Slot,
};
use valanse_core::clock::{Ticker, TICK_INTERVAL};
use valanse_core::Config;

// ============================================================================
// Constants
// ============================================================================

/// Log file prefix when file logging is enabled
const LOG_FILE: &str = "valanse.log";

/// Default number of clock ticks to print
const DEFAULT_CLOCK_TICKS: u32 = 5;

const USAGE: &str = "\
Usage: valanse [--log-dir <dir>] <command>

Commands:
  activate [--url <landing-url>]  Run exchange/refresh for a page load
  status                          Show whether a credential is stored
  logout                          Revoke and clear stored credentials
  fetch <path>                    GET a resource with the current credential
  clock [--ticks <n>]             Print the live Seoul clock
  home                            Navigate to the application root
  help                            Show this message";

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Activate { url: Option<String> },
    Status,
    Logout,
    Fetch { path: String },
    Clock { ticks: u32 },
    Home,
    Help,
}

#[derive(Debug)]
struct Cli {
    command: Command,
    log_dir: Option<PathBuf>,
}

fn parse_args(args: &[String]) -> Result<Cli> {
    let mut log_dir = None;
    let mut rest = Vec::new();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if arg == "--log-dir" {
            let dir = iter.next().context("--log-dir requires a directory")?;
            log_dir = Some(PathBuf::from(dir));
        } else {
            rest.push(arg.as_str());
        }
    }

    let command = match rest.as_slice() {
        [] | ["help"] | ["--help"] | ["-h"] => Command::Help,
        ["activate"] => Command::Activate { url: None },
        ["activate", "--url", url] => Command::Activate {
            url: Some(url.to_string()),
        },
        ["status"] => Command::Status,
        ["logout"] => Command::Logout,
        ["fetch", path] => Command::Fetch {
            path: path.to_string(),
        },
        ["clock"] => Command::Clock {
            ticks: DEFAULT_CLOCK_TICKS,
        },
        ["clock", "--ticks", n] => Command::Clock {
            ticks: n.parse().with_context(|| format!("Invalid tick count: {}", n))?,
        },
        ["home"] => Command::Home,
        other => bail!("Unrecognized arguments: {}\n\n{}", other.join(" "), USAGE),
    };

    Ok(Cli { command, log_dir })
}

/// Initialize the tracing subscriber for logging
fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_writer(writer).with_ansi(false)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let cli = parse_args(&args)?;
    let _log_guard = init_tracing(cli.log_dir.as_deref());

    if cli.command == Command::Help {
        println!("{}", USAGE);
        return Ok(());
    }

    let config = match Config::load() {
        Ok(c) => c,
        Err(e) => {
            warn!(error = %e, "Failed to load config, using defaults");
            Config::default()
        }
    };
    let cache_dir = config.cache_dir().unwrap_or_else(|_| PathBuf::from("./cache"));
    info!(api = %config.api_base_url, store = ?config.store_backend, "valanse starting");

    let store = open_store(config.store_backend, &cache_dir);
    let api = ApiClient::new(&config.api_base_url, config.request_timeout())
        .context("Failed to build HTTP client")?;
    let gateway = HttpGateway::with_client(api.http().clone(), &config.api_base_url);
    let session = SessionManager::new(gateway, store.clone(), SessionPolicy::from(&config));

    run(cli.command, &config, &session, store.as_ref(), &api, &LogNavigator).await
}

async fn run<G: Gateway, S: CredentialStore + Clone + 'static>(
    command: Command,
    config: &Config,
    session: &SessionManager<G, S>,
    store: &dyn CredentialStore,
    api: &ApiClient,
    navigator: &dyn Navigator,
) -> Result<()> {
    match command {
        Command::Activate { url } => {
            let _mount = session.mount(api);
            let landing = url.unwrap_or_else(|| config.app_url.clone());
            let report = session.activate(&landing).await;
            print_activation(&report);
            if let Some(redirect) = &report.redirect {
                navigator.navigate(redirect);
            }
        }
        Command::Status => {
            println!("status:   {:?}", session.status());
            println!(
                "refresh:  {}",
                if store.contains(Slot::Refresh)? { "stored" } else { "none" }
            );
        }
        Command::Logout => {
            let report = session.logout().await.context("Failed to clear credentials")?;
            match report.revoke {
                Some(Ok(())) => println!("revoked:  yes"),
                Some(Err(e)) => println!("revoked:  no ({})", e),
                None => println!("revoked:  nothing to revoke"),
            }
            println!("status:   {:?}", session.status());
            navigator.navigate(&report.redirect);
        }
        Command::Fetch { path } => {
            let _mount = session.mount(api);
            // Activation and the request start together; the readiness gate
            // holds the request until any refresh has settled.
            let (report, body) = tokio::join!(
                session.activate(&config.app_url),
                api.get_json::<serde_json::Value>(&path)
            );
            for e in report.errors() {
                warn!(error = %e, "Activation step failed");
            }
            let body = body.with_context(|| format!("Request to {} failed", path))?;
            println!("{}", serde_json::to_string_pretty(&body)?);
        }
        Command::Clock { ticks } => {
            let mut mount = session.mount(api);
            mount.attach_ticker(Ticker::start(TICK_INTERVAL));
            if let Some(ticker) = mount.ticker() {
                let mut rx = ticker.subscribe();
                for _ in 0..ticks {
                    if rx.changed().await.is_err() {
                        break;
                    }
                    let now = rx.borrow_and_update().clone();
                    println!("{}", now);
                }
            }
        }
        Command::Home => navigator.navigate(&session.home()),
        Command::Help => println!("{}", USAGE),
    }
    Ok(())
}

fn print_activation(report: &ActivationReport) {
    match &report.exchange {
        Some(Ok(outcome)) => println!("exchange: {:?}", outcome),
        Some(Err(e)) => println!("exchange: failed ({})", e),
        None => println!("exchange: no code"),
    }
    match &report.refresh {
        Some(Ok(outcome)) => println!("refresh:  {:?}", outcome),
        Some(Err(e)) => println!("refresh:  failed ({})", e),
        None => println!("refresh:  no refresh credential"),
    }
    println!("status:   {:?}", report.status);
}

// ============================================================================
// Tests
// ============================================================================
