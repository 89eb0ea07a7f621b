//! taxtrack - sign in and review your tax dashboard from the terminal.
//!
//! Logs are written to `taxtrack.log` in the cache directory. Use the
//! RUST_LOG env var to control the level (e.g. RUST_LOG=debug).

mod commands;

use std::io;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use taxtrack_core::api::error_message;
use taxtrack_core::{ApiClient, ClientConfig, Config, Session};

/// Log file name in cache directory
const LOG_FILE: &str = "taxtrack.log";

#[derive(Parser)]
#[command(name = "taxtrack", version, about = "Track income, deductions and estimated taxes")]
struct Cli {
    /// API base address (overrides TAXTRACK_API_URL and the config file)
    #[arg(long, global = true)]
    api_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Sign in with email and password
    Login {
        #[arg(long)]
        email: Option<String>,
    },
    /// Create an account and sign in
    Register {
        #[arg(long)]
        email: String,
        #[arg(long)]
        name: Option<String>,
    },
    /// Sign out and forget stored credentials
    Logout,
    /// Show connection and sign-in status
    Status,
    /// Show the year-to-date tax dashboard
    Summary,
}

/// Initialize the tracing subscriber, logging to a file when possible
fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    match log_dir {
        Some(dir) if std::fs::create_dir_all(dir).is_ok() => {
            let appender = tracing_appender::rolling::never(dir, LOG_FILE);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(fmt::layer().with_writer(writer).with_ansi(false))
                .with(filter)
                .init();
            Some(guard)
        }
        _ => {
            tracing_subscriber::registry()
                .with(fmt::layer().with_writer(io::stderr))
                .with(filter)
                .init();
            None
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Warning: {:#} - using default configuration", e);
            Config::default()
        }
    };

    let _log_guard = init_tracing(config.cache_dir().ok().as_deref());
    info!("taxtrack starting");

    match run(cli, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            warn!(error = %format!("{:#}", e), "Command failed");
            eprintln!("Error: {}", error_message(&e));
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli, mut config: Config) -> Result<()> {
    let base_url = cli.api_url.unwrap_or_else(|| config.api_base_url());

    let store = config.token_store().context("Failed to open token storage")?;
    let session = Arc::new(Session::init(store, true).context("Failed to load session")?);
    let mut events = session.subscribe();

    let client = ApiClient::new(ClientConfig::new(base_url), session)
        .context("Failed to create API client")?;

    let result = match cli.command {
        Command::Login { email } => commands::login(&client, &mut config, email).await,
        Command::Register { email, name } => {
            commands::register(&client, &mut config, &email, name.as_deref()).await
        }
        Command::Logout => commands::logout(&client).await,
        Command::Status => commands::status(&client, &config).await,
        Command::Summary => commands::summary(&client).await,
    };

    commands::report_session_events(&mut events);
    result
}
