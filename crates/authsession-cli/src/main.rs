//! authsession - command-line client for token-authenticated backends.
//!
//! Logs in, keeps the refresh token between runs and issues authenticated
//! requests that silently refresh an expired session.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use authsession_core::{
    AuthClient, AuthConfig, FileStorage, KeyringStorage, MemoryStorage, ReqwestTransport,
    SessionOptions, SessionStore, TokenStorage,
};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "authsession", version, about)]
struct Cli {
    /// Config file (defaults to the platform config directory)
    #[arg(long, env = "AUTHSESSION_CONFIG")]
    config: Option<PathBuf>,

    /// Backend base URL, overriding the config file
    #[arg(long, env = "AUTHSESSION_BASE_URL")]
    base_url: Option<String>,

    /// Where the refresh token is kept between runs
    #[arg(long, value_enum, default_value_t = StorageKind::File)]
    storage: StorageKind,

    /// Write logs to daily-rotated files in this directory instead of stderr
    #[arg(long)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum StorageKind {
    File,
    Keyring,
    Memory,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Start a session (prompts for the password)
    Login { username: String },
    /// End the current session
    Logoff,
    /// Print the current user data
    Whoami {
        /// Refresh the session before printing
        #[arg(long)]
        refresh: bool,
    },
    /// GET a path through the refreshing client and print the body
    Get { target: String },
}

/// Initialize the tracing subscriber for logging
fn init_tracing(log_dir: Option<&PathBuf>) -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "authsession.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(fmt::layer().with_writer(writer).with_ansi(false))
                .with(filter)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry()
                .with(fmt::layer().with_writer(io::stderr))
                .with(filter)
                .init();
            None
        }
    }
}

fn load_config(cli: &Cli) -> Result<AuthConfig> {
    let mut config = match &cli.config {
        Some(path) => AuthConfig::from_file(path)?.with_env_overrides(),
        None => AuthConfig::load()?,
    };
    if let Some(base_url) = &cli.base_url {
        config.base_url = base_url.clone();
    }
    Ok(config.normalized())
}

fn open_storage(kind: StorageKind) -> Result<Arc<dyn TokenStorage>> {
    let storage: Arc<dyn TokenStorage> = match kind {
        StorageKind::File => Arc::new(FileStorage::default_location()?),
        StorageKind::Keyring => Arc::new(KeyringStorage::default()),
        StorageKind::Memory => Arc::new(MemoryStorage::new()),
    };
    Ok(storage)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let _log_guard = init_tracing(cli.log_dir.as_ref());
    info!("authsession starting");

    let config = load_config(&cli)?;
    let transport = Arc::new(
        ReqwestTransport::from_config(&config).context("Failed to build HTTP client")?,
    );
    let storage = open_storage(cli.storage)?;

    let options = SessionOptions::new(config)
        .on_session_abort(|| eprintln!("Session ended - run `authsession login` to sign in again"));
    let store = SessionStore::new(options, transport, storage);
    store.add_listener(|user_data| match user_data {
        Some(data) => info!(fields = data.as_map().len(), "Session changed"),
        None => info!("Session cleared"),
    });
    let client = AuthClient::new(store.clone());

    match cli.command {
        Command::Login { username } => {
            let password = rpassword::prompt_password(format!("Password for {}: ", username))
                .context("Failed to read password")?;
            if store.login(&username, &password).await {
                println!("Logged in as {}", username);
            } else {
                anyhow::bail!("Incorrect username or password");
            }
        }
        Command::Logoff => {
            store.logoff().await;
            println!("Logged off");
        }
        Command::Whoami { refresh } => match store.get_user_data(refresh).await {
            Some(data) => println!("{}", serde_json::to_string_pretty(&data)?),
            None => anyhow::bail!("Not logged in"),
        },
        Command::Get { target } => {
            let response = client.get(&target).await?;
            eprintln!("{}", response.status());
            println!("{}", response.text());
            if !response.is_success() {
                anyhow::bail!("Request failed with status {}", response.status());
            }
        }
    }

    info!("authsession shutting down");
    Ok(())
}
