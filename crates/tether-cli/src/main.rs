//! Tether CLI
//!
//! Command-line front end for the tether network layer: sign in, issue
//! requests against the platform API, inspect and replay the offline queue,
//! and follow realtime events.

use anyhow::Result;
use clap::{Parser, Subcommand};
use tether_core::{ClientError, StorageError};
use tracing_subscriber::EnvFilter;

mod commands;
mod output;

use output::{Output, OutputFormat};

#[derive(Parser)]
#[command(name = "tether")]
#[command(about = "Tether - resilient client for the school platform API")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Quiet mode - minimal output
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign in (password from TETHER_PASSWORD or prompt)
    Login {
        /// Account email
        email: String,
    },
    /// Sign out and drop cached responses
    Logout,
    /// Issue a GET request
    Get {
        /// Path relative to the API base URL
        path: String,
        /// Query parameter (key=value)
        #[arg(short = 'Q', long = "query", value_parser = commands::parse_pair)]
        query: Vec<(String, String)>,
    },
    /// Issue a write request
    Send {
        /// HTTP method (POST, PUT, PATCH, DELETE)
        method: String,
        /// Path relative to the API base URL
        path: String,
        /// JSON body
        #[arg(short = 'd', long, conflicts_with_all = ["field", "file"])]
        body: Option<String>,
        /// Multipart text field (name=value)
        #[arg(long, value_parser = commands::parse_pair)]
        field: Vec<(String, String)>,
        /// Multipart file field (name=path)
        #[arg(long, value_parser = commands::parse_pair)]
        file: Vec<(String, String)>,
    },
    /// Inspect or replay the offline queue
    Queue {
        #[command(subcommand)]
        command: Option<QueueCommands>,
    },
    /// Print realtime events until interrupted
    Listen {
        /// Event names to follow
        #[arg(required = true)]
        events: Vec<String>,
    },
    /// Show session, network and queue status
    Status,
    /// Show or set configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand)]
enum QueueCommands {
    /// List pending writes
    #[command(alias = "ls")]
    List,
    /// Deliver pending writes now
    Replay,
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Set a configuration value
    Set {
        /// Configuration key (api_base_url, realtime_url, reconnect.max_attempts, ...)
        key: String,
        /// Configuration value
        value: String,
    },
    /// Print the config file path
    Path,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let output = Output::new(OutputFormat::from_flags(cli.json, cli.quiet));

    init_logging();

    let result = run(cli.command, &output).await;
    if let Err(ref e) = result {
        if let Some(hint) = recovery_hint(e) {
            eprintln!("hint: {}", hint);
        }
    }
    result
}

async fn run(command: Commands, output: &Output) -> Result<()> {
    match command {
        Commands::Login { email } => commands::auth::login(email, output).await,
        Commands::Logout => commands::auth::logout(output).await,
        Commands::Get { path, query } => commands::request::get(path, query, output).await,
        Commands::Send {
            method,
            path,
            body,
            field,
            file,
        } => commands::request::send(method, path, body, field, file, output).await,
        Commands::Queue { command } => match command {
            Some(QueueCommands::List) | None => commands::queue::list(output).await,
            Some(QueueCommands::Replay) => commands::queue::replay(output).await,
        },
        Commands::Listen { events } => commands::listen::listen(events, output).await,
        Commands::Status => commands::status::show(output).await,
        Commands::Config { command } => match command {
            Some(ConfigCommands::Show) | None => commands::config::show(output),
            Some(ConfigCommands::Set { key, value }) => commands::config::set(key, value, output),
            Some(ConfigCommands::Path) => commands::config::path(output),
        },
    }
}

/// Recovery advice for storage failures, wherever they sit in the chain
fn recovery_hint(error: &anyhow::Error) -> Option<&'static str> {
    error.chain().find_map(|cause| {
        if let Some(storage) = cause.downcast_ref::<StorageError>() {
            return storage.recovery_suggestion();
        }
        match cause.downcast_ref::<ClientError>() {
            Some(ClientError::Storage(storage)) => storage.recovery_suggestion(),
            _ => None,
        }
    })
}

/// Initialize logging to stderr
///
/// Only initializes if TETHER_LOG environment variable is set.
fn init_logging() {
    let Ok(log_level) = std::env::var("TETHER_LOG") else {
        return;
    };

    let env_filter = EnvFilter::new(format!(
        "tether_core={},tether_cli={}",
        log_level, log_level
    ));

    // Ignore error if already initialized
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_ansi(atty::is(atty::Stream::Stderr))
        .with_writer(std::io::stderr)
        .try_init();
}
