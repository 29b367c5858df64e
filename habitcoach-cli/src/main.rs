//! Habitcoach CLI: terminal host for the goal-setting coach.
//!
//! Runs the interactive coaching chat, plus one-shot extraction and
//! completion-detection commands for checking replies by hand.

mod commands;
mod repl;

use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Habitcoach: set a habit goal by talking it through
#[derive(Parser, Debug)]
#[command(name = "habitcoach", version, about, long_about = None)]
struct Cli {
    /// Workspace directory (for `.habitcoach/config.toml`)
    #[arg(short, long, default_value = ".")]
    workspace: PathBuf,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress everything but errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Start an interactive coaching conversation
    Chat {
        /// Conversation mode: goal, plan or report
        #[arg(long)]
        mode: Option<String>,

        /// Your name, if the coach should skip asking for it
        #[arg(long)]
        name: Option<String>,

        /// Model to use instead of the configured one
        #[arg(short, long)]
        model: Option<String>,

        /// Use the offline mock provider
        #[arg(long)]
        mock: bool,
    },
    /// Extract goal fields from a piece of text
    Extract {
        /// Text to extract from (a user answer or a full AI reply)
        text: String,

        /// Also show which pattern produced each field
        #[arg(long)]
        explain: bool,
    },
    /// Classify an AI reply with the completion detector
    Detect {
        /// The AI reply text
        text: String,
    },
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },
}

#[derive(clap::Subcommand, Debug)]
enum ConfigAction {
    /// Create default configuration file
    Init,
    /// Show the effective configuration
    Show,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    // Set up tracing: human-readable stderr + JSON file logging.
    // The chat prints to stdout, so stderr stays quiet unless asked.
    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::new(filter));

    let log_dir = directories::ProjectDirs::from("dev", "habitcoach", "habitcoach")
        .map(|d| d.data_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from("."));
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "habitcoach.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("debug"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let workspace = cli
        .workspace
        .canonicalize()
        .unwrap_or_else(|_| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

    commands::handle_command(cli.command, &workspace).await
}
