//! stackwatchd: the stackwatch daemon.
//!
//! Loads the service registry, wires the health engine to Docker, and
//! either runs the monitoring loop or performs a single pass.
//!
//! # Usage
//!
//! ```text
//! stackwatchd run --config stackwatch.toml --compose-file base/docker-compose.yml
//! stackwatchd check --json
//! stackwatchd history ollama --limit 20
//! ```

mod daemon;
mod docker;

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "stackwatchd", about = "Health monitor and auto-restarter for a Docker Compose stack")]
struct Cli {
    /// Service registry file. Defaults to the built-in stack.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Compose file used for restarts.
    #[arg(long, global = true, default_value = "base/docker-compose.yml")]
    compose_file: PathBuf,

    /// Log output format.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Monitor continuously until Ctrl-C.
    Run,

    /// Check every service once and print a report.
    Check {
        /// Print the report as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Check every service once and print one service's history.
    History {
        /// Service to show.
        service: String,

        /// Maximum number of entries.
        #[arg(long, default_value_t = stackwatch_health::DEFAULT_HISTORY_QUERY)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let checker = daemon::build_checker(cli.config.as_deref(), &cli.compose_file).await?;

    match cli.command {
        Command::Run => daemon::run(checker).await,
        Command::Check { json } => daemon::check(&checker, json).await,
        Command::History { service, limit } => daemon::history(&checker, &service, limit).await,
    }
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,stackwatch=debug"));

    // Logs go to stderr so reports on stdout stay machine-readable.
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}
