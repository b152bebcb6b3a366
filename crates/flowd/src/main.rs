//! flowd: the FlowGrid daemon.
//!
//! Runs the coordinator: state store (redb), worker RPC clients (tonic),
//! scheduling, monitoring and heartbeat ticks, and the HTTP API (axum).
//!
//! # Usage
//!
//! ```text
//! flowd coordinator --config /etc/flowgrid/flowd.toml --port 8080
//! flowd --log-format json coordinator --data-dir /var/lib/flowgrid
//! ```

mod config;
mod coordinator;

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};

use crate::config::{CoordinatorConfig, parse_duration};

#[derive(Parser)]
#[command(name = "flowd", about = "FlowGrid daemon")]
struct Cli {
    /// Log output format.
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
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
    /// Run the coordinator.
    Coordinator {
        /// TOML config file. Flags below override its values.
        #[arg(long)]
        config: Option<PathBuf>,

        /// HTTP port for the API and ingest proxy.
        #[arg(long)]
        port: Option<u16>,

        /// Data directory for persistent state.
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Scheduling tick, e.g. "3s".
        #[arg(long, value_parser = parse_duration)]
        assign_interval: Option<Duration>,

        /// Monitoring tick, e.g. "5s".
        #[arg(long, value_parser = parse_duration)]
        monitor_interval: Option<Duration>,

        /// Workers silent for longer than this are deactivated.
        #[arg(long, value_parser = parse_duration)]
        heartbeat_timeout: Option<Duration>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match cli.command {
        Command::Coordinator {
            config,
            port,
            data_dir,
            assign_interval,
            monitor_interval,
            heartbeat_timeout,
        } => {
            let mut settings = match config {
                Some(path) => CoordinatorConfig::from_file(&path)?,
                None => CoordinatorConfig::default(),
            };
            if let Some(port) = port {
                settings.http_port = port;
            }
            if let Some(data_dir) = data_dir {
                settings.data_dir = data_dir;
            }
            if let Some(interval) = assign_interval {
                settings.assign_interval = interval;
            }
            if let Some(interval) = monitor_interval {
                settings.monitor_interval = interval;
            }
            if let Some(timeout) = heartbeat_timeout {
                settings.heartbeat_timeout = timeout;
            }
            settings.validate()?;

            coordinator::run_coordinator(settings).await
        }
    }
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,flowd=debug,flowgrid=debug"));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}
