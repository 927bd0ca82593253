//! opcua-test-server
//!
//! Starts an OPC UA server for an external test process and reports its
//! status as tagged JSON lines on stdout. A `{"type":"shutdown"}` line on
//! stdin stops it.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use opcua_test_harness::config::Config;
use opcua_test_harness::harness::Harness;
use opcua_test_harness::runtime::ProcessRuntime;

#[derive(Parser, Debug)]
#[command(name = "opcua-test-server")]
#[command(about = "OPC UA test server driven over stdin/stdout")]
struct Args {
    /// JSON settings file (overrides OPCUA_HARNESS_CONFIG)
    #[arg(long)]
    settings: Option<PathBuf>,

    /// OPC UA server configuration file
    #[arg(long)]
    server_config: Option<PathBuf>,

    /// OPC UA server executable
    #[arg(long)]
    server_exec: Option<String>,

    /// Extra argument for the server executable (repeatable)
    #[arg(long = "server-arg", allow_hyphen_values = true)]
    server_args: Vec<String>,

    /// Milliseconds the server must stay up to count as started
    #[arg(long)]
    startup_grace_ms: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    fn load_config(&self) -> Result<Config> {
        let mut config = match &self.settings {
            Some(path) => Config::from_file(path)?,
            None => Config::from_env()?,
        };

        if let Some(path) = &self.server_config {
            config.server.config_path.clone_from(path);
        }
        if let Some(exec) = &self.server_exec {
            config.server.exec = Some(exec.clone());
        }
        if !self.server_args.is_empty() {
            config.server.args.clone_from(&self.server_args);
        }
        if let Some(ms) = self.startup_grace_ms {
            config.server.startup_grace_ms = ms;
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging (stderr so stdout is free for the message channel)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = args.load_config().context("Failed to load configuration")?;

    info!(
        config_path = %config.server.config_path.display(),
        exec = ?config.server.exec,
        "Loaded configuration"
    );

    let runtime = ProcessRuntime::new(&config.server);
    let harness = Harness::new(runtime, &config, tokio::io::stdout());

    let cancel = harness.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, shutting down");
            cancel.cancel();
        }
    });

    let code = match harness.run(tokio::io::stdin()).await {
        Ok(outcome) => i32::from(outcome.code()),
        Err(e) => {
            error!(error = %format!("{e:#}"), "Harness failed");
            1
        }
    };

    // The stdin reader may still be parked in a blocking read; exit without
    // waiting for it.
    std::process::exit(code)
}
