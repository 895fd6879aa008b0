//! mcp-learning-server: MCP server with a hot-reloadable capability registry
//!
//! Serves tools, resources and prompts from the enabled providers over stdio
//! (the default) or HTTP.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tracing::{error, info, Level};
use tracing_subscriber::EnvFilter;

use mcp_learning_server::capability::CapabilityKind;
use mcp_learning_server::config::{self, ConfigSource, ConfigStore, HttpConfig};
use mcp_learning_server::http;
use mcp_learning_server::mcp::server::{self, McpServer};
use mcp_learning_server::mcp::{Dispatcher, DispatcherSettings, Metrics};
use mcp_learning_server::provider::ProviderCatalog;
use mcp_learning_server::registry::{CapabilityRegistry, RegistrySnapshot};

/// MCP server exposing configurable tools, resources and prompts.
///
/// Sending SIGHUP reloads the configuration file without a restart.
#[derive(Parser, Debug)]
#[command(name = "mcp-learning-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(value_name = "CONFIG_FILE")]
    config: Option<PathBuf>,

    /// Increase logging verbosity (-v for info, -vv for debug, -vvv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Decrease logging verbosity (only show errors)
    #[arg(short, long)]
    quiet: bool,

    /// Transport to serve
    #[arg(long, value_enum, default_value_t = Transport::Stdio)]
    transport: Transport,

    /// HTTP bind address (overrides the config file)
    #[arg(long)]
    host: Option<String>,

    /// HTTP port (overrides the config file)
    #[arg(long)]
    port: Option<u16>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Transport {
    Stdio,
    Http,
}

/// Determines the log level from CLI arguments.
#[allow(clippy::match_same_arms)] // Explicit "warn" arm for clarity
fn get_log_level(verbose: u8, quiet: bool, config_level: &str) -> Level {
    if quiet {
        return Level::ERROR;
    }

    match verbose {
        0 => match config_level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "info" => Level::INFO,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::WARN, // Default to warn for unknown levels
        },
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

/// Initialises the tracing subscriber for logging.
///
/// Logs go to stderr; stdout carries protocol messages.
fn init_tracing(level: Level, json: bool) {
    let filter = EnvFilter::from_default_env().add_directive(level.into());
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn http_config(base: &HttpConfig, args: &Args) -> HttpConfig {
    let mut http = base.clone();
    if let Some(host) = &args.host {
        http.host.clone_from(host);
    }
    if let Some(port) = args.port {
        http.port = port;
    }
    http
}

async fn run(args: Args, store: Arc<ConfigStore>, snapshot: RegistrySnapshot) -> std::io::Result<()> {
    let cfg = store.config();
    let registry = Arc::new(CapabilityRegistry::with_snapshot(snapshot));
    let metrics = Arc::new(Metrics::new());
    let dispatcher = Arc::new(
        Dispatcher::new(registry, DispatcherSettings::from(&cfg.server))
            .with_config_store(Arc::clone(&store))
            .with_metrics(Arc::clone(&metrics)),
    );

    #[cfg(unix)]
    let _hangup = server::spawn_reload_on_hangup(Arc::clone(&dispatcher))?;

    match args.transport {
        Transport::Stdio => {
            info!("MCP server ready, waiting for client connection...");
            McpServer::new(dispatcher).run().await
        }
        Transport::Http => {
            let http_cfg = http_config(&cfg.http, &args);
            let shutdown = async move {
                match server::shutdown_signal().await {
                    Ok(signal) => info!(signal, "Received signal, initiating graceful shutdown"),
                    Err(e) => {
                        error!(error = %e, "Cannot install signal handlers");
                        std::future::pending::<()>().await;
                    }
                }
                metrics.begin_shutdown();
            };
            http::serve(dispatcher, &http_cfg, shutdown).await
        }
    }
}

/// Entry point for the mcp-learning-server.
fn main() -> ExitCode {
    let args = Args::parse();

    // Load configuration
    let source = ConfigSource::discover(args.config.as_deref());
    let store = match ConfigStore::load(source, ProviderCatalog::builtin()) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            eprintln!("Configuration error: {e}");
            if args.config.is_none() {
                if let Some(default_path) = config::default_config_path() {
                    eprintln!("\nConfig read from: {}", default_path.display());
                    eprintln!("See config/example-config.json for the expected layout");
                }
            }
            return ExitCode::FAILURE;
        }
    };
    let snapshot = match store.snapshot() {
        Ok(snapshot) => snapshot,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            return ExitCode::FAILURE;
        }
    };

    // Initialise logging
    let cfg = store.config();
    let log_level = get_log_level(args.verbose, args.quiet, &cfg.logging.level);
    init_tracing(log_level, cfg.logging.format == "json");

    // Display GPL license notice (required by GPLv3 Section 5d)
    eprintln!(
        "mcp-learning-server {}  Copyright (C) 2026  The Embedded Society",
        env!("CARGO_PKG_VERSION")
    );
    eprintln!("This program comes with ABSOLUTELY NO WARRANTY.");
    eprintln!("This is free software, licensed under GPL-3.0-or-later.");
    eprintln!();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        source = %store.source(),
        transport = ?args.transport,
        tools = snapshot.len(CapabilityKind::Tool),
        resources = snapshot.len(CapabilityKind::Resource),
        prompts = snapshot.len(CapabilityKind::Prompt),
        "Starting mcp-learning-server"
    );

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Failed to create Tokio runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    let result = runtime.block_on(run(args, store, snapshot));
    // A blocking stdin read must not hold the process open.
    runtime.shutdown_timeout(Duration::from_secs(1));

    match result {
        Ok(()) => {
            info!("Server shut down gracefully");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "Server error");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        Args::command().debug_assert();
    }

    #[test]
    fn cli_overrides_http_section() {
        let args = Args::parse_from(["mcp-learning-server", "--transport", "http", "--port", "9100"]);
        assert_eq!(args.transport, Transport::Http);

        let http = http_config(&HttpConfig::default(), &args);
        assert_eq!(http.port, 9100);
        assert_eq!(http.host, HttpConfig::default().host);
    }

    #[test]
    fn quiet_wins_over_verbose() {
        assert_eq!(get_log_level(3, true, "trace"), Level::ERROR);
        assert_eq!(get_log_level(0, false, "debug"), Level::DEBUG);
        assert_eq!(get_log_level(0, false, "bogus"), Level::WARN);
    }
}
