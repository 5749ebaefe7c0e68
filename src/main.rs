//! page-mcp-bridge - dev-server side of the page MCP bridge
//!
//! Serves the MCP endpoint over HTTP and accepts page connections on a
//! websocket. Pages register the handlers; this process only knows the tool
//! descriptors and their server methods.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use page_mcp_bridge::tools::{builtin_descriptors, ToolSet};
use page_mcp_bridge::{BridgeConfig, BridgeServer};

/// MCP bridge for tools running in a dev-session page.
#[derive(Parser, Debug)]
#[command(name = "page-mcp-bridge")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// JSON config file; flags below override it.
    #[arg(long)]
    config: Option<PathBuf>,

    /// HTTP path of the MCP endpoint.
    #[arg(long)]
    endpoint: Option<String>,

    /// Websocket path pages connect to.
    #[arg(long)]
    bridge_path: Option<String>,

    /// Server name reported to MCP clients.
    #[arg(long)]
    name: Option<String>,

    /// Server version reported to MCP clients.
    #[arg(long)]
    server_version: Option<String>,

    /// Interface to bind.
    #[arg(long)]
    host: Option<String>,

    /// Port to bind.
    #[arg(short, long)]
    port: Option<u16>,

    /// Abandon tool and server-method calls after this many milliseconds.
    #[arg(long)]
    call_timeout_ms: Option<u64>,

    /// Directory screenshots are saved to.
    #[arg(long)]
    screenshots_dir: Option<PathBuf>,

    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,

    /// Emit logs as JSON lines.
    #[arg(long)]
    json_logs: bool,

    /// Log output file (default: stderr).
    #[arg(long)]
    log_file: Option<PathBuf>,
}

impl Args {
    fn into_config(self) -> anyhow::Result<BridgeConfig> {
        let mut config = match &self.config {
            Some(path) => BridgeConfig::from_file(path)
                .with_context(|| format!("reading config {}", path.display()))?,
            None => BridgeConfig::default(),
        };

        if let Some(endpoint) = self.endpoint {
            config.endpoint = endpoint;
        }
        if let Some(bridge_path) = self.bridge_path {
            config.bridge_path = bridge_path;
        }
        if let Some(name) = self.name {
            config.name = name;
        }
        if let Some(version) = self.server_version {
            config.version = version;
        }
        if let Some(host) = self.host {
            config.host = host;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if self.call_timeout_ms.is_some() {
            config.call_timeout_ms = self.call_timeout_ms;
        }
        if let Some(dir) = self.screenshots_dir {
            config.screenshots_dir = dir;
        }
        Ok(config)
    }
}

fn init_logging(args: &Args) -> anyhow::Result<()> {
    let default_level = if args.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let writer = match &args.log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("opening log file {}", path.display()))?;
            fmt::writer::BoxMakeWriter::new(std::sync::Mutex::new(file))
        }
        None => fmt::writer::BoxMakeWriter::new(std::io::stderr),
    };

    let registry = tracing_subscriber::registry().with(filter);
    if args.json_logs {
        registry.with(fmt::layer().json().with_writer(writer)).init();
    } else {
        registry.with(fmt::layer().with_writer(writer)).init();
    }
    Ok(())
}

async fn run(args: Args) -> anyhow::Result<()> {
    let config = args.into_config()?;
    let tools = ToolSet::new(builtin_descriptors(&config)).context("registering tools")?;

    tracing::info!(
        "Starting {} v{} ({} tools)",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        tools.len()
    );

    BridgeServer::new(config, tools)
        .context("invalid server config")?
        .serve()
        .await?;
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    if let Err(e) = init_logging(&args) {
        eprintln!("failed to set up logging: {e:#}");
        return ExitCode::FAILURE;
    }

    match run(args).await {
        Ok(()) => {
            tracing::info!("Server exited cleanly");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!("Server error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
