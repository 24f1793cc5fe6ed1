//! Mockasite CLI
//!
//! Compiles a JSONL capture into fixtures and replays them offline.
//!
//! Usage:
//!   mockasite ingest --capture traffic.jsonl --root mock_data
//!   mockasite serve --root mock_data --port 5000
//!   mockasite fingerprint --method GET --path /api/data --query page,limit --origin https://app.test
//!
//! Environment:
//!   MOCKASITE_CONFIG - TOML config file (default: mockasite.toml)
//!   MOCKASITE_ROOT - Fixture root (overrides config)
//!   MOCKASITE_HOST - Replay bind address (overrides config)
//!   MOCKASITE_PORT - Replay port (overrides config)
//!   RUST_LOG - Log filter (default: mockasite=info,tower_http=info)

use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mockasite::mock::{self, CaptureReader, MatchingEngine, RequestDescriptor};
use mockasite::MockConfig;

#[derive(Parser, Debug)]
#[command(name = "mockasite")]
#[command(about = "Record and replay HTTP traffic deterministically")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Compile a capture file into fixtures and an index
    Ingest {
        /// JSONL capture produced by the recording proxy
        #[arg(long)]
        capture: PathBuf,

        /// Fixture root
        #[arg(long, env = "MOCKASITE_ROOT")]
        root: Option<PathBuf>,
    },

    /// Serve recorded fixtures
    Serve {
        /// Fixture root
        #[arg(long, env = "MOCKASITE_ROOT")]
        root: Option<PathBuf>,

        /// Bind address
        #[arg(long, env = "MOCKASITE_HOST")]
        host: Option<IpAddr>,

        /// Listen port
        #[arg(long, env = "MOCKASITE_PORT")]
        port: Option<u16>,

        /// Do not fill in Access-Control-Allow-Origin
        #[arg(long, default_value = "false")]
        no_cors: bool,
    },

    /// Print the fingerprint a request would map to
    Fingerprint {
        #[arg(long, default_value = "GET")]
        method: String,

        #[arg(long)]
        path: String,

        /// Query parameter names (comma-separated)
        #[arg(long, value_delimiter = ',')]
        query: Vec<String>,

        /// Origin header value
        #[arg(long)]
        origin: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    load_env();
    init_tracing();

    let cli = Cli::parse();
    let mut config = MockConfig::from_env();

    match cli.command {
        Command::Ingest { capture, root } => {
            if let Some(root) = root {
                config.store.root = root;
            }
            run_ingest(&config, &capture)
        }
        Command::Serve {
            root,
            host,
            port,
            no_cors,
        } => {
            if let Some(root) = root {
                config.store.root = root;
            }
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            if no_cors {
                config.server.cors = false;
            }
            run_serve(&config).await
        }
        Command::Fingerprint {
            method,
            path,
            query,
            origin,
        } => {
            let mut request = RequestDescriptor::new(method, path).with_query_names(query);
            if let Some(origin) = origin {
                request = request.with_origin(origin);
            }
            let fingerprint = config.fingerprinter().fingerprint(&request)?;
            println!("{}", fingerprint);
            Ok(())
        }
    }
}

fn load_env() {
    let _ = dotenv();
}

/// Logs go to stderr; stdout carries command output only.
fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mockasite=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn run_ingest(config: &MockConfig, capture: &Path) -> Result<()> {
    info!(
        capture = %capture.display(),
        root = %config.store.root.display(),
        "Ingesting capture"
    );

    let mut store = config.store_handle();
    // Re-ingesting into an existing root extends its index.
    let existing = store
        .load_if_present()
        .context("Failed to load existing fixture index")?;
    if existing {
        info!(entries = store.len(), "Extending existing index");
    }

    let reader = CaptureReader::open(capture)
        .with_context(|| format!("Failed to open capture {}", capture.display()))?;
    let report = mock::compile(&mut store, config.fingerprinter(), reader)
        .context("Ingestion failed")?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn run_serve(config: &MockConfig) -> Result<()> {
    let mut store = config.store_handle();
    store.load().with_context(|| {
        format!(
            "Failed to load fixture index {}",
            store.index_path().display()
        )
    })?;

    let summary = store.summary();
    info!(
        root = %config.store.root.display(),
        entries = summary.entries,
        variants = summary.variants,
        tombstones = summary.tombstones,
        "Fixture index loaded"
    );

    let engine = Arc::new(MatchingEngine::new(
        Arc::new(store),
        config.fingerprinter(),
    ));
    mock::server::serve(engine, config.server.addr(), config.server.cors).await
}
