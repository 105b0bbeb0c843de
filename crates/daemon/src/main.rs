/// anonjump - jump service for anonymous overlay networks
///
/// This daemon:
/// - Serves the local hosts file and redirects jump lookups
/// - Mirrors the hosts files of peer jump services
/// - Reports where peers agree or disagree with our bindings
/// - Accepts announces and registrations from other services

use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn, Level};

use anonjump_common::{JumpConfig, TransportKind};
use anonjump_core::{JumpService, SamTransport, TcpTransport, Transport};
use anonjump_daemon::{AppState, ClientLimiter, HttpServer};

#[derive(Debug, Parser)]
#[command(name = "anonjump", version, about = "Jump service for anonymous overlay networks")]
struct Args {
    /// Configuration file, written with defaults if missing
    #[arg(short, long, default_value = "anonjump.toml")]
    config: PathBuf,

    /// Service name, also used for the queue file and transport sessions
    #[arg(long)]
    name: Option<String>,

    /// Transport strategy: sam or tcp
    #[arg(long)]
    transport: Option<TransportKind>,

    /// SAM bridge address
    #[arg(long)]
    sam: Option<String>,

    /// Directory holding the service keys
    #[arg(long)]
    keys: Option<String>,

    /// Local hosts file to publish
    #[arg(long)]
    hosts: Option<String>,

    /// Directory for peer snapshots and the registration queue
    #[arg(long)]
    data_dir: Option<String>,

    /// Address the HTTP surface listens on
    #[arg(long)]
    listen: Option<String>,

    /// Peer to mirror as name=url, repeatable; replaces the configured peers
    #[arg(long = "peer")]
    peers: Vec<String>,

    /// Log at debug level
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(&args)?;

    // Initialize logging
    tracing_subscriber::fmt()
        .with_max_level(if config.verbose { Level::DEBUG } else { Level::INFO })
        .init();

    info!("Starting anonjump v{}", env!("CARGO_PKG_VERSION"));

    let transport: Arc<dyn Transport> = match config.transport {
        TransportKind::Sam => Arc::new(SamTransport::new(
            config.sam_addr.clone(),
            PathBuf::from(&config.keys_path),
        )),
        TransportKind::Tcp => Arc::new(TcpTransport::new()),
    };

    let listen_addr: SocketAddr = config
        .listen_addr
        .parse()
        .with_context(|| format!("Invalid listen address {}", config.listen_addr))?;

    info!("Creating jump service...");
    let service = Arc::new(JumpService::new(config.clone(), transport).await?);

    let server = HttpServer::bind(listen_addr).await?;
    service.start(server.local_addr()?).await?;

    let state = AppState::new(
        service.clone(),
        ClientLimiter::new(config.rate_limit_interval()),
    );

    info!("Jump service is running. Press Ctrl+C to stop.");
    server.serve(state, shutdown_signal()).await?;

    info!("Shutdown signal received");
    service.stop().await?;

    info!("Jump service stopped");
    Ok(())
}

/// Load the config file (or defaults) and apply command line overrides
fn load_config(args: &Args) -> Result<JumpConfig> {
    let mut config = if args.config.exists() {
        JumpConfig::from_file(&args.config)
            .with_context(|| format!("Failed to load {:?}", args.config))?
    } else {
        let config = JumpConfig::default();

        // Save default config for next time
        if let Err(e) = config.to_file(&args.config) {
            eprintln!("Failed to save default config to {:?}: {}", args.config, e);
        }

        config
    };

    if let Some(name) = &args.name {
        config.name = name.clone();
    }
    if let Some(transport) = args.transport {
        config.transport = transport;
    }
    if let Some(sam) = &args.sam {
        config.sam_addr = sam.clone();
    }
    if let Some(keys) = &args.keys {
        config.keys_path = keys.clone();
    }
    if let Some(hosts) = &args.hosts {
        config.hosts_file = hosts.clone();
    }
    if let Some(data_dir) = &args.data_dir {
        config.data_dir = data_dir.clone();
    }
    if let Some(listen) = &args.listen {
        config.listen_addr = listen.clone();
    }
    if !args.peers.is_empty() {
        config.peers = args.peers.clone();
    }
    config.verbose |= args.verbose;

    // Malformed peers are fatal before anything starts
    config.peer_specs()?;

    Ok(config)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
}
