//! Faucet service binary

use anyhow::Context;
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};
use x402_faucet::config::NETWORK;
use x402_faucet::{
    api, logging, ChainClient, ClaimRegistry, ClaimSettings, FaucetConfig, FaucetService,
    HttpFacilitator, JsonRpcChainClient, MemoryClaimRegistry, Paywall, SledClaimRegistry,
};

/// Faucet service CLI
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address
    #[arg(long)]
    server_addr: Option<String>,

    /// RPC URL
    #[arg(long)]
    rpc_url: Option<String>,

    /// Private key of the funding account
    #[arg(long)]
    private_key: Option<String>,

    /// Claim registry path (in-memory when omitted)
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// Confirmation timeout (seconds)
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    confirmation_timeout: Option<u64>,

    /// Address receiving x402 payments
    #[arg(long)]
    pay_to: Option<String>,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = FaucetConfig::from_env();

    // Override with CLI arguments
    if let Some(addr) = args.server_addr {
        config.server_addr = addr;
    }

    if let Some(rpc_url) = args.rpc_url {
        config.rpc_url = rpc_url;
    }

    if let Some(key) = args.private_key {
        config.set_private_key(key);
    }

    if let Some(db_path) = args.db_path {
        config.db_path = Some(db_path);
    }

    if let Some(timeout) = args.confirmation_timeout {
        config.confirmation_timeout_secs = timeout;
    }

    if let Some(pay_to) = args.pay_to {
        config.paywall.pay_to = pay_to;
    }

    if args.debug {
        config.logging.level = "debug".to_string();
    }

    logging::init_logging(&config.logging)?;

    info!("Starting x402 Faucet Service v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration:");
    info!("  Server address: {}", config.server_addr);
    info!("  RPC URL: {}", config.rpc_url);
    info!("  Network: {} (chain id {})", NETWORK.name, NETWORK.chain_id);
    info!("  Signer: {:?}", config.signer);
    info!("  Confirmation timeout: {}s", config.confirmation_timeout_secs);
    info!("  Facilitator: {}", config.paywall.facilitator_url);

    let registry: Arc<dyn ClaimRegistry> = match &config.db_path {
        Some(path) => {
            let registry = SledClaimRegistry::open(path).context("Failed to open claim registry")?;
            info!("Previously funded addresses: {}", registry.claimed_count().await?);
            Arc::new(registry)
        }
        None => {
            warn!("No FAUCET_DB_PATH set: claims are forgotten on restart");
            Arc::new(MemoryClaimRegistry::new())
        }
    };

    let chain = JsonRpcChainClient::from_config(&config, NETWORK.chain_id)
        .context("Invalid faucet credential")?
        .map(|client| Arc::new(client) as Arc<dyn ChainClient>);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let service = Arc::new(
        FaucetService::new(chain, registry, ClaimSettings::from_config(&config))?
            .with_shutdown(shutdown_rx),
    );
    info!("Faucet service initialized");

    let facilitator = Arc::new(HttpFacilitator::new(
        config.paywall.facilitator_url.clone(),
        reqwest::Client::builder().timeout(config.rpc_timeout()).build()?,
    ));
    let paywall = Arc::new(Paywall::new(&config.paywall, &NETWORK, facilitator)?);

    let mut app = api::router(service, paywall);

    if config.cors_enabled {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
            .expose_headers(Any);

        app = app.layer(cors);
        info!("CORS enabled");
    }

    let addr: SocketAddr = config.server_addr.parse()?;
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown_tx))
        .await?;

    info!("Shutting down gracefully");
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM, then cancel pending confirmation waits
async fn shutdown_signal(shutdown: watch::Sender<bool>) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C");
        },
        _ = terminate => {
            info!("Received terminate signal");
        },
    }

    let _ = shutdown.send(true);
}
