use std::process;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use capacity_broadcaster::broadcaster::{Broadcaster, HttpConnector};
use capacity_broadcaster::cli::{format_dry_run, resolve_config, Args};
use capacity_broadcaster::server::{self, AppState};
use capacity_broadcaster::store::HttpObjectStore;

/// Timeout for requests to the local API server
const LOCAL_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Initialize logging
    let filter = match args.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .init();

    // Load .env file if specified
    if let Some(ref env_file) = args.env_file {
        if let Err(e) = dotenvy::from_path(env_file) {
            error!("Failed to load env file {}: {}", env_file.display(), e);
            process::exit(1);
        }
    }

    if let Err(e) = run(args).await {
        error!("{:#}", e);
        process::exit(1);
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let config = resolve_config(&args).context("Invalid configuration")?;

    // Dry-run mode: print the resolved config and exit
    if args.dry_run {
        println!("{}", format_dry_run(&config, &args));
        return Ok(());
    }

    if config.gateway_ip.is_empty() {
        warn!("No gateway address configured; peers will not be able to reach this cluster");
    }

    let local = HttpObjectStore::new(&args.api_server, args.token.clone(), LOCAL_REQUEST_TIMEOUT)
        .and_then(|store| store.with_insecure(args.insecure))
        .with_context(|| format!("Failed to create client for {}", args.api_server))?;
    let connector = HttpConnector::new(
        config.advertisement_namespace.clone(),
        config.advertisement_name(),
    );
    let cluster_id = config.cluster_id.clone();

    info!("Starting capacity broadcaster for cluster {}", cluster_id);

    let cancel = CancellationToken::new();
    let handle = Broadcaster::new(config, Arc::new(local), Arc::new(connector))
        .start(cancel.clone())
        .await
        .context("Broadcaster did not start")?;

    if let Some(addr) = args.status_addr {
        let state = AppState::new(cluster_id, handle.status());
        let server_cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = server::serve(addr, state, server_cancel).await {
                error!("Status server error: {}", e);
            }
        });
    }

    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Unable to listen for shutdown signal: {}", e);
            return;
        }
        info!("Shutdown requested");
        signal_cancel.cancel();
    });

    handle.join().await;
    Ok(())
}
