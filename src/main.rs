use anyhow::Result;
use orbital_relayer::{
    chains::AdapterRegistry,
    config::{create_sample_config, CliArgs, ConfigBuilder},
    dispatcher::Dispatcher,
    ledger::create_ledger,
    listener::{Listener, WormholeScanClient},
    monitor::MonitoringServer,
};
use std::{sync::Arc, time::Duration};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    if cli_args.print_sample_config {
        println!("{}", create_sample_config());
        return Ok(());
    }

    let config = ConfigBuilder::load(&cli_args)?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.monitoring.log_level)),
        )
        .init();

    info!("Orbital relayer v{}", env!("CARGO_PKG_VERSION"));
    info!(api = %config.wormhole.api_url, chains = config.chains.len(), "Configuration loaded");

    let registry = AdapterRegistry::from_config(&config)?;
    let ledger = create_ledger(&config.ledger);
    let dispatcher = Arc::new(Dispatcher::from_config(&config, registry, ledger)?);

    for (chain_id, healthy) in dispatcher.check_health().await {
        if healthy {
            info!(chain_id, "Chain reachable");
        } else {
            warn!(chain_id, "Chain unreachable at startup");
        }
    }

    let source = Arc::new(WormholeScanClient::new(
        &config.wormhole.api_url,
        Duration::from_secs(config.wormhole.request_timeout_secs),
    )?);
    let listener = Listener::from_config(&config, source).await?;
    for watch in listener.watches() {
        info!(
            chain = %watch.chain_name,
            emitter = %hex::encode(watch.emitter),
            destination = watch.destination_chain,
            from_sequence = watch.next_sequence,
            "Watching emitter"
        );
    }

    let server = MonitoringServer::new(config.monitoring.clone(), Arc::clone(&dispatcher));
    tokio::spawn(async move {
        if let Err(e) = server.start().await {
            error!("Monitoring server failed: {}", e);
        }
    });

    let (sender, receiver) = mpsc::channel(config.processing.channel_capacity);
    let mut listener_handle = tokio::spawn(listener.run(sender));
    let dispatch_handle = tokio::spawn(Arc::clone(&dispatcher).run(receiver));

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                error!("Failed to listen for shutdown signal: {}", e);
            }
            info!("Shutdown signal received");
        }
        _ = &mut listener_handle => {
            warn!("Listener exited");
        }
    }

    listener_handle.abort();
    if let Err(e) = dispatch_handle.await {
        error!("Dispatch loop ended abnormally: {}", e);
    }

    let metrics = dispatcher.get_metrics().await;
    info!(
        received = metrics.messages_received,
        submitted = metrics.calls_submitted,
        adapter_failures = metrics.adapter_failures,
        "Relayer stopped"
    );
    Ok(())
}
