use anyhow::Result;
use clap::Parser;
use discovery_consul::{ConsulConfig, ConsulRegistry};
use discovery_core::{CallContext, Registry, RegistryError};
use futures::future::join_all;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

/// Periodically resolve services through Consul and log their healthy instances
#[derive(Parser, Debug)]
#[command(name = "service-discovery", version)]
struct Args {
    /// Consul agent address
    #[arg(long, env = "CONSUL_HTTP_ADDR", default_value = "127.0.0.1:8500")]
    registry: String,

    /// Seconds between two discovery rounds
    #[arg(long, env = "DISCOVERY_INTERVAL", default_value_t = 30)]
    interval: u64,

    /// Service names to resolve
    #[arg(required = true)]
    services: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    info!("Starting service-discovery daemon...");

    let registry = ConsulRegistry::new(ConsulConfig::from_env().with_address(&args.registry))?;
    let interval = Duration::from_secs(args.interval.max(1));

    let ctx = CallContext::new();
    let on_signal = ctx.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            return;
        }
        info!("Shutdown signal received");
        on_signal.cancel();
    });

    // Periodic discovery loop
    loop {
        let healthy = discover_services(&registry, &ctx, &args.services).await;
        if ctx.is_cancelled() {
            break;
        }
        info!(
            "Resolved {} of {} services",
            healthy,
            args.services.len()
        );

        if ctx.run(tokio::time::sleep(interval)).await.is_err() {
            break;
        }
    }

    info!("service-discovery stopped");
    Ok(())
}

/// Resolve every service concurrently and log the outcome of each.
/// Returns how many services had at least one passing instance.
async fn discover_services(registry: &dyn Registry, ctx: &CallContext, services: &[String]) -> usize {
    let lookups = services.iter().map(|name| async move {
        (name, registry.service_addresses(ctx, name).await)
    });

    let mut healthy = 0;
    for (name, result) in join_all(lookups).await {
        match result {
            Ok(addresses) => {
                healthy += 1;
                info!("{}: {}", name, addresses.join(", "));
            }
            Err(RegistryError::NotFound(_)) => {
                warn!("{}: no healthy instances", name);
            }
            Err(RegistryError::Cancelled) => {
                debug!("{}: lookup cancelled", name);
            }
            Err(e) => {
                error!("{}: lookup failed: {}", name, e);
            }
        }
    }
    healthy
}
