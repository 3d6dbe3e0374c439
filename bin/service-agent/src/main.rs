use anyhow::{Context, Result};
use clap::Parser;
use discovery_consul::{ConsulConfig, ConsulRegistry};
use discovery_core::{CallContext, HealthReporterConfig, Registry, ServiceAnnouncement};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Announce one service instance in Consul and keep it healthy until shutdown
#[derive(Parser, Debug)]
#[command(name = "service-agent", version)]
struct Args {
    /// Logical service name, e.g. `metadata`
    #[arg(long, env = "SERVICE_NAME")]
    service_name: String,

    /// Address other services dial, as host:port
    #[arg(long, env = "SERVICE_ADVERTISE")]
    advertise: String,

    /// Consul agent address
    #[arg(long, env = "CONSUL_HTTP_ADDR", default_value = "127.0.0.1:8500")]
    registry: String,

    /// Time between two health reports
    #[arg(long, env = "REPORT_INTERVAL", default_value = "1s", value_parser = parse_duration)]
    report_interval: Duration,

    /// Bound on every call to the registry
    #[arg(long, env = "REGISTRY_TIMEOUT", default_value = "500ms", value_parser = parse_duration)]
    registry_timeout: Duration,

    /// Bound on registration at startup
    #[arg(long, env = "STARTUP_TIMEOUT", default_value = "10s", value_parser = parse_duration)]
    startup_timeout: Duration,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    info!("Starting service-agent for {}...", args.service_name);

    let registry: Arc<dyn Registry> = Arc::new(
        ConsulRegistry::new(consul_config(&args)).context("invalid Consul configuration")?,
    );

    let reporter_config = HealthReporterConfig {
        interval: args.report_interval,
        report_timeout: args.registry_timeout,
    };

    let startup = CallContext::new().with_timeout(args.startup_timeout);
    let announcement = match ServiceAnnouncement::start(
        registry,
        &args.service_name,
        &args.advertise,
        reporter_config,
        &startup,
    )
    .await
    {
        Ok(announcement) => announcement,
        Err(e) => {
            error!("Failed to announce {}: {}", args.service_name, e);
            return Err(e.into());
        }
    };
    info!(
        "Serving as {} at {}",
        announcement.instance().instance_id,
        announcement.instance().address
    );

    shutdown_signal().await;
    info!("Shutdown signal received, deregistering");

    let ctx = CallContext::new().with_timeout(args.registry_timeout);
    let report = announcement.shutdown(&ctx).await;
    if !report.deregistered {
        warn!("Instance left to expire through its health check");
    }

    info!(
        "service-agent stopped after {} successful and {} failed reports",
        report.reports.succeeded, report.reports.failed
    );
    Ok(())
}

/// Consul client settings. The client-wide timeout is only a backstop: each
/// call is bounded by its own context, so it must not undercut the startup
/// deadline.
fn consul_config(args: &Args) -> ConsulConfig {
    let mut config = ConsulConfig::from_env().with_address(&args.registry);
    config.request_timeout = args.startup_timeout.max(args.registry_timeout);
    config
}

/// Parse `500ms`, `2s`, `1m` or a bare number of seconds.
fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    let (value, unit) = match s.find(|c: char| !c.is_ascii_digit()) {
        Some(i) => s.split_at(i),
        None => (s, "s"),
    };
    let value: u64 = value
        .parse()
        .map_err(|_| format!("invalid duration: {s:?}"))?;
    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        "s" => Ok(Duration::from_secs(value)),
        "m" => value
            .checked_mul(60)
            .map(Duration::from_secs)
            .ok_or_else(|| format!("duration out of range: {s:?}")),
        _ => Err(format!("invalid duration unit in {s:?}, expected ms, s or m")),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
