//! Registration lifecycle of a running service instance
//!
//! Startup registers the instance and then starts its health reporter.
//! Shutdown stops the reporter first and only then deregisters, so a late
//! report can never re-arm a record that is being removed.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{
    CallContext, HealthReporter, HealthReporterConfig, Registry, ReportStats, Result,
    ServiceInstance,
};

/// A registered instance together with its running health reporter.
pub struct ServiceAnnouncement {
    registry: Arc<dyn Registry>,
    instance: ServiceInstance,
    reporter: HealthReporter,
}

/// What happened during [`ServiceAnnouncement::shutdown`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ShutdownReport {
    pub reports: ReportStats,
    pub deregistered: bool,
}

impl ServiceAnnouncement {
    /// Register a new instance of `service_name` reachable at `host_port`.
    ///
    /// An error means the instance was not announced and must not serve.
    pub async fn start(
        registry: Arc<dyn Registry>,
        service_name: &str,
        host_port: &str,
        config: HealthReporterConfig,
        ctx: &CallContext,
    ) -> Result<Self> {
        let instance = ServiceInstance::new(service_name, host_port)?;
        Self::start_instance(registry, instance, config, ctx).await
    }

    pub async fn start_instance(
        registry: Arc<dyn Registry>,
        instance: ServiceInstance,
        config: HealthReporterConfig,
        ctx: &CallContext,
    ) -> Result<Self> {
        config.validate(registry.check_ttl())?;

        registry
            .register(
                ctx,
                &instance.service_name,
                &instance.instance_id,
                &instance.address.to_string(),
            )
            .await?;
        info!(
            "Registered {} instance {} at {}",
            instance.service_name, instance.instance_id, instance.address
        );

        let reporter = HealthReporter::spawn(
            registry.clone(),
            &instance,
            config,
            CancellationToken::new(),
        )?;

        Ok(Self {
            registry,
            instance,
            reporter,
        })
    }

    pub fn instance(&self) -> &ServiceInstance {
        &self.instance
    }

    /// Stop reporting, then deregister.
    ///
    /// Deregistration failures are logged, not returned: the TTL check
    /// removes the instance from lookups anyway.
    pub async fn shutdown(self, ctx: &CallContext) -> ShutdownReport {
        let reports = self.reporter.stop().await;

        let deregistered = match self
            .registry
            .deregister(ctx, &self.instance.instance_id, &self.instance.service_name)
            .await
        {
            Ok(()) => {
                info!("Deregistered instance {}", self.instance.instance_id);
                true
            }
            Err(e) => {
                warn!(
                    "Failed to deregister instance {}, leaving it to expire: {}",
                    self.instance.instance_id, e
                );
                false
            }
        };

        ShutdownReport {
            reports,
            deregistered,
        }
    }
}
