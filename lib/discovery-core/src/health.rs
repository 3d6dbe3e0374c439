//! Background TTL health reporting for a registered instance

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{Registry, RegistryError, Result, ServiceInstance};

/// Health reporter configuration
#[derive(Clone, Debug)]
pub struct HealthReporterConfig {
    /// Time between two reports
    pub interval: Duration,
    /// Upper bound on a single report call
    pub report_timeout: Duration,
}

impl Default for HealthReporterConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            report_timeout: Duration::from_millis(500),
        }
    }
}

impl HealthReporterConfig {
    /// Check the config against the TTL of the check it refreshes.
    ///
    /// The interval must be at most half the TTL, and a report that takes the
    /// full timeout must still land before the TTL runs out.
    pub fn validate(&self, ttl: Duration) -> Result<()> {
        if self.interval.is_zero() {
            return Err(RegistryError::InvalidConfiguration(
                "health report interval must be non-zero".to_string(),
            ));
        }
        if self.report_timeout.is_zero() {
            return Err(RegistryError::InvalidConfiguration(
                "health report timeout must be non-zero".to_string(),
            ));
        }
        if self.interval * 2 > ttl {
            return Err(RegistryError::InvalidConfiguration(format!(
                "health report interval {:?} exceeds half the check TTL {:?}",
                self.interval, ttl
            )));
        }
        if self.interval + self.report_timeout >= ttl {
            return Err(RegistryError::InvalidConfiguration(format!(
                "health report interval {:?} plus timeout {:?} must be below the check TTL {:?}",
                self.interval, self.report_timeout, ttl
            )));
        }
        Ok(())
    }
}

/// Outcome counts of the reports issued so far.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReportStats {
    pub succeeded: u64,
    pub failed: u64,
}

#[derive(Default)]
struct ReportCounters {
    succeeded: AtomicU64,
    failed: AtomicU64,
}

impl ReportCounters {
    fn snapshot(&self) -> ReportStats {
        ReportStats {
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// Handle to the background task that keeps an instance's TTL check passing.
pub struct HealthReporter {
    cancel: CancellationToken,
    counters: Arc<ReportCounters>,
    handle: JoinHandle<()>,
}

impl HealthReporter {
    /// Start reporting for `instance`, which must already be registered.
    ///
    /// The task runs until `cancel` fires or [`HealthReporter::stop`] is called.
    pub fn spawn(
        registry: Arc<dyn Registry>,
        instance: &ServiceInstance,
        config: HealthReporterConfig,
        cancel: CancellationToken,
    ) -> Result<Self> {
        config.validate(registry.check_ttl())?;

        info!(
            "Starting health reporter for {} every {:?}",
            instance.instance_id, config.interval
        );

        let counters = Arc::new(ReportCounters::default());
        let handle = tokio::spawn(report_loop(
            registry,
            instance.instance_id.clone(),
            instance.service_name.clone(),
            config,
            cancel.clone(),
            counters.clone(),
        ));

        Ok(Self {
            cancel,
            counters,
            handle,
        })
    }

    pub fn stats(&self) -> ReportStats {
        self.counters.snapshot()
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Cancel the loop and wait until it has exited.
    ///
    /// Once this returns no further report will be issued.
    pub async fn stop(self) -> ReportStats {
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            warn!("Health reporter task ended abnormally: {}", e);
        }
        self.counters.snapshot()
    }
}

async fn report_loop(
    registry: Arc<dyn Registry>,
    instance_id: String,
    service_name: String,
    config: HealthReporterConfig,
    cancel: CancellationToken,
    counters: Arc<ReportCounters>,
) {
    // Fixed schedule: a slow report does not push every later report back.
    let mut ticker = time::interval_at(time::Instant::now() + config.interval, config.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let report = time::timeout(
            config.report_timeout,
            registry.report_healthy_state(&instance_id, &service_name),
        );
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            outcome = report => outcome,
        };

        match outcome {
            Ok(Ok(())) => {
                counters.succeeded.fetch_add(1, Ordering::Relaxed);
                debug!("Reported healthy state for {}", instance_id);
            }
            Ok(Err(e)) => {
                counters.failed.fetch_add(1, Ordering::Relaxed);
                warn!("Failed to report healthy state for {}: {}", instance_id, e);
            }
            Err(_) => {
                counters.failed.fetch_add(1, Ordering::Relaxed);
                warn!(
                    "Health report for {} timed out after {:?}",
                    instance_id, config.report_timeout
                );
            }
        }
    }

    debug!("Health reporter for {} stopped", instance_id);
}
