//! Scripted registry double for unit tests

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::{CallContext, MemoryRegistry, Registry, RegistryError, Result};

/// Registry that records every call and fails on demand.
#[derive(Default)]
pub(crate) struct ScriptedRegistry {
    calls: Mutex<Vec<String>>,
    failing_reports: AtomicU64,
    reports: AtomicU64,
    hang_reports: bool,
    fail_register: bool,
    fail_deregister: bool,
}

impl ScriptedRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn failing_reports(self, count: u64) -> Self {
        self.failing_reports.store(count, Ordering::SeqCst);
        self
    }

    pub(crate) fn hanging_reports(mut self) -> Self {
        self.hang_reports = true;
        self
    }

    pub(crate) fn failing_register(mut self) -> Self {
        self.fail_register = true;
        self
    }

    pub(crate) fn failing_deregister(mut self) -> Self {
        self.fail_deregister = true;
        self
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn report_count(&self) -> u64 {
        self.reports.load(Ordering::SeqCst)
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl Registry for ScriptedRegistry {
    async fn register(
        &self,
        _ctx: &CallContext,
        _service_name: &str,
        instance_id: &str,
        _host_port: &str,
    ) -> Result<()> {
        self.record(format!("register {instance_id}"));
        if self.fail_register {
            return Err(RegistryError::BackendUnavailable("connection refused".to_string()));
        }
        Ok(())
    }

    async fn deregister(&self, _ctx: &CallContext, instance_id: &str, _service_name: &str) -> Result<()> {
        self.record(format!("deregister {instance_id}"));
        if self.fail_deregister {
            return Err(RegistryError::BackendUnavailable("connection refused".to_string()));
        }
        Ok(())
    }

    async fn service_addresses(&self, _ctx: &CallContext, service_name: &str) -> Result<Vec<String>> {
        Err(RegistryError::NotFound(service_name.to_string()))
    }

    async fn report_healthy_state(&self, instance_id: &str, _service_name: &str) -> Result<()> {
        if self.hang_reports {
            std::future::pending::<()>().await;
        }
        self.reports.fetch_add(1, Ordering::SeqCst);
        self.record(format!("report {instance_id}"));

        let failed = self
            .failing_reports
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failed {
            return Err(RegistryError::BackendUnavailable("connection reset".to_string()));
        }
        Ok(())
    }
}

/// In-memory registry whose health reports take `delay` to land.
pub(crate) struct SlowReports {
    inner: MemoryRegistry,
    delay: Duration,
}

impl SlowReports {
    pub(crate) fn new(inner: MemoryRegistry, delay: Duration) -> Self {
        Self { inner, delay }
    }
}

#[async_trait]
impl Registry for SlowReports {
    async fn register(
        &self,
        ctx: &CallContext,
        service_name: &str,
        instance_id: &str,
        host_port: &str,
    ) -> Result<()> {
        self.inner.register(ctx, service_name, instance_id, host_port).await
    }

    async fn deregister(&self, ctx: &CallContext, instance_id: &str, service_name: &str) -> Result<()> {
        self.inner.deregister(ctx, instance_id, service_name).await
    }

    async fn service_addresses(&self, ctx: &CallContext, service_name: &str) -> Result<Vec<String>> {
        self.inner.service_addresses(ctx, service_name).await
    }

    async fn report_healthy_state(&self, instance_id: &str, service_name: &str) -> Result<()> {
        tokio::time::sleep(self.delay).await;
        self.inner.report_healthy_state(instance_id, service_name).await
    }

    fn check_ttl(&self) -> Duration {
        self.inner.check_ttl()
    }
}
