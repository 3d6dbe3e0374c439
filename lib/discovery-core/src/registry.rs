//! The registry capability shared by service instances and gateways

use async_trait::async_trait;
use std::time::Duration;

use crate::{CallContext, Result};

/// TTL attached to the health check created on registration.
pub const DEFAULT_CHECK_TTL: Duration = Duration::from_secs(5);

/// Client contract against a coordination service that tracks live instances.
///
/// A single handle is constructed per process and shared (`Arc<dyn Registry>`)
/// between the health reporter and every gateway. All state lives in the
/// backend, so implementations need no interior mutability beyond their
/// connection pool.
#[async_trait]
pub trait Registry: Send + Sync {
    /// Create or overwrite the record for `instance_id`, with a TTL health
    /// check that starts out passing.
    async fn register(
        &self,
        ctx: &CallContext,
        service_name: &str,
        instance_id: &str,
        host_port: &str,
    ) -> Result<()>;

    /// Remove the record for `instance_id`. Removing an absent record succeeds.
    async fn deregister(&self, ctx: &CallContext, instance_id: &str, service_name: &str) -> Result<()>;

    /// Dial addresses of every instance of `service_name` whose check is
    /// passing. Never empty: no passing instance is `RegistryError::NotFound`.
    async fn service_addresses(&self, ctx: &CallContext, service_name: &str) -> Result<Vec<String>>;

    /// Refresh the TTL check of `instance_id`, re-arming it if it had lapsed.
    ///
    /// Callers bound this with their own timeout.
    async fn report_healthy_state(&self, instance_id: &str, service_name: &str) -> Result<()>;

    /// TTL this backend attaches to registrations.
    fn check_ttl(&self) -> Duration {
        DEFAULT_CHECK_TTL
    }
}
