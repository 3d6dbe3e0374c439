//! In-memory registry backend with TTL health checks

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::debug;

use crate::{CallContext, HostPort, Registry, RegistryError, Result, DEFAULT_CHECK_TTL};

/// MemoryRegistry keeps instance records in process memory.
///
/// It honours the same contract as a remote backend: records carry a TTL
/// check that expires unless refreshed, and lookups only return instances
/// whose check is passing. Expiry is measured on the tokio clock.
#[derive(Clone)]
pub struct MemoryRegistry {
    // Map of instance_id to its record
    instances: Arc<RwLock<HashMap<String, InstanceRecord>>>,
    ttl: Duration,
}

#[derive(Clone, Debug)]
struct InstanceRecord {
    service_name: String,
    address: String,
    expires_at: Instant,
}

impl InstanceRecord {
    fn is_passing(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_CHECK_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            instances: Arc::new(RwLock::new(HashMap::new())),
            ttl,
        }
    }

    /// Number of records, passing or not.
    pub async fn instance_count(&self) -> usize {
        self.instances.read().await.len()
    }
}

impl Default for MemoryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Registry for MemoryRegistry {
    async fn register(
        &self,
        ctx: &CallContext,
        service_name: &str,
        instance_id: &str,
        host_port: &str,
    ) -> Result<()> {
        let address = HostPort::parse(host_port)?;
        ctx.run(async {
            let mut instances = self.instances.write().await;
            instances.insert(
                instance_id.to_string(),
                InstanceRecord {
                    service_name: service_name.to_string(),
                    address: address.to_string(),
                    expires_at: Instant::now() + self.ttl,
                },
            );
        })
        .await?;

        debug!("Registered instance {} of {} at {}", instance_id, service_name, address);
        Ok(())
    }

    async fn deregister(&self, ctx: &CallContext, instance_id: &str, service_name: &str) -> Result<()> {
        let removed = ctx
            .run(async { self.instances.write().await.remove(instance_id) })
            .await?;

        if removed.is_some() {
            debug!("Deregistered instance {} of {}", instance_id, service_name);
        }
        Ok(())
    }

    async fn service_addresses(&self, ctx: &CallContext, service_name: &str) -> Result<Vec<String>> {
        let mut passing = ctx
            .run(async {
                let now = Instant::now();
                let instances = self.instances.read().await;
                instances
                    .iter()
                    .filter(|(_, record)| record.service_name == service_name && record.is_passing(now))
                    .map(|(id, record)| (id.clone(), record.address.clone()))
                    .collect::<Vec<_>>()
            })
            .await?;

        if passing.is_empty() {
            return Err(RegistryError::NotFound(service_name.to_string()));
        }

        passing.sort();
        Ok(passing.into_iter().map(|(_, address)| address).collect())
    }

    async fn report_healthy_state(&self, instance_id: &str, _service_name: &str) -> Result<()> {
        let mut instances = self.instances.write().await;
        match instances.get_mut(instance_id) {
            Some(record) => {
                record.expires_at = Instant::now() + self.ttl;
                Ok(())
            }
            None => Err(RegistryError::UnknownInstance(instance_id.to_string())),
        }
    }

    fn check_ttl(&self) -> Duration {
        self.ttl
    }
}
