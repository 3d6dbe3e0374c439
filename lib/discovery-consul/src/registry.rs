//! Registry implementation backed by a Consul agent

use async_trait::async_trait;
use discovery_core::{CallContext, HostPort, Registry, RegistryError, Result};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

use crate::{ConsulClient, ConsulConfig};

/// Service meta key carrying the address gateways should dial.
pub const DIAL_ADDRESS_META: &str = "dial_address";

/// ConsulRegistry registers instances with TTL checks on a Consul agent
#[derive(Clone, Debug)]
pub struct ConsulRegistry {
    client: ConsulClient,
    check_ttl: Duration,
    deregister_critical_after: Option<Duration>,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "PascalCase")]
struct ServiceRegistration<'a> {
    #[serde(rename = "ID")]
    id: &'a str,
    name: &'a str,
    address: &'a str,
    port: u16,
    meta: HashMap<&'static str, String>,
    check: TtlCheck<'a>,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "PascalCase")]
struct TtlCheck<'a> {
    #[serde(rename = "CheckID")]
    check_id: &'a str,
    #[serde(rename = "TTL")]
    ttl: String,
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    deregister_critical_service_after: Option<String>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "PascalCase")]
struct HealthEntry {
    #[serde(default)]
    node: Option<NodeInfo>,
    service: AgentService,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "PascalCase")]
struct NodeInfo {
    #[serde(default)]
    address: String,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "PascalCase")]
struct AgentService {
    #[serde(rename = "ID")]
    id: String,
    #[serde(default)]
    address: String,
    port: u16,
    #[serde(default)]
    meta: Option<HashMap<String, String>>,
}

impl HealthEntry {
    /// Address to dial for this entry, exactly as registered.
    fn dial_address(&self) -> Option<String> {
        if let Some(dial) = self
            .service
            .meta
            .as_ref()
            .and_then(|meta| meta.get(DIAL_ADDRESS_META))
            .filter(|dial| !dial.is_empty())
        {
            return Some(dial.clone());
        }

        let host = if self.service.address.is_empty() {
            self.node.as_ref().map(|n| n.address.as_str()).unwrap_or_default()
        } else {
            self.service.address.as_str()
        };
        if host.is_empty() || self.service.port == 0 {
            return None;
        }

        Some(
            HostPort {
                host: host.to_string(),
                port: self.service.port,
            }
            .to_string(),
        )
    }
}

impl ConsulRegistry {
    pub fn new(config: ConsulConfig) -> Result<Self> {
        let client = ConsulClient::new(&config)?;
        Ok(Self {
            client,
            check_ttl: config.check_ttl,
            deregister_critical_after: config.deregister_critical_after,
        })
    }
}

#[async_trait]
impl Registry for ConsulRegistry {
    async fn register(
        &self,
        ctx: &CallContext,
        service_name: &str,
        instance_id: &str,
        host_port: &str,
    ) -> Result<()> {
        let address = HostPort::parse(host_port)?;
        let registration = ServiceRegistration {
            id: instance_id,
            name: service_name,
            address: &address.host,
            port: address.port,
            meta: HashMap::from([(DIAL_ADDRESS_META, address.to_string())]),
            check: TtlCheck {
                check_id: instance_id,
                ttl: go_duration(self.check_ttl),
                status: "passing",
                deregister_critical_service_after: self.deregister_critical_after.map(go_duration),
            },
        };

        ctx.run(self.client.put(&["v1", "agent", "service", "register"], Some(&registration)))
            .await??
            .into_success()?;

        debug!("Registered {} ({}) at {} with Consul", instance_id, service_name, address);
        Ok(())
    }

    async fn deregister(&self, ctx: &CallContext, instance_id: &str, _service_name: &str) -> Result<()> {
        let path = ["v1", "agent", "service", "deregister", instance_id];
        let response = ctx.run(self.client.put::<()>(&path, None)).await??;

        if response.status == StatusCode::NOT_FOUND || response.body.contains("Unknown service") {
            debug!("Instance {} was not registered with Consul", instance_id);
            return Ok(());
        }
        response.into_success()?;

        debug!("Deregistered {} from Consul", instance_id);
        Ok(())
    }

    async fn service_addresses(&self, ctx: &CallContext, service_name: &str) -> Result<Vec<String>> {
        let path = ["v1", "health", "service", service_name];
        let body = ctx
            .run(self.client.get(&path, &[("passing", "true")]))
            .await??
            .into_success()?;

        let entries: Vec<HealthEntry> = serde_json::from_str(&body)
            .map_err(|e| RegistryError::MalformedResponse(e.to_string()))?;

        let addresses: Vec<String> = entries
            .iter()
            .filter_map(|entry| {
                let address = entry.dial_address();
                if address.is_none() {
                    warn!("Consul entry {} of {} has no usable address", entry.service.id, service_name);
                }
                address
            })
            .collect();

        if addresses.is_empty() {
            return Err(RegistryError::NotFound(service_name.to_string()));
        }
        Ok(addresses)
    }

    async fn report_healthy_state(&self, instance_id: &str, _service_name: &str) -> Result<()> {
        let path = ["v1", "agent", "check", "pass", instance_id];
        let response = self.client.put::<()>(&path, None).await?;

        if response.status == StatusCode::NOT_FOUND {
            return Err(RegistryError::UnknownInstance(instance_id.to_string()));
        }
        response.into_success()?;
        Ok(())
    }

    fn check_ttl(&self) -> Duration {
        self.check_ttl
    }
}

/// Render a duration the way Consul parses it (`5s`, `1500ms`).
fn go_duration(d: Duration) -> String {
    if d.subsec_millis() == 0 {
        format!("{}s", d.as_secs())
    } else {
        format!("{}ms", d.as_millis())
    }
}
