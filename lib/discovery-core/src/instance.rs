//! Service instance identity

use rand::rngs::{OsRng, StdRng};
use rand::{Rng, RngCore, SeedableRng};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::{RegistryError, Result};

/// One running process of a logical service.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceInstance {
    pub service_name: String,
    pub instance_id: String,
    /// Address other services dial to reach this instance.
    pub address: HostPort,
}

impl ServiceInstance {
    /// Create an instance with a freshly generated id.
    pub fn new(service_name: &str, host_port: &str) -> Result<Self> {
        Self::with_id(service_name, generate_instance_id(service_name), host_port)
    }

    pub fn with_id(
        service_name: &str,
        instance_id: impl Into<String>,
        host_port: &str,
    ) -> Result<Self> {
        Ok(Self {
            service_name: service_name.to_string(),
            instance_id: instance_id.into(),
            address: HostPort::parse(host_port)?,
        })
    }
}

/// A validated `host:port` pair.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct HostPort {
    pub host: String,
    pub port: u16,
}

impl HostPort {
    /// Parse `host:port` or `[ipv6]:port`.
    pub fn parse(s: &str) -> Result<Self> {
        let (host, port) = if let Some(rest) = s.strip_prefix('[') {
            let (host, after) = rest
                .split_once(']')
                .ok_or_else(|| RegistryError::invalid_address(s, "unterminated '['"))?;
            let port = after
                .strip_prefix(':')
                .ok_or_else(|| RegistryError::invalid_address(s, "missing port"))?;
            (host, port)
        } else {
            let (host, port) = s
                .split_once(':')
                .ok_or_else(|| RegistryError::invalid_address(s, "must be in the form <host>:<port>"))?;
            if port.contains(':') {
                return Err(RegistryError::invalid_address(
                    s,
                    "must be in the form <host>:<port>",
                ));
            }
            (host, port)
        };

        if host.is_empty() {
            return Err(RegistryError::invalid_address(s, "empty host"));
        }

        let port: u16 = port
            .parse()
            .map_err(|_| RegistryError::invalid_address(s, "port is not a number in 1-65535"))?;
        if port == 0 {
            return Err(RegistryError::invalid_address(s, "port is not a number in 1-65535"));
        }

        Ok(Self {
            host: host.to_string(),
            port,
        })
    }
}

impl fmt::Display for HostPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Generate an instance id of the form `<service_name>-<n>`.
///
/// The random source is seeded on every call, from OS entropy mixed with the
/// wall clock, so instances started in the same instant do not share a sequence.
pub fn generate_instance_id(service_name: &str) -> String {
    let mut rng = per_call_rng();
    generate_instance_id_with(service_name, &mut rng)
}

/// Generate an instance id drawing from the given random source.
pub fn generate_instance_id_with<R: Rng + ?Sized>(service_name: &str, rng: &mut R) -> String {
    let suffix = rng.gen_range(0..=i64::MAX as u64);
    format!("{}-{}", service_name, suffix)
}

fn per_call_rng() -> StdRng {
    let mut seed = <StdRng as SeedableRng>::Seed::default();
    // The clock alone still yields a usable seed if the OS source fails.
    let _ = OsRng.try_fill_bytes(&mut seed);

    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    for (byte, clock) in seed.iter_mut().zip(nanos.to_le_bytes()) {
        *byte ^= clock;
    }

    StdRng::from_seed(seed)
}
