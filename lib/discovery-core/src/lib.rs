//! Service discovery core
//!
//! This library provides:
//! - The `Registry` capability that service instances and gateways talk to
//! - Instance identity and id generation
//! - An in-memory TTL registry backend
//! - The background health reporter and the announcement lifecycle built on it

pub mod context;
pub mod error;
pub mod health;
pub mod instance;
pub mod lifecycle;
pub mod memory;
pub mod registry;

#[cfg(test)]
mod testing;

pub use context::{CallContext, Interrupted};
pub use error::{RegistryError, Result};
pub use health::{HealthReporter, HealthReporterConfig, ReportStats};
pub use instance::{generate_instance_id, generate_instance_id_with, HostPort, ServiceInstance};
pub use lifecycle::{ServiceAnnouncement, ShutdownReport};
pub use memory::MemoryRegistry;
pub use registry::{Registry, DEFAULT_CHECK_TTL};
