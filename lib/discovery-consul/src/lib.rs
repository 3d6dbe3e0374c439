//! Consul integration
//!
//! `ConsulRegistry` implements the discovery `Registry` against a Consul
//! agent's HTTP API: agent service registration with a TTL check, check
//! passes for health reporting, and passing-only health queries for lookups.
pub mod client;
pub mod registry;

pub use client::{ConsulClient, ConsulConfig};
pub use registry::{ConsulRegistry, DIAL_ADDRESS_META};
