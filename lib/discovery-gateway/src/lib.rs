//! Client-side gateways to downstream services
//!
//! A gateway resolves a logical service name through the `Registry`, picks
//! one healthy instance at random, performs the HTTP call and maps the
//! outcome onto `GatewayError`.
pub mod error;
pub mod gateway;
pub mod load_balancer;
pub mod metadata;
pub mod metrics;
pub mod model;
pub mod policy;
pub mod rating;

pub use error::{GatewayError, Result};
pub use gateway::{RequestSpec, ServiceGateway};
pub use load_balancer::{LoadBalancer, LoadBalancingStrategy};
pub use metadata::MetadataGateway;
pub use metrics::GatewayMetrics;
pub use model::{AggregatedRating, Metadata, Rating, RatingValue, RecordId, RecordType, UserId};
pub use policy::{CircuitBreaker, CircuitBreakerConfig, CircuitState, RetryPolicy, TrafficPolicy};
pub use rating::RatingGateway;
