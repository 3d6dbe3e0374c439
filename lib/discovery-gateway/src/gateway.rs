//! Generic gateway call: resolve, select, call, map

use discovery_core::{CallContext, Registry};
use rand::rngs::StdRng;
use rand::SeedableRng;
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;
use tracing::{debug, warn};

use crate::{
    CircuitBreaker, GatewayError, GatewayMetrics, LoadBalancer, Result, TrafficPolicy,
};

/// Longest diagnostic payload carried in an `UpstreamError`.
const MAX_DIAGNOSTIC_LEN: usize = 512;

/// One downstream request: method, path and query parameters.
#[derive(Clone, Debug, PartialEq)]
pub struct RequestSpec {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
}

impl RequestSpec {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    /// Append a query parameter
    pub fn query(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((key.into(), value.to_string()));
        self
    }

    /// URL of this request on the instance at `address`, without the query
    pub fn url(&self, address: &str) -> String {
        format!("http://{}{}", address, self.path)
    }
}

/// JSON error envelope returned by downstream services
#[derive(Deserialize)]
struct ErrorEnvelope {
    error: String,
}

/// ServiceGateway routes calls to instances resolved through the registry.
///
/// One gateway can serve any number of downstream services; the typed
/// gateways (`MetadataGateway`, `RatingGateway`) wrap a shared one.
pub struct ServiceGateway {
    registry: Arc<dyn Registry>,
    client: reqwest::Client,
    balancer: LoadBalancer,
    policy: TrafficPolicy,
    breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
    metrics: Option<GatewayMetrics>,
    jitter_rng: Mutex<StdRng>,
}

impl ServiceGateway {
    pub fn new(registry: Arc<dyn Registry>) -> Self {
        Self {
            registry,
            client: reqwest::Client::new(),
            balancer: LoadBalancer::default(),
            policy: TrafficPolicy::default(),
            breakers: Mutex::new(HashMap::new()),
            metrics: None,
            jitter_rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    pub fn with_load_balancer(mut self, balancer: LoadBalancer) -> Self {
        self.balancer = balancer;
        self
    }

    pub fn with_policy(mut self, policy: TrafficPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_metrics(mut self, metrics: GatewayMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Call `service_name` and decode the JSON response body into `T`.
    pub async fn call<T: DeserializeOwned>(
        &self,
        ctx: &CallContext,
        service_name: &str,
        spec: &RequestSpec,
    ) -> Result<T> {
        let started = Instant::now();
        let result = self
            .call_with_policy(ctx, service_name, spec, |body| {
                serde_json::from_slice(&body)
                    .map_err(|e| GatewayError::MalformedResponse(e.to_string()))
            })
            .await;
        self.observe(service_name, &result, started);
        result
    }

    /// Call `service_name` for its side effect; a successful body is ignored.
    pub async fn call_unit(
        &self,
        ctx: &CallContext,
        service_name: &str,
        spec: &RequestSpec,
    ) -> Result<()> {
        let started = Instant::now();
        let result = self
            .call_with_policy(ctx, service_name, spec, |_| Ok(()))
            .await;
        self.observe(service_name, &result, started);
        result
    }

    fn observe<T>(&self, service_name: &str, result: &Result<T>, started: Instant) {
        let outcome = match result {
            Ok(_) => "success",
            Err(e) => {
                debug!("Call to {} failed: {}", service_name, e);
                e.kind()
            }
        };
        if let Some(metrics) = &self.metrics {
            metrics.record_call(service_name, outcome, started.elapsed());
        }
    }

    /// Attempts under the traffic policy. `decode` runs inside each attempt so
    /// the circuit breaker sees undecodable answers too.
    async fn call_with_policy<T, D>(
        &self,
        ctx: &CallContext,
        service_name: &str,
        spec: &RequestSpec,
        decode: D,
    ) -> Result<T>
    where
        D: Fn(Vec<u8>) -> Result<T>,
    {
        let breaker = self.breaker(service_name);
        let mut retries = 0;

        loop {
            if let Some(breaker) = &breaker {
                if !breaker.can_attempt() {
                    return Err(GatewayError::CircuitOpen(service_name.to_string()));
                }
            }

            let result = self.attempt(ctx, service_name, spec).await.and_then(&decode);

            if let Some(breaker) = &breaker {
                match &result {
                    Ok(_) | Err(GatewayError::NotFound) => breaker.record_success(),
                    Err(GatewayError::UpstreamError { .. }) => breaker.record_failure(),
                    Err(GatewayError::Cancelled) => {}
                    Err(_) => breaker.record_inconclusive(),
                }
            }

            match result {
                Err(e) if retries < self.policy.retry.max_retries && self.policy.retry.should_retry(&e) => {
                    let backoff = self
                        .policy
                        .retry
                        .backoff_duration(retries, &mut *self.jitter_rng());
                    warn!(
                        "Call to {} failed ({}), retry {} in {:?}",
                        service_name,
                        e,
                        retries + 1,
                        backoff
                    );
                    if let Some(metrics) = &self.metrics {
                        metrics.record_retry(service_name);
                    }
                    retries += 1;
                    ctx.run(tokio::time::sleep(backoff)).await?;
                }
                other => return other,
            }
        }
    }

    /// A single resolution and a single request.
    async fn attempt(
        &self,
        ctx: &CallContext,
        service_name: &str,
        spec: &RequestSpec,
    ) -> Result<Vec<u8>> {
        let addresses = self
            .registry
            .service_addresses(ctx, service_name)
            .await
            .map_err(GatewayError::from_registry)?;

        let address = self
            .balancer
            .select(&addresses)
            .ok_or_else(|| GatewayError::DownstreamUnavailable(service_name.to_string()))?;

        let url = spec.url(address);
        debug!("Calling {} service: {} {}", service_name, spec.method, url);

        let attempt_ctx = match self.policy.request_timeout {
            Some(timeout) => ctx.child().with_timeout(timeout),
            None => ctx.child(),
        };
        let request = self
            .client
            .request(spec.method.clone(), url)
            .query(&spec.query);

        let (status, body) = attempt_ctx
            .run(async {
                let response = request
                    .send()
                    .await
                    .map_err(|e| transport_error(address, e))?;
                let status = response.status();
                let body = response
                    .bytes()
                    .await
                    .map_err(|e| transport_error(address, e))?;
                Ok::<_, GatewayError>((status, body))
            })
            .await??;

        debug!("{} service at {} responded with {}", service_name, address, status);
        map_response(status, body.to_vec())
    }

    fn breaker(&self, service_name: &str) -> Option<Arc<CircuitBreaker>> {
        let config = self.policy.circuit_breaker.as_ref()?;
        let mut breakers = match self.breakers.lock() {
            Ok(breakers) => breakers,
            Err(poisoned) => poisoned.into_inner(),
        };
        Some(
            breakers
                .entry(service_name.to_string())
                .or_insert_with(|| Arc::new(CircuitBreaker::new(config.clone())))
                .clone(),
        )
    }

    fn jitter_rng(&self) -> MutexGuard<'_, StdRng> {
        match self.jitter_rng.lock() {
            Ok(rng) => rng,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

fn transport_error(address: &str, err: reqwest::Error) -> GatewayError {
    GatewayError::Transport {
        address: address.to_string(),
        message: err.to_string(),
    }
}

/// Map a downstream status onto the gateway taxonomy.
fn map_response(status: StatusCode, body: Vec<u8>) -> Result<Vec<u8>> {
    if status == StatusCode::NOT_FOUND {
        return Err(GatewayError::NotFound);
    }
    if !status.is_success() {
        return Err(GatewayError::UpstreamError {
            status: status.as_u16(),
            message: diagnostic(&body),
        });
    }
    Ok(body)
}

/// Error message from a JSON envelope, else the (truncated) raw body.
fn diagnostic(body: &[u8]) -> String {
    if let Ok(envelope) = serde_json::from_slice::<ErrorEnvelope>(body) {
        return envelope.error;
    }

    let text = String::from_utf8_lossy(body);
    let text = text.trim();
    if text.len() <= MAX_DIAGNOSTIC_LEN {
        return text.to_string();
    }
    let mut end = MAX_DIAGNOSTIC_LEN;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end])
}
