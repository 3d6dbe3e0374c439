//! HTTP client for the Consul agent API

use discovery_core::{RegistryError, Result, DEFAULT_CHECK_TTL};
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{StatusCode, Url};
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

const TOKEN_HEADER: &str = "x-consul-token";

/// Consul connection configuration
#[derive(Clone, Debug)]
pub struct ConsulConfig {
    /// Agent address as `host:port`
    pub address: String,
    /// `http` or `https`
    pub scheme: String,
    /// ACL token sent with every request
    pub token: Option<String>,
    /// Timeout applied to every request, including health reports
    pub request_timeout: Duration,
    /// TTL of the check attached to each registration
    pub check_ttl: Duration,
    /// Let Consul reap instances whose check stays critical this long
    pub deregister_critical_after: Option<Duration>,
}

impl Default for ConsulConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:8500".to_string(),
            scheme: "http".to_string(),
            token: None,
            request_timeout: Duration::from_secs(5),
            check_ttl: DEFAULT_CHECK_TTL,
            deregister_critical_after: None,
        }
    }
}

impl ConsulConfig {
    /// Defaults overridden by `CONSUL_HTTP_ADDR` and `CONSUL_HTTP_TOKEN`.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(addr) = std::env::var("CONSUL_HTTP_ADDR") {
            config = config.with_address(&addr);
        }
        if let Ok(token) = std::env::var("CONSUL_HTTP_TOKEN") {
            if !token.is_empty() {
                config.token = Some(token);
            }
        }
        config
    }

    /// Set the agent address. A leading `http://` or `https://` sets the scheme.
    pub fn with_address(mut self, address: &str) -> Self {
        let address = address.trim().trim_end_matches('/');
        if let Some(rest) = address.strip_prefix("https://") {
            self.scheme = "https".to_string();
            self.address = rest.to_string();
        } else if let Some(rest) = address.strip_prefix("http://") {
            self.scheme = "http".to_string();
            self.address = rest.to_string();
        } else {
            self.address = address.to_string();
        }
        self
    }

    pub fn base_url(&self) -> String {
        format!("{}://{}", self.scheme, self.address)
    }
}

/// ConsulClient wraps a pooled reqwest client bound to one agent
#[derive(Clone, Debug)]
pub struct ConsulClient {
    http: reqwest::Client,
    base_url: Url,
}

/// Status and body of an agent response.
#[derive(Debug)]
pub struct AgentResponse {
    pub status: StatusCode,
    pub body: String,
}

impl ConsulClient {
    pub fn new(config: &ConsulConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        if let Some(token) = &config.token {
            let value = HeaderValue::from_str(token).map_err(|_| {
                RegistryError::InvalidConfiguration("Consul token is not a valid header value".to_string())
            })?;
            headers.insert(TOKEN_HEADER, value);
        }

        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| RegistryError::InvalidConfiguration(format!("building HTTP client: {}", e)))?;

        let base_url = Url::parse(&config.base_url()).map_err(|e| {
            RegistryError::InvalidConfiguration(format!("invalid Consul address {}: {}", config.address, e))
        })?;

        Ok(Self { http, base_url })
    }

    /// GET the endpoint at `segments`; each segment is percent-encoded.
    pub async fn get(&self, segments: &[&str], query: &[(&str, &str)]) -> Result<AgentResponse> {
        let url = self.url(segments)?;
        debug!("Consul GET {}", url);
        let request = self.http.get(url).query(query);
        Self::send(request).await
    }

    pub async fn put<B: Serialize + ?Sized>(
        &self,
        segments: &[&str],
        body: Option<&B>,
    ) -> Result<AgentResponse> {
        let url = self.url(segments)?;
        debug!("Consul PUT {}", url);
        let mut request = self.http.put(url);
        if let Some(body) = body {
            request = request.json(body);
        }
        Self::send(request).await
    }

    fn url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| {
                RegistryError::InvalidConfiguration(format!("Consul address {} cannot carry a path", self.base_url))
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn send(request: reqwest::RequestBuilder) -> Result<AgentResponse> {
        let response = request
            .send()
            .await
            .map_err(|e| RegistryError::BackendUnavailable(e.to_string()))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| RegistryError::BackendUnavailable(e.to_string()))?;
        Ok(AgentResponse { status, body })
    }
}

impl AgentResponse {
    /// Body of a 2xx response; 5xx is an unavailable backend, anything else a rejection.
    pub fn into_success(self) -> Result<String> {
        if self.status.is_success() {
            Ok(self.body)
        } else if self.status.is_server_error() {
            Err(RegistryError::BackendUnavailable(format!(
                "{}: {}",
                self.status,
                self.body.trim()
            )))
        } else {
            Err(RegistryError::Rejected {
                status: self.status.as_u16(),
                message: self.body.trim().to_string(),
            })
        }
    }
}
