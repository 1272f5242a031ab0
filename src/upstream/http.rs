//! HTTP transport backed by a pooled `reqwest` client.
//!
//! # Responsibilities
//! - Keep-alive connection pooling to the upstream
//! - Cap concurrent sockets; callers beyond the cap queue here, nowhere else
//! - Attach a request ID (and idempotency key for writes) to every request
//! - Map HTTP failures onto `TransportError`

use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Semaphore;
use url::Url;
use uuid::Uuid;

use crate::config::UpstreamConfig;
use crate::upstream::types::{Method, RequestDescriptor, TransportError};
use crate::upstream::Upstream;

pub const X_REQUEST_ID: &str = "x-request-id";
pub const IDEMPOTENCY_KEY: &str = "idempotency-key";

/// Longest error body kept in `TransportError::Status`.
const MAX_ERROR_BODY: usize = 512;

pub struct HttpUpstream {
    base_url: Url,
    connect_timeout: Duration,
    client: RwLock<Option<reqwest::Client>>,
    sockets: Arc<Semaphore>,
}

impl HttpUpstream {
    pub fn new(config: &UpstreamConfig) -> Result<Self, TransportError> {
        let mut base_url = Url::parse(&config.base_url)
            .map_err(|e| TransportError::Network(format!("invalid base URL '{}': {}", config.base_url, e)))?;
        // Paths are joined relative to the base, so it must end in a slash.
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        let connect_timeout = Duration::from_millis(config.connect_timeout_ms);

        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .pool_max_idle_per_host(config.max_connections)
            .pool_idle_timeout(Duration::from_secs(config.pool_idle_timeout_secs))
            .connect_timeout(connect_timeout)
            .tcp_keepalive(Duration::from_secs(60))
            .no_proxy()
            .build()
            .map_err(|e| TransportError::Network(format!("failed to build HTTP client: {}", e)))?;

        tracing::info!(
            base_url = %base_url,
            max_connections = config.max_connections,
            "Upstream HTTP transport initialized"
        );

        Ok(Self {
            base_url,
            connect_timeout,
            client: RwLock::new(Some(client)),
            sockets: Arc::new(Semaphore::new(config.max_connections)),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Sockets currently available under the cap.
    pub fn available_connections(&self) -> usize {
        self.sockets.available_permits()
    }

    fn url_for(&self, request: &RequestDescriptor) -> Result<Url, TransportError> {
        let mut url = self
            .base_url
            .join(request.path.trim_start_matches('/'))
            .map_err(|e| TransportError::Network(format!("invalid request path '{}': {}", request.path, e)))?;
        if !request.query.is_empty() {
            url.query_pairs_mut().extend_pairs(request.query.iter());
        }
        Ok(url)
    }

    fn map_error(&self, err: reqwest::Error) -> TransportError {
        if err.is_timeout() {
            TransportError::Timeout(self.connect_timeout)
        } else if err.is_decode() {
            TransportError::Decode(err.to_string())
        } else {
            TransportError::Network(err.to_string())
        }
    }

    fn current_client(&self) -> Result<reqwest::Client, TransportError> {
        self.client
            .read()
            .expect("upstream client lock poisoned")
            .clone()
            .ok_or(TransportError::Closed)
    }
}

#[async_trait]
impl Upstream for HttpUpstream {
    async fn send(&self, request: &RequestDescriptor) -> Result<Value, TransportError> {
        let _socket = self
            .sockets
            .acquire()
            .await
            .map_err(|_| TransportError::Closed)?;
        let client = self.current_client()?;
        let url = self.url_for(request)?;
        let request_id = Uuid::new_v4().to_string();

        tracing::debug!(
            request_id = %request_id,
            operation = %request.operation,
            url = %url,
            "Sending upstream request"
        );

        let mut builder = match request.method {
            Method::Get => client.get(url),
            Method::Post => client.post(url),
        };
        builder = builder.header(X_REQUEST_ID, request_id.as_str());
        if let Some(key) = &request.idempotency_key {
            builder = builder.header(IDEMPOTENCY_KEY, key.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|e| self.map_error(e))?;
        let status = response.status();
        let bytes = response.bytes().await.map_err(|e| self.map_error(e))?;

        if !status.is_success() {
            let mut body = String::from_utf8_lossy(&bytes).into_owned();
            if body.len() > MAX_ERROR_BODY {
                let mut cut = MAX_ERROR_BODY;
                while !body.is_char_boundary(cut) {
                    cut -= 1;
                }
                body.truncate(cut);
            }
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }

        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Value::Null);
        }
        serde_json::from_slice(&bytes).map_err(|e| TransportError::Decode(e.to_string()))
    }

    fn close(&self) {
        let dropped = self
            .client
            .write()
            .expect("upstream client lock poisoned")
            .take()
            .is_some();
        self.sockets.close();
        if dropped {
            tracing::info!(base_url = %self.base_url, "Upstream connection pool released");
        }
    }
}
