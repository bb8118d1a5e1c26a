//! Transport to the reporting server
//!
//! [`SyncTransport`] is the seam the reader, the dispatcher, and the sync
//! engine talk through. [`HttpTransport`] implements it against the JSON
//! REST routes:
//!
//! ```text
//! GET    /api/{collection}
//! POST   /api/{submissions|templates}
//! PUT    /api/{submissions|templates}/{id}
//! DELETE /api/{submissions|templates}/{id}
//! ```
//!
//! Every request carries the bearer token; writes also carry an
//! `Idempotency-Key` header.

use crate::connectivity::ReachabilityProbe;
use crate::error::TransportError;
use crate::settings::SyncSettings;
use field_model::{Action, CollectionName, WriteRequest};
use reqwest::{Method, RequestBuilder};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// Header carrying the per-operation idempotency key.
pub const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

/// Network access used by the sync core.
#[trait_variant::make(Send)]
pub trait SyncTransport: Send + Sync {
    /// Fetch every record of a collection.
    async fn fetch(&self, collection: CollectionName) -> Result<Vec<Value>, TransportError>;

    /// Perform a create, update, or delete and return the response body.
    ///
    /// Bodies that are empty or not JSON come back as `Value::Null`.
    async fn send(&self, request: &WriteRequest) -> Result<Value, TransportError>;
}

/// reqwest-based transport
pub struct HttpTransport {
    base_url: String,
    token: Option<String>,
    probe_path: String,
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .pool_idle_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| TransportError::Configuration(e.to_string()))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token: None,
            probe_path: "/api/health".to_string(),
            client,
        })
    }

    pub fn from_settings(settings: &SyncSettings) -> Result<Self, TransportError> {
        let mut transport = Self::new(&settings.server.base_url, settings.request_timeout())?
            .with_probe_path(&settings.server.probe_path);
        transport.token = settings.server.api_token.clone();
        Ok(transport)
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_probe_path(mut self, path: &str) -> Self {
        self.probe_path = path.to_string();
        self
    }

    pub fn set_token(&mut self, token: Option<String>) {
        self.token = token;
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self.client.request(method, self.url(path));
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    fn route(request: &WriteRequest) -> Result<(Method, String), TransportError> {
        let plural = request.entity_type.collection();
        if request.action == Action::Create {
            return Ok((Method::POST, format!("/api/{}", plural)));
        }

        let target = request.target.as_ref().ok_or_else(|| {
            TransportError::Configuration(format!("{} without target id", request.action))
        })?;
        let path = format!("/api/{}/{}", plural, urlencoding::encode(target.as_str()));
        let method = match request.action {
            Action::Delete => Method::DELETE,
            _ => Method::PUT,
        };
        Ok((method, path))
    }

    /// Send and decode. A success status is never turned into an error:
    /// the server has committed the write, so a body that is empty,
    /// not JSON, or cut off comes back as `Value::Null`.
    async fn execute(&self, builder: RequestBuilder) -> Result<Value, TransportError> {
        let response = builder.send().await.map_err(map_send_error)?;
        let status = response.status();

        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(TransportError::Status {
                status: status.as_u16(),
                message,
            });
        }

        let text = match response.text().await {
            Ok(text) => text,
            Err(e) => {
                debug!(%status, error = %e, "Unreadable success body");
                return Ok(Value::Null);
            }
        };
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&text).unwrap_or(Value::Null))
    }
}

impl SyncTransport for HttpTransport {
    async fn fetch(&self, collection: CollectionName) -> Result<Vec<Value>, TransportError> {
        let path = format!("/api/{}", collection);
        let body = self.execute(self.request(Method::GET, &path)).await?;
        extract_items(collection, body)
    }

    async fn send(&self, request: &WriteRequest) -> Result<Value, TransportError> {
        let (method, path) = Self::route(request)?;
        debug!(%method, %path, "Sending write");

        let mut builder = self.request(method, &path);
        if let Some(key) = &request.idempotency_key {
            builder = builder.header(IDEMPOTENCY_HEADER, key);
        }
        if request.action != Action::Delete {
            builder = builder.json(&request.payload);
        }
        self.execute(builder).await
    }
}

impl ReachabilityProbe for HttpTransport {
    async fn probe(&self) -> bool {
        let builder = self.request(Method::GET, &self.probe_path);
        match self.execute(builder).await {
            Ok(_) => true,
            Err(e) => !e.is_connectivity(),
        }
    }
}

fn map_send_error(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout
    } else if e.is_builder() {
        TransportError::Configuration(e.to_string())
    } else {
        TransportError::Connectivity(e.to_string())
    }
}

/// Accept either a bare array or an object wrapping one under the
/// collection name, `items`, or `data`.
fn extract_items(collection: CollectionName, body: Value) -> Result<Vec<Value>, TransportError> {
    match body {
        Value::Array(items) => Ok(items),
        Value::Object(mut map) => [collection.as_str(), "items", "data"]
            .iter()
            .find_map(|key| match map.remove(*key) {
                Some(Value::Array(items)) => Some(items),
                _ => None,
            })
            .ok_or_else(|| {
                TransportError::Protocol(format!("No {} array in response", collection))
            }),
        _ => Err(TransportError::Protocol(format!(
            "Expected {} list in response",
            collection
        ))),
    }
}
