//! # Request Cache and Deduplication Module
//!
//! Wraps outbound HTTP calls with a short-lived response cache and in-flight
//! deduplication, keyed by `method:url:body`.
//!
//! For each call:
//! 1. A live cached response is returned with no network I/O.
//! 2. Otherwise, if an identical call is already outstanding, the caller joins it and
//!    receives the same settled result.
//! 3. Otherwise a new call is dispatched and registered as in flight.
//!
//! On settlement the in-flight entry is released. Only successful responses are
//! cached, so a failed call is retried by the next caller. The check-and-register step
//! is a single atomic map operation, so two concurrent callers can never both dispatch.
//!
//! ## Rust Concepts Used
//! - `futures::future::Shared` so every joined caller awaits one underlying call
//! - `DashMap::entry` for atomic test-and-insert of in-flight requests
//! - The shared call is also driven by a spawned task, so settlement (and cleanup)
//!   happens even when every waiting caller is cancelled

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::lru::BoundedLruCache;
use super::stores::validate_ttl;
use crate::core::config::RequestCacheConfig;
use crate::core::error::{CacheError, CacheResult, FetchError};
use crate::observability::metrics;

/// An outbound HTTP call as seen by the request cache
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundRequest {
    /// Upper-case HTTP method
    pub method: String,
    pub url: String,
    /// JSON body, if any
    pub body: Option<Value>,
}

impl OutboundRequest {
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            method: method.into().to_ascii_uppercase(),
            url: url.into(),
            body: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new("GET", url)
    }

    pub fn post(url: impl Into<String>, body: Value) -> Self {
        Self::new("POST", url).with_body(body)
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Identity of this call: `method:url:body`, where an absent body is empty
    pub fn dedup_key(&self) -> String {
        let body = self.body.as_ref().map(Value::to_string).unwrap_or_default();
        format!("{}:{}:{}", self.method, self.url, body)
    }
}

/// The outbound HTTP collaborator
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Perform the call and decode a JSON response; non-2xx is an error
    async fn send(&self, request: &OutboundRequest) -> Result<Value, FetchError>;
}

/// [`HttpTransport`] backed by a `reqwest` client
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Create a transport whose calls time out after `timeout`
    pub fn new(timeout: Duration) -> CacheResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CacheError::config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    /// Wrap an existing client
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: &OutboundRequest) -> Result<Value, FetchError> {
        let method = reqwest::Method::from_bytes(request.method.as_bytes())
            .map_err(|e| FetchError::transport(&request.url, e.to_string()))?;

        let mut builder = self.client.request(method, &request.url);
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| FetchError::transport(&request.url, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: request.url.clone(),
                status: status.as_u16(),
            });
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| FetchError::decode(&request.url, e.to_string()))
    }
}

type SharedResponse = Shared<BoxFuture<'static, Result<Value, FetchError>>>;

/// An outstanding network call that identical callers join
#[derive(Clone)]
pub struct PendingRequest {
    pub key: String,
    pub started_at: Instant,
    id: u64,
    result: SharedResponse,
}

impl std::fmt::Debug for PendingRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingRequest")
            .field("key", &self.key)
            .field("started_at", &self.started_at)
            .field("id", &self.id)
            .finish()
    }
}

struct RequestCacheInner {
    transport: Arc<dyn HttpTransport>,
    responses: BoundedLruCache<String, Value>,
    in_flight: DashMap<String, PendingRequest>,
    next_id: AtomicU64,
}

/// Response cache with in-flight deduplication for outbound calls
#[derive(Clone)]
pub struct RequestCacheManager {
    inner: Arc<RequestCacheInner>,
}

impl RequestCacheManager {
    /// Create a manager over `transport`, sized by `config`
    pub fn new(transport: Arc<dyn HttpTransport>, config: &RequestCacheConfig) -> CacheResult<Self> {
        Ok(Self {
            inner: Arc::new(RequestCacheInner {
                transport,
                responses: BoundedLruCache::new(config.max_entries, config.default_ttl)?,
                in_flight: DashMap::new(),
                next_id: AtomicU64::new(0),
            }),
        })
    }

    /// Create a manager that sends calls with `reqwest`
    pub fn with_reqwest(config: &RequestCacheConfig) -> CacheResult<Self> {
        let transport = ReqwestTransport::new(config.request_timeout)?;
        Self::new(Arc::new(transport), config)
    }

    /// Fetch `request`, answering from the response cache or an identical in-flight call
    /// when possible. A successful response is cached for `ttl`, or the default TTL.
    pub async fn fetch_cached<T: DeserializeOwned>(
        &self,
        request: OutboundRequest,
        ttl: Option<Duration>,
    ) -> CacheResult<T> {
        if let Some(ttl) = ttl {
            validate_ttl(ttl)?;
        }

        let url = request.url.clone();
        let key = request.dedup_key();

        let value = match self.inner.responses.get(&key) {
            Some(value) => {
                metrics::record_request_cache_hit();
                debug!(key = %key, "Request cache hit");
                value
            }
            None => self.join_or_dispatch(key, request, ttl).await?,
        };

        serde_json::from_value(value).map_err(|e| CacheError::from(FetchError::decode(url, e.to_string())))
    }

    async fn join_or_dispatch(
        &self,
        key: String,
        request: OutboundRequest,
        ttl: Option<Duration>,
    ) -> Result<Value, FetchError> {
        let (result, dispatched) = match self.inner.in_flight.entry(key.clone()) {
            Entry::Occupied(pending) => {
                metrics::record_dedup_join();
                debug!(key = %key, "Joining in-flight request");
                (pending.get().result.clone(), false)
            }
            Entry::Vacant(slot) => {
                // a call may have settled between the cache check and taking this slot
                if let Some(value) = self.inner.responses.get(&key) {
                    metrics::record_request_cache_hit();
                    return Ok(value);
                }
                let pending = self.dispatch(key, request, ttl);
                let result = pending.result.clone();
                slot.insert(pending);
                (result, true)
            }
        };

        if dispatched {
            tokio::spawn(result.clone());
        }
        result.await
    }

    fn dispatch(&self, key: String, request: OutboundRequest, ttl: Option<Duration>) -> PendingRequest {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let inner = Arc::clone(&self.inner);
        let settle_key = key.clone();

        debug!(key = %key, "Dispatching outbound request");

        let result = async move {
            let started = Instant::now();
            let outcome = inner.transport.send(&request).await;

            match &outcome {
                Ok(value) => {
                    let ttl = ttl.unwrap_or_else(|| inner.responses.ttl());
                    inner.responses.set_with_ttl(settle_key.clone(), value.clone(), ttl);
                }
                Err(e) => {
                    warn!(key = %settle_key, error = %e, "Outbound request failed; not cached");
                }
            }

            inner.in_flight.remove_if(&settle_key, |_, pending| pending.id == id);
            metrics::record_fetch(outcome.is_ok());
            debug!(
                key = %settle_key,
                elapsed_ms = started.elapsed().as_millis() as u64,
                success = outcome.is_ok(),
                "Outbound request settled"
            );
            outcome
        }
        .boxed()
        .shared();

        PendingRequest {
            key,
            started_at: Instant::now(),
            id,
            result,
        }
    }

    /// Number of calls currently outstanding
    pub fn in_flight_count(&self) -> usize {
        self.inner.in_flight.len()
    }

    /// Number of cached responses, including expired ones not yet read
    pub fn cached_count(&self) -> usize {
        self.inner.responses.len()
    }

    /// Drop the cached response for `request`; returns whether a live one was present
    pub fn invalidate(&self, request: &OutboundRequest) -> bool {
        self.inner.responses.remove(&request.dedup_key()).is_some()
    }

    /// Drop every cached response; in-flight calls are unaffected
    pub fn clear(&self) {
        self.inner.responses.clear();
    }
}
