//! Rate-limited, cached outbound HTTP client
//!
//! Every outbound call passes through a per-host sliding-window budget;
//! hosts absent from the limit table are unlimited. Idempotent reads that opt
//! in are served from a short-TTL cache without counting against the window.

pub mod rate_window;

pub use rate_window::{HostLimit, RateWindow};

use crate::cache::{Clock, ExpiringCache, SystemClock};
use dashmap::DashMap;
use reqwest::Method;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Timeout applied to each individual outbound call
const CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Decoded response in one of the two supported shapes
#[derive(Debug, Clone)]
pub enum HttpResponse {
    /// Status and body text, undecoded
    Raw { status: u16, body: String },
    /// Parsed JSON payload with `status_code` injected as a field
    Structured(Value),
}

impl HttpResponse {
    pub fn status(&self) -> Option<u16> {
        match self {
            HttpResponse::Raw { status, .. } => Some(*status),
            HttpResponse::Structured(value) => value
                .get("status_code")
                .and_then(|v| v.as_u64())
                .map(|v| v as u16),
        }
    }
}

#[derive(Debug)]
pub enum CallError {
    /// Policy refusal: the per-host budget is exhausted. Never silently
    /// dropped; callers decide whether to wait out `retry_after`.
    RateLimited { retry_after: Duration },
    InvalidUrl(String),
    Request(String),
}

impl fmt::Display for CallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallError::RateLimited { retry_after } => {
                write!(f, "rate limited, retry after {:.0?}", retry_after)
            }
            CallError::InvalidUrl(e) => write!(f, "invalid URL: {}", e),
            CallError::Request(e) => write!(f, "request failed: {}", e),
        }
    }
}

#[derive(Debug, Default)]
pub struct CallOptions {
    pub params: Vec<(String, String)>,
    pub body: Option<Value>,
    /// Serve a fresh-enough previous GET response instead of calling out
    pub use_cache: bool,
    /// Return the raw shape instead of the structured one
    pub raw_response: bool,
}

pub struct RateLimitedClient {
    client: reqwest::Client,
    /// Per-host budgets, fixed at construction
    limits: HashMap<String, HostLimit>,
    windows: DashMap<String, RateWindow>,
    cache: ExpiringCache<String, HttpResponse>,
    clock: Arc<dyn Clock>,
}

impl RateLimitedClient {
    pub fn new(limits: HashMap<String, HostLimit>, cache_len: usize, cache_ttl: Duration) -> Self {
        Self::with_clock(limits, cache_len, cache_ttl, Arc::new(SystemClock))
    }

    pub fn with_clock(
        limits: HashMap<String, HostLimit>,
        cache_len: usize,
        cache_ttl: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(CALL_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        RateLimitedClient {
            client,
            limits,
            windows: DashMap::new(),
            cache: ExpiringCache::with_clock(cache_len, cache_ttl, clock.clone()),
            clock,
        }
    }

    /// Make an outbound call, subject to the host's sliding-window budget.
    pub async fn call(
        &self,
        method: Method,
        url: &str,
        options: CallOptions,
    ) -> Result<HttpResponse, CallError> {
        let url = url.replace(' ', "%20").replace('+', "%2b");
        let cache_key = cache_key(&method, &url, &options.params);
        let cacheable = method == Method::GET;

        // Cache hits bypass both the rate window and the network
        if options.use_cache && cacheable {
            if let Some(hit) = self.cache.get(&cache_key) {
                log::info!("[http] Retrieving cached GET response ({})", cache_key);
                return Ok(hit);
            }
        }

        let host = Url::parse(&url)
            .map_err(|e| CallError::InvalidUrl(e.to_string()))?
            .host_str()
            .map(|h| h.to_string())
            .ok_or_else(|| CallError::InvalidUrl(format!("no host in {}", url)))?;
        self.admit(&host)?;

        log::info!("[http] Making HTTP {} request to URL: {}", method, cache_key);

        let mut request = self.client.request(method.clone(), &url);
        if !options.params.is_empty() {
            request = request.query(&options.params);
        }
        if let Some(body) = &options.body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| CallError::Request(e.to_string()))?;
        let status = response.status().as_u16();

        let result = if options.raw_response {
            let body = response
                .text()
                .await
                .map_err(|e| CallError::Request(e.to_string()))?;
            HttpResponse::Raw { status, body }
        } else {
            let payload = match response.json::<Value>().await {
                Ok(Value::Object(map)) => Value::Object(map),
                // status_code only attaches to object payloads; other shapes
                // are wrapped so it always has somewhere to live
                Ok(other) => json!({ "data": other }),
                Err(e) => {
                    // Degrade to an empty payload rather than failing the call
                    log::error!(
                        "[http] {} request to {} returned undecodable payload: {}",
                        method,
                        cache_key,
                        e
                    );
                    Value::Object(serde_json::Map::new())
                }
            };
            let mut payload = payload;
            payload["status_code"] = json!(status);
            HttpResponse::Structured(payload)
        };

        if cacheable {
            self.cache.insert(cache_key, result.clone());
        }

        Ok(result)
    }

    /// Check the host's budget, recording the call on admission
    fn admit(&self, host: &str) -> Result<(), CallError> {
        // Hosts without a configured limit are unlimited
        let Some(limit) = self.limits.get(host) else {
            return Ok(());
        };

        let now = self.clock.now();
        let mut window = self
            .windows
            .entry(host.to_string())
            .or_insert_with(|| RateWindow::new(*limit));

        window
            .admit(now)
            .map_err(|retry_after| CallError::RateLimited { retry_after })
    }
}

/// Normalized cache key: method + lowercased URL + encoded params
fn cache_key(method: &Method, url: &str, params: &[(String, String)]) -> String {
    let mut key = format!("{}:{}", method.as_str().to_lowercase(), url.to_lowercase());
    if !params.is_empty() {
        let encoded: Vec<String> = params
            .iter()
            .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
            .collect();
        key = format!("{}?{}", key, encoded.join("&"));
    }
    key
}
