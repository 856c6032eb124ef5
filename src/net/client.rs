//! Network Client
//!
//! The network substrate the worker fetches through. `HttpFetcher` is the
//! production implementation on top of reqwest; it also tracks connection
//! health and a short history of recent failures for status reporting.

use async_trait::async_trait;
use reqwest::header::{HeaderValue, CACHE_CONTROL, PRAGMA};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};

use super::errors::FetchError;
use super::types::{FetchMode, Request, Response, ResponseSource};

/// Default HTTP client timeout
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Maximum number of recent errors to track
const MAX_ERROR_HISTORY: usize = 10;

/// Health status values
pub const HEALTH_HEALTHY: u8 = 0;
pub const HEALTH_DEGRADED: u8 = 1;
pub const HEALTH_UNHEALTHY: u8 = 2;

/// Anything that can perform a fetch on the worker's behalf
///
/// Non-2xx answers are still `Ok`; only transport-level failures are errors.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, request: &Request) -> Result<Response, FetchError>;

    /// Connection health as reported in status replies
    fn health_status(&self) -> &'static str {
        "healthy"
    }

    /// Most recent failures, oldest first
    fn recent_errors(&self) -> Vec<ErrorEntry> {
        Vec::new()
    }
}

/// A recent error entry for tracking
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEntry {
    pub timestamp: u64,
    pub url: String,
    pub error: String,
}

/// reqwest-backed fetcher
#[derive(Clone)]
pub struct HttpFetcher {
    /// HTTP client for making requests
    http_client: Client,
    /// Connection health (0=healthy, 1=degraded, 2=unhealthy)
    health: Arc<AtomicU8>,
    /// Recent error log
    error_log: Arc<Mutex<VecDeque<ErrorEntry>>>,
}

impl HttpFetcher {
    /// Build a fetcher whose requests give up after `timeout`
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let http_client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("swcache/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http_client,
            health: Arc::new(AtomicU8::new(HEALTH_HEALTHY)),
            error_log: Arc::new(Mutex::new(VecDeque::new())),
        })
    }

    /// Log an error to the error history ring buffer
    fn log_error(&self, url: &str, error: &str) {
        let entry = ErrorEntry {
            timestamp: std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
            url: url.to_string(),
            error: error.to_string(),
        };

        if let Ok(mut log) = self.error_log.lock() {
            if log.len() >= MAX_ERROR_HISTORY {
                log.pop_front();
            }
            log.push_back(entry);
        }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: &Request) -> Result<Response, FetchError> {
        let mut builder = self
            .http_client
            .request(request.method.clone(), request.url.clone());

        if request.mode == FetchMode::Reload {
            builder = builder
                .header(CACHE_CONTROL, HeaderValue::from_static("no-cache"))
                .header(PRAGMA, HeaderValue::from_static("no-cache"));
        }

        let response = match builder.send().await {
            Ok(response) => response,
            Err(e) => {
                let err = FetchError::from_reqwest(e);
                warn!(url = %request.url, error = %err, "Network fetch failed");
                self.health.store(HEALTH_UNHEALTHY, Ordering::Relaxed);
                self.log_error(request.url.as_str(), &err.to_string());
                return Err(err);
            }
        };

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();

        let body = response.bytes().await.map_err(|e| {
            let err = FetchError::from_reqwest(e);
            self.log_error(request.url.as_str(), &err.to_string());
            err
        })?;

        if status >= 500 {
            self.health.store(HEALTH_DEGRADED, Ordering::Relaxed);
        } else {
            self.health.store(HEALTH_HEALTHY, Ordering::Relaxed);
        }

        debug!(url = %request.url, status = status, size = body.len(), "Network fetch complete");

        Ok(Response {
            status,
            headers,
            body,
            source: ResponseSource::Network,
        })
    }

    fn health_status(&self) -> &'static str {
        match self.health.load(Ordering::Relaxed) {
            HEALTH_HEALTHY => "healthy",
            HEALTH_DEGRADED => "degraded",
            _ => "unhealthy",
        }
    }

    fn recent_errors(&self) -> Vec<ErrorEntry> {
        self.error_log
            .lock()
            .map(|log| log.iter().cloned().collect())
            .unwrap_or_default()
    }
}
