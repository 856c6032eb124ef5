//! Scripted in-memory fetcher for tests

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use super::client::{ErrorEntry, Fetcher};
use super::errors::FetchError;
use super::types::{FetchMode, Request, Response};

#[derive(Clone)]
enum Route {
    Respond(u16, Bytes),
    Slow(Duration, u16, Bytes),
    Fail,
}

/// Answers from a table of URL → response; unscripted URLs fail like an offline network
#[derive(Default)]
pub struct FakeFetcher {
    routes: Mutex<HashMap<String, Route>>,
    calls: AtomicUsize,
    per_url: Mutex<HashMap<String, usize>>,
    modes: Mutex<Vec<FetchMode>>,
    failures: Mutex<Vec<ErrorEntry>>,
}

impl FakeFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, url: &str, status: u16, body: &'static str) {
        self.routes
            .lock()
            .unwrap()
            .insert(url.to_string(), Route::Respond(status, Bytes::from_static(body.as_bytes())));
    }

    /// Answer only after `delay`, like a slow origin
    pub fn respond_after(&self, url: &str, delay: Duration, status: u16, body: &'static str) {
        self.routes.lock().unwrap().insert(
            url.to_string(),
            Route::Slow(delay, status, Bytes::from_static(body.as_bytes())),
        );
    }

    pub fn fail(&self, url: &str) {
        self.routes.lock().unwrap().insert(url.to_string(), Route::Fail);
    }

    /// Total number of fetches attempted
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn calls_for(&self, url: &str) -> usize {
        self.per_url.lock().unwrap().get(url).copied().unwrap_or(0)
    }

    pub fn modes(&self) -> Vec<FetchMode> {
        self.modes.lock().unwrap().clone()
    }
}

#[async_trait]
impl Fetcher for FakeFetcher {
    async fn fetch(&self, request: &Request) -> Result<Response, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let url = request.url.to_string();
        *self.per_url.lock().unwrap().entry(url.clone()).or_insert(0) += 1;
        self.modes.lock().unwrap().push(request.mode);

        let route = self.routes.lock().unwrap().get(&url).cloned();
        match route {
            Some(Route::Respond(status, body)) => Ok(Response::new(status, body)),
            Some(Route::Slow(delay, status, body)) => {
                tokio::time::sleep(delay).await;
                Ok(Response::new(status, body))
            }
            Some(Route::Fail) | None => {
                self.failures.lock().unwrap().push(ErrorEntry {
                    timestamp: 0,
                    url: url.clone(),
                    error: "offline".to_string(),
                });
                Err(FetchError::Network(format!("offline: {}", url)))
            }
        }
    }

    fn recent_errors(&self) -> Vec<ErrorEntry> {
        self.failures.lock().unwrap().clone()
    }
}
