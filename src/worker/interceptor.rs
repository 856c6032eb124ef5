//! Fetch interceptor: top-level dispatch for every request the worker sees

use tracing::{trace, warn};

use super::policy::{cache_first, network_first, offline_fallback, stale_while_revalidate};
use super::WorkerContext;
use crate::net::{Request, Response};
use crate::strategy::Policy;

/// Result of intercepting a request
#[derive(Debug)]
pub enum FetchOutcome {
    /// Not handled by the worker; the caller should go to the network itself
    PassThrough,
    /// The worker's answer
    Respond(Response),
}

impl FetchOutcome {
    pub fn response(self) -> Option<Response> {
        match self {
            FetchOutcome::PassThrough => None,
            FetchOutcome::Respond(response) => Some(response),
        }
    }
}

pub struct FetchInterceptor {
    ctx: WorkerContext,
}

impl FetchInterceptor {
    pub fn new(ctx: WorkerContext) -> Self {
        Self { ctx }
    }

    /// Handle one request. Every eligible request gets exactly one response;
    /// no error escapes past this point.
    pub async fn handle(&self, request: Request) -> FetchOutcome {
        if !request.is_interceptable() {
            trace!(method = %request.method, url = %request.url, "Passing request through");
            return FetchOutcome::PassThrough;
        }

        let result = match self.ctx.config.strategies.resolve(&request) {
            Some(entry) => match entry.policy {
                Policy::CacheFirst => cache_first(&self.ctx, &request, &entry.store, entry.max_age).await,
                Policy::NetworkFirst => network_first(&self.ctx, &request, &entry.store, entry.max_age).await,
            },
            None => Ok(stale_while_revalidate(&self.ctx, &request).await),
        };

        match result {
            Ok(response) => FetchOutcome::Respond(response),
            Err(e) => {
                warn!(url = %request.url, error = %e, "Request failed, serving offline fallback");
                FetchOutcome::Respond(offline_fallback(&self.ctx).await)
            }
        }
    }
}
