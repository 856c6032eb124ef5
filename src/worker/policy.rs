//! Cache policies
//!
//! Cache-first and network-first for strategy-table matches, stale-while-revalidate
//! against the core store for everything else, and the offline fallback.
//!
//! Every policy stores a clone of a cacheable response *before* handing the
//! response back, so the caller never races the store write.

use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};

use super::WorkerContext;
use crate::net::{FetchError, Request, Response, ResponseSource};

/// Serve a fresh cached record without touching the network; otherwise fetch,
/// falling back to any cached record (even expired) when the network fails.
pub async fn cache_first(
    ctx: &WorkerContext,
    request: &Request,
    store: &str,
    max_age: Duration,
) -> Result<Response, FetchError> {
    let cached = ctx.storage.match_in(store, request).await;

    if let Some(hit) = &cached {
        if hit.is_fresh(max_age, SystemTime::now()) {
            debug!(store = store, url = %request.url, "cache-first: fresh hit");
            return Ok(hit.clone());
        }
        debug!(store = store, url = %request.url, "cache-first: expired, revalidating");
    }

    match ctx.fetcher.fetch(request).await {
        Ok(response) => {
            store_then_serve(ctx, store, request, &response).await;
            Ok(response)
        }
        Err(e) if e.is_network_failure() => match cached {
            Some(stale) => {
                warn!(store = store, url = %request.url, error = %e, "cache-first: network failed, serving stale copy");
                Ok(stale)
            }
            None => Err(FetchError::NotFound(request.url.to_string())),
        },
        Err(e) => Err(e),
    }
}

/// Always try the network first; the store is only a fallback.
///
/// `max_age` does not gate anything here: staleness never stops a network attempt.
pub async fn network_first(
    ctx: &WorkerContext,
    request: &Request,
    store: &str,
    _max_age: Duration,
) -> Result<Response, FetchError> {
    match ctx.fetcher.fetch(request).await {
        Ok(response) => {
            store_then_serve(ctx, store, request, &response).await;
            Ok(response)
        }
        Err(e) if e.is_network_failure() => match ctx.storage.match_in(store, request).await {
            Some(cached) => {
                warn!(store = store, url = %request.url, error = %e, "network-first: network failed, serving cached copy");
                Ok(cached)
            }
            None => Err(FetchError::NotFound(request.url.to_string())),
        },
        Err(e) => Err(e),
    }
}

/// Default path for requests no strategy matched.
///
/// A core-store hit is returned at once while a background fetch refreshes it;
/// a miss waits on the network; if that fails too, the offline document is served.
pub async fn stale_while_revalidate(ctx: &WorkerContext, request: &Request) -> Response {
    let core = ctx.config.core_cache_name();

    if let Some(hit) = ctx.storage.match_in(&core, request).await {
        let bg = ctx.clone();
        let bg_request = request.clone();
        ctx.background.spawn(async move {
            revalidate(&bg, &bg_request).await;
        });
        return hit;
    }

    match ctx.fetcher.fetch(request).await {
        Ok(response) => {
            if is_basic(ctx, request) {
                store_then_serve(ctx, &core, request, &response).await;
            }
            response
        }
        Err(e) => {
            warn!(url = %request.url, error = %e, "Network failed with nothing cached, serving offline page");
            offline_fallback(ctx).await
        }
    }
}

/// Background refresh of a core-store entry
async fn revalidate(ctx: &WorkerContext, request: &Request) {
    match ctx.fetcher.fetch(request).await {
        Ok(response) if is_basic(ctx, request) => {
            let core = ctx.config.core_cache_name();
            store_then_serve(ctx, &core, request, &response).await;
        }
        Ok(_) => {}
        Err(e) => debug!(url = %request.url, error = %e, "Background revalidation failed"),
    }
}

/// The designated offline document, or a synthesized 503 if it was never cached
pub async fn offline_fallback(ctx: &WorkerContext) -> Response {
    let offline = match ctx.config.offline_url() {
        Ok(url) => Request::get(url),
        Err(e) => {
            warn!(error = %e, "Offline path does not resolve");
            return Response::service_unavailable();
        }
    };

    let core = ctx.config.core_cache_name();
    let cached = match ctx.storage.match_in(&core, &offline).await {
        Some(hit) => Some(hit),
        None => ctx.storage.match_any(&offline).await,
    };

    match cached {
        Some(page) => {
            info!(url = %offline.url, "Serving offline fallback");
            page.with_source(ResponseSource::Offline)
        }
        None => {
            warn!(url = %offline.url, "Offline page not cached, synthesizing 503");
            Response::service_unavailable()
        }
    }
}

/// Same-origin responses are the only ones the default path keeps
fn is_basic(ctx: &WorkerContext, request: &Request) -> bool {
    request.is_same_origin(&ctx.config.origin)
}

/// Store a stamped clone of a cacheable response. A failed store write never
/// costs the caller the response.
async fn store_then_serve(ctx: &WorkerContext, store: &str, request: &Request, response: &Response) {
    if !response.is_cacheable() {
        debug!(url = %request.url, status = response.status, "Not caching non-200 response");
        return;
    }
    if ctx.is_retired() && store == ctx.config.core_cache_name() {
        debug!(store = store, url = %request.url, "Generation is redundant, not storing");
        return;
    }
    let copy = response.stamped(SystemTime::now());
    if let Err(e) = ctx.storage.put(store, request, copy).await {
        warn!(store = store, url = %request.url, error = %e, "Failed to store response");
    }
}
