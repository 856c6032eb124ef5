//! Request and response types
//!
//! Defines the request descriptor the worker intercepts and the response record
//! shared by the network layer and the cache stores.

use bytes::Bytes;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use url::Url;

use super::errors::FetchError;

/// Header carrying the insertion time (Unix seconds) of a cached response
pub const CACHED_AT_HEADER: &str = "x-sw-cached-at";

/// How a fetch treats intermediate HTTP caches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FetchMode {
    /// Normal fetch
    #[default]
    Default,
    /// Force a reload, bypassing any HTTP-level cache on the way
    Reload,
}

/// An outbound request seen by the worker
#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    pub url: Url,
    pub mode: FetchMode,
}

impl Request {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            mode: FetchMode::Default,
        }
    }

    /// A plain GET request
    pub fn get(url: Url) -> Self {
        Self::new(Method::GET, url)
    }

    /// Parse a method name and an absolute URL
    pub fn parse(method: &str, url: &str) -> Result<Self, FetchError> {
        let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes())
            .map_err(|e| FetchError::InvalidUrl(format!("bad method '{}': {}", method, e)))?;
        let url = Url::parse(url)?;
        Ok(Self::new(method, url))
    }

    pub fn with_mode(mut self, mode: FetchMode) -> Self {
        self.mode = mode;
        self
    }

    /// Only GET requests over http(s) are handled by the caching layer
    pub fn is_interceptable(&self) -> bool {
        self.method == Method::GET && matches!(self.url.scheme(), "http" | "https")
    }

    /// Key under which this request's response is stored
    ///
    /// Fragments never reach the network, so they are not part of the key.
    pub fn cache_key(&self) -> String {
        let mut url = self.url.clone();
        url.set_fragment(None);
        format!("{} {}", self.method, url)
    }

    /// Whether this request targets the same origin as `scope`
    pub fn is_same_origin(&self, scope: &Url) -> bool {
        self.url.origin() == scope.origin()
    }
}

/// Where a response handed back to the client came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ResponseSource {
    Network,
    Cache,
    Offline,
}

/// A response, either fresh from the network or read back from a store
///
/// The body is reference counted, so cloning a response yields an independent
/// reader over the same bytes.
#[derive(Debug, Clone)]
pub struct Response {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
    pub source: ResponseSource,
}

impl Response {
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
            source: ResponseSource::Network,
        }
    }

    /// Synthesized answer for when neither cache nor network can serve
    pub fn service_unavailable() -> Self {
        Self::new(503, "Service Unavailable: offline and no cached copy")
            .with_header("content-type", "text/plain; charset=utf-8")
            .with_source(ResponseSource::Offline)
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.set_header(name, value);
        self
    }

    pub fn with_source(mut self, source: ResponseSource) -> Self {
        self.source = source;
        self
    }

    /// Look up a header value (case-insensitive)
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Replace any existing values of a header
    pub fn set_header(&mut self, name: &str, value: &str) {
        self.headers.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
        self.headers.push((name.to_string(), value.to_string()));
    }

    /// Only complete 200 responses are worth storing
    pub fn is_cacheable(&self) -> bool {
        self.status == 200
    }

    /// Copy of this response stamped with its insertion time, ready to store
    pub fn stamped(&self, now: SystemTime) -> Self {
        let secs = now
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        let mut copy = self.clone();
        copy.set_header(CACHED_AT_HEADER, &secs.to_string());
        copy.source = ResponseSource::Cache;
        copy
    }

    /// Insertion time recorded in the timestamp header
    pub fn cached_at(&self) -> Option<SystemTime> {
        let secs = self.header(CACHED_AT_HEADER)?.trim().parse::<u64>().ok()?;
        Some(UNIX_EPOCH + Duration::from_secs(secs))
    }

    /// Age of a cached record; `None` when it carries no usable timestamp
    pub fn age(&self, now: SystemTime) -> Option<Duration> {
        let cached_at = self.cached_at()?;
        Some(now.duration_since(cached_at).unwrap_or_default())
    }

    /// A record without a timestamp is treated as infinitely old
    pub fn is_fresh(&self, max_age: Duration, now: SystemTime) -> bool {
        self.age(now).map(|age| age < max_age).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_interceptable_requests() {
        assert!(Request::get(url("https://blog.example.com/")).is_interceptable());
        assert!(Request::get(url("http://blog.example.com/a.css")).is_interceptable());
        assert!(!Request::new(Method::POST, url("https://blog.example.com/api/")).is_interceptable());
        assert!(!Request::get(url("chrome-extension://abc/script.js")).is_interceptable());
        assert!(!Request::get(url("data:text/plain,hello")).is_interceptable());
    }

    #[test]
    fn test_cache_key_drops_fragment() {
        let a = Request::get(url("https://blog.example.com/post/#comments"));
        let b = Request::get(url("https://blog.example.com/post/"));
        assert_eq!(a.cache_key(), b.cache_key());
        assert_eq!(b.cache_key(), "GET https://blog.example.com/post/");
    }

    #[test]
    fn test_parse_request() {
        let req = Request::parse("get", "https://blog.example.com/tags/").unwrap();
        assert_eq!(req.method, Method::GET);
        assert_eq!(req.url.path(), "/tags/");
        assert!(Request::parse("GET", "not a url").is_err());
    }

    #[test]
    fn test_freshness_from_timestamp_header() {
        let now = SystemTime::now();
        let stored = Response::new(200, "body").stamped(now - Duration::from_secs(120));

        assert_eq!(stored.source, ResponseSource::Cache);
        assert!(stored.is_fresh(Duration::from_secs(300), now));
        assert!(!stored.is_fresh(Duration::from_secs(60), now));

        let unstamped = Response::new(200, "body");
        assert!(unstamped.age(now).is_none());
        assert!(!unstamped.is_fresh(Duration::from_secs(3600), now));
    }

    #[test]
    fn test_set_header_replaces_case_insensitively() {
        let mut resp = Response::new(200, "").with_header("Content-Type", "text/html");
        resp.set_header("content-type", "text/css");
        assert_eq!(resp.headers.len(), 1);
        assert_eq!(resp.header("CONTENT-TYPE"), Some("text/css"));
    }
}
