//! Network substrate: request/response model and the fetcher the worker goes through

pub mod client;
pub mod errors;
#[cfg(test)]
pub mod fake;
pub mod types;

pub use client::{ErrorEntry, Fetcher, HttpFetcher, DEFAULT_REQUEST_TIMEOUT};
pub use errors::FetchError;
pub use types::*;
