//! Injected fetch capability used by the prefetcher.
//!
//! The engine never talks to the network itself. Timeouts and retries are
//! the fetcher's business.

use std::collections::BTreeMap;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

use crate::cache::entry::CachedResponse;

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Request for {resource} failed with status {status}")]
    Status { resource: String, status: u16 },

    #[error("Transport error fetching {resource}: {reason}")]
    Transport { resource: String, reason: String },
}

/// A successful response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchResponse {
    pub body: Bytes,
    pub headers: BTreeMap<String, String>,
}

impl From<FetchResponse> for CachedResponse {
    fn from(response: FetchResponse) -> Self {
        CachedResponse {
            headers: response.headers,
            body: response.body.to_vec(),
        }
    }
}

#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, resource: &str) -> Result<FetchResponse, FetchError>;
}
