//! Network access used to fill and refresh the caches.

mod client;

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};

use crate::http::{Request, Response};

pub use client::HttpNetwork;

/// Anything that can perform a fetch.
///
/// An `Err` means the transport failed (offline, DNS, connection reset).
/// HTTP error statuses are returned as `Ok` responses; callers decide what a
/// non-ok status means for them.
#[async_trait]
pub trait Network: Send + Sync + 'static {
  async fn fetch(&self, request: &Request) -> Result<Response>;
}

/// A network that is never reachable.
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineNetwork;

#[async_trait]
impl Network for OfflineNetwork {
  async fn fetch(&self, request: &Request) -> Result<Response> {
    Err(eyre!("Network unavailable: {}", request.url))
  }
}
