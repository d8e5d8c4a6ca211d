//! Request interception policy.
//!
//! Only GET requests are intercepted. Same-origin requests use cache-first,
//! requests to a trusted third-party origin use stale-while-revalidate, and
//! everything else is left to the network.

mod revalidation;
mod strategies;

use std::sync::Arc;
use tracing::debug;

use crate::cache::{CacheLayer, CacheStorage, Served};
use crate::config::AgentConfig;
use crate::http::Request;
use crate::network::Network;

use revalidation::Revalidations;

/// URL schemes that are never intercepted.
const IGNORED_SCHEMES: &[&str] = &["chrome-extension", "blob"];

/// How a request is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
  CacheFirst,
  StaleWhileRevalidate,
  /// Not intercepted; the network handles it natively
  Passthrough,
}

pub struct Router<S: CacheStorage, N: Network> {
  config: Arc<AgentConfig>,
  cache: CacheLayer<S>,
  network: Arc<N>,
  revalidations: Revalidations,
}

impl<S: CacheStorage, N: Network> Router<S, N> {
  pub fn new(config: Arc<AgentConfig>, cache: CacheLayer<S>, network: Arc<N>) -> Self {
    Self {
      config,
      cache,
      network,
      revalidations: Revalidations::default(),
    }
  }

  pub fn route(&self, request: &Request) -> Route {
    if !request.is_get() {
      return Route::Passthrough;
    }
    // Checked before the origin: a blob: URL reports its creator's origin
    if IGNORED_SCHEMES.contains(&request.url.scheme()) {
      return Route::Passthrough;
    }

    if request.url.origin() == self.config.origin() {
      Route::CacheFirst
    } else if self.config.is_trusted(request.url.as_str()) {
      Route::StaleWhileRevalidate
    } else {
      Route::Passthrough
    }
  }

  /// Handle an intercepted request. Returns `None` when the request is not
  /// intercepted.
  pub async fn handle(&self, request: Request) -> Option<Served> {
    let route = self.route(&request);
    debug!(url = %request.url, ?route, "routing");

    match route {
      Route::CacheFirst => Some(
        strategies::cache_first(
          &self.cache,
          self.network.as_ref(),
          &self.config.fallback_document,
          &request,
        )
        .await,
      ),
      Route::StaleWhileRevalidate => Some(
        strategies::stale_while_revalidate(
          &self.cache,
          &self.network,
          &self.revalidations,
          request,
        )
        .await,
      ),
      Route::Passthrough => None,
    }
  }

  /// Wait for background revalidations to finish.
  pub async fn settle(&self) {
    self.revalidations.settle().await;
  }

  pub fn cache(&self) -> &CacheLayer<S> {
    &self.cache
  }

  pub fn revalidations(&self) -> &Revalidations {
    &self.revalidations
  }
}
