//! Fetch strategies.
//!
//! Both strategies always end in a concrete response: storage errors degrade
//! to a miss or a skipped store, network errors to a fallback or a synthetic
//! 503.

use std::sync::Arc;
use tracing::{debug, warn};
use url::Url;

use super::revalidation::Revalidations;
use crate::cache::{CacheLayer, CacheNamespace, CacheStorage, CachedResponse, Served};
use crate::http::{Request, RequestKey, Response};
use crate::network::Network;

/// First-party assets: serve from cache, fall back to the network.
///
/// A cache hit never touches the network. A miss is fetched and, if ok,
/// stored before it is returned. When the network fails a navigation gets
/// the cached entry-point document and everything else a 503.
pub(super) async fn cache_first<S: CacheStorage, N: Network>(
  cache: &CacheLayer<S>,
  network: &N,
  fallback_document: &Url,
  request: &Request,
) -> Served {
  let namespace = cache.registry().assets();
  let key = request.cache_key();

  if let Some(cached) = lookup(cache, namespace, &key) {
    debug!(url = %request.url, "cache hit");
    return Served::from_cache(cached);
  }
  debug!(url = %request.url, "cache miss");

  match network.fetch(request).await {
    Ok(response) => {
      if response.is_ok() {
        store(cache, namespace, &key, response.duplicate());
      }
      Served::from_network(response)
    }
    Err(e) => {
      debug!(url = %request.url, error = %e, "network failed");
      if request.is_navigation() {
        if let Some(document) = lookup(cache, namespace, &RequestKey::get(fallback_document)) {
          return Served::fallback(document);
        }
      }
      Served::offline()
    }
  }
}

/// Trusted third-party assets: serve the cached copy at once and refresh it
/// in the background.
///
/// Without a cached copy the caller waits for the network. A cached copy is
/// returned even if the network would answer first; the refreshed entry is
/// only seen by the next request.
pub(super) async fn stale_while_revalidate<S: CacheStorage, N: Network>(
  cache: &CacheLayer<S>,
  network: &Arc<N>,
  revalidations: &Revalidations,
  request: Request,
) -> Served {
  let namespace = cache.registry().cdn().clone();
  let key = request.cache_key();
  let cached = lookup(cache, &namespace, &key);

  let refresh = {
    let cache = cache.clone();
    let network = Arc::clone(network);
    let key = key.clone();
    tokio::spawn(async move {
      match network.fetch(&request).await {
        Ok(response) => {
          if response.is_ok() {
            store(&cache, &namespace, &key, response.duplicate());
          }
          Some(response)
        }
        Err(e) => {
          debug!(url = %request.url, error = %e, "revalidation failed");
          None
        }
      }
    })
  };

  if let Some(cached) = cached {
    debug!(url = %key.url, "serving cached copy while revalidating");
    revalidations.track(refresh);
    return Served::from_cache(cached);
  }

  match refresh.await {
    Ok(Some(response)) => Served::from_network(response),
    Ok(None) => Served::offline(),
    Err(e) => {
      warn!(url = %key.url, error = %e, "revalidation task failed");
      Served::offline()
    }
  }
}

fn lookup<S: CacheStorage>(
  cache: &CacheLayer<S>,
  namespace: &CacheNamespace,
  key: &RequestKey,
) -> Option<CachedResponse> {
  match cache.lookup(namespace, key) {
    Ok(cached) => cached,
    Err(e) => {
      warn!(namespace = %namespace, url = %key.url, error = %e, "cache lookup failed");
      None
    }
  }
}

fn store<S: CacheStorage>(
  cache: &CacheLayer<S>,
  namespace: &CacheNamespace,
  key: &RequestKey,
  response: Response,
) {
  if let Err(e) = cache.store(namespace, key, response) {
    warn!(namespace = %namespace, url = %key.url, error = %e, "cache store failed");
  }
}
