//! Responses annotated with where they came from.

use chrono::{DateTime, Utc};

use super::storage::CachedResponse;
use crate::http::Response;

/// A response handed back to the page, including metadata about the source.
#[derive(Debug, Clone)]
pub struct Served {
  /// The actual response
  pub response: Response,
  /// Where the response came from
  pub source: ResponseSource,
  /// When the response was cached (if from cache)
  pub cached_at: Option<DateTime<Utc>>,
}

impl Served {
  /// Fresh response from the network.
  pub fn from_network(response: Response) -> Self {
    Self {
      response,
      source: ResponseSource::Network,
      cached_at: None,
    }
  }

  /// Stored copy of the requested resource.
  pub fn from_cache(cached: CachedResponse) -> Self {
    Self {
      response: cached.response,
      source: ResponseSource::Cache,
      cached_at: Some(cached.cached_at),
    }
  }

  /// Cached entry-point document served in place of a failed navigation.
  pub fn fallback(cached: CachedResponse) -> Self {
    Self {
      response: cached.response,
      source: ResponseSource::Fallback,
      cached_at: Some(cached.cached_at),
    }
  }

  /// Synthetic 503 when nothing else is available.
  pub fn offline() -> Self {
    Self {
      response: Response::offline(),
      source: ResponseSource::Synthetic,
      cached_at: None,
    }
  }
}

/// Indicates where a served response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseSource {
  Network,
  Cache,
  /// Offline navigation answered with the entry-point document
  Fallback,
  Synthetic,
}
