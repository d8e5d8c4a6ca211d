//! In-memory cache storage, used for ephemeral runs and tests.

use chrono::Utc;
use color_eyre::{eyre::eyre, Result};
use std::collections::HashMap;
use std::sync::Mutex;

use super::storage::{CacheStorage, CachedResponse};
use crate::http::{RequestKey, Response};

#[derive(Default)]
struct Namespaces {
  /// Creation order
  order: Vec<String>,
  entries: HashMap<String, HashMap<RequestKey, CachedResponse>>,
}

impl Namespaces {
  fn open(&mut self, namespace: &str) -> &mut HashMap<RequestKey, CachedResponse> {
    if !self.entries.contains_key(namespace) {
      self.order.push(namespace.to_string());
    }
    self.entries.entry(namespace.to_string()).or_default()
  }
}

/// Storage that lives only as long as the process.
#[derive(Default)]
pub struct MemoryStorage {
  inner: Mutex<Namespaces>,
}

impl MemoryStorage {
  pub fn new() -> Self {
    Self::default()
  }
}

impl CacheStorage for MemoryStorage {
  fn open(&self, namespace: &str) -> Result<()> {
    let mut inner = self.inner.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;
    inner.open(namespace);
    Ok(())
  }

  fn keys(&self) -> Result<Vec<String>> {
    let inner = self.inner.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(inner.order.clone())
  }

  fn delete(&self, namespace: &str) -> Result<bool> {
    let mut inner = self.inner.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;
    inner.order.retain(|name| name != namespace);
    Ok(inner.entries.remove(namespace).is_some())
  }

  fn match_entry(&self, namespace: &str, key: &RequestKey) -> Result<Option<CachedResponse>> {
    let inner = self.inner.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(
      inner
        .entries
        .get(namespace)
        .and_then(|entries| entries.get(key))
        .cloned(),
    )
  }

  fn put(&self, namespace: &str, key: &RequestKey, response: Response) -> Result<()> {
    let mut inner = self.inner.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;
    inner.open(namespace).insert(
      key.clone(),
      CachedResponse {
        response,
        cached_at: Utc::now(),
      },
    );
    Ok(())
  }

  fn entry_count(&self, namespace: &str) -> Result<usize> {
    let inner = self.inner.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(inner.entries.get(namespace).map_or(0, HashMap::len))
  }
}
