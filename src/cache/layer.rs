//! Cache layer that binds a storage backend to the current namespaces.

use color_eyre::Result;
use std::sync::Arc;

use super::registry::{CacheNamespace, CacheRegistry};
use super::storage::{CacheStorage, CachedResponse};
use crate::http::{RequestKey, Response};

/// Shared handle over the storage backend.
///
/// Cloning is cheap; every clone talks to the same storage.
pub struct CacheLayer<S: CacheStorage> {
  storage: Arc<S>,
  registry: CacheRegistry,
}

impl<S: CacheStorage> CacheLayer<S> {
  pub fn new(storage: S, registry: CacheRegistry) -> Self {
    Self::from_shared(Arc::new(storage), registry)
  }

  pub fn from_shared(storage: Arc<S>, registry: CacheRegistry) -> Self {
    Self { storage, registry }
  }

  pub fn registry(&self) -> &CacheRegistry {
    &self.registry
  }

  pub fn storage(&self) -> &S {
    &self.storage
  }

  pub fn open(&self, namespace: &CacheNamespace) -> Result<()> {
    self.storage.open(&namespace.id())
  }

  pub fn lookup(&self, namespace: &CacheNamespace, key: &RequestKey) -> Result<Option<CachedResponse>> {
    self.storage.match_entry(&namespace.id(), key)
  }

  /// Store a response. Callers pass a duplicate and keep the original.
  pub fn store(&self, namespace: &CacheNamespace, key: &RequestKey, response: Response) -> Result<()> {
    self.storage.put(&namespace.id(), key, response)
  }

  /// Every namespace currently in storage.
  pub fn namespaces(&self) -> Result<Vec<String>> {
    self.storage.keys()
  }

  /// Delete every namespace that is not current. Returns the deleted names.
  pub fn purge_stale(&self) -> Result<Vec<String>> {
    let existing = self.storage.keys()?;
    let mut deleted = Vec::new();
    for name in self.registry.stale(&existing) {
      if self.storage.delete(name)? {
        deleted.push(name.to_string());
      }
    }
    Ok(deleted)
  }
}

impl<S: CacheStorage> Clone for CacheLayer<S> {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
      registry: self.registry.clone(),
    }
  }
}
