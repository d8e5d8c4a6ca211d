//! Versioned cache namespace naming.

use std::fmt;

/// A logical cache name tagged with a deployment version.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheNamespace {
  logical: String,
  version: String,
}

impl CacheNamespace {
  pub fn new(logical: impl Into<String>, version: impl Into<String>) -> Self {
    Self {
      logical: logical.into(),
      version: version.into(),
    }
  }

  /// Storage identifier, e.g. `app-assets-v2`.
  pub fn id(&self) -> String {
    self.to_string()
  }
}

impl fmt::Display for CacheNamespace {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}-{}", self.logical, self.version)
  }
}

/// The two namespaces that are current for a deployment.
///
/// A version bump yields new identifiers; anything else found in storage is
/// stale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheRegistry {
  assets: CacheNamespace,
  cdn: CacheNamespace,
}

impl CacheRegistry {
  pub fn new(assets_name: &str, cdn_name: &str, version: &str) -> Self {
    Self {
      assets: CacheNamespace::new(assets_name, version),
      cdn: CacheNamespace::new(cdn_name, version),
    }
  }

  /// First-party asset namespace.
  pub fn assets(&self) -> &CacheNamespace {
    &self.assets
  }

  /// Trusted third-party namespace.
  pub fn cdn(&self) -> &CacheNamespace {
    &self.cdn
  }

  pub fn is_current(&self, namespace: &str) -> bool {
    namespace == self.assets.id() || namespace == self.cdn.id()
  }

  /// Namespaces present in storage that must be deleted.
  pub fn stale<'a>(&self, existing: &'a [String]) -> Vec<&'a str> {
    existing
      .iter()
      .map(String::as_str)
      .filter(|name| !self.is_current(name))
      .collect()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_namespace_id() {
    let registry = CacheRegistry::new("app-assets", "app-cdn", "v2");
    assert_eq!(registry.assets().id(), "app-assets-v2");
    assert_eq!(registry.cdn().id(), "app-cdn-v2");
  }

  #[test]
  fn test_stale_excludes_current() {
    let registry = CacheRegistry::new("app-assets", "app-cdn", "v2");
    let existing = vec![
      "app-assets-v1".to_string(),
      "app-assets-v2".to_string(),
      "app-cdn-v1".to_string(),
      "app-cdn-v2".to_string(),
      "unrelated".to_string(),
    ];
    assert_eq!(
      registry.stale(&existing),
      vec!["app-assets-v1", "app-cdn-v1", "unrelated"]
    );
  }

  #[test]
  fn test_stale_empty_storage() {
    let registry = CacheRegistry::new("app-assets", "app-cdn", "v2");
    assert!(registry.stale(&[]).is_empty());
  }
}
