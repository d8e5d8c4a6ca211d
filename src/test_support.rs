//! Fakes shared by unit tests.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::cache::{CacheStorage, CachedResponse};
use crate::http::{Request, RequestKey, Response};
use crate::network::Network;

/// Scripted network: known URLs answer, everything else fails as if offline.
#[derive(Default)]
pub struct FakeNetwork {
  routes: Mutex<HashMap<String, Response>>,
  calls: Mutex<Vec<String>>,
  delay: Option<Duration>,
  offline: AtomicBool,
}

impl FakeNetwork {
  pub fn new() -> Self {
    Self::default()
  }

  /// Every fetch sleeps this long before answering.
  pub fn with_delay(mut self, delay: Duration) -> Self {
    self.delay = Some(delay);
    self
  }

  pub fn respond(&self, url: &str, response: Response) {
    self
      .routes
      .lock()
      .unwrap()
      .insert(url.to_string(), response);
  }

  pub fn set_offline(&self, offline: bool) {
    self.offline.store(offline, Ordering::SeqCst);
  }

  pub fn calls(&self) -> Vec<String> {
    self.calls.lock().unwrap().clone()
  }

  pub fn call_count(&self, url: &str) -> usize {
    self.calls().iter().filter(|u| u.as_str() == url).count()
  }
}

#[async_trait]
impl Network for FakeNetwork {
  async fn fetch(&self, request: &Request) -> Result<Response> {
    self.calls.lock().unwrap().push(request.url.to_string());
    if let Some(delay) = self.delay {
      tokio::time::sleep(delay).await;
    }
    if self.offline.load(Ordering::SeqCst) {
      return Err(eyre!("offline"));
    }
    let routes = self.routes.lock().unwrap();
    routes
      .get(request.url.as_str())
      .cloned()
      .ok_or_else(|| eyre!("no route to {}", request.url))
  }
}

/// Storage whose every operation fails.
pub struct FailingStorage;

impl CacheStorage for FailingStorage {
  fn open(&self, _namespace: &str) -> Result<()> {
    Err(eyre!("disk full"))
  }

  fn keys(&self) -> Result<Vec<String>> {
    Err(eyre!("disk full"))
  }

  fn delete(&self, _namespace: &str) -> Result<bool> {
    Err(eyre!("disk full"))
  }

  fn match_entry(&self, _namespace: &str, _key: &RequestKey) -> Result<Option<CachedResponse>> {
    Err(eyre!("disk full"))
  }

  fn put(&self, _namespace: &str, _key: &RequestKey, _response: Response) -> Result<()> {
    Err(eyre!("disk full"))
  }

  fn entry_count(&self, _namespace: &str) -> Result<usize> {
    Err(eyre!("disk full"))
  }
}

pub fn ok(body: &str) -> Response {
  Response::new(200, body)
}
