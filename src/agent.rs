//! Adapter between platform events and the caching policy.
//!
//! The agent owns the lifecycle controller and the router and is the only
//! piece that knows in which order events are allowed to reach them.

use color_eyre::Result;
use std::sync::Arc;
use tracing::{debug, info};

use crate::cache::{CacheLayer, CacheStorage, Served};
use crate::config::AgentConfig;
use crate::http::Request;
use crate::lifecycle::{ActivateReport, ControlMessage, InstallReport, LifecycleController};
use crate::network::Network;
use crate::router::Router;

/// Platform events consumed by the agent.
#[derive(Debug, Clone)]
pub enum Event {
  Install,
  Activate,
  Fetch(Request),
  Message(serde_json::Value),
}

/// What handling an event produced.
#[derive(Debug)]
pub enum EventOutcome {
  Installed {
    report: InstallReport,
    /// Present when the agent activated right after installing
    activation: Option<ActivateReport>,
  },
  Activated(ActivateReport),
  Fetched {
    url: String,
    /// `None` when the request was left to the network
    served: Option<Served>,
  },
  Message {
    message: Option<ControlMessage>,
    activation: Option<ActivateReport>,
  },
}

pub struct Agent<S: CacheStorage, N: Network> {
  lifecycle: LifecycleController<S, N>,
  router: Router<S, N>,
}

impl<S: CacheStorage, N: Network> Agent<S, N> {
  pub fn new(config: AgentConfig, storage: S, network: N) -> Self {
    let config = Arc::new(config);
    let cache = CacheLayer::new(storage, config.registry.clone());
    let network = Arc::new(network);

    Self {
      lifecycle: LifecycleController::new(Arc::clone(&config), cache.clone(), Arc::clone(&network)),
      router: Router::new(config, cache, network),
    }
  }

  pub fn lifecycle(&self) -> &LifecycleController<S, N> {
    &self.lifecycle
  }

  pub fn router(&self) -> &Router<S, N> {
    &self.router
  }

  pub async fn dispatch(&self, event: Event) -> Result<EventOutcome> {
    match event {
      Event::Install => {
        let (report, activation) = self.on_install().await?;
        Ok(EventOutcome::Installed { report, activation })
      }
      Event::Activate => Ok(EventOutcome::Activated(self.on_activate()?)),
      Event::Fetch(request) => {
        let url = request.url.to_string();
        let served = self.on_fetch(request).await;
        Ok(EventOutcome::Fetched { url, served })
      }
      Event::Message(data) => {
        let (message, activation) = self.on_message(&data)?;
        Ok(EventOutcome::Message {
          message,
          activation,
        })
      }
    }
  }

  /// Install, then activate at once if skip-waiting is set.
  pub async fn on_install(&self) -> Result<(InstallReport, Option<ActivateReport>)> {
    let report = self.lifecycle.install().await?;
    let activation = self.activate_if_ready()?;
    Ok((report, activation))
  }

  pub fn on_activate(&self) -> Result<ActivateReport> {
    self.lifecycle.activate()
  }

  /// Route a request through the policy once the agent controls clients.
  pub async fn on_fetch(&self, request: Request) -> Option<Served> {
    match self.lifecycle.controls_clients() {
      Ok(true) => self.router.handle(request).await,
      Ok(false) => {
        debug!(url = %request.url, "not controlling clients, passing through");
        None
      }
      Err(e) => {
        debug!(url = %request.url, error = %e, "lifecycle unavailable, passing through");
        None
      }
    }
  }

  /// Apply a page message; a skip-waiting signal activates a waiting agent.
  pub fn on_message(
    &self,
    data: &serde_json::Value,
  ) -> Result<(Option<ControlMessage>, Option<ActivateReport>)> {
    let message = self.lifecycle.handle_message(data);
    let activation = match message {
      Some(ControlMessage::SkipWaiting) => self.activate_if_ready()?,
      None => None,
    };
    Ok((message, activation))
  }

  fn activate_if_ready(&self) -> Result<Option<ActivateReport>> {
    if self.lifecycle.ready_to_activate()? {
      info!("activating without waiting for clients");
      return Ok(Some(self.lifecycle.activate()?));
    }
    if self.lifecycle.is_waiting()? {
      info!("installed, waiting for skip-waiting");
    }
    Ok(None)
  }

  /// Adopt caches installed by an earlier run of the same version.
  pub fn resume(&self) -> Result<bool> {
    self.lifecycle.resume()
  }

  /// Wait for background work started by fetches.
  pub async fn settle(&self) {
    debug!(pending = self.router.revalidations().pending(), "settling");
    self.router.settle().await;
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{MemoryStorage, ResponseSource, SqliteStorage};
  use crate::http::{RequestKey, RequestMode};
  use crate::lifecycle::Phase;
  use crate::network::OfflineNetwork;
  use crate::test_support::{ok, FakeNetwork};
  use serde_json::json;

  const SCRIPT: &str = "https://app.test/sw.js";

  fn network() -> FakeNetwork {
    let network = FakeNetwork::new();
    network.respond("https://app.test/", ok("root"));
    network.respond("https://app.test/index.html", ok("index"));
    network.respond("https://app.test/sw.js", ok("script"));
    network.respond("https://app.test/icons/icon-192x192.png", ok("small"));
    network.respond("https://app.test/icons/icon-512x512.png", ok("large"));
    network
  }

  fn agent() -> Agent<MemoryStorage, FakeNetwork> {
    Agent::new(
      AgentConfig::new(SCRIPT, "v2").unwrap(),
      MemoryStorage::new(),
      network(),
    )
  }

  #[tokio::test]
  async fn test_install_activates_immediately() {
    let agent = agent();

    let outcome = agent.dispatch(Event::Install).await.unwrap();

    match outcome {
      EventOutcome::Installed { report, activation } => {
        assert_eq!(report.cached.len(), 5);
        assert!(activation.unwrap().claimed);
      }
      other => panic!("unexpected outcome {:?}", other),
    }
    assert_eq!(agent.lifecycle().phase().unwrap(), Phase::Activated);
  }

  fn manifest_bodies(agent: &Agent<MemoryStorage, FakeNetwork>) -> Vec<Option<String>> {
    let cache = agent.router().cache();
    AgentConfig::new(SCRIPT, "v2")
      .unwrap()
      .manifest
      .iter()
      .map(|url| {
        cache
          .lookup(cache.registry().assets(), &RequestKey::get(url))
          .unwrap()
          .map(|c| c.response.text())
      })
      .collect()
  }

  #[tokio::test]
  async fn test_install_twice_keeps_same_contents() {
    let agent = agent();

    agent.dispatch(Event::Install).await.unwrap();
    let first = manifest_bodies(&agent);

    match agent.dispatch(Event::Install).await.unwrap() {
      EventOutcome::Installed { report, activation } => {
        assert_eq!(report.cached.len(), 5);
        assert!(activation.is_none());
      }
      other => panic!("unexpected outcome {:?}", other),
    }

    assert_eq!(manifest_bodies(&agent), first);
    assert!(first.iter().all(Option::is_some));
    assert_eq!(agent.lifecycle().phase().unwrap(), Phase::Activated);
    assert!(agent.lifecycle().controls_clients().unwrap());
  }

  #[tokio::test]
  async fn test_install_after_resume() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.db");
    let config = AgentConfig::new(SCRIPT, "v2").unwrap();

    let first = Agent::new(config.clone(), SqliteStorage::open(&path).unwrap(), network());
    first.dispatch(Event::Install).await.unwrap();
    drop(first);

    let second = Agent::new(config, SqliteStorage::open(&path).unwrap(), network());
    assert!(second.resume().unwrap());
    let (report, _) = second.on_install().await.unwrap();

    assert_eq!(report.cached.len(), 5);
    assert!(second.lifecycle().controls_clients().unwrap());
  }

  #[tokio::test]
  async fn test_fetch_before_activation_passes_through() {
    let agent = agent();
    let request = Request::parse("https://app.test/index.html").unwrap();

    match agent.dispatch(Event::Fetch(request)).await.unwrap() {
      EventOutcome::Fetched { url, served } => {
        assert_eq!(url, "https://app.test/index.html");
        assert!(served.is_none());
      }
      other => panic!("unexpected outcome {:?}", other),
    }
  }

  #[tokio::test]
  async fn test_fetch_after_install_served_from_cache() {
    let agent = agent();
    agent.dispatch(Event::Install).await.unwrap();

    let served = agent
      .on_fetch(Request::parse("https://app.test/index.html").unwrap())
      .await
      .unwrap();
    assert_eq!(served.source, ResponseSource::Cache);
    assert_eq!(served.response.text(), "index");
  }

  #[tokio::test]
  async fn test_skip_waiting_message_activates_waiting_agent() {
    let agent = agent();
    agent.lifecycle().install().await.unwrap();
    // Installed by the controller directly: the agent has not activated yet
    assert_eq!(agent.lifecycle().phase().unwrap(), Phase::Installed);

    let (message, activation) = agent.on_message(&json!({"type": "SKIP_WAITING"})).unwrap();

    assert_eq!(message, Some(ControlMessage::SkipWaiting));
    assert!(activation.is_some());
    assert_eq!(agent.lifecycle().phase().unwrap(), Phase::Activated);
  }

  #[tokio::test]
  async fn test_message_without_waiting_agent_is_noop() {
    let agent = agent();
    let (message, activation) = agent.on_message(&json!({"type": "SKIP_WAITING"})).unwrap();
    assert_eq!(message, Some(ControlMessage::SkipWaiting));
    assert!(activation.is_none());

    let (message, activation) = agent.on_message(&json!({"type": "REFRESH"})).unwrap();
    assert!(message.is_none());
    assert!(activation.is_none());
  }

  #[tokio::test]
  async fn test_resume_from_persistent_storage_while_offline() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.db");
    let config = AgentConfig::new(SCRIPT, "v2").unwrap();

    let first = Agent::new(config.clone(), SqliteStorage::open(&path).unwrap(), network());
    first.dispatch(Event::Install).await.unwrap();
    drop(first);

    let second = Agent::new(config, SqliteStorage::open(&path).unwrap(), OfflineNetwork);
    assert!(second.resume().unwrap());

    let served = second
      .on_fetch(
        Request::parse("https://app.test/deep/link")
          .unwrap()
          .with_mode(RequestMode::Navigate),
      )
      .await
      .unwrap();
    assert_eq!(served.source, ResponseSource::Fallback);
    assert_eq!(served.response.text(), "index");

    let served = second
      .on_fetch(Request::parse("https://app.test/data.json").unwrap())
      .await
      .unwrap();
    assert_eq!(served.response.status, 503);
  }

  #[tokio::test]
  async fn test_resume_without_install() {
    let agent = Agent::new(
      AgentConfig::new(SCRIPT, "v2").unwrap(),
      MemoryStorage::new(),
      OfflineNetwork,
    );
    assert!(!agent.resume().unwrap());
    assert!(agent
      .on_fetch(Request::parse("https://app.test/").unwrap())
      .await
      .is_none());
  }
}
