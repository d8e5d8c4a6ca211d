//! Install and activation of a deployment.
//!
//! Install pre-populates the first-party namespace from the asset manifest,
//! activation purges namespaces left behind by earlier versions and takes
//! control of already-open clients.

use color_eyre::{eyre::eyre, Result};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};
use url::Url;

use crate::cache::{CacheLayer, CacheNamespace, CacheStorage};
use crate::config::AgentConfig;
use crate::http::Request;
use crate::network::Network;

/// Lifecycle phase of the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
  /// Created, nothing run yet
  Parsed,
  Installing,
  /// Installed and, unless skip-waiting was signalled, waiting
  Installed,
  Activating,
  Activated,
  /// A phase failed on storage; the agent must not be used
  Redundant,
}

/// Control-plane messages posted by the page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlMessage {
  SkipWaiting,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InstallReport {
  pub namespace: String,
  pub cached: Vec<String>,
  pub skipped: Vec<SkippedAsset>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedAsset {
  pub url: String,
  pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ActivateReport {
  pub deleted: Vec<String>,
  pub claimed: bool,
}

enum AssetOutcome {
  Cached(Url),
  Skipped(SkippedAsset),
}

pub struct LifecycleController<S: CacheStorage, N: Network> {
  config: Arc<AgentConfig>,
  cache: CacheLayer<S>,
  network: Arc<N>,
  phase: Mutex<Phase>,
  skip_waiting: AtomicBool,
  clients_claimed: AtomicBool,
}

impl<S: CacheStorage, N: Network> LifecycleController<S, N> {
  pub fn new(config: Arc<AgentConfig>, cache: CacheLayer<S>, network: Arc<N>) -> Self {
    Self {
      config,
      cache,
      network,
      phase: Mutex::new(Phase::Parsed),
      skip_waiting: AtomicBool::new(false),
      clients_claimed: AtomicBool::new(false),
    }
  }

  pub fn phase(&self) -> Result<Phase> {
    let phase = self.phase.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(*phase)
  }

  fn set_phase(&self, next: Phase) -> Result<()> {
    let mut phase = self.phase.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;
    debug!(from = ?*phase, to = ?next, "lifecycle transition");
    *phase = next;
    Ok(())
  }

  /// Move to `next` if the current phase is one of `allowed`.
  fn begin(&self, next: Phase, allowed: &[Phase]) -> Result<()> {
    let mut phase = self.phase.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;
    if !allowed.contains(&*phase) {
      return Err(eyre!("Cannot enter {:?} from {:?}", next, *phase));
    }
    debug!(from = ?*phase, to = ?next, "lifecycle transition");
    *phase = next;
    Ok(())
  }

  /// Pre-populate the first-party namespace.
  ///
  /// Every manifest asset is fetched concurrently and settles on its own: a
  /// network error or non-ok status skips that asset only. Storage errors are
  /// fatal and are reported once every asset has settled.
  ///
  /// An active agent refreshes its manifest in place: the phase stays
  /// `Activated` and clients stay controlled, even if the refresh fails.
  pub async fn install(&self) -> Result<InstallReport> {
    if self.begin_install()? == Phase::Activated {
      info!(namespace = %self.cache.registry().assets(), "refreshing installed assets");
      let report = self.precache().await?;
      info!(
        cached = report.cached.len(),
        skipped = report.skipped.len(),
        "refresh complete"
      );
      return Ok(report);
    }
    info!(namespace = %self.cache.registry().assets(), "installing");

    match self.precache().await {
      Ok(report) => {
        self.set_phase(Phase::Installed)?;
        info!(
          cached = report.cached.len(),
          skipped = report.skipped.len(),
          "install complete"
        );
        // Do not wait for existing clients to close
        self.skip_waiting();
        Ok(report)
      }
      Err(e) => {
        self.set_phase(Phase::Redundant)?;
        Err(e)
      }
    }
  }

  /// Enter `Installing`, or stay `Activated` for an in-place refresh.
  /// Returns the phase install started from.
  fn begin_install(&self) -> Result<Phase> {
    let mut phase = self.phase.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;
    let from = *phase;
    match from {
      Phase::Activated => {}
      Phase::Parsed | Phase::Installed => {
        debug!(?from, to = ?Phase::Installing, "lifecycle transition");
        *phase = Phase::Installing;
      }
      _ => return Err(eyre!("Cannot enter {:?} from {:?}", Phase::Installing, from)),
    }
    Ok(from)
  }

  async fn precache(&self) -> Result<InstallReport> {
    let namespace = self.cache.registry().assets().clone();
    self.cache.open(&namespace)?;

    let outcomes = join_all(
      self
        .config
        .manifest
        .iter()
        .map(|url| self.precache_asset(&namespace, url)),
    )
    .await;

    let mut report = InstallReport {
      namespace: namespace.id(),
      ..Default::default()
    };
    for outcome in outcomes {
      match outcome? {
        AssetOutcome::Cached(url) => report.cached.push(url.to_string()),
        AssetOutcome::Skipped(skipped) => report.skipped.push(skipped),
      }
    }
    Ok(report)
  }

  async fn precache_asset(&self, namespace: &CacheNamespace, url: &Url) -> Result<AssetOutcome> {
    let request = Request::get(url.clone());
    match self.network.fetch(&request).await {
      Ok(response) if response.is_ok() => {
        self.cache.store(namespace, &request.cache_key(), response)?;
        debug!(%url, "precached");
        Ok(AssetOutcome::Cached(url.clone()))
      }
      Ok(response) => {
        debug!(%url, status = response.status, "precache skipped");
        Ok(AssetOutcome::Skipped(SkippedAsset {
          url: url.to_string(),
          reason: format!("HTTP {}", response.status),
        }))
      }
      Err(e) => {
        debug!(%url, error = %e, "precache skipped");
        Ok(AssetOutcome::Skipped(SkippedAsset {
          url: url.to_string(),
          reason: e.to_string(),
        }))
      }
    }
  }

  /// Delete stale namespaces, then take control of open clients.
  ///
  /// Allowed from `Parsed` too, so a fresh process can finish a deployment
  /// installed by an earlier one.
  pub fn activate(&self) -> Result<ActivateReport> {
    self.begin(
      Phase::Activating,
      &[Phase::Parsed, Phase::Installed, Phase::Activated],
    )?;

    let deleted = match self.cache.purge_stale() {
      Ok(deleted) => deleted,
      Err(e) => {
        self.set_phase(Phase::Redundant)?;
        return Err(e);
      }
    };
    for name in &deleted {
      info!(namespace = %name, "deleted stale cache");
    }

    self.claim_clients();
    self.set_phase(Phase::Activated)?;
    info!("activated");

    Ok(ActivateReport {
      deleted,
      claimed: true,
    })
  }

  /// Adopt a deployment whose caches already exist in storage.
  ///
  /// Returns true if the current first-party namespace was found and the
  /// agent is now active.
  pub fn resume(&self) -> Result<bool> {
    let current = self.cache.registry().assets().id();
    if !self.cache.namespaces()?.contains(&current) {
      return Ok(false);
    }
    self.begin(Phase::Activated, &[Phase::Parsed])?;
    self.claim_clients();
    Ok(true)
  }

  /// Let an installed agent activate without waiting for clients to close.
  pub fn skip_waiting(&self) {
    if !self.skip_waiting.swap(true, Ordering::SeqCst) {
      debug!("skip waiting");
    }
  }

  /// Installed but held back until skip-waiting is signalled.
  pub fn is_waiting(&self) -> Result<bool> {
    Ok(self.phase()? == Phase::Installed && !self.skip_waiting.load(Ordering::SeqCst))
  }

  /// Installed and allowed to activate right away.
  pub fn ready_to_activate(&self) -> Result<bool> {
    Ok(self.phase()? == Phase::Installed && self.skip_waiting.load(Ordering::SeqCst))
  }

  fn claim_clients(&self) {
    self.clients_claimed.store(true, Ordering::SeqCst);
  }

  /// Whether open clients are routed through this agent.
  pub fn controls_clients(&self) -> Result<bool> {
    Ok(self.phase()? == Phase::Activated && self.clients_claimed.load(Ordering::SeqCst))
  }

  /// Handle a message posted by the page. Unknown messages are ignored.
  pub fn handle_message(&self, data: &serde_json::Value) -> Option<ControlMessage> {
    match serde_json::from_value::<ControlMessage>(data.clone()) {
      Ok(ControlMessage::SkipWaiting) => {
        self.skip_waiting();
        Some(ControlMessage::SkipWaiting)
      }
      Err(_) => {
        debug!(message = %data, "ignoring unknown message");
        None
      }
    }
  }
}
