use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use url::{Origin, Url};

use crate::cache::{CacheRegistry, SqliteStorage};

/// Script/style CDNs and web-font hosts served with stale-while-revalidate.
pub const DEFAULT_TRUSTED_ORIGINS: &[&str] = &[
  "https://unpkg.com",
  "https://cdn.tailwindcss.com",
  "https://cdn.jsdelivr.net",
  "https://fonts.googleapis.com",
  "https://fonts.gstatic.com",
];

/// Icons pre-populated alongside the entry point and the agent script.
const DEFAULT_ICONS: &[&str] = &["icons/icon-192x192.png", "icons/icon-512x512.png"];

const DEFAULT_FALLBACK_DOCUMENT: &str = "index.html";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  /// URL the agent script was registered from; its directory is the base path
  pub script_url: String,
  /// Version tag baked into every cache namespace
  pub version: String,
  #[serde(default)]
  pub caches: CacheNames,
  /// Paths relative to the base path (defaults to entry point, script and icons)
  pub precache: Option<Vec<String>>,
  #[serde(default = "default_fallback_document")]
  pub fallback_document: String,
  #[serde(default = "default_trusted_origins")]
  pub trusted_origins: Vec<String>,
  #[serde(default)]
  pub storage: StorageConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct CacheNames {
  #[serde(default = "default_assets_name")]
  pub assets: String,
  #[serde(default = "default_cdn_name")]
  pub cdn: String,
}

impl Default for CacheNames {
  fn default() -> Self {
    Self {
      assets: default_assets_name(),
      cdn: default_cdn_name(),
    }
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageConfig {
  /// SQLite database file (default: $XDG_DATA_HOME/offline-agent/cache.db)
  pub path: Option<PathBuf>,
}

fn default_assets_name() -> String {
  "app-assets".to_string()
}

fn default_cdn_name() -> String {
  "app-cdn".to_string()
}

fn default_fallback_document() -> String {
  DEFAULT_FALLBACK_DOCUMENT.to_string()
}

fn default_trusted_origins() -> Vec<String> {
  DEFAULT_TRUSTED_ORIGINS.iter().map(|s| s.to_string()).collect()
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./offline-agent.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/offline-agent/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/offline-agent/config.yaml"
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("offline-agent.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("offline-agent").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn from_yaml(contents: &str) -> Result<Self> {
    serde_yaml::from_str(contents).map_err(|e| eyre!("{}", e))
  }

  /// Cache database location.
  ///
  /// OFFLINE_AGENT_CACHE_DB wins over the config file, which wins over the
  /// default data directory.
  pub fn storage_path(&self) -> Result<PathBuf> {
    if let Ok(path) = std::env::var("OFFLINE_AGENT_CACHE_DB") {
      if !path.is_empty() {
        return Ok(PathBuf::from(path));
      }
    }
    match &self.storage.path {
      Some(path) => Ok(path.clone()),
      None => SqliteStorage::default_path(),
    }
  }

  /// Validate and resolve every path against the agent's own location.
  pub fn resolve(&self) -> Result<AgentConfig> {
    let script_url = Url::parse(&self.script_url)
      .map_err(|e| eyre!("Invalid script_url '{}': {}", self.script_url, e))?;
    if !matches!(script_url.scheme(), "http" | "https") {
      return Err(eyre!("script_url must be http(s): {}", script_url));
    }
    if self.version.trim().is_empty() {
      return Err(eyre!("version must not be empty"));
    }
    if self.caches.assets == self.caches.cdn {
      return Err(eyre!(
        "Asset and CDN caches must have distinct names (both are '{}')",
        self.caches.assets
      ));
    }

    let base = base_url(&script_url)?;
    let paths = match &self.precache {
      Some(paths) => paths.clone(),
      None => default_precache(&script_url),
    };
    let manifest = paths
      .iter()
      .map(|path| resolve_same_origin(&base, path))
      .collect::<Result<Vec<_>>>()?;
    let fallback_document = resolve_same_origin(&base, &self.fallback_document)?;

    Ok(AgentConfig {
      registry: CacheRegistry::new(&self.caches.assets, &self.caches.cdn, self.version.trim()),
      script_url,
      base,
      manifest,
      fallback_document,
      trusted_origins: self.trusted_origins.clone(),
    })
  }
}

/// Resolved configuration handed to the lifecycle controller and the router.
#[derive(Debug, Clone)]
pub struct AgentConfig {
  pub script_url: Url,
  /// Directory the agent is deployed in, with a trailing slash
  pub base: Url,
  pub registry: CacheRegistry,
  /// Absolute URLs pre-populated at install, in order
  pub manifest: Vec<Url>,
  /// Entry-point document served for offline navigations
  pub fallback_document: Url,
  pub trusted_origins: Vec<String>,
}

impl AgentConfig {
  /// Configuration with every default, for the given script location.
  #[cfg(test)]
  pub fn new(script_url: &str, version: &str) -> Result<Self> {
    Config {
      script_url: script_url.to_string(),
      version: version.to_string(),
      caches: CacheNames::default(),
      precache: None,
      fallback_document: default_fallback_document(),
      trusted_origins: default_trusted_origins(),
      storage: StorageConfig::default(),
    }
    .resolve()
  }

  pub fn origin(&self) -> Origin {
    self.script_url.origin()
  }

  pub fn is_trusted(&self, url: &str) -> bool {
    self
      .trusted_origins
      .iter()
      .any(|prefix| url.starts_with(prefix.as_str()))
  }
}

/// The script URL up to and including the last `/` of its path.
fn base_url(script_url: &Url) -> Result<Url> {
  script_url
    .join("./")
    .map_err(|e| eyre!("Failed to derive base path from {}: {}", script_url, e))
}

fn default_precache(script_url: &Url) -> Vec<String> {
  let script_name = script_url
    .path_segments()
    .and_then(|mut segments| segments.next_back())
    .unwrap_or_default()
    .to_string();

  let mut paths = vec![String::new(), DEFAULT_FALLBACK_DOCUMENT.to_string()];
  if !script_name.is_empty() {
    paths.push(script_name);
  }
  paths.extend(DEFAULT_ICONS.iter().map(|s| s.to_string()));
  paths
}

fn resolve_same_origin(base: &Url, path: &str) -> Result<Url> {
  let url = base
    .join(path)
    .map_err(|e| eyre!("Invalid asset path '{}': {}", path, e))?;
  if url.origin() != base.origin() {
    return Err(eyre!("Asset path '{}' leaves the agent's origin", path));
  }
  Ok(url)
}
