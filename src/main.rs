mod agent;
mod cache;
mod config;
mod event;
mod http;
mod lifecycle;
mod network;
mod router;
#[cfg(test)]
mod test_support;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use crate::agent::Agent;
use crate::cache::{CacheStorage, MemoryStorage, SqliteStorage};
use crate::config::{AgentConfig, Config};
use crate::http::{Request, RequestMode};
use crate::network::{HttpNetwork, Network, OfflineNetwork};

#[derive(Parser, Debug)]
#[command(name = "offline-agent")]
#[command(about = "Offline-caching agent for a web application's assets")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/offline-agent/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Keep caches in memory instead of the SQLite database
  #[arg(long)]
  ephemeral: bool,

  /// Behave as if the network were unreachable
  #[arg(long)]
  offline: bool,

  /// Write logs to a daily rolling file in this directory instead of stderr
  #[arg(long)]
  log_dir: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Pre-populate the asset cache, then activate
  Install,
  /// Delete caches left behind by other versions
  Activate,
  /// Route a single GET request through the agent
  Fetch {
    url: String,
    /// Treat the request as a top-level navigation
    #[arg(long)]
    navigate: bool,
    /// Print the response body
    #[arg(long)]
    body: bool,
  },
  /// List cache namespaces
  Caches,
  /// Read JSON-lines events from stdin and print one result per line
  Run,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _guard = init_logging(args.log_dir.as_deref())?;

  let config = Config::load(args.config.as_deref())?;
  let agent_config = config.resolve()?;
  info!(
    base = %agent_config.base,
    assets = %agent_config.registry.assets(),
    cdn = %agent_config.registry.cdn(),
    "configured"
  );

  match (args.ephemeral, args.offline) {
    (true, true) => execute(args.command, agent_config, MemoryStorage::new(), OfflineNetwork).await,
    (true, false) => {
      execute(args.command, agent_config, MemoryStorage::new(), HttpNetwork::new()?).await
    }
    (false, offline) => {
      let path = config.storage_path()?;
      let storage = SqliteStorage::open(&path)?;
      info!(path = %path.display(), "opened cache database");
      if offline {
        execute(args.command, agent_config, storage, OfflineNetwork).await
      } else {
        execute(args.command, agent_config, storage, HttpNetwork::new()?).await
      }
    }
  }
}

fn init_logging(log_dir: Option<&Path>) -> Result<WorkerGuard> {
  let filter =
    EnvFilter::try_from_env("OFFLINE_AGENT_LOG").unwrap_or_else(|_| EnvFilter::new("info"));

  let (writer, guard) = match log_dir {
    Some(dir) => {
      tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, "offline-agent.log"))
    }
    None => tracing_appender::non_blocking(std::io::stderr()),
  };

  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(writer)
    .with_target(false)
    .try_init()
    .map_err(|e| eyre!("Failed to initialize logging: {}", e))?;

  Ok(guard)
}

async fn execute<S: CacheStorage, N: Network>(
  command: Command,
  config: AgentConfig,
  storage: S,
  network: N,
) -> Result<()> {
  let agent = Arc::new(Agent::new(config, storage, network));

  match command {
    Command::Install => {
      let (report, activation) = agent.on_install().await?;
      println!("Installed into {}", report.namespace);
      for url in &report.cached {
        println!("  cached   {}", url);
      }
      for skipped in &report.skipped {
        println!("  skipped  {} ({})", skipped.url, skipped.reason);
      }
      match activation {
        Some(activation) => print_activation(&activation.deleted),
        None => println!("Phase: {:?}", agent.lifecycle().phase()?),
      }
    }
    Command::Activate => {
      let report = agent.on_activate()?;
      print_activation(&report.deleted);
    }
    Command::Fetch {
      url,
      navigate,
      body,
    } => {
      if !agent.resume()? {
        return Err(eyre!("Not installed; run `offline-agent install` first"));
      }
      let mode = if navigate {
        RequestMode::Navigate
      } else {
        RequestMode::NoCors
      };
      let request = Request::parse(&url)?.with_mode(mode);

      match agent.on_fetch(request).await {
        Some(served) => {
          println!(
            "{} {} ({:?}, {} bytes)",
            served.response.status,
            served.response.status_text,
            served.source,
            served.response.body.len()
          );
          if let Some(content_type) = served.response.header("content-type") {
            println!("content-type: {}", content_type);
          }
          if let Some(cached_at) = served.cached_at {
            println!("cached at {}", cached_at.to_rfc3339());
          }
          if body {
            println!();
            println!("{}", served.response.text());
          }
        }
        None => println!("not intercepted: {}", url),
      }
      agent.settle().await;
    }
    Command::Caches => {
      let cache = agent.router().cache();
      for name in cache.namespaces()? {
        let marker = if cache.registry().is_current(&name) {
          "current"
        } else {
          "stale"
        };
        println!(
          "{:<32} {:>6} entries  {}",
          name,
          cache.storage().entry_count(&name)?,
          marker
        );
      }
    }
    Command::Run => {
      agent.resume()?;
      let stdin = tokio::io::BufReader::new(tokio::io::stdin());
      event::run(agent, stdin, tokio::io::stdout()).await?;
    }
  }

  Ok(())
}

fn print_activation(deleted: &[String]) {
  if deleted.is_empty() {
    println!("Activated; no stale caches");
  } else {
    println!("Activated; deleted {}", deleted.join(", "));
  }
}
