//! JSON-lines event stream: one platform event per input line, one result
//! per output line.

use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::agent::{Agent, Event, EventOutcome};
use crate::cache::{CacheStorage, ResponseSource, Served};
use crate::http::{Request, RequestMode};
use crate::lifecycle::{ActivateReport, InstallReport};
use crate::network::Network;

/// A single input line.
#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
enum EventLine {
  Install,
  Activate,
  Fetch {
    url: String,
    #[serde(default = "default_method")]
    method: String,
    #[serde(default)]
    mode: RequestMode,
  },
  Message {
    data: serde_json::Value,
  },
}

fn default_method() -> String {
  "GET".to_string()
}

impl EventLine {
  fn into_event(self) -> Result<Event> {
    Ok(match self {
      EventLine::Install => Event::Install,
      EventLine::Activate => Event::Activate,
      EventLine::Fetch { url, method, mode } => {
        Event::Fetch(Request::parse(&url)?.with_method(method).with_mode(mode))
      }
      EventLine::Message { data } => Event::Message(data),
    })
  }
}

/// A single output line.
#[derive(Debug, Serialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum EventResult {
  Install {
    #[serde(flatten)]
    report: InstallReport,
    activated: Option<ActivateReport>,
  },
  Activate(ActivateReport),
  Fetch {
    url: String,
    intercepted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    source: Option<ResponseSource>,
    #[serde(skip_serializing_if = "Option::is_none")]
    bytes: Option<usize>,
  },
  Message {
    accepted: bool,
    activated: Option<ActivateReport>,
  },
  Error {
    line: usize,
    message: String,
  },
}

impl From<EventOutcome> for EventResult {
  fn from(outcome: EventOutcome) -> Self {
    match outcome {
      EventOutcome::Installed { report, activation } => EventResult::Install {
        report,
        activated: activation,
      },
      EventOutcome::Activated(report) => EventResult::Activate(report),
      EventOutcome::Fetched { url, served } => EventResult::fetched(url, served),
      EventOutcome::Message {
        message,
        activation,
      } => EventResult::Message {
        accepted: message.is_some(),
        activated: activation,
      },
    }
  }
}

impl EventResult {
  fn fetched(url: String, served: Option<Served>) -> Self {
    match served {
      Some(served) => EventResult::Fetch {
        url,
        intercepted: true,
        status: Some(served.response.status),
        source: Some(served.source),
        bytes: Some(served.response.body.len()),
      },
      None => EventResult::Fetch {
        url,
        intercepted: false,
        status: None,
        source: None,
        bytes: None,
      },
    }
  }

  fn error(line: usize, error: impl std::fmt::Display) -> Self {
    EventResult::Error {
      line,
      message: error.to_string(),
    }
  }
}

/// Events parsed from the input, tagged with their 1-based line number.
type Parsed = (usize, Result<Event>);

/// Event handler that produces events from line-oriented input
pub struct EventHandler {
  rx: mpsc::UnboundedReceiver<Parsed>,
}

impl EventHandler {
  /// Spawn a reader task over the given input
  pub fn new<R>(input: R) -> Self
  where
    R: AsyncBufRead + Unpin + Send + 'static,
  {
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
      let mut lines = input.lines();
      let mut number = 0;
      loop {
        let line = match lines.next_line().await {
          Ok(Some(line)) => line,
          Ok(None) => break,
          Err(e) => {
            warn!(error = %e, "failed to read event stream");
            break;
          }
        };
        number += 1;
        if line.trim().is_empty() {
          continue;
        }
        let event = serde_json::from_str::<EventLine>(&line)
          .map_err(|e| eyre!("Invalid event: {}", e))
          .and_then(EventLine::into_event);
        if tx.send((number, event)).is_err() {
          break;
        }
      }
    });

    Self { rx }
  }

  /// Receive the next event
  pub async fn next(&mut self) -> Option<Parsed> {
    self.rx.recv().await
  }
}

/// Drive the agent from an event stream until the input ends.
///
/// Lifecycle events are handled in input order. Each fetch runs in its own
/// task, so results of concurrent fetches may be written out of order.
/// Background revalidations are awaited before returning.
pub async fn run<S, N, R, W>(agent: Arc<Agent<S, N>>, input: R, mut output: W) -> Result<()>
where
  S: CacheStorage,
  N: Network,
  R: AsyncBufRead + Unpin + Send + 'static,
  W: AsyncWrite + Unpin,
{
  let mut events = EventHandler::new(input);
  let (result_tx, mut result_rx) = mpsc::unbounded_channel::<EventResult>();
  let mut fetches = Vec::new();

  let dispatcher = async {
    while let Some((line, event)) = events.next().await {
      let event = match event {
        Ok(event) => event,
        Err(e) => {
          let _ = result_tx.send(EventResult::error(line, e));
          continue;
        }
      };
      debug!(line, ?event, "event");

      match event {
        Event::Fetch(request) => {
          let agent = Arc::clone(&agent);
          let result_tx = result_tx.clone();
          fetches.push(tokio::spawn(async move {
            let url = request.url.to_string();
            let served = agent.on_fetch(request).await;
            let _ = result_tx.send(EventResult::fetched(url, served));
          }));
        }
        event => {
          let result = match agent.dispatch(event).await {
            Ok(outcome) => EventResult::from(outcome),
            Err(e) => EventResult::error(line, e),
          };
          let _ = result_tx.send(result);
        }
      }
    }

    for fetch in fetches.drain(..) {
      if let Err(e) = fetch.await {
        warn!(error = %e, "fetch task failed");
      }
    }
    drop(result_tx);
  };

  let writer = async {
    while let Some(result) = result_rx.recv().await {
      let mut line = serde_json::to_vec(&result)
        .map_err(|e| eyre!("Failed to serialize result: {}", e))?;
      line.push(b'\n');
      output
        .write_all(&line)
        .await
        .map_err(|e| eyre!("Failed to write result: {}", e))?;
    }
    output
      .flush()
      .await
      .map_err(|e| eyre!("Failed to flush output: {}", e))?;
    Ok::<_, color_eyre::Report>(())
  };

  let ((), written) = tokio::join!(dispatcher, writer);
  written?;

  agent.settle().await;
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::MemoryStorage;
  use crate::config::AgentConfig;
  use crate::test_support::{ok, FakeNetwork};
  use serde_json::Value;

  fn agent() -> Arc<Agent<MemoryStorage, FakeNetwork>> {
    let network = FakeNetwork::new();
    network.respond("https://app.test/", ok("root"));
    network.respond("https://app.test/index.html", ok("index"));
    network.respond("https://app.test/sw.js", ok("script"));
    network.respond("https://cdn.jsdelivr.net/npm/lib.js", ok("lib"));
    Arc::new(Agent::new(
      AgentConfig::new("https://app.test/sw.js", "v2").unwrap(),
      MemoryStorage::new(),
      network,
    ))
  }

  async fn run_lines(input: &'static str) -> Vec<Value> {
    let mut output = Vec::new();
    run(agent(), input.as_bytes(), &mut output).await.unwrap();
    String::from_utf8(output)
      .unwrap()
      .lines()
      .map(|l| serde_json::from_str(l).unwrap())
      .collect()
  }

  #[tokio::test]
  async fn test_install_then_fetch() {
    let results = run_lines(
      r#"{"event":"install"}
{"event":"fetch","url":"https://app.test/index.html"}
"#,
    )
    .await;

    assert_eq!(results.len(), 2);
    assert_eq!(results[0]["event"], "install");
    assert_eq!(results[0]["namespace"], "app-assets-v2");
    assert_eq!(results[0]["cached"].as_array().unwrap().len(), 3);
    assert_eq!(results[0]["skipped"].as_array().unwrap().len(), 2);
    assert_eq!(results[0]["activated"]["claimed"], true);

    assert_eq!(results[1]["event"], "fetch");
    assert_eq!(results[1]["intercepted"], true);
    assert_eq!(results[1]["status"], 200);
    assert_eq!(results[1]["source"], "cache");
  }

  #[tokio::test]
  async fn test_navigation_and_untrusted_fetch() {
    let results = run_lines(
      r#"{"event":"install"}
{"event":"fetch","url":"https://app.test/missing","mode":"navigate"}
"#,
    )
    .await;
    assert_eq!(results[1]["source"], "fallback");

    let results = run_lines(
      r#"{"event":"install"}
{"event":"fetch","url":"https://tracker.example.com/pixel.gif"}
"#,
    )
    .await;
    assert_eq!(results[1]["intercepted"], false);
    assert!(results[1].get("status").is_none());
  }

  #[tokio::test]
  async fn test_invalid_lines_report_errors() {
    let results = run_lines(
      r#"not json

{"event":"fetch","url":"::bad::"}
{"event":"message","data":{"type":"SKIP_WAITING"}}
"#,
    )
    .await;

    assert_eq!(results.len(), 3);
    assert_eq!(results[0]["event"], "error");
    assert_eq!(results[0]["line"], 1);
    assert_eq!(results[1]["event"], "error");
    assert_eq!(results[1]["line"], 3);
    assert_eq!(results[2]["event"], "message");
    assert_eq!(results[2]["accepted"], true);
    assert!(results[2]["activated"].is_null());
  }

  #[tokio::test]
  async fn test_activate_event() {
    let results = run_lines("{\"event\":\"activate\"}\n").await;
    assert_eq!(results[0]["event"], "activate");
    assert_eq!(results[0]["claimed"], true);
    assert!(results[0]["deleted"].as_array().unwrap().is_empty());
  }
}
