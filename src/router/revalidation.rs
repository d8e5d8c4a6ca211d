use std::sync::{Arc, Mutex, PoisonError};
use tokio::task::JoinHandle;
use tracing::warn;

use crate::http::Response;

/// A network refresh; resolves to the fetched response, if any.
pub type Refresh = JoinHandle<Option<Response>>;

/// Background cache refreshes that outlive the request that started them.
#[derive(Clone, Default)]
pub struct Revalidations {
  pending: Arc<Mutex<Vec<Refresh>>>,
}

impl Revalidations {
  pub fn track(&self, handle: Refresh) {
    let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
    pending.retain(|h| !h.is_finished());
    pending.push(handle);
  }

  /// Number of refreshes that have not finished yet.
  pub fn pending(&self) -> usize {
    let pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
    pending.iter().filter(|h| !h.is_finished()).count()
  }

  /// Wait for every tracked refresh, including ones started while waiting.
  /// Returns how many refresh tasks failed.
  pub async fn settle(&self) -> usize {
    let mut failed = 0;
    loop {
      let handles = {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::take(&mut *pending)
      };
      if handles.is_empty() {
        return failed;
      }
      for handle in handles {
        // The entry stays stale
        if let Err(e) = handle.await {
          warn!(error = %e, "revalidation task failed");
          failed += 1;
        }
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::time::Duration;

  #[tokio::test]
  async fn test_settle_waits_for_tracked_tasks() {
    let revalidations = Revalidations::default();
    let done = Arc::new(AtomicUsize::new(0));

    for _ in 0..3 {
      let done = Arc::clone(&done);
      revalidations.track(tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        done.fetch_add(1, Ordering::SeqCst);
        None
      }));
    }

    assert_eq!(revalidations.settle().await, 0);
    assert_eq!(done.load(Ordering::SeqCst), 3);
    assert_eq!(revalidations.pending(), 0);
  }

  #[tokio::test]
  async fn test_settle_counts_failed_tasks() {
    let revalidations = Revalidations::default();

    let failing: Refresh = tokio::spawn(async { panic!("refresh exploded") });
    revalidations.track(failing);
    revalidations.track(tokio::spawn(async { None }));

    assert_eq!(revalidations.settle().await, 1);
    assert_eq!(revalidations.pending(), 0);
  }
}
