//! Replays queued mutations once connectivity is back.

use color_eyre::Result;
use std::sync::Arc;
use tracing::{info, warn};

use crate::http::Fetcher;
use crate::queue::{DurableQueue, QueueKey, QueuedRequest};

/// Outcome of one drain pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
  pub replayed: usize,
  /// Entries left in the queue for the next pass
  pub failed: usize,
}

pub struct QueueDrainer {
  queue: DurableQueue,
  fetcher: Arc<dyn Fetcher>,
}

impl QueueDrainer {
  pub fn new(queue: DurableQueue, fetcher: Arc<dyn Fetcher>) -> Self {
    Self { queue, fetcher }
  }

  /// Replay every queued request in insertion order.
  ///
  /// Delivered entries are removed; anything that fails stays queued and the
  /// pass moves on. Any HTTP response counts as delivered. Replays are not
  /// deduplicated, so a non-idempotent request may apply twice if an earlier
  /// pass was cut short after delivery but before removal.
  pub async fn drain(&self) -> Result<DrainReport> {
    let queue = &self.queue;
    let fetcher = &self.fetcher;

    let outcomes = queue
      .for_each(|entry, key| async move { replay(queue, &**fetcher, entry, key).await })
      .await?;

    let replayed = outcomes.iter().filter(|delivered| **delivered).count();
    let report = DrainReport {
      replayed,
      failed: outcomes.len() - replayed,
    };

    info!(replayed = report.replayed, failed = report.failed, "drained request queue");
    Ok(report)
  }
}

async fn replay(
  queue: &DurableQueue,
  fetcher: &dyn Fetcher,
  entry: Result<QueuedRequest>,
  key: QueueKey,
) -> bool {
  let request = match entry.and_then(|entry| entry.to_request()) {
    Ok(request) => request,
    Err(e) => {
      warn!(key, error = %e, "cannot rebuild queued request, leaving it queued");
      return false;
    }
  };

  match fetcher.fetch(&request).await {
    Ok(response) => match queue.remove(key) {
      Ok(_) => {
        info!(key, method = %request.method, url = %request.url, status = response.status, "replayed queued request");
        true
      }
      Err(e) => {
        warn!(key, error = %e, "replayed request but could not remove it");
        false
      }
    },
    Err(e) => {
      warn!(key, method = %request.method, url = %request.url, error = %e, "replay failed, keeping request queued");
      false
    }
  }
}
