//! Pages controlled by the worker and the messages exchanged with them.

use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Messages a page may post to the worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientMessage {
  /// Activate the waiting worker now instead of when all pages close
  SkipWaiting,
}

impl ClientMessage {
  /// Parse a message, returning `None` for shapes the worker ignores.
  pub fn parse(raw: &str) -> Option<Self> {
    serde_json::from_str(raw).ok()
  }
}

/// Messages the worker broadcasts to its pages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerMessage {
  /// A new asset version is active; the page may offer a reload
  UpdateAvailable,
}

/// Registry of open pages controlled by this worker.
#[derive(Default)]
pub struct Clients {
  senders: Mutex<Vec<mpsc::UnboundedSender<WorkerMessage>>>,
}

impl Clients {
  pub fn new() -> Self {
    Self::default()
  }

  /// Attach a page and get the receiving end of its message channel.
  pub fn connect(&self) -> Result<mpsc::UnboundedReceiver<WorkerMessage>> {
    let (tx, rx) = mpsc::unbounded_channel();
    self
      .senders
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?
      .push(tx);
    Ok(rx)
  }

  /// Number of pages still listening.
  #[cfg(test)]
  pub fn count(&self) -> usize {
    self
      .senders
      .lock()
      .map(|senders| senders.iter().filter(|tx| !tx.is_closed()).count())
      .unwrap_or(0)
  }

  /// Send a message to every page. Pages that have gone away are dropped;
  /// delivery is not acknowledged or retried.
  pub fn broadcast(&self, message: &WorkerMessage) -> Result<usize> {
    let mut senders = self
      .senders
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    senders.retain(|tx| tx.send(message.clone()).is_ok());
    debug!(?message, clients = senders.len(), "broadcast to clients");
    Ok(senders.len())
  }

  /// Tell every page that a new version is active.
  pub fn notify_update(&self) -> Result<usize> {
    let delivered = self.broadcast(&WorkerMessage::UpdateAvailable)?;
    info!(clients = delivered, "announced update");
    Ok(delivered)
  }
}
