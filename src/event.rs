use url::Url;

use crate::drainer::DrainReport;
use crate::http::{Request, Response};
use crate::push::Notification;

/// Events delivered to the worker
#[derive(Debug)]
pub enum WorkerEvent {
  Install,
  Activate,
  /// Raw JSON posted by a page
  Message(String),
  Fetch(Request),
  /// One-shot background sync, fired when connectivity returns
  Sync(String),
  PeriodicSync(String),
  /// Raw push payload
  Push(Vec<u8>),
  NotificationClick(Notification),
}

/// What handling an event produced
#[derive(Debug)]
pub enum EventOutcome {
  Installed { cached: usize },
  Activated { evicted: bool },
  /// Response for a fetch; `None` when the request was not intercepted
  Fetched(Option<Response>),
  Drained(DrainReport),
  Synced,
  Shown(Notification),
  Opened(Vec<Url>),
  Ignored,
}
