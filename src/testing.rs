//! Scripted collaborators shared by the unit tests.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use url::Url;

use crate::http::{Fetcher, Method, Request, Response};
use crate::push::{Notification, Notifier};

/// Fetcher answering from a table keyed by URL path.
///
/// Unknown paths answer 404. While offline, or for paths marked
/// unreachable, every fetch fails like a dropped connection.
pub struct MockFetcher {
  responses: Mutex<HashMap<String, Response>>,
  unreachable: Mutex<HashSet<String>>,
  offline: Mutex<bool>,
  calls: Mutex<Vec<Request>>,
}

impl MockFetcher {
  pub fn new() -> Self {
    Self {
      responses: Mutex::new(HashMap::new()),
      unreachable: Mutex::new(HashSet::new()),
      offline: Mutex::new(false),
      calls: Mutex::new(Vec::new()),
    }
  }

  pub fn respond(&self, path: &str, response: Response) {
    self.responses.lock().unwrap().insert(path.to_string(), response);
  }

  pub fn set_offline(&self, offline: bool) {
    *self.offline.lock().unwrap() = offline;
  }

  pub fn set_unreachable(&self, path: &str, unreachable: bool) {
    let mut paths = self.unreachable.lock().unwrap();
    if unreachable {
      paths.insert(path.to_string());
    } else {
      paths.remove(path);
    }
  }

  /// Every request seen so far, including failed ones.
  pub fn calls(&self) -> Vec<Request> {
    self.calls.lock().unwrap().clone()
  }

  pub fn call_paths(&self) -> Vec<(Method, String)> {
    self
      .calls()
      .into_iter()
      .map(|r| (r.method, r.url.path().to_string()))
      .collect()
  }

  pub fn clear_calls(&self) {
    self.calls.lock().unwrap().clear();
  }
}

#[async_trait]
impl Fetcher for MockFetcher {
  async fn fetch(&self, request: &Request) -> Result<Response> {
    self.calls.lock().unwrap().push(request.clone());

    let path = request.url.path().to_string();
    if *self.offline.lock().unwrap() || self.unreachable.lock().unwrap().contains(&path) {
      return Err(eyre!("Failed to fetch {}: connection refused", request.url));
    }

    Ok(
      self
        .responses
        .lock()
        .unwrap()
        .get(&path)
        .cloned()
        .unwrap_or_else(|| Response::new(404, "Not Found")),
    )
  }
}

/// Notifier that records what it was asked to do.
#[derive(Default)]
pub struct RecordingNotifier {
  pub shown: Mutex<Vec<Notification>>,
  pub closed: Mutex<Vec<Notification>>,
  pub opened: Mutex<Vec<Url>>,
}

#[async_trait]
impl Notifier for RecordingNotifier {
  async fn show(&self, notification: &Notification) -> Result<()> {
    self.shown.lock().unwrap().push(notification.clone());
    Ok(())
  }

  async fn close(&self, notification: &Notification) -> Result<()> {
    self.closed.lock().unwrap().push(notification.clone());
    Ok(())
  }

  async fn open_window(&self, url: &Url) -> Result<()> {
    self.opened.lock().unwrap().push(url.clone());
    Ok(())
  }
}
