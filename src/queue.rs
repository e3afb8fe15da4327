//! Crash-durable FIFO of mutating requests that could not reach the network.

use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tracing::warn;

use crate::db::Database;
use crate::http::{Method, Request};

const QUEUE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS request_queue (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    data TEXT NOT NULL,
    queued_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

/// Persisted form of a deferred request.
///
/// Serialized as `{ url, method, headers, body }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedRequest {
  pub url: String,
  pub method: Method,
  pub headers: HashMap<String, String>,
  pub body: String,
}

impl QueuedRequest {
  /// Flatten a mutating request for storage.
  pub fn from_request(request: &Request) -> Result<Self> {
    if !request.method.is_mutating() {
      return Err(eyre!("Only POST, PUT and DELETE requests are queued, got {}", request.method));
    }

    Ok(Self {
      url: request.url.to_string(),
      method: request.method,
      headers: request
        .headers
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect(),
      body: request.body.clone(),
    })
  }

  /// Rebuild the request for replay.
  pub fn to_request(&self) -> Result<Request> {
    let url = url::Url::parse(&self.url)
      .map_err(|e| eyre!("Invalid queued URL '{}': {}", self.url, e))?;

    let mut request = Request::new(self.method, url).with_body(self.body.clone());
    for (name, value) in &self.headers {
      request = request.with_header(name, value);
    }
    Ok(request)
  }
}

/// Queue keys are assigned by SQLite and never reused.
pub type QueueKey = i64;

/// Ordered, durable store of `QueuedRequest`s.
#[derive(Clone)]
pub struct DurableQueue {
  db: Arc<Database>,
}

impl DurableQueue {
  /// Ensure the queue table exists. Safe to call repeatedly.
  pub fn open(db: Arc<Database>) -> Result<Self> {
    db.conn()?
      .execute_batch(QUEUE_SCHEMA)
      .map_err(|e| eyre!("Failed to create request queue: {}", e))?;

    Ok(Self { db })
  }

  /// Append an entry under a fresh key.
  pub fn enqueue(&self, entry: &QueuedRequest) -> Result<QueueKey> {
    let data =
      serde_json::to_string(entry).map_err(|e| eyre!("Failed to serialize request: {}", e))?;

    let mut conn = self.db.conn()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;
    tx.execute("INSERT INTO request_queue (data) VALUES (?)", params![data])
      .map_err(|e| eyre!("Failed to enqueue request: {}", e))?;
    let key = tx.last_insert_rowid();
    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(key)
  }

  /// Visit every entry in ascending key order.
  ///
  /// Each visitor future completes before the next entry is read, so no two
  /// visits overlap. Entries removed or added while iterating are observed
  /// like a live cursor would: the next read starts after the last key seen.
  /// A row that cannot be decoded is handed to the visitor as an error and
  /// iteration carries on past it.
  pub async fn for_each<F, Fut, T>(&self, mut visitor: F) -> Result<Vec<T>>
  where
    F: FnMut(Result<QueuedRequest>, QueueKey) -> Fut,
    Fut: Future<Output = T>,
  {
    let mut results = Vec::new();
    let mut last_key = 0;

    while let Some((key, data)) = self.next_after(last_key)? {
      last_key = key;
      results.push(visitor(decode(key, &data), key).await);
    }

    Ok(results)
  }

  fn next_after(&self, after: QueueKey) -> Result<Option<(QueueKey, String)>> {
    self
      .db
      .conn()?
      .query_row(
        "SELECT id, data FROM request_queue WHERE id > ? ORDER BY id LIMIT 1",
        params![after],
        |row| Ok((row.get(0)?, row.get(1)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read request queue: {}", e))
  }

  /// Delete one entry. Returns whether it was present.
  pub fn remove(&self, key: QueueKey) -> Result<bool> {
    let mut conn = self.db.conn()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;
    let deleted = tx
      .execute("DELETE FROM request_queue WHERE id = ?", params![key])
      .map_err(|e| eyre!("Failed to remove queued request {}: {}", key, e))?;
    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(deleted > 0)
  }

  /// Snapshot of the queue in replay order. Rows that cannot be decoded are
  /// logged and left out.
  pub fn entries(&self) -> Result<Vec<(QueueKey, QueuedRequest)>> {
    let conn = self.db.conn()?;
    let mut stmt = conn
      .prepare("SELECT id, data FROM request_queue ORDER BY id")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let rows: Vec<(QueueKey, String)> = stmt
      .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
      .map_err(|e| eyre!("Failed to read request queue: {}", e))?
      .collect::<rusqlite::Result<_>>()
      .map_err(|e| eyre!("Failed to read request queue: {}", e))?;

    Ok(
      rows
        .into_iter()
        .filter_map(|(key, data)| match decode(key, &data) {
          Ok(entry) => Some((key, entry)),
          Err(e) => {
            warn!(key, error = %e, "skipping unreadable queue entry");
            None
          }
        })
        .collect(),
    )
  }

  pub fn len(&self) -> Result<usize> {
    let count: i64 = self
      .db
      .conn()?
      .query_row("SELECT COUNT(*) FROM request_queue", [], |row| row.get(0))
      .map_err(|e| eyre!("Failed to count queued requests: {}", e))?;
    Ok(count as usize)
  }
}

fn decode(key: QueueKey, data: &str) -> Result<QueuedRequest> {
  serde_json::from_str(data)
    .map_err(|e| eyre!("Failed to deserialize queued request {}: {}", key, e))
}
