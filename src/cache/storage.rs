//! Cache storage trait and SQLite implementation.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, OptionalExtension};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::db::Database;
use crate::http::{Method, Request, Response};

/// A stored (request, response) pair.
#[derive(Debug, Clone)]
pub struct CachedEntry {
  pub response: Response,
  /// When the entry was written
  pub cached_at: DateTime<Utc>,
}

/// Trait for named-cache storage backends.
pub trait CacheStorage: Send + Sync {
  /// Create the named cache if it does not exist yet.
  fn open_cache(&self, name: &str) -> Result<()>;

  /// Names of every cache currently stored.
  fn cache_names(&self) -> Result<Vec<String>>;

  /// Delete a cache and all of its entries. Returns whether it existed.
  fn delete_cache(&self, name: &str) -> Result<bool>;

  /// Look up an entry by request identity (method + URL).
  fn get(&self, name: &str, method: Method, url: &str) -> Result<Option<CachedEntry>>;

  /// Store every pair in one transaction, replacing existing entries.
  fn put_all(&self, name: &str, entries: &[(Request, Response)]) -> Result<()>;
}

/// SQLite-based cache storage implementation.
pub struct SqliteStorage {
  db: Arc<Database>,
}

impl SqliteStorage {
  pub fn new(db: Arc<Database>) -> Self {
    Self { db }
  }
}

/// Stable, fixed-length key for a request identity.
fn entry_key(method: Method, url: &str) -> String {
  let mut hasher = Sha256::new();
  hasher.update(method.as_str().as_bytes());
  hasher.update(b" ");
  hasher.update(url.as_bytes());
  hex::encode(hasher.finalize())
}

impl CacheStorage for SqliteStorage {
  fn open_cache(&self, name: &str) -> Result<()> {
    self
      .db
      .conn()?
      .execute(
        "INSERT OR IGNORE INTO cache_names (name) VALUES (?)",
        params![name],
      )
      .map_err(|e| eyre!("Failed to open cache {}: {}", name, e))?;
    Ok(())
  }

  fn cache_names(&self) -> Result<Vec<String>> {
    let conn = self.db.conn()?;
    let mut stmt = conn
      .prepare("SELECT name FROM cache_names ORDER BY created_at, name")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list caches: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read cache name: {}", e))?;

    Ok(names)
  }

  fn delete_cache(&self, name: &str) -> Result<bool> {
    let mut conn = self.db.conn()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute("DELETE FROM cache_entries WHERE cache_name = ?", params![name])
      .map_err(|e| eyre!("Failed to delete entries of cache {}: {}", name, e))?;
    let deleted = tx
      .execute("DELETE FROM cache_names WHERE name = ?", params![name])
      .map_err(|e| eyre!("Failed to delete cache {}: {}", name, e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(deleted > 0)
  }

  fn get(&self, name: &str, method: Method, url: &str) -> Result<Option<CachedEntry>> {
    let conn = self.db.conn()?;
    let mut stmt = conn
      .prepare(
        "SELECT status, headers, body, cached_at FROM cache_entries
         WHERE cache_name = ? AND entry_key = ?",
      )
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let row: Option<(u16, String, Vec<u8>, String)> = stmt
      .query_row(params![name, entry_key(method, url)], |row| {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
      })
      .optional()
      .map_err(|e| eyre!("Failed to read cache entry {}: {}", url, e))?;

    match row {
      Some((status, headers, body, cached_at)) => {
        let headers: BTreeMap<String, String> = serde_json::from_str(&headers)
          .map_err(|e| eyre!("Failed to deserialize cached headers: {}", e))?;
        Ok(Some(CachedEntry {
          response: Response {
            status,
            headers,
            body,
          },
          cached_at: parse_datetime(&cached_at)?,
        }))
      }
      None => Ok(None),
    }
  }

  fn put_all(&self, name: &str, entries: &[(Request, Response)]) -> Result<()> {
    let mut conn = self.db.conn()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute(
      "INSERT OR IGNORE INTO cache_names (name) VALUES (?)",
      params![name],
    )
    .map_err(|e| eyre!("Failed to open cache {}: {}", name, e))?;

    for (request, response) in entries {
      let url = request.url.as_str();
      let headers = serde_json::to_string(&response.headers)
        .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

      tx.execute(
        "INSERT OR REPLACE INTO cache_entries
           (cache_name, entry_key, method, url, status, headers, body, cached_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, datetime('now'))",
        params![
          name,
          entry_key(request.method, url),
          request.method.as_str(),
          url,
          response.status,
          headers,
          response.body,
        ],
      )
      .map_err(|e| eyre!("Failed to store cache entry {}: {}", url, e))?;
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}

#[cfg(test)]
mod tests {
  use super::*;
  use url::Url;

  fn storage() -> SqliteStorage {
    SqliteStorage::new(Arc::new(Database::open_in_memory().unwrap()))
  }

  fn get(url: &str) -> Request {
    Request::get(Url::parse(url).unwrap())
  }

  #[test]
  fn entries_are_scoped_to_their_cache() {
    let storage = storage();
    let request = get("http://localhost:5000/offline.html");
    storage
      .put_all("v1", &[(request.clone(), Response::new(200, "offline"))])
      .unwrap();

    let hit = storage.get("v1", Method::Get, request.url.as_str()).unwrap().unwrap();
    assert_eq!(hit.response.text(), "offline");
    assert!(Utc::now() - hit.cached_at < chrono::Duration::minutes(1));
    assert!(storage.get("v2", Method::Get, request.url.as_str()).unwrap().is_none());
  }

  #[test]
  fn method_is_part_of_the_identity() {
    let storage = storage();
    let request = get("http://localhost:5000/a.css");
    storage
      .put_all("v1", &[(request.clone(), Response::new(200, "a"))])
      .unwrap();

    assert!(storage.get("v1", Method::Head, request.url.as_str()).unwrap().is_none());
  }

  #[test]
  fn delete_cache_removes_name_and_entries() {
    let storage = storage();
    storage.open_cache("empty").unwrap();
    storage
      .put_all("v1", &[(get("http://localhost:5000/a.js"), Response::new(200, "a"))])
      .unwrap();

    assert_eq!(storage.cache_names().unwrap(), vec!["empty", "v1"]);
    assert!(storage.delete_cache("v1").unwrap());
    assert!(!storage.delete_cache("v1").unwrap());
    assert_eq!(storage.cache_names().unwrap(), vec!["empty"]);
    assert!(storage
      .get("v1", Method::Get, "http://localhost:5000/a.js")
      .unwrap()
      .is_none());
  }

  #[test]
  fn headers_survive_storage() {
    let storage = storage();
    let request = get("http://localhost:5000/style.css");
    let response = Response::new(200, "body{}").with_header("Content-Type", "text/css");
    storage.put_all("v1", &[(request.clone(), response.clone())]).unwrap();

    let hit = storage.get("v1", Method::Get, request.url.as_str()).unwrap().unwrap();
    assert_eq!(hit.response, response);
  }
}
