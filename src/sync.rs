//! Background-sync registrations and the tags the worker understands.

use color_eyre::{eyre::eyre, Result};
use rusqlite::params;
use std::sync::Arc;

use crate::db::Database;

/// Replay the mutation queue
pub const SYNC_REQUESTS: &str = "sync-requests";
/// Warm the unread notification count
pub const SYNC_NOTIFICATIONS: &str = "sync-notifications";
/// Periodic wake that also warms the unread notification count
pub const PERIODIC_NOTIFICATIONS: &str = "periodic-notifications";

/// Pending one-shot sync registrations, fired when connectivity returns.
#[derive(Clone)]
pub struct SyncManager {
  db: Arc<Database>,
}

impl SyncManager {
  pub fn new(db: Arc<Database>) -> Self {
    Self { db }
  }

  /// Register a tag. Registering a pending tag again is a no-op.
  pub fn register(&self, tag: &str) -> Result<()> {
    self
      .db
      .conn()?
      .execute(
        "INSERT OR IGNORE INTO sync_registrations (tag) VALUES (?)",
        params![tag],
      )
      .map_err(|e| eyre!("Failed to register sync tag {}: {}", tag, e))?;
    Ok(())
  }

  /// Tags waiting to fire, oldest registration first.
  pub fn pending(&self) -> Result<Vec<String>> {
    let conn = self.db.conn()?;
    let mut stmt = conn
      .prepare("SELECT tag FROM sync_registrations ORDER BY registered_at, rowid")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let tags = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list sync registrations: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read sync registration: {}", e))?;

    Ok(tags)
  }

  /// Forget a tag once its handler has run.
  pub fn clear(&self, tag: &str) -> Result<()> {
    self
      .db
      .conn()?
      .execute("DELETE FROM sync_registrations WHERE tag = ?", params![tag])
      .map_err(|e| eyre!("Failed to clear sync tag {}: {}", tag, e))?;
    Ok(())
  }
}
