//! Lifecycle of a worker version, persisted so that a version installed by
//! one run is still waiting when the next run starts.

use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, OptionalExtension};
use std::str::FromStr;
use std::sync::Arc;
use tracing::warn;

use crate::db::Database;

/// Lifecycle phase of a worker version
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
  Parsed,
  Installing,
  /// Installed and waiting for activation
  Installed,
  Activated,
}

impl Lifecycle {
  pub fn as_str(&self) -> &'static str {
    match self {
      Lifecycle::Parsed => "parsed",
      Lifecycle::Installing => "installing",
      Lifecycle::Installed => "installed",
      Lifecycle::Activated => "activated",
    }
  }
}

impl FromStr for Lifecycle {
  type Err = color_eyre::Report;

  fn from_str(s: &str) -> Result<Self> {
    match s {
      "parsed" => Ok(Lifecycle::Parsed),
      "installing" => Ok(Lifecycle::Installing),
      "installed" => Ok(Lifecycle::Installed),
      "activated" => Ok(Lifecycle::Activated),
      other => Err(eyre!("Unknown lifecycle state '{}'", other)),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerState {
  pub lifecycle: Lifecycle,
  /// A skip-waiting request arrived; activate as soon as installed
  pub skip_waiting: bool,
}

impl Default for WorkerState {
  fn default() -> Self {
    Self {
      lifecycle: Lifecycle::Parsed,
      skip_waiting: false,
    }
  }
}

/// Stored state of one worker version.
pub struct LifecycleStore {
  db: Arc<Database>,
  cache_name: String,
}

impl LifecycleStore {
  pub fn new(db: Arc<Database>, cache_name: impl Into<String>) -> Self {
    Self {
      db,
      cache_name: cache_name.into(),
    }
  }

  /// Last saved state, or a fresh one for a version never seen before.
  ///
  /// An install that never finished counts as not installed.
  pub fn load(&self) -> Result<WorkerState> {
    let row: Option<(String, bool)> = self
      .db
      .conn()?
      .query_row(
        "SELECT lifecycle, skip_waiting FROM worker_state WHERE cache_name = ?",
        params![self.cache_name],
        |row| Ok((row.get(0)?, row.get(1)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read worker state: {}", e))?;

    let Some((lifecycle, skip_waiting)) = row else {
      return Ok(WorkerState::default());
    };

    let lifecycle = match lifecycle.parse() {
      Ok(Lifecycle::Installing) => Lifecycle::Parsed,
      Ok(lifecycle) => lifecycle,
      Err(e) => {
        warn!(cache = %self.cache_name, error = %e, "resetting unreadable worker state");
        Lifecycle::Parsed
      }
    };

    Ok(WorkerState {
      lifecycle,
      skip_waiting,
    })
  }

  pub fn save(&self, state: &WorkerState) -> Result<()> {
    self
      .db
      .conn()?
      .execute(
        "INSERT OR REPLACE INTO worker_state (cache_name, lifecycle, skip_waiting, updated_at)
         VALUES (?, ?, ?, datetime('now'))",
        params![self.cache_name, state.lifecycle.as_str(), state.skip_waiting],
      )
      .map_err(|e| eyre!("Failed to save worker state: {}", e))?;
    Ok(())
  }
}
