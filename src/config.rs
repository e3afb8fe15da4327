use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

/// Assets cached at install time when the config does not list its own.
const DEFAULT_MANIFEST: &[&str] = &[
  "/offline.html",
  "/static/dist/style.css",
  "/static/dist/main.js",
  "/static/dist/vendor.js",
  "/static/icons/icon-192x192.png",
  "/static/icons/icon-512x512.png",
  "/static/images/welcomeQuest.webp",
  "/static/images/default-avatar.webp",
];

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Prefix of every cache name (`{app_name}-{version}`)
  pub app_name: String,
  /// Overrides the build-time version string
  pub version: Option<String>,
  /// Origin the worker controls; requests to any other origin pass through
  pub origin: String,
  pub manifest: Vec<String>,
  pub offline_page: String,
  /// Where the worker database lives (default: $XDG_DATA_HOME/qbc-worker)
  pub data_dir: Option<PathBuf>,
  /// Set to false to behave like a platform without background sync
  pub background_sync: bool,
  /// Seconds before a request with no response counts as a network failure
  pub request_timeout_secs: u64,
  pub notifications: NotificationConfig,
  /// Write logs to this file instead of stderr
  pub log_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
  /// Title used when a push payload carries none
  pub default_title: String,
  /// Route opened on every notification click
  pub landing_route: String,
  /// Endpoint warmed by the notification sync tags
  pub unread_endpoint: String,
  pub icon: Option<String>,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      app_name: "questbycycle".to_string(),
      version: None,
      origin: "http://localhost:5000".to_string(),
      manifest: DEFAULT_MANIFEST.iter().map(|s| s.to_string()).collect(),
      offline_page: "/offline.html".to_string(),
      data_dir: None,
      background_sync: true,
      request_timeout_secs: 15,
      notifications: NotificationConfig::default(),
      log_file: None,
    }
  }
}

impl Default for NotificationConfig {
  fn default() -> Self {
    Self {
      default_title: "QuestByCycle".to_string(),
      landing_route: "/notifications/".to_string(),
      unread_endpoint: "/notifications/unread_count".to_string(),
      icon: Some("/static/icons/icon-192x192.png".to_string()),
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./qbc-worker.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/qbc-worker/config.yaml
  ///
  /// Falls back to the built-in defaults when no file exists. Environment
  /// overrides are applied last.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    let mut config = match path {
      Some(p) => Self::load_from_path(&p)?,
      None => {
        tracing::debug!("no config file found, using defaults");
        Self::default()
      }
    };

    if let Ok(origin) = std::env::var("QBC_WORKER_ORIGIN") {
      config.origin = origin;
    }
    if let Ok(dir) = std::env::var("QBC_WORKER_DATA_DIR") {
      config.data_dir = Some(PathBuf::from(dir));
    }

    // Fail early on a bad origin rather than on the first request
    config.origin_url()?;
    if config.request_timeout_secs == 0 {
      return Err(eyre!("request_timeout_secs must be at least 1"));
    }

    Ok(config)
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("qbc-worker.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("qbc-worker").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn from_yaml(contents: &str) -> Result<Self> {
    Ok(serde_yaml::from_str(contents)?)
  }

  /// The worker's own origin as a parsed URL.
  pub fn origin_url(&self) -> Result<Url> {
    Url::parse(&self.origin).map_err(|e| eyre!("Invalid origin '{}': {}", self.origin, e))
  }

  pub fn request_timeout(&self) -> Duration {
    Duration::from_secs(self.request_timeout_secs)
  }

  /// Resolve a path or absolute URL against the origin.
  pub fn resolve(&self, path: &str) -> Result<Url> {
    self
      .origin_url()?
      .join(path)
      .map_err(|e| eyre!("Invalid URL '{}': {}", path, e))
  }

  /// Path of the SQLite database holding caches, the queue and sync tags.
  pub fn database_path(&self) -> Result<PathBuf> {
    let dir = match &self.data_dir {
      Some(dir) => dir.clone(),
      None => dirs::data_dir()
        .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
        .ok_or_else(|| eyre!("Could not determine data directory"))?
        .join("qbc-worker"),
    };

    Ok(dir.join("worker.db"))
  }
}
