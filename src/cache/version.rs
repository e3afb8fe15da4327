use std::fmt;

/// Version string injected by `build.rs` as `MAJOR.MINOR.PATCH-<rev>`.
pub const BUILD_VERSION: &str = env!("QBC_BUILD_VERSION");

/// Identifies the current generation of cached assets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheVersion {
  app_name: String,
  version: String,
}

impl CacheVersion {
  pub fn new(app_name: impl Into<String>, version: impl Into<String>) -> Self {
    Self {
      app_name: app_name.into(),
      version: version.into(),
    }
  }

  /// The version compiled into this binary, unless overridden.
  pub fn current(app_name: &str, version_override: Option<&str>) -> Self {
    Self::new(app_name, version_override.unwrap_or(BUILD_VERSION))
  }

  /// Name of the cache holding this generation's assets.
  pub fn cache_name(&self) -> String {
    format!("{}-{}", self.app_name, self.version)
  }
}

impl fmt::Display for CacheVersion {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.cache_name())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn cache_name_joins_app_and_version() {
    let version = CacheVersion::new("questbycycle", "1.4.0-a1b2c3d");
    assert_eq!(version.cache_name(), "questbycycle-1.4.0-a1b2c3d");
  }

  #[test]
  fn build_version_has_revision_suffix() {
    let (semver, rev) = BUILD_VERSION.split_once('-').unwrap();
    assert_eq!(semver.split('.').count(), 3);
    assert!(rev == "dev" || (rev.len() == 7 && rev.chars().all(|c| c.is_ascii_hexdigit())));
  }

  #[test]
  fn override_wins_over_build_version() {
    let version = CacheVersion::current("questbycycle", Some("2.0.0-dev"));
    assert_eq!(version.cache_name(), "questbycycle-2.0.0-dev");
  }
}
