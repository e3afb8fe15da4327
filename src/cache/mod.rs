//! Versioned static asset cache.
//!
//! Exactly one named cache is current at a time (`{app_name}-{version}`).
//! It is populated from a fixed manifest at install, grows opportunistically
//! while serving sub-resource GETs, and every other cache is deleted when the
//! worker activates.

mod storage;
mod store;
mod version;

#[cfg(test)]
pub use storage::CacheStorage;
pub use storage::SqliteStorage;
pub use store::CacheStore;
pub use version::{CacheVersion, BUILD_VERSION};
