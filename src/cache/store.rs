use color_eyre::{eyre::eyre, Result};
use futures::future::try_join_all;
use std::sync::Arc;
use tracing::{debug, info};
use url::Url;

use super::storage::CacheStorage;
use super::version::CacheVersion;
use crate::http::{Destination, Fetcher, Method, Request, Response};

/// Owns the current named cache and the policy for what goes into it.
pub struct CacheStore<S: CacheStorage> {
  storage: Arc<S>,
  fetcher: Arc<dyn Fetcher>,
  version: CacheVersion,
}

impl<S: CacheStorage> CacheStore<S> {
  pub fn new(storage: S, fetcher: Arc<dyn Fetcher>, version: CacheVersion) -> Self {
    Self {
      storage: Arc::new(storage),
      fetcher,
      version,
    }
  }

  /// Name of the current cache.
  pub fn name(&self) -> String {
    self.version.cache_name()
  }

  /// Fetch every manifest URL and store the responses in the current cache.
  ///
  /// The batch is all-or-nothing: if any fetch fails or answers with a
  /// non-2xx status nothing is stored and the error is returned. The cache
  /// itself is opened either way.
  pub async fn populate(&self, manifest: &[Url]) -> Result<usize> {
    let name = self.name();
    self.storage.open_cache(&name)?;

    let fetches = manifest.iter().map(|url| {
      let request = Request::get(url.clone()).with_destination(Destination::from_path(url.path()));
      async move {
        let response = self.fetcher.fetch(&request).await?;
        if !response.ok() {
          return Err(eyre!(
            "Request for {} failed with status {}",
            request.url,
            response.status
          ));
        }
        Ok::<_, color_eyre::Report>((request, response))
      }
    });

    let entries = try_join_all(fetches).await?;
    self.storage.put_all(&name, &entries)?;

    info!(cache = %name, count = entries.len(), "populated cache");
    Ok(entries.len())
  }

  /// Delete every cache except the current one.
  ///
  /// Returns whether at least one cache was deleted.
  pub fn evict_stale(&self) -> Result<bool> {
    let current = self.name();
    let mut evicted = false;

    for name in self.storage.cache_names()? {
      if name != current && self.storage.delete_cache(&name)? {
        info!(cache = %name, "deleted stale cache");
        evicted = true;
      }
    }

    Ok(evicted)
  }

  /// Match a request against the current cache.
  pub fn lookup(&self, request: &Request) -> Result<Option<Response>> {
    let entry = self
      .storage
      .get(&self.name(), request.method, request.url.as_str())?;

    if let Some(entry) = &entry {
      debug!(url = %request.url, cached_at = %entry.cached_at, "cache hit");
    }
    Ok(entry.map(|entry| entry.response))
  }

  /// Store a network response if the cache policy allows it.
  ///
  /// Returns whether anything was written.
  pub fn store(&self, request: &Request, response: &Response) -> Result<bool> {
    if !is_cacheable(request, response) {
      return Ok(false);
    }

    self
      .storage
      .put_all(&self.name(), &[(request.clone(), response.clone())])?;
    debug!(url = %request.url, "cached response");
    Ok(true)
  }
}

/// GETs for styles, scripts, images and fonts, excluding partial content.
pub fn is_cacheable(request: &Request, response: &Response) -> bool {
  request.method == Method::Get
    && response.status != 206
    && matches!(
      request.destination,
      Destination::Style | Destination::Script | Destination::Image | Destination::Font
    )
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::SqliteStorage;
  use crate::db::Database;
  use crate::testing::MockFetcher;

  fn url(path: &str) -> Url {
    Url::parse("http://localhost:5000").unwrap().join(path).unwrap()
  }

  fn store_with(
    db: &Arc<Database>,
    fetcher: &Arc<MockFetcher>,
    version: &str,
  ) -> CacheStore<SqliteStorage> {
    CacheStore::new(
      SqliteStorage::new(Arc::clone(db)),
      fetcher.clone(),
      CacheVersion::new("questbycycle", version),
    )
  }

  #[tokio::test]
  async fn populate_then_lookup() {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let fetcher = Arc::new(MockFetcher::new());
    fetcher.respond("/offline.html", Response::new(200, "<h1>Offline</h1>"));
    fetcher.respond("/static/dist/style.css", Response::new(200, "body{}"));
    let store = store_with(&db, &fetcher, "1.0.0-dev");

    let count = store
      .populate(&[url("/offline.html"), url("/static/dist/style.css")])
      .await
      .unwrap();

    assert_eq!(count, 2);
    let hit = store.lookup(&Request::get(url("/offline.html"))).unwrap().unwrap();
    assert_eq!(hit.text(), "<h1>Offline</h1>");
    assert!(store.lookup(&Request::get(url("/missing.js"))).unwrap().is_none());
  }

  #[tokio::test]
  async fn populate_is_all_or_nothing() {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let fetcher = Arc::new(MockFetcher::new());
    fetcher.respond("/offline.html", Response::new(200, "offline"));
    fetcher.respond("/static/dist/main.js", Response::new(404, "nope"));
    let store = store_with(&db, &fetcher, "1.0.0-dev");

    let result = store
      .populate(&[url("/offline.html"), url("/static/dist/main.js")])
      .await;

    assert!(result.is_err());
    assert!(store.lookup(&Request::get(url("/offline.html"))).unwrap().is_none());
    // The cache is still current, just empty
    assert!(!store.evict_stale().unwrap());
  }

  #[tokio::test]
  async fn populate_fails_when_offline() {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let fetcher = Arc::new(MockFetcher::new());
    fetcher.respond("/offline.html", Response::new(200, "offline"));
    fetcher.set_offline(true);
    let store = store_with(&db, &fetcher, "1.0.0-dev");

    assert!(store.populate(&[url("/offline.html")]).await.is_err());
  }

  #[tokio::test]
  async fn activation_evicts_only_stale_versions() {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let fetcher = Arc::new(MockFetcher::new());
    fetcher.respond("/offline.html", Response::new(200, "offline"));

    let v1 = store_with(&db, &fetcher, "1.0.0-aaaaaaa");
    v1.populate(&[url("/offline.html")]).await.unwrap();

    let v2 = store_with(&db, &fetcher, "1.1.0-bbbbbbb");
    v2.populate(&[url("/offline.html")]).await.unwrap();

    assert!(v2.evict_stale().unwrap());
    assert!(v2.lookup(&Request::get(url("/offline.html"))).unwrap().is_some());
    assert!(v1.lookup(&Request::get(url("/offline.html"))).unwrap().is_none());

    // Nothing left to evict
    assert!(!v2.evict_stale().unwrap());
  }

  #[test]
  fn cacheability_policy() {
    let ok = Response::new(200, "x");
    let partial = Response::new(206, "x");
    let script = Request::get(url("/a.js")).with_destination(Destination::Script);
    let api = Request::get(url("/api/quests"));
    let post = Request::new(Method::Post, url("/a.js")).with_destination(Destination::Script);
    let page = Request::get(url("/")).navigation();

    assert!(is_cacheable(&script, &ok));
    assert!(!is_cacheable(&script, &partial));
    assert!(!is_cacheable(&api, &ok));
    assert!(!is_cacheable(&post, &ok));
    assert!(!is_cacheable(&page, &ok));
  }

  #[tokio::test]
  async fn store_skips_uncacheable_responses() {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let fetcher = Arc::new(MockFetcher::new());
    let store = store_with(&db, &fetcher, "1.0.0-dev");

    let image = Request::get(url("/static/images/a.webp")).with_destination(Destination::Image);
    let json = Request::get(url("/api/quests"));

    assert!(store.store(&image, &Response::new(200, "img")).unwrap());
    assert!(!store.store(&json, &Response::new(200, "[]")).unwrap());
    assert!(store.lookup(&image).unwrap().is_some());
    assert!(store.lookup(&json).unwrap().is_none());
  }
}
