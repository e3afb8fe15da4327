//! Routes every request from a controlled page through one of three policies.
//!
//! - mutating, non-navigation requests: network first, queue on failure
//! - navigations: network first, offline page on failure
//! - other same-origin GETs: cache first, network fallback, opportunistic caching

use color_eyre::Result;
use std::sync::Arc;
use tracing::{debug, warn};
use url::Url;

use crate::cache::{CacheStore, SqliteStorage};
use crate::http::{Fetcher, Method, Request, Response};
use crate::queue::{DurableQueue, QueuedRequest};
use crate::sync::{SyncManager, SYNC_REQUESTS};

/// How a request was (or was not) handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
  /// Not intercepted; the default network path applies
  Passthrough,
  Mutation,
  Navigation,
  CacheFirst,
}

pub struct RequestInterceptor {
  origin: Url,
  offline_page: Url,
  cache: Arc<CacheStore<SqliteStorage>>,
  queue: DurableQueue,
  /// None when the platform offers no background sync
  sync: Option<SyncManager>,
  fetcher: Arc<dyn Fetcher>,
}

impl RequestInterceptor {
  pub fn new(
    origin: Url,
    offline_page: Url,
    cache: Arc<CacheStore<SqliteStorage>>,
    queue: DurableQueue,
    sync: Option<SyncManager>,
    fetcher: Arc<dyn Fetcher>,
  ) -> Self {
    Self {
      origin,
      offline_page,
      cache,
      queue,
      sync,
      fetcher,
    }
  }

  /// Pick the policy for a request.
  pub fn classify(&self, request: &Request) -> Route {
    if !request.is_same_origin(&self.origin) {
      Route::Passthrough
    } else if request.method.is_mutating() && !request.navigate {
      Route::Mutation
    } else if request.navigate {
      Route::Navigation
    } else if request.method == Method::Get {
      Route::CacheFirst
    } else {
      Route::Passthrough
    }
  }

  /// Handle a request. `None` means the worker declines to respond.
  pub async fn handle(&self, request: &Request) -> Result<Option<Response>> {
    let response = match self.classify(request) {
      Route::Passthrough => {
        debug!(method = %request.method, url = %request.url, "passing request through");
        return Ok(None);
      }
      Route::Mutation => self.network_or_queue(request).await?,
      Route::Navigation => self.network_or_offline(request).await?,
      Route::CacheFirst => self.cache_first(request).await?,
    };

    Ok(Some(response))
  }

  async fn network_or_queue(&self, request: &Request) -> Result<Response> {
    match self.fetcher.fetch(request).await {
      Ok(response) => Ok(response),
      Err(e) => {
        warn!(method = %request.method, url = %request.url, error = %e, "network unreachable, queueing request");

        let key = self.queue.enqueue(&QueuedRequest::from_request(request)?)?;
        debug!(key, "request queued");

        if let Some(sync) = &self.sync {
          if let Err(e) = sync.register(SYNC_REQUESTS) {
            warn!(error = %e, "failed to register background sync");
          }
        }

        Ok(Response::queued())
      }
    }
  }

  async fn network_or_offline(&self, request: &Request) -> Result<Response> {
    match self.fetcher.fetch(request).await {
      Ok(response) => Ok(response),
      Err(e) => {
        warn!(url = %request.url, error = %e, "navigation failed, serving offline page");
        self.offline_fallback()
      }
    }
  }

  async fn cache_first(&self, request: &Request) -> Result<Response> {
    if let Some(cached) = self.cache.lookup(request)? {
      return Ok(cached);
    }

    match self.fetcher.fetch(request).await {
      Ok(response) => {
        if let Err(e) = self.cache.store(request, &response) {
          warn!(url = %request.url, error = %e, "failed to cache response");
        }
        Ok(response)
      }
      Err(e) => {
        warn!(url = %request.url, error = %e, "fetch failed, serving offline page");
        self.offline_fallback()
      }
    }
  }

  fn offline_fallback(&self) -> Result<Response> {
    let offline = Request::get(self.offline_page.clone());
    Ok(
      self
        .cache
        .lookup(&offline)?
        .unwrap_or_else(Response::network_error),
    )
  }
}
