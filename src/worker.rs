//! The worker process: owns every component and dispatches lifecycle events.

use color_eyre::Result;
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::cache::{CacheStore, CacheVersion, SqliteStorage};
use crate::clients::{ClientMessage, Clients};
use crate::config::Config;
use crate::db::Database;
use crate::drainer::{DrainReport, QueueDrainer};
use crate::event::{EventOutcome, WorkerEvent};
use crate::http::{Fetcher, Request, Response};
use crate::interceptor::RequestInterceptor;
use crate::lifecycle::{Lifecycle, LifecycleStore, WorkerState};
use crate::push::{Notifier, PushHandler};
use crate::queue::DurableQueue;
use crate::sync::{SyncManager, PERIODIC_NOTIFICATIONS, SYNC_NOTIFICATIONS, SYNC_REQUESTS};

pub struct Worker {
  manifest: Vec<Url>,
  unread_endpoint: Url,
  cache: Arc<CacheStore<SqliteStorage>>,
  queue: DurableQueue,
  sync: SyncManager,
  interceptor: RequestInterceptor,
  drainer: QueueDrainer,
  clients: Clients,
  push: PushHandler,
  fetcher: Arc<dyn Fetcher>,
  saved: LifecycleStore,
  state: Mutex<WorkerState>,
}

impl Worker {
  pub fn new(
    config: &Config,
    db: Arc<Database>,
    fetcher: Arc<dyn Fetcher>,
    notifier: Arc<dyn Notifier>,
  ) -> Result<Self> {
    let origin = config.origin_url()?;
    let version = CacheVersion::current(&config.app_name, config.version.as_deref());
    let manifest = config
      .manifest
      .iter()
      .map(|path| config.resolve(path))
      .collect::<Result<Vec<_>>>()?;

    let saved = LifecycleStore::new(Arc::clone(&db), version.cache_name());
    let state = saved.load()?;

    let cache = Arc::new(CacheStore::new(
      SqliteStorage::new(Arc::clone(&db)),
      Arc::clone(&fetcher),
      version,
    ));
    let queue = DurableQueue::open(Arc::clone(&db))?;
    let sync = SyncManager::new(db);

    let interceptor = RequestInterceptor::new(
      origin.clone(),
      config.resolve(&config.offline_page)?,
      Arc::clone(&cache),
      queue.clone(),
      config.background_sync.then(|| sync.clone()),
      Arc::clone(&fetcher),
    );
    let drainer = QueueDrainer::new(queue.clone(), Arc::clone(&fetcher));
    let push = PushHandler::new(
      notifier,
      origin,
      config.notifications.default_title.clone(),
      config.notifications.landing_route.clone(),
      config.notifications.icon.clone(),
    );

    Ok(Self {
      manifest,
      unread_endpoint: config.resolve(&config.notifications.unread_endpoint)?,
      cache,
      queue,
      sync,
      interceptor,
      drainer,
      clients: Clients::new(),
      push,
      fetcher,
      saved,
      state: Mutex::new(state),
    })
  }

  pub fn cache_name(&self) -> String {
    self.cache.name()
  }

  pub fn queue(&self) -> &DurableQueue {
    &self.queue
  }

  pub fn sync_manager(&self) -> &SyncManager {
    &self.sync
  }

  pub fn clients(&self) -> &Clients {
    &self.clients
  }

  pub fn lifecycle(&self) -> Lifecycle {
    self.current_state().lifecycle
  }

  fn current_state(&self) -> WorkerState {
    *self.state.lock().unwrap_or_else(|e| e.into_inner())
  }

  /// Apply a state change and persist it.
  fn transition<T>(&self, f: impl FnOnce(&mut WorkerState) -> T) -> Result<T> {
    let (result, state) = {
      let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
      let result = f(&mut state);
      (result, *state)
    };
    self.saved.save(&state)?;
    Ok(result)
  }

  pub async fn dispatch(&self, event: WorkerEvent) -> Result<EventOutcome> {
    match event {
      WorkerEvent::Install => Ok(EventOutcome::Installed {
        cached: self.install().await?,
      }),
      WorkerEvent::Activate => Ok(EventOutcome::Activated {
        evicted: self.activate()?,
      }),
      WorkerEvent::Message(raw) => {
        self.on_message(&raw)?;
        Ok(EventOutcome::Ignored)
      }
      WorkerEvent::Fetch(request) => Ok(EventOutcome::Fetched(self.on_fetch(&request).await)),
      WorkerEvent::Sync(tag) => self.on_sync(&tag).await,
      WorkerEvent::PeriodicSync(tag) => self.on_periodic_sync(&tag).await,
      WorkerEvent::Push(payload) => Ok(EventOutcome::Shown(self.push.on_push(&payload).await?)),
      WorkerEvent::NotificationClick(notification) => Ok(EventOutcome::Opened(
        self.push.on_click(&notification).await?,
      )),
    }
  }

  /// Populate the current cache from the manifest.
  ///
  /// A failed population is logged and leaves the cache empty; installation
  /// still succeeds. The worker then waits for activation unless a
  /// skip-waiting request already arrived. Installing an already active
  /// version only refreshes its cache.
  pub async fn install(&self) -> Result<usize> {
    let active = self.lifecycle() == Lifecycle::Activated;
    if !active {
      self.transition(|s| s.lifecycle = Lifecycle::Installing)?;
    }
    info!(cache = %self.cache.name(), "installing");

    let cached = match self.cache.populate(&self.manifest).await {
      Ok(count) => count,
      Err(e) => {
        error!(error = %e, "failed to populate cache");
        0
      }
    };

    if active {
      return Ok(cached);
    }

    let skip_waiting = self.transition(|s| {
      s.lifecycle = Lifecycle::Installed;
      s.skip_waiting
    })?;
    if skip_waiting {
      self.activate()?;
    }

    Ok(cached)
  }

  /// Delete stale caches and tell open pages when something changed.
  pub fn activate(&self) -> Result<bool> {
    let evicted = self.cache.evict_stale()?;
    self.transition(|s| s.lifecycle = Lifecycle::Activated)?;
    info!(cache = %self.cache.name(), evicted, "activated");

    if evicted {
      if let Err(e) = self.clients.notify_update() {
        warn!(error = %e, "failed to notify clients of update");
      }
    }

    Ok(evicted)
  }

  pub fn on_message(&self, raw: &str) -> Result<()> {
    match ClientMessage::parse(raw) {
      Some(ClientMessage::SkipWaiting) => self.skip_waiting(),
      None => {
        debug!(message = raw, "ignoring unknown client message");
        Ok(())
      }
    }
  }

  /// Activate as soon as installation finishes, or now if already waiting.
  pub fn skip_waiting(&self) -> Result<()> {
    let waiting = self.transition(|s| {
      s.skip_waiting = true;
      s.lifecycle == Lifecycle::Installed
    })?;
    if waiting {
      self.activate()?;
    }
    Ok(())
  }

  /// Intercept a page request. `None` means it was not handled.
  pub async fn on_fetch(&self, request: &Request) -> Option<Response> {
    match self.interceptor.handle(request).await {
      Ok(response) => response,
      Err(e) => {
        error!(method = %request.method, url = %request.url, error = %e, "failed to handle request");
        Some(Response::network_error())
      }
    }
  }

  /// Handle a one-shot sync. The registration is cleared once nothing is
  /// left for it to do.
  pub async fn on_sync(&self, tag: &str) -> Result<EventOutcome> {
    let outcome = self.run_sync_tag(tag).await?;

    let finished = !matches!(outcome, EventOutcome::Drained(DrainReport { failed, .. }) if failed > 0);
    if finished {
      self.sync.clear(tag)?;
    }

    Ok(outcome)
  }

  pub async fn on_periodic_sync(&self, tag: &str) -> Result<EventOutcome> {
    self.run_sync_tag(tag).await
  }

  /// Fire every pending sync registration, as on connectivity restore.
  pub async fn sync_pending(&self) -> Result<Vec<(String, EventOutcome)>> {
    let mut outcomes = Vec::new();
    for tag in self.sync.pending()? {
      match self.on_sync(&tag).await {
        Ok(outcome) => outcomes.push((tag, outcome)),
        Err(e) => error!(tag = %tag, error = %e, "sync failed, leaving it registered"),
      }
    }
    Ok(outcomes)
  }

  async fn run_sync_tag(&self, tag: &str) -> Result<EventOutcome> {
    match tag {
      SYNC_REQUESTS => Ok(EventOutcome::Drained(self.drainer.drain().await?)),
      SYNC_NOTIFICATIONS | PERIODIC_NOTIFICATIONS => {
        self.refresh_unread_count().await;
        Ok(EventOutcome::Synced)
      }
      other => {
        debug!(tag = other, "ignoring unknown sync tag");
        Ok(EventOutcome::Ignored)
      }
    }
  }

  async fn refresh_unread_count(&self) {
    let request = Request::get(self.unread_endpoint.clone());
    match self.fetcher.fetch(&request).await {
      Ok(response) => debug!(status = response.status, "refreshed unread count"),
      Err(e) => warn!(error = %e, "failed to refresh unread count"),
    }
  }
}
