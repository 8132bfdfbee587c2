//! Periodic refresh of the cache.
//!
//! A tick syncs splits, then segments when enabled, then recomputes the full
//! projection and every subset projection that has been requested so far.
//! Failures are reported through the error hooks and never stop the loop;
//! the affected stream keeps its previous data.
//!
//! Ticks never overlap: the timer is re-armed only after a tick completes,
//! and ticks started by `poll` or `start` wait for the one in flight.
//! `stop` prevents further ticks; a tick already in flight is allowed to
//! finish.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock as HookLock};
use thiserror::Error;
use tokio::sync::{Mutex as TickLock, Notify, RwLock, RwLockReadGuard};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::{Cache, CacheStats, SubsetProjection};
use crate::client::ChangeFeedClient;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::preload::EMPTY_PROJECTION;
use crate::projection::{
    canonical_names, project, project_with_segments, subset_key, SegmentPolicy,
};
use crate::segments::{segment_usage, sync_segments, sync_segments_or_empty, SegmentSync};
use crate::splits::{sync_splits, Splits};

/// The independently synced data streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stream {
    Splits,
    Segments,
}

impl fmt::Display for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stream::Splits => f.write_str("split changes"),
            Stream::Segments => f.write_str("segment changes"),
        }
    }
}

/// A stream failed to sync during a tick.
#[derive(Debug, Error)]
#[error("error getting {stream}: {error}")]
pub struct PollError {
    pub stream: Stream,
    #[source]
    pub error: Error,
}

/// A stream was synced and merged into the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Update {
    pub stream: Stream,
    /// Splits or segments now in the cache.
    pub count: usize,
    /// Split feed cursor, for split updates.
    pub since: Option<i64>,
}

type ErrorHook = Box<dyn Fn(&PollError) + Send + Sync>;
type UpdateHook = Box<dyn Fn(&Update) + Send + Sync>;

/// Owns the cache and keeps it refreshed. Clones share the same state.
#[derive(Clone)]
pub struct Poller {
    inner: Arc<Inner>,
}

struct Inner {
    client: Arc<dyn ChangeFeedClient>,
    config: Config,
    cache: RwLock<Cache>,
    /// Held for the whole of a tick.
    tick: TickLock<()>,
    stopped: AtomicBool,
    generation: AtomicU64,
    shutdown: Notify,
    task: Mutex<Option<JoinHandle<()>>>,
    error_hooks: HookLock<Vec<ErrorHook>>,
    update_hooks: HookLock<Vec<UpdateHook>>,
}

impl Poller {
    pub fn new(client: Arc<dyn ChangeFeedClient>, config: Config) -> Self {
        Poller {
            inner: Arc::new(Inner {
                client,
                config,
                cache: RwLock::new(Cache::new()),
                tick: TickLock::new(()),
                stopped: AtomicBool::new(false),
                generation: AtomicU64::new(0),
                shutdown: Notify::new(),
                task: Mutex::new(None),
                error_hooks: HookLock::new(Vec::new()),
                update_hooks: HookLock::new(Vec::new()),
            }),
        }
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Registers a callback for sync failures.
    pub fn on_error(&self, hook: impl Fn(&PollError) + Send + Sync + 'static) {
        self.inner.error_hooks.write().push(Box::new(hook));
    }

    /// Registers a callback fired after a stream is merged into the cache.
    pub fn on_updated(&self, hook: impl Fn(&Update) + Send + Sync + 'static) {
        self.inner.update_hooks.write().push(Box::new(hook));
    }

    pub fn is_running(&self) -> bool {
        !self.inner.stopped.load(Ordering::SeqCst)
            && self
                .inner
                .task
                .lock()
                .as_ref()
                .is_some_and(|handle| !handle.is_finished())
    }

    /// Runs one full sync, then arms the periodic timer. Returns once the
    /// first sync has completed. Calling `start` on a running poller does
    /// nothing.
    pub async fn start(&self) -> Result<()> {
        self.inner.config.validate()?;
        if self.is_running() {
            debug!("poller already running");
            return Ok(());
        }

        self.inner.stopped.store(false, Ordering::SeqCst);
        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.refresh().await;

        if self.inner.is_cancelled(generation) {
            debug!("poller stopped during initial sync");
            return Ok(());
        }

        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(inner.run(generation));
        *self.inner.task.lock() = Some(handle);
        info!(
            interval_secs = self.inner.config.polling_interval_seconds,
            include_segments = self.inner.config.include_segments,
            "poller started"
        );
        Ok(())
    }

    /// Runs one tick now. Does nothing after [`stop`](Self::stop).
    pub async fn poll(&self) {
        if self.inner.stopped.load(Ordering::SeqCst) {
            debug!("poller stopped, skipping poll");
            return;
        }
        self.inner.refresh().await;
    }

    /// Cancels the timer. Safe to call repeatedly or before `start`.
    pub fn stop(&self) {
        self.inner.stopped.store(true, Ordering::SeqCst);
        self.inner.shutdown.notify_waiters();
        if self.inner.task.lock().take().is_some() {
            info!("poller stopped");
        }
    }

    /// Serialized projection of the whole cache, or of the named splits.
    ///
    /// Subset projections are computed on first request and kept fresh by
    /// every later tick. Never fails: on error the best available data, or
    /// `{}`, is returned.
    pub async fn serialized_data<S: AsRef<str>>(&self, splits: &[S]) -> String {
        if splits.is_empty() {
            return self
                .inner
                .cache
                .read()
                .await
                .serialized
                .clone()
                .unwrap_or_else(|| EMPTY_PROJECTION.to_string());
        }

        let key = subset_key(splits);
        let names = canonical_names(splits);
        if let Some(entry) = self.inner.cache.read().await.subsets.get(&key) {
            if entry.names == names {
                return entry.serialized.clone();
            }
        }

        let segments = if self.inner.resolves_per_subset() {
            let current = self.inner.current_splits().await;
            Some(self.inner.resolve_subset_segments(&current, &names).await)
        } else {
            None
        };

        let mut cache = self.inner.cache.write().await;
        let collides = match cache.subsets.get(&key) {
            Some(entry) if entry.names == names => return entry.serialized.clone(),
            Some(_) => true,
            None => false,
        };
        match render(&cache, &names, segments.as_ref()) {
            // Another subset owns this key; serve this one uncached.
            Ok(serialized) if collides => {
                debug!(subset = %key, "subset key collision, not caching");
                serialized
            }
            Ok(serialized) => {
                debug!(subset = %key, "caching subset projection");
                cache.subsets.insert(
                    key,
                    SubsetProjection {
                        names,
                        serialized: serialized.clone(),
                    },
                );
                serialized
            }
            Err(e) => {
                warn!(subset = %key, error = %e, "failed to serialize subset");
                EMPTY_PROJECTION.to_string()
            }
        }
    }

    /// Read access to the cache.
    pub async fn cache(&self) -> RwLockReadGuard<'_, Cache> {
        self.inner.cache.read().await
    }

    pub async fn stats(&self) -> CacheStats {
        self.inner.cache.read().await.stats()
    }
}

impl Inner {
    fn is_cancelled(&self, generation: u64) -> bool {
        self.stopped.load(Ordering::SeqCst) || self.generation.load(Ordering::SeqCst) != generation
    }

    fn resolves_per_subset(&self) -> bool {
        self.config.include_segments && self.config.segment_policy == SegmentPolicy::ResolvePerSubset
    }

    async fn run(self: Arc<Self>, generation: u64) {
        let interval = self.config.polling_interval();
        loop {
            // Registered before the check so a stop in between still wakes us.
            let shutdown = self.shutdown.notified();
            tokio::pin!(shutdown);
            shutdown.as_mut().enable();
            if self.is_cancelled(generation) {
                break;
            }

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = &mut shutdown => {}
            }
            if self.is_cancelled(generation) {
                break;
            }
            self.refresh().await;
        }
        debug!(generation, "poll loop exited");
    }

    async fn current_splits(&self) -> Splits {
        self.cache.read().await.splits.clone().unwrap_or_default()
    }

    async fn refresh(&self) {
        let _tick = self.tick.lock().await;
        let max_requests = self.config.max_sync_requests_per_cycle;
        let previous = self.current_splits().await;

        let split_sync = match sync_splits(self.client.as_ref(), &previous, max_requests).await {
            Ok(sync) => sync,
            Err(error) => {
                self.report(PollError {
                    stream: Stream::Splits,
                    error,
                });
                return;
            }
        };

        let usage = self
            .config
            .include_segments
            .then(|| segment_usage(split_sync.splits.values()));
        let update = Update {
            stream: Stream::Splits,
            count: split_sync.splits.len(),
            since: Some(split_sync.since),
        };
        self.cache.write().await.apply_splits(split_sync);
        self.notify(&update);

        if let Some(usage) = usage {
            match sync_segments(self.client.as_ref(), &usage.names, max_requests).await {
                Ok(segments) => {
                    let update = Update {
                        stream: Stream::Segments,
                        count: segments.len(),
                        since: None,
                    };
                    self.cache.write().await.apply_segments(SegmentSync {
                        segments,
                        using_segments_count: usage.using_segments_count,
                    });
                    self.notify(&update);
                }
                Err(error) => self.report(PollError {
                    stream: Stream::Segments,
                    error,
                }),
            }
        }

        self.reproject().await;
    }

    /// Recomputes the full projection and every cached subset.
    async fn reproject(&self) {
        // Per-subset segment data may need the network, so it is resolved
        // before the write lock is taken.
        let mut resolved: BTreeMap<String, SegmentSync> = BTreeMap::new();
        let per_subset = self.resolves_per_subset();
        if per_subset {
            let (subsets, current) = {
                let cache = self.cache.read().await;
                let subsets: Vec<(String, Vec<String>)> = cache
                    .subsets
                    .iter()
                    .map(|(key, entry)| (key.clone(), entry.names.clone()))
                    .collect();
                (subsets, cache.splits.clone().unwrap_or_default())
            };
            for (key, names) in subsets {
                let segments = self.resolve_subset_segments(&current, &names).await;
                resolved.insert(key, segments);
            }
        }

        let mut cache = self.cache.write().await;
        match project(&cache, &[]).and_then(|p| p.to_json()) {
            Ok(serialized) => cache.serialized = Some(serialized),
            Err(e) => warn!(error = %e, "failed to serialize cache"),
        }

        let keys: Vec<String> = cache.subsets.keys().cloned().collect();
        for key in keys {
            // Requested while segments were being resolved; already fresh.
            if per_subset && !resolved.contains_key(&key) {
                continue;
            }
            let Some(names) = cache.subsets.get(&key).map(|entry| entry.names.clone()) else {
                continue;
            };
            match render(&cache, &names, resolved.get(&key)) {
                Ok(serialized) => {
                    if let Some(entry) = cache.subsets.get_mut(&key) {
                        entry.serialized = serialized;
                    }
                }
                Err(e) => warn!(subset = %key, error = %e, "failed to serialize subset"),
            }
        }

        let stats = cache.stats();
        info!(
            splits = stats.splits,
            segments = stats.segments,
            since = ?stats.since,
            subsets = stats.subsets,
            "cache refreshed"
        );
    }

    async fn resolve_subset_segments(&self, current: &Splits, names: &[String]) -> SegmentSync {
        sync_segments_or_empty(
            self.client.as_ref(),
            names.iter().filter_map(|name| current.get(name)),
            self.config.max_sync_requests_per_cycle,
        )
        .await
    }

    fn report(&self, error: PollError) {
        warn!(stream = %error.stream, error = %error.error, "poll failed");
        for hook in self.error_hooks.read().iter() {
            hook(&error);
        }
    }

    fn notify(&self, update: &Update) {
        debug!(stream = %update.stream, count = update.count, "cache updated");
        for hook in self.update_hooks.read().iter() {
            hook(update);
        }
    }
}

fn render(cache: &Cache, names: &[String], segments: Option<&SegmentSync>) -> Result<String> {
    let projection = match segments {
        Some(segments) if cache.is_synced() => project_with_segments(cache, names, segments)?,
        _ => project(cache, names)?,
    };
    projection.to_json()
}
