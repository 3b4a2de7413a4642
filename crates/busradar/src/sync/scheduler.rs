//! Rate-limited driving of [`StopSync`] from a stream of triggers.
//!
//! Location fixes and map pans arrive far more often than the API should be
//! hit. The scheduler coalesces them: at most one network fetch is in flight
//! or scheduled at any time, and a trigger arriving inside the cooldown
//! replaces the scheduled fetch instead of queuing behind it.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::{self, Instant};
use tracing::{debug, info, trace, warn};

use super::{StopSync, Throttle};
use crate::api::Transport;
use crate::config::SyncConfig;
use crate::error::Result;
use crate::model::{NearbyQuery, Stop};

/// What caused a sync request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerKind {
    /// A new location fix.
    GpsFix,
    /// The user moved the map.
    Pan,
    /// The user asked for fresh data; no cached read is done.
    Refresh,
}

/// A request to bring the nearby-stop list up to date.
#[derive(Debug, Clone)]
pub struct SyncTrigger {
    /// What caused the request.
    pub kind: TriggerKind,
    /// Where to look.
    pub query: NearbyQuery,
}

impl SyncTrigger {
    /// A trigger for a new location fix.
    #[must_use]
    pub fn gps_fix(query: NearbyQuery) -> Self {
        Self {
            kind: TriggerKind::GpsFix,
            query,
        }
    }

    /// A trigger for a map pan.
    #[must_use]
    pub fn pan(query: NearbyQuery) -> Self {
        Self {
            kind: TriggerKind::Pan,
            query,
        }
    }

    /// A trigger for an explicit refresh.
    #[must_use]
    pub fn refresh(query: NearbyQuery) -> Self {
        Self {
            kind: TriggerKind::Refresh,
            query,
        }
    }
}

/// Where the stops in a [`SyncEvent`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventSource {
    /// The local cache.
    Cache,
    /// The transit API.
    Network,
}

/// The outcome of one cached read or network fetch.
#[derive(Debug)]
pub struct SyncEvent {
    /// Assigned when the operation started; later operations get larger
    /// numbers, whatever order they finish in.
    pub seq: u64,
    /// Cache or network.
    pub source: EventSource,
    /// The query the operation answered, with defaults filled in.
    pub query: NearbyQuery,
    /// The stops, sorted by proximity, or why there are none.
    pub result: Result<Vec<Stop>>,
}

/// Turns [`SyncTrigger`]s into rate-limited [`StopSync`] calls.
#[derive(Debug)]
pub struct SyncScheduler<T> {
    sync: Arc<StopSync<T>>,
    fetch_throttle: Throttle,
    cache_throttle: Throttle,
    radius_m: u32,
    max_count: u32,
    next_seq: u64,
}

impl<T: Transport + 'static> SyncScheduler<T> {
    /// Create a scheduler using the cooldowns and defaults from `config`.
    #[must_use]
    pub fn new(sync: Arc<StopSync<T>>, config: &SyncConfig) -> Self {
        Self {
            sync,
            fetch_throttle: Throttle::new(config.fetch_cooldown()),
            cache_throttle: Throttle::new(config.cache_cooldown()),
            radius_m: config.radius_m,
            max_count: config.max_count,
            next_seq: 0,
        }
    }

    /// Spawn the scheduler on the current runtime.
    ///
    /// Returns the trigger sender and the event receiver. Dropping either
    /// stops the scheduler.
    pub fn spawn(
        self,
        buffer: usize,
    ) -> (
        mpsc::Sender<SyncTrigger>,
        mpsc::Receiver<SyncEvent>,
        tokio::task::JoinHandle<()>,
    ) {
        let (trigger_tx, trigger_rx) = mpsc::channel(buffer);
        let (event_tx, event_rx) = mpsc::channel(buffer);
        let handle = tokio::spawn(self.run(trigger_rx, event_tx));
        (trigger_tx, event_rx, handle)
    }

    /// Process triggers until the trigger stream ends or nobody listens for
    /// events any more.
    ///
    /// Work still in flight at that point is aborted and its result
    /// discarded.
    pub async fn run(
        mut self,
        mut triggers: mpsc::Receiver<SyncTrigger>,
        events: mpsc::Sender<SyncEvent>,
    ) {
        let mut pending_fetch: Option<NearbyQuery> = None;
        let mut pending_read: Option<NearbyQuery> = None;
        let mut fetches: JoinSet<SyncEvent> = JoinSet::new();
        let mut reads: JoinSet<SyncEvent> = JoinSet::new();

        info!("Sync scheduler started");
        loop {
            let now = Instant::now();
            // A new fetch waits for the previous one to finish as well as
            // for the cooldown
            let fetch_at = pending_fetch
                .as_ref()
                .filter(|_| fetches.is_empty())
                .map(|_| self.fetch_throttle.next_slot(now));
            let read_at = pending_read
                .as_ref()
                .map(|_| self.cache_throttle.next_slot(now));

            tokio::select! {
                biased;

                () = events.closed() => {
                    debug!("Event receiver dropped");
                    break;
                }
                Some(joined) = reads.join_next(), if !reads.is_empty() => {
                    if !Self::forward(joined, &events).await {
                        break;
                    }
                }
                Some(joined) = fetches.join_next(), if !fetches.is_empty() => {
                    if !Self::forward(joined, &events).await {
                        break;
                    }
                }
                () = time::sleep_until(read_at.unwrap_or(now)), if read_at.is_some() => {
                    if let Some(query) = pending_read.take() {
                        self.cache_throttle.mark(Instant::now());
                        let seq = self.next_seq();
                        let sync = Arc::clone(&self.sync);
                        let bbox = query.bounding_box(self.radius_m);
                        trace!(seq, "Starting cached read");
                        reads.spawn(async move {
                            SyncEvent {
                                seq,
                                source: EventSource::Cache,
                                result: sync.read_cached(bbox).await,
                                query,
                            }
                        });
                    }
                }
                () = time::sleep_until(fetch_at.unwrap_or(now)), if fetch_at.is_some() => {
                    if let Some(query) = pending_fetch.take() {
                        self.fetch_throttle.mark(Instant::now());
                        let seq = self.next_seq();
                        let sync = Arc::clone(&self.sync);
                        debug!(seq, center = %query.center, "Starting network fetch");
                        fetches.spawn(async move {
                            let result = sync.fetch_nearby(&query).await;
                            SyncEvent {
                                seq,
                                source: EventSource::Network,
                                query,
                                result,
                            }
                        });
                    }
                }
                trigger = triggers.recv() => {
                    let Some(trigger) = trigger else {
                        debug!("Trigger stream closed");
                        break;
                    };
                    self.accept(trigger, &mut pending_fetch, &mut pending_read);
                }
            }
        }

        fetches.abort_all();
        reads.abort_all();
        info!("Sync scheduler stopped");
    }

    fn accept(
        &self,
        trigger: SyncTrigger,
        pending_fetch: &mut Option<NearbyQuery>,
        pending_read: &mut Option<NearbyQuery>,
    ) {
        let SyncTrigger { kind, query } = trigger;
        let query = self.with_defaults(query);
        trace!(?kind, center = %query.center, "Trigger received");

        if kind != TriggerKind::Refresh {
            *pending_read = Some(query.clone());
        }
        if pending_fetch.replace(query).is_some() {
            debug!("Replaced scheduled fetch with newer query");
        }
    }

    fn with_defaults(&self, mut query: NearbyQuery) -> NearbyQuery {
        if query.radius_m.is_none() {
            query.radius_m = Some(self.radius_m);
        }
        if query.max_count.is_none() {
            query.max_count = Some(self.max_count);
        }
        query
    }

    fn next_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    /// Send a finished operation on. Returns `false` once the receiver is gone.
    async fn forward(
        joined: std::result::Result<SyncEvent, tokio::task::JoinError>,
        events: &mpsc::Sender<SyncEvent>,
    ) -> bool {
        match joined {
            Ok(event) => events.send(event).await.is_ok(),
            Err(e) => {
                warn!(error = %e, "Sync task did not complete");
                true
            }
        }
    }
}
