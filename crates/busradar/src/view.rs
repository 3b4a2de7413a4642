//! What the nearby-stops screen shows.

use tracing::{debug, warn};

use crate::markers::{MapSurface, MarkerSet, ReconcileReport};
use crate::model::{NearbyQuery, Stop};
use crate::sync::{EventSource, SyncEvent};

/// The result of feeding one [`SyncEvent`] into [`NearbyState`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Applied {
    /// The list was replaced and markers reconciled.
    Updated {
        /// Where the new list came from.
        source: EventSource,
        /// What reconciliation did.
        report: ReconcileReport,
    },
    /// Something newer or fresher is already shown; the event was dropped.
    Stale,
    /// The operation failed; the previous list is kept.
    Failed,
}

/// The event behind the list on screen.
#[derive(Debug, Clone)]
struct Shown {
    source: EventSource,
    query: NearbyQuery,
}

/// Displayed stop list, its markers and the latest error message.
///
/// Network results are ordered only against other network results. A
/// cached read is shown only if it started after the last network result on
/// screen and that result answered a different query.
#[derive(Debug, Default)]
pub struct NearbyState {
    stops: Vec<Stop>,
    markers: MarkerSet,
    error: Option<String>,
    last_network: Option<u64>,
    last_cache: Option<u64>,
    shown: Option<Shown>,
}

impl NearbyState {
    /// Empty state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The stops on screen, closest first.
    #[must_use]
    pub fn stops(&self) -> &[Stop] {
        &self.stops
    }

    /// The markers on the surface.
    #[must_use]
    pub fn markers(&self) -> &MarkerSet {
        &self.markers
    }

    /// The error to show, if the last operation failed.
    #[must_use]
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Take the error for one-shot display.
    pub fn take_error(&mut self) -> Option<String> {
        self.error.take()
    }

    /// Where the shown list came from.
    #[must_use]
    pub fn source(&self) -> Option<EventSource> {
        self.shown.as_ref().map(|shown| shown.source)
    }

    fn is_stale(&self, seq: u64, source: EventSource, query: &NearbyQuery) -> bool {
        let before = |last: Option<u64>| last.is_some_and(|last| seq < last);
        match source {
            EventSource::Network => before(self.last_network),
            EventSource::Cache => {
                before(self.last_cache)
                    || before(self.last_network)
                    || self.shown.as_ref().is_some_and(|shown| {
                        shown.source == EventSource::Network && shown.query == *query
                    })
            }
        }
    }

    /// Fold `event` into the state and update `surface` to match.
    ///
    /// Stale events are dropped whether they succeeded or failed. A failure
    /// keeps the last good list.
    pub fn apply(&mut self, event: SyncEvent, surface: &mut dyn MapSurface) -> Applied {
        let SyncEvent {
            seq,
            source,
            query,
            result,
        } = event;

        if self.is_stale(seq, source, &query) {
            debug!(seq, ?source, "Dropping stale result");
            return Applied::Stale;
        }

        match result {
            Ok(stops) => {
                let report = self.markers.reconcile(&stops, surface);
                self.stops = stops;
                self.error = None;
                match source {
                    EventSource::Network => self.last_network = Some(seq),
                    EventSource::Cache => self.last_cache = Some(seq),
                }
                self.shown = Some(Shown { source, query });
                Applied::Updated { source, report }
            }
            Err(e) => {
                warn!(seq, ?source, error = %e, "Nearby stops unavailable");
                self.error = Some(e.to_string());
                Applied::Failed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::markers::tests::{stop, RecordingSurface};
    use crate::sync::tests::query_at;

    fn here() -> NearbyQuery {
        query_at(48.20, 16.37)
    }

    fn there() -> NearbyQuery {
        query_at(48.30, 16.47)
    }

    fn event(seq: u64, source: EventSource, query: NearbyQuery, stops: Vec<Stop>) -> SyncEvent {
        SyncEvent {
            seq,
            source,
            query,
            result: Ok(stops),
        }
    }

    fn success(seq: u64, stops: Vec<Stop>) -> SyncEvent {
        event(seq, EventSource::Network, here(), stops)
    }

    fn failure(seq: u64) -> SyncEvent {
        SyncEvent {
            seq,
            source: EventSource::Network,
            query: here(),
            result: Err(Error::Status {
                status: 503,
                url: "stops/nearby".to_string(),
            }),
        }
    }

    #[test]
    fn test_success_replaces_list_and_markers() {
        let mut state = NearbyState::new();
        let mut surface = RecordingSurface::default();

        let applied = state.apply(success(0, vec![stop("a", 48.1, 16.4)]), &mut surface);
        assert!(matches!(applied, Applied::Updated { .. }));
        assert_eq!(state.stops().len(), 1);
        assert_eq!(state.markers().len(), 1);
        assert_eq!(state.source(), Some(EventSource::Network));
    }

    #[test]
    fn test_failure_keeps_last_good_list() {
        let mut state = NearbyState::new();
        let mut surface = RecordingSurface::default();
        state.apply(success(0, vec![stop("a", 48.1, 16.4)]), &mut surface);

        assert_eq!(state.apply(failure(1), &mut surface), Applied::Failed);
        assert_eq!(state.stops().len(), 1);
        assert_eq!(state.markers().len(), 1);
        assert!(state.error().unwrap().contains("503"));

        state.apply(success(2, vec![]), &mut surface);
        assert!(state.error().is_none());
        assert!(state.markers().is_empty());
    }

    #[test]
    fn test_stale_network_completion_is_dropped() {
        let mut state = NearbyState::new();
        let mut surface = RecordingSurface::default();

        state.apply(success(5, vec![stop("new", 48.1, 16.4)]), &mut surface);
        let applied = state.apply(success(3, vec![stop("old", 48.2, 16.3)]), &mut surface);

        assert_eq!(applied, Applied::Stale);
        assert_eq!(state.stops()[0].id(), "new");
        assert_eq!(state.apply(failure(4), &mut surface), Applied::Stale);
        assert!(state.error().is_none());
    }

    #[test]
    fn test_network_result_is_kept_after_newer_cache_read() {
        let mut state = NearbyState::new();
        let mut surface = RecordingSurface::default();

        // The fetch started first, then a pan read an empty cache
        let cached = event(1, EventSource::Cache, there(), vec![]);
        assert!(matches!(
            state.apply(cached, &mut surface),
            Applied::Updated { .. }
        ));

        let fetched = event(
            0,
            EventSource::Network,
            here(),
            vec![stop("a", 48.2, 16.37), stop("b", 48.2, 16.38)],
        );
        assert!(matches!(
            state.apply(fetched, &mut surface),
            Applied::Updated {
                source: EventSource::Network,
                ..
            }
        ));
        assert_eq!(state.stops().len(), 2);
        assert_eq!(state.markers().len(), 2);
    }

    #[test]
    fn test_cache_never_replaces_network_answer_for_same_query() {
        let mut state = NearbyState::new();
        let mut surface = RecordingSurface::default();
        state.apply(success(1, vec![stop("a", 48.2, 16.37)]), &mut surface);

        let cached = event(2, EventSource::Cache, here(), vec![]);
        assert_eq!(state.apply(cached, &mut surface), Applied::Stale);
        assert_eq!(state.stops().len(), 1);
    }

    #[test]
    fn test_cache_read_started_before_shown_fetch_is_dropped() {
        let mut state = NearbyState::new();
        let mut surface = RecordingSurface::default();
        state.apply(success(4, vec![stop("a", 48.2, 16.37)]), &mut surface);

        let cached = event(3, EventSource::Cache, there(), vec![]);
        assert_eq!(state.apply(cached, &mut surface), Applied::Stale);
    }

    #[test]
    fn test_cache_read_for_new_area_replaces_network_list() {
        let mut state = NearbyState::new();
        let mut surface = RecordingSurface::default();
        state.apply(success(1, vec![stop("a", 48.2, 16.37)]), &mut surface);

        let cached = event(2, EventSource::Cache, there(), vec![stop("b", 48.3, 16.47)]);
        assert!(matches!(
            state.apply(cached, &mut surface),
            Applied::Updated {
                source: EventSource::Cache,
                ..
            }
        ));
        assert_eq!(state.stops()[0].id(), "b");

        // Older cache reads stay behind newer ones
        let older = event(1, EventSource::Cache, here(), vec![]);
        assert_eq!(state.apply(older, &mut surface), Applied::Stale);
    }

    #[test]
    fn test_take_error_clears_it() {
        let mut state = NearbyState::new();
        let mut surface = RecordingSurface::default();
        state.apply(failure(0), &mut surface);

        assert!(state.take_error().is_some());
        assert!(state.error().is_none());
    }
}
