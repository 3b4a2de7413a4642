//! Nearby-stop synchronization.
//!
//! [`StopSync`] fetches stops from the transit API, keeps the local cache
//! warm and serves cached stops when the network is unavailable. The
//! [`scheduler`] module rate-limits how often it is asked to do either.

pub mod scheduler;
pub mod throttle;

use std::fmt;
use std::sync::Arc;

use tracing::{debug, instrument, warn};

use crate::api::{TransitClient, Transport};
use crate::error::{Error, Result};
use crate::model::{dedup_by_id, sort_by_proximity, BoundingBox, Line, NearbyQuery, Stop};
use crate::storage::StopCache;

pub use scheduler::{EventSource, SyncEvent, SyncScheduler, SyncTrigger, TriggerKind};
pub use throttle::Throttle;

/// Fetches nearby stops and the lines serving a stop, and mirrors both
/// into the cache.
pub struct StopSync<T> {
    client: TransitClient<T>,
    cache: Arc<dyn StopCache>,
}

impl<T> fmt::Debug for StopSync<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StopSync").finish_non_exhaustive()
    }
}

impl<T: Transport> StopSync<T> {
    /// Create a sync service over a client and a cache.
    pub fn new(client: TransitClient<T>, cache: Arc<dyn StopCache>) -> Self {
        Self { client, cache }
    }

    /// The API client.
    #[must_use]
    pub fn client(&self) -> &TransitClient<T> {
        &self.client
    }

    /// Fetch the stops around `query` from the network.
    ///
    /// Repeated ids are collapsed, then the result is written to the cache
    /// and returned sorted by proximity to the query center. A failed cache write is logged and
    /// does not fail the fetch.
    ///
    /// # Errors
    ///
    /// Returns the transport, status or payload error if the fetch fails.
    #[instrument(skip(self, query), fields(center = %query.center))]
    pub async fn fetch_nearby(&self, query: &NearbyQuery) -> Result<Vec<Stop>> {
        let mut stops = dedup_by_id(self.client.nearby_stops(query).await?);

        let cache = Arc::clone(&self.cache);
        let rows = stops.clone();
        match tokio::task::spawn_blocking(move || cache.insert_or_replace(&rows)).await {
            Ok(Ok(())) => debug!(count = stops.len(), "Wrote fetched stops to cache"),
            Ok(Err(e)) => warn!(error = %e, "Failed to write stops to cache"),
            Err(e) => warn!(error = %e, "Cache write task did not complete"),
        }

        sort_by_proximity(&mut stops, &query.center);
        Ok(stops)
    }

    /// Read the cached stops inside `bbox`.
    ///
    /// Distances are recomputed against the box center and the list is
    /// sorted by them. An empty cache yields an empty list.
    ///
    /// # Errors
    ///
    /// Returns an error only if the cache itself fails.
    #[instrument(skip(self))]
    pub async fn read_cached(&self, bbox: BoundingBox) -> Result<Vec<Stop>> {
        let cache = Arc::clone(&self.cache);
        let rows = tokio::task::spawn_blocking(move || cache.query_by_bounding_box(&bbox))
            .await
            .map_err(|e| Error::internal(format!("cache read task did not complete: {e}")))??;

        let center = bbox.center();
        let mut stops: Vec<Stop> = rows
            .into_iter()
            .map(|stop| {
                let distance = stop.position().map(|p| p.metres_to(&center));
                stop.with_distance(distance)
            })
            .collect();
        sort_by_proximity(&mut stops, &center);

        debug!(count = stops.len(), "Read stops from cache");
        Ok(stops)
    }

    /// Fetch the lines serving `stop_id` and record them in the cache.
    ///
    /// As with [`fetch_nearby`](Self::fetch_nearby), a failed cache write is
    /// logged and does not fail the fetch.
    ///
    /// # Errors
    ///
    /// Returns the transport, status or payload error if the fetch fails.
    #[instrument(skip(self))]
    pub async fn fetch_lines(&self, stop_id: &str) -> Result<Vec<Line>> {
        let lines = self.client.lines_at_stop(stop_id).await?;

        let cache = Arc::clone(&self.cache);
        let stop = stop_id.to_string();
        let rows = lines.clone();
        match tokio::task::spawn_blocking(move || cache.replace_lines_at_stop(&stop, &rows)).await
        {
            Ok(Ok(())) => debug!(count = lines.len(), "Wrote fetched lines to cache"),
            Ok(Err(e)) => warn!(error = %e, "Failed to write lines to cache"),
            Err(e) => warn!(error = %e, "Cache write task did not complete"),
        }

        Ok(lines)
    }

    /// The cached lines serving `stop_id`; empty if none were recorded.
    ///
    /// # Errors
    ///
    /// Returns an error only if the cache itself fails.
    #[instrument(skip(self))]
    pub async fn read_cached_lines(&self, stop_id: &str) -> Result<Vec<Line>> {
        let cache = Arc::clone(&self.cache);
        let stop = stop_id.to_string();
        let lines = tokio::task::spawn_blocking(move || cache.lines_at_stop(&stop))
            .await
            .map_err(|e| Error::internal(format!("cache read task did not complete: {e}")))??;

        debug!(count = lines.len(), "Read lines from cache");
        Ok(lines)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::api::testing::{MockTransport, Reply};
    use crate::api::Endpoint;
    use crate::error::ErrorKind;
    use crate::model::Coordinates;
    use crate::storage::Storage;

    pub(crate) const STOPS_JSON: &str = r#"[
        {"id": "far", "name": "Far", "lat": 48.2100, "lon": 16.3800, "distance": 900},
        {"id": "near", "name": "Near", "lat": 48.2010, "lon": 16.3700, "distance": 120},
        {"id": "ghost", "name": "No Position"}
    ]"#;

    /// A cache whose every operation fails.
    #[derive(Debug)]
    struct BrokenCache;

    impl StopCache for BrokenCache {
        fn insert_or_replace(&self, _stops: &[Stop]) -> Result<()> {
            Err(Error::internal("disk full"))
        }

        fn query_by_bounding_box(&self, _bbox: &BoundingBox) -> Result<Vec<Stop>> {
            Err(Error::internal("disk full"))
        }

        fn get_by_id(&self, _id: &str) -> Result<Option<Stop>> {
            Err(Error::internal("disk full"))
        }

        fn replace_lines_at_stop(&self, _stop_id: &str, _lines: &[Line]) -> Result<()> {
            Err(Error::internal("disk full"))
        }

        fn lines_at_stop(&self, _stop_id: &str) -> Result<Vec<Line>> {
            Err(Error::internal("disk full"))
        }
    }

    pub(crate) fn memory_cache() -> Arc<dyn StopCache> {
        Arc::new(Mutex::new(Storage::open_in_memory().unwrap()))
    }

    pub(crate) fn query_at(lat: f64, lon: f64) -> NearbyQuery {
        NearbyQuery::new(Coordinates::new(lat, lon).unwrap())
    }

    fn ids(stops: &[Stop]) -> Vec<&str> {
        stops.iter().map(Stop::id).collect()
    }

    #[tokio::test]
    async fn test_fetch_nearby_sorts_and_caches() {
        let transport = Arc::new(MockTransport::body(STOPS_JSON));
        let cache = memory_cache();
        let sync = StopSync::new(TransitClient::new(Arc::clone(&transport)), Arc::clone(&cache));

        let stops = sync.fetch_nearby(&query_at(48.2, 16.37)).await.unwrap();
        assert_eq!(ids(&stops), vec!["near", "far", "ghost"]);
        assert!(cache.get_by_id("near").unwrap().is_some());
        assert!(cache.get_by_id("ghost").unwrap().is_some());
    }

    #[tokio::test]
    async fn test_blank_origin_uses_coordinate_endpoint() {
        let transport = Arc::new(MockTransport::body("[]"));
        let sync = StopSync::new(TransitClient::new(Arc::clone(&transport)), memory_cache());

        let query = query_at(48.2, 16.37).from_stop("   ");
        sync.fetch_nearby(&query).await.unwrap();

        let call = transport.last_call().unwrap();
        assert!(matches!(call, Endpoint::NearbyStops { .. }));
        assert_eq!(call.path_segments(), vec!["stops", "nearby"]);
    }

    #[tokio::test]
    async fn test_cache_write_failure_does_not_fail_fetch() {
        let transport = Arc::new(MockTransport::body(STOPS_JSON));
        let sync = StopSync::new(TransitClient::new(transport), Arc::new(BrokenCache));

        let stops = sync.fetch_nearby(&query_at(48.2, 16.37)).await.unwrap();
        assert_eq!(stops.len(), 3);
    }

    #[tokio::test]
    async fn test_fetch_failure_is_reported() {
        let transport = Arc::new(MockTransport::new(Reply::Status(503)));
        let sync = StopSync::new(TransitClient::new(transport), memory_cache());

        let err = sync.fetch_nearby(&query_at(48.2, 16.37)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Status);
    }

    #[tokio::test]
    async fn test_malformed_payload_is_reported() {
        let transport = Arc::new(MockTransport::body("<html>oops</html>"));
        let sync = StopSync::new(TransitClient::new(transport), memory_cache());

        let err = sync.fetch_nearby(&query_at(48.2, 16.37)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Payload);
    }

    #[tokio::test]
    async fn test_read_cached_on_empty_cache() {
        let transport = Arc::new(MockTransport::body("[]"));
        let sync = StopSync::new(TransitClient::new(transport), memory_cache());

        let bbox = query_at(48.2, 16.37).bounding_box(500);
        assert!(sync.read_cached(bbox).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_read_cached_error_when_cache_fails() {
        let transport = Arc::new(MockTransport::body("[]"));
        let sync = StopSync::new(TransitClient::new(transport), Arc::new(BrokenCache));

        let bbox = query_at(48.2, 16.37).bounding_box(500);
        assert!(sync.read_cached(bbox).await.is_err());
    }

    #[tokio::test]
    async fn test_cached_stops_survive_failed_fetch() {
        crate::logging::init_test_logging();
        let transport = Arc::new(MockTransport::body(STOPS_JSON));
        let sync = StopSync::new(TransitClient::new(Arc::clone(&transport)), memory_cache());
        let query = query_at(48.2, 16.37);

        sync.fetch_nearby(&query).await.unwrap();
        transport.set_reply(Reply::Status(500));
        assert!(sync.fetch_nearby(&query).await.is_err());

        let cached = sync.read_cached(query.bounding_box(2_000)).await.unwrap();
        // The stop without coordinates cannot be placed in a box
        assert_eq!(ids(&cached), vec!["near", "far"]);
        let center = query.bounding_box(2_000).center();
        let near = Coordinates::new(48.2010, 16.3700).unwrap();
        assert_eq!(cached[0].distance(), Some(near.metres_to(&center)));
    }

    const LINES_JSON: &str = r#"{"lines": [
        {"id": "13A", "name": "13A", "direction": "Hauptbahnhof"},
        {"lineId": 2, "linie": "2"}
    ]}"#;

    #[tokio::test]
    async fn test_fetched_lines_are_cached_for_offline_use() {
        let transport = Arc::new(MockTransport::body(LINES_JSON));
        let sync = StopSync::new(TransitClient::new(Arc::clone(&transport)), memory_cache());

        let fetched = sync.fetch_lines("4711").await.unwrap();
        assert_eq!(fetched.len(), 2);
        assert!(matches!(
            transport.last_call(),
            Some(Endpoint::LinesAtStop { stop_id }) if stop_id == "4711"
        ));

        transport.set_reply(Reply::Status(503));
        assert_eq!(
            sync.fetch_lines("4711").await.unwrap_err().kind(),
            ErrorKind::Status
        );
        assert_eq!(sync.read_cached_lines("4711").await.unwrap(), fetched);
        assert!(sync.read_cached_lines("other").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_line_cache_failures() {
        let transport = Arc::new(MockTransport::body(LINES_JSON));
        let sync = StopSync::new(TransitClient::new(transport), Arc::new(BrokenCache));

        assert_eq!(sync.fetch_lines("4711").await.unwrap().len(), 2);
        assert!(sync.read_cached_lines("4711").await.is_err());
    }
}
