//! Remote transit API client.
//!
//! [`Endpoint`] describes every request the client can make, [`Transport`]
//! executes it, and [`TransitClient`] turns response bodies into model types
//! through the normalization rules in [`dto`].

pub mod dto;
pub mod transport;

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Url;
use tracing::{debug, instrument};

use crate::error::{Error, Result};
use crate::model::{Coordinates, Departure, Line, LineRoute, NearbyQuery, Stop, VehiclePosition};

pub use transport::{HttpTransport, Transport};

/// A request against the transit API.
#[derive(Debug, Clone, PartialEq)]
pub enum Endpoint {
    /// `GET stops/nearby?lat=..&lon=..`
    NearbyStops {
        /// Search center.
        center: Coordinates,
        /// Search radius in metres.
        radius_m: Option<u32>,
        /// Maximum number of results.
        max_count: Option<u32>,
    },
    /// `GET stops/{id}/nearby?lat=..&lon=..`
    StopNearbyStops {
        /// Originating stop.
        stop_id: String,
        /// Search center.
        center: Coordinates,
        /// Search radius in metres.
        radius_m: Option<u32>,
        /// Maximum number of results.
        max_count: Option<u32>,
    },
    /// `GET stops/{id}`
    Stop {
        /// Stop to look up.
        stop_id: String,
    },
    /// `GET stops/{id}/departures`
    Departures {
        /// Stop to list departures for.
        stop_id: String,
        /// Maximum number of departures.
        limit: Option<u32>,
    },
    /// `GET stops/{id}/lines`
    LinesAtStop {
        /// Stop to list lines for.
        stop_id: String,
    },
    /// `GET lines/{line}/route/{direction}`
    LineRoute {
        /// Line identifier.
        line_id: String,
        /// Direction identifier.
        direction: String,
    },
    /// `GET vehicles/{id}`
    Vehicle {
        /// Vehicle identifier.
        vehicle_id: String,
    },
}

impl Endpoint {
    /// Pick the nearby-stops variant for a query.
    ///
    /// The stop-scoped variant is only used when the query carries a
    /// non-blank originating stop id.
    #[must_use]
    pub fn nearby(query: &NearbyQuery) -> Self {
        match query.origin_stop() {
            Some(stop_id) => Self::StopNearbyStops {
                stop_id: stop_id.to_string(),
                center: query.center,
                radius_m: query.radius_m,
                max_count: query.max_count,
            },
            None => Self::NearbyStops {
                center: query.center,
                radius_m: query.radius_m,
                max_count: query.max_count,
            },
        }
    }

    /// Short name used in logs.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::NearbyStops { .. } => "nearby_stops",
            Self::StopNearbyStops { .. } => "stop_nearby_stops",
            Self::Stop { .. } => "stop",
            Self::Departures { .. } => "departures",
            Self::LinesAtStop { .. } => "lines_at_stop",
            Self::LineRoute { .. } => "line_route",
            Self::Vehicle { .. } => "vehicle",
        }
    }

    /// Path segments relative to the API base.
    #[must_use]
    pub fn path_segments(&self) -> Vec<&str> {
        match self {
            Self::NearbyStops { .. } => vec!["stops", "nearby"],
            Self::StopNearbyStops { stop_id, .. } => vec!["stops", stop_id.as_str(), "nearby"],
            Self::Stop { stop_id } => vec!["stops", stop_id.as_str()],
            Self::Departures { stop_id, .. } => vec!["stops", stop_id.as_str(), "departures"],
            Self::LinesAtStop { stop_id } => vec!["stops", stop_id.as_str(), "lines"],
            Self::LineRoute { line_id, direction } => {
                vec!["lines", line_id.as_str(), "route", direction.as_str()]
            }
            Self::Vehicle { vehicle_id } => vec!["vehicles", vehicle_id.as_str()],
        }
    }

    /// Query parameters.
    #[must_use]
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        match self {
            Self::NearbyStops {
                center,
                radius_m,
                max_count,
            }
            | Self::StopNearbyStops {
                center,
                radius_m,
                max_count,
                ..
            } => {
                let mut pairs = vec![
                    ("lat", center.latitude.to_string()),
                    ("lon", center.longitude.to_string()),
                ];
                if let Some(radius) = radius_m {
                    pairs.push(("radius", radius.to_string()));
                }
                if let Some(limit) = max_count {
                    pairs.push(("limit", limit.to_string()));
                }
                pairs
            }
            Self::Departures {
                limit: Some(limit), ..
            } => vec![("limit", limit.to_string())],
            _ => Vec::new(),
        }
    }

    /// Resolve against `base`.
    ///
    /// Segments are percent-encoded individually, so an id containing `/`
    /// cannot change the path shape.
    ///
    /// # Errors
    ///
    /// Returns an error if `base` cannot carry a path.
    pub fn url(&self, base: &Url) -> Result<Url> {
        let mut url = base.clone();
        url.path_segments_mut()
            .map_err(|()| Error::invalid_input(format!("{base} cannot be a base URL")))?
            .pop_if_empty()
            .extend(self.path_segments());

        let pairs = self.query_pairs();
        if !pairs.is_empty() {
            url.query_pairs_mut().extend_pairs(pairs);
        }
        Ok(url)
    }
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn get(&self, endpoint: &Endpoint) -> Result<String> {
        (**self).get(endpoint).await
    }
}

/// Typed access to the transit API.
#[derive(Debug)]
pub struct TransitClient<T> {
    transport: T,
}

impl<T: Transport> TransitClient<T> {
    /// Wrap a transport.
    #[must_use]
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    /// The underlying transport.
    #[must_use]
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Stops around the query center, in payload order.
    ///
    /// # Errors
    ///
    /// Returns transport, status or payload errors.
    #[instrument(skip(self, query), fields(center = %query.center, origin = query.origin_stop()))]
    pub async fn nearby_stops(&self, query: &NearbyQuery) -> Result<Vec<Stop>> {
        let body = self.transport.get(&Endpoint::nearby(query)).await?;
        let stops = dto::parse_stops(&body)?;
        debug!(count = stops.len(), "Parsed nearby stops");
        Ok(stops)
    }

    /// A single stop; `None` if the API does not know it.
    ///
    /// # Errors
    ///
    /// Returns transport, status (other than 404) or payload errors.
    pub async fn stop(&self, stop_id: &str) -> Result<Option<Stop>> {
        let endpoint = Endpoint::Stop {
            stop_id: stop_id.to_string(),
        };
        match self.transport.get(&endpoint).await {
            Ok(body) => dto::parse_stop(&body),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Upcoming departures at a stop, ordered by best known time.
    ///
    /// # Errors
    ///
    /// Returns transport, status or payload errors.
    #[instrument(skip(self))]
    pub async fn departures(&self, stop_id: &str, limit: Option<u32>) -> Result<Vec<Departure>> {
        let endpoint = Endpoint::Departures {
            stop_id: stop_id.to_string(),
            limit,
        };
        let body = self.transport.get(&endpoint).await?;
        dto::parse_departures(&body)
    }

    /// Lines serving a stop.
    ///
    /// # Errors
    ///
    /// Returns transport, status or payload errors.
    pub async fn lines_at_stop(&self, stop_id: &str) -> Result<Vec<Line>> {
        let endpoint = Endpoint::LinesAtStop {
            stop_id: stop_id.to_string(),
        };
        let body = self.transport.get(&endpoint).await?;
        dto::parse_lines(&body)
    }

    /// The stops and shape of a line in one direction.
    ///
    /// # Errors
    ///
    /// Returns transport, status or payload errors.
    #[instrument(skip(self))]
    pub async fn line_route(&self, line_id: &str, direction: &str) -> Result<LineRoute> {
        let endpoint = Endpoint::LineRoute {
            line_id: line_id.to_string(),
            direction: direction.to_string(),
        };
        let body = self.transport.get(&endpoint).await?;
        dto::parse_route(&body, line_id, direction)
    }

    /// The last known position of a vehicle; `None` if it is not tracked.
    ///
    /// # Errors
    ///
    /// Returns transport, status (other than 404) or payload errors.
    pub async fn vehicle(&self, vehicle_id: &str) -> Result<Option<VehiclePosition>> {
        let endpoint = Endpoint::Vehicle {
            vehicle_id: vehicle_id.to_string(),
        };
        match self.transport.get(&endpoint).await {
            Ok(body) => dto::parse_vehicle(&body),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// In-memory transport for tests.
#[cfg(test)]
pub(crate) mod testing {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use super::{async_trait, Endpoint, Error, Result, Transport};

    /// What the mock answers with.
    #[derive(Debug, Clone)]
    pub(crate) enum Reply {
        Body(String),
        Status(u16),
    }

    #[derive(Debug)]
    pub(crate) struct MockTransport {
        reply: Mutex<Reply>,
        calls: Mutex<Vec<Endpoint>>,
        count: AtomicUsize,
    }

    impl MockTransport {
        pub(crate) fn new(reply: Reply) -> Self {
            Self {
                reply: Mutex::new(reply),
                calls: Mutex::new(Vec::new()),
                count: AtomicUsize::new(0),
            }
        }

        pub(crate) fn body(body: &str) -> Self {
            Self::new(Reply::Body(body.to_string()))
        }

        pub(crate) fn set_reply(&self, reply: Reply) {
            *self.reply.lock().unwrap() = reply;
        }

        pub(crate) fn call_count(&self) -> usize {
            self.count.load(Ordering::SeqCst)
        }

        pub(crate) fn calls(&self) -> Vec<Endpoint> {
            self.calls.lock().unwrap().clone()
        }

        pub(crate) fn last_call(&self) -> Option<Endpoint> {
            self.calls.lock().unwrap().last().cloned()
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn get(&self, endpoint: &Endpoint) -> Result<String> {
            self.count.fetch_add(1, Ordering::SeqCst);
            self.calls.lock().unwrap().push(endpoint.clone());
            match self.reply.lock().unwrap().clone() {
                Reply::Body(body) => Ok(body),
                Reply::Status(status) => Err(Error::Status {
                    status,
                    url: endpoint.path_segments().join("/"),
                }),
            }
        }
    }
}
