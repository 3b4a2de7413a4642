//! Core transit types.
//!
//! These are the normalized shapes the rest of the crate works with. Remote
//! payloads are converted into them by [`crate::api::dto`]; the cache stores
//! and returns them unchanged.

use std::cmp::Ordering;
use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Error, Result};

/// Mean earth radius used for haversine distances.
const EARTH_RADIUS_M: f64 = 6_371_008.8;

/// Metres per degree of latitude.
const METRES_PER_DEGREE: f64 = 111_320.0;

/// A validated WGS84 position.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    /// Latitude in degrees, -90 to 90.
    pub latitude: f64,
    /// Longitude in degrees, -180 to 180.
    pub longitude: f64,
}

impl Coordinates {
    /// Create a position, rejecting non-finite or out-of-range values.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidCoordinates`] if either component is invalid.
    pub fn new(latitude: f64, longitude: f64) -> Result<Self> {
        let valid = latitude.is_finite()
            && longitude.is_finite()
            && (-90.0..=90.0).contains(&latitude)
            && (-180.0..=180.0).contains(&longitude);
        if valid {
            Ok(Self {
                latitude,
                longitude,
            })
        } else {
            Err(Error::InvalidCoordinates {
                latitude,
                longitude,
            })
        }
    }

    /// Great-circle distance in metres.
    #[must_use]
    pub fn distance_to(&self, other: &Coordinates) -> f64 {
        let (lat1, lat2) = (self.latitude.to_radians(), other.latitude.to_radians());
        let d_lat = lat2 - lat1;
        let d_lon = (other.longitude - self.longitude).to_radians();

        let a = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_M * a.sqrt().asin()
    }

    /// Distance in whole metres, saturating.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn metres_to(&self, other: &Coordinates) -> u32 {
        self.distance_to(other).round().min(f64::from(u32::MAX)) as u32
    }
}

impl std::fmt::Display for Coordinates {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.6},{:.6}", self.latitude, self.longitude)
    }
}

/// A physical transit stop.
///
/// Immutable once built: a refresh replaces the whole value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stop {
    id: String,
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    distance: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    position: Option<Coordinates>,
}

impl Stop {
    /// Create a stop with no distance and no position.
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            distance: None,
            position: None,
        }
    }

    /// Set the distance from the query point in metres.
    #[must_use]
    pub fn with_distance(mut self, distance: Option<u32>) -> Self {
        self.distance = distance;
        self
    }

    /// Set the position.
    #[must_use]
    pub fn with_position(mut self, position: Option<Coordinates>) -> Self {
        self.position = position;
        self
    }

    /// The stop identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The display name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Distance in metres from the point the stop was queried around.
    #[must_use]
    pub fn distance(&self) -> Option<u32> {
        self.distance
    }

    /// The stop position, if known.
    #[must_use]
    pub fn position(&self) -> Option<Coordinates> {
        self.position
    }

    /// Whether the stop can be placed on a map.
    #[must_use]
    pub fn has_coordinates(&self) -> bool {
        self.position.is_some()
    }

    /// Distance used for ordering: the reported one, else computed from the
    /// position.
    fn effective_distance(&self, center: &Coordinates) -> Option<f64> {
        self.distance
            .map(f64::from)
            .or_else(|| self.position.map(|p| p.distance_to(center)))
    }
}

/// Sort stops by ascending distance from `center`.
///
/// Stops with neither a reported distance nor a position sort last. The sort
/// is stable, so equal distances keep their payload order.
pub fn sort_by_proximity(stops: &mut [Stop], center: &Coordinates) {
    stops.sort_by(|a, b| {
        match (a.effective_distance(center), b.effective_distance(center)) {
            (Some(x), Some(y)) => x.total_cmp(&y),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        }
    });
}

/// Collapse repeated ids to one entry.
///
/// Each id keeps the position of its first occurrence and the value of its
/// last, matching the cache's last-write-wins behaviour.
#[must_use]
pub fn dedup_by_id(stops: Vec<Stop>) -> Vec<Stop> {
    let mut index: HashMap<String, usize> = HashMap::with_capacity(stops.len());
    let mut unique: Vec<Stop> = Vec::with_capacity(stops.len());

    for stop in stops {
        if let Some(&at) = index.get(stop.id()) {
            warn!(stop_id = stop.id(), "Duplicate stop id, keeping the last");
            unique[at] = stop;
        } else {
            index.insert(stop.id().to_string(), unique.len());
            unique.push(stop);
        }
    }
    unique
}

/// A rectangular latitude/longitude bound.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    /// Southern edge.
    pub min_lat: f64,
    /// Northern edge.
    pub max_lat: f64,
    /// Western edge.
    pub min_lon: f64,
    /// Eastern edge.
    pub max_lon: f64,
}

impl BoundingBox {
    /// Create a bounding box.
    ///
    /// # Errors
    ///
    /// Returns an error if a minimum exceeds its maximum or a value is not finite.
    pub fn new(min_lat: f64, max_lat: f64, min_lon: f64, max_lon: f64) -> Result<Self> {
        let finite = [min_lat, max_lat, min_lon, max_lon]
            .iter()
            .all(|v| v.is_finite());
        if !finite {
            return Err(Error::invalid_input("bounding box values must be finite"));
        }
        if min_lat > max_lat || min_lon > max_lon {
            return Err(Error::invalid_input(format!(
                "empty bounding box: lat {min_lat}..{max_lat}, lon {min_lon}..{max_lon}"
            )));
        }
        Ok(Self {
            min_lat,
            max_lat,
            min_lon,
            max_lon,
        })
    }

    /// The box enclosing a circle of `radius_m` metres around `center`.
    ///
    /// Clamped to valid coordinate ranges; does not wrap the antimeridian.
    #[must_use]
    pub fn around(center: &Coordinates, radius_m: u32) -> Self {
        let d_lat = f64::from(radius_m) / METRES_PER_DEGREE;
        let cos_lat = center.latitude.to_radians().cos().max(1e-6);
        let d_lon = (f64::from(radius_m) / (METRES_PER_DEGREE * cos_lat)).min(180.0);

        Self {
            min_lat: (center.latitude - d_lat).max(-90.0),
            max_lat: (center.latitude + d_lat).min(90.0),
            min_lon: (center.longitude - d_lon).max(-180.0),
            max_lon: (center.longitude + d_lon).min(180.0),
        }
    }

    /// The midpoint of the box.
    #[must_use]
    pub fn center(&self) -> Coordinates {
        Coordinates {
            latitude: (self.min_lat + self.max_lat) / 2.0,
            longitude: (self.min_lon + self.max_lon) / 2.0,
        }
    }

    /// Whether `point` lies inside the box (edges inclusive).
    #[must_use]
    pub fn contains(&self, point: &Coordinates) -> bool {
        (self.min_lat..=self.max_lat).contains(&point.latitude)
            && (self.min_lon..=self.max_lon).contains(&point.longitude)
    }
}

/// Parameters of a nearby-stops request. Not persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct NearbyQuery {
    /// Point to search around.
    pub center: Coordinates,
    origin_stop: Option<String>,
    /// Search radius in metres.
    pub radius_m: Option<u32>,
    /// Maximum number of stops to return.
    pub max_count: Option<u32>,
}

impl NearbyQuery {
    /// A coordinate-only query.
    #[must_use]
    pub fn new(center: Coordinates) -> Self {
        Self {
            center,
            origin_stop: None,
            radius_m: None,
            max_count: None,
        }
    }

    /// Scope the query to an originating stop. Blank ids are ignored.
    #[must_use]
    pub fn from_stop(mut self, stop_id: impl Into<String>) -> Self {
        let stop_id = stop_id.into();
        let trimmed = stop_id.trim();
        self.origin_stop = if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        };
        self
    }

    /// Limit the search radius.
    #[must_use]
    pub fn within(mut self, radius_m: u32) -> Self {
        self.radius_m = Some(radius_m);
        self
    }

    /// Limit the number of results.
    #[must_use]
    pub fn limit(mut self, max_count: u32) -> Self {
        self.max_count = Some(max_count);
        self
    }

    /// The originating stop id, if one was given and is non-blank.
    #[must_use]
    pub fn origin_stop(&self) -> Option<&str> {
        self.origin_stop.as_deref()
    }

    /// The box covering this query, using `fallback_radius_m` if no radius is set.
    #[must_use]
    pub fn bounding_box(&self, fallback_radius_m: u32) -> BoundingBox {
        BoundingBox::around(&self.center, self.radius_m.unwrap_or(fallback_radius_m))
    }
}

/// A line (route) serving one or more stops.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Line {
    /// Line identifier.
    pub id: String,
    /// Public line name, e.g. "42".
    pub name: String,
    /// Direction label, e.g. the terminus.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub direction: Option<String>,
}

/// A scheduled (and possibly real-time) arrival at a stop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Departure {
    /// Line serving this departure.
    pub line: String,
    /// Headsign / destination.
    pub destination: String,
    /// Timetabled time.
    pub scheduled: DateTime<Utc>,
    /// Real-time prediction, if the vehicle is tracked.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected: Option<DateTime<Utc>>,
}

impl Departure {
    /// Delay in whole minutes (negative when early); `None` without real-time data.
    #[must_use]
    pub fn delay_minutes(&self) -> Option<i64> {
        self.expected
            .map(|expected| (expected - self.scheduled).num_minutes())
    }

    /// The best known departure time.
    #[must_use]
    pub fn best_time(&self) -> DateTime<Utc> {
        self.expected.unwrap_or(self.scheduled)
    }
}

/// The path a line takes in one direction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineRoute {
    /// Line identifier.
    pub line: String,
    /// Direction identifier as requested.
    pub direction: String,
    /// Stops in travel order.
    pub stops: Vec<Stop>,
    /// Polyline for drawing the route.
    pub shape: Vec<Coordinates>,
}

/// Last reported position of a vehicle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehiclePosition {
    /// Vehicle identifier.
    pub vehicle_id: String,
    /// Line the vehicle is running on.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<String>,
    /// Where the vehicle is.
    pub position: Coordinates,
    /// Heading in degrees clockwise from north.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bearing: Option<f64>,
    /// When the position was reported.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reported_at: Option<DateTime<Utc>>,
}
