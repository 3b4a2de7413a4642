//! Wire shapes of the transit API and the rules that normalize them.
//!
//! The API is inconsistent about field names (German and English variants
//! coexist), about number encoding (coordinates sometimes arrive as strings)
//! and about envelopes (bare arrays vs. wrapped objects). Every fallback lives
//! in a named `resolve_*` function so it can be tested on its own.
//!
//! List payloads are decoded entry by entry: one entry that does not fit is
//! dropped with a warning and the rest of the list survives.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use crate::error::Result;
use crate::model::{Coordinates, Departure, Line, LineRoute, Stop, VehiclePosition};

/// An identifier or label that may be encoded as a string or a number.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum LenientText {
    /// `"1234"`
    Text(String),
    /// `1234`
    Integer(i64),
    /// `1234.0`
    Float(f64),
}

impl LenientText {
    /// The trimmed text, or `None` if blank.
    #[must_use]
    pub fn non_blank(&self) -> Option<String> {
        match self {
            Self::Text(s) => {
                let trimmed = s.trim();
                (!trimmed.is_empty()).then(|| trimmed.to_string())
            }
            Self::Integer(n) => Some(n.to_string()),
            Self::Float(n) if !n.is_finite() => None,
            Self::Float(n) if n.fract().abs() < f64::EPSILON => Some(format!("{n:.0}")),
            Self::Float(n) => Some(n.to_string()),
        }
    }
}

/// A number that may be encoded as a JSON number or a numeric string.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum LenientNumber {
    /// `48.13`
    Number(f64),
    /// `"48.13"`
    Text(String),
}

impl LenientNumber {
    /// The finite value, if any.
    #[must_use]
    pub fn value(&self) -> Option<f64> {
        let v = match self {
            Self::Number(n) => *n,
            Self::Text(s) => s.trim().parse().ok()?,
        };
        v.is_finite().then_some(v)
    }
}

/// The first candidate holding a usable number.
fn first_number<const N: usize>(
    candidates: [&Option<LenientNumber>; N],
) -> Option<&LenientNumber> {
    candidates
        .into_iter()
        .flatten()
        .find(|n| n.value().is_some())
}

/// A stop as the API sends it.
///
/// Spelling variants are separate fields rather than serde aliases, so a
/// payload carrying both `lat` and `latitude` still decodes.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RawStop {
    /// Primary identifier.
    pub id: Option<LenientText>,
    /// Legacy identifier.
    pub haltenummer: Option<LenientText>,
    /// Camel-case identifier used by the stop-scoped endpoints.
    #[serde(rename = "stopId")]
    pub stop_id: Option<LenientText>,
    /// Primary display name.
    pub name: Option<LenientText>,
    /// Legacy display name.
    pub haltestellenname: Option<LenientText>,
    /// Camel-case display name.
    #[serde(rename = "stopName")]
    pub stop_name: Option<LenientText>,
    /// Latitude.
    pub lat: Option<LenientNumber>,
    /// Latitude, long spelling.
    pub latitude: Option<LenientNumber>,
    /// Longitude.
    pub lon: Option<LenientNumber>,
    /// Longitude, map-library spelling.
    pub lng: Option<LenientNumber>,
    /// Longitude, long spelling.
    pub longitude: Option<LenientNumber>,
    /// Distance from the query point in metres.
    pub distance: Option<LenientNumber>,
    /// Legacy distance field.
    pub entfernung: Option<LenientNumber>,
}

impl RawStop {
    /// `lat`, then `latitude`.
    #[must_use]
    pub fn raw_latitude(&self) -> Option<&LenientNumber> {
        first_number([&self.lat, &self.latitude])
    }

    /// `lon`, then `lng`, then `longitude`.
    #[must_use]
    pub fn raw_longitude(&self) -> Option<&LenientNumber> {
        first_number([&self.lon, &self.lng, &self.longitude])
    }
}

/// Stop id rule: `id`, then `haltenummer`, then `stopId`; blanks are skipped.
#[must_use]
pub fn resolve_stop_id(raw: &RawStop) -> Option<String> {
    [&raw.id, &raw.haltenummer, &raw.stop_id]
        .into_iter()
        .flatten()
        .find_map(LenientText::non_blank)
}

/// Stop name rule: `name`, then `haltestellenname`, then `stopName`, then the id.
#[must_use]
pub fn resolve_stop_name(raw: &RawStop, id: &str) -> String {
    [&raw.name, &raw.haltestellenname, &raw.stop_name]
        .into_iter()
        .flatten()
        .find_map(LenientText::non_blank)
        .unwrap_or_else(|| id.to_string())
}

/// Coordinate rule: both components present, numeric and in range, or nothing.
#[must_use]
pub fn resolve_coordinates(
    lat: Option<&LenientNumber>,
    lon: Option<&LenientNumber>,
) -> Option<Coordinates> {
    let lat = lat?.value()?;
    let lon = lon?.value()?;
    Coordinates::new(lat, lon).ok()
}

/// Distance rule: `distance`, then `entfernung`; negative values are dropped,
/// the rest rounded to whole metres.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn resolve_distance(raw: &RawStop) -> Option<u32> {
    [&raw.distance, &raw.entfernung]
        .into_iter()
        .flatten()
        .find_map(LenientNumber::value)
        .filter(|d| *d >= 0.0)
        .map(|d| d.round().min(f64::from(u32::MAX)) as u32)
}

impl RawStop {
    /// Apply the normalization rules. Returns `None` if no usable id exists.
    #[must_use]
    pub fn normalize(self) -> Option<Stop> {
        let id = resolve_stop_id(&self)?;
        let name = resolve_stop_name(&self, &id);
        let position = resolve_coordinates(self.raw_latitude(), self.raw_longitude());
        let distance = resolve_distance(&self);
        Some(
            Stop::new(id, name)
                .with_distance(distance)
                .with_position(position),
        )
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum StopsPayload {
    Bare(Vec<Value>),
    Wrapped { stops: Vec<Value> },
}

/// Decode each entry on its own, dropping the ones that do not fit `T`.
fn lenient_entries<T: DeserializeOwned>(entries: Vec<Value>, kind: &'static str) -> Vec<T> {
    entries
        .into_iter()
        .filter_map(|entry| match serde_json::from_value(entry) {
            Ok(raw) => Some(raw),
            Err(e) => {
                warn!(kind, error = %e, "Dropping malformed entry");
                None
            }
        })
        .collect()
}

/// Parse a stops payload (bare array or `{"stops": [...]}`).
///
/// Malformed entries and entries without a usable id are dropped with a
/// warning.
///
/// # Errors
///
/// Returns [`crate::Error::Payload`] if the body is not a stops payload.
pub fn parse_stops(body: &str) -> Result<Vec<Stop>> {
    let entries = match serde_json::from_str::<StopsPayload>(body)? {
        StopsPayload::Bare(stops) | StopsPayload::Wrapped { stops } => stops,
    };
    Ok(normalize_stops(lenient_entries(entries, "stop")))
}

fn normalize_stops(raw: Vec<RawStop>) -> Vec<Stop> {
    let total = raw.len();
    let stops: Vec<Stop> = raw.into_iter().filter_map(RawStop::normalize).collect();
    if stops.len() < total {
        warn!(
            dropped = total - stops.len(),
            total, "Dropping stops without an identifier"
        );
    }
    stops
}

/// Parse a single stop object.
///
/// # Errors
///
/// Returns [`crate::Error::Payload`] if the body is not a stop object.
pub fn parse_stop(body: &str) -> Result<Option<Stop>> {
    let raw: RawStop = serde_json::from_str(body)?;
    Ok(raw.normalize())
}

/// A departure as the API sends it.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RawDeparture {
    /// Line name.
    #[serde(alias = "linie")]
    pub line: Option<LenientText>,
    /// Headsign.
    #[serde(alias = "richtung", alias = "headsign")]
    pub destination: Option<String>,
    /// Timetabled time.
    #[serde(alias = "abfahrt_soll")]
    pub scheduled: Option<DateTime<Utc>>,
    /// Real-time prediction.
    #[serde(alias = "abfahrt_ist", alias = "realtime")]
    pub expected: Option<DateTime<Utc>>,
}

impl RawDeparture {
    /// A departure needs a line and a timetabled time.
    #[must_use]
    pub fn normalize(self) -> Option<Departure> {
        Some(Departure {
            line: self.line.as_ref().and_then(LenientText::non_blank)?,
            destination: self.destination.unwrap_or_default().trim().to_string(),
            scheduled: self.scheduled?,
            expected: self.expected,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum DeparturesPayload {
    Bare(Vec<Value>),
    Wrapped { departures: Vec<Value> },
}

/// Parse departures, ordered by best known time.
///
/// # Errors
///
/// Returns [`crate::Error::Payload`] if the body is not a departures payload.
pub fn parse_departures(body: &str) -> Result<Vec<Departure>> {
    let entries = match serde_json::from_str::<DeparturesPayload>(body)? {
        DeparturesPayload::Bare(d) | DeparturesPayload::Wrapped { departures: d } => d,
    };
    let mut departures: Vec<Departure> = lenient_entries(entries, "departure")
        .into_iter()
        .filter_map(RawDeparture::normalize)
        .collect();
    departures.sort_by_key(Departure::best_time);
    Ok(departures)
}

/// A line as the API sends it.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RawLine {
    /// Identifier.
    #[serde(alias = "lineId")]
    pub id: Option<LenientText>,
    /// Public name.
    #[serde(alias = "linie")]
    pub name: Option<LenientText>,
    /// Direction label.
    #[serde(alias = "richtung")]
    pub direction: Option<String>,
}

impl RawLine {
    /// Line name falls back to the id; the direction is dropped if blank.
    #[must_use]
    pub fn normalize(self) -> Option<Line> {
        let id = self.id.as_ref().and_then(LenientText::non_blank)?;
        let name = self
            .name
            .as_ref()
            .and_then(LenientText::non_blank)
            .unwrap_or_else(|| id.clone());
        let direction = self
            .direction
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty());
        Some(Line {
            id,
            name,
            direction,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum LinesPayload {
    Bare(Vec<Value>),
    Wrapped { lines: Vec<Value> },
}

/// Parse a lines payload.
///
/// # Errors
///
/// Returns [`crate::Error::Payload`] if the body is not a lines payload.
pub fn parse_lines(body: &str) -> Result<Vec<Line>> {
    let entries = match serde_json::from_str::<LinesPayload>(body)? {
        LinesPayload::Bare(l) | LinesPayload::Wrapped { lines: l } => l,
    };
    Ok(lenient_entries(entries, "line")
        .into_iter()
        .filter_map(RawLine::normalize)
        .collect())
}

/// A shape vertex: `[lat, lon]` or `{"lat": .., "lon": ..}`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum RawPoint {
    /// `[lat, lon]`
    Pair([f64; 2]),
    /// `{"lat": .., "lon": ..}`
    Object {
        /// Latitude.
        #[serde(alias = "latitude")]
        lat: LenientNumber,
        /// Longitude.
        #[serde(alias = "lng", alias = "longitude")]
        lon: LenientNumber,
    },
}

impl RawPoint {
    fn normalize(&self) -> Option<Coordinates> {
        match self {
            Self::Pair([lat, lon]) => Coordinates::new(*lat, *lon).ok(),
            Self::Object { lat, lon } => resolve_coordinates(Some(lat), Some(lon)),
        }
    }
}

/// A line route as the API sends it.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RawRoute {
    /// Stops in travel order, decoded one by one.
    #[serde(default)]
    pub stops: Vec<Value>,
    /// Drawing polyline, decoded one vertex at a time.
    #[serde(default, alias = "polyline")]
    pub shape: Vec<Value>,
}

/// Parse a line route. Invalid shape vertices are skipped.
///
/// # Errors
///
/// Returns [`crate::Error::Payload`] if the body is not a route object.
pub fn parse_route(body: &str, line: &str, direction: &str) -> Result<LineRoute> {
    let raw: RawRoute = serde_json::from_str(body)?;
    Ok(LineRoute {
        line: line.to_string(),
        direction: direction.to_string(),
        stops: normalize_stops(lenient_entries(raw.stops, "route stop")),
        shape: lenient_entries::<RawPoint>(raw.shape, "shape point")
            .iter()
            .filter_map(RawPoint::normalize)
            .collect(),
    })
}

/// A vehicle position as the API sends it.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RawVehicle {
    /// Identifier.
    #[serde(alias = "vehicleId", alias = "fahrzeugnummer")]
    pub id: Option<LenientText>,
    /// Line currently served.
    #[serde(alias = "linie")]
    pub line: Option<LenientText>,
    /// Latitude.
    pub lat: Option<LenientNumber>,
    /// Latitude, long spelling.
    pub latitude: Option<LenientNumber>,
    /// Longitude.
    pub lon: Option<LenientNumber>,
    /// Longitude, map-library spelling.
    pub lng: Option<LenientNumber>,
    /// Longitude, long spelling.
    pub longitude: Option<LenientNumber>,
    /// Heading in degrees.
    #[serde(alias = "heading")]
    pub bearing: Option<LenientNumber>,
    /// Report time.
    #[serde(alias = "zeitstempel")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl RawVehicle {
    /// A vehicle needs an id and a valid position. Bearings are wrapped into 0..360.
    #[must_use]
    pub fn normalize(self) -> Option<VehiclePosition> {
        let vehicle_id = self.id.as_ref().and_then(LenientText::non_blank)?;
        let position = resolve_coordinates(
            first_number([&self.lat, &self.latitude]),
            first_number([&self.lon, &self.lng, &self.longitude]),
        )?;
        Some(VehiclePosition {
            vehicle_id,
            line: self.line.as_ref().and_then(LenientText::non_blank),
            position,
            bearing: self
                .bearing
                .as_ref()
                .and_then(LenientNumber::value)
                .map(|b| b.rem_euclid(360.0)),
            reported_at: self.timestamp,
        })
    }
}

/// Parse a vehicle object.
///
/// # Errors
///
/// Returns [`crate::Error::Payload`] if the body is not a vehicle object.
pub fn parse_vehicle(body: &str) -> Result<Option<VehiclePosition>> {
    let raw: RawVehicle = serde_json::from_str(body)?;
    Ok(raw.normalize())
}
