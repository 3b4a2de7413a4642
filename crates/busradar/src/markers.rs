//! Keeping map markers in step with the nearby-stop list.
//!
//! [`diff`] works out which operations turn the current markers into the
//! desired ones; [`MarkerSet::reconcile`] applies them to a [`MapSurface`]
//! and keeps its own record in line with what the surface actually holds.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

use serde::Serialize;
use tracing::{debug, warn};

use crate::error::Result;
use crate::model::{Coordinates, Stop};

/// A marker on the map, keyed by the stop it represents.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Marker {
    /// The stop; also what the surface reports back when the marker is clicked.
    pub stop_id: String,
    /// Where the marker was last placed.
    pub position: Coordinates,
    /// Label shown with the marker.
    pub title: String,
}

impl Marker {
    /// The marker for `stop`, or `None` if the stop has no coordinates.
    #[must_use]
    pub fn for_stop(stop: &Stop) -> Option<Self> {
        stop.position().map(|position| Self {
            stop_id: stop.id().to_string(),
            position,
            title: stop.name().to_string(),
        })
    }
}

/// One change to apply to the map.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum MarkerOp {
    /// Take a marker off the map.
    Remove {
        /// Marker to remove.
        stop_id: String,
    },
    /// Put a new marker on the map.
    Create {
        /// Marker to add.
        marker: Marker,
    },
    /// Move an existing marker.
    Move {
        /// Marker to move.
        stop_id: String,
        /// New position.
        to: Coordinates,
    },
}

impl fmt::Display for MarkerOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Remove { stop_id } => write!(f, "remove {stop_id}"),
            Self::Create { marker } => write!(
                f,
                "create {} \"{}\" at {}",
                marker.stop_id, marker.title, marker.position
            ),
            Self::Move { stop_id, to } => write!(f, "move {stop_id} to {to}"),
        }
    }
}

/// Something markers can be drawn on.
///
/// Every operation may fail independently; a failure leaves that marker as
/// it was.
pub trait MapSurface {
    /// Add a marker. Clicks on it are reported with `marker.stop_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the marker could not be added.
    fn add_marker(&mut self, marker: &Marker) -> Result<()>;

    /// Move the marker for `stop_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the marker could not be moved.
    fn move_marker(&mut self, stop_id: &str, to: Coordinates) -> Result<()>;

    /// Remove the marker for `stop_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the marker could not be removed.
    fn remove_marker(&mut self, stop_id: &str) -> Result<()>;
}

/// The operations that turn `markers` into one marker per positioned stop.
///
/// Removals come first, followed by creates and moves in stop order. A
/// marker whose title changed is removed and created again; one whose
/// position is unchanged produces nothing. Stops without coordinates get no
/// marker. If `stops` repeats an id, the last occurrence wins.
#[must_use]
pub fn diff(markers: &BTreeMap<String, Marker>, stops: &[Stop]) -> Vec<MarkerOp> {
    let desired = desired_markers(stops);
    let by_id: HashMap<&str, &Marker> = desired.iter().map(|m| (m.stop_id.as_str(), m)).collect();

    let mut ops = Vec::new();
    let mut recreate = HashSet::new();

    for (stop_id, current) in markers {
        match by_id.get(stop_id.as_str()) {
            None => ops.push(MarkerOp::Remove {
                stop_id: stop_id.clone(),
            }),
            Some(wanted) if wanted.title != current.title => {
                ops.push(MarkerOp::Remove {
                    stop_id: stop_id.clone(),
                });
                recreate.insert(stop_id.as_str());
            }
            Some(_) => {}
        }
    }

    for marker in desired {
        match markers.get(&marker.stop_id) {
            Some(_) if recreate.contains(marker.stop_id.as_str()) => {
                ops.push(MarkerOp::Create { marker });
            }
            Some(current) if current.position != marker.position => {
                ops.push(MarkerOp::Move {
                    stop_id: marker.stop_id,
                    to: marker.position,
                });
            }
            Some(_) => {}
            None => ops.push(MarkerOp::Create { marker }),
        }
    }

    ops
}

/// One marker per distinct positioned stop, in order of first appearance,
/// with values from the last appearance.
fn desired_markers(stops: &[Stop]) -> Vec<Marker> {
    let mut order: Vec<&str> = Vec::new();
    let mut latest: HashMap<&str, Option<Marker>> = HashMap::new();

    for stop in stops {
        if latest.insert(stop.id(), Marker::for_stop(stop)).is_some() {
            warn!(stop_id = stop.id(), "Duplicate stop id in list, keeping the last");
        } else {
            order.push(stop.id());
        }
    }

    order
        .into_iter()
        .filter_map(|id| latest.remove(id).flatten())
        .collect()
}

/// Counts from one [`MarkerSet::reconcile`] pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    /// Markers added.
    pub created: usize,
    /// Markers moved.
    pub moved: usize,
    /// Markers removed.
    pub removed: usize,
    /// Operations the surface rejected; they are retried next pass.
    pub failed: usize,
}

impl ReconcileReport {
    /// Whether the pass changed nothing and nothing failed.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        *self == Self::default()
    }
}

/// The markers currently on a surface.
#[derive(Debug, Clone, Default)]
pub struct MarkerSet {
    markers: BTreeMap<String, Marker>,
}

impl MarkerSet {
    /// An empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of markers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.markers.len()
    }

    /// Whether there are no markers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.markers.is_empty()
    }

    /// The marker for `stop_id`.
    #[must_use]
    pub fn get(&self, stop_id: &str) -> Option<&Marker> {
        self.markers.get(stop_id)
    }

    /// Marker ids in sorted order.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.markers.keys().map(String::as_str)
    }

    /// Resolve a click reported by the surface to its marker.
    ///
    /// Clicks on ids the set no longer knows are ignored.
    #[must_use]
    pub fn resolve_click(&self, stop_id: &str) -> Option<&Marker> {
        let marker = self.markers.get(stop_id);
        if marker.is_none() {
            debug!(stop_id, "Click on unknown marker");
        }
        marker
    }

    /// Bring the surface in line with `stops`.
    ///
    /// Operations are applied best-effort: a failure is logged and the rest
    /// continue. A marker whose create failed is not recorded and one whose
    /// removal failed stays recorded, so the next pass retries both.
    pub fn reconcile(&mut self, stops: &[Stop], surface: &mut dyn MapSurface) -> ReconcileReport {
        let ops = diff(&self.markers, stops);
        self.apply(ops, surface)
    }

    /// Remove every marker from the surface.
    pub fn clear(&mut self, surface: &mut dyn MapSurface) -> ReconcileReport {
        self.reconcile(&[], surface)
    }

    fn apply(&mut self, ops: Vec<MarkerOp>, surface: &mut dyn MapSurface) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        let mut stuck = HashSet::new();

        for op in ops {
            match op {
                MarkerOp::Remove { stop_id } => match surface.remove_marker(&stop_id) {
                    Ok(()) => {
                        self.markers.remove(&stop_id);
                        report.removed += 1;
                    }
                    Err(e) => {
                        warn!(%stop_id, error = %e, "Failed to remove marker");
                        stuck.insert(stop_id);
                        report.failed += 1;
                    }
                },
                MarkerOp::Create { marker } => {
                    // Still on the map under its old title
                    if stuck.contains(&marker.stop_id) {
                        continue;
                    }
                    match surface.add_marker(&marker) {
                        Ok(()) => {
                            self.markers.insert(marker.stop_id.clone(), marker);
                            report.created += 1;
                        }
                        Err(e) => {
                            warn!(stop_id = %marker.stop_id, error = %e, "Failed to add marker");
                            report.failed += 1;
                        }
                    }
                }
                MarkerOp::Move { stop_id, to } => match surface.move_marker(&stop_id, to) {
                    Ok(()) => {
                        if let Some(marker) = self.markers.get_mut(&stop_id) {
                            marker.position = to;
                        }
                        report.moved += 1;
                    }
                    Err(e) => {
                        warn!(%stop_id, error = %e, "Failed to move marker");
                        report.failed += 1;
                    }
                },
            }
        }

        if !report.is_noop() {
            debug!(
                created = report.created,
                moved = report.moved,
                removed = report.removed,
                failed = report.failed,
                "Reconciled markers"
            );
        }
        report
    }
}
