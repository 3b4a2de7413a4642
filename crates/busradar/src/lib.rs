//! `busradar` - Nearby bus stops backed by a transit API and an on-device cache
//!
//! This library fetches the stops around a location, caches them locally for
//! use when the network is unavailable, rate-limits how often location and
//! map events hit the API, and keeps a set of map markers in step with the
//! resulting stop list.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

pub mod api;
pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
pub mod markers;
pub mod model;
pub mod storage;
pub mod sync;
pub mod view;

pub use api::{HttpTransport, TransitClient, Transport};
pub use config::Config;
pub use error::{Error, ErrorKind, Result};
pub use logging::init_logging;
pub use markers::{MapSurface, Marker, MarkerOp, MarkerSet, ReconcileReport};
pub use model::{BoundingBox, Coordinates, NearbyQuery, Stop};
pub use storage::{StopCache, Storage, StorageStats};
pub use sync::{StopSync, SyncEvent, SyncScheduler, SyncTrigger};
pub use view::NearbyState;
