//! Storage layer for busradar.
//!
//! This module provides the `SQLite` cache of stops and lines that backs
//! offline display when the transit API is unreachable.

pub mod migrations;
pub mod schema;

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::model::{BoundingBox, Coordinates, Line, Stop};

/// Persistent store for stops the API has returned.
///
/// Rows are keyed by id and overwritten on every write, so the cache always
/// holds the last value seen for each stop.
#[derive(Debug)]
pub struct Storage {
    /// Path to the database file.
    path: PathBuf,
    /// Database connection.
    conn: Connection,
}

impl Storage {
    /// Open or create a cache database at the given path.
    ///
    /// Creates the parent directories and database file if they don't exist.
    /// A database written by a different schema version is wiped.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or schema initialization fails.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|source| Error::DirectoryCreate {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }

        debug!("Opening cache at {}", path.display());
        let conn = Connection::open(&path).map_err(|source| Error::CacheOpen {
            path: path.clone(),
            source,
        })?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        migrations::initialize_schema(&conn)?;

        info!("Cache opened at {}", path.display());
        Ok(Self { path, conn })
    }

    /// Create an in-memory cache.
    ///
    /// # Errors
    ///
    /// Returns an error if the in-memory database cannot be created.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|source| Error::CacheOpen {
            path: PathBuf::from(":memory:"),
            source,
        })?;

        migrations::initialize_schema(&conn)?;

        Ok(Self {
            path: PathBuf::from(":memory:"),
            conn,
        })
    }

    /// Get the path to the database file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write stops, replacing any existing row with the same id.
    ///
    /// All rows go in one transaction; within the batch the last row for a
    /// given id wins.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails. Nothing is written
    /// in that case.
    pub fn insert_or_replace_stops(&mut self, stops: &[Stop]) -> Result<usize> {
        let now = Utc::now().to_rfc3339();
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                r"
                INSERT OR REPLACE INTO stops (id, name, distance, latitude, longitude, updated_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                ",
            )?;
            for stop in stops {
                let position = stop.position();
                stmt.execute(params![
                    stop.id(),
                    stop.name(),
                    stop.distance(),
                    position.map(|p| p.latitude),
                    position.map(|p| p.longitude),
                    now,
                ])?;
            }
        }
        tx.commit()?;

        debug!(count = stops.len(), "Cached stops");
        Ok(stops.len())
    }

    /// All cached stops whose position falls inside `bbox`.
    ///
    /// Stops without coordinates are never returned. Rows come back in
    /// id order; callers sort by proximity.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn stops_in_box(&self, bbox: &BoundingBox) -> Result<Vec<Stop>> {
        let mut stmt = self.conn.prepare_cached(
            r"
            SELECT id, name, distance, latitude, longitude
            FROM stops
            WHERE latitude BETWEEN ?1 AND ?2
              AND longitude BETWEEN ?3 AND ?4
            ORDER BY id
            ",
        )?;

        let stops = stmt
            .query_map(
                params![bbox.min_lat, bbox.max_lat, bbox.min_lon, bbox.max_lon],
                Self::row_to_stop,
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(stops)
    }

    /// Look up one cached stop.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn stop(&self, id: &str) -> Result<Option<Stop>> {
        let stop = self
            .conn
            .query_row(
                "SELECT id, name, distance, latitude, longitude FROM stops WHERE id = ?1",
                [id],
                Self::row_to_stop,
            )
            .optional()?;
        Ok(stop)
    }

    /// Record the lines serving `stop_id`, replacing what was cached for it.
    ///
    /// Line rows are shared between stops and overwritten by id; the links
    /// of this stop are rewritten in the given order.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails. Nothing is written
    /// in that case.
    pub fn replace_lines_at_stop(&mut self, stop_id: &str, lines: &[Line]) -> Result<usize> {
        let now = Utc::now().to_rfc3339();
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM stop_lines WHERE stop_id = ?1", [stop_id])?;
        {
            let mut line_stmt = tx.prepare_cached(
                "INSERT OR REPLACE INTO lines (id, name, direction, updated_at) VALUES (?1, ?2, ?3, ?4)",
            )?;
            let mut link_stmt = tx.prepare_cached(
                "INSERT OR REPLACE INTO stop_lines (stop_id, line_id, position) VALUES (?1, ?2, ?3)",
            )?;
            for (position, line) in (0_i64..).zip(lines) {
                line_stmt.execute(params![line.id, line.name, line.direction, now])?;
                link_stmt.execute(params![stop_id, line.id, position])?;
            }
        }
        tx.commit()?;

        debug!(stop_id, count = lines.len(), "Cached lines");
        Ok(lines.len())
    }

    /// The cached lines serving `stop_id`, in the order they were stored.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn lines_at_stop(&self, stop_id: &str) -> Result<Vec<Line>> {
        let mut stmt = self.conn.prepare_cached(
            r"
            SELECT lines.id, lines.name, lines.direction
            FROM stop_lines
            JOIN lines ON lines.id = stop_lines.line_id
            WHERE stop_lines.stop_id = ?1
            ORDER BY stop_lines.position
            ",
        )?;

        let lines = stmt
            .query_map([stop_id], |row| {
                Ok(Line {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    direction: row.get(2)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(lines)
    }

    /// Get cache statistics.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn stats(&self) -> Result<StorageStats> {
        let count = |table: &str| -> Result<i64> {
            Ok(self
                .conn
                .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
                    row.get(0)
                })?)
        };
        let total_stops = count("stops")?;
        let total_lines = count("lines")?;

        let last: Option<String> = self
            .conn
            .query_row("SELECT MAX(updated_at) FROM stops", [], |row| {
                row.get::<_, Option<String>>(0)
            })
            .optional()?
            .flatten();
        let last_updated = last
            .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
            .map(|dt| dt.with_timezone(&Utc));

        let db_size_bytes = if self.path.to_string_lossy() == ":memory:" {
            0
        } else {
            std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0)
        };

        Ok(StorageStats {
            total_stops,
            total_lines,
            last_updated,
            db_size_bytes,
        })
    }

    /// Delete every cached stop and line. Returns the number of rows removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn clear(&mut self) -> Result<usize> {
        let tx = self.conn.transaction()?;
        let stops = tx.execute("DELETE FROM stops", [])?;
        let lines = tx.execute("DELETE FROM lines", [])?;
        tx.execute("DELETE FROM stop_lines", [])?;
        tx.commit()?;

        info!(stops, lines, "Cleared cache");
        Ok(stops + lines)
    }

    fn row_to_stop(row: &rusqlite::Row) -> rusqlite::Result<Stop> {
        let id: String = row.get(0)?;
        let name: String = row.get(1)?;
        let distance: Option<u32> = row.get(2)?;
        let latitude: Option<f64> = row.get(3)?;
        let longitude: Option<f64> = row.get(4)?;

        let position = latitude
            .zip(longitude)
            .map(|(latitude, longitude)| Coordinates {
                latitude,
                longitude,
            });

        Ok(Stop::new(id, name)
            .with_distance(distance)
            .with_position(position))
    }
}

/// Statistics about the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageStats {
    /// Number of cached stops.
    pub total_stops: i64,
    /// Number of cached lines.
    pub total_lines: i64,
    /// Most recent stop write.
    pub last_updated: Option<DateTime<Utc>>,
    /// Size of the database file in bytes.
    pub db_size_bytes: u64,
}

/// The cache operations the sync service relies on.
///
/// Implementations are called from the blocking thread pool and must be
/// shareable across threads.
pub trait StopCache: Send + Sync {
    /// Write `stops`, overwriting rows with the same id.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn insert_or_replace(&self, stops: &[Stop]) -> Result<()>;

    /// Stops whose position lies within `bbox`.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    fn query_by_bounding_box(&self, bbox: &BoundingBox) -> Result<Vec<Stop>>;

    /// One stop by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    fn get_by_id(&self, id: &str) -> Result<Option<Stop>>;

    /// Replace the lines recorded for `stop_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn replace_lines_at_stop(&self, stop_id: &str, lines: &[Line]) -> Result<()>;

    /// The lines recorded for `stop_id`; empty if none were.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    fn lines_at_stop(&self, stop_id: &str) -> Result<Vec<Line>>;
}

impl StopCache for Mutex<Storage> {
    fn insert_or_replace(&self, stops: &[Stop]) -> Result<()> {
        let mut storage = self
            .lock()
            .map_err(|_| Error::internal("cache lock poisoned"))?;
        storage.insert_or_replace_stops(stops).map(|_| ())
    }

    fn query_by_bounding_box(&self, bbox: &BoundingBox) -> Result<Vec<Stop>> {
        self.lock()
            .map_err(|_| Error::internal("cache lock poisoned"))?
            .stops_in_box(bbox)
    }

    fn get_by_id(&self, id: &str) -> Result<Option<Stop>> {
        self.lock()
            .map_err(|_| Error::internal("cache lock poisoned"))?
            .stop(id)
    }

    fn replace_lines_at_stop(&self, stop_id: &str, lines: &[Line]) -> Result<()> {
        let mut storage = self
            .lock()
            .map_err(|_| Error::internal("cache lock poisoned"))?;
        storage.replace_lines_at_stop(stop_id, lines).map(|_| ())
    }

    fn lines_at_stop(&self, stop_id: &str) -> Result<Vec<Line>> {
        self.lock()
            .map_err(|_| Error::internal("cache lock poisoned"))?
            .lines_at_stop(stop_id)
    }
}
