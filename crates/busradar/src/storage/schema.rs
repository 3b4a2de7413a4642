//! `SQLite` schema definitions for the stop cache.

/// SQL statement to create the stops table.
///
/// Latitude and longitude are both NULL or both set.
pub const CREATE_STOPS_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS stops (
    id TEXT PRIMARY KEY NOT NULL,
    name TEXT NOT NULL,
    distance INTEGER,
    latitude REAL,
    longitude REAL,
    updated_at TEXT NOT NULL,
    CHECK ((latitude IS NULL) = (longitude IS NULL))
)
";

/// SQL statement to create an index for bounding-box queries.
pub const CREATE_STOPS_POSITION_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_stops_position ON stops(latitude, longitude)
";

/// SQL statement to create the lines table.
pub const CREATE_LINES_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS lines (
    id TEXT PRIMARY KEY NOT NULL,
    name TEXT NOT NULL,
    direction TEXT,
    updated_at TEXT NOT NULL
)
";

/// SQL statement to create the table linking stops to the lines serving them.
///
/// `position` keeps the order the API listed the lines in.
pub const CREATE_STOP_LINES_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS stop_lines (
    stop_id TEXT NOT NULL,
    line_id TEXT NOT NULL,
    position INTEGER NOT NULL,
    PRIMARY KEY (stop_id, line_id)
)
";

/// SQL statement to create the metadata table for storing key-value pairs.
pub const CREATE_METADATA_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS metadata (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
)
";

/// All schema creation statements in order.
pub const SCHEMA_STATEMENTS: &[&str] = &[
    CREATE_STOPS_TABLE,
    CREATE_STOPS_POSITION_INDEX,
    CREATE_LINES_TABLE,
    CREATE_STOP_LINES_TABLE,
    CREATE_METADATA_TABLE,
];

/// Tables dropped when the schema is recreated.
pub const DATA_TABLES: &[&str] = &["stops", "lines", "stop_lines"];
