//! Schema versioning for the stop cache.
//!
//! The cache holds nothing that cannot be fetched again, so there are no
//! incremental migrations: a database written by any other schema version is
//! dropped and recreated.

use rusqlite::{Connection, OptionalExtension};
use tracing::info;

use crate::error::{Error, Result};

use super::schema::{DATA_TABLES, SCHEMA_STATEMENTS};

/// The current schema version.
pub const CURRENT_VERSION: i32 = 3;

/// Key used to store the schema version in the metadata table.
const VERSION_KEY: &str = "schema_version";

/// Bring the database to the current schema.
///
/// # Errors
///
/// Returns an error if the schema cannot be created or recreated.
pub fn initialize_schema(conn: &Connection) -> Result<()> {
    // The metadata table has to exist before the version can be read
    conn.execute(super::schema::CREATE_METADATA_TABLE, [])?;

    match get_schema_version(conn)? {
        Some(CURRENT_VERSION) => {}
        Some(old) => {
            info!(
                from = old,
                to = CURRENT_VERSION,
                "Cache schema changed, recreating"
            );
            drop_data_tables(conn)?;
        }
        None => {}
    }

    for statement in SCHEMA_STATEMENTS {
        conn.execute(statement, [])?;
    }
    set_schema_version(conn, CURRENT_VERSION)
}

/// Get the stored schema version, `None` for a fresh database.
pub(crate) fn get_schema_version(conn: &Connection) -> Result<Option<i32>> {
    let value: Option<String> = conn
        .query_row(
            "SELECT value FROM metadata WHERE key = ?1",
            [VERSION_KEY],
            |row| row.get(0),
        )
        .optional()?;

    value
        .map(|v| {
            v.parse().map_err(|_| Error::CacheSchema {
                message: format!("invalid schema version: {v}"),
            })
        })
        .transpose()
}

/// Set the schema version in the database.
pub(crate) fn set_schema_version(conn: &Connection, version: i32) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO metadata (key, value) VALUES (?1, ?2)",
        (VERSION_KEY, version.to_string()),
    )?;
    Ok(())
}

fn drop_data_tables(conn: &Connection) -> Result<()> {
    for table in DATA_TABLES {
        conn.execute_batch(&format!("DROP TABLE IF EXISTS {table};"))?;
    }
    Ok(())
}
