//! CLI command definitions.
//!
//! This module defines the structure of all CLI subcommands.

use std::path::PathBuf;

use clap::{Args, Subcommand, ValueEnum};

use crate::error::Result;
use crate::model::{Coordinates, NearbyQuery};

/// Where to search, shared by `nearby` and `cached`.
#[derive(Debug, Clone, Args)]
pub struct LocationArgs {
    /// Latitude in decimal degrees
    #[arg(long, allow_hyphen_values = true)]
    pub lat: f64,

    /// Longitude in decimal degrees
    #[arg(long, allow_hyphen_values = true)]
    pub lon: f64,

    /// Search radius in metres (defaults to `sync.radius_m`)
    #[arg(short, long)]
    pub radius: Option<u32>,
}

impl LocationArgs {
    /// The validated search center.
    ///
    /// # Errors
    ///
    /// Returns an error if the coordinates are out of range.
    pub fn center(&self) -> Result<Coordinates> {
        Coordinates::new(self.lat, self.lon)
    }
}

/// Nearby command arguments.
#[derive(Debug, Args)]
pub struct NearbyCommand {
    /// Search location
    #[command(flatten)]
    pub location: LocationArgs,

    /// Search around this stop instead of the bare coordinates
    #[arg(short, long)]
    pub stop: Option<String>,

    /// Maximum number of stops (defaults to `sync.max_count`)
    #[arg(short, long)]
    pub limit: Option<u32>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "table")]
    pub format: OutputFormat,
}

impl NearbyCommand {
    /// The query this command describes.
    ///
    /// # Errors
    ///
    /// Returns an error if the coordinates are out of range.
    pub fn query(&self) -> Result<NearbyQuery> {
        let mut query = NearbyQuery::new(self.location.center()?);
        if let Some(stop) = &self.stop {
            query = query.from_stop(stop.as_str());
        }
        if let Some(radius) = self.location.radius {
            query = query.within(radius);
        }
        if let Some(limit) = self.limit {
            query = query.limit(limit);
        }
        Ok(query)
    }
}

/// Cached command arguments.
#[derive(Debug, Args)]
pub struct CachedCommand {
    /// Search location
    #[command(flatten)]
    pub location: LocationArgs,

    /// Output format
    #[arg(short, long, value_enum, default_value = "table")]
    pub format: OutputFormat,
}

/// Departures command arguments.
#[derive(Debug, Args)]
pub struct DeparturesCommand {
    /// Stop identifier
    pub stop: String,

    /// Maximum number of departures
    #[arg(short, long)]
    pub limit: Option<u32>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "table")]
    pub format: OutputFormat,
}

/// Lines command arguments.
#[derive(Debug, Args)]
pub struct LinesCommand {
    /// Stop identifier
    pub stop: String,

    /// Output format
    #[arg(short, long, value_enum, default_value = "table")]
    pub format: OutputFormat,
}

/// Route command arguments.
#[derive(Debug, Args)]
pub struct RouteCommand {
    /// Line identifier
    pub line: String,

    /// Direction identifier
    #[arg(short, long, default_value = "0")]
    pub direction: String,

    /// Output format
    #[arg(short, long, value_enum, default_value = "table")]
    pub format: OutputFormat,
}

/// Vehicle command arguments.
#[derive(Debug, Args)]
pub struct VehicleCommand {
    /// Vehicle identifier
    pub id: String,

    /// Output format
    #[arg(short, long, value_enum, default_value = "table")]
    pub format: OutputFormat,
}

/// Watch command arguments.
#[derive(Debug, Args)]
pub struct WatchCommand {
    /// Treat every input line as a map pan rather than a location fix
    #[arg(long)]
    pub pan: bool,

    /// Search radius in metres (defaults to `sync.radius_m`)
    #[arg(short, long)]
    pub radius: Option<u32>,
}

/// Cache commands.
#[derive(Debug, Subcommand)]
pub enum CacheCommand {
    /// Show cache statistics
    Stats {
        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Delete all cached stops and lines
    Clear {
        /// Skip confirmation
        #[arg(short, long)]
        yes: bool,
    },
}

/// Configuration commands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration (token redacted)
    Show {
        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Show the configuration file path
    Path,

    /// Validate configuration
    Validate {
        /// Path to configuration file to validate
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
}

/// Output format options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table
    #[default]
    Table,
    /// JSON
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn location(lat: f64, lon: f64) -> LocationArgs {
        LocationArgs {
            lat,
            lon,
            radius: None,
        }
    }

    #[test]
    fn test_output_format_default() {
        assert_eq!(OutputFormat::default(), OutputFormat::Table);
    }

    #[test]
    fn test_location_rejects_out_of_range() {
        assert!(location(91.0, 0.0).center().is_err());
        assert!(location(48.2, 16.37).center().is_ok());
    }

    #[test]
    fn test_nearby_query_carries_options() {
        let cmd = NearbyCommand {
            location: LocationArgs {
                radius: Some(300),
                ..location(48.2, 16.37)
            },
            stop: Some("4711".to_string()),
            limit: Some(5),
            format: OutputFormat::Table,
        };
        let query = cmd.query().unwrap();
        assert_eq!(query.origin_stop(), Some("4711"));
        assert_eq!(query.radius_m, Some(300));
        assert_eq!(query.max_count, Some(5));
    }

    #[test]
    fn test_nearby_query_blank_stop_is_ignored() {
        let cmd = NearbyCommand {
            location: location(48.2, 16.37),
            stop: Some(String::new()),
            limit: None,
            format: OutputFormat::Json,
        };
        assert_eq!(cmd.query().unwrap().origin_stop(), None);
    }
}
