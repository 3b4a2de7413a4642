//! Command-line interface for busradar.
//!
//! This module provides the CLI structure, argument types and output
//! rendering for the `busradar` binary.

mod commands;
pub mod output;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub use commands::{
    CacheCommand, CachedCommand, ConfigCommand, DeparturesCommand, LinesCommand, LocationArgs,
    NearbyCommand, OutputFormat, RouteCommand, VehicleCommand, WatchCommand,
};

use crate::logging::Verbosity;

/// busradar - Nearby bus stops, departures and live vehicles
///
/// Queries the transit API around a location, keeps an on-device cache for
/// when the network is down, and keeps a set of map markers in step with
/// the results.
#[derive(Debug, Parser)]
#[command(name = "busradar")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to custom configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// The command to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Fetch stops near a location, falling back to the cache
    Nearby(NearbyCommand),

    /// Show cached stops near a location without touching the network
    Cached(CachedCommand),

    /// Show upcoming departures at a stop
    Departures(DeparturesCommand),

    /// Show the lines serving a stop, falling back to the cache
    Lines(LinesCommand),

    /// Show the stops and shape of a line
    Route(RouteCommand),

    /// Show where a vehicle is
    Vehicle(VehicleCommand),

    /// Read "lat,lon" fixes and "click <stop id>" lines from stdin and print marker updates
    Watch(WatchCommand),

    /// Inspect or clear the local cache
    #[command(subcommand)]
    Cache(CacheCommand),

    /// View configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

impl Cli {
    /// Get the verbosity level based on flags.
    #[must_use]
    pub fn verbosity(&self) -> Verbosity {
        Verbosity::from_flags(self.verbose, self.quiet)
    }
}
