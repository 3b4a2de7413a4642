//! `busradar` - CLI for nearby bus stops
//!
//! This binary drives the busradar library the way a map screen would:
//! one-shot fetches with cache fallback, cache inspection, and a `watch`
//! mode fed with location fixes on stdin.

#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::{self, Instant};
use tracing::{debug, info, warn};

use busradar::api::{HttpTransport, TransitClient};
use busradar::cli::output::{
    departures_table, lines_table, parse_watch_input, route_table, selected_line, stops_table,
    vehicle_line, PrintSurface, WatchInput,
};
use busradar::cli::{
    CacheCommand, CachedCommand, Cli, Command, ConfigCommand, DeparturesCommand, LinesCommand,
    NearbyCommand, OutputFormat, RouteCommand, VehicleCommand, WatchCommand,
};
use busradar::model::{BoundingBox, NearbyQuery};
use busradar::storage::StopCache;
use busradar::sync::{StopSync, SyncScheduler, SyncTrigger};
use busradar::view::{Applied, NearbyState};
use busradar::{init_logging, Config, Storage};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbosity());

    let load = || {
        let config =
            Config::load_from(cli.config.clone()).context("failed to load configuration")?;
        debug!(sync = ?config.sync, "Configuration loaded");
        anyhow::Ok(config)
    };

    match cli.command {
        Command::Nearby(cmd) => handle_nearby(&load()?, &cmd).await,
        Command::Cached(cmd) => handle_cached(&load()?, &cmd).await,
        Command::Departures(cmd) => handle_departures(&load()?, &cmd).await,
        Command::Lines(cmd) => handle_lines(&load()?, &cmd).await,
        Command::Route(cmd) => handle_route(&load()?, &cmd).await,
        Command::Vehicle(cmd) => handle_vehicle(&load()?, &cmd).await,
        Command::Watch(cmd) => handle_watch(&load()?, &cmd).await,
        Command::Cache(cmd) => handle_cache(&load()?, cmd),
        Command::Config(cmd) => handle_config(cli.config.clone(), cmd),
    }
}

fn client(config: &Config) -> Result<TransitClient<HttpTransport>> {
    let transport = HttpTransport::new(&config.api).context("failed to build HTTP client")?;
    Ok(TransitClient::new(transport))
}

fn open_cache(config: &Config) -> Result<Arc<dyn StopCache>> {
    let path = config.database_path();
    let storage = Storage::open(&path)
        .with_context(|| format!("failed to open cache at {}", path.display()))?;
    Ok(Arc::new(Mutex::new(storage)))
}

fn stop_sync(config: &Config) -> Result<StopSync<HttpTransport>> {
    Ok(StopSync::new(client(config)?, open_cache(config)?))
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn handle_nearby(config: &Config, cmd: &NearbyCommand) -> Result<()> {
    let mut query = cmd.query()?;
    if query.radius_m.is_none() {
        query = query.within(config.sync.radius_m);
    }
    if query.max_count.is_none() {
        query = query.limit(config.sync.max_count);
    }

    let sync = stop_sync(config)?;
    let stops = match sync.fetch_nearby(&query).await {
        Ok(stops) => stops,
        Err(e) => {
            eprintln!("Could not fetch nearby stops: {e}");
            let stops = sync
                .read_cached(query.bounding_box(config.sync.radius_m))
                .await
                .context("failed to read cache")?;
            eprintln!("Showing {} cached stops.", stops.len());
            stops
        }
    };

    match cmd.format {
        OutputFormat::Json => print_json(&stops),
        OutputFormat::Table => {
            print!("{}", stops_table(&stops));
            Ok(())
        }
    }
}

async fn handle_cached(config: &Config, cmd: &CachedCommand) -> Result<()> {
    let center = cmd.location.center()?;
    let radius = cmd.location.radius.unwrap_or(config.sync.radius_m);

    let sync = stop_sync(config)?;
    let stops = sync
        .read_cached(BoundingBox::around(&center, radius))
        .await
        .context("failed to read cache")?;

    match cmd.format {
        OutputFormat::Json => print_json(&stops),
        OutputFormat::Table => {
            print!("{}", stops_table(&stops));
            Ok(())
        }
    }
}

async fn handle_departures(config: &Config, cmd: &DeparturesCommand) -> Result<()> {
    let departures = client(config)?
        .departures(&cmd.stop, cmd.limit)
        .await
        .with_context(|| format!("failed to fetch departures for stop {}", cmd.stop))?;

    match cmd.format {
        OutputFormat::Json => print_json(&departures),
        OutputFormat::Table => {
            print!("{}", departures_table(&departures));
            Ok(())
        }
    }
}

async fn handle_lines(config: &Config, cmd: &LinesCommand) -> Result<()> {
    let sync = stop_sync(config)?;
    let lines = match sync.fetch_lines(&cmd.stop).await {
        Ok(lines) => lines,
        Err(e) => {
            eprintln!("Could not fetch lines for stop {}: {e}", cmd.stop);
            let lines = sync
                .read_cached_lines(&cmd.stop)
                .await
                .context("failed to read cache")?;
            eprintln!("Showing {} cached lines.", lines.len());
            lines
        }
    };

    match cmd.format {
        OutputFormat::Json => print_json(&lines),
        OutputFormat::Table => {
            print!("{}", lines_table(&lines));
            Ok(())
        }
    }
}

async fn handle_route(config: &Config, cmd: &RouteCommand) -> Result<()> {
    let route = client(config)?
        .line_route(&cmd.line, &cmd.direction)
        .await
        .with_context(|| format!("failed to fetch route of line {}", cmd.line))?;

    match cmd.format {
        OutputFormat::Json => print_json(&route),
        OutputFormat::Table => {
            print!("{}", route_table(&route));
            Ok(())
        }
    }
}

async fn handle_vehicle(config: &Config, cmd: &VehicleCommand) -> Result<()> {
    let vehicle = client(config)?
        .vehicle(&cmd.id)
        .await
        .with_context(|| format!("failed to fetch vehicle {}", cmd.id))?;

    let Some(vehicle) = vehicle else {
        anyhow::bail!("vehicle {} is not known", cmd.id);
    };
    match cmd.format {
        OutputFormat::Json => print_json(&vehicle),
        OutputFormat::Table => {
            print!("{}", vehicle_line(&vehicle));
            Ok(())
        }
    }
}

async fn handle_watch(config: &Config, cmd: &WatchCommand) -> Result<()> {
    let sync = Arc::new(stop_sync(config)?);
    let (triggers, mut events, scheduler) =
        SyncScheduler::new(sync, &config.sync).spawn(16);

    let mut state = NearbyState::new();
    let mut surface = PrintSurface::new(std::io::stdout());
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    // After stdin closes, wait long enough for a scheduled fetch to finish
    let linger = config.sync.fetch_cooldown() + config.api.read_timeout();
    let mut stop_at: Option<Instant> = None;

    info!("Watching stdin for \"lat,lon\" fixes and \"click <stop id>\" lines");
    loop {
        tokio::select! {
            line = lines.next_line(), if stop_at.is_none() => {
                match line.context("failed to read stdin")? {
                    Some(line) if line.trim().is_empty() => {}
                    Some(line) => match parse_watch_input(&line) {
                        Ok(WatchInput::Fix(center)) => {
                            let mut query = NearbyQuery::new(center);
                            if let Some(radius) = cmd.radius {
                                query = query.within(radius);
                            }
                            let trigger = if cmd.pan {
                                SyncTrigger::pan(query)
                            } else {
                                SyncTrigger::gps_fix(query)
                            };
                            if triggers.send(trigger).await.is_err() {
                                break;
                            }
                        }
                        Ok(WatchInput::Click(stop_id)) => {
                            match state.markers().resolve_click(&stop_id) {
                                Some(marker) => {
                                    let stop = state.stops().iter().find(|s| s.id() == stop_id);
                                    print!("{}", selected_line(marker, stop));
                                }
                                None => eprintln!("No marker for stop {stop_id}"),
                            }
                        }
                        Err(e) => eprintln!("Ignoring input: {e}"),
                    },
                    None => {
                        debug!("stdin closed");
                        stop_at = Some(Instant::now() + linger);
                    }
                }
            }
            event = events.recv() => {
                let Some(event) = event else { break };
                match state.apply(event, &mut surface) {
                    Applied::Updated { source, report } => {
                        info!(
                            ?source,
                            stops = state.stops().len(),
                            markers = state.markers().len(),
                            created = report.created,
                            moved = report.moved,
                            removed = report.removed,
                            "Nearby stops updated"
                        );
                    }
                    Applied::Failed => {
                        if let Some(error) = state.take_error() {
                            eprintln!("Nearby stops unavailable: {error}");
                        }
                    }
                    Applied::Stale => {}
                }
            }
            () = time::sleep_until(stop_at.unwrap_or_else(Instant::now)), if stop_at.is_some() => {
                break;
            }
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    warn!(error = %e, "Failed to listen for ctrl-c");
                }
                break;
            }
        }
    }

    drop(triggers);
    drop(events);
    if let Err(e) = scheduler.await {
        warn!(error = %e, "Sync scheduler did not shut down cleanly");
    }
    Ok(())
}

fn handle_cache(config: &Config, cmd: CacheCommand) -> Result<()> {
    let path = config.database_path();
    let mut storage = Storage::open(&path)
        .with_context(|| format!("failed to open cache at {}", path.display()))?;

    match cmd {
        CacheCommand::Stats { json } => {
            let stats = storage.stats()?;
            if json {
                print_json(&serde_json::json!({
                    "database_path": storage.path(),
                    "stops": stats.total_stops,
                    "lines": stats.total_lines,
                    "last_updated": stats.last_updated,
                    "size_bytes": stats.db_size_bytes,
                }))?;
            } else {
                println!("busradar cache");
                println!("--------------");
                println!("Database:      {}", storage.path().display());
                println!("Stops:         {}", stats.total_stops);
                println!("Lines:         {}", stats.total_lines);
                match stats.last_updated {
                    Some(at) => println!("Last updated:  {}", at.to_rfc3339()),
                    None => println!("Last updated:  never"),
                }
                println!("Size:          {} bytes", stats.db_size_bytes);
            }
        }
        CacheCommand::Clear { yes } => {
            if yes {
                let removed = storage.clear()?;
                println!("Removed {removed} cached entries.");
            } else {
                println!("This will delete every cached stop and line.");
                println!("Use --yes to confirm.");
            }
        }
    }
    Ok(())
}

fn handle_config(config_path: Option<std::path::PathBuf>, cmd: ConfigCommand) -> Result<()> {
    match cmd {
        ConfigCommand::Show { json } => {
            let config = Config::load_from(config_path)
                .context("failed to load configuration")?
                .redacted();
            if json {
                print_json(&config)?;
            } else {
                println!("Current Configuration");
                println!("=====================");
                println!();
                println!("[API]");
                println!("  Base URL:           {}", config.api.base_url);
                println!(
                    "  Token:              {}",
                    config.api.token.as_deref().unwrap_or("(none)")
                );
                println!("  Connect timeout:    {} ms", config.api.connect_timeout_ms);
                println!("  Read timeout:       {} ms", config.api.read_timeout_ms);
                println!();
                println!("[Sync]");
                println!("  Fetch cooldown:     {} ms", config.sync.fetch_cooldown_ms);
                println!("  Cache cooldown:     {} ms", config.sync.cache_cooldown_ms);
                println!("  Radius:             {} m", config.sync.radius_m);
                println!("  Max stops:          {}", config.sync.max_count);
                println!();
                println!("[Storage]");
                println!("  Database path:      {}", config.database_path().display());
            }
        }
        ConfigCommand::Path => {
            let path = config_path.unwrap_or_else(Config::default_config_path);
            println!("{}", path.display());
        }
        ConfigCommand::Validate { file } => {
            let path = file
                .or(config_path)
                .unwrap_or_else(Config::default_config_path);
            println!("Validating configuration: {}", path.display());
            match Config::load_from(Some(path)) {
                Ok(_) => println!("Configuration is valid."),
                Err(e) => anyhow::bail!("configuration error: {e}"),
            }
        }
    }
    Ok(())
}
