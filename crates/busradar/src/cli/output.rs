//! Rendering for command output.

use std::fmt::Write as _;
use std::io::Write;

use crate::error::{Error, Result};
use crate::markers::{MapSurface, Marker, MarkerOp};
use crate::model::{Coordinates, Departure, Line, LineRoute, Stop, VehiclePosition};

/// Render stops as a fixed-width table.
#[must_use]
pub fn stops_table(stops: &[Stop]) -> String {
    if stops.is_empty() {
        return "No stops found.\n".to_string();
    }

    let mut out = format!("{:<12} {:>8}  {:<24} {}\n", "ID", "DIST", "POSITION", "NAME");
    for stop in stops {
        let distance = stop
            .distance()
            .map_or_else(|| "-".to_string(), |d| format!("{d} m"));
        let position = stop
            .position()
            .map_or_else(|| "-".to_string(), |p| p.to_string());
        let _ = writeln!(
            out,
            "{:<12} {:>8}  {:<24} {}",
            stop.id(),
            distance,
            position,
            stop.name()
        );
    }
    out
}

/// Render departures as a table.
#[must_use]
pub fn departures_table(departures: &[Departure]) -> String {
    if departures.is_empty() {
        return "No departures.\n".to_string();
    }

    let mut out = format!("{:<6} {:<6} {:>6}  {}\n", "LINE", "TIME", "DELAY", "DESTINATION");
    for departure in departures {
        let delay = match departure.delay_minutes() {
            Some(0) => "on time".to_string(),
            Some(minutes) => format!("{minutes:+}"),
            None => String::new(),
        };
        let _ = writeln!(
            out,
            "{:<6} {:<6} {:>6}  {}",
            departure.line,
            departure.best_time().format("%H:%M"),
            delay,
            departure.destination
        );
    }
    out
}

/// Render the lines serving a stop.
#[must_use]
pub fn lines_table(lines: &[Line]) -> String {
    if lines.is_empty() {
        return "No lines.\n".to_string();
    }

    let mut out = format!("{:<8} {:<8} {}\n", "ID", "NAME", "DIRECTION");
    for line in lines {
        let _ = writeln!(
            out,
            "{:<8} {:<8} {}",
            line.id,
            line.name,
            line.direction.as_deref().unwrap_or("-")
        );
    }
    out
}

/// Render a line route: its stops in order, then the shape length.
#[must_use]
pub fn route_table(route: &LineRoute) -> String {
    let mut out = format!("Line {} direction {}\n", route.line, route.direction);
    for (index, stop) in route.stops.iter().enumerate() {
        let _ = writeln!(out, "{:>3}. {} ({})", index + 1, stop.name(), stop.id());
    }
    let _ = writeln!(out, "Shape: {} points", route.shape.len());
    out
}

/// Render a vehicle position.
#[must_use]
pub fn vehicle_line(vehicle: &VehiclePosition) -> String {
    let mut out = format!("Vehicle {} at {}", vehicle.vehicle_id, vehicle.position);
    if let Some(line) = &vehicle.line {
        let _ = write!(out, " on line {line}");
    }
    if let Some(bearing) = vehicle.bearing {
        let _ = write!(out, " heading {bearing:.0}°");
    }
    if let Some(at) = vehicle.reported_at {
        let _ = write!(out, " (reported {})", at.format("%H:%M:%S"));
    }
    out.push('\n');
    out
}

/// Parse a `lat,lon` line as read by `watch`.
///
/// # Errors
///
/// Returns an error if the line is not two comma-separated numbers in range.
pub fn parse_fix(line: &str) -> Result<Coordinates> {
    let (lat, lon) = line
        .trim()
        .split_once(',')
        .ok_or_else(|| Error::invalid_input(format!("expected \"lat,lon\", got \"{line}\"")))?;

    let parse = |value: &str| {
        value
            .trim()
            .parse::<f64>()
            .map_err(|_| Error::invalid_input(format!("not a number: \"{}\"", value.trim())))
    };
    Coordinates::new(parse(lat)?, parse(lon)?)
}

/// One line of `watch` input.
#[derive(Debug, Clone, PartialEq)]
pub enum WatchInput {
    /// A location fix.
    Fix(Coordinates),
    /// A click on the marker of this stop.
    Click(String),
}

/// Parse a `watch` input line: `lat,lon` or `click <stop id>`.
///
/// # Errors
///
/// Returns an error if the line is neither.
pub fn parse_watch_input(line: &str) -> Result<WatchInput> {
    match line.trim().strip_prefix("click ") {
        Some(stop_id) if !stop_id.trim().is_empty() => {
            Ok(WatchInput::Click(stop_id.trim().to_string()))
        }
        Some(_) => Err(Error::invalid_input("click needs a stop id")),
        None => parse_fix(line).map(WatchInput::Fix),
    }
}

/// Describe a clicked marker, with the stop's distance when it is known.
#[must_use]
pub fn selected_line(marker: &Marker, stop: Option<&Stop>) -> String {
    let mut out = format!(
        "selected {} \"{}\" at {}",
        marker.stop_id, marker.title, marker.position
    );
    if let Some(distance) = stop.and_then(Stop::distance) {
        let _ = write!(out, " ({distance} m)");
    }
    out.push('\n');
    out
}

/// A [`MapSurface`] that prints each operation as a line.
#[derive(Debug)]
pub struct PrintSurface<W> {
    out: W,
}

impl<W: Write> PrintSurface<W> {
    /// Print operations to `out`.
    pub fn new(out: W) -> Self {
        Self { out }
    }

    /// Give back the writer.
    pub fn into_inner(self) -> W {
        self.out
    }

    fn print(&mut self, op: &MarkerOp) -> Result<()> {
        writeln!(self.out, "marker {op}")?;
        Ok(())
    }
}

impl<W: Write> MapSurface for PrintSurface<W> {
    fn add_marker(&mut self, marker: &Marker) -> Result<()> {
        self.print(&MarkerOp::Create {
            marker: marker.clone(),
        })
    }

    fn move_marker(&mut self, stop_id: &str, to: Coordinates) -> Result<()> {
        self.print(&MarkerOp::Move {
            stop_id: stop_id.to_string(),
            to,
        })
    }

    fn remove_marker(&mut self, stop_id: &str) -> Result<()> {
        self.print(&MarkerOp::Remove {
            stop_id: stop_id.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::markers::MarkerSet;

    fn placed(id: &str, name: &str) -> Stop {
        Stop::new(id, name)
            .with_distance(Some(120))
            .with_position(Some(Coordinates::new(48.2, 16.37).unwrap()))
    }

    #[test]
    fn test_stops_table() {
        let table = stops_table(&[placed("1", "Karlsplatz"), Stop::new("2", "Nowhere")]);
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("ID"));
        assert!(lines[1].contains("120 m"));
        assert!(lines[1].contains("48.200000,16.370000"));
        assert!(lines[2].contains("Nowhere"));
    }

    #[test]
    fn test_empty_tables() {
        assert_eq!(stops_table(&[]), "No stops found.\n");
        assert_eq!(departures_table(&[]), "No departures.\n");
        assert_eq!(lines_table(&[]), "No lines.\n");
    }

    #[test]
    fn test_departures_table_shows_delay() {
        let scheduled = Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap();
        let departures = vec![
            Departure {
                line: "13A".to_string(),
                destination: "Hauptbahnhof".to_string(),
                scheduled,
                expected: Some(scheduled + chrono::Duration::minutes(3)),
            },
            Departure {
                line: "2".to_string(),
                destination: "Dornbach".to_string(),
                scheduled,
                expected: None,
            },
        ];
        let table = departures_table(&departures);
        assert!(table.contains("08:03"));
        assert!(table.contains("+3"));
        assert!(table.contains("Dornbach"));
    }

    #[test]
    fn test_lines_table() {
        let table = lines_table(&[
            Line {
                id: "13A".to_string(),
                name: "13A".to_string(),
                direction: Some("Hauptbahnhof".to_string()),
            },
            Line {
                id: "2".to_string(),
                name: "2".to_string(),
                direction: None,
            },
        ]);
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[1].ends_with("Hauptbahnhof"));
        assert!(lines[2].ends_with('-'));
    }

    #[test]
    fn test_vehicle_line() {
        let vehicle = VehiclePosition {
            vehicle_id: "bus-7".to_string(),
            line: Some("13A".to_string()),
            position: Coordinates::new(48.2, 16.37).unwrap(),
            bearing: Some(90.0),
            reported_at: None,
        };
        let line = vehicle_line(&vehicle);
        assert!(line.contains("bus-7"));
        assert!(line.contains("line 13A"));
        assert!(line.contains("heading 90"));
    }

    #[test]
    fn test_parse_fix() {
        let fix = parse_fix(" 48.2082, 16.3738 \n").unwrap();
        assert!((fix.latitude - 48.2082).abs() < 1e-9);
        assert!((fix.longitude - 16.3738).abs() < 1e-9);

        assert!(parse_fix("48.2").is_err());
        assert!(parse_fix("north,east").is_err());
        assert!(parse_fix("95,10").is_err());
    }

    #[test]
    fn test_parse_watch_input() {
        assert_eq!(
            parse_watch_input("48.2,16.37").unwrap(),
            WatchInput::Fix(Coordinates::new(48.2, 16.37).unwrap())
        );
        assert_eq!(
            parse_watch_input("  click 4711 \n").unwrap(),
            WatchInput::Click("4711".to_string())
        );
        assert!(parse_watch_input("click ").is_err());
        assert!(parse_watch_input("clack 1").is_err());
    }

    #[test]
    fn test_click_resolves_to_shown_marker() {
        let mut surface = PrintSurface::new(Vec::new());
        let mut markers = MarkerSet::new();
        let stops = [placed("1", "Karlsplatz")];
        markers.reconcile(&stops, &mut surface);

        let marker = markers.resolve_click("1").unwrap();
        assert_eq!(
            selected_line(marker, stops.first()),
            "selected 1 \"Karlsplatz\" at 48.200000,16.370000 (120 m)\n"
        );
        assert!(markers.resolve_click("2").is_none());
    }

    #[test]
    fn test_print_surface_reports_operations() {
        let mut surface = PrintSurface::new(Vec::new());
        let mut markers = MarkerSet::new();
        markers.reconcile(&[placed("1", "Karlsplatz")], &mut surface);
        markers.clear(&mut surface);

        let printed = String::from_utf8(surface.into_inner()).unwrap();
        assert_eq!(
            printed,
            "marker create 1 \"Karlsplatz\" at 48.200000,16.370000\nmarker remove 1\n"
        );
    }
}
