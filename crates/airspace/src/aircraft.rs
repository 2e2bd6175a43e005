//! Core aircraft types for the airspace monitor.
//!
//! This module defines the upstream state vector, the lifecycle status and
//! compass heading of a tracked aircraft, and the derived display entry that
//! is handed to clients.

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Callsign used when the upstream feed reports none.
pub const UNKNOWN_CALLSIGN: &str = "UNKNOWN";

/// Placeholder shown when no heading is known.
pub const NO_DIRECTION: &str = "-";

/// Column positions in an OpenSky state vector row.
mod column {
    pub const ICAO24: usize = 0;
    pub const CALLSIGN: usize = 1;
    pub const LONGITUDE: usize = 5;
    pub const LATITUDE: usize = 6;
    pub const BARO_ALTITUDE: usize = 7;
    pub const VELOCITY: usize = 9;
    pub const TRUE_TRACK: usize = 10;
    pub const CATEGORY: usize = 17;
}

/// One aircraft position report from a single upstream snapshot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateVector {
    /// ICAO 24-bit transponder address, hex encoded.
    pub icao24: String,
    /// Raw callsign as reported (may carry padding).
    pub callsign: Option<String>,
    /// Longitude in decimal degrees.
    pub longitude: Option<f64>,
    /// Latitude in decimal degrees.
    pub latitude: Option<f64>,
    /// Barometric altitude in meters.
    pub baro_altitude: Option<f64>,
    /// Ground speed in m/s.
    pub velocity: Option<f64>,
    /// True track in decimal degrees clockwise from north.
    pub true_track: Option<f64>,
    /// Aircraft category code (only present in extended responses).
    pub category: Option<u8>,
}

impl StateVector {
    /// Parse a state vector from one positional row of the upstream feed.
    ///
    /// Returns `None` if the row is not an array. Missing or mistyped
    /// columns become `None` rather than failing the whole row.
    #[must_use]
    pub fn from_row(row: &Value) -> Option<Self> {
        let cols = row.as_array()?;
        let text = |i: usize| cols.get(i).and_then(Value::as_str).map(str::to_string);
        let number = |i: usize| cols.get(i).and_then(Value::as_f64);

        Some(Self {
            icao24: text(column::ICAO24).unwrap_or_default(),
            callsign: text(column::CALLSIGN),
            longitude: number(column::LONGITUDE),
            latitude: number(column::LATITUDE),
            baro_altitude: number(column::BARO_ALTITUDE),
            velocity: number(column::VELOCITY),
            true_track: number(column::TRUE_TRACK),
            category: cols
                .get(column::CATEGORY)
                .and_then(Value::as_u64)
                .and_then(|c| u8::try_from(c).ok()),
        })
    }

    /// The key this aircraft is tracked under: the trimmed callsign, or
    /// [`UNKNOWN_CALLSIGN`] if it is empty.
    #[must_use]
    pub fn callsign_key(&self) -> String {
        let trimmed = self.callsign.as_deref().unwrap_or_default().trim();
        if trimmed.is_empty() {
            UNKNOWN_CALLSIGN.to_string()
        } else {
            trimmed.to_string()
        }
    }

    /// Latitude and longitude, if both are reported.
    #[must_use]
    pub fn position(&self) -> Option<(f64, f64)> {
        Some((self.latitude?, self.longitude?))
    }

    /// Status derived from the reported altitude.
    #[must_use]
    pub fn status(&self) -> Status {
        match self.baro_altitude {
            Some(alt) if alt > 0.0 => Status::Active,
            _ => Status::Past,
        }
    }
}

/// Language used for status and compass labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    /// German labels, as expected by the e-ink display client.
    #[default]
    De,
    /// English labels.
    En,
}

/// Lifecycle status of a tracked aircraft.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// Currently reporting a positive altitude in the latest snapshot.
    #[serde(alias = "Im Luftraum")]
    Active,
    /// No longer in the snapshot, or reporting no altitude.
    #[serde(alias = "Vergangen")]
    Past,
}

impl Status {
    /// Parse a stored status label, accepting legacy labels.
    #[must_use]
    pub fn parse(label: &str) -> Option<Self> {
        match label.trim() {
            "active" | "Active" | "Im Luftraum" => Some(Self::Active),
            "past" | "Past" | "Vergangen" => Some(Self::Past),
            _ => None,
        }
    }

    /// The label shown to display clients.
    #[must_use]
    pub fn label(self, language: Language) -> &'static str {
        match (self, language) {
            (Self::Active, Language::De) => "Im Luftraum",
            (Self::Past, Language::De) => "Vergangen",
            (Self::Active, Language::En) => "Active",
            (Self::Past, Language::En) => "Past",
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Past => write!(f, "past"),
        }
    }
}

/// One of the eight compass octants.
#[allow(clippy::upper_case_acronyms)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Compass {
    /// North.
    N,
    /// Northeast.
    NE,
    /// East.
    E,
    /// Southeast.
    SE,
    /// South.
    S,
    /// Southwest.
    SW,
    /// West.
    W,
    /// Northwest.
    NW,
}

impl Compass {
    const OCTANTS: [Self; 8] = [
        Self::N,
        Self::NE,
        Self::E,
        Self::SE,
        Self::S,
        Self::SW,
        Self::W,
        Self::NW,
    ];

    /// Map a heading in degrees to the nearest octant.
    ///
    /// Headings outside `[0, 360)` are normalised first. Returns `None` for
    /// non-finite input.
    #[must_use]
    pub fn from_degrees(degrees: f64) -> Option<Self> {
        if !degrees.is_finite() {
            return None;
        }
        let normalized = degrees.rem_euclid(360.0);
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let index = ((normalized / 45.0).round() as usize) % 8;
        Some(Self::OCTANTS[index])
    }

    /// Parse a stored compass label in either language.
    #[must_use]
    pub fn parse(label: &str) -> Option<Self> {
        match label.trim().to_uppercase().as_str() {
            "N" => Some(Self::N),
            "NE" | "NO" => Some(Self::NE),
            "E" | "O" => Some(Self::E),
            "SE" | "SO" => Some(Self::SE),
            "S" => Some(Self::S),
            "SW" => Some(Self::SW),
            "W" => Some(Self::W),
            "NW" => Some(Self::NW),
            _ => None,
        }
    }

    /// The label shown to display clients.
    #[must_use]
    pub fn label(self, language: Language) -> &'static str {
        match (self, language) {
            (Self::N, _) => "N",
            (Self::NE, Language::De) => "NO",
            (Self::NE, Language::En) => "NE",
            (Self::E, Language::De) => "O",
            (Self::E, Language::En) => "E",
            (Self::SE, Language::De) => "SO",
            (Self::SE, Language::En) => "SE",
            (Self::S, _) => "S",
            (Self::SW, _) => "SW",
            (Self::W, _) => "W",
            (Self::NW, _) => "NW",
        }
    }
}

/// One row of the display list.
///
/// Display entries are derived on every poll and never persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DisplayEntry {
    /// Local time of day the aircraft was first seen (`HH:MM`).
    pub time: String,
    /// Resolved airline name, or the raw callsign.
    pub callsign: String,
    /// Raw callsign the aircraft is tracked under.
    pub code: String,
    /// Compass label or `-`.
    pub direction: String,
    /// Localised status label.
    pub status: String,
    /// Barometric altitude in meters (0 for placeholders).
    pub altitude: f64,
    /// Ground speed in m/s (0 for placeholders).
    pub speed: f64,
    /// Distance from the monitoring center in km, rounded to 0.1.
    pub distance: f64,
    /// Typed status used for ordering.
    #[serde(skip)]
    pub state: Status,
    /// First-seen instant used for ordering.
    #[serde(skip)]
    pub first_seen: DateTime<Utc>,
    /// Whether the entry carries live telemetry from the current snapshot.
    #[serde(skip)]
    pub live: bool,
}

impl DisplayEntry {
    /// Whether this entry is in the Active group.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state == Status::Active
    }
}

/// Format an instant as a local time of day.
#[must_use]
pub fn time_of_day(instant: DateTime<Utc>) -> String {
    instant.with_timezone(&Local).format("%H:%M").to_string()
}

/// Round a distance to one decimal place.
#[must_use]
pub fn round_distance(km: f64) -> f64 {
    (km * 10.0).round() / 10.0
}
