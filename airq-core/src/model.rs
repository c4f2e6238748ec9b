use std::{collections::BTreeMap, fmt, str::FromStr};

use chrono::{DateTime, FixedOffset, Offset, Utc};
use serde::{Deserialize, Serialize};

use crate::error::PartialDataError;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lon: f64,
}

impl Coordinates {
    /// Validated constructor for user-supplied coordinates.
    pub fn try_new(lat: f64, lon: f64) -> anyhow::Result<Self> {
        if !lat.is_finite() || !(-90.0..=90.0).contains(&lat) {
            anyhow::bail!("Latitude {lat} is out of range (-90..=90).");
        }
        if !lon.is_finite() || !(-180.0..=180.0).contains(&lon) {
            anyhow::bail!("Longitude {lon} is out of range (-180..=180).");
        }
        Ok(Self { lat, lon })
    }
}

impl fmt::Display for Coordinates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.4}, {:.4}", self.lat, self.lon)
    }
}

/// A resolved place, either from geocoding or from the configured default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Place {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(flatten)]
    pub coords: Coordinates,
}

impl fmt::Display for Place {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.country {
            Some(country) => write!(f, "{}, {}", self.name, country),
            None => f.write_str(&self.name),
        }
    }
}

/// Which of the upstream endpoints to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dataset {
    Current,
    Forecast,
    History {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
}

impl Dataset {
    pub fn as_str(&self) -> &'static str {
        match self {
            Dataset::Current => "current",
            Dataset::Forecast => "forecast",
            Dataset::History { .. } => "history",
        }
    }
}

impl fmt::Display for Dataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Zone every normalized timestamp is expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TargetZone {
    #[default]
    Utc,
    Fixed(FixedOffset),
}

impl TargetZone {
    pub fn offset(&self) -> FixedOffset {
        match self {
            TargetZone::Utc => Utc.fix(),
            TargetZone::Fixed(offset) => *offset,
        }
    }

    pub fn localize(&self, instant: DateTime<Utc>) -> DateTime<FixedOffset> {
        instant.with_timezone(&self.offset())
    }
}

impl FromStr for TargetZone {
    type Err = anyhow::Error;

    /// Accepts `UTC`/`Z` or an offset such as `+05:30`, `-0300`, `+02`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.eq_ignore_ascii_case("utc") || trimmed.eq_ignore_ascii_case("z") {
            return Ok(TargetZone::Utc);
        }

        let (sign, rest) = match trimmed.as_bytes().first() {
            Some(b'+') => (1, &trimmed[1..]),
            Some(b'-') => (-1, &trimmed[1..]),
            _ => anyhow::bail!("Unknown time zone '{s}'. Use 'UTC' or an offset like '+05:30'."),
        };

        let digits: String = rest.chars().filter(|c| *c != ':').collect();
        if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
            anyhow::bail!("Invalid UTC offset '{s}'.");
        }
        let (hours, minutes) = match digits.len() {
            1 | 2 => (digits.parse::<i32>()?, 0),
            4 => (digits[..2].parse::<i32>()?, digits[2..].parse::<i32>()?),
            _ => anyhow::bail!("Invalid UTC offset '{s}'."),
        };
        if minutes >= 60 {
            anyhow::bail!("Invalid UTC offset '{s}'.");
        }

        let seconds = sign * (hours * 3600 + minutes * 60);
        let offset = FixedOffset::east_opt(seconds)
            .ok_or_else(|| anyhow::anyhow!("UTC offset '{s}' is out of range."))?;

        if seconds == 0 {
            Ok(TargetZone::Utc)
        } else {
            Ok(TargetZone::Fixed(offset))
        }
    }
}

impl fmt::Display for TargetZone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetZone::Utc => f.write_str("UTC"),
            TargetZone::Fixed(offset) => write!(f, "{offset}"),
        }
    }
}

/// Where a record's coordinates came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CoordSource {
    /// The reading carried its own `coord` object.
    Reading,
    /// Filled in from the query location.
    Query,
    /// Neither usable; `lat`/`lon` are `None`.
    Missing,
}

/// One normalized row.
///
/// `None` is the sentinel for a value the reading lacked. All records from a
/// single `normalize` call share the same `pollutants` key set, and serialize
/// to JSON objects with identical keys.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlatRecord {
    pub timestamp: Option<DateTime<FixedOffset>>,
    pub aqi: Option<i64>,
    #[serde(flatten)]
    pub pollutants: BTreeMap<String, Option<f64>>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub coord_source: CoordSource,
    pub issues: Vec<PartialDataError>,
}

impl FlatRecord {
    pub fn is_complete(&self) -> bool {
        self.issues.is_empty()
    }

    /// Column names of this record in output order.
    pub fn columns(&self) -> Vec<&str> {
        let mut cols = vec!["timestamp", "aqi"];
        cols.extend(self.pollutants.keys().map(String::as_str));
        cols.extend(["lat", "lon"]);
        cols
    }

    /// Numeric value of a column, `aqi` included.
    pub fn value(&self, column: &str) -> Option<f64> {
        match column {
            "aqi" => self.aqi.map(|v| v as f64),
            "lat" => self.lat,
            "lon" => self.lon,
            other => self.pollutants.get(other).copied().flatten(),
        }
    }
}
