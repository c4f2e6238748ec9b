//! Shapes normalized records into what the map and chart views consume.

use std::collections::BTreeMap;

use chrono::{DateTime, FixedOffset};
use serde::Serialize;
use serde_json::{Value, json};

use crate::model::{Coordinates, FlatRecord};

/// Zoom the map view opens at.
pub const DEFAULT_ZOOM: u8 = 12;

const TILE_URL: &str = "https://api.mapbox.com/styles/v1/mapbox/light-v11/tiles/{z}/{x}/{y}";

/// Category name on OpenWeather's 1..=5 scale.
pub fn aqi_label(aqi: i64) -> &'static str {
    match aqi {
        1 => "Good",
        2 => "Fair",
        3 => "Moderate",
        4 => "Poor",
        5 => "Very Poor",
        _ => "Unknown",
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MapPoint {
    pub lat: f64,
    pub lon: f64,
    pub aqi: Option<i64>,
    pub hover: BTreeMap<String, String>,
}

/// One point per record that has coordinates.
pub fn map_points(records: &[FlatRecord]) -> Vec<MapPoint> {
    records
        .iter()
        .filter_map(|record| {
            let (lat, lon) = (record.lat?, record.lon?);

            let mut hover = BTreeMap::new();
            hover.insert("time".to_string(), fmt_time(record.timestamp));
            hover.insert(
                "aqi".to_string(),
                match record.aqi {
                    Some(aqi) => format!("{aqi} ({})", aqi_label(aqi)),
                    None => "n/a".to_string(),
                },
            );
            for (name, value) in &record.pollutants {
                hover.insert(name.clone(), fmt_value(*value));
            }

            Some(MapPoint { lat, lon, aqi: record.aqi, hover })
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesPoint {
    pub timestamp: DateTime<FixedOffset>,
    pub value: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Series {
    pub name: String,
    pub points: Vec<SeriesPoint>,
}

/// Line-chart input: one series per column.
///
/// An empty `columns` selects `aqi` and every pollutant column. Records
/// without a timestamp cannot be placed on the time axis and are skipped.
pub fn time_series(records: &[FlatRecord], columns: &[&str]) -> Vec<Series> {
    let Some(first) = records.first() else {
        return Vec::new();
    };

    let available: Vec<&str> = first.columns().into_iter().filter(|c| *c != "timestamp").collect();
    let selected: Vec<&str> = if columns.is_empty() {
        available.iter().copied().filter(|c| *c != "lat" && *c != "lon").collect()
    } else {
        columns
            .iter()
            .copied()
            .filter(|c| {
                let known = available.contains(c);
                if !known {
                    tracing::warn!(column = c, "unknown series column, skipping");
                }
                known
            })
            .collect()
    };

    selected
        .into_iter()
        .map(|column| Series {
            name: column.to_string(),
            points: records
                .iter()
                .filter_map(|r| {
                    Some(SeriesPoint {
                        timestamp: r.timestamp?,
                        value: r.value(column),
                    })
                })
                .collect(),
        })
        .collect()
}

/// GeoJSON `FeatureCollection` with hover fields as properties.
pub fn geojson(points: &[MapPoint]) -> Value {
    let features: Vec<Value> = points
        .iter()
        .map(|p| {
            let mut properties = serde_json::Map::new();
            properties.insert("aqi".to_string(), json!(p.aqi));
            for (key, value) in &p.hover {
                properties.insert(format!("hover.{key}"), json!(value));
            }
            json!({
                "type": "Feature",
                "geometry": { "type": "Point", "coordinates": [p.lon, p.lat] },
                "properties": properties,
            })
        })
        .collect();

    json!({ "type": "FeatureCollection", "features": features })
}

/// Everything a map widget needs to draw the scatter.
#[derive(Debug, Clone, Serialize)]
pub struct MapView {
    pub center: Coordinates,
    pub zoom: u8,
    /// XYZ tile template; absent when no tile key is configured.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tiles: Option<String>,
    pub points: Value,
}

pub fn map_view(center: Coordinates, points: &[MapPoint], tiles_key: Option<&str>) -> MapView {
    MapView {
        center,
        zoom: DEFAULT_ZOOM,
        tiles: tiles_key.map(|key| format!("{TILE_URL}?access_token={key}")),
        points: geojson(points),
    }
}

pub fn fmt_time(ts: Option<DateTime<FixedOffset>>) -> String {
    ts.map(|t| t.format("%Y-%m-%d %H:%M %:z").to_string())
        .unwrap_or_else(|| "n/a".to_string())
}

pub fn fmt_value(value: Option<f64>) -> String {
    value.map(|v| format!("{v:.2}")).unwrap_or_else(|| "n/a".to_string())
}
