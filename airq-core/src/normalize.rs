//! Turns a raw air-pollution payload into a flat, uniform record set.
//!
//! The upstream shape is `{ "list": [ { "dt", "main": {"aqi"}, "components": {..}, "coord"? } ] }`.
//! Every reading is flattened into separator-joined keys, so drifted payloads
//! (`components_co` instead of `components.co`) are handled by picking a
//! [`FlattenScheme`] rather than by separate code paths.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::{
    error::{PartialDataError, SchemaError, json_kind},
    model::{CoordSource, FlatRecord, TargetZone},
};

/// Key layout of a payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlattenScheme {
    pub separator: String,
    pub timestamp_key: String,
    pub main_prefix: String,
    pub aqi_key: String,
    pub components_prefix: String,
    pub coord_prefix: String,
}

impl Default for FlattenScheme {
    fn default() -> Self {
        Self::dotted()
    }
}

impl FlattenScheme {
    /// `main.aqi`, `components.co`, `coord.lat`.
    pub fn dotted() -> Self {
        Self::with_separator(".")
    }

    /// `main_aqi`, `components_co`, `coord_lat`.
    pub fn underscored() -> Self {
        Self::with_separator("_")
    }

    pub fn with_separator(separator: impl Into<String>) -> Self {
        Self {
            separator: separator.into(),
            timestamp_key: "dt".to_string(),
            main_prefix: "main".to_string(),
            aqi_key: "aqi".to_string(),
            components_prefix: "components".to_string(),
            coord_prefix: "coord".to_string(),
        }
    }

    /// Join a prefix and a leaf name into a flattened column name.
    pub fn column(&self, prefix: &str, leaf: &str) -> String {
        format!("{prefix}{}{leaf}", self.separator)
    }

    /// Full column name of a pollutant, e.g. `co` -> `components.co`.
    pub fn pollutant_column(&self, pollutant: &str) -> String {
        self.column(&self.components_prefix, pollutant)
    }

    /// Pollutant short name of a column; other columns come back unchanged.
    pub fn leaf<'a>(&self, column: &'a str) -> &'a str {
        column.strip_prefix(&self.pollutant_prefix()).unwrap_or(column)
    }

    fn aqi_candidates(&self) -> [String; 2] {
        [self.column(&self.main_prefix, &self.aqi_key), self.aqi_key.clone()]
    }

    fn pollutant_prefix(&self) -> String {
        format!("{}{}", self.components_prefix, self.separator)
    }

    fn is_pollutant_column(&self, key: &str) -> bool {
        let prefix = self.pollutant_prefix();
        key.len() > prefix.len() && key.starts_with(&prefix)
    }
}

/// Flatten nested objects into `prefix<sep>key` entries.
///
/// Arrays and scalars are leaves. Empty objects contribute no keys.
pub fn flatten(value: &Value, separator: &str) -> BTreeMap<String, Value> {
    let mut out = BTreeMap::new();
    if let Value::Object(map) = value {
        flatten_into(map, None, separator, &mut out);
    }
    out
}

fn flatten_into(
    map: &Map<String, Value>,
    prefix: Option<&str>,
    separator: &str,
    out: &mut BTreeMap<String, Value>,
) {
    for (key, value) in map {
        let full = match prefix {
            Some(p) => format!("{p}{separator}{key}"),
            None => key.clone(),
        };
        match value {
            Value::Object(inner) => flatten_into(inner, Some(&full), separator, out),
            leaf => {
                out.insert(full, leaf.clone());
            }
        }
    }
}

/// Normalizes payloads with a fixed scheme and target zone.
#[derive(Debug, Clone, Default)]
pub struct Normalizer {
    scheme: FlattenScheme,
    zone: TargetZone,
}

impl Normalizer {
    pub fn new(scheme: FlattenScheme, zone: TargetZone) -> Self {
        Self { scheme, zone }
    }

    pub fn scheme(&self) -> &FlattenScheme {
        &self.scheme
    }

    pub fn zone(&self) -> TargetZone {
        self.zone
    }

    /// One record per reading, in payload order.
    ///
    /// `query_lat`/`query_lon` fill in coordinates for readings that carry
    /// none, which is the case for forecast and history responses.
    pub fn normalize(
        &self,
        payload: &Value,
        query_lat: f64,
        query_lon: f64,
    ) -> Result<Vec<FlatRecord>, SchemaError> {
        let readings = readings(payload)?;
        if readings.is_empty() {
            tracing::debug!("payload list is empty");
            return Ok(Vec::new());
        }

        let flattened = readings
            .iter()
            .enumerate()
            .map(|(index, reading)| match reading {
                Value::Object(_) => Ok(flatten(reading, &self.scheme.separator)),
                other => Err(SchemaError::ReadingNotObject { index, found: json_kind(other) }),
            })
            .collect::<Result<Vec<_>, _>>()?;

        let columns: BTreeSet<&str> = flattened
            .iter()
            .flat_map(|flat| flat.keys())
            .filter(|key| self.scheme.is_pollutant_column(key))
            .map(String::as_str)
            .collect();

        let records: Vec<FlatRecord> = flattened
            .iter()
            .map(|flat| self.record(flat, &columns, query_lat, query_lon))
            .collect();

        let partial = records.iter().filter(|r| !r.is_complete()).count();
        if partial > 0 {
            tracing::warn!(partial, total = records.len(), "some readings have missing values");
        }
        tracing::debug!(records = records.len(), pollutants = columns.len(), "normalized payload");

        Ok(records)
    }

    fn record(
        &self,
        flat: &BTreeMap<String, Value>,
        columns: &BTreeSet<&str>,
        query_lat: f64,
        query_lon: f64,
    ) -> FlatRecord {
        let mut issues = Vec::new();

        let ts_key = &self.scheme.timestamp_key;
        let timestamp = match present(flat, ts_key) {
            None => {
                issues.push(missing(ts_key));
                None
            }
            Some(value) => match coerce_i64(ts_key, value) {
                Ok(secs) => match DateTime::<Utc>::from_timestamp(secs, 0) {
                    Some(instant) => Some(self.zone.localize(instant)),
                    None => {
                        issues.push(PartialDataError::InvalidTimestamp { value: secs.to_string() });
                        None
                    }
                },
                Err(err) => {
                    issues.push(err);
                    None
                }
            },
        };

        let candidates = self.scheme.aqi_candidates();
        let aqi = match candidates.iter().find_map(|key| present(flat, key).map(|v| (key, v))) {
            None => {
                issues.push(missing(&candidates[0]));
                None
            }
            Some((key, value)) => coerce_i64(key, value).map_err(|e| issues.push(e)).ok(),
        };

        let pollutants = columns
            .iter()
            .map(|col| {
                let value = match present(flat, col) {
                    None => {
                        issues.push(missing(col));
                        None
                    }
                    Some(value) => coerce_f64(col, value).map_err(|e| issues.push(e)).ok(),
                };
                (col.to_string(), value)
            })
            .collect();

        let lat_key = self.scheme.column(&self.scheme.coord_prefix, "lat");
        let lon_key = self.scheme.column(&self.scheme.coord_prefix, "lon");
        let (lat, lon, coord_source) = match (present(flat, &lat_key), present(flat, &lon_key)) {
            (None, None) => (Some(query_lat), Some(query_lon), CoordSource::Query),
            (Some(lat), Some(lon)) => match (coerce_f64(&lat_key, lat), coerce_f64(&lon_key, lon)) {
                (Ok(lat), Ok(lon)) => (Some(lat), Some(lon), CoordSource::Reading),
                (lat, lon) => {
                    issues.extend(lat.err());
                    issues.extend(lon.err());
                    (None, None, CoordSource::Missing)
                }
            },
            (Some(_), None) => {
                issues.push(PartialDataError::PartialCoordinate {
                    present: lat_key.clone(),
                    missing: lon_key.clone(),
                });
                (None, None, CoordSource::Missing)
            }
            (None, Some(_)) => {
                issues.push(PartialDataError::PartialCoordinate {
                    present: lon_key.clone(),
                    missing: lat_key.clone(),
                });
                (None, None, CoordSource::Missing)
            }
        };

        FlatRecord { timestamp, aqi, pollutants, lat, lon, coord_source, issues }
    }
}

/// Normalize with the default dotted scheme and UTC timestamps.
pub fn normalize(
    payload: &Value,
    query_lat: f64,
    query_lon: f64,
) -> Result<Vec<FlatRecord>, SchemaError> {
    Normalizer::default().normalize(payload, query_lat, query_lon)
}

/// Drop records that had any partial data.
pub fn retain_complete(records: Vec<FlatRecord>) -> Vec<FlatRecord> {
    records.into_iter().filter(FlatRecord::is_complete).collect()
}

fn readings(payload: &Value) -> Result<&[Value], SchemaError> {
    let object = payload
        .as_object()
        .ok_or(SchemaError::NotAnObject { found: json_kind(payload) })?;
    match object.get("list") {
        None => Err(SchemaError::MissingList),
        Some(Value::Array(items)) => Ok(items),
        Some(other) => Err(SchemaError::ListNotArray { found: json_kind(other) }),
    }
}

/// A value counts as present unless absent or JSON `null`.
fn present<'a>(flat: &'a BTreeMap<String, Value>, key: &str) -> Option<&'a Value> {
    flat.get(key).filter(|v| !v.is_null())
}

fn missing(field: &str) -> PartialDataError {
    PartialDataError::MissingField { field: field.to_string() }
}

fn not_numeric(field: &str, value: &Value) -> PartialDataError {
    PartialDataError::NotNumeric { field: field.to_string(), found: value.to_string() }
}

fn coerce_i64(field: &str, value: &Value) -> Result<i64, PartialDataError> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64).map(|f| f as i64)),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
    .ok_or_else(|| not_numeric(field, value))
}

fn coerce_f64(field: &str, value: &Value) -> Result<f64, PartialDataError> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
        _ => None,
    }
    .ok_or_else(|| not_numeric(field, value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use serde_json::json;

    fn current_payload() -> Value {
        json!({
            "coord": { "lon": 20.0, "lat": 10.0 },
            "list": [{
                "dt": 1_700_000_000,
                "main": { "aqi": 2 },
                "components": { "co": 201.94, "no2": 0.77, "pm2_5": 0.5 },
                "coord": { "lat": 10, "lon": 20 }
            }]
        })
    }

    fn forecast_payload() -> Value {
        json!({
            "list": [
                { "dt": 1_700_000_000, "main": { "aqi": 1 }, "components": { "co": 200.0, "no2": 1.0 } },
                { "dt": 1_700_003_600, "main": { "aqi": 3 }, "components": { "co": 210.0, "o3": 68.0 } },
                { "dt": 1_700_007_200, "main": { "aqi": 2 }, "components": { "co": 190.0 } }
            ]
        })
    }

    #[test]
    fn one_record_per_reading_in_order() {
        let records = normalize(&forecast_payload(), 1.0, 2.0).unwrap();

        assert_eq!(records.len(), 3);
        let aqis: Vec<_> = records.iter().map(|r| r.aqi).collect();
        assert_eq!(aqis, vec![Some(1), Some(3), Some(2)]);
        let secs: Vec<_> = records.iter().map(|r| r.timestamp.unwrap().timestamp()).collect();
        assert_eq!(secs, vec![1_700_000_000, 1_700_003_600, 1_700_007_200]);
    }

    #[test]
    fn every_record_shares_one_schema() {
        let records = normalize(&forecast_payload(), 1.0, 2.0).unwrap();

        let expected = vec![
            "timestamp",
            "aqi",
            "components.co",
            "components.no2",
            "components.o3",
            "lat",
            "lon",
        ];
        for record in &records {
            assert_eq!(record.columns(), expected);
        }

        // The third reading only had `co`.
        let last = &records[2];
        assert_eq!(last.pollutants["components.no2"], None);
        assert_eq!(last.pollutants["components.o3"], None);
        assert!(last.issues.contains(&PartialDataError::MissingField {
            field: "components.no2".to_string()
        }));
    }

    #[test]
    fn readings_without_coord_use_query_location() {
        let records = normalize(&forecast_payload(), 51.5, -0.12).unwrap();

        for record in &records {
            assert_eq!(record.lat, Some(51.5));
            assert_eq!(record.lon, Some(-0.12));
            assert_eq!(record.coord_source, CoordSource::Query);
        }
    }

    #[test]
    fn reading_coord_wins_over_query_location() {
        let records = normalize(&current_payload(), 51.5, -0.12).unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].lat, Some(10.0));
        assert_eq!(records[0].lon, Some(20.0));
        assert_eq!(records[0].coord_source, CoordSource::Reading);
        assert!(records[0].is_complete());
    }

    #[test]
    fn dt_normalizes_to_utc_instant_and_round_trips() {
        let records = normalize(&current_payload(), 0.0, 0.0).unwrap();
        let ts = records[0].timestamp.unwrap();

        let expected = Utc.with_ymd_and_hms(2023, 11, 14, 22, 13, 20).unwrap();
        assert_eq!(ts, expected);
        assert_eq!(ts.offset().local_minus_utc(), 0);
        assert_eq!(ts.to_rfc3339(), "2023-11-14T22:13:20+00:00");
        assert_eq!(ts.timestamp(), 1_700_000_000);
    }

    #[test]
    fn fixed_offset_zone_keeps_the_instant() {
        let normalizer = Normalizer::new(FlattenScheme::dotted(), "+05:30".parse().unwrap());
        let records = normalizer.normalize(&forecast_payload(), 0.0, 0.0).unwrap();

        for record in &records {
            let ts = record.timestamp.unwrap();
            assert_eq!(ts.offset().local_minus_utc(), 19_800);
        }
        assert_eq!(records[0].timestamp.unwrap().to_rfc3339(), "2023-11-15T03:43:20+05:30");
        assert_eq!(records[0].timestamp.unwrap().timestamp(), 1_700_000_000);
    }

    #[test]
    fn empty_list_is_not_an_error() {
        let records = normalize(&json!({ "list": [] }), 0.0, 0.0).unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn missing_list_is_a_schema_error() {
        let err = normalize(&json!({ "cod": "200" }), 0.0, 0.0).unwrap_err();
        assert_eq!(err, SchemaError::MissingList);
    }

    #[rstest]
    #[case::list_is_object(json!({ "list": {} }), SchemaError::ListNotArray { found: "object" })]
    #[case::list_is_null(json!({ "list": null }), SchemaError::ListNotArray { found: "null" })]
    #[case::payload_is_array(json!([1, 2]), SchemaError::NotAnObject { found: "array" })]
    #[case::reading_is_number(json!({ "list": [{ "dt": 1 }, 7] }), SchemaError::ReadingNotObject { index: 1, found: "number" })]
    fn malformed_payloads(#[case] payload: Value, #[case] expected: SchemaError) {
        assert_eq!(normalize(&payload, 0.0, 0.0).unwrap_err(), expected);
    }

    #[rstest]
    #[case::lat_only(
        json!({ "lat": 10.0 }),
        PartialDataError::PartialCoordinate {
            present: "coord.lat".to_string(),
            missing: "coord.lon".to_string(),
        }
    )]
    #[case::lon_only(
        json!({ "lon": 20.0 }),
        PartialDataError::PartialCoordinate {
            present: "coord.lon".to_string(),
            missing: "coord.lat".to_string(),
        }
    )]
    #[case::lon_not_numeric(
        json!({ "lat": 10.0, "lon": "east" }),
        PartialDataError::NotNumeric {
            field: "coord.lon".to_string(),
            found: "\"east\"".to_string(),
        }
    )]
    fn unusable_coordinate_is_reported_not_inferred(
        #[case] coord: Value,
        #[case] expected: PartialDataError,
    ) {
        let payload = json!({
            "list": [{ "dt": 1_700_000_000, "main": { "aqi": 1 }, "components": {}, "coord": coord }]
        });
        let records = normalize(&payload, 1.0, 2.0).unwrap();

        let record = &records[0];
        assert_eq!(record.lat, None);
        assert_eq!(record.lon, None);
        assert_eq!(record.coord_source, CoordSource::Missing);
        assert_eq!(record.issues, vec![expected]);
    }

    #[test]
    fn serialized_rows_share_one_flat_key_set() {
        let payload = json!({
            "list": [
                { "dt": 1_700_000_000, "main": { "aqi": 1 }, "components": { "co": 200.0, "no2": 1.0 } },
                { "dt": 1_700_003_600, "main": { "aqi": 2 } }
            ]
        });
        let records = normalize(&payload, 1.0, 2.0).unwrap();
        assert!(records[0].is_complete());
        assert!(!records[1].is_complete());

        let rows = serde_json::to_value(&records).unwrap();
        let keys: Vec<Vec<&str>> = rows
            .as_array()
            .unwrap()
            .iter()
            .map(|row| row.as_object().unwrap().keys().map(String::as_str).collect())
            .collect();

        let expected = vec![
            "aqi",
            "components.co",
            "components.no2",
            "coord_source",
            "issues",
            "lat",
            "lon",
            "timestamp",
        ];
        assert_eq!(keys[0], expected);
        assert_eq!(keys[1], expected);
        assert_eq!(rows[1]["components.co"], Value::Null);
        assert_eq!(rows[0]["issues"], json!([]));
    }

    #[test]
    fn missing_required_fields_become_sentinels() {
        let payload = json!({
            "list": [
                { "components": { "co": "n/a" } },
                { "dt": 1_700_000_000, "main": { "aqi": 2.0 }, "components": { "co": "12.5" } }
            ]
        });
        let records = normalize(&payload, 0.0, 0.0).unwrap();

        assert_eq!(records.len(), 2);
        let first = &records[0];
        assert_eq!(first.timestamp, None);
        assert_eq!(first.aqi, None);
        assert_eq!(first.pollutants["components.co"], None);
        assert_eq!(
            first.issues,
            vec![
                PartialDataError::MissingField { field: "dt".to_string() },
                PartialDataError::MissingField { field: "main.aqi".to_string() },
                PartialDataError::NotNumeric {
                    field: "components.co".to_string(),
                    found: "\"n/a\"".to_string(),
                },
            ]
        );

        let second = &records[1];
        assert_eq!(second.aqi, Some(2));
        assert_eq!(second.pollutants["components.co"], Some(12.5));
        assert!(second.is_complete());

        let kept = retain_complete(records);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].aqi, Some(2));
    }

    #[test]
    fn out_of_range_timestamp_is_partial() {
        let payload = json!({ "list": [{ "dt": i64::MAX, "main": { "aqi": 1 } }] });
        let records = normalize(&payload, 0.0, 0.0).unwrap();

        assert_eq!(records[0].timestamp, None);
        assert!(matches!(
            records[0].issues.as_slice(),
            [PartialDataError::InvalidTimestamp { .. }]
        ));
    }

    #[rstest]
    #[case::nested_dotted(
        FlattenScheme::dotted(),
        json!({ "list": [{ "dt": 1_700_000_000, "main": { "aqi": 4 }, "components": { "co": 1.5 } }] }),
        "components.co"
    )]
    #[case::flat_underscored(
        FlattenScheme::underscored(),
        json!({ "list": [{ "dt": 1_700_000_000, "aqi": 4, "components_co": 1.5 }] }),
        "components_co"
    )]
    #[case::nested_underscored(
        FlattenScheme::underscored(),
        json!({ "list": [{ "dt": 1_700_000_000, "main": { "aqi": 4 }, "components": { "co": 1.5 } }] }),
        "components_co"
    )]
    fn drifted_field_names_resolve_through_the_scheme(
        #[case] scheme: FlattenScheme,
        #[case] payload: Value,
        #[case] column: &str,
    ) {
        let normalizer = Normalizer::new(scheme, TargetZone::Utc);
        let records = normalizer.normalize(&payload, 3.0, 4.0).unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].aqi, Some(4));
        assert_eq!(records[0].value(column), Some(1.5));
        assert_eq!(records[0].pollutants.len(), 1);
        assert!(records[0].is_complete());
    }

    #[test]
    fn scheme_maps_between_leaf_and_column() {
        let scheme = FlattenScheme::underscored();

        assert_eq!(scheme.pollutant_column("pm2_5"), "components_pm2_5");
        assert_eq!(scheme.leaf("components_pm2_5"), "pm2_5");
        assert_eq!(scheme.leaf("aqi"), "aqi");
        assert_eq!(FlattenScheme::dotted().leaf("components.co"), "co");
    }

    #[test]
    fn flatten_joins_nested_keys() {
        let flat = flatten(&json!({ "a": { "b": { "c": 1 } }, "d": [1, 2], "e": {} }), "/");

        assert_eq!(flat.len(), 2);
        assert_eq!(flat["a/b/c"], json!(1));
        assert_eq!(flat["d"], json!([1, 2]));
    }
}
