use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::Value;

use crate::{
    error::UpstreamError,
    model::{Coordinates, Place},
};

use super::AirQualityProvider;

pub const DEFAULT_BASE_URL: &str = "https://api.openweathermap.org";

#[derive(Debug, Clone)]
pub struct OpenWeatherProvider {
    api_key: String,
    base_url: String,
    http: Client,
}

impl OpenWeatherProvider {
    pub fn new(api_key: String, timeout: Duration) -> Result<Self, UpstreamError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|source| UpstreamError::Request {
                endpoint: "HTTP client",
                source: source.without_url(),
            })?;

        Ok(Self {
            api_key,
            base_url: DEFAULT_BASE_URL.to_string(),
            http,
        })
    }

    /// Point the provider at a different host, e.g. a local proxy.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    async fn get_json(
        &self,
        endpoint: &'static str,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<Value, UpstreamError> {
        let url = format!("{}{}", self.base_url, path);
        tracing::debug!(endpoint, %url, ?query, "sending request");

        let res = self
            .http
            .get(&url)
            .query(query)
            .query(&[("appid", self.api_key.as_str())])
            .send()
            .await
            .map_err(|source| UpstreamError::Request { endpoint, source: source.without_url() })?;

        let status = res.status();
        let body = res
            .text()
            .await
            .map_err(|source| UpstreamError::Request { endpoint, source: source.without_url() })?;

        tracing::debug!(endpoint, %status, bytes = body.len(), "received response");
        decode_response(endpoint, status, &body)
    }
}

fn coord_query(coords: Coordinates) -> Vec<(&'static str, String)> {
    vec![("lat", coords.lat.to_string()), ("lon", coords.lon.to_string())]
}

#[async_trait]
impl AirQualityProvider for OpenWeatherProvider {
    async fn current(&self, coords: Coordinates) -> Result<Value, UpstreamError> {
        self.get_json("OpenWeather air pollution", "/data/2.5/air_pollution", &coord_query(coords))
            .await
    }

    async fn forecast(&self, coords: Coordinates) -> Result<Value, UpstreamError> {
        self.get_json(
            "OpenWeather air pollution forecast",
            "/data/2.5/air_pollution/forecast",
            &coord_query(coords),
        )
        .await
    }

    async fn history(
        &self,
        coords: Coordinates,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Value, UpstreamError> {
        let mut query = coord_query(coords);
        query.push(("start", start.timestamp().to_string()));
        query.push(("end", end.timestamp().to_string()));

        self.get_json(
            "OpenWeather air pollution history",
            "/data/2.5/air_pollution/history",
            &query,
        )
        .await
    }

    async fn geocode(&self, place: &str) -> Result<Place, UpstreamError> {
        let endpoint = "OpenWeather geocoding";
        let body = self
            .get_json(
                endpoint,
                "/geo/1.0/direct",
                &[("q", place.to_string()), ("limit", "1".to_string())],
            )
            .await?;

        place_from_geocoding(endpoint, place, body)
    }
}

#[derive(Debug, Deserialize)]
struct OwGeoEntry {
    name: String,
    lat: f64,
    lon: f64,
    country: Option<String>,
    state: Option<String>,
}

fn place_from_geocoding(
    endpoint: &'static str,
    query: &str,
    body: Value,
) -> Result<Place, UpstreamError> {
    let entries: Vec<OwGeoEntry> =
        serde_json::from_value(body).map_err(|source| UpstreamError::Decode { endpoint, source })?;

    let entry = entries
        .into_iter()
        .next()
        .ok_or_else(|| UpstreamError::PlaceNotFound { place: query.to_string() })?;

    let name = match entry.state {
        Some(state) if state != entry.name => format!("{}, {}", entry.name, state),
        _ => entry.name,
    };

    Ok(Place {
        name,
        country: entry.country,
        coords: Coordinates { lat: entry.lat, lon: entry.lon },
    })
}

pub(crate) fn decode_response(
    endpoint: &'static str,
    status: StatusCode,
    body: &str,
) -> Result<Value, UpstreamError> {
    if !status.is_success() {
        return Err(UpstreamError::Status {
            endpoint,
            status,
            body: truncate_body(body),
        });
    }

    serde_json::from_str(body).map_err(|source| UpstreamError::Decode { endpoint, source })
}

fn truncate_body(body: &str) -> String {
    const MAX: usize = 200;
    match body.char_indices().nth(MAX) {
        Some((cut, _)) => format!("{}...", &body[..cut]),
        None => body.to_string(),
    }
}
