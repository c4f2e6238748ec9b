use crate::{
    Config,
    config::ServiceId,
    error::UpstreamError,
    model::{Coordinates, Dataset, Place},
    provider::openweather::OpenWeatherProvider,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::fmt::Debug;

pub mod openweather;

/// Source of raw air-pollution payloads.
///
/// Implementations return the response body untouched; shaping it is the
/// normalizer's job.
#[async_trait]
pub trait AirQualityProvider: Send + Sync + Debug {
    async fn current(&self, coords: Coordinates) -> Result<Value, UpstreamError>;

    async fn forecast(&self, coords: Coordinates) -> Result<Value, UpstreamError>;

    async fn history(
        &self,
        coords: Coordinates,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Value, UpstreamError>;

    /// Resolve a place name to coordinates.
    async fn geocode(&self, place: &str) -> Result<Place, UpstreamError>;

    async fn fetch(&self, dataset: Dataset, coords: Coordinates) -> Result<Value, UpstreamError> {
        match dataset {
            Dataset::Current => self.current(coords).await,
            Dataset::Forecast => self.forecast(coords).await,
            Dataset::History { start, end } => self.history(coords, start, end).await,
        }
    }
}

/// Construct the provider from config; the OpenWeather key is required.
pub fn provider_from_config(config: &Config) -> Result<Box<dyn AirQualityProvider>, UpstreamError> {
    let id = ServiceId::OpenWeather;
    let api_key = config.api_key(id).ok_or(UpstreamError::MissingCredential {
        service: id.as_str(),
        env_var: id.env_var(),
    })?;

    let provider = OpenWeatherProvider::new(api_key.to_owned(), config.request_timeout())?;
    Ok(Box::new(provider))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_from_config_errors_when_missing_api_key() {
        let cfg = Config::default();
        let err = provider_from_config(&cfg).unwrap_err();

        assert!(matches!(err, UpstreamError::MissingCredential { service: "openweather", .. }));
        assert!(err.to_string().contains("OPENWEATHER_API_KEY"));
    }

    #[test]
    fn provider_from_config_works_when_configured() {
        let mut cfg = Config::default();
        cfg.upsert_api_key(ServiceId::OpenWeather, "KEY".to_string());

        assert!(provider_from_config(&cfg).is_ok());
    }

    #[test]
    fn map_tiles_key_alone_is_not_enough() {
        let mut cfg = Config::default();
        cfg.upsert_api_key(ServiceId::MapTiles, "TILES".to_string());

        assert!(provider_from_config(&cfg).is_err());
    }
}
