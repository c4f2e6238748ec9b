//! One fetch-normalize cycle per user interaction.

use crate::{
    error::{Result, UpstreamError},
    model::{Coordinates, Dataset, FlatRecord, Place},
    normalize::Normalizer,
    provider::AirQualityProvider,
};

/// What the user typed to pick a location.
#[derive(Debug, Clone, PartialEq)]
pub enum LocationQuery {
    Coords(Coordinates),
    Name(String),
}

pub async fn resolve_location(
    provider: &dyn AirQualityProvider,
    query: LocationQuery,
) -> std::result::Result<Place, UpstreamError> {
    match query {
        LocationQuery::Coords(coords) => Ok(Place {
            name: coords.to_string(),
            country: None,
            coords,
        }),
        LocationQuery::Name(name) => {
            let place = provider.geocode(&name).await?;
            tracing::info!(query = %name, resolved = %place, coords = %place.coords, "geocoded place");
            Ok(place)
        }
    }
}

pub async fn fetch_records(
    provider: &dyn AirQualityProvider,
    normalizer: &Normalizer,
    dataset: Dataset,
    coords: Coordinates,
) -> Result<Vec<FlatRecord>> {
    let payload = provider.fetch(dataset, coords).await?;
    let records = normalizer.normalize(&payload, coords.lat, coords.lon)?;
    tracing::info!(%dataset, records = records.len(), "fetched readings");
    Ok(records)
}

#[derive(Debug, Clone, PartialEq)]
pub struct Dashboard {
    pub current: Vec<FlatRecord>,
    pub forecast: Vec<FlatRecord>,
}

impl Dashboard {
    /// Latest current reading, if the API returned any.
    pub fn latest(&self) -> Option<&FlatRecord> {
        self.current.iter().max_by_key(|r| r.timestamp)
    }
}

/// Current and forecast payloads are independent, so both are in flight at once.
pub async fn fetch_dashboard(
    provider: &dyn AirQualityProvider,
    normalizer: &Normalizer,
    coords: Coordinates,
) -> Result<Dashboard> {
    let (current, forecast) = tokio::try_join!(
        fetch_records(provider, normalizer, Dataset::Current, coords),
        fetch_records(provider, normalizer, Dataset::Forecast, coords),
    )?;

    Ok(Dashboard { current, forecast })
}
