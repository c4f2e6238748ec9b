//! Core library for the `airq` CLI.
//!
//! This crate defines:
//! - Configuration & credentials handling
//! - Abstraction over air-quality providers
//! - Normalization of raw pollution payloads into flat records
//! - Shaping records for map and chart views
//!
//! It is used by `airq-cli`, but can also be reused by other binaries or services.

pub mod config;
pub mod dashboard;
pub mod error;
pub mod model;
pub mod normalize;
pub mod present;
pub mod provider;

pub use config::{Config, ProviderConfig, ServiceId};
pub use dashboard::{Dashboard, LocationQuery, fetch_dashboard, fetch_records, resolve_location};
pub use error::{Error, PartialDataError, Result, SchemaError, UpstreamError};
pub use model::{CoordSource, Coordinates, Dataset, FlatRecord, Place, TargetZone};
pub use normalize::{FlattenScheme, Normalizer, normalize, retain_complete};
pub use provider::{AirQualityProvider, provider_from_config};
