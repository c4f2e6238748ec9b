use anyhow::{Context, Result, anyhow};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{
    model::{Place, TargetZone},
    normalize::{FlattenScheme, Normalizer},
};

pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;

/// External services that need a credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceId {
    /// Air pollution + geocoding API.
    OpenWeather,
    /// Map tile provider used by whatever draws the map.
    MapTiles,
}

impl ServiceId {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceId::OpenWeather => "openweather",
            ServiceId::MapTiles => "maptiles",
        }
    }

    /// Environment variable that overrides the stored key.
    pub fn env_var(&self) -> &'static str {
        match self {
            ServiceId::OpenWeather => "OPENWEATHER_API_KEY",
            ServiceId::MapTiles => "MAPTILES_API_KEY",
        }
    }

    pub const fn all() -> &'static [ServiceId] {
        &[ServiceId::OpenWeather, ServiceId::MapTiles]
    }
}

impl std::fmt::Display for ServiceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for ServiceId {
    type Error = anyhow::Error;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let lower = value.to_lowercase();

        match lower.as_str() {
            "openweather" => Ok(ServiceId::OpenWeather),
            "maptiles" => Ok(ServiceId::MapTiles),
            _ => Err(anyhow!("Unknown service '{value}'. Supported services: openweather, maptiles.")),
        }
    }
}

/// Credential for a single service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub api_key: String,
}

/// Top-level configuration stored on disk.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// `"UTC"` or an offset such as `"+05:30"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,

    /// Separator used when flattening nested keys, `"."` by default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub separator: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_timeout_secs: Option<u64>,

    /// Used when no place or coordinates are given on the command line.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_location: Option<Place>,

    /// Example TOML:
    /// [providers.openweather]
    /// api_key = "..."
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,
}

impl Config {
    /// Load config from disk, or return an empty default if it doesn't exist yet.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_file_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            // First run: no config file, return empty.
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let cfg: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        tracing::debug!(path = %path.display(), "loaded config");
        Ok(cfg)
    }

    /// Save config to disk, creating parent directories as needed.
    pub fn save(&self) -> Result<PathBuf> {
        let path = Self::config_file_path()?;
        self.save_to(&path)?;
        Ok(path)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let toml =
            toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")?;

        fs::write(path, toml)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Path to the config file.
    pub fn config_file_path() -> Result<PathBuf> {
        let dirs = ProjectDirs::from("dev", "airq", "airq")
            .ok_or_else(|| anyhow!("Could not determine platform config directory"))?;

        Ok(dirs.config_dir().join("config.toml"))
    }

    /// Replace stored keys with `OPENWEATHER_API_KEY` / `MAPTILES_API_KEY` when set.
    pub fn with_env_overrides(self) -> Self {
        self.apply_env(|name| std::env::var(name).ok())
    }

    fn apply_env(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        for id in ServiceId::all() {
            if let Some(key) = lookup(id.env_var()).filter(|k| !k.trim().is_empty()) {
                tracing::debug!(service = %id, "using API key from environment");
                self.upsert_api_key(*id, key.trim().to_string());
            }
        }
        self
    }

    pub fn upsert_api_key(&mut self, id: ServiceId, api_key: String) {
        self.providers.insert(id.as_str().to_string(), ProviderConfig { api_key });
    }

    /// Returns API key for a service, if present.
    pub fn api_key(&self, id: ServiceId) -> Option<&str> {
        self.providers.get(id.as_str()).map(|cfg| cfg.api_key.as_str())
    }

    pub fn is_configured(&self, id: ServiceId) -> bool {
        self.api_key(id).is_some()
    }

    pub fn set_default_location(&mut self, place: Place) {
        self.default_location = Some(place);
    }

    pub fn target_zone(&self) -> Result<TargetZone> {
        match &self.timezone {
            None => Ok(TargetZone::Utc),
            Some(tz) => tz
                .parse::<TargetZone>()
                .with_context(|| format!("Invalid `timezone` in config: '{tz}'")),
        }
    }

    pub fn flatten_scheme(&self) -> Result<FlattenScheme> {
        match self.separator.as_deref() {
            None => Ok(FlattenScheme::dotted()),
            Some("") => Err(anyhow!("`separator` in config must not be empty")),
            Some(sep) => Ok(FlattenScheme::with_separator(sep)),
        }
    }

    pub fn normalizer(&self) -> Result<Normalizer> {
        Ok(Normalizer::new(self.flatten_scheme()?, self.target_zone()?))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Coordinates;

    #[test]
    fn service_id_as_str_roundtrip() {
        for id in ServiceId::all() {
            let parsed = ServiceId::try_from(id.as_str()).expect("roundtrip should succeed");
            assert_eq!(*id, parsed);
        }
        assert_eq!(ServiceId::try_from("OpenWeather").unwrap(), ServiceId::OpenWeather);
    }

    #[test]
    fn unknown_service_error() {
        let err = ServiceId::try_from("doesnotexist").unwrap_err();
        assert!(err.to_string().contains("Unknown service"));
    }

    #[test]
    fn set_api_key_for_service() {
        let mut cfg = Config::default();
        assert!(!cfg.is_configured(ServiceId::OpenWeather));

        cfg.upsert_api_key(ServiceId::OpenWeather, "OPEN_KEY".into());

        assert_eq!(cfg.api_key(ServiceId::OpenWeather), Some("OPEN_KEY"));
        assert!(cfg.is_configured(ServiceId::OpenWeather));
        assert!(!cfg.is_configured(ServiceId::MapTiles));
    }

    #[test]
    fn env_overrides_stored_keys() {
        let mut cfg = Config::default();
        cfg.upsert_api_key(ServiceId::OpenWeather, "FROM_FILE".into());

        let cfg = cfg.apply_env(|name| match name {
            "OPENWEATHER_API_KEY" => Some(" FROM_ENV ".to_string()),
            "MAPTILES_API_KEY" => Some("   ".to_string()),
            _ => None,
        });

        assert_eq!(cfg.api_key(ServiceId::OpenWeather), Some("FROM_ENV"));
        assert!(!cfg.is_configured(ServiceId::MapTiles));
    }

    #[test]
    fn defaults_without_config_file() {
        let cfg = Config::default();

        assert_eq!(cfg.target_zone().unwrap(), TargetZone::Utc);
        assert_eq!(cfg.flatten_scheme().unwrap(), FlattenScheme::dotted());
        assert_eq!(cfg.request_timeout(), Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS));
    }

    #[test]
    fn invalid_timezone_and_separator_are_reported() {
        let cfg = Config {
            timezone: Some("Mars/Olympus".into()),
            ..Config::default()
        };
        assert!(cfg.normalizer().unwrap_err().to_string().contains("Invalid `timezone`"));

        let cfg = Config {
            separator: Some(String::new()),
            ..Config::default()
        };
        assert!(cfg.flatten_scheme().is_err());
    }

    #[test]
    fn load_missing_file_returns_default() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = Config::load_from(&dir.path().join("nope.toml")).unwrap();

        assert!(cfg.providers.is_empty());
        assert!(cfg.default_location.is_none());
    }

    #[test]
    fn save_then_load_preserves_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut cfg = Config {
            timezone: Some("+01:00".into()),
            separator: Some("_".into()),
            request_timeout_secs: Some(3),
            ..Config::default()
        };
        cfg.upsert_api_key(ServiceId::OpenWeather, "OPEN_KEY".into());
        cfg.set_default_location(Place {
            name: "Paris".into(),
            country: Some("FR".into()),
            coords: Coordinates { lat: 48.8566, lon: 2.3522 },
        });
        cfg.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.api_key(ServiceId::OpenWeather), Some("OPEN_KEY"));
        assert_eq!(loaded.default_location, cfg.default_location);
        assert_eq!(loaded.request_timeout(), Duration::from_secs(3));
        assert_eq!(loaded.flatten_scheme().unwrap(), FlattenScheme::underscored());
        assert_eq!(loaded.target_zone().unwrap().offset().local_minus_utc(), 3600);
    }

    #[test]
    fn load_reports_parse_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "providers = 12").unwrap();

        let err = Config::load_from(&path).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config file"));
    }
}
