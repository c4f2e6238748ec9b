use airq_core::{
    AirQualityProvider, Config, Coordinates, Dataset, FlatRecord, FlattenScheme, LocationQuery,
    Place, ServiceId, TargetZone, fetch_dashboard, fetch_records,
    present::{geojson, map_points, map_view, time_series},
    provider_from_config, resolve_location, retain_complete,
};
use anyhow::{Context, bail};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use inquire::{Confirm, Password, PasswordDisplayMode, Text};

use crate::output::{render_series, render_summary, render_table};

const RETRY_HINT: &str = "Could not load air quality data. Check the location and try again.";

/// Top-level CLI struct.
#[derive(Debug, Parser)]
#[command(name = "airq", version, about = "Air quality CLI")]
pub struct Cli {
    /// Increase log verbosity (-v debug, -vv trace).
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Configure credentials for a service ("openweather" or "maptiles").
    Configure {
        /// Service short name, e.g. "openweather" or "maptiles".
        service: String,
    },

    /// Show current air quality and the forecast for a location.
    Show(ShowArgs),

    /// Print normalized readings as JSON for other tools.
    Export(ExportArgs),
}

#[derive(Debug, Clone, Args)]
pub struct LocationArgs {
    /// Place name to geocode, e.g. "New York".
    pub place: Option<String>,

    #[arg(long, allow_hyphen_values = true, requires = "lon", conflicts_with = "place")]
    pub lat: Option<f64>,

    #[arg(long, allow_hyphen_values = true, requires = "lat", conflicts_with = "place")]
    pub lon: Option<f64>,
}

#[derive(Debug, Args)]
pub struct ShowArgs {
    #[command(flatten)]
    pub location: LocationArgs,

    /// Also print the hourly forecast table.
    #[arg(long)]
    pub forecast: bool,

    /// Drop readings with missing values.
    #[arg(long)]
    pub complete_only: bool,

    /// Forecast series to summarize, e.g. `--series aqi,co,pm2_5`.
    #[arg(long, value_delimiter = ',')]
    pub series: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DatasetArg {
    Current,
    Forecast,
    History,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Format {
    /// Normalized records.
    Json,
    /// Chart input: one series per column.
    Series,
    /// GeoJSON FeatureCollection of the readings.
    Geojson,
    /// Map view: center, zoom, tiles and GeoJSON points.
    Map,
}

#[derive(Debug, Args)]
pub struct ExportArgs {
    #[command(flatten)]
    pub location: LocationArgs,

    #[arg(long, value_enum, default_value_t = DatasetArg::Forecast)]
    pub dataset: DatasetArg,

    /// History start, RFC 3339 or YYYY-MM-DD. Defaults to 24 hours before `--end`.
    #[arg(long)]
    pub start: Option<String>,

    /// History end, RFC 3339 or YYYY-MM-DD. Defaults to now.
    #[arg(long)]
    pub end: Option<String>,

    #[arg(long, value_enum, default_value_t = Format::Json)]
    pub format: Format,

    /// Drop readings with missing values.
    #[arg(long)]
    pub complete_only: bool,

    /// Columns for `--format series`, e.g. `aqi,co`.
    #[arg(long, value_delimiter = ',')]
    pub series: Vec<String>,
}

impl Cli {
    pub async fn run(self) -> anyhow::Result<()> {
        match self.command {
            Command::Configure { service } => configure(&service).await,
            Command::Show(args) => show(args).await,
            Command::Export(args) => export(args).await,
        }
    }
}

async fn configure(service: &str) -> anyhow::Result<()> {
    let id = ServiceId::try_from(service)?;
    let mut config = Config::load()?;

    let key = Password::new(&format!("{id} API key:"))
        .without_confirmation()
        .with_display_mode(PasswordDisplayMode::Masked)
        .prompt()?;
    let key = key.trim();
    if key.is_empty() {
        bail!("API key must not be empty.");
    }
    config.upsert_api_key(id, key.to_string());

    if id == ServiceId::OpenWeather {
        if Confirm::new("Set a default location?").with_default(false).prompt()? {
            let name = Text::new("Place name:").prompt()?;
            let provider = provider_from_config(&config)?;
            let place = provider.geocode(name.trim()).await?;
            println!("Default location: {place} ({})", place.coords);
            config.set_default_location(place);
        }

        let current = config.timezone.clone().unwrap_or_else(|| "UTC".to_string());
        let zone = Text::new("Time zone for timestamps (UTC or offset like +05:30):")
            .with_default(&current)
            .prompt()?;
        let parsed: TargetZone = zone.parse()?;
        config.timezone = Some(parsed.to_string());
    }

    let path = config.save()?;
    println!("Saved configuration to {}", path.display());
    Ok(())
}

async fn show(args: ShowArgs) -> anyhow::Result<()> {
    let config = Config::load()?.with_env_overrides();
    let normalizer = config.normalizer()?;
    let provider = provider_from_config(&config)?;

    let place = locate(provider.as_ref(), &args.location, &config).await?;

    let mut dashboard = fetch_dashboard(provider.as_ref(), &normalizer, place.coords)
        .await
        .context(RETRY_HINT)?;
    if args.complete_only {
        dashboard.current = retain_complete(dashboard.current);
        dashboard.forecast = retain_complete(dashboard.forecast);
    }

    let scheme = normalizer.scheme();
    print!("{}", render_summary(&place, dashboard.latest(), scheme));

    if args.forecast {
        println!("\nForecast ({} readings):", dashboard.forecast.len());
        print!("{}", render_table(&dashboard.forecast, scheme));
    }

    let columns = series_columns(&args.series, scheme);
    let columns: Vec<&str> = columns.iter().map(String::as_str).collect();
    let series = time_series(&dashboard.forecast, &columns);
    println!("\nForecast trend:");
    print!("{}", render_series(&series, scheme));

    Ok(())
}

async fn export(args: ExportArgs) -> anyhow::Result<()> {
    let config = Config::load()?.with_env_overrides();
    let normalizer = config.normalizer()?;
    let provider = provider_from_config(&config)?;

    let dataset = dataset_from_args(&args, Utc::now())?;
    let place = locate(provider.as_ref(), &args.location, &config).await?;

    let mut records: Vec<FlatRecord> =
        fetch_records(provider.as_ref(), &normalizer, dataset, place.coords)
            .await
            .context(RETRY_HINT)?;
    if args.complete_only {
        records = retain_complete(records);
    }

    let out = match args.format {
        Format::Json => serde_json::to_string_pretty(&records)?,
        Format::Series => {
            let columns = series_columns(&args.series, normalizer.scheme());
            let columns: Vec<&str> = columns.iter().map(String::as_str).collect();
            serde_json::to_string_pretty(&time_series(&records, &columns))?
        }
        Format::Geojson => serde_json::to_string_pretty(&geojson(&map_points(&records)))?,
        Format::Map => {
            let view = map_view(
                place.coords,
                &map_points(&records),
                config.api_key(ServiceId::MapTiles),
            );
            serde_json::to_string_pretty(&view)?
        }
    };

    println!("{out}");
    Ok(())
}

async fn locate(
    provider: &dyn AirQualityProvider,
    args: &LocationArgs,
    config: &Config,
) -> anyhow::Result<Place> {
    match pick_location(args, config)? {
        Target::Default(place) => {
            tracing::debug!(%place, "using default location");
            Ok(place)
        }
        Target::Query(query) => Ok(resolve_location(provider, query).await.context(RETRY_HINT)?),
    }
}

#[derive(Debug, PartialEq)]
enum Target {
    Query(LocationQuery),
    Default(Place),
}

/// Coordinates win over a place name; the configured default is the fallback.
fn pick_location(args: &LocationArgs, config: &Config) -> anyhow::Result<Target> {
    match (&args.place, args.lat, args.lon) {
        (_, Some(lat), Some(lon)) => Ok(Target::Query(LocationQuery::Coords(
            Coordinates::try_new(lat, lon)?,
        ))),
        (Some(place), _, _) if !place.trim().is_empty() => {
            Ok(Target::Query(LocationQuery::Name(place.trim().to_string())))
        }
        _ => match &config.default_location {
            Some(place) => Ok(Target::Default(place.clone())),
            None => bail!(
                "No location given.\n\
                 Hint: pass a place name or --lat/--lon, or run `airq configure openweather` to set a default location."
            ),
        },
    }
}

/// Short pollutant names (`co`) become full column names (`components.co`).
fn series_columns(requested: &[String], scheme: &FlattenScheme) -> Vec<String> {
    requested
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| {
            if s == "aqi" || scheme.leaf(s) != s {
                s.to_string()
            } else {
                scheme.pollutant_column(s)
            }
        })
        .collect()
}

fn dataset_from_args(args: &ExportArgs, now: DateTime<Utc>) -> anyhow::Result<Dataset> {
    match args.dataset {
        DatasetArg::Current => Ok(Dataset::Current),
        DatasetArg::Forecast => Ok(Dataset::Forecast),
        DatasetArg::History => {
            let end = args.end.as_deref().map(parse_datetime).transpose()?.unwrap_or(now);
            let start = args
                .start
                .as_deref()
                .map(parse_datetime)
                .transpose()?
                .unwrap_or(end - Duration::hours(24));
            if start >= end {
                bail!("History start ({start}) must be before end ({end}).");
            }
            Ok(Dataset::History { start, end })
        }
    }
}

/// RFC 3339 timestamp or a plain date (midnight UTC).
fn parse_datetime(s: &str) -> anyhow::Result<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    let date = NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .with_context(|| format!("Invalid date '{s}'. Use RFC 3339 or YYYY-MM-DD."))?;
    let midnight = date
        .and_hms_opt(0, 0, 0)
        .with_context(|| format!("Invalid date '{s}'."))?;
    Ok(midnight.and_utc())
}
