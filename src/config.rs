//! Configuration loader for the `hydrofusion-sim` engine.
//!
//! This module centralizes all runtime configuration values and their
//! defaults, loading from environment variables (with optional `.env` file
//! support provided by the caller). Facility layout, tick cadences, store
//! location and the optional sensor catalog file are all resolved here so
//! the rest of the crate never touches `env::var`.
//!
use std::{env, path::PathBuf, time::Duration};

use anyhow::{anyhow, bail, Result};

use crate::catalog::SensorCatalog;

/// Parse an optional environment variable into `$ty`, with a default value.
macro_rules! parse_env {
    ($lookup:expr, $var_name:expr, $ty:ty, $default:expr) => {
        $lookup($var_name)
            .map(|v| v.trim().parse::<$ty>())
            .transpose()
            .map_err(|e| anyhow!("Invalid {}: {}", $var_name, e))?
            .unwrap_or($default)
    };
}

/// Parse an optional comma-separated list, falling back to `$default`.
macro_rules! parse_env_list {
    ($lookup:expr, $var_name:expr, $default:expr) => {
        $lookup($var_name)
            .map(|v| split_list(&v))
            .unwrap_or_else(|| $default.iter().map(|s| s.to_string()).collect())
    };
}

// ---

/// Kind of facility a simulated source belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FacilityKind {
    Greenhouse,
    FishTank,
    SolarPanel,
}

impl FacilityKind {
    // ---
    /// Prefix of the source ids generated for this kind (`Serra_1`, ...).
    ///
    /// These ids are join keys for the dashboard and must stay stable.
    pub fn source_prefix(self) -> &'static str {
        match self {
            FacilityKind::Greenhouse => "Serra",
            FacilityKind::FishTank => "Pesci",
            FacilityKind::SolarPanel => "Pannello",
        }
    }
}

/// How many units of one kind exist, what they measure and how often.
#[derive(Debug, Clone, PartialEq)]
pub struct FacilityConfig {
    pub kind: FacilityKind,
    pub count: u32,
    pub sensor_types: Vec<String>,
    pub interval: Duration,
}

/// One (source, sensor type) pair the runtime must drive.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorUnitSpec {
    pub source: String,
    pub sensor_type: String,
    pub interval: Duration,
}

/// Strongly typed application configuration.
///
/// All fields are immutable after loading, ensuring a consistent configuration
/// snapshot for the lifetime of the process.
#[derive(Debug, Clone)]
pub struct Config {
    // ---
    /// SQLite connection string.
    pub db_url: String,

    /// Maximum number of database connections in the pool.
    pub db_pool_max: u32,

    /// Plant beds, fish tanks and solar panels, in start-up order.
    pub facilities: Vec<FacilityConfig>,

    /// Period of the production/financial cycle.
    pub production_interval: Duration,

    /// Pause applied to a unit after an unhandled tick failure.
    pub failure_backoff: Duration,

    /// Optional JSON file replacing the built-in sensor catalog.
    pub catalog_path: Option<PathBuf>,

    /// Rows per table printed by the report tool.
    pub report_limit: u32,
}

impl Default for Config {
    fn default() -> Self {
        // ---
        Config {
            db_url: "sqlite://hydrofusion.db".to_string(),
            db_pool_max: 5,
            facilities: vec![
                FacilityConfig {
                    kind: FacilityKind::Greenhouse,
                    count: 3,
                    sensor_types: strings(&["pH", "Temperature", "Humidity"]),
                    interval: Duration::from_secs(5),
                },
                FacilityConfig {
                    kind: FacilityKind::FishTank,
                    count: 2,
                    sensor_types: strings(&["Temperature", "Oxygen", "Ammonia", "pH"]),
                    interval: Duration::from_secs(7),
                },
                FacilityConfig {
                    kind: FacilityKind::SolarPanel,
                    count: 5,
                    sensor_types: strings(&["Production"]),
                    interval: Duration::from_secs(10),
                },
            ],
            production_interval: Duration::from_secs(15),
            failure_backoff: Duration::from_secs(60),
            catalog_path: None,
            report_limit: 15,
        }
    }
}

/// Load configuration from environment variables with defaults.
///
/// All variables are optional:
/// - `DATABASE_URL` – SQLite connection string (default: `sqlite://hydrofusion.db`)
/// - `DB_POOL_MAX` – max DB connections (default: 5)
/// - `NUM_GREENHOUSES` / `GREENHOUSE_SENSORS` / `GREENHOUSE_INTERVAL_SECS`
///   (3 / pH,Temperature,Humidity / 5)
/// - `NUM_FISH_TANKS` / `FISH_TANK_SENSORS` / `FISH_TANK_INTERVAL_SECS`
///   (2 / Temperature,Oxygen,Ammonia,pH / 7)
/// - `NUM_SOLAR_PANELS` / `SOLAR_PANEL_SENSORS` / `SOLAR_PANEL_INTERVAL_SECS` (5 / Production / 10)
/// - `PRODUCTION_INTERVAL_SECS` – production cycle period (default: 15)
/// - `FAILURE_BACKOFF_SECS` – backoff after a failed tick (default: 60)
/// - `SENSOR_CATALOG_PATH` – JSON catalog overriding the built-in profiles
/// - `REPORT_LIMIT` – rows per table in the report tool (default: 15)
///
/// Returns an error if any variable is present but invalid.
pub fn load_from_env() -> Result<Config> {
    load_from(|name| env::var(name).ok())
}

/// Same as [`load_from_env`] but reading variables through `lookup`.
pub fn load_from<F>(lookup: F) -> Result<Config>
where
    F: Fn(&str) -> Option<String>,
{
    // ---
    let defaults = Config::default();

    let db_url = lookup("DATABASE_URL").unwrap_or(defaults.db_url);
    let db_pool_max = parse_env!(lookup, "DB_POOL_MAX", u32, defaults.db_pool_max);

    let greenhouses = FacilityConfig {
        kind: FacilityKind::Greenhouse,
        count: parse_env!(lookup, "NUM_GREENHOUSES", u32, 3),
        sensor_types: parse_env_list!(
            lookup,
            "GREENHOUSE_SENSORS",
            ["pH", "Temperature", "Humidity"]
        ),
        interval: secs(
            parse_env!(lookup, "GREENHOUSE_INTERVAL_SECS", u64, 5),
            "GREENHOUSE_INTERVAL_SECS",
        )?,
    };
    let fish_tanks = FacilityConfig {
        kind: FacilityKind::FishTank,
        count: parse_env!(lookup, "NUM_FISH_TANKS", u32, 2),
        sensor_types: parse_env_list!(
            lookup,
            "FISH_TANK_SENSORS",
            ["Temperature", "Oxygen", "Ammonia", "pH"]
        ),
        interval: secs(
            parse_env!(lookup, "FISH_TANK_INTERVAL_SECS", u64, 7),
            "FISH_TANK_INTERVAL_SECS",
        )?,
    };
    let solar_panels = FacilityConfig {
        kind: FacilityKind::SolarPanel,
        count: parse_env!(lookup, "NUM_SOLAR_PANELS", u32, 5),
        sensor_types: parse_env_list!(lookup, "SOLAR_PANEL_SENSORS", ["Production"]),
        interval: secs(
            parse_env!(lookup, "SOLAR_PANEL_INTERVAL_SECS", u64, 10),
            "SOLAR_PANEL_INTERVAL_SECS",
        )?,
    };

    let production_interval = secs(
        parse_env!(lookup, "PRODUCTION_INTERVAL_SECS", u64, 15),
        "PRODUCTION_INTERVAL_SECS",
    )?;
    let failure_backoff = secs(
        parse_env!(lookup, "FAILURE_BACKOFF_SECS", u64, 60),
        "FAILURE_BACKOFF_SECS",
    )?;
    let catalog_path = lookup("SENSOR_CATALOG_PATH")
        .filter(|p| !p.trim().is_empty())
        .map(PathBuf::from);
    let report_limit = parse_env!(lookup, "REPORT_LIMIT", u32, defaults.report_limit);

    Ok(Config {
        db_url,
        db_pool_max,
        facilities: vec![greenhouses, fish_tanks, solar_panels],
        production_interval,
        failure_backoff,
        catalog_path,
        report_limit,
    })
}

impl Config {
    // ---
    /// Expand the facility layout into one spec per (source, sensor type).
    pub fn sensor_units(&self) -> Vec<SensorUnitSpec> {
        // ---
        let mut units = Vec::new();
        for facility in &self.facilities {
            for n in 1..=facility.count {
                let source = format!("{}_{}", facility.kind.source_prefix(), n);
                for sensor_type in &facility.sensor_types {
                    units.push(SensorUnitSpec {
                        source: source.clone(),
                        sensor_type: sensor_type.clone(),
                        interval: facility.interval,
                    });
                }
            }
        }
        units
    }

    /// Built-in catalog, or the JSON file named by `SENSOR_CATALOG_PATH`.
    pub fn load_catalog(&self) -> Result<SensorCatalog> {
        match &self.catalog_path {
            Some(path) => SensorCatalog::from_json_file(path),
            None => Ok(SensorCatalog::builtin()),
        }
    }

    /// Log the loaded configuration for debugging purposes.
    pub fn log_config(&self) {
        // ---
        tracing::info!("Configuration loaded:");
        tracing::info!("  DATABASE_URL             : {}", self.db_url);
        tracing::info!("  DB_POOL_MAX              : {}", self.db_pool_max);
        for facility in &self.facilities {
            tracing::info!(
                "  {:<24} : {} x [{}] every {:?}",
                format!("{:?}", facility.kind),
                facility.count,
                facility.sensor_types.join(", "),
                facility.interval
            );
        }
        tracing::info!(
            "  PRODUCTION_INTERVAL_SECS : {:?}",
            self.production_interval
        );
        tracing::info!("  FAILURE_BACKOFF_SECS     : {:?}", self.failure_backoff);
        match &self.catalog_path {
            Some(path) => tracing::info!("  SENSOR_CATALOG_PATH      : {}", path.display()),
            None => tracing::info!("  SENSOR_CATALOG_PATH      : <built-in>"),
        }
    }
}

fn secs(value: u64, var_name: &str) -> Result<Duration> {
    if value == 0 {
        bail!("Invalid {}: interval must be at least 1 second", var_name);
    }
    Ok(Duration::from_secs(value))
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}
