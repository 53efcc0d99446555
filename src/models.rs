//! Record shapes shared by the simulation engine and the store.
//!
//! These are the persisted entities other tooling (dashboard, report tool)
//! reads back. Field names are a stable contract.

use std::{fmt, str::FromStr};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

// ---

/// Classification outcome for a single reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SensorState {
    Ok,
    Warning,
    Critical,
    Unknown,
}

impl SensorState {
    // ---
    pub fn as_str(self) -> &'static str {
        match self {
            SensorState::Ok => "OK",
            SensorState::Warning => "WARNING",
            SensorState::Critical => "CRITICAL",
            SensorState::Unknown => "UNKNOWN",
        }
    }

    /// States that produce an alarm record.
    pub fn is_alarm(self) -> bool {
        matches!(self, SensorState::Warning | SensorState::Critical)
    }
}

impl fmt::Display for SensorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SensorState {
    type Err = std::convert::Infallible;

    /// Labels that are not recognised map to `Unknown`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "OK" => SensorState::Ok,
            "WARNING" => SensorState::Warning,
            "CRITICAL" => SensorState::Critical,
            _ => SensorState::Unknown,
        })
    }
}

/// Format a timestamp the way every table stores it.
///
/// Fixed-width RFC 3339 in UTC, so lexical order in the store matches
/// chronological order.
pub fn iso_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Raw measurement produced by one tick of one sensor unit.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct Reading {
    // ---
    pub source: String,
    pub sensor_type: String,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
}

/// Latest classification for a (source, sensor type) key.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CurrentState {
    // ---
    pub source: String,
    pub sensor_type: String,
    pub state: SensorState,
    pub timestamp: DateTime<Utc>,
}

/// Non-OK classification with the suggested corrective actions.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alarm {
    // ---
    pub source: String,
    pub sensor_type: String,
    pub state: SensorState,
    pub actions: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

/// Snapshot of the production accumulators after a growth step.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct ProductionRecord {
    // ---
    pub timestamp: DateTime<Utc>,
    pub biomass_kg: f64,
    pub harvest_kg: f64,
    pub note: String,
}

/// Financial outcome of one production cycle.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct FinancialRecord {
    // ---
    pub timestamp: DateTime<Utc>,
    pub revenue: f64,
    pub cost: f64,
    pub period_profit: f64,
    pub cumulative_profit: f64,
    pub note: String,
}
