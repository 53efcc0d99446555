//! Error taxonomy for the simulation engine.
//!
//! Failures are always local to the unit that hit them. The runtime decides
//! how to react based on the variant: persistence failures drop the tick,
//! everything else puts the unit into backoff. A missing threshold profile
//! during classification is not an error at all (see
//! [`SensorState::Unknown`](crate::SensorState::Unknown)).

use thiserror::Error;

/// Errors produced by the catalog, generators, gateway and runtime.
#[derive(Debug, Error)]
pub enum SimError {
    // ---
    /// A generator was requested for a sensor type with no threshold profile.
    #[error("unknown sensor type '{0}'")]
    UnknownSensorType(String),

    /// A threshold profile violates the band/deviation invariants.
    #[error("invalid threshold profile for '{sensor_type}': {reason}")]
    InvalidProfile { sensor_type: String, reason: String },

    /// The store rejected a read or write.
    #[error("persistence failure: {0}")]
    Persistence(#[from] sqlx::Error),

    /// Corrective actions could not be encoded or decoded as JSON.
    #[error("corrective action encoding failed: {0}")]
    Encoding(#[from] serde_json::Error),

    /// A generator produced a value that is not a finite number.
    #[error("sensor {source_id}/{sensor_type} produced a non-finite value")]
    NonFiniteValue {
        source_id: String,
        sensor_type: String,
    },
}

impl SimError {
    /// True when the failure came from the store rather than the tick logic.
    pub fn is_persistence(&self) -> bool {
        matches!(self, SimError::Persistence(_))
    }

    /// True when a read hit a table the store does not have yet.
    pub fn is_missing_table(&self) -> bool {
        match self {
            SimError::Persistence(sqlx::Error::Database(e)) => {
                e.message().contains("no such table")
            }
            _ => false,
        }
    }
}
