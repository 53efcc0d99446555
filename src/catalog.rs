//! Sensor catalog: threshold profiles, classification and corrective actions.
//!
//! The catalog is built once at startup (built-in defaults or a JSON file)
//! and shared read-only between every unit through an `Arc`.

use std::{collections::BTreeMap, fs, path::Path};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::{SensorState, SimError};

// ---

/// Inclusive numeric band `[min, max]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Band {
    pub min: f64,
    pub max: f64,
}

impl Band {
    // ---
    pub const fn new(min: f64, max: f64) -> Self {
        Band { min, max }
    }

    pub fn contains(&self, value: f64) -> bool {
        self.min <= value && value <= self.max
    }

    fn covers(&self, other: &Band) -> bool {
        self.min <= other.min && other.max <= self.max
    }
}

/// Gaussian parameters and operating bands for one sensor type.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdProfile {
    pub mean: f64,
    pub std_dev: f64,
    pub ok: Band,
    pub warning: Band,
}

impl ThresholdProfile {
    // ---
    /// OK band first, then WARNING band, otherwise CRITICAL.
    pub fn classify(&self, value: f64) -> SensorState {
        if self.ok.contains(value) {
            SensorState::Ok
        } else if self.warning.contains(value) {
            SensorState::Warning
        } else {
            SensorState::Critical
        }
    }

    /// Hard rail for generated values: the WARNING band widened by 2σ.
    pub fn safety_limits(&self) -> Band {
        Band::new(
            self.warning.min - 2.0 * self.std_dev,
            self.warning.max + 2.0 * self.std_dev,
        )
    }

    fn validate(&self, sensor_type: &str) -> Result<(), SimError> {
        // ---
        let invalid = |reason: &str| SimError::InvalidProfile {
            sensor_type: sensor_type.to_string(),
            reason: reason.to_string(),
        };

        if !self.mean.is_finite() {
            return Err(invalid("mean must be finite"));
        }
        if !(self.std_dev.is_finite() && self.std_dev > 0.0) {
            return Err(invalid("std_dev must be a positive finite number"));
        }
        for band in [&self.ok, &self.warning] {
            if !(band.min.is_finite() && band.max.is_finite() && band.min <= band.max) {
                return Err(invalid("band bounds must be finite with min <= max"));
            }
        }
        if !self.warning.covers(&self.ok) {
            return Err(invalid("OK band must lie inside the WARNING band"));
        }
        Ok(())
    }
}

/// Suggestions attached to alarm records, per non-OK state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CorrectiveActions {
    #[serde(default)]
    pub warning: Vec<String>,
    #[serde(default)]
    pub critical: Vec<String>,
}

/// Registry of threshold profiles and corrective actions keyed by sensor type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorCatalog {
    profiles: BTreeMap<String, ThresholdProfile>,
    #[serde(default)]
    actions: BTreeMap<String, CorrectiveActions>,
}

impl SensorCatalog {
    // ---
    /// Build a catalog, rejecting any profile that breaks the band invariants.
    pub fn new(
        profiles: BTreeMap<String, ThresholdProfile>,
        actions: BTreeMap<String, CorrectiveActions>,
    ) -> Result<Self, SimError> {
        // ---
        for (sensor_type, profile) in &profiles {
            profile.validate(sensor_type)?;
        }
        Ok(SensorCatalog { profiles, actions })
    }

    /// Load a catalog from a JSON file with `profiles` and `actions` maps.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        // ---
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read sensor catalog {}", path.display()))?;
        let raw: SensorCatalog = serde_json::from_str(&text)
            .with_context(|| format!("Invalid sensor catalog JSON in {}", path.display()))?;
        Ok(SensorCatalog::new(raw.profiles, raw.actions)?)
    }

    /// Default facility catalog.
    pub fn builtin() -> Self {
        // ---
        let profiles = [
            ("pH", 7.0, 0.2, (6.5, 7.5), (6.0, 8.0)),
            ("Temperature", 25.0, 1.0, (22.0, 28.0), (20.0, 30.0)),
            ("Humidity", 60.0, 5.0, (50.0, 70.0), (40.0, 80.0)),
            ("Oxygen", 7.0, 0.5, (5.5, 8.5), (4.0, 10.0)),
            ("Ammonia", 0.4, 0.1, (0.0, 0.8), (0.0, 1.5)),
            ("Production", 5.0, 1.5, (2.5, 6.5), (0.0, 8.0)),
        ]
        .into_iter()
        .map(|(name, mean, std_dev, ok, warning)| {
            (
                name.to_string(),
                ThresholdProfile {
                    mean,
                    std_dev,
                    ok: Band::new(ok.0, ok.1),
                    warning: Band::new(warning.0, warning.1),
                },
            )
        })
        .collect();

        let actions = [
            (
                "pH",
                ["Monitor the value.", "Check the nutrient solution."],
                ["Correct pH with buffering agents.", "Replace the water."],
            ),
            (
                "Temperature",
                ["Check ventilation.", "Verify the thermostat."],
                ["Start cooling or heating.", "Isolate the greenhouse."],
            ),
            (
                "Humidity",
                ["Check irrigation.", "Inspect for condensation."],
                ["Start the dehumidifier.", "Add misting nozzles."],
            ),
            (
                "Oxygen",
                ["Check the pumps.", "Monitor plants and fish."],
                ["Restore the pump.", "Add active oxygenation."],
            ),
            (
                "Ammonia",
                ["Check filtration.", "Reduce feeding."],
                ["Replace part of the water.", "Inspect the biofilter."],
            ),
            (
                "Production",
                ["Clean the panels.", "Check for shading."],
                ["Inspect the inverter.", "Replace faulty modules."],
            ),
        ]
        .into_iter()
        .map(|(name, warning, critical)| {
            (
                name.to_string(),
                CorrectiveActions {
                    warning: warning.iter().map(|s| s.to_string()).collect(),
                    critical: critical.iter().map(|s| s.to_string()).collect(),
                },
            )
        })
        .collect();

        SensorCatalog { profiles, actions }
    }

    pub fn profile(&self, sensor_type: &str) -> Option<&ThresholdProfile> {
        self.profiles.get(sensor_type)
    }

    pub fn sensor_types(&self) -> impl Iterator<Item = &str> {
        self.profiles.keys().map(String::as_str)
    }

    /// Classify a value; a type with no profile is `Unknown`, never an error.
    pub fn classify(&self, sensor_type: &str, value: f64) -> SensorState {
        self.profile(sensor_type)
            .map_or(SensorState::Unknown, |p| p.classify(value))
    }

    /// Ordered suggestions for a non-OK state; empty when none are registered.
    pub fn corrective_actions(&self, sensor_type: &str, state: SensorState) -> &[String] {
        // ---
        let Some(actions) = self.actions.get(sensor_type) else {
            return &[];
        };
        match state {
            SensorState::Warning => actions.warning.as_slice(),
            SensorState::Critical => actions.critical.as_slice(),
            SensorState::Ok | SensorState::Unknown => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn test_ph_boundaries_are_inclusive() {
        // ---
        let catalog = SensorCatalog::builtin();

        assert_eq!(catalog.classify("pH", 7.0), SensorState::Ok);
        assert_eq!(catalog.classify("pH", 6.5), SensorState::Ok);
        assert_eq!(catalog.classify("pH", 7.5), SensorState::Ok);
        assert_eq!(catalog.classify("pH", 7.6), SensorState::Warning);
        assert_eq!(catalog.classify("pH", 6.0), SensorState::Warning);
        assert_eq!(catalog.classify("pH", 8.0), SensorState::Warning);
        assert_eq!(catalog.classify("pH", 8.1), SensorState::Critical);
        assert_eq!(catalog.classify("pH", 5.9), SensorState::Critical);
    }

    #[test]
    fn test_unknown_type_is_reported_not_rejected() {
        // ---
        let catalog = SensorCatalog::builtin();
        assert_eq!(catalog.classify("Salinity", 1.0), SensorState::Unknown);
        assert!(catalog
            .corrective_actions("Salinity", SensorState::Critical)
            .is_empty());
    }

    #[test]
    fn test_nan_is_critical() {
        // ---
        let catalog = SensorCatalog::builtin();
        assert_eq!(
            catalog.classify("Temperature", f64::NAN),
            SensorState::Critical
        );
    }

    #[test]
    fn test_corrective_actions_per_state() {
        // ---
        let catalog = SensorCatalog::builtin();

        let warning = catalog.corrective_actions("pH", SensorState::Warning);
        assert_eq!(warning.len(), 2);
        assert_eq!(warning[0], "Monitor the value.");

        assert!(!catalog
            .corrective_actions("Ammonia", SensorState::Critical)
            .is_empty());
        assert!(catalog.corrective_actions("pH", SensorState::Ok).is_empty());
    }

    #[test]
    fn test_builtin_catalog_is_valid() {
        // ---
        let builtin = SensorCatalog::builtin();
        let rebuilt = SensorCatalog::new(builtin.profiles.clone(), builtin.actions.clone());
        assert!(rebuilt.is_ok());
        assert_eq!(builtin.sensor_types().count(), 6);
    }

    #[test]
    fn test_rejects_ok_band_outside_warning() {
        // ---
        let mut profiles = BTreeMap::new();
        profiles.insert(
            "pH".to_string(),
            ThresholdProfile {
                mean: 7.0,
                std_dev: 0.2,
                ok: Band::new(6.5, 8.5),
                warning: Band::new(6.0, 8.0),
            },
        );

        let err = SensorCatalog::new(profiles, BTreeMap::new()).unwrap_err();
        assert!(matches!(err, SimError::InvalidProfile { .. }));
    }

    #[test]
    fn test_rejects_non_positive_deviation() {
        // ---
        let mut profiles = BTreeMap::new();
        profiles.insert(
            "Oxygen".to_string(),
            ThresholdProfile {
                mean: 7.0,
                std_dev: 0.0,
                ok: Band::new(5.5, 8.5),
                warning: Band::new(4.0, 10.0),
            },
        );

        assert!(SensorCatalog::new(profiles, BTreeMap::new()).is_err());
    }

    #[test]
    fn test_catalog_from_json() {
        // ---
        let json = r#"{
            "profiles": {
                "Salinity": {
                    "mean": 35.0, "std_dev": 1.0,
                    "ok": {"min": 33.0, "max": 37.0},
                    "warning": {"min": 30.0, "max": 40.0}
                }
            },
            "actions": {
                "Salinity": {"warning": ["Dilute."]}
            }
        }"#;

        let file_name = format!("hydrofusion-catalog-{}.json", std::process::id());
        let path = std::env::temp_dir().join(file_name);
        fs::write(&path, json).unwrap();
        let catalog = SensorCatalog::from_json_file(&path).unwrap();
        fs::remove_file(&path).ok();

        assert_eq!(catalog.classify("Salinity", 38.0), SensorState::Warning);
        assert_eq!(
            catalog
                .corrective_actions("Salinity", SensorState::Warning)
                .to_vec(),
            vec!["Dilute.".to_string()]
        );
        assert!(catalog
            .corrective_actions("Salinity", SensorState::Critical)
            .is_empty());
        assert_eq!(catalog.classify("pH", 7.0), SensorState::Unknown);
    }

    #[test]
    fn test_safety_limits() {
        // ---
        let catalog = SensorCatalog::builtin();
        let limits = catalog.profile("Humidity").unwrap().safety_limits();
        assert_eq!(limits, Band::new(30.0, 90.0));
    }
}
