//! Per-sensor stochastic state machine.
//!
//! Each generator is a smoothed random walk around the profile mean. It
//! occasionally enters an ANOMALY phase in which the walk is pulled just
//! outside the OK band for a sampled number of ticks, then returns to
//! NORMAL. Output is always clamped to the profile's safety limits.
//!
//! A generator is owned by exactly one simulation unit and is never shared.

use rand::{rngs::StdRng, Rng, SeedableRng};
use rand_distr::{Distribution, Normal};

use crate::{
    catalog::{Band, SensorCatalog, ThresholdProfile},
    SimError,
};

// ---

/// Generator sub-state governing target-mean selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Normal,
    Anomaly,
}

/// Per-instance tuning. Randomized at construction so that sources of the
/// same sensor type diverge instead of moving in lockstep.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeneratorParams {
    /// Weight of the previous value in the exponential smoothing, in (0, 1).
    pub inertia: f64,
    /// Chance per NORMAL tick of entering ANOMALY.
    pub anomaly_probability: f64,
    /// Mean of the Gaussian the anomaly length (in ticks) is drawn from.
    pub mean_anomaly_duration: f64,
    /// Unit-to-unit bias added to the profile mean.
    pub mean_offset: f64,
}

impl Default for GeneratorParams {
    fn default() -> Self {
        GeneratorParams {
            inertia: 0.95,
            anomaly_probability: 0.02,
            mean_anomaly_duration: 5.0,
            mean_offset: 0.0,
        }
    }
}

impl GeneratorParams {
    // ---
    /// Draw instance parameters for a sensor with standard deviation `std_dev`.
    pub fn randomized<R: Rng + ?Sized>(std_dev: f64, rng: &mut R) -> Self {
        let spread = std_dev * 0.2;
        GeneratorParams {
            inertia: rng.gen_range(0.92..0.98),
            anomaly_probability: rng.gen_range(0.01..0.04),
            mean_anomaly_duration: 5.0,
            mean_offset: rng.gen_range(-spread..spread),
        }
    }
}

/// Mutable state of one generator, exposed read-only for inspection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeneratorState {
    pub value: f64,
    pub phase: Phase,
    /// Ticks spent in the current anomaly; stays 0 while NORMAL.
    pub phase_counter: u32,
    /// Sampled length of the current (or last) anomaly.
    pub anomaly_duration: u32,
}

pub struct SensorGenerator {
    sensor_type: String,
    profile: ThresholdProfile,
    params: GeneratorParams,
    mean: f64,
    limits: Band,
    noise: Normal<f64>,
    duration: Normal<f64>,
    state: GeneratorState,
    rng: StdRng,
}

impl SensorGenerator {
    // ---
    /// Build a generator seeded from OS entropy.
    ///
    /// Fails with [`SimError::UnknownSensorType`] when the catalog has no
    /// profile for `sensor_type`.
    pub fn new(
        catalog: &SensorCatalog,
        sensor_type: &str,
        params: GeneratorParams,
    ) -> Result<Self, SimError> {
        Self::with_rng(catalog, sensor_type, params, StdRng::from_entropy())
    }

    /// Build a reproducible generator.
    pub fn with_seed(
        catalog: &SensorCatalog,
        sensor_type: &str,
        params: GeneratorParams,
        seed: u64,
    ) -> Result<Self, SimError> {
        Self::with_rng(catalog, sensor_type, params, StdRng::seed_from_u64(seed))
    }

    /// Build a generator with parameters drawn by [`GeneratorParams::randomized`].
    pub fn randomized(catalog: &SensorCatalog, sensor_type: &str) -> Result<Self, SimError> {
        // ---
        let mut rng = StdRng::from_entropy();
        let profile = catalog
            .profile(sensor_type)
            .ok_or_else(|| SimError::UnknownSensorType(sensor_type.to_string()))?;
        let params = GeneratorParams::randomized(profile.std_dev, &mut rng);
        Self::with_rng(catalog, sensor_type, params, rng)
    }

    fn with_rng(
        catalog: &SensorCatalog,
        sensor_type: &str,
        params: GeneratorParams,
        rng: StdRng,
    ) -> Result<Self, SimError> {
        // ---
        let profile = *catalog
            .profile(sensor_type)
            .ok_or_else(|| SimError::UnknownSensorType(sensor_type.to_string()))?;

        let invalid = |reason: String| SimError::InvalidProfile {
            sensor_type: sensor_type.to_string(),
            reason,
        };
        let noise = Normal::new(0.0, profile.std_dev).map_err(|e| invalid(e.to_string()))?;
        let duration =
            Normal::new(params.mean_anomaly_duration, 1.0).map_err(|e| invalid(e.to_string()))?;

        let mean = profile.mean + params.mean_offset;

        Ok(SensorGenerator {
            sensor_type: sensor_type.to_string(),
            profile,
            params,
            mean,
            limits: profile.safety_limits(),
            noise,
            duration,
            state: GeneratorState {
                value: profile.mean,
                phase: Phase::Normal,
                phase_counter: 0,
                anomaly_duration: 0,
            },
            rng,
        })
    }

    pub fn sensor_type(&self) -> &str {
        &self.sensor_type
    }

    pub fn state(&self) -> &GeneratorState {
        &self.state
    }

    /// Hard bounds every generated value stays within.
    pub fn limits(&self) -> Band {
        self.limits
    }

    /// Advance one tick and return the new value, rounded to 2 decimals.
    pub fn next_value(&mut self) -> f64 {
        // ---
        self.advance_phase();

        let std_dev = self.profile.std_dev;
        let target = match self.state.phase {
            Phase::Normal => self.mean,
            Phase::Anomaly => {
                if self.rng.gen_bool(0.5) {
                    self.profile.ok.max + std_dev
                } else {
                    self.profile.ok.min - std_dev
                }
            }
        };

        let sample = target + self.noise.sample(&mut self.rng);
        let inertia = self.params.inertia;
        let smoothed = inertia * self.state.value + (1.0 - inertia) * sample;
        let clamped = smoothed.clamp(self.limits.min, self.limits.max);

        // Rounding must not step over a limit with more than 2 decimals
        self.state.value = round2(clamped).clamp(self.limits.min, self.limits.max);
        self.state.value
    }

    fn advance_phase(&mut self) {
        // ---
        match self.state.phase {
            Phase::Normal => {
                if self.rng.gen::<f64>() < self.params.anomaly_probability {
                    self.state.phase = Phase::Anomaly;
                    self.state.phase_counter = 0;
                    let drawn = self.duration.sample(&mut self.rng).round();
                    self.state.anomaly_duration = drawn.max(1.0) as u32;
                }
            }
            Phase::Anomaly => {
                if self.state.phase_counter >= self.state.anomaly_duration {
                    self.state.phase = Phase::Normal;
                    self.state.phase_counter = 0;
                }
            }
        }

        if self.state.phase == Phase::Anomaly {
            self.state.phase_counter += 1;
        }
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
