//! Simulation runtime: one task per (source, sensor type) plus one
//! production task.
//!
//! Each unit owns its generator (or production model) outright, ticks at its
//! own cadence and talks to the rest of the system only through the
//! [`PersistenceGateway`]. A failed tick never leaves the unit: persistence
//! failures drop the tick, anything else puts the unit into backoff, and the
//! loop carries on until shutdown is signalled.

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use tokio::{sync::watch, task::JoinSet};
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::{
    catalog::SensorCatalog,
    config::{Config, SensorUnitSpec},
    gateway::PersistenceGateway,
    generator::SensorGenerator,
    production::{self, CycleOutcome, ProductionModel, ProductionParams},
    Alarm, CurrentState, Reading, SensorState, SimError,
};

// ---

/// What a unit does after a tick: wait its interval, or back off.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            backoff: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    // ---
    /// Delay before the next tick of a unit ticking every `interval`.
    ///
    /// Success and persistence failures keep the normal cadence; any other
    /// failure waits out the backoff.
    pub fn delay_after<T>(&self, interval: Duration, result: &Result<T, SimError>) -> Duration {
        match result {
            Ok(_) => interval,
            Err(e) if e.is_persistence() => interval,
            Err(_) => self.backoff,
        }
    }
}

/// Result of recording one sensor value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickReport {
    pub value: f64,
    pub state: SensorState,
    pub alarm_written: bool,
}

/// Classify `value` and persist the reading, the snapshot and, for WARNING
/// or CRITICAL, an alarm carrying the corrective actions.
pub async fn record_reading(
    gateway: &PersistenceGateway,
    catalog: &SensorCatalog,
    source: &str,
    sensor_type: &str,
    value: f64,
    timestamp: DateTime<Utc>,
) -> Result<TickReport, SimError> {
    // ---
    if !value.is_finite() {
        return Err(SimError::NonFiniteValue {
            source_id: source.to_string(),
            sensor_type: sensor_type.to_string(),
        });
    }

    let state = catalog.classify(sensor_type, value);
    info!(source, sensor_type, value, state = %state, "reading");

    gateway
        .insert_reading(&Reading {
            source: source.to_string(),
            sensor_type: sensor_type.to_string(),
            value,
            timestamp,
        })
        .await?;

    gateway
        .upsert_current_state(&CurrentState {
            source: source.to_string(),
            sensor_type: sensor_type.to_string(),
            state,
            timestamp,
        })
        .await?;

    let mut alarm_written = false;
    if state.is_alarm() {
        let actions = catalog.corrective_actions(sensor_type, state).to_vec();
        if !actions.is_empty() {
            warn!(
                source,
                sensor_type,
                state = %state,
                "Corrective action suggested: {}",
                actions.join("; ")
            );
        }
        alarm_written = gateway
            .insert_alarm(&Alarm {
                source: source.to_string(),
                sensor_type: sensor_type.to_string(),
                state,
                actions,
                timestamp,
            })
            .await?;
    }

    Ok(TickReport {
        value,
        state,
        alarm_written,
    })
}

/// Sleep for `delay` unless shutdown is signalled first.
///
/// Returns `false` when the unit should stop.
async fn wait_or_shutdown(delay: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    // ---
    if *shutdown.borrow() {
        return false;
    }
    tokio::select! {
        _ = tokio::time::sleep(delay) => true,
        // A dropped sender also means stop
        _ = shutdown.changed() => false,
    }
}

/// One simulated sensor: a source id, its generator and its cadence.
pub struct SensorUnit {
    source: String,
    interval: Duration,
    generator: SensorGenerator,
}

impl SensorUnit {
    // ---
    /// Build a unit with a randomized generator.
    ///
    /// Fails when the sensor type is not in the catalog; only this unit is
    /// affected.
    pub fn new(spec: &SensorUnitSpec, catalog: &SensorCatalog) -> Result<Self, SimError> {
        let generator = SensorGenerator::randomized(catalog, &spec.sensor_type)?;
        Ok(Self::with_generator(&spec.source, spec.interval, generator))
    }

    pub fn with_generator(source: &str, interval: Duration, generator: SensorGenerator) -> Self {
        SensorUnit {
            source: source.to_string(),
            interval,
            generator,
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn sensor_type(&self) -> &str {
        self.generator.sensor_type()
    }

    /// Generate the next value and record it.
    pub async fn tick(
        &mut self,
        gateway: &PersistenceGateway,
        catalog: &SensorCatalog,
    ) -> Result<TickReport, SimError> {
        // ---
        let value = self.generator.next_value();
        let sensor_type = self.generator.sensor_type().to_string();
        record_reading(
            gateway,
            catalog,
            &self.source,
            &sensor_type,
            value,
            Utc::now(),
        )
        .await
    }

    /// Tick until shutdown.
    pub async fn run(
        mut self,
        gateway: Arc<PersistenceGateway>,
        catalog: Arc<SensorCatalog>,
        policy: RetryPolicy,
        mut shutdown: watch::Receiver<bool>,
    ) {
        // ---
        debug!(interval = ?self.interval, "Sensor unit started");
        loop {
            let result = self.tick(&gateway, &catalog).await;
            match &result {
                Ok(_) => {}
                Err(e) if e.is_persistence() => {
                    warn!(error = %e, "Persistence failure, tick dropped");
                }
                Err(e) => {
                    error!(error = %e, backoff = ?policy.backoff, "Tick failed, backing off");
                }
            }

            let delay = policy.delay_after(self.interval, &result);
            if !wait_or_shutdown(delay, &mut shutdown).await {
                break;
            }
        }
        debug!("Sensor unit stopped");
    }
}

/// The production/financial cycle and its cadence.
pub struct ProductionUnit {
    interval: Duration,
    model: ProductionModel,
}

impl ProductionUnit {
    // ---
    pub fn new(interval: Duration, model: ProductionModel) -> Self {
        ProductionUnit { interval, model }
    }

    /// Sample plant health, evolve the model and persist both records.
    pub async fn cycle(&mut self, gateway: &PersistenceGateway) -> Result<CycleOutcome, SimError> {
        // ---
        let efficiency = match gateway.current_states().await {
            Ok(states) => production::efficiency(states.into_values().map(|c| c.state)),
            Err(e) => {
                warn!(error = %e, "Efficiency read failed, using cold-start value");
                production::COLD_START_EFFICIENCY
            }
        };
        info!("Plant efficiency: {:.2}%", efficiency * 100.0);

        let outcome = self.model.cycle(efficiency, Utc::now());
        if let Some(sale) = &outcome.sale {
            info!(revenue = sale.revenue, "Sale completed");
        }

        gateway
            .insert_production_record(&outcome.production)
            .await?;
        gateway.insert_financial_record(&outcome.financial).await?;

        info!(
            cumulative_profit = outcome.financial.cumulative_profit,
            "Financial cycle completed"
        );
        Ok(outcome)
    }

    /// Cycle until shutdown.
    pub async fn run(
        mut self,
        gateway: Arc<PersistenceGateway>,
        policy: RetryPolicy,
        mut shutdown: watch::Receiver<bool>,
    ) {
        // ---
        debug!(interval = ?self.interval, "Production unit started");
        loop {
            let result = self.cycle(&gateway).await;
            if let Err(e) = &result {
                if e.is_persistence() {
                    warn!(error = %e, "Persistence failure, cycle records dropped");
                } else {
                    error!(error = %e, backoff = ?policy.backoff, "Cycle failed, backing off");
                }
            }

            let delay = policy.delay_after(self.interval, &result);
            if !wait_or_shutdown(delay, &mut shutdown).await {
                break;
            }
        }
        debug!("Production unit stopped");
    }
}

/// Set of units to launch together.
pub struct Simulation {
    policy: RetryPolicy,
    sensor_units: Vec<SensorUnit>,
    production_unit: Option<ProductionUnit>,
}

impl Simulation {
    // ---
    pub fn new(policy: RetryPolicy) -> Self {
        Simulation {
            policy,
            sensor_units: Vec::new(),
            production_unit: None,
        }
    }

    /// Build every unit described by `config`.
    ///
    /// Units whose generator cannot be built are logged and left out; the
    /// rest of the facility still starts.
    pub fn from_config(config: &Config, catalog: &SensorCatalog) -> Self {
        // ---
        let mut simulation = Simulation::new(RetryPolicy {
            backoff: config.failure_backoff,
        });

        for spec in config.sensor_units() {
            match SensorUnit::new(&spec, catalog) {
                Ok(unit) => simulation = simulation.with_sensor_unit(unit),
                Err(e) => error!(
                    source = %spec.source,
                    sensor_type = %spec.sensor_type,
                    error = %e,
                    "Sensor unit not started"
                ),
            }
        }

        simulation.with_production_unit(ProductionUnit::new(
            config.production_interval,
            ProductionModel::new(ProductionParams::default()),
        ))
    }

    pub fn with_sensor_unit(mut self, unit: SensorUnit) -> Self {
        self.sensor_units.push(unit);
        self
    }

    pub fn with_production_unit(mut self, unit: ProductionUnit) -> Self {
        self.production_unit = Some(unit);
        self
    }

    pub fn sensor_unit_count(&self) -> usize {
        self.sensor_units.len()
    }

    /// Spawn every unit. The store schema must already exist.
    pub fn start(
        self,
        gateway: Arc<PersistenceGateway>,
        catalog: Arc<SensorCatalog>,
    ) -> SimulationHandle {
        // ---
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut tasks = JoinSet::new();

        for unit in self.sensor_units {
            let span = info_span!(
                "sensor_unit",
                source = %unit.source(),
                sensor_type = %unit.sensor_type()
            );
            tasks.spawn(
                unit.run(
                    Arc::clone(&gateway),
                    Arc::clone(&catalog),
                    self.policy,
                    shutdown_rx.clone(),
                )
                .instrument(span),
            );
        }

        if let Some(unit) = self.production_unit {
            tasks.spawn(
                unit.run(Arc::clone(&gateway), self.policy, shutdown_rx.clone())
                    .instrument(info_span!("production_unit")),
            );
        }

        info!("Simulation started, {} units running", tasks.len());
        SimulationHandle {
            shutdown: shutdown_tx,
            tasks,
        }
    }
}

/// Running simulation. Dropping it without [`shutdown`](Self::shutdown)
/// aborts every unit.
pub struct SimulationHandle {
    shutdown: watch::Sender<bool>,
    tasks: JoinSet<()>,
}

impl SimulationHandle {
    // ---
    pub fn unit_count(&self) -> usize {
        self.tasks.len()
    }

    /// Stop every unit after its in-flight tick and wait for them to exit.
    pub async fn shutdown(mut self) {
        // ---
        let _ = self.shutdown.send(true);
        while let Some(joined) = self.tasks.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Unit task ended abnormally");
            }
        }
        info!("Simulation stopped");
    }
}
