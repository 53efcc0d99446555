//! Concurrent sensor simulation and classification engine for the
//! HydroFusion facility (plant beds, fish tanks, solar panels).
//!
//! Module layout follows the Explicit Module Boundary Pattern (EMBP):
//! - `catalog`    – threshold profiles, classification, corrective actions
//! - `generator`  – per-sensor stochastic state machine
//! - `gateway`    – serialized write path and read surface over the store
//! - `schema`     – idempotent schema creation
//! - `engine`     – sensor and production units, retry policy, shutdown
//! - `production` – efficiency and the production/financial model
//! - `config`     – environment-driven configuration
//!
//! Shared record types and the error taxonomy are re-exported at the root so
//! sibling modules only depend on their parent.

pub mod catalog;
pub mod config;
pub mod engine;
mod error;
pub mod gateway;
pub mod generator;
mod models;
pub mod production;
pub mod schema;

pub use catalog::SensorCatalog;
pub use config::Config;
pub use error::SimError;
pub use gateway::PersistenceGateway;
pub use models::{
    iso_timestamp, Alarm, CurrentState, FinancialRecord, ProductionRecord, Reading, SensorState,
};
