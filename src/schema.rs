//! Database schema management for `hydrofusion-sim`.
//!
//! Ensures required tables and indexes exist before any simulation unit
//! writes. Applied once on startup from `main.rs`, never per tick.

use sqlx::SqlitePool;

use crate::SimError;

// ---

/// Create the simulation schema (idempotent).
///
/// Creates the append-only `readings`, `alarms`, `production_records` and
/// `financial_records` tables plus the keyed `current_states` snapshot.
/// Safe to call on every startup; no-op if objects already exist.
///
/// Errors are propagated if any SQL execution fails.
pub async fn create_schema(pool: &SqlitePool) -> Result<(), SimError> {
    // ---
    let mut tx = pool.begin().await?;

    // Raw readings served to the dashboard time-series charts
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS readings (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            source      TEXT NOT NULL,
            sensor_type TEXT NOT NULL,
            value       REAL NOT NULL,
            timestamp   TEXT NOT NULL
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    // One row per (source, sensor_type); replaced on every tick
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS current_states (
            source      TEXT NOT NULL,
            sensor_type TEXT NOT NULL,
            state       TEXT NOT NULL,
            timestamp   TEXT NOT NULL,
            PRIMARY KEY (source, sensor_type)
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    // Actions are stored as a JSON array of strings
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS alarms (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            source      TEXT NOT NULL,
            sensor_type TEXT NOT NULL,
            state       TEXT NOT NULL,
            actions     TEXT NOT NULL,
            timestamp   TEXT NOT NULL
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS production_records (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            timestamp   TEXT NOT NULL,
            biomass_kg  REAL NOT NULL,
            harvest_kg  REAL NOT NULL,
            note        TEXT NOT NULL
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS financial_records (
            id                INTEGER PRIMARY KEY AUTOINCREMENT,
            timestamp         TEXT NOT NULL,
            revenue           REAL NOT NULL,
            cost              REAL NOT NULL,
            period_profit     REAL NOT NULL,
            cumulative_profit REAL NOT NULL,
            note              TEXT NOT NULL
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    // Basic indexes for the dashboard queries
    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_readings_source_type_ts
            ON readings (source, sensor_type, timestamp);
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_alarms_timestamp
            ON alarms (timestamp);
        "#,
    )
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(())
}
