//! Persistence gateway: the only path from simulation units to the store.
//!
//! Every mutating operation takes one process-wide write lock for the
//! duration of its statement, so at most one write is in flight at a time.
//! The guard is scoped to the call and released on drop, including when the
//! statement fails. Reads do not take the lock; their concurrency is bounded
//! only by the pool.

use std::{collections::BTreeMap, str::FromStr, time::Duration};

use chrono::{DateTime, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    SqlitePool,
};
use tokio::sync::Mutex;
use tracing::debug;

use crate::{
    iso_timestamp, Alarm, CurrentState, FinancialRecord, ProductionRecord, Reading, SensorState,
    SimError,
};

// ---

/// Key of the current-state snapshot: `(source, sensor_type)`.
pub type StateKey = (String, String);

pub struct PersistenceGateway {
    pool: SqlitePool,
    write_lock: Mutex<()>,
}

impl PersistenceGateway {
    // ---
    /// Open (or create) the store at `db_url`.
    ///
    /// In-memory databases live only as long as their connection, so the
    /// pool is pinned to a single connection that never expires.
    pub async fn connect(db_url: &str, pool_max: u32) -> Result<Self, SimError> {
        // ---
        let options = SqliteConnectOptions::from_str(db_url)?
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(10));

        let in_memory = db_url.contains(":memory:") || db_url.contains("mode=memory");
        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(pool_max.max(1))
        };

        let pool = pool_options.connect_with(options).await?;
        debug!(db_url, in_memory, "Store connection pool ready");
        Ok(Self::from_pool(pool))
    }

    pub fn from_pool(pool: SqlitePool) -> Self {
        PersistenceGateway {
            pool,
            write_lock: Mutex::new(()),
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // --- writes

    pub async fn insert_reading(&self, reading: &Reading) -> Result<(), SimError> {
        // ---
        let _guard = self.write_lock.lock().await;
        sqlx::query(
            "INSERT INTO readings (source, sensor_type, value, timestamp) VALUES (?, ?, ?, ?)",
        )
        .bind(&reading.source)
        .bind(&reading.sensor_type)
        .bind(reading.value)
        .bind(iso_timestamp(&reading.timestamp))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Replace the snapshot row for `(source, sensor_type)` atomically.
    ///
    /// A write carrying an older timestamp than the stored row is ignored.
    /// Returns whether the snapshot changed.
    pub async fn upsert_current_state(&self, current: &CurrentState) -> Result<bool, SimError> {
        // ---
        let _guard = self.write_lock.lock().await;
        let result = sqlx::query(
            r#"
            INSERT INTO current_states (source, sensor_type, state, timestamp)
            VALUES (?, ?, ?, ?)
            ON CONFLICT (source, sensor_type) DO UPDATE SET
                state     = excluded.state,
                timestamp = excluded.timestamp
            WHERE excluded.timestamp >= current_states.timestamp
            "#,
        )
        .bind(&current.source)
        .bind(&current.sensor_type)
        .bind(current.state.as_str())
        .bind(iso_timestamp(&current.timestamp))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Append an alarm. OK and UNKNOWN states are not alarms and are skipped.
    ///
    /// Returns whether a row was written.
    pub async fn insert_alarm(&self, alarm: &Alarm) -> Result<bool, SimError> {
        // ---
        if !alarm.state.is_alarm() {
            return Ok(false);
        }
        let actions = serde_json::to_string(&alarm.actions)?;

        let _guard = self.write_lock.lock().await;
        sqlx::query(
            r#"
            INSERT INTO alarms (source, sensor_type, state, actions, timestamp)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&alarm.source)
        .bind(&alarm.sensor_type)
        .bind(alarm.state.as_str())
        .bind(actions)
        .bind(iso_timestamp(&alarm.timestamp))
        .execute(&self.pool)
        .await?;
        Ok(true)
    }

    pub async fn insert_production_record(
        &self,
        record: &ProductionRecord,
    ) -> Result<(), SimError> {
        // ---
        let _guard = self.write_lock.lock().await;
        sqlx::query(
            r#"
            INSERT INTO production_records (timestamp, biomass_kg, harvest_kg, note)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(iso_timestamp(&record.timestamp))
        .bind(record.biomass_kg)
        .bind(record.harvest_kg)
        .bind(&record.note)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn insert_financial_record(&self, record: &FinancialRecord) -> Result<(), SimError> {
        // ---
        let _guard = self.write_lock.lock().await;
        sqlx::query(
            r#"
            INSERT INTO financial_records (
                timestamp, revenue, cost, period_profit, cumulative_profit, note
            ) VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(iso_timestamp(&record.timestamp))
        .bind(record.revenue)
        .bind(record.cost)
        .bind(record.period_profit)
        .bind(record.cumulative_profit)
        .bind(&record.note)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // --- reads

    /// Snapshot of the latest state for every known (source, sensor type).
    pub async fn current_states(&self) -> Result<BTreeMap<StateKey, CurrentState>, SimError> {
        // ---
        let rows: Vec<(String, String, String, DateTime<Utc>)> =
            sqlx::query_as("SELECT source, sensor_type, state, timestamp FROM current_states")
                .fetch_all(&self.pool)
                .await?;

        Ok(rows
            .into_iter()
            .map(|(source, sensor_type, state, timestamp)| {
                let current = CurrentState {
                    source: source.clone(),
                    sensor_type: sensor_type.clone(),
                    state: state.parse().unwrap_or(SensorState::Unknown),
                    timestamp,
                };
                ((source, sensor_type), current)
            })
            .collect())
    }

    /// Readings for one sensor in chronological order.
    ///
    /// With a limit, only the most recent `limit` readings are returned.
    pub async fn readings(
        &self,
        source: &str,
        sensor_type: &str,
        limit: Option<u32>,
    ) -> Result<Vec<Reading>, SimError> {
        // ---
        let readings = sqlx::query_as::<_, Reading>(
            r#"
            SELECT source, sensor_type, value, timestamp FROM (
                SELECT id, source, sensor_type, value, timestamp
                FROM readings
                WHERE source = ? AND sensor_type = ?
                ORDER BY timestamp DESC, id DESC
                LIMIT ?
            )
            ORDER BY timestamp ASC, id ASC
            "#,
        )
        .bind(source)
        .bind(sensor_type)
        .bind(sql_limit(limit))
        .fetch_all(&self.pool)
        .await?;
        Ok(readings)
    }

    /// Most recent alarms first.
    pub async fn alarm_history(&self, limit: u32) -> Result<Vec<Alarm>, SimError> {
        // ---
        let rows: Vec<AlarmRow> = sqlx::query_as(
            r#"
            SELECT source, sensor_type, state, actions, timestamp
            FROM alarms
            ORDER BY timestamp DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(alarm_from_row).collect()
    }

    /// Most recent production records first.
    pub async fn production_history(&self, limit: u32) -> Result<Vec<ProductionRecord>, SimError> {
        // ---
        let records = sqlx::query_as::<_, ProductionRecord>(
            r#"
            SELECT timestamp, biomass_kg, harvest_kg, note
            FROM production_records
            ORDER BY timestamp DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }

    /// Most recent financial records first.
    pub async fn financial_history(&self, limit: u32) -> Result<Vec<FinancialRecord>, SimError> {
        // ---
        let records = sqlx::query_as::<_, FinancialRecord>(
            r#"
            SELECT timestamp, revenue, cost, period_profit, cumulative_profit, note
            FROM financial_records
            ORDER BY timestamp DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }
}

/// `(source, sensor_type, state, actions, timestamp)` as stored.
type AlarmRow = (String, String, String, String, DateTime<Utc>);

fn alarm_from_row(row: AlarmRow) -> Result<Alarm, SimError> {
    // ---
    let (source, sensor_type, state, actions, timestamp) = row;
    Ok(Alarm {
        source,
        sensor_type,
        state: state.parse().unwrap_or(SensorState::Unknown),
        actions: serde_json::from_str(&actions)?,
        timestamp,
    })
}

/// SQLite treats a negative LIMIT as "no limit".
fn sql_limit(limit: Option<u32>) -> i64 {
    limit.map_or(-1, i64::from)
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::schema;
    use chrono::TimeZone;
    use std::sync::Arc;
    use tokio_test::{assert_err, assert_ok};

    async fn gateway() -> PersistenceGateway {
        // ---
        let gateway = PersistenceGateway::connect("sqlite::memory:", 1)
            .await
            .unwrap();
        schema::create_schema(gateway.pool()).await.unwrap();
        gateway
    }

    fn at(secs: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap() + chrono::Duration::seconds(secs.into())
    }

    fn state(source: &str, sensor_type: &str, state: SensorState, secs: u32) -> CurrentState {
        CurrentState {
            source: source.to_string(),
            sensor_type: sensor_type.to_string(),
            state,
            timestamp: at(secs),
        }
    }

    fn alarm(state: SensorState, secs: u32) -> Alarm {
        Alarm {
            source: "Serra_1".to_string(),
            sensor_type: "pH".to_string(),
            state,
            actions: vec![
                "Monitor the value.".to_string(),
                "Replace the water.".to_string(),
            ],
            timestamp: at(secs),
        }
    }

    #[tokio::test]
    async fn test_schema_is_idempotent() {
        // ---
        let gateway = gateway().await;
        assert_ok!(schema::create_schema(gateway.pool()).await);
    }

    #[tokio::test]
    async fn test_reads_before_schema_report_missing_table() {
        // ---
        let gateway = PersistenceGateway::connect("sqlite::memory:", 1)
            .await
            .unwrap();

        let err = assert_err!(gateway.alarm_history(5).await);
        assert!(err.is_missing_table());
        assert!(!SimError::UnknownSensorType("pH".to_string()).is_missing_table());
    }

    #[tokio::test]
    async fn test_upsert_keeps_one_row_per_key() {
        // ---
        let gateway = gateway().await;

        assert!(assert_ok!(
            gateway
                .upsert_current_state(&state("Serra_1", "pH", SensorState::Ok, 0))
                .await
        ));
        assert!(assert_ok!(
            gateway
                .upsert_current_state(&state("Serra_1", "pH", SensorState::Critical, 5))
                .await
        ));

        let snapshot = gateway.current_states().await.unwrap();
        assert_eq!(snapshot.len(), 1);
        let current = &snapshot[&("Serra_1".to_string(), "pH".to_string())];
        assert_eq!(current.state, SensorState::Critical);
        assert_eq!(current.timestamp, at(5));
    }

    #[tokio::test]
    async fn test_older_upsert_does_not_override() {
        // ---
        let gateway = gateway().await;

        gateway
            .upsert_current_state(&state("Pesci_1", "Oxygen", SensorState::Warning, 10))
            .await
            .unwrap();
        let changed = gateway
            .upsert_current_state(&state("Pesci_1", "Oxygen", SensorState::Ok, 3))
            .await
            .unwrap();
        assert!(!changed);

        let snapshot = gateway.current_states().await.unwrap();
        let current = &snapshot[&("Pesci_1".to_string(), "Oxygen".to_string())];
        assert_eq!(current.state, SensorState::Warning);
    }

    #[tokio::test]
    async fn test_alarm_round_trip_and_ok_skipped() {
        // ---
        let gateway = gateway().await;

        for (state, secs, expected) in [
            (SensorState::Ok, 0, false),
            (SensorState::Unknown, 1, false),
            (SensorState::Warning, 2, true),
            (SensorState::Critical, 3, true),
        ] {
            let written = gateway.insert_alarm(&alarm(state, secs)).await.unwrap();
            assert_eq!(written, expected, "{state}");
        }

        let history = gateway.alarm_history(10).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0], alarm(SensorState::Critical, 3));
        assert_eq!(history[1].state, SensorState::Warning);
        assert_eq!(history[1].actions.len(), 2);

        assert_eq!(gateway.alarm_history(1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_readings_are_chronological_and_limited() {
        // ---
        let gateway = gateway().await;

        for i in 0..10u32 {
            let reading = Reading {
                source: "Serra_2".to_string(),
                sensor_type: "Humidity".to_string(),
                value: 50.0 + f64::from(i),
                timestamp: at(i),
            };
            gateway.insert_reading(&reading).await.unwrap();
        }
        // Different key, must not leak into the query
        gateway
            .insert_reading(&Reading {
                source: "Serra_3".to_string(),
                sensor_type: "Humidity".to_string(),
                value: 1.0,
                timestamp: at(20),
            })
            .await
            .unwrap();

        let all = gateway.readings("Serra_2", "Humidity", None).await.unwrap();
        assert_eq!(all.len(), 10);
        assert_eq!(all[0].value, 50.0);
        assert_eq!(all[9].value, 59.0);

        let last = gateway
            .readings("Serra_2", "Humidity", Some(3))
            .await
            .unwrap();
        let values: Vec<f64> = last.iter().map(|r| r.value).collect();
        assert_eq!(values, vec![57.0, 58.0, 59.0]);
        assert_eq!(last[2].timestamp, at(9));
    }

    #[tokio::test]
    async fn test_production_and_financial_history() {
        // ---
        let gateway = gateway().await;

        for i in 0..3u32 {
            gateway
                .insert_production_record(&ProductionRecord {
                    timestamp: at(i),
                    biomass_kg: 100.0 + f64::from(i),
                    harvest_kg: f64::from(i),
                    note: "Hourly growth".to_string(),
                })
                .await
                .unwrap();
            gateway
                .insert_financial_record(&FinancialRecord {
                    timestamp: at(i),
                    revenue: 0.0,
                    cost: 5.0,
                    period_profit: -5.0,
                    cumulative_profit: -1000.0 - 5.0 * f64::from(i + 1),
                    note: "Operating costs".to_string(),
                })
                .await
                .unwrap();
        }

        let production = gateway.production_history(2).await.unwrap();
        assert_eq!(production.len(), 2);
        assert_eq!(production[0].biomass_kg, 102.0);

        let financial = gateway.financial_history(10).await.unwrap();
        assert_eq!(financial.len(), 3);
        assert_eq!(financial[0].cumulative_profit, -1015.0);
        assert_eq!(financial[2].timestamp, at(0));
    }

    #[tokio::test]
    async fn test_failed_write_releases_lock() {
        // ---
        let gateway = gateway().await;
        sqlx::query("DROP TABLE readings")
            .execute(gateway.pool())
            .await
            .unwrap();

        let err = assert_err!(
            gateway
                .insert_reading(&Reading {
                    source: "Pannello_1".to_string(),
                    sensor_type: "Production".to_string(),
                    value: 4.2,
                    timestamp: at(0),
                })
                .await
        );
        assert!(err.is_persistence());

        // Would hang if the guard had leaked
        let current = state("Pannello_1", "Production", SensorState::Ok, 0);
        let write = gateway.upsert_current_state(&current);
        let next = tokio::time::timeout(Duration::from_secs(5), write).await;
        assert!(matches!(next, Ok(Ok(true))));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_writers_never_duplicate_keys() {
        // ---
        let gateway = Arc::new(gateway().await);
        let mut handles = Vec::new();

        for unit in 0..8u32 {
            let gateway = Arc::clone(&gateway);
            handles.push(tokio::spawn(async move {
                let source = format!("Serra_{}", unit % 4);
                for tick in 0..25u32 {
                    let reading = Reading {
                        source: source.clone(),
                        sensor_type: "Temperature".to_string(),
                        value: 25.0,
                        timestamp: at(tick),
                    };
                    let current = state(&source, "Temperature", SensorState::Ok, tick);
                    gateway.insert_reading(&reading).await.unwrap();
                    gateway.upsert_current_state(&current).await.unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let snapshot = gateway.current_states().await.unwrap();
        assert_eq!(snapshot.len(), 4);

        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM readings")
            .fetch_one(gateway.pool())
            .await
            .unwrap();
        assert_eq!(count, 200);
    }
}
