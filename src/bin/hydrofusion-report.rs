//! Dump the simulator store in a readable form.
//!
//! Prints the current-state snapshot followed by the most recent alarms,
//! production records and financial records as JSON lines. Reads go through
//! the same gateway the simulator writes with, so this doubles as a check
//! that the read surface serves every persisted entity. The report never
//! creates tables; a table the store does not have yet prints as empty.
//!
//! # Environment Variables
//! - `DATABASE_URL` (optional) – SQLite connection string
//! - `REPORT_LIMIT` (optional) – rows per table (default: 15)
use anyhow::Result;
use dotenvy::dotenv;
use serde::Serialize;

use hydrofusion_sim::{config, PersistenceGateway, SimError};

// ---

#[tokio::main]
async fn main() -> Result<()> {
    // ---
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new("warn"))
        .compact()
        .init();

    let cfg = config::load_from_env()?;
    let gateway = PersistenceGateway::connect(&cfg.db_url, 1)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to open store '{}': {}", cfg.db_url, e))?;
    let limit = cfg.report_limit;

    let snapshot = gateway
        .current_states()
        .await
        .map(|states| states.into_values().collect::<Vec<_>>());
    let alarms = existing_rows(gateway.alarm_history(limit).await)?;
    let production = existing_rows(gateway.production_history(limit).await)?;
    let financial = existing_rows(gateway.financial_history(limit).await)?;

    print_section("current_states", &existing_rows(snapshot)?)?;
    print_section("alarms", &alarms)?;
    print_section("production_records", &production)?;
    print_section("financial_records", &financial)?;

    Ok(())
}

/// Rows of a table, or none when the store has no such table yet.
fn existing_rows<T>(rows: Result<Vec<T>, SimError>) -> Result<Vec<T>> {
    // ---
    match rows {
        Ok(rows) => Ok(rows),
        Err(e) if e.is_missing_table() => Ok(Vec::new()),
        Err(e) => Err(e.into()),
    }
}

fn print_section<'a, T, I>(name: &str, rows: I) -> Result<()>
where
    T: Serialize + 'a,
    I: IntoIterator<Item = &'a T>,
{
    // ---
    println!("{}", "=".repeat(50));
    println!("TABLE: {}", name.to_uppercase());
    println!("{}", "=".repeat(50));

    let mut count = 0;
    for row in rows {
        println!("{}", serde_json::to_string(row)?);
        count += 1;
    }
    if count == 0 {
        println!("(empty)");
    }
    println!();
    Ok(())
}
