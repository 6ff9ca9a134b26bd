// common/mod.rs - Shared helpers for the database-backed test suites
//
// These suites need a live PostgreSQL/PostGIS instance. Without
// TEST_DATABASE_URL or DATABASE_URL, `config()` returns the harness's
// Config error and the test fails rather than passing silently.

#![allow(dead_code)]

use postgis_fixture_tests::HarnessConfig;
use sqlx::{Connection, PgConnection};
use std::time::Duration;

/// Install the test log subscriber
pub fn init() {
    postgis_fixture_tests::init_tracing();
}

/// Load the harness configuration for a database-backed test.
///
/// Also installs the test log subscriber, so call this first.
pub fn config() -> anyhow::Result<HarnessConfig> {
    init();
    Ok(HarnessConfig::from_env()?)
}

/// A plain connection outside any test session, for checking what a
/// session left behind
pub async fn observer(config: &HarnessConfig) -> anyhow::Result<PgConnection> {
    Ok(PgConnection::connect(&config.database_url).await?)
}

pub async fn schema_exists(config: &HarnessConfig, schema: &str) -> anyhow::Result<bool> {
    let mut conn = observer(config).await?;
    let exists: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM information_schema.schemata WHERE schema_name = $1)",
    )
    .bind(schema)
    .fetch_one(&mut conn)
    .await?;
    conn.close().await?;
    Ok(exists)
}

/// Wait for a backend to disappear from pg_stat_activity.
///
/// The server tears the backend down asynchronously after the client
/// terminates, so give it a couple of seconds.
pub async fn backend_gone(config: &HarnessConfig, pid: i32) -> anyhow::Result<bool> {
    let mut conn = observer(config).await?;
    let mut gone = false;

    for _ in 0..20 {
        let alive: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM pg_stat_activity WHERE pid = $1)")
                .bind(pid)
                .fetch_one(&mut conn)
                .await?;
        if !alive {
            gone = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    conn.close().await?;
    Ok(gone)
}
