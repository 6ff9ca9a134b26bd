// lib.rs - Root module for the postgis_fixture_tests library
//
// The harness behind our database tests: per-test connections with a
// private schema (`session`), SQL fixture files (`fixtures`), and exact
// comparison of captured result rows (`rows`).

pub mod config;
pub mod error;
/// The fixtures module contains the SQL fixture loader and named fixtures
pub mod fixtures;
pub mod rows;
pub mod session;

pub use config::HarnessConfig;
pub use error::HarnessError;
pub use rows::{ResultRow, Value};
pub use session::{dbconnect, dbconnect_with, TestSession};

use tracing_subscriber::EnvFilter;

/// Install a fmt subscriber for tests and tools.
///
/// Honors RUST_LOG and defaults to `warn`. Safe to call more than once.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_target(false)
        .with_test_writer()
        .try_init();
}
