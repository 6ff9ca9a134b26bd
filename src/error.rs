// error.rs - Error types for the fixture harness
//
// Every failure a test can hit maps to one variant here: bad config,
// unreachable database, broken fixture, failing query, or a result set
// that doesn't match the expected rows.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HarnessError {
    /// Missing or malformed environment configuration
    #[error("invalid harness configuration: {0}")]
    Config(String),

    /// The database could not be reached (or the connect timed out)
    #[error("failed to connect to database: {0}")]
    Connect(#[source] sqlx::Error),

    #[error("fixture file not found: {}", path.display())]
    FixtureMissing { path: PathBuf },

    #[error("failed to read fixture {}: {source}", path.display())]
    FixtureRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The database rejected the fixture SQL
    #[error("failed to load fixture {}: {source}", path.display())]
    FixtureLoad {
        path: PathBuf,
        #[source]
        source: sqlx::Error,
    },

    #[error("query failed: {source}\n--- query ---\n{sql}")]
    Query {
        sql: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("failed to decode column '{column}' ({type_name}): {source}")]
    Decode {
        column: String,
        type_name: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("required extension '{0}' is not installed in the target database")]
    MissingExtension(String),

    #[error("failed to release test connection: {0}")]
    Release(#[source] sqlx::Error),

    #[error("expected {expected} rows, got {actual}\n{report}")]
    RowCount {
        expected: usize,
        actual: usize,
        report: String,
    },

    #[error("result rows do not match expected rows\n{report}")]
    RowMismatch { report: String },
}

pub type Result<T> = std::result::Result<T, HarnessError>;
