// config.rs - Harness configuration from the environment
//
// Values come from the process environment, with a `.env` file loaded
// first (same as the rest of our tooling):
//
//   TEST_DATABASE_URL / DATABASE_URL   connection string (TEST_ wins)
//   FIXTURE_DIR                        directory holding the *.sql fixtures
//   DB_CONNECT_TIMEOUT_SECS            connect timeout, default 5
//   EXTRA_FLOAT_DIGITS                 session extra_float_digits, default 0
//
// Required extensions are not configured here: each fixture declares its
// own (SqlFixture::REQUIRED_EXTENSIONS).

use crate::error::{HarnessError, Result};
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 5;
const DEFAULT_EXTRA_FLOAT_DIGITS: i32 = 0;

#[derive(Debug, Clone, PartialEq)]
pub struct HarnessConfig {
    pub database_url: String,
    pub fixture_dir: PathBuf,
    pub connect_timeout: Duration,
    /// Applied to every test session. 0 renders float8 with 15 significant
    /// digits, which is what the recorded literals in our tests use.
    pub extra_float_digits: i32,
}

impl HarnessConfig {
    /// Load configuration from `.env` and the process environment
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup.
    ///
    /// Split out from [`HarnessConfig::from_env`] so parsing can be tested
    /// without touching the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = lookup("TEST_DATABASE_URL")
            .filter(|v| !v.trim().is_empty())
            .or_else(|| lookup("DATABASE_URL").filter(|v| !v.trim().is_empty()))
            .ok_or_else(|| {
                HarnessError::Config("DATABASE_URL (or TEST_DATABASE_URL) must be set".to_string())
            })?;

        let fixture_dir = match lookup("FIXTURE_DIR") {
            Some(dir) if !dir.trim().is_empty() => PathBuf::from(dir),
            _ => default_fixture_dir()?,
        };

        let connect_timeout = match lookup("DB_CONNECT_TIMEOUT_SECS") {
            Some(raw) => Duration::from_secs(raw.trim().parse::<u64>().map_err(|e| {
                HarnessError::Config(format!("DB_CONNECT_TIMEOUT_SECS '{}': {}", raw, e))
            })?),
            None => Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
        };

        let extra_float_digits = match lookup("EXTRA_FLOAT_DIGITS") {
            Some(raw) => {
                let digits = raw.trim().parse::<i32>().map_err(|e| {
                    HarnessError::Config(format!("EXTRA_FLOAT_DIGITS '{}': {}", raw, e))
                })?;
                // Same bounds PostgreSQL enforces for the setting
                if !(-15..=3).contains(&digits) {
                    return Err(HarnessError::Config(format!(
                        "EXTRA_FLOAT_DIGITS must be between -15 and 3, got {}",
                        digits
                    )));
                }
                digits
            }
            None => DEFAULT_EXTRA_FLOAT_DIGITS,
        };

        Ok(Self {
            database_url,
            fixture_dir,
            connect_timeout,
            extra_float_digits,
        })
    }

    /// The connection string with any password masked, for log output
    pub fn redacted_url(&self) -> String {
        redact_password(&self.database_url)
    }
}

/// Find the fixture directory when FIXTURE_DIR isn't set.
///
/// The crate's own `sql/` directory is tried first, then paths relative to
/// wherever the tests were launched from.
fn default_fixture_dir() -> Result<PathBuf> {
    let possible_paths = vec![
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("sql"),
        PathBuf::from("sql"),
        PathBuf::from("../sql"),
    ];

    possible_paths
        .iter()
        .find(|p| p.is_dir())
        .cloned()
        .ok_or_else(|| HarnessError::Config("fixture directory 'sql' not found".to_string()))
}

fn redact_password(url: &str) -> String {
    let Some(scheme_end) = url.find("://") else {
        return url.to_string();
    };
    let rest = &url[scheme_end + 3..];
    let authority_end = rest.find('/').unwrap_or(rest.len());
    let authority = &rest[..authority_end];

    match (authority.rfind('@'), authority.find(':')) {
        (Some(at), Some(colon)) if colon < at => format!(
            "{}{}:****{}",
            &url[..scheme_end + 3],
            &authority[..colon],
            &rest[at..]
        ),
        _ => url.to_string(),
    }
}
