// session.rs - Per-test database lifecycle
//
// Each test gets exactly one connection and one private schema:
//
//   connect → CREATE SCHEMA test_<name>_<id> → SET search_path → body
//           → DROP SCHEMA ... CASCADE → close
//
// Fixtures create their tables unqualified, so they land in the test's
// own schema and vanish with it. Tests can therefore run in parallel
// without seeing each other's rows.
//
// `dbconnect` is the entry point for tests. It owns the session for the
// duration of the body and releases it on every exit path, including a
// panicking assert.

use crate::config::HarnessConfig;
use crate::error::{HarnessError, Result};
use crate::fixtures::{self, SqlFixture};
use crate::rows::{self, AssertContext, ResultRow};
use futures_util::FutureExt;
use sqlx::postgres::PgConnectOptions;
use sqlx::{Connection, PgConnection};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::str::FromStr;

/// Boxed future awaited on the caller's task; never spawned.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + 'a>>;

/// PostgreSQL truncates identifiers longer than this
const MAX_IDENTIFIER_LEN: usize = 63;

/// One test's connection plus its private schema
pub struct TestSession {
    conn: PgConnection,
    schema: String,
    fixture_dir: PathBuf,
    last_fixture: Option<PathBuf>,
    last_query: Option<String>,
}

impl TestSession {
    /// Open a connection and give it a fresh schema.
    ///
    /// If the schema setup fails the connection is closed before the error
    /// is returned.
    pub async fn acquire(config: &HarnessConfig, test_name: &str) -> Result<Self> {
        let options =
            PgConnectOptions::from_str(&config.database_url).map_err(HarnessError::Connect)?;

        let mut conn = tokio::time::timeout(config.connect_timeout, PgConnection::connect_with(&options))
            .await
            .map_err(|_| {
                HarnessError::Connect(sqlx::Error::Io(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    format!("no connection within {:?}", config.connect_timeout),
                )))
            })?
            .map_err(HarnessError::Connect)?;

        let schema = generate_test_schema_name(test_name);
        let setup = format!(
            "CREATE SCHEMA \"{schema}\";\n\
             SET search_path TO \"{schema}\", public;\n\
             SET extra_float_digits = {digits};",
            schema = schema,
            digits = config.extra_float_digits,
        );

        if let Err(e) = sqlx::raw_sql(&setup).execute(&mut conn).await {
            let _ = conn.close().await;
            return Err(HarnessError::Connect(e));
        }

        tracing::debug!(test = test_name, schema = %schema, "acquired test session");

        Ok(Self {
            conn,
            schema,
            fixture_dir: config.fixture_dir.clone(),
            last_fixture: None,
            last_query: None,
        })
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    /// Direct access for typed sqlx queries
    pub fn conn(&mut self) -> &mut PgConnection {
        &mut self.conn
    }

    /// Path of a file inside the configured fixture directory
    pub fn fixture_path(&self, file_name: &str) -> PathBuf {
        self.fixture_dir.join(file_name)
    }

    /// Execute a fixture file exactly as given
    pub async fn load_fixtures(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        self.last_fixture = Some(path.to_path_buf());
        fixtures::load_fixtures(&mut self.conn, path).await
    }

    /// Load a named fixture from the fixture directory, after checking that
    /// the extensions it needs are installed
    pub async fn load<F: SqlFixture>(&mut self) -> Result<()> {
        self.require_extensions(F::REQUIRED_EXTENSIONS).await?;
        let path = self.fixture_path(F::FILE_NAME);
        self.load_fixtures(path).await
    }

    /// Fail with `MissingExtension` for the first extension not installed
    pub async fn require_extensions(&mut self, names: &[&str]) -> Result<()> {
        for name in names {
            let installed: bool = sqlx::query_scalar(
                "SELECT EXISTS(SELECT 1 FROM pg_extension WHERE extname = $1)",
            )
            .bind(*name)
            .fetch_one(&mut self.conn)
            .await
            .map_err(|source| HarnessError::Query {
                sql: format!("extension check for '{}'", name),
                source,
            })?;

            if !installed {
                return Err(HarnessError::MissingExtension(name.to_string()));
            }
        }
        Ok(())
    }

    /// Run a parameterless query and capture every row.
    ///
    /// The query goes over the simple query protocol, so values arrive in
    /// the server's text format and honor the session's extra_float_digits.
    pub async fn fetch_all(&mut self, sql: &str) -> Result<Vec<ResultRow>> {
        self.last_query = Some(sql.to_string());

        let rows = sqlx::raw_sql(sql)
            .fetch_all(&mut self.conn)
            .await
            .map_err(|source| HarnessError::Query {
                sql: sql.to_string(),
                source,
            })?;

        let rows = rows
            .iter()
            .map(ResultRow::from_pg_row)
            .collect::<Result<Vec<_>>>()?;

        tracing::debug!(schema = %self.schema, count = rows.len(), "fetched rows");
        for row in &rows {
            tracing::debug!("  {}", row);
        }

        Ok(rows)
    }

    /// Read back every row a named fixture seeded, as typed structs
    pub async fn fetch_fixture_rows<F: SqlFixture>(&mut self) -> Result<Vec<F::Row>> {
        self.last_query = Some(F::SELECT_ALL.to_string());

        sqlx::query_as::<_, F::Row>(F::SELECT_ALL)
            .fetch_all(&mut self.conn)
            .await
            .map_err(|source| HarnessError::Query {
                sql: F::SELECT_ALL.to_string(),
                source,
            })
    }

    /// The last fixture and query this session ran
    pub fn context(&self) -> AssertContext {
        AssertContext {
            fixture: self.last_fixture.clone(),
            query: self.last_query.clone(),
        }
    }

    pub fn assert_row_count(&self, actual: &[ResultRow], expected: usize) -> Result<()> {
        rows::assert_row_count(&self.context(), actual, expected)
    }

    pub fn assert_rows(&self, actual: &[ResultRow], expected: &[ResultRow]) -> Result<()> {
        rows::assert_rows(&self.context(), actual, expected)
    }

    /// Drop the test schema and close the connection.
    ///
    /// The connection is closed even when dropping the schema fails.
    pub async fn release(self) -> Result<()> {
        let Self { mut conn, schema, .. } = self;

        let drop_sql = format!("DROP SCHEMA IF EXISTS \"{}\" CASCADE", schema);
        let dropped = sqlx::raw_sql(&drop_sql).execute(&mut conn).await;
        let closed = conn.close().await;

        tracing::debug!(schema = %schema, "released test session");

        dropped.map_err(HarnessError::Release)?;
        closed.map_err(HarnessError::Release)
    }
}

/// Generate a unique schema name for a test.
///
/// The test name is sanitized to ASCII alphanumerics and underscores,
/// lowercased, truncated, and suffixed with a short random id so repeated
/// or concurrent runs of the same test never share a schema.
pub fn generate_test_schema_name(test_name: &str) -> String {
    let sanitized = test_name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect::<String>();

    let suffix = uuid::Uuid::new_v4().simple().to_string();
    let suffix = &suffix[..8];

    // "test_" + name + "_" + suffix must fit in one identifier
    let budget = MAX_IDENTIFIER_LEN - "test_".len() - 1 - suffix.len();
    let truncated = if sanitized.len() > budget {
        &sanitized[..budget]
    } else {
        &sanitized
    };

    format!("test_{}_{}", truncated, suffix)
}

/// Run `body` with a mutable borrow of `resource`, then hand the resource to
/// `release`, whatever the body did.
///
/// Release happens exactly once: after a normal return, after an error,
/// and after a panic (which is resumed once release has finished). When
/// both the body and the release fail, the body's error is returned and
/// the release error is logged.
pub async fn scoped<R, T, B, F>(mut resource: R, body: B, release: F) -> anyhow::Result<T>
where
    B: for<'r> FnOnce(&'r mut R) -> BoxFuture<'r, anyhow::Result<T>>,
    F: FnOnce(R) -> BoxFuture<'static, Result<()>>,
{
    let outcome = AssertUnwindSafe(async { body(&mut resource).await })
        .catch_unwind()
        .await;

    let released = release(resource).await;

    match outcome {
        Ok(Ok(value)) => {
            released?;
            Ok(value)
        }
        Ok(Err(e)) => {
            if let Err(release_err) = released {
                tracing::warn!(error = %release_err, "release failed after test error");
            }
            Err(e)
        }
        Err(panic) => {
            if let Err(release_err) = released {
                tracing::warn!(error = %release_err, "release failed after test panic");
            }
            std::panic::resume_unwind(panic)
        }
    }
}

/// Run a test body against a fresh session, configured from the environment
///
/// ```ignore
/// dbconnect("select_organizations", |db| Box::pin(async move {
///     db.load::<Organizations>().await?;
///     let rows = db.fetch_all("SELECT * FROM organizations").await?;
///     db.assert_row_count(&rows, 7)?;
///     Ok(())
/// })).await
/// ```
pub async fn dbconnect<B>(test_name: &str, body: B) -> anyhow::Result<()>
where
    B: for<'s> FnOnce(&'s mut TestSession) -> BoxFuture<'s, anyhow::Result<()>>,
{
    let config = HarnessConfig::from_env()?;
    dbconnect_with(&config, test_name, body).await
}

/// Same as [`dbconnect`] with an explicit configuration
pub async fn dbconnect_with<B>(config: &HarnessConfig, test_name: &str, body: B) -> anyhow::Result<()>
where
    B: for<'s> FnOnce(&'s mut TestSession) -> BoxFuture<'s, anyhow::Result<()>>,
{
    let session = TestSession::acquire(config, test_name).await?;
    scoped(session, body, |session| Box::pin(session.release())).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Tracked {
        releases: Arc<AtomicUsize>,
        fail_release: bool,
    }

    impl Tracked {
        fn new(fail_release: bool) -> (Self, Arc<AtomicUsize>) {
            let releases = Arc::new(AtomicUsize::new(0));
            let tracked = Self {
                releases: releases.clone(),
                fail_release,
            };
            (tracked, releases)
        }
    }

    fn release_tracked(tracked: Tracked) -> BoxFuture<'static, Result<()>> {
        Box::pin(async move {
            tracked.releases.fetch_add(1, Ordering::SeqCst);
            if tracked.fail_release {
                Err(HarnessError::Release(sqlx::Error::PoolClosed))
            } else {
                Ok(())
            }
        })
    }

    #[tokio::test]
    async fn test_scoped_releases_once_on_success() {
        let (tracked, releases) = Tracked::new(false);

        let value = scoped(
            tracked,
            |p| Box::pin(async move { Ok::<_, anyhow::Error>(p.releases.load(Ordering::SeqCst)) }),
            release_tracked,
        )
        .await
        .unwrap();

        assert_eq!(value, 0, "body runs before release");
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_scoped_releases_once_on_error() {
        let (tracked, releases) = Tracked::new(false);

        let err = scoped(
            tracked,
            |_| Box::pin(async { Err::<(), _>(anyhow::anyhow!("query failed")) }),
            release_tracked,
        )
        .await
        .unwrap_err();

        assert_eq!(err.to_string(), "query failed");
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_scoped_releases_once_on_panic() {
        let (tracked, releases) = Tracked::new(false);

        let outcome = AssertUnwindSafe(scoped(
            tracked,
            |_| {
                Box::pin(async {
                    assert_eq!(1 + 1, 3, "rows differ");
                    Ok::<(), anyhow::Error>(())
                })
            },
            release_tracked,
        ))
        .catch_unwind()
        .await;

        assert!(outcome.is_err(), "panic should be resumed after release");
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_scoped_body_error_wins_over_release_error() {
        let (tracked, releases) = Tracked::new(true);

        let err = scoped(
            tracked,
            |_| Box::pin(async { Err::<(), _>(anyhow::anyhow!("assertion failed")) }),
            release_tracked,
        )
        .await
        .unwrap_err();

        assert_eq!(err.to_string(), "assertion failed");
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_scoped_release_error_surfaces_after_success() {
        let (tracked, releases) = Tracked::new(true);

        let err = scoped(tracked, |_| Box::pin(async { Ok::<_, anyhow::Error>(()) }), release_tracked)
            .await
            .unwrap_err();

        assert!(matches!(
            err.downcast_ref::<HarnessError>(),
            Some(HarnessError::Release(_))
        ));
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_scoped_accepts_non_send_body() {
        let (tracked, releases) = Tracked::new(false);

        let value = scoped(
            tracked,
            |_| {
                Box::pin(async {
                    // Rc is !Send and lives across the await below
                    let shared = std::rc::Rc::new(41);
                    tokio::task::yield_now().await;
                    Ok::<_, anyhow::Error>(*shared + 1)
                })
            },
            release_tracked,
        )
        .await
        .unwrap();

        assert_eq!(value, 42);
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_generate_schema_name() {
        let name1 = generate_test_schema_name("test_foo");
        let name2 = generate_test_schema_name("test::bar::Baz");
        let name3 = generate_test_schema_name("a".repeat(100).as_str());

        assert!(name1.starts_with("test_test_foo_"));
        assert!(name2.starts_with("test_test__bar__baz_"));
        assert!(name3.len() <= MAX_IDENTIFIER_LEN);
        assert!(name3.starts_with("test_aaaa"));
        assert_eq!(name1.len(), "test_test_foo_".len() + 8);
    }

    #[test]
    fn test_schema_names_are_unique() {
        let a = generate_test_schema_name("same_test");
        let b = generate_test_schema_name("same_test");
        assert_ne!(a, b);
    }
}
