// fixtures/mod.rs - SQL fixture loading
//
// A fixture is a plain .sql file (CREATE TABLE + INSERT, PostGIS literals
// where needed) that puts the database into a known state before a test
// runs its query. The whole file goes to the server as one batch over the
// simple query protocol, so it may contain any number of statements.
//
// Named fixtures implement `SqlFixture`, which ties the file name to a
// typed row struct so tests can also read the seeded data back with sqlx.

pub mod tables;

use crate::error::{HarnessError, Result};
use sqlx::postgres::PgRow;
use sqlx::{FromRow, PgConnection};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// A fixture file living in the fixture directory
pub trait SqlFixture {
    /// File name relative to the fixture directory
    const FILE_NAME: &'static str;

    /// Extensions the fixture's DDL depends on
    const REQUIRED_EXTENSIONS: &'static [&'static str] = &[];

    /// Reads every seeded row back in a stable order
    const SELECT_ALL: &'static str;

    type Row: for<'r> FromRow<'r, PgRow> + Send + Unpin;
}

/// Read a fixture file and execute it against `conn`.
///
/// Nothing is retried or rewritten: a missing file or SQL the server
/// rejects comes back as an error carrying the path.
pub async fn load_fixtures(conn: &mut PgConnection, path: &Path) -> Result<()> {
    let sql = read_fixture(path)?;

    tracing::debug!(fixture = %path.display(), bytes = sql.len(), "loading fixture");

    sqlx::raw_sql(&sql)
        .execute(&mut *conn)
        .await
        .map_err(|source| HarnessError::FixtureLoad {
            path: path.to_path_buf(),
            source,
        })?;

    Ok(())
}

/// Read the full text of a fixture file
pub fn read_fixture(path: &Path) -> Result<String> {
    fs::read_to_string(path).map_err(|source| match source.kind() {
        ErrorKind::NotFound => HarnessError::FixtureMissing {
            path: path.to_path_buf(),
        },
        _ => HarnessError::FixtureRead {
            path: path.to_path_buf(),
            source,
        },
    })
}

/// All `*.sql` files in `dir`, sorted by file name
pub fn discover_fixtures(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = fs::read_dir(dir).map_err(|source| match source.kind() {
        ErrorKind::NotFound => HarnessError::FixtureMissing {
            path: dir.to_path_buf(),
        },
        _ => HarnessError::FixtureRead {
            path: dir.to_path_buf(),
            source,
        },
    })?;

    let mut fixtures = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| HarnessError::FixtureRead {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = entry.path();

        if path.is_file() && path.extension().and_then(|ext| ext.to_str()) == Some("sql") {
            fixtures.push(path);
        }
    }

    fixtures.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(fixtures)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_discover_only_sql_sorted() {
        let dir = tempdir().unwrap();
        for name in ["b_segments.sql", "a_orgs.sql", "notes.txt", "c.SQL.bak"] {
            fs::write(dir.path().join(name), "SELECT 1;").unwrap();
        }
        fs::create_dir(dir.path().join("nested.sql")).unwrap();

        let found: Vec<String> = discover_fixtures(dir.path())
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();

        assert_eq!(found, vec!["a_orgs.sql", "b_segments.sql"]);
    }

    #[test]
    fn test_missing_fixture_reports_path() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("does_not_exist.sql");

        match read_fixture(&path) {
            Err(HarnessError::FixtureMissing { path: reported }) => assert_eq!(reported, path),
            other => panic!("expected FixtureMissing, got {:?}", other),
        }

        assert!(matches!(
            discover_fixtures(&dir.path().join("nope")),
            Err(HarnessError::FixtureMissing { .. })
        ));
    }

    #[test]
    fn test_read_fixture_returns_full_text() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("two_statements.sql");
        let body = "CREATE TABLE t (id INT);\nINSERT INTO t VALUES (1);\n";
        fs::write(&path, body).unwrap();

        assert_eq!(read_fixture(&path).unwrap(), body);
    }

    #[test]
    fn test_shipped_fixtures_are_discovered() {
        let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("sql");
        let names: Vec<String> = discover_fixtures(&dir)
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();

        assert!(names.contains(&tables::Organizations::FILE_NAME.to_string()));
        assert!(names.contains(&tables::JapanSegments::FILE_NAME.to_string()));
    }
}
