// rows.rs - Captured result rows and exact comparison
//
// Every query a test runs comes back as a Vec<ResultRow>: an ordered list
// of (column name, value) pairs. Expected rows are written by hand with
// the `row!` macro and compared with exact equality, floats included.

use crate::error::{HarnessError, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use serde::ser::{Serialize, SerializeMap, Serializer};
use sqlx::postgres::PgRow;
use sqlx::{Column, Row, TypeInfo, ValueRef};
use std::fmt;
use std::path::PathBuf;

/// A single decoded column value
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    /// int2, int4 and int8 all land here
    Int(i64),
    Float(f64),
    Numeric(Decimal),
    Text(String),
    Json(serde_json::Value),
    Timestamp(NaiveDateTime),
    TimestampTz(DateTime<Utc>),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Bool(v) => write!(f, "{}", v),
            Value::Int(v) => write!(f, "{}", v),
            // Debug keeps the full round-trip precision
            Value::Float(v) => write!(f, "{:?}", v),
            Value::Numeric(v) => write!(f, "{}", v),
            Value::Text(v) => write!(f, "{:?}", v),
            Value::Json(v) => write!(f, "{}", v),
            Value::Timestamp(v) => write!(f, "{}", v),
            Value::TimestampTz(v) => write!(f, "{}", v),
        }
    }
}

macro_rules! impl_value_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Value::$variant(v.into())
                }
            }
        )*
    };
}

impl_value_from! {
    bool => Bool,
    i16 => Int,
    i32 => Int,
    i64 => Int,
    u8 => Int,
    u16 => Int,
    u32 => Int,
    f32 => Float,
    f64 => Float,
    Decimal => Numeric,
    String => Text,
    serde_json::Value => Json,
    NaiveDateTime => Timestamp,
    DateTime<Utc> => TimestampTz,
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

/// One result row: column names mapped to values, in select-list order.
///
/// Equality compares the key set and the values but not the column order,
/// so `{id, count}` equals `{count, id}` when the values match.
#[derive(Debug, Clone, Default)]
pub struct ResultRow {
    columns: Vec<(String, Value)>,
}

impl ResultRow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs(columns: Vec<(String, Value)>) -> Self {
        Self { columns }
    }

    /// Decode every column of a Postgres row
    pub fn from_pg_row(row: &PgRow) -> Result<Self> {
        let mut columns = Vec::with_capacity(row.len());
        for column in row.columns() {
            let value = decode_column(row, column.ordinal(), column.name(), column.type_info().name())?;
            columns.push((column.name().to_string(), value));
        }
        Ok(Self { columns })
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value)
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|(name, _)| name.as_str())
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    fn sorted(&self) -> Vec<&(String, Value)> {
        let mut sorted: Vec<_> = self.columns.iter().collect();
        sorted.sort_by(|a, b| a.0.cmp(&b.0));
        sorted
    }
}

impl PartialEq for ResultRow {
    fn eq(&self, other: &Self) -> bool {
        self.columns.len() == other.columns.len() && self.sorted() == other.sorted()
    }
}

impl fmt::Display for ResultRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (name, value)) in self.columns.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}: {}", name, value)?;
        }
        write!(f, "}}")
    }
}

impl Serialize for ResultRow {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.columns.len()))?;
        for (name, value) in &self.columns {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

/// Build an expected row: `row! { "id" => 1, "name" => "ACME" }`
#[macro_export]
macro_rules! row {
    () => {
        $crate::rows::ResultRow::new()
    };
    ($($name:expr => $value:expr),+ $(,)?) => {
        $crate::rows::ResultRow::from_pairs(vec![
            $(($name.to_string(), $crate::rows::Value::from($value))),+
        ])
    };
}

fn decode_column(row: &PgRow, idx: usize, column: &str, type_name: &str) -> Result<Value> {
    let decode_err = |source: sqlx::Error| HarnessError::Decode {
        column: column.to_string(),
        type_name: type_name.to_string(),
        source,
    };

    let raw = row.try_get_raw(idx).map_err(decode_err)?;
    if raw.is_null() {
        return Ok(Value::Null);
    }

    let value = match type_name {
        "INT2" => Value::Int(row.try_get::<i16, _>(idx).map_err(decode_err)?.into()),
        "INT4" => Value::Int(row.try_get::<i32, _>(idx).map_err(decode_err)?.into()),
        "INT8" => Value::Int(row.try_get::<i64, _>(idx).map_err(decode_err)?),
        "FLOAT4" => Value::Float(row.try_get::<f32, _>(idx).map_err(decode_err)?.into()),
        "FLOAT8" => Value::Float(row.try_get::<f64, _>(idx).map_err(decode_err)?),
        "NUMERIC" => Value::Numeric(row.try_get::<Decimal, _>(idx).map_err(decode_err)?),
        "BOOL" => Value::Bool(row.try_get::<bool, _>(idx).map_err(decode_err)?),
        "JSON" | "JSONB" => Value::Json(row.try_get::<serde_json::Value, _>(idx).map_err(decode_err)?),
        "TIMESTAMP" => Value::Timestamp(row.try_get::<NaiveDateTime, _>(idx).map_err(decode_err)?),
        "TIMESTAMPTZ" => {
            Value::TimestampTz(row.try_get::<DateTime<Utc>, _>(idx).map_err(decode_err)?)
        }
        // text-like types and anything we have no mapping for (PostGIS
        // geometry, uuid, dates...) keep their text representation
        _ => Value::Text(row.try_get_unchecked::<String, _>(idx).map_err(decode_err)?),
    };

    Ok(value)
}

/// Where a result set came from, for failure reports
#[derive(Debug, Clone, Default)]
pub struct AssertContext {
    pub fixture: Option<PathBuf>,
    pub query: Option<String>,
}

impl AssertContext {
    fn report(&self, actual: &[ResultRow], expected: &[ResultRow]) -> String {
        let mut report = String::new();
        match &self.fixture {
            Some(path) => report.push_str(&format!("fixture: {}\n", path.display())),
            None => report.push_str("fixture: <none>\n"),
        }
        if let Some(query) = &self.query {
            report.push_str(&format!("query:\n{}\n", query.trim()));
        }
        report.push_str(&format!("actual rows ({}):\n{}\n", actual.len(), render(actual)));
        report.push_str(&format!("expected rows ({}):\n{}", expected.len(), render(expected)));

        if let Some(idx) = actual.iter().zip(expected).position(|(a, e)| a != e) {
            report.push_str(&format!(
                "\nfirst difference at row {}:\n  actual:   {}\n  expected: {}",
                idx, actual[idx], expected[idx]
            ));
        }
        report
    }
}

fn render(rows: &[ResultRow]) -> String {
    serde_json::to_string_pretty(rows).unwrap_or_else(|_| format!("{:?}", rows))
}

/// Check only the number of rows
pub fn assert_row_count(ctx: &AssertContext, actual: &[ResultRow], expected: usize) -> Result<()> {
    if actual.len() != expected {
        return Err(HarnessError::RowCount {
            expected,
            actual: actual.len(),
            report: ctx.report(actual, &[]),
        });
    }
    Ok(())
}

/// Check the row count, then the full ordered sequence of rows
pub fn assert_rows(ctx: &AssertContext, actual: &[ResultRow], expected: &[ResultRow]) -> Result<()> {
    if actual.len() != expected.len() {
        return Err(HarnessError::RowCount {
            expected: expected.len(),
            actual: actual.len(),
            report: ctx.report(actual, expected),
        });
    }
    if actual != expected {
        return Err(HarnessError::RowMismatch {
            report: ctx.report(actual, expected),
        });
    }
    Ok(())
}
