// fixtures/tables/japan_segments.rs
//
// sql/japan_segments.sql seeds ten rectangular map segments off the
// Kagoshima coast as PostGIS polygons (SRID 4326).

use crate::fixtures::SqlFixture;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A segment with its bounds rendered as WKT
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct JapanSegment {
    pub id: String,
    pub bounds_wkt: String,
}

impl JapanSegment {
    /// The numeric part of ids like `KAGOSHIMA_7`
    pub fn sequence(&self) -> Option<u32> {
        self.id.rsplit_once('_').and_then(|(_, n)| n.parse().ok())
    }
}

pub struct JapanSegments;

impl SqlFixture for JapanSegments {
    const FILE_NAME: &'static str = "japan_segments.sql";
    const REQUIRED_EXTENSIONS: &'static [&'static str] = &["postgis"];
    const SELECT_ALL: &'static str =
        "SELECT id, ST_AsText(bounds) AS bounds_wkt FROM japan_segments ORDER BY id";
    type Row = JapanSegment;
}
