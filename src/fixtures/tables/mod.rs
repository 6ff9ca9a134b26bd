// fixtures/tables/mod.rs
//
// One module per fixture file under sql/. Each exposes a marker type that
// implements SqlFixture plus the row struct for the table it seeds.

pub mod japan_segments;
pub mod organizations;

pub use japan_segments::{JapanSegment, JapanSegments};
pub use organizations::{Organization, Organizations};

use super::SqlFixture;

/// Every extension some fixture in this crate needs, sorted and deduplicated
pub fn required_extensions() -> Vec<&'static str> {
    let mut all: Vec<&'static str> = Organizations::REQUIRED_EXTENSIONS
        .iter()
        .chain(JapanSegments::REQUIRED_EXTENSIONS)
        .copied()
        .collect();
    all.sort_unstable();
    all.dedup();
    all
}
