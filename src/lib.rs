//! Fetcher for the Taiwan crop/pesticide regulatory portals.
//!
//! Walks the paginated listings of the PPM crop cross-reference system and the
//! pesticide registration database, extracts the HTML tables into typed
//! records, deduplicates them by their natural keys and materializes one CSV
//! file (plus label images) per crop or pesticide code. Re-runs are
//! incremental: entities that already have an output artifact are skipped
//! unless forced.

use std::time::Duration;

pub mod cli;
pub mod client;
pub mod dedup;
mod error;
pub mod extract;
pub mod fetch;
mod macros;
pub mod model;
pub mod paginate;
pub mod plan;
pub mod process;
pub mod store;

pub use error::{Error, Result};

pub const PPM_BASE_URL: &str = "https://otserv2.acri.gov.tw/PPM";
pub const REGISTRY_BASE_URL: &str = "https://pesticide.aphia.gov.tw";

/// Page size the registration listing endpoint is queried with.
pub const PAGE_SIZE: usize = 100;
/// Cooperative delay between successive remote fetches (pages and entities).
pub const FETCH_DELAY: Duration = Duration::from_millis(500);
/// Bounded per-request timeout. The source sites occasionally hang and an
/// unbounded wait would stall the whole sequential run.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub const USAGE_DIR: &str = "data/usage";
pub const PESTICIDES_DIR: &str = "data/pesticides";
pub const IMAGES_DIR: &str = "data/images";
pub const RANGES_DIR: &str = "data/ranges";
pub const MASTER_LIST_FILE: &str = "data/regulatory/taiwan_pesticide_list.csv";
pub const COMBINED_FILE: &str = "data/regulatory/taiwan_comprehensive_combined.csv";

/// Default number of crops processed per run unless `--full` is given.
pub const DEFAULT_CROP_LIMIT: usize = 10;
pub const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
