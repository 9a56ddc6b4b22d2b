pub mod config;
pub mod context;
pub mod error;
pub mod extractor;
mod fanout;
pub mod loader;
pub mod lock;
pub mod logging;
pub mod metrics;
pub mod objectstore;
pub mod record;
mod retries;
pub mod subprocess;
pub mod transform;
pub mod workflow;

pub use fanout::CancelFlag;

/// External representation of a business date, e.g. `20250101`.
pub const DATE_FORMAT: &str = "%Y%m%d";

/// Date representation used inside source record payloads, e.g. `2025.01.05`.
pub const SOURCE_DATE_FORMAT: &str = "%Y.%m.%d";

/// Timestamp representation used in CSV shards and SQL tick rows.
pub const SOURCE_TIME_FORMAT: &str = "%Y.%m.%d %H:%M:%S%.3f";
