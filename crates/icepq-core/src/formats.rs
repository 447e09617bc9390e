//! File formats the table engine reads and writes.
//!
//! - [`avro`]: manifests and manifest lists (written and read).
//! - [`parquet`]: data file footers (read only).

pub mod avro;
pub mod parquet;
