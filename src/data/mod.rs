/// Data layer: raw parsing, table storage, persistence and derived features.
///
/// Architecture:
/// ```text
///  cloud.data (whitespace text)
///        │
///        ▼
///   ┌──────────┐
///   │   raw     │  two line ranges → labelled FeatureTable
///   └──────────┘
///        │
///        ▼
///   ┌──────────────┐
///   │ FeatureTable  │  named numeric / text columns
///   └──────────────┘
///        │        ▲
///        ▼        │
///   ┌──────────┐  │
///   │  loader   │─┘  .csv / .json / .parquet
///   └──────────┘
///        │
///        ▼
///   ┌──────────┐
///   │ features  │  validated derived columns, skip report
///   └──────────┘
/// ```

pub mod features;
pub mod loader;
pub mod model;
pub mod raw;
