//! Reproducible cloud-type classification pipeline.
//!
//! Raw whitespace-delimited measurements are parsed into a labelled table
//! ([`data::raw`]), enriched with derived features ([`data::features`]),
//! and used to fit and score a logistic regression ([`model`]). The
//! [`pipeline`] module sequences these as independent stages driven by a
//! YAML [`config`].

pub mod config;
pub mod data;
pub mod model;
pub mod pipeline;

pub use config::{ConfigError, PipelineConfig, load_config};
pub use data::features::{Derivation, FeatureMode, SkipReason, SkippedFeature, derive, derive_bulk};
pub use data::model::{Column, ColumnData, FeatureTable, TableError};
pub use data::raw::{LineRange, ParseError, ParsedTable, Schema, parse};
pub use pipeline::{Stage, StageArgs};
