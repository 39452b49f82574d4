#![doc = include_str!("../README.md")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod calendar;
pub mod dedup;
pub mod error;
pub mod panel;
pub mod pipeline;
pub mod pit;
pub mod policy;
pub mod quarterly;
pub mod shares;
pub mod specs;
pub mod store;
pub mod ttm;
pub mod types;
pub mod validate;

// Re-export core types
pub use error::{PitError, Result};
pub use pipeline::{BuildOutput, PipelineConfig, run_pipeline};
pub use pit::PitQueryEngine;
pub use specs::{MetricRegistry, MetricSpec};
pub use types::{
    DedupedObservation, FiscalPeriod, FiscalQuarter, PriceBar, QuarterlyMetric, RawObservation,
    SharesRow,
};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
