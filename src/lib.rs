//! Library crate for `covid-au-pipeline`.
//!
//! Every region is handled by an independent source adapter (see
//! [`sources`]) that fetches raw documents through the on-disk page cache and
//! turns them into a sparse, per-date partial series. The [`series`] module
//! owns everything that happens afterwards: manual corrections, forward
//! filling, reshaping into the dense output document, and reconciliation of
//! state documents against the national infographic data.
//!
//! The binary (`main.rs`) only wires configuration, tracing and the
//! [`pipeline`] together; everything testable lives here.

pub mod cache;
pub mod config;
pub mod error;
pub mod extract;
pub mod http;
pub mod models;
pub mod output;
pub mod pipeline;
pub mod series;
pub mod sources;

pub use config::Config;
pub use error::{FetchError, PipelineError};
pub use models::{
    BreakdownKind, BreakdownSeries, DailyRecord, Metric, OutputDocument, PartialSeries, Region,
    State, TimeSeries,
};
