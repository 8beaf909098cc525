//! Typed failures for the conditions that must stop a run.
//!
//! Soft failures (one unparseable release, an unknown table, a missing
//! infographic) are logged with `warn!` and skipped by the adapters; they
//! never become one of these variants.

use chrono::NaiveDate;
use thiserror::Error;

use crate::models::State;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("unknown {table} category: {label:?}")]
    UnknownCategory { table: &'static str, label: String },

    #[error("expected {expected} {panel} values on the infographic, found {found}: {values:?}")]
    PanelCountMismatch {
        panel: &'static str,
        expected: usize,
        found: usize,
        values: Vec<String>,
    },

    #[error("could not parse state map label for {state}: {text:?}")]
    UnparseableMapLabel { state: State, text: String },

    #[error("could not parse {field} value {text:?}")]
    UnparseableValue { field: &'static str, text: String },

    #[error("infographic has no \"last updated\" timestamp")]
    MissingUpdateTime,

    #[error("release dated {date} could not be parsed: {reason}")]
    UnparseableRelease { date: NaiveDate, reason: String },

    #[error("national date {date} is missing from the state axis but not after its last date {last}")]
    OutOfOrderDate { date: NaiveDate, last: NaiveDate },

    #[error("unexpected BI export shape: {0}")]
    MalformedExport(String),

    #[error("invalid output document: {0}")]
    InvalidDocument(String),

    #[error("invalid manual table: {0}")]
    InvalidManualTable(String),

    #[error("could not read PDF: {0}")]
    Pdf(#[from] lopdf::Error),
}

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("{0} returned 404")]
    NotFound(String),

    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("invalid header: {0}")]
    InvalidHeader(String),
}

impl FetchError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, FetchError::NotFound(_))
    }
}
