//! One source adapter per region.
//!
//! Every adapter follows the same two-phase contract:
//!
//! 1. **Fetching** ([`SourceAdapter::fetch`]): walk the region's listing
//!    pages and return every raw document, going through the page cache so
//!    published releases are downloaded once.
//! 2. **Extraction** ([`SourceAdapter::extract`]): turn the raw documents
//!    into typed values. This phase is pure and is what the tests drive.
//!
//! | Region | Module | Documents |
//! |--------|--------|-----------|
//! | NSW | [`nsw`] | HTML releases with statistics tables |
//! | QLD | [`qld`] | HTML releases plus status page snapshots |
//! | VIC | [`vic`] | BI linelist export plus HTML releases |
//! | WA | [`wa`] | HTML releases |
//! | National | [`national`] | Daily PDF infographics |
//!
//! A release that cannot be understood is logged with `warn!` and skipped;
//! only the conditions in [`PipelineError`] abort a run.

pub mod national;
pub mod nsw;
pub mod qld;
pub mod vic;
pub mod wa;

use anyhow::Result;
use async_trait::async_trait;
use url::Url;

use crate::cache::PageCache;
use crate::config::Config;
use crate::error::PipelineError;
use crate::http::HttpClient;
use crate::models::{BreakdownKind, Metric, PartialSeries, Region};

/// A fetched document, tagged with what it is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawDocument {
    /// Adapter-defined document kind, e.g. `"release"` or `"status"`.
    pub kind: &'static str,
    /// Cache file name, used in log lines.
    pub name: String,
    pub bytes: Vec<u8>,
}

impl RawDocument {
    pub fn new(kind: &'static str, name: impl Into<String>, bytes: Vec<u8>) -> Self {
        RawDocument {
            kind,
            name: name.into(),
            bytes,
        }
    }

    pub fn text(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.bytes)
    }
}

/// Shared handles for the fetch phase.
#[derive(Debug, Clone, Copy)]
pub struct FetchContext<'a> {
    pub http: &'a HttpClient,
    pub cache: &'a PageCache,
    pub config: &'a Config,
}

#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// What extraction produces.
    type Output;

    fn region(&self) -> Region;

    /// Metrics written to the region's document.
    fn metrics(&self) -> &'static [Metric] {
        &[]
    }

    /// Breakdowns written to the region's document.
    fn breakdowns(&self) -> &'static [BreakdownKind] {
        &[]
    }

    async fn fetch(&self, ctx: FetchContext<'_>) -> Result<Vec<RawDocument>>;

    fn extract(&self, raw: &[RawDocument]) -> Result<Self::Output, PipelineError>;
}

/// Adapters producing a single state's partial series.
pub type StateAdapter = Box<dyn SourceAdapter<Output = PartialSeries>>;

/// The adapter for every state region in `regions`, in order.
pub fn state_adapters(regions: &[Region]) -> Vec<StateAdapter> {
    // ---
    regions
        .iter()
        .filter_map(|region| -> Option<StateAdapter> {
            match region {
                Region::Nsw => Some(Box::new(nsw::NswAdapter)),
                Region::Qld => Some(Box::new(qld::QldAdapter)),
                Region::Vic => Some(Box::new(vic::VicAdapter)),
                Region::Wa => Some(Box::new(wa::WaAdapter)),
                Region::National => None,
            }
        })
        .collect()
}

/// Cached copy of `url`, stored as `<region>/<name>`.
pub(crate) async fn cached_fetch(
    ctx: FetchContext<'_>,
    region: Region,
    name: &str,
    url: &Url,
    reject_marker: Option<&str>,
) -> Result<Vec<u8>> {
    // ---
    let path = ctx.cache.path(region, name);
    let http = ctx.http;
    let url = url.clone();
    ctx.cache
        .get_or_fetch(&path, reject_marker, move || async move { http.get_bytes(&url).await })
        .await
}

/// Resolve `href` against `base`, keeping absolute URLs as they are.
pub(crate) fn absolute_url(base: &str, href: &str) -> Option<Url> {
    Url::parse(base).ok()?.join(href.trim()).ok()
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn test_state_adapters_skip_national() {
        // ---
        let adapters = state_adapters(&Region::ALL);
        let regions: Vec<_> = adapters.iter().map(|a| a.region()).collect();
        assert_eq!(regions, vec![Region::Nsw, Region::Qld, Region::Vic, Region::Wa]);
    }

    #[test]
    fn test_absolute_url() {
        // ---
        let base = "https://www.health.nsw.gov.au/news/Pages/2020-nsw-health.aspx";
        assert_eq!(
            absolute_url(base, "20200401_00.aspx").unwrap().as_str(),
            "https://www.health.nsw.gov.au/news/Pages/20200401_00.aspx"
        );
        assert_eq!(
            absolute_url(base, "/news/Pages/x.aspx").unwrap().as_str(),
            "https://www.health.nsw.gov.au/news/Pages/x.aspx"
        );
        assert_eq!(
            absolute_url(base, "https://example.org/a").unwrap().as_str(),
            "https://example.org/a"
        );
    }
}
