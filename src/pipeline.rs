//! One full run: every state adapter, then the national pass.
//!
//! State adapters write `<partial_dir>/<region>.json`. The national pass
//! then writes `<output_dir>/<state>.json` for all eight states, merging
//! the infographic values into whichever partial documents exist.

use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::{error, info, info_span, warn, Instrument};

use crate::cache::PageCache;
use crate::config::Config;
use crate::error::PipelineError;
use crate::http::HttpClient;
use crate::models::{BreakdownKind, Metric, OutputDocument, PartialSeries, Region, State};
use crate::output;
use crate::series::{fill, national_only, reconcile, reshape, ManualTable};
use crate::sources::national::NationalAdapter;
use crate::sources::{state_adapters, FetchContext, SourceAdapter, StateAdapter};

/// Documents written by [`run`].
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub partial_written: Vec<PathBuf>,
    pub final_written: Vec<PathBuf>,
    /// Regions whose adapter failed, with the error chain.
    pub failed: Vec<(Region, String)>,
}

pub async fn run(cfg: &Config) -> Result<RunSummary> {
    // ---
    let http = HttpClient::new(&cfg.user_agent).context("Failed to build HTTP client")?;
    let cache = PageCache::new(&cfg.cache_dir);
    let ctx = FetchContext {
        http: &http,
        cache: &cache,
        config: cfg,
    };

    let mut summary = RunSummary::default();
    run_states(&state_adapters(&cfg.regions), ctx, &mut summary).await;

    if cfg.regions.contains(&Region::National) {
        match run_national(ctx).instrument(info_span!("national")).await {
            Ok(written) => summary.final_written = written,
            Err(err) => {
                error!("national adapter failed: {:#}", err);
                summary.failed.push((Region::National, format!("{err:#}")));
            }
        }
    }

    Ok(summary)
}

/// Run each state adapter in turn. A failing state is logged and recorded
/// in `summary`; the others still run.
pub async fn run_states(adapters: &[StateAdapter], ctx: FetchContext<'_>, summary: &mut RunSummary) {
    // ---
    for adapter in adapters {
        let region = adapter.region();
        match run_state(adapter, ctx)
            .instrument(info_span!("state", region = region.slug()))
            .await
        {
            Ok(path) => summary.partial_written.push(path),
            Err(err) => {
                error!("{} adapter failed: {:#}", region.slug(), err);
                summary.failed.push((region, format!("{err:#}")));
            }
        }
    }
}

/// Fetch, extract and merge one state, writing its partial document.
async fn run_state(adapter: &StateAdapter, ctx: FetchContext<'_>) -> Result<PathBuf> {
    // ---
    let region = adapter.region();
    let raw = adapter.fetch(ctx).await?;
    info!("Fetched {} document(s)", raw.len());

    let series = adapter.extract(&raw)?;
    info!("Extracted {} dated record(s)", series.len());

    let manual_path = ctx.config.manual_dir.join(format!("{}.json", region.slug()));
    let manual = ManualTable::load(&manual_path).await?;

    let doc = build_document(series, &manual, adapter.metrics(), adapter.breakdowns())?;
    output::write_document(&ctx.config.partial_dir, region.slug(), &doc).await
}

/// Manual corrections, fill and reshape for one region.
pub fn build_document(
    mut series: PartialSeries,
    manual: &ManualTable,
    metrics: &[Metric],
    breakdowns: &[BreakdownKind],
) -> Result<OutputDocument, PipelineError> {
    // ---
    manual.apply(&mut series);
    let doc = reshape(&fill(&series), metrics, breakdowns);
    doc.validate()?;
    Ok(doc)
}

/// The final document for one state.
pub fn finalize_state(
    partial: Option<OutputDocument>,
    national: &PartialSeries,
) -> Result<OutputDocument, PipelineError> {
    // ---
    match partial {
        Some(doc) => reconcile(doc, national),
        None => Ok(national_only(national)),
    }
}

async fn run_national(ctx: FetchContext<'_>) -> Result<Vec<PathBuf>> {
    // ---
    let adapter = NationalAdapter;
    let raw = adapter.fetch(ctx).await?;
    let national = adapter.extract(&raw)?;
    if national.is_empty() {
        warn!("No national infographic could be read");
    }

    let mut written = Vec::new();
    for state in State::ALL {
        let partial = output::read_document(&ctx.config.partial_dir, state.slug()).await?;
        if partial.is_none() {
            info!("{}: national values only", state);
        }

        let doc = finalize_state(partial, &national.for_state(state))
            .with_context(|| format!("Failed to reconcile {state}"))?;
        written.push(output::write_document(&ctx.config.output_dir, state.slug(), &doc).await?);
    }

    Ok(written)
}
