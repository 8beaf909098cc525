//! Application entry point for the `covid-au-pipeline` batch job.
//!
//! This binary orchestrates one full run of the pipeline:
//! - Loading configuration from environment variables or `.env`
//! - Initializing structured logging/tracing
//! - Running every selected state adapter (fetch → cache → extract → merge)
//!   and writing `by_state_partial/<region>.json`
//! - Running the national infographic pass, which reconciles the partial
//!   documents and writes the final `by_state/<region>.json`
//!
//! # Environment Variables
//! - `PIPELINE_CACHE_DIR` (optional) – page cache root (default: `data_cache`)
//! - `PIPELINE_OUTPUT_DIR` (optional) – final documents (default: `by_state`)
//! - `PIPELINE_PARTIAL_DIR` (optional) – state-only documents (default: `by_state_partial`)
//! - `PIPELINE_MANUAL_DIR` (optional) – manual correction tables (default: `manual`)
//! - `PIPELINE_REGIONS` (optional) – comma separated subset of regions to run
//! - `CACHE_POWERBI` (optional) – read the VIC BI export from cache
//! - `NATIONAL_START_DATE` (optional) – first infographic date fetched
//! - `PIPELINE_LOG_LEVEL` (optional) – log verbosity (default: `info`)
//! - `PIPELINE_SPAN_EVENTS` (optional) – span event mode for tracing
//!
//! Configuration parsing is delegated to `config`, and the run itself to
//! `pipeline`; this file only wires them together.
use std::{env, io::IsTerminal};

use dotenvy::dotenv;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

use anyhow::Result;

use covid_au_pipeline::{config, pipeline};

// ---

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // ---
    dotenv().ok();
    init_tracing();

    let cfg = config::load_from_env()?;
    cfg.log_config();

    let summary = pipeline::run(&cfg).await?;

    tracing::info!(
        "Run complete: {} partial document(s), {} final document(s)",
        summary.partial_written.len(),
        summary.final_written.len()
    );

    if !summary.failed.is_empty() {
        let regions: Vec<_> = summary.failed.iter().map(|(region, _)| region.slug()).collect();
        anyhow::bail!("{} region(s) failed: {}", regions.len(), regions.join(", "));
    }

    Ok(())
}

// ---

/// Initialize the global tracing subscriber for structured logging.
///
/// This function configures the [`tracing_subscriber`] with:
/// - Log target, file, and line number output enabled
/// - Color output controlled by TTY detection and `FORCE_COLOR` env var:
///   - `FORCE_COLOR=1|true|yes`: force colors on
///   - `FORCE_COLOR=0|false|no`: force colors off
///   - unset or other values: auto-detect TTY
/// - Span event emission mode controlled by the `PIPELINE_SPAN_EVENTS` env var:
///   - `"full"`       : emit ENTER, EXIT, and CLOSE events with timing
///   - `"enter_exit"` : emit ENTER and EXIT only
///   - unset or other values: emit CLOSE events only (default)
/// - Log level controlled by the `PIPELINE_LOG_LEVEL` env var
///
/// Call once at startup before any logging macros are invoked.
fn init_tracing() {
    // ---
    let span_events = match env::var("PIPELINE_SPAN_EVENTS").as_deref() {
        Ok("full") => FmtSpan::FULL,
        Ok("enter_exit") => FmtSpan::ENTER | FmtSpan::EXIT,
        _ => FmtSpan::CLOSE,
    };

    let use_color = match env::var("FORCE_COLOR").as_deref() {
        Ok("1") | Ok("true") | Ok("yes") => true,
        Ok("0") | Ok("false") | Ok("no") => false,
        _ => std::io::stdout().is_terminal(),
    };

    // Use RUST_LOG if available, otherwise fall back to PIPELINE_LOG_LEVEL
    let env_filter = if env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let level = match env::var("PIPELINE_LOG_LEVEL").ok().as_deref() {
            Some("trace") => "trace",
            Some("debug") => "debug",
            Some("info") => "info",
            Some("warn") => "warn",
            Some("error") => "error",
            _ => "info",
        };
        EnvFilter::new(format!("{level},html5ever=warn,selectors=warn,reqwest=warn"))
    };

    tracing_subscriber::fmt()
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(span_events)
        .with_env_filter(env_filter)
        .with_ansi(use_color)
        .compact()
        .init();
}
