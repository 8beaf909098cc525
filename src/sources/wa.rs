//! WA Health media releases.
//!
//! Release URLs are written by hand and not stable, so every release whose
//! link mentions COVID is cached and the whole cache is parsed on each run.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use lazy_static::lazy_static;
use regex::Regex;
use scraper::{Html, Selector};
use tracing::{debug, info, warn};
use url::Url;

use super::{cached_fetch, FetchContext, RawDocument, SourceAdapter};
use crate::cache::cache_name;
use crate::error::PipelineError;
use crate::extract::patterns::{compile_all, first_num};
use crate::extract::parse_full_date;
use crate::models::{record_mut, DailyRecord, Metric, PartialSeries, Region};

const SITE: &str = "https://ww2.health.wa.gov.au";
const LISTING_URL: &str = "https://ww2.health.wa.gov.au/News/Media-releases-listing-page";

const RELEASE: &str = "release";

const METRICS: [Metric; 4] = [Metric::Confirmed, Metric::Deaths, Metric::Tested, Metric::Recovered];

lazy_static! {
    static ref CONFIRMED: Vec<Regex> = compile_all(&[
        r"bringing the State's total (?:to|is) (?P<confirmed>[\d,]+)",
        r"total number of (?:confirmed )?(?:COVID-19 )?cases in (?:WA|Western Australia) (?:is|to|remains at) (?P<confirmed>[\d,]+)",
        r"(?P<confirmed>[\d,]+) confirmed cases of COVID-19 in (?:WA|Western Australia)",
    ]);
    static ref DEATHS: Vec<Regex> = compile_all(&[
        r"total number of (?:COVID-19 )?deaths in (?:WA|Western Australia) to (?P<deaths>[\w-]+)",
        r"There have (?:now )?been (?P<deaths>[\w-]+) (?:COVID-19 )?deaths in (?:WA|Western Australia)",
    ]);
    static ref TESTED: Vec<Regex> = compile_all(&[
        r"(?P<tested>[\d,]+) people have (?:now )?tested negative",
        r"(?P<tested>[\d,]+) (?:COVID-19 )?tests have been (?:conducted|carried out|performed)",
    ]);
    static ref RECOVERED: Vec<Regex> = compile_all(&[
        r"(?P<recovered>[\d,]+) (?:people|patients) have (?:now )?recovered",
        r"recovered cases? (?:is|to) (?P<recovered>[\d,]+)",
    ]);
    static ref DATE_IN_TEXT: Regex =
        Regex::new(r"(?P<date>\d{1,2} (?:January|February|March|April|May|June|July|August|September|October|November|December) \d{4})")
            .expect("DATE_IN_TEXT to compile");

    static ref LISTING_LINK: Selector = selector("div#contentArea ul li a");
    static ref HEADING: Selector = selector("h1");
    static ref CONTENT: Selector = selector("div#contentArea");
}

fn selector(css: &str) -> Selector {
    Selector::parse(css).unwrap_or_else(|e| panic!("invalid selector {css:?}: {e:?}"))
}

#[derive(Debug, Clone, Copy, Default)]
pub struct WaAdapter;

#[async_trait]
impl SourceAdapter for WaAdapter {
    type Output = PartialSeries;

    fn region(&self) -> Region {
        Region::Wa
    }

    fn metrics(&self) -> &'static [Metric] {
        &METRICS
    }

    async fn fetch(&self, ctx: FetchContext<'_>) -> Result<Vec<RawDocument>> {
        // ---
        let listing_url = Url::parse(LISTING_URL).context("Invalid WA listing URL")?;
        let listing = ctx
            .http
            .get_text(&listing_url)
            .await
            .context("Failed to fetch WA media releases")?;

        for uri in release_uris(&listing) {
            let url = Url::parse(&format!("{SITE}{uri}")).with_context(|| format!("Invalid WA URI {uri}"))?;
            cached_fetch(ctx, Region::Wa, &cache_name(&uri, ".html"), &url, None).await?;
        }

        let mut docs = Vec::new();
        for path in ctx.cache.list(&ctx.cache.region_dir(Region::Wa)).await? {
            let Some(bytes) = ctx.cache.read(&path).await? else {
                continue;
            };
            let name = path.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
            docs.push(RawDocument::new(RELEASE, name, bytes));
        }

        info!("WA: {} cached release(s)", docs.len());
        Ok(docs)
    }

    fn extract(&self, raw: &[RawDocument]) -> Result<PartialSeries, PipelineError> {
        // ---
        let mut series = PartialSeries::new();

        for doc in raw.iter().filter(|d| d.kind == RELEASE) {
            let Some((date, figures)) = parse_release(&doc.text(), &doc.name) else {
                continue;
            };
            let record = record_mut(&mut series, date);
            for (metric, value) in figures.metrics {
                record.set(metric, value);
            }
        }

        Ok(series)
    }
}

/// Site-relative links to COVID releases; off-site links are ignored.
pub fn release_uris(page: &str) -> Vec<String> {
    // ---
    let html = Html::parse_document(page);
    html.select(&LISTING_LINK)
        .filter(|a| a.text().collect::<String>().contains("COVID"))
        .filter_map(|a| a.value().attr("href"))
        .map(str::trim)
        .filter(|uri| uri.starts_with('/'))
        .map(str::to_string)
        .collect()
}

/// Parse one release. The date comes from the heading, or failing that
/// the first date written in the body.
pub fn parse_release(page: &str, name: &str) -> Option<(NaiveDate, DailyRecord)> {
    // ---
    let html = Html::parse_document(page);
    let heading: String = html.select(&HEADING).next().map(|h| h.text().collect()).unwrap_or_default();
    let body: String = html
        .select(&CONTENT)
        .next()
        .map(|c| c.text().collect())
        .unwrap_or_default();
    let body = body.replace(['\u{2019}', '\u{2018}'], "'").replace('\u{a0}', " ");

    let date = [heading.as_str(), body.as_str()]
        .iter()
        .find_map(|text| DATE_IN_TEXT.captures(text))
        .and_then(|caps| parse_full_date(&caps["date"]));
    let Some(date) = date else {
        warn!("No date in {}, skipping", name);
        return None;
    };

    let mut record = DailyRecord::default();
    record.set_opt(Metric::Confirmed, first_num(&CONFIRMED, &body, "confirmed"));
    record.set_opt(Metric::Deaths, first_num(&DEATHS, &body, "deaths"));
    record.set_opt(Metric::Tested, first_num(&TESTED, &body, "tested"));
    record.set_opt(Metric::Recovered, first_num(&RECOVERED, &body, "recovered"));

    if record.is_empty() {
        debug!("No figures in {} ({})", name, date);
        return None;
    }

    debug!("{}: {:?}", date, record.metrics);
    Some((date, record))
}
