//! Victoria: the BI case linelist plus two generations of media releases.
//!
//! The linelist gives daily confirmed cases with age groups and sources.
//! Tests, deaths, recoveries and hospital figures only appear in releases,
//! which also replace the linelist's confirmed count on their day.

pub mod powerbi;
pub mod releases;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{Duration, NaiveDate, Utc};
use tracing::{debug, info, warn};
use url::Url;

use self::releases::{ReleaseFigures, EXTRA_MEDIA_URIS, HISTORICAL_LISTING_URL, MEDIA_HUB_BASE};
use super::{cached_fetch, FetchContext, RawDocument, SourceAdapter};
use crate::cache::cache_name;
use crate::error::PipelineError;
use crate::models::{record_mut, BreakdownKind, Metric, PartialSeries, Region};

const MEDIA_HUB_URL: &str = "https://www.dhhs.vic.gov.au/media-hub-coronavirus-disease-covid-19";
const EXPORT_CACHE_NAME: &str = "powerbi.json";
const HISTORICAL_DIR: &str = "historical";

const EXPORT: &str = "powerbi";
const MEDIA: &str = "media";
const HISTORICAL: &str = "historical";

const METRICS: [Metric; 6] = [
    Metric::Tested,
    Metric::Confirmed,
    Metric::CurrentIcu,
    Metric::CurrentHospitalized,
    Metric::Deaths,
    Metric::Recovered,
];

const BREAKDOWNS: [BreakdownKind; 2] = [BreakdownKind::AgeGroups, BreakdownKind::Sources];

/// Days a media hub release may omit the tested count.
const UNTESTED_DAYS: [(i32, u32, u32); 3] = [(2020, 6, 6), (2020, 6, 7), (2020, 8, 2)];

#[derive(Debug, Clone, Copy, Default)]
pub struct VicAdapter;

#[async_trait]
impl SourceAdapter for VicAdapter {
    type Output = PartialSeries;

    fn region(&self) -> Region {
        Region::Vic
    }

    fn metrics(&self) -> &'static [Metric] {
        &METRICS
    }

    fn breakdowns(&self) -> &'static [BreakdownKind] {
        &BREAKDOWNS
    }

    async fn fetch(&self, ctx: FetchContext<'_>) -> Result<Vec<RawDocument>> {
        // ---
        let mut docs = vec![RawDocument::new(EXPORT, EXPORT_CACHE_NAME, fetch_export(ctx).await?)];

        let hub_url = Url::parse(MEDIA_HUB_URL).context("Invalid VIC media hub URL")?;
        let hub = ctx
            .http
            .get_text(&hub_url)
            .await
            .context("Failed to fetch VIC media hub")?;

        let mut uris = releases::media_hub_uris(&hub);
        uris.extend(EXTRA_MEDIA_URIS.iter().map(|uri| uri.to_string()));
        for uri in uris {
            let url = Url::parse(&format!("{MEDIA_HUB_BASE}{uri}"))
                .with_context(|| format!("Invalid VIC release URI {uri}"))?;
            let name = cache_name(&uri, ".html");
            let bytes = cached_fetch(ctx, Region::Vic, &name, &url, None).await?;
            docs.push(RawDocument::new(MEDIA, name, bytes));
        }

        let listing_url = Url::parse(HISTORICAL_LISTING_URL).context("Invalid VIC listing URL")?;
        let listing = ctx
            .http
            .get_text(&listing_url)
            .await
            .context("Failed to fetch VIC historical releases")?;
        for url in releases::historical_links(&listing) {
            let name = format!("{HISTORICAL_DIR}/{}", cache_name(url.path(), ".html"));
            cached_fetch(ctx, Region::Vic, &name, &url, None).await?;
        }

        // Every release ever cached, including ones no longer listed.
        let historical_dir = ctx.cache.region_dir(Region::Vic).join(HISTORICAL_DIR);
        for path in ctx.cache.list(&historical_dir).await? {
            let Some(bytes) = ctx.cache.read(&path).await? else {
                continue;
            };
            let name = path.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
            docs.push(RawDocument::new(HISTORICAL, name, bytes));
        }

        info!("VIC: {} document(s)", docs.len());
        Ok(docs)
    }

    fn extract(&self, raw: &[RawDocument]) -> Result<PartialSeries, PipelineError> {
        // ---
        let mut series = PartialSeries::new();

        for doc in raw.iter().filter(|d| d.kind == EXPORT) {
            let export: serde_json::Value = serde_json::from_slice(&doc.bytes)
                .map_err(|e| PipelineError::MalformedExport(format!("{}: {}", doc.name, e)))?;
            let cases = powerbi::decode(&export)?;
            debug!("Decoded {} linelist case(s)", cases.len());
            series = powerbi::cumulative_cases(&cases);
        }

        for doc in raw.iter().filter(|d| d.kind == MEDIA) {
            info!("Processing: {}", doc.name);
            let Some((date, figures)) = releases::parse_media_release(&doc.text(), &doc.name) else {
                continue;
            };
            apply_media_release(&mut series, date, &figures, &doc.name);
        }

        for doc in raw.iter().filter(|d| d.kind == HISTORICAL) {
            debug!("Processing historical release: {}", doc.name);
            let Some((date, figures)) = releases::parse_historical_release(&doc.text(), &doc.name)? else {
                continue;
            };
            apply_figures(&mut series, date, &figures);
        }

        Ok(series)
    }
}

/// The BI export, falling back to the cached copy when the endpoint
/// answers with an empty body (rate limiting).
async fn fetch_export(ctx: FetchContext<'_>) -> Result<Vec<u8>> {
    // ---
    let path = ctx.cache.path(Region::Vic, EXPORT_CACHE_NAME);
    let http = ctx.http;

    if ctx.config.cache_powerbi {
        return ctx
            .cache
            .get_or_fetch(&path, None, move || async move {
                powerbi::request_export(http).await.map(String::into_bytes)
            })
            .await;
    }

    let body = powerbi::request_export(http)
        .await
        .context("Failed to query the VIC BI export")?;

    if powerbi::is_empty_export(&body) {
        warn!("Empty BI response received, falling back to cache");
        return ctx
            .cache
            .read(&path)
            .await?
            .ok_or_else(|| anyhow!("No cached BI export at {}", path.display()));
    }

    let day = (Utc::now() + Duration::hours(10)).format("%Y-%m-%d");
    let snapshot = ctx
        .cache
        .path(Region::Vic, &format!("{day}_powerbi.snapshot.json"));
    ctx.cache.write(&snapshot, body.as_bytes()).await?;
    ctx.cache.write(&path, body.as_bytes()).await?;

    Ok(body.into_bytes())
}

/// A media hub release must state confirmed and tested counts; the
/// 2020-04-15 release also stands in for the missing 2020-04-16 one.
fn apply_media_release(series: &mut PartialSeries, date: NaiveDate, figures: &ReleaseFigures, name: &str) {
    // ---
    let mut dates = vec![date];
    if NaiveDate::from_ymd_opt(2020, 4, 15) == Some(date) {
        dates.extend(NaiveDate::from_ymd_opt(2020, 4, 16));
    }

    for date in dates {
        debug!("{}: {:?}", date, figures);
        let untested_day = UNTESTED_DAYS
            .iter()
            .any(|&(y, m, d)| NaiveDate::from_ymd_opt(y, m, d) == Some(date));

        if figures.confirmed.is_none() || (figures.tested.is_none() && !untested_day) {
            warn!("Trouble parsing {} ({:?})", name, figures);
            return;
        }
        apply_figures(series, date, figures);
    }
}

/// Release counts replace whatever the linelist gave for the day.
fn apply_figures(series: &mut PartialSeries, date: NaiveDate, figures: &ReleaseFigures) {
    // ---
    let record = record_mut(series, date);
    record.set_opt(Metric::Tested, figures.tested);
    record.set_opt(Metric::Confirmed, figures.confirmed);
    record.set_opt(Metric::Deaths, figures.deaths);
    record.set_opt(Metric::Recovered, figures.recovered);
    record.set_opt(Metric::CurrentHospitalized, figures.hospitalized);
    record.set_opt(Metric::CurrentIcu, figures.icu);
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use serde_json::json;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn export_bytes() -> Vec<u8> {
        let schema: Vec<_> = (0..12)
            .map(|i| if i == 0 { json!({"DN": "D0"}) } else { json!({}) })
            .collect();
        json!({"results": [{"result": {"data": {"dsr": {"DS": [{
            "ValueDicts": {"D0": ["30-34"]},
            "PH": [{"DM0": [
                {"S": schema, "C": [0, "M", 1, "", "Travel overseas", "", 1586908800000_i64, 1, 1, 1, 1, ""]},
                {"R": 4031, "C": [1587081600000_i64]}
            ]}]
        }]}}}}]})
        .to_string()
        .into_bytes()
    }

    fn media_release(day: &str, body: &str) -> Vec<u8> {
        format!(
            r#"<div class="layout__region"><div class="first-line">Media release
{day}</div><div class="page-content">{body}</div></div>"#
        )
        .into_bytes()
    }

    #[test]
    fn test_releases_override_linelist_counts() {
        // ---
        let raw = vec![
            RawDocument::new(EXPORT, EXPORT_CACHE_NAME, export_bytes()),
            RawDocument::new(
                MEDIA,
                "_coronavirus-update-15-april.html",
                media_release(
                    "Wednesday 15 April",
                    "The total number of cases in Victoria is 1,291. More than 71,000 tests have been conducted. \
                     Victoria has recorded 14 deaths related to coronavirus.",
                ),
            ),
        ];

        let series = VicAdapter.extract(&raw).unwrap();

        let first = &series[&date(2020, 4, 15)];
        assert_eq!(first.get(Metric::Confirmed), Some(1291));
        assert_eq!(first.get(Metric::Tested), Some(71_000));
        assert_eq!(first.get(Metric::Deaths), Some(14));
        assert_eq!(first.breakdown(BreakdownKind::AgeGroups).unwrap()["30-39"], 1);

        // The 15 April release also covers the 16th.
        assert_eq!(series[&date(2020, 4, 16)].get(Metric::Confirmed), Some(1291));

        // Untouched linelist day.
        assert_eq!(series[&date(2020, 4, 17)].get(Metric::Confirmed), Some(2));
    }

    #[test]
    fn test_release_without_tested_count_is_skipped() {
        // ---
        let raw = vec![
            RawDocument::new(MEDIA, "a.html", media_release("Friday 5 June", "The total number of cases in Victoria is 1,681.")),
            RawDocument::new(MEDIA, "b.html", media_release("Saturday 6 June", "The total number of cases in Victoria is 1,687.")),
        ];

        let series = VicAdapter.extract(&raw).unwrap();
        assert!(!series.contains_key(&date(2020, 6, 5)));
        assert_eq!(series[&date(2020, 6, 6)].get(Metric::Confirmed), Some(1687));
        assert_eq!(series[&date(2020, 6, 6)].get(Metric::Tested), None);
    }

    #[test]
    fn test_unparseable_historical_release_aborts() {
        // ---
        let page = r#"<div class="page-date">25 Mar 2020</div><div id="main">Stay home.</div>"#;
        let raw = vec![RawDocument::new(HISTORICAL, "_x.html", page.as_bytes().to_vec())];
        assert!(matches!(
            VicAdapter.extract(&raw),
            Err(PipelineError::UnparseableRelease { .. })
        ));
    }

    #[test]
    fn test_malformed_export_is_an_error() {
        // ---
        let raw = vec![RawDocument::new(EXPORT, EXPORT_CACHE_NAME, b"not json".to_vec())];
        assert!(matches!(VicAdapter.extract(&raw), Err(PipelineError::MalformedExport(_))));
    }
}
