//! NSW Health media releases.
//!
//! The yearly news index pages list every release; statistics releases are
//! the ones mentioning COVID-19 (or coronavirus) and "stat". Each release
//! carries its counts in `table.moh-rteTable-6` tables whose first header
//! cell says what they are (see [`TableRole`]), plus one sentence about
//! hospital, ICU and ventilator numbers in the body text.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use lazy_static::lazy_static;
use regex::Regex;
use scraper::{Html, Selector};
use tracing::{debug, info, warn};
use url::Url;

use super::{absolute_url, cached_fetch, FetchContext, RawDocument, SourceAdapter};
use crate::cache::cache_name;
use crate::error::PipelineError;
use crate::extract::table::clean_whitespace;
use crate::extract::{parse_full_date, Cell, ParsedTable, TableRole};
use crate::models::{Breakdown, BreakdownKind, DailyRecord, Metric, PartialSeries, Region};

const LISTING_URLS: [&str; 3] = [
    "https://www.health.nsw.gov.au/news/Pages/2020-nsw-health.aspx",
    "https://www.health.nsw.gov.au/news/Pages/2021-nsw-health.aspx",
    "https://www.health.nsw.gov.au/news/Pages/2022-nsw-health.aspx",
];

const RELEASE: &str = "release";

const METRICS: [Metric; 7] = [
    Metric::Confirmed,
    Metric::Deaths,
    Metric::Tested,
    Metric::Recovered,
    Metric::CurrentHospitalized,
    Metric::CurrentIcu,
    Metric::CurrentVentilators,
];

const BREAKDOWNS: [BreakdownKind; 2] = [BreakdownKind::AgeGroups, BreakdownKind::Sources];

/// Labels the source table is normalised to.
pub const OVERSEAS: &str = "Overseas acquired";
pub const INTERSTATE: &str = "Interstate acquired";
pub const LOCAL_CONTACT: &str = "Locally acquired - contact of a confirmed case";
pub const LOCAL_UNKNOWN: &str = "Locally acquired - contact not identified";
pub const UNDER_INVESTIGATION: &str = "Under investigation";

const TESTED_TOTAL_LABELS: [&str; 3] = ["Total", "Total persons tested", "Total tests carried out"];

lazy_static! {
    static ref LISTING_ITEM: Selector =
        Selector::parse("div#ContentHtml1Zone2 li li").expect("listing selector to parse");
    static ref LINK: Selector = Selector::parse("a").expect("a selector to parse");
    static ref NEWS_DATE: Selector = Selector::parse("div.newsdate").expect("newsdate selector to parse");
    static ref STATS_TABLE: Selector =
        Selector::parse("table.moh-rteTable-6").expect("table selector to parse");
    static ref MAIN_CONTENT: Selector =
        Selector::parse("div.maincontent").expect("maincontent selector to parse");
    static ref HOSPITAL_SENTENCE: Regex = Regex::new(
        r"(?s)^.*There are(?: currently)? (?P<hospitalized>\d+) COVID-19 cases being treated in NSW.* (?P<icu>\d+) cases in our Intensive Care Units and, of those, (?P<ventilators>\d+) require ventilators at this stage"
    )
    .expect("HOSPITAL_SENTENCE to compile");
    static ref SOURCE_LABEL_NOISE: Regex =
        Regex::new(r"[^a-zA-Z0-9\-/\s]").expect("SOURCE_LABEL_NOISE to compile");
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NswAdapter;

#[async_trait]
impl SourceAdapter for NswAdapter {
    type Output = PartialSeries;

    fn region(&self) -> Region {
        Region::Nsw
    }

    fn metrics(&self) -> &'static [Metric] {
        &METRICS
    }

    fn breakdowns(&self) -> &'static [BreakdownKind] {
        &BREAKDOWNS
    }

    async fn fetch(&self, ctx: FetchContext<'_>) -> Result<Vec<RawDocument>> {
        // ---
        let mut docs = Vec::new();

        for listing in LISTING_URLS {
            let listing_url = Url::parse(listing).context("Invalid NSW listing URL")?;
            let page = ctx
                .http
                .get_text(&listing_url)
                .await
                .with_context(|| format!("Failed to fetch NSW listing {listing}"))?;

            for (uri, url) in release_links(&page, listing) {
                let name = cache_name(&uri, ".html");
                let bytes = cached_fetch(ctx, Region::Nsw, &name, &url, None).await?;
                docs.push(RawDocument::new(RELEASE, name, bytes));
            }
        }

        info!("NSW: {} statistics release(s)", docs.len());
        Ok(docs)
    }

    fn extract(&self, raw: &[RawDocument]) -> Result<PartialSeries, PipelineError> {
        // ---
        let mut series = PartialSeries::new();

        for doc in raw.iter().filter(|d| d.kind == RELEASE) {
            debug!("Processing: {}", doc.name);
            let Some((date, record)) = parse_release(&doc.text(), &doc.name)? else {
                continue;
            };
            // Listings are newest first: keep the first release of a day.
            series.entry(date).or_insert(record);
        }

        Ok(series)
    }
}

/// Statistics release links on a listing page as `(uri, url)` pairs.
pub fn release_links(page: &str, listing_url: &str) -> Vec<(String, Url)> {
    // ---
    let html = Html::parse_document(page);
    html.select(&LISTING_ITEM)
        .filter(|li| {
            let text: String = li.text().collect();
            (text.contains("COVID-19") || text.contains("coronavirus")) && text.contains("stat")
        })
        .filter_map(|li| li.select(&LINK).next()?.value().attr("href").map(str::to_string))
        .filter_map(|href| absolute_url(listing_url, &href))
        .map(|url| (url.path().trim_start_matches('/').to_string(), url))
        .collect()
}

/// Parse one release into its date and record.
///
/// `Ok(None)` means the page is not a usable release (no date); an
/// unrecognised infection source category is an error.
pub fn parse_release(
    page: &str,
    name: &str,
) -> Result<Option<(NaiveDate, DailyRecord)>, PipelineError> {
    // ---
    let html = Html::parse_document(page);

    let date_text: Option<String> = html.select(&NEWS_DATE).next().map(|d| d.text().collect());
    let Some(date) = date_text.as_deref().and_then(|t| parse_full_date(t.trim())) else {
        warn!("No release date in {}, skipping", name);
        return Ok(None);
    };

    let mut record = DailyRecord::default();

    for element in html.select(&STATS_TABLE) {
        let mut table = ParsedTable::parse(element);
        let Some(first) = table.first_header() else {
            warn!("Invalid table in {}", name);
            continue;
        };

        if first.contains("Confirmed cases") {
            table.fold_header_into_body();
        }
        let first = table.first_header().unwrap_or_default().to_string();

        match TableRole::classify(&first) {
            TableRole::Overall => match overall_counts(&table) {
                Some(counts) => counts.apply(&mut record),
                None => warn!("Overall table without confirmed row in {}", name),
            },
            TableRole::AgeGroup => record.set_breakdown(BreakdownKind::AgeGroups, age_groups(&table)),
            TableRole::Source => record.set_breakdown(BreakdownKind::Sources, sources(&table)?),
            TableRole::Outcome => {
                let (confirmed, recovered) = outcome_counts(&table);
                if !record.has(Metric::Confirmed) {
                    record.set_opt(Metric::Confirmed, confirmed);
                }
                if !record.has(Metric::Recovered) {
                    record.set_opt(Metric::Recovered, recovered);
                }
            }
            TableRole::Ignored => {}
            TableRole::Unknown => warn!("Unknown table in {}: {:?}", name, table.headers),
        }
    }

    let body: Option<String> = html.select(&MAIN_CONTENT).next().map(|b| b.text().collect());
    if let Some(caps) = body.as_deref().and_then(|b| HOSPITAL_SENTENCE.captures(b)) {
        let num = |group: &str| caps[group].parse::<i64>().ok();
        record.set_opt(Metric::CurrentHospitalized, num("hospitalized"));
        record.set_opt(Metric::CurrentIcu, num("icu"));
        record.set_opt(Metric::CurrentVentilators, num("ventilators"));
    }

    debug!("{}: {:?}", date, record.metrics);
    Ok(Some((date, record)))
}

/// Values of the overall case table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct OverallCounts {
    confirmed: i64,
    tested: i64,
    deaths: Option<i64>,
    recovered: Option<i64>,
}

impl OverallCounts {
    fn apply(self, record: &mut DailyRecord) {
        record.set(Metric::Confirmed, self.confirmed);
        record.set(Metric::Tested, self.tested);
        record.set_opt(Metric::Deaths, self.deaths);
        record.set_opt(Metric::Recovered, self.recovered);
    }
}

/// Tested excludes tests still under investigation.
fn overall_counts(table: &ParsedTable) -> Option<OverallCounts> {
    // ---
    let confirmed = table.value_where(|l| l.to_lowercase().contains("confirmed"))?;
    let deaths = table.value_where(|l| {
        let lower = l.to_lowercase();
        lower.contains("deaths") || lower.contains("died")
    });
    let recovered = table.value_where(|l| l.to_lowercase().contains("recovered"));
    let in_progress = table.value_where(|l| l.contains("investigation")).unwrap_or(0);

    let total = table
        .value_where(|l| TESTED_TOTAL_LABELS.contains(&l))
        .unwrap_or_else(|| {
            table
                .rows
                .iter()
                .filter_map(|row| row.get(1).and_then(Cell::as_int))
                .sum()
        });

    Some(OverallCounts {
        confirmed,
        tested: total - in_progress,
        deaths,
        recovered,
    })
}

fn outcome_counts(table: &ParsedTable) -> (Option<i64>, Option<i64>) {
    let confirmed = table.value_where(|l| l.eq_ignore_ascii_case("total"));
    let recovered = table.value_where(|l| l.eq_ignore_ascii_case("recovered"));
    (confirmed, recovered)
}

/// `20-30` style labels are rewritten as `20-29`.
fn age_groups(table: &ParsedTable) -> Breakdown {
    // ---
    let mut groups = Breakdown::new();
    for row in &table.rows {
        let Some(label) = row.first().map(Cell::to_string) else {
            continue;
        };
        if label == "Total" {
            continue;
        }
        let Some(count) = row.last().and_then(Cell::as_int) else {
            debug!("Age group {:?} without a count", label);
            continue;
        };
        groups.insert(normalise_age_label(&label), count);
    }
    groups
}

fn normalise_age_label(label: &str) -> String {
    // ---
    if !label.ends_with('0') {
        return label.to_string();
    }
    match label.split('-').next().and_then(|s| s.trim().parse::<i64>().ok()) {
        Some(base) => format!("{}-{}", base, base + 9),
        None => label.to_string(),
    }
}

/// The source table always yields all five categories; the last row is
/// the total and is ignored.
fn sources(table: &ParsedTable) -> Result<Breakdown, PipelineError> {
    // ---
    let mut sources: Breakdown = [OVERSEAS, INTERSTATE, LOCAL_CONTACT, LOCAL_UNKNOWN, UNDER_INVESTIGATION]
        .into_iter()
        .map(|k| (k.to_string(), 0))
        .collect();

    let body = &table.rows[..table.rows.len().saturating_sub(1)];
    for row in body {
        let raw = row.first().map(Cell::to_string).unwrap_or_default();
        let label = clean_whitespace(&SOURCE_LABEL_NOISE.replace_all(&raw, ""));
        let category = source_category(&label).ok_or_else(|| PipelineError::UnknownCategory {
            table: "source",
            label: label.clone(),
        })?;
        let count = row.last().and_then(Cell::as_int).unwrap_or(0);
        sources.insert(category.to_string(), count);
    }

    Ok(sources)
}

fn source_category(label: &str) -> Option<&'static str> {
    // ---
    if label.contains("Overseas") {
        Some(OVERSEAS)
    } else if label.contains("contact of a confirmed case")
        || label.contains("contact of aconfirmed case")
        || label.contains("Epi link")
        || label.contains("Locally acquired linked")
    {
        Some(LOCAL_CONTACT)
    } else if label.contains("not identified")
        || label.contains("Unknown")
        || label.contains("Locally acquired no links")
        || label == "Locally acquired"
    {
        Some(LOCAL_UNKNOWN)
    } else if label.contains("investigation") {
        Some(UNDER_INVESTIGATION)
    } else if label.contains("Interstate") {
        Some(INTERSTATE)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    const RELEASE_PAGE: &str = r#"
        <html><body>
        <div class="newsdate">1 April 2020</div>
        <div class="maincontent">
          <p>There are currently 204 COVID-19 cases being treated in NSW.
             Of those, 25 cases in our Intensive Care Units and, of those, 15 require ventilators at this stage.</p>
          <table class="moh-rteTable-6">
            <tr><th>Cases</th><th>Count</th></tr>
            <tr><td>Confirmed cases (including interstate)</td><td>2,182</td></tr>
            <tr><td>Cases tested and excluded</td><td>115,893</td></tr>
            <tr><td>Cases under investigation</td><td>300</td></tr>
            <tr><td>Deaths (in NSW from confirmed cases)</td><td>8</td></tr>
          </table>
          <table class="moh-rteTable-6">
            <tr><th>Age Group</th><th>Female</th><th>Total</th></tr>
            <tr><td>20-30</td><td>100</td><td>210</td></tr>
            <tr><td>30-39</td><td>90</td><td>180</td></tr>
            <tr><td>Total</td><td>190</td><td>390</td></tr>
          </table>
          <table class="moh-rteTable-6">
            <tr><th>Likely source of infection</th><th>Cases</th></tr>
            <tr><td>Overseas acquired</td><td>1,230</td></tr>
            <tr><td>Locally acquired &ndash; contact of a confirmed case and/or in a known cluster</td><td>500</td></tr>
            <tr><td>Locally acquired &ndash; contact not identified</td><td>200</td></tr>
            <tr><td>Under investigation</td><td>252</td></tr>
            <tr><td>Total</td><td>2,182</td></tr>
          </table>
          <table class="moh-rteTable-6">
            <tr><th>Suburb</th><th>Cases</th></tr>
            <tr><td>Bondi</td><td>12</td></tr>
          </table>
        </div>
        </body></html>"#;

    #[test]
    fn test_parse_release() {
        // ---
        let (date, record) = parse_release(RELEASE_PAGE, "fixture").unwrap().unwrap();
        assert_eq!(date, NaiveDate::from_ymd_opt(2020, 4, 1).unwrap());

        assert_eq!(record.get(Metric::Confirmed), Some(2182));
        assert_eq!(record.get(Metric::Deaths), Some(8));
        // Sum of every row minus the 300 under investigation.
        assert_eq!(record.get(Metric::Tested), Some(2182 + 115_893 + 300 + 8 - 300));
        assert_eq!(record.get(Metric::Recovered), None);
        assert_eq!(record.get(Metric::CurrentHospitalized), Some(204));
        assert_eq!(record.get(Metric::CurrentIcu), Some(25));
        assert_eq!(record.get(Metric::CurrentVentilators), Some(15));

        let ages = record.breakdown(BreakdownKind::AgeGroups).unwrap();
        assert_eq!(ages.get("20-29"), Some(&210));
        assert_eq!(ages.get("30-39"), Some(&180));
        assert!(!ages.contains_key("Total"));

        let sources = record.breakdown(BreakdownKind::Sources).unwrap();
        assert_eq!(sources[OVERSEAS], 1230);
        assert_eq!(sources[LOCAL_CONTACT], 500);
        assert_eq!(sources[LOCAL_UNKNOWN], 200);
        assert_eq!(sources[UNDER_INVESTIGATION], 252);
        assert_eq!(sources[INTERSTATE], 0);
    }

    #[test]
    fn test_explicit_total_row_and_outcome_table() {
        // ---
        let page = r#"<div class="newsdate">20 May 2020</div>
            <table class="moh-rteTable-6">
              <tr><th>Confirmed cases</th><th>3,074</th></tr>
              <tr><td>Tested and excluded</td><td>10</td></tr>
              <tr><td>Total</td><td>400,000</td></tr>
            </table>
            <table class="moh-rteTable-6">
              <tr><th>Outcome</th><th>Cases</th></tr>
              <tr><td>Recovered</td><td>2,600</td></tr>
              <tr><td>Total</td><td>9,999</td></tr>
            </table>"#;

        let (_, record) = parse_release(page, "fixture").unwrap().unwrap();
        assert_eq!(record.get(Metric::Confirmed), Some(3074));
        assert_eq!(record.get(Metric::Tested), Some(400_000));
        assert_eq!(record.get(Metric::Recovered), Some(2600));
    }

    #[test]
    fn test_unknown_source_category_is_an_error() {
        // ---
        let page = r#"<div class="newsdate">2 April 2020</div>
            <table class="moh-rteTable-6">
              <tr><th>Source</th><th>Cases</th></tr>
              <tr><td>Cruise ship</td><td>5</td></tr>
              <tr><td>Total</td><td>5</td></tr>
            </table>"#;

        let err = parse_release(page, "fixture").unwrap_err();
        assert!(matches!(err, PipelineError::UnknownCategory { label, .. } if label == "Cruise ship"));
    }

    #[test]
    fn test_release_without_date_is_skipped() {
        // ---
        assert_eq!(parse_release("<p>nothing</p>", "fixture").unwrap(), None);
    }

    #[test]
    fn test_first_release_of_a_day_wins() {
        // ---
        let newer = RELEASE_PAGE.replace("interstate)</td><td>2,182", "interstate)</td><td>2,200");
        let raw = vec![
            RawDocument::new(RELEASE, "newer", newer.into_bytes()),
            RawDocument::new(RELEASE, "older", RELEASE_PAGE.as_bytes().to_vec()),
        ];

        let series = NswAdapter.extract(&raw).unwrap();
        assert_eq!(series.len(), 1);
        assert_eq!(series.values().next().unwrap().get(Metric::Confirmed), Some(2200));
    }

    #[test]
    fn test_release_links_filter_and_resolve() {
        // ---
        let page = r#"<div id="ContentHtml1Zone2"><ul><li><ul>
              <li><a href="20200401_00.aspx">COVID-19 statistics</a></li>
              <li><a href="20200401_01.aspx">Flu season</a></li>
              <li><a href="/news/Pages/20200402_00.aspx">Novel coronavirus (COVID-19) update statistics</a></li>
            </ul></li></ul></div>"#;

        let links = release_links(page, LISTING_URLS[0]);
        let uris: Vec<_> = links.iter().map(|(uri, _)| uri.as_str()).collect();
        assert_eq!(uris, vec!["news/Pages/20200401_00.aspx", "news/Pages/20200402_00.aspx"]);
        assert_eq!(
            links[0].1.as_str(),
            "https://www.health.nsw.gov.au/news/Pages/20200401_00.aspx"
        );
    }

    #[test]
    fn test_age_label_normalisation() {
        // ---
        assert_eq!(normalise_age_label("20-30"), "20-29");
        assert_eq!(normalise_age_label("0-9"), "0-9");
        assert_eq!(normalise_age_label("70+"), "70+");
    }
}
