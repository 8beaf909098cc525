//! Queensland Health media releases and the daily status page.
//!
//! Releases give confirmed cases, deaths and a per-LGA table. Tests only
//! ever appear on the status page, which has no history, so every run
//! stores a snapshot under `qld/status-tracing/<as-at date>.html` and all
//! stored snapshots are parsed.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{Datelike, NaiveDate};
use lazy_static::lazy_static;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, info, warn};
use url::Url;

use super::{absolute_url, cached_fetch, FetchContext, RawDocument, SourceAdapter};
use crate::cache::cache_name;
use crate::error::PipelineError;
use crate::extract::patterns::{capture_num, compile_all, first_captures};
use crate::extract::table::clean_whitespace;
use crate::extract::{parse_date, parse_full_date, parse_num, parse_ordinal};
use crate::models::{record_mut, Breakdown, BreakdownKind, Metric, PartialSeries, Region};

const LISTING_URL: &str = "https://www.health.qld.gov.au/news-events/doh-media-releases";
const STATUS_URL: &str =
    "https://www.qld.gov.au/health/conditions/health-alerts/coronavirus-covid-19/current-status/statistics";
const STATUS_DIR: &str = "status-tracing";

const RELEASE: &str = "release";
const STATUS: &str = "status";

const METRICS: [Metric; 3] = [Metric::Confirmed, Metric::Tested, Metric::Deaths];
const BREAKDOWNS: [BreakdownKind; 1] = [BreakdownKind::Lga];

/// Release titles that mention COVID-19 but carry no statistics.
const EXCLUDED_TITLES: [&str; 11] = [
    "Safeguards in place to minimise Cairns COVID-19 risk",
    "Tests negative following Bundaberg",
    "New COVID-19 case prompts reminder for vigilance",
    "Update on Queensland COVID-19 testing regime",
    "list of",
    "warning",
    "additional",
    "Alert",
    "Ipswich",
    "strain",
    "identified",
];

lazy_static! {
    static ref CONFIRMED_PATTERNS: Vec<Regex> = compile_all(&[
        r"(?s)^.*Queensland Health has today announced ([\d\w]+) new COVID-19 cases, bringing total cases to (?P<confirmed>[\d,]+)",
        r"(?s)^.*Queensland has ([\d\w]+) new (overseas-acquired |confirmed )?cases? of novel coronavirus \(COVID-19\) to report today, bringing (the )?total cases to (?P<confirmed>[\d,]+)",
        r"(?s)^.*Queensland has ([\d\w]+) new confirmed cases of novel coronavirus \(COVID-19\) raising the state total to (?P<confirmed>[\d,]+)[\.,]",
        r"(?s)^.*Queensland has ([\d\w]+) new confirmed cases of coronavirus \(COVID-19\)(?:,[^,]+,)? raising the state total to (?P<confirmed>[\d,]+)[\.,]",
        r"(?s)^.*state total ((to)|(remains at)) (?P<confirmed>[\d,]+)[^\d,]",
        r"(?s)^.*There are (?P<confirmed>\d+) confirmed cases of novel coronavirus \(COVID-19\) in Queensland",
        r"(?s)^.*A total of (?P<confirmed>[\w-]+) people in Queensland have been confirmed with COVID-19",
        r"(?s)^.*There have now been (?P<confirmed>[\w-]+) people in Queensland(?: confirmed)? with COVID-19",
        r"(?s)^.*The Queensland Government has reported ([\d\w]+) new cases of COVID-19 in the past 24 hours - in addition to the ([\d\w]+) new cases announced yesterday - bringing the total case number to (?P<confirmed>[\d,]+)",
    ]);
    static ref DEATH_PATTERN: Regex =
        Regex::new(r"(?s)^.*Queensland Health can confirm a (?P<deaths>\w+) Queenslander has passed away")
            .expect("DEATH_PATTERN to compile");
    static ref NON_ASCII: Regex = Regex::new(r"[^\x00-\x7F]+").expect("NON_ASCII to compile");

    static ref TESTING_UPDATE: Regex =
        Regex::new(r"(?s)^.*Testing update as at (?P<date>[^<]+)").expect("TESTING_UPDATE to compile");
    static ref SAMPLES_TESTED: Regex = Regex::new(r"(?s)^.*Total samples tested: .*?(?P<samples>[\d,]+)")
        .expect("SAMPLES_TESTED to compile");
    static ref STATUS_AS_AT: Regex =
        Regex::new(r"(?sm)^.*Status as at (?P<date>\d+ \w+ \d+)$").expect("STATUS_AS_AT to compile");
    static ref FACTS_UPDATED: Regex = Regex::new(r"(?sm)^.*Last updated: .* (?P<date>\d+ \w+ \d+)$")
        .expect("FACTS_UPDATED to compile");

    static ref LISTING_ITEM: Selector = selector("div.presszebra div");
    static ref SPAN: Selector = selector("span");
    static ref LINK: Selector = selector("a");
    static ref TITLE: Selector = selector("title");
    static ref CONTENT: Selector = selector("div#content");
    static ref DATE_HEADING: Selector = selector("h2, h4");
    static ref LAST_UPDATED: Selector = selector("#last-updated");
    static ref TABLE: Selector = selector("table");
    static ref ROW: Selector = selector("tr");
    static ref CELL: Selector = selector("th, td");
    static ref TD: Selector = selector("td");
    static ref TH: Selector = selector("th");
    static ref STATUS_CONTENT: Selector = selector("div#qg-primary-content");
    static ref H2: Selector = selector("h2");
    static ref FACTS_HEADER: Selector = selector(".qh-facts-header p");
    static ref FACT_BAR: Selector = selector(".qh-fact-wrapper");
    static ref FACT_CASES: Selector = selector(".cases span");
    static ref FACT_TESTED: Selector = selector(".tested span");
    static ref FACT_LOST: Selector = selector(".lost span");
}

fn selector(css: &str) -> Selector {
    Selector::parse(css).unwrap_or_else(|e| panic!("invalid selector {css:?}: {e:?}"))
}

fn text_of(element: ElementRef<'_>) -> String {
    element.text().collect::<String>().trim().to_string()
}

#[derive(Debug, Clone, Copy, Default)]
pub struct QldAdapter;

#[async_trait]
impl SourceAdapter for QldAdapter {
    type Output = PartialSeries;

    fn region(&self) -> Region {
        Region::Qld
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

        for url in release_urls(ctx).await? {
            let name = cache_name(url.path(), ".html");
            let bytes = cached_fetch(ctx, Region::Qld, &name, &url, None).await?;
            docs.push(RawDocument::new(RELEASE, name, bytes));
        }
        info!("QLD: {} release(s)", docs.len());

        poll_status_page(ctx).await?;

        let status_dir = ctx.cache.region_dir(Region::Qld).join(STATUS_DIR);
        for path in ctx.cache.list(&status_dir).await? {
            let Some(bytes) = ctx.cache.read(&path).await? else {
                continue;
            };
            let name = path.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
            docs.push(RawDocument::new(STATUS, name, bytes));
        }

        Ok(docs)
    }

    fn extract(&self, raw: &[RawDocument]) -> Result<PartialSeries, PipelineError> {
        // ---
        let mut series = PartialSeries::new();

        for doc in raw.iter().filter(|d| d.kind == RELEASE) {
            debug!("Parsing post: {}", doc.name);
            let Some((date, values)) = parse_release(&doc.text(), &doc.name) else {
                continue;
            };
            let record = record_mut(&mut series, date);
            record.set_opt(Metric::Confirmed, values.confirmed);
            record.set_opt(Metric::Deaths, values.deaths);
            if let Some(lga) = values.lga {
                record.set_breakdown(BreakdownKind::Lga, lga);
            }
        }

        // Status snapshots are authoritative for their day.
        for doc in raw.iter().filter(|d| d.kind == STATUS) {
            debug!("Processing tracing data: {}", doc.name);
            let Some((date, values)) = parse_status(&doc.text()) else {
                warn!("No as-at date in status snapshot {}, skipping", doc.name);
                continue;
            };
            let record = record_mut(&mut series, date);
            record.set_opt(Metric::Tested, values.tested);
            record.set_opt(Metric::Confirmed, values.confirmed);
            record.set_opt(Metric::Deaths, values.deaths);
        }

        Ok(series)
    }
}

/// Walk the paginated listing until posts fall before 2020.
async fn release_urls(ctx: FetchContext<'_>) -> Result<Vec<Url>> {
    // ---
    let mut urls = Vec::new();

    for page_num in 1.. {
        let page_url = Url::parse(&format!("{LISTING_URL}?result_707098_result_page={page_num}"))
            .context("Invalid QLD listing URL")?;
        let page = ctx
            .http
            .get_text(&page_url)
            .await
            .with_context(|| format!("Failed to fetch QLD listing page {page_num}"))?;

        let posts = listing_posts(&page);
        let Some(last) = posts.last() else {
            debug!("QLD listing page {} is empty", page_num);
            break;
        };
        let last_year = last.date.map(|d| d.year());

        urls.extend(
            posts
                .iter()
                .filter(|p| p.title.contains("COVID-19") || p.title.contains("coronavirus"))
                .filter_map(|p| absolute_url(LISTING_URL, &p.href)),
        );

        if last_year.is_some_and(|year| year < 2020) {
            break;
        }
    }

    Ok(urls)
}

/// Fetch the current status page and store it under its as-at date.
async fn poll_status_page(ctx: FetchContext<'_>) -> Result<()> {
    // ---
    let url = Url::parse(STATUS_URL).context("Invalid QLD status URL")?;
    let page = ctx
        .http
        .get_text(&url)
        .await
        .context("Failed to fetch QLD status page")?;

    let date = status_date(&page).ok_or_else(|| anyhow!("Unable to find QLD status page date"))?;
    let path = ctx
        .cache
        .region_dir(Region::Qld)
        .join(STATUS_DIR)
        .join(format!("{}.html", date.format("%Y-%m-%d")));
    ctx.cache.write(&path, page.as_bytes()).await?;
    info!("QLD status page as at {} saved", date);
    Ok(())
}

/// One entry of a listing page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingPost {
    pub date: Option<NaiveDate>,
    pub title: String,
    pub href: String,
}

pub fn listing_posts(page: &str) -> Vec<ListingPost> {
    // ---
    let html = Html::parse_document(page);
    html.select(&LISTING_ITEM)
        .filter_map(|div| {
            let link = div.select(&LINK).next()?;
            Some(ListingPost {
                date: div.select(&SPAN).next().and_then(|s| parse_full_date(&text_of(s))),
                title: link.text().collect(),
                href: link.value().attr("href")?.to_string(),
            })
        })
        .collect()
}

/// Values found in one release.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReleaseValues {
    pub confirmed: Option<i64>,
    pub deaths: Option<i64>,
    /// Present whenever the release has a table, even an empty one.
    pub lga: Option<Breakdown>,
}

/// Parse a release; `None` when it is excluded, undated or unparseable.
pub fn parse_release(page: &str, name: &str) -> Option<(NaiveDate, ReleaseValues)> {
    // ---
    let html = Html::parse_document(page);

    let title = html.select(&TITLE).next().map(text_of).unwrap_or_default();
    if EXCLUDED_TITLES.iter().any(|excluded| title.contains(excluded)) {
        debug!("Excluded release {}", name);
        return None;
    }

    let Some(content) = html.select(&CONTENT).next() else {
        warn!("No content in {}, skipping", name);
        return None;
    };

    let date_text = match content.select(&DATE_HEADING).next().map(text_of) {
        Some(heading) if heading.contains("Statement from") => return None,
        Some(heading) => heading,
        None => content.select(&LAST_UPDATED).next().map(text_of).unwrap_or_default(),
    };
    let date_text = date_text.strip_prefix("Last updated: ").unwrap_or(&date_text);
    let Some(date) = parse_full_date(date_text) else {
        warn!("Invalid date {:?} in {}, skipping", date_text, name);
        return None;
    };

    let body = NON_ASCII.replace_all(&content.text().collect::<String>(), " ").to_string();

    let mut values = ReleaseValues {
        confirmed: first_captures(&CONFIRMED_PATTERNS, &body).and_then(|c| capture_num(&c, "confirmed")),
        deaths: DEATH_PATTERN
            .captures(&body)
            .and_then(|c| parse_ordinal(&c["deaths"])),
        lga: None,
    };

    if let Some(table) = content.select(&TABLE).next() {
        values.lga = Some(lga_table(table, &mut values.confirmed, &mut values.deaths));
    }

    if values.confirmed.is_none() && values.deaths.is_none() && !release_may_be_empty(date) {
        warn!("Unparseable post! {} ({})", date, name);
        return None;
    }

    debug!("{}: {:?}", date, values);
    Some((date, values))
}

/// Releases up to 2020-02-25 are too irregular to parse and come from the
/// manual table; two later releases carry no figures at all.
fn release_may_be_empty(date: NaiveDate) -> bool {
    // ---
    let cutoff = NaiveDate::from_ymd_opt(2020, 2, 25);
    let empty_days = [(2020, 3, 26), (2020, 3, 31)];
    Some(date) <= cutoff
        || empty_days
            .iter()
            .any(|&(y, m, d)| NaiveDate::from_ymd_opt(y, m, d) == Some(date))
}

/// Cases per LGA. The `Total` row fills `confirmed` and `deaths` when the
/// release text gave neither.
fn lga_table(table: ElementRef<'_>, confirmed: &mut Option<i64>, deaths: &mut Option<i64>) -> Breakdown {
    // ---
    let mut lga = Breakdown::new();
    let mut rows = table.select(&ROW);
    let header: Vec<String> = rows
        .next()
        .map(|tr| tr.select(&CELL).map(text_of).collect())
        .unwrap_or_default();

    for tr in rows {
        let cells: Vec<String> = tr.select(&CELL).map(text_of).collect();
        if cells.len() < 2 {
            continue;
        }
        let name = clean_whitespace(&cells[0]).replace('*', "");
        let count = parse_num(&cells[cells.len() - 1]);

        if name == "Total" {
            if confirmed.is_none() {
                *confirmed = count;
            }
            let deaths_column = header.len() >= 2 && header[header.len() - 2] == "Deaths";
            if deaths.is_none() && deaths_column {
                *deaths = parse_num(&cells[cells.len() - 2]);
            }
        } else if let Some(count) = count {
            lga.insert(name, count);
        } else {
            debug!("LGA {:?} without a count", name);
        }
    }

    lga
}

/// Values found in one status snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusValues {
    pub tested: Option<i64>,
    pub confirmed: Option<i64>,
    pub deaths: Option<i64>,
}

/// The as-at date of a status page.
pub fn status_date(page: &str) -> Option<NaiveDate> {
    let html = Html::parse_document(page);
    let content = html.select(&STATUS_CONTENT).next()?;
    as_at_date(content)
}

fn as_at_date(content: ElementRef<'_>) -> Option<NaiveDate> {
    // ---
    let from_heading = content
        .select(&H2)
        .next()
        .map(text_of)
        .and_then(|h2| STATUS_AS_AT.captures(&h2).map(|c| c["date"].to_string()));
    let date = from_heading.or_else(|| {
        let header = content.select(&FACTS_HEADER).next().map(text_of)?;
        FACTS_UPDATED.captures(&header).map(|c| c["date"].to_string())
    })?;
    parse_full_date(&date)
}

/// Parse a stored status snapshot.
pub fn parse_status(page: &str) -> Option<(NaiveDate, StatusValues)> {
    // ---
    let html = Html::parse_document(page);
    let content = html.select(&STATUS_CONTENT).next()?;
    let text = content.text().collect::<String>();
    let text = text.trim();
    let samples = SAMPLES_TESTED.captures(text).and_then(|c| parse_num(&c["samples"]));

    if let Some(caps) = TESTING_UPDATE.captures(content.html().trim()) {
        let date = parse_date(caps["date"].trim(), 2020)?;
        let values = StatusValues {
            tested: samples,
            ..Default::default()
        };
        return Some((date, values));
    }

    let date = as_at_date(content)?;
    let mut values = StatusValues {
        tested: content.select(&TABLE).last().and_then(samples_table_total),
        ..Default::default()
    };

    if samples.is_some() {
        values.tested = samples;
    }

    if let Some(facts) = content.select(&FACT_BAR).next() {
        let fact = |sel: &Selector| facts.select(sel).next().and_then(|s| parse_num(&text_of(s)));
        values.confirmed = fact(&FACT_CASES);
        values.tested = fact(&FACT_TESTED).or(values.tested);
        values.deaths = fact(&FACT_LOST);
    }

    Some((date, values))
}

/// The `Total` row of a table whose last header is "Samples tested".
fn samples_table_total(table: ElementRef<'_>) -> Option<i64> {
    // ---
    let header_row = table.select(&ROW).next()?;
    let last_header = header_row.select(&TH).last().map(text_of)?;
    if last_header != "Samples tested" {
        return None;
    }

    table.select(&ROW).find_map(|tr| {
        let cells: Vec<String> = tr.select(&TD).map(text_of).collect();
        match cells.as_slice() {
            [label, count, ..] if label == "Total" => parse_num(count),
            _ => None,
        }
    })
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn release(title: &str, content: &str) -> String {
        format!("<html><head><title>{title}</title></head><body><div id=\"content\">{content}</div></body></html>")
    }

    #[test]
    fn test_release_with_sentence_and_lga_table() {
        // ---
        let page = release(
            "Queensland COVID-19 update",
            "<h2>2 April 2020</h2>\
             <p>Queensland has 46 new confirmed cases of novel coronavirus (COVID-19) raising the state total to 873.</p>\
             <p>Queensland Health can confirm a fourth Queenslander has passed away.</p>\
             <table>\
               <tr><th>LGA</th><th>Deaths</th><th>Cases</th></tr>\
               <tr><td>Brisbane*</td><td>0</td><td>300</td></tr>\
               <tr><td>Gold   Coast</td><td>1</td><td>150</td></tr>\
               <tr><td>Total</td><td>9</td><td>999</td></tr>\
             </table>",
        );

        let (d, values) = parse_release(&page, "fixture").unwrap();
        assert_eq!(d, date(2020, 4, 2));
        assert_eq!(values.confirmed, Some(873));
        assert_eq!(values.deaths, Some(4));

        let lga = values.lga.unwrap();
        assert_eq!(lga.len(), 2);
        assert_eq!(lga["Brisbane"], 300);
        assert_eq!(lga["Gold Coast"], 150);
    }

    #[test]
    fn test_total_row_is_a_fallback() {
        // ---
        let page = release(
            "Queensland COVID-19 update",
            "<div id=\"last-updated\">Last updated: 10 April 2020</div>\
             <table>\
               <tr><th>LGA</th><th>Deaths</th><th>Cases</th></tr>\
               <tr><td>Cairns</td><td>0</td><td>40</td></tr>\
               <tr><td>Total</td><td>5</td><td>965</td></tr>\
             </table>",
        );

        let (d, values) = parse_release(&page, "fixture").unwrap();
        assert_eq!(d, date(2020, 4, 10));
        assert_eq!(values.confirmed, Some(965));
        assert_eq!(values.deaths, Some(5));
    }

    #[test]
    fn test_excluded_and_unparseable_releases() {
        // ---
        let alert = release("Public health Alert for COVID-19", "<h2>3 April 2020</h2><p>state total to 900.</p>");
        assert_eq!(parse_release(&alert, "fixture"), None);

        let statement = release("COVID-19", "<h2>Statement from the Chief Health Officer</h2>");
        assert_eq!(parse_release(&statement, "fixture"), None);

        let empty = release("COVID-19 update", "<h2>3 April 2020</h2><p>Stay home.</p>");
        assert_eq!(parse_release(&empty, "fixture"), None);

        let excused = release("COVID-19 update", "<h2>26 March 2020</h2><p>Stay home.</p>");
        assert_eq!(
            parse_release(&excused, "fixture"),
            Some((date(2020, 3, 26), ReleaseValues::default()))
        );
    }

    #[test]
    fn test_word_counts_in_early_releases() {
        // ---
        let page = release(
            "Queensland coronavirus update",
            "<h2>5 March 2020</h2><p>A total of eleven people in Queensland have been confirmed with COVID-19.</p>",
        );
        let (_, values) = parse_release(&page, "fixture").unwrap();
        assert_eq!(values.confirmed, Some(11));
    }

    #[test]
    fn test_status_snapshot_with_fact_bar() {
        // ---
        let page = r#"<div id="qg-primary-content">
              <h2>Status as at 12 May 2020</h2>
              <div class="qh-fact-wrapper">
                <div class="cases"><span>1,045</span></div>
                <div class="tested"><span>138,515</span></div>
                <div class="lost"><span>6</span></div>
              </div>
            </div>"#;

        let (d, values) = parse_status(page).unwrap();
        assert_eq!(d, date(2020, 5, 12));
        assert_eq!(
            values,
            StatusValues {
                tested: Some(138_515),
                confirmed: Some(1045),
                deaths: Some(6),
            }
        );
        assert_eq!(status_date(page), Some(date(2020, 5, 12)));
    }

    #[test]
    fn test_status_snapshot_samples_table_and_testing_update() {
        // ---
        let table_page = r#"<div id="qg-primary-content">
              <div class="qh-facts-header"><p>Last updated: 9am 20 April 2020</p></div>
              <table>
                <tr><th>HHS</th><th>Samples tested</th></tr>
                <tr><td>Metro North</td><td>20,000</td></tr>
                <tr><td>Total</td><td>79,000</td></tr>
              </table>
            </div>"#;
        let (d, values) = parse_status(table_page).unwrap();
        assert_eq!(d, date(2020, 4, 20));
        assert_eq!(values.tested, Some(79_000));

        let update_page = r#"<div id="qg-primary-content">
              <p>Testing update as at 18 March</p>
              <p>Total samples tested: approximately 24,000</p>
            </div>"#;
        let (d, values) = parse_status(update_page).unwrap();
        assert_eq!(d, date(2020, 3, 18));
        assert_eq!(values.tested, Some(24_000));
    }

    #[test]
    fn test_status_overrides_release_values() {
        // ---
        let release_page = release(
            "COVID-19 update",
            "<h2>12 May 2020</h2><p>state total remains at 1,044.</p>",
        );
        let status_page = r#"<div id="qg-primary-content"><h2>Status as at 12 May 2020</h2>
            <div class="qh-fact-wrapper"><div class="cases"><span>1,045</span></div>
            <div class="tested"><span>138,515</span></div></div></div>"#;

        let raw = vec![
            RawDocument::new(STATUS, "2020-05-12.html", status_page.as_bytes().to_vec()),
            RawDocument::new(RELEASE, "release.html", release_page.into_bytes()),
        ];
        let series = QldAdapter.extract(&raw).unwrap();
        let record = &series[&date(2020, 5, 12)];
        assert_eq!(record.get(Metric::Confirmed), Some(1045));
        assert_eq!(record.get(Metric::Tested), Some(138_515));
        assert_eq!(record.get(Metric::Deaths), None);
    }

    #[test]
    fn test_listing_posts() {
        // ---
        let page = r#"<div class="presszebra">
              <div><span>2 April 2020</span><a href="/news-events/doh-media-releases/releases/a">COVID-19 update</a></div>
              <div><span>1 April 2020</span><a href="/news-events/doh-media-releases/releases/b">Flu shots</a></div>
            </div>"#;

        let posts = listing_posts(page);
        assert_eq!(posts.len(), 2);
        assert_eq!(posts[0].date, Some(date(2020, 4, 2)));
        assert_eq!(posts[0].title, "COVID-19 update");
        assert_eq!(posts[1].href, "/news-events/doh-media-releases/releases/b");
        assert_eq!(
            cache_name("/news-events/doh-media-releases/releases/a", ".html"),
            "_news-events_doh-media-releases_releases_a.html"
        );
    }
}
