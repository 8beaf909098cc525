//! The national "at a glance" infographic.
//!
//! One PDF a day, found through a pointer page per date. The infographic
//! has no tables: every figure is a free-floating text box, so each box is
//! assigned to a panel by where it sits on the page ([`classify`]). Values
//! within a panel are ordered left to right and zipped against
//! [`State::ALL`].
//!
//! Coordinates below are on the reference landscape A4 page
//! (`REFERENCE_WIDTH` x `REFERENCE_HEIGHT`), origin bottom left.

use std::collections::BTreeMap;
use std::fmt;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{Duration, NaiveDate, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use scraper::{Html, Selector};
use tracing::{debug, info, warn};
use url::Url;

use super::{absolute_url, cached_fetch, FetchContext, RawDocument, SourceAdapter};
use crate::cache::is_not_found;
use crate::error::PipelineError;
use crate::extract::{extract_text_boxes, parse_full_date, parse_num, parse_perc, TextBox};
use crate::models::{DailyRecord, Metric, PartialSeries, Region, State};

const POINTER_URL_PREFIX: &str =
    "https://www.health.gov.au/resources/publications/coronavirus-covid-19-at-a-glance-";

/// Served with a 200 status when a pointer page does not exist yet.
const PRETEND_404_MARKER: &str = "We have publications on different health topics for you to access";

const PDF: &str = "pdf";

const FILE_PREFIX: &str = "coronavirus-covid-19-at-a-glance";
const INFOGRAPHIC_FILE: &str = "coronavirus-covid-19-at-a-glance-coronavirus-covid-19-at-a-glance-infographic";

lazy_static! {
    static ref MAP_LABEL: Regex =
        Regex::new(r"^(?P<total>[\d,]+)(?:\s*\((?P<deaths>\d+)\))?$").expect("MAP_LABEL to compile");
    static ref PDF_LINK: Selector =
        Selector::parse("a.health-file__link").expect("PDF link selector to parse");
}

/// Everything one infographic says about one state.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StateSnapshot {
    pub total: Option<i64>,
    pub deaths: Option<i64>,
    pub icu: Option<i64>,
    pub hospitalized: Option<i64>,
    pub tests: Option<i64>,
    /// Share of tests that were positive, as a ratio.
    pub test_pos_perc: Option<f64>,
}

impl StateSnapshot {
    pub fn to_record(&self) -> DailyRecord {
        // ---
        let mut record = DailyRecord::default();
        record.set_opt(Metric::Confirmed, self.total);
        record.set_opt(Metric::Deaths, self.deaths);
        record.set_opt(Metric::Tested, self.tests);
        record.set_opt(Metric::CurrentHospitalized, self.hospitalized);
        record.set_opt(Metric::CurrentIcu, self.icu);
        record
    }
}

/// One infographic, keyed by state.
pub type Infographic = BTreeMap<State, StateSnapshot>;

/// Every parsed infographic, keyed by its "last updated" date.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NationalSeries {
    pub days: BTreeMap<NaiveDate, Infographic>,
}

impl NationalSeries {
    /// The values reported for `state` on each day.
    pub fn for_state(&self, state: State) -> PartialSeries {
        self.days
            .iter()
            .filter_map(|(date, infographic)| Some((*date, infographic.get(&state)?.to_record())))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.days.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NationalAdapter;

#[async_trait]
impl SourceAdapter for NationalAdapter {
    type Output = NationalSeries;

    fn region(&self) -> Region {
        Region::National
    }

    async fn fetch(&self, ctx: FetchContext<'_>) -> Result<Vec<RawDocument>> {
        // ---
        let today = Utc::now().date_naive();
        let mut day = ctx.config.national_start;

        while day <= today {
            fetch_day(ctx, day).await?;
            day += Duration::days(1);
        }

        let mut docs = Vec::new();
        for path in ctx.cache.list(&ctx.cache.region_dir(Region::National)).await? {
            let is_pdf = path.extension().is_some_and(|ext| ext == "pdf");
            if !is_pdf {
                continue;
            }
            let Some(bytes) = ctx.cache.read(&path).await? else {
                continue;
            };
            let name = path.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
            docs.push(RawDocument::new(PDF, name, bytes));
        }

        info!("National: {} infographic(s)", docs.len());
        Ok(docs)
    }

    fn extract(&self, raw: &[RawDocument]) -> Result<NationalSeries, PipelineError> {
        read_infographics(raw, extract_text_boxes)
    }
}

/// Parse every cached PDF with `read_boxes`.
///
/// A file that is not a readable PDF is skipped; a readable infographic
/// that does not match the expected layout is an error.
fn read_infographics<F>(raw: &[RawDocument], read_boxes: F) -> Result<NationalSeries, PipelineError>
where
    F: Fn(&[u8]) -> Result<Vec<TextBox>, PipelineError>,
{
    // ---
    let mut series = NationalSeries::default();

    for doc in raw.iter().filter(|d| d.kind == PDF) {
        info!("Processing: {}", doc.name);
        let boxes = match read_boxes(&doc.bytes) {
            Ok(boxes) => boxes,
            Err(PipelineError::Pdf(err)) => {
                warn!("Unreadable PDF {}, skipping: {}", doc.name, err);
                continue;
            }
            Err(err) => return Err(err),
        };
        let (updated, infographic) = parse_infographic(&boxes, file_date(&doc.name))?;
        for (state, snapshot) in &infographic {
            debug!("{} {}: {:?}", updated, state, snapshot);
        }
        series.days.insert(updated, infographic);
    }

    Ok(series)
}

/// Cache the pointer page and PDF for `day`. Missing days are skipped.
async fn fetch_day(ctx: FetchContext<'_>, day: NaiveDate) -> Result<()> {
    // ---
    let pointer = pointer_url(day);
    let pointer_url = Url::parse(&pointer).context("Invalid national pointer URL")?;
    let basename = pointer.rsplit('/').next().unwrap_or_default();

    let page = match cached_fetch(
        ctx,
        Region::National,
        &format!("{basename}.html"),
        &pointer_url,
        Some(PRETEND_404_MARKER),
    )
    .await
    {
        Ok(page) => page,
        Err(err) if is_not_found(&err) => {
            warn!("No pointer page for {}", day);
            return Ok(());
        }
        Err(err) => return Err(err),
    };

    let Some(pdf_url) = pdf_link(&String::from_utf8_lossy(&page), &pointer) else {
        warn!("No link on page for {}", day);
        return Ok(());
    };
    let Some(pdf_name) = pdf_url.path_segments().and_then(|mut s| s.next_back()).map(str::to_string) else {
        warn!("PDF link without a file name for {}: {}", day, pdf_url);
        return Ok(());
    };

    match cached_fetch(ctx, Region::National, &pdf_name, &pdf_url, None).await {
        Ok(_) => {
            debug!("Cached {}", pdf_url);
            Ok(())
        }
        Err(err) if is_not_found(&err) => {
            warn!("No PDF for {}", day);
            Ok(())
        }
        Err(err) => Err(err),
    }
}

/// Pointer page for `day`, e.g. `...-at-a-glance-5-april-2020`.
pub fn pointer_url(day: NaiveDate) -> String {
    format!("{}{}", POINTER_URL_PREFIX, day.format("%-d-%B-%Y").to_string().to_lowercase())
}

/// The first file link on a pointer page.
pub fn pdf_link(page: &str, pointer_url: &str) -> Option<Url> {
    // ---
    let html = Html::parse_document(page);
    let href = html.select(&PDF_LINK).next()?.value().attr("href")?.to_string();
    absolute_url(pointer_url, &href)
}

/// The date in a PDF file name, which decides the layout revision.
///
/// Names look like `coronavirus-covid-19-at-a-glance-5-april-2020.pdf`,
/// sometimes with `_0`/`_1` suffixes or a repeated title. Anything else
/// is treated as the first revision (2020-04-01).
pub fn file_date(basename: &str) -> NaiveDate {
    // ---
    let fallback = NaiveDate::from_ymd_opt(2020, 4, 1).unwrap_or_default();
    if !basename.contains(FILE_PREFIX) || basename.contains(INFOGRAPHIC_FILE) {
        return fallback;
    }

    let stem = match basename.split_once("-coronavirus-covid-19") {
        Some((prefix, _)) => prefix.to_string(),
        None => basename.trim_end_matches(".pdf").to_string(),
    };
    let stem = stem.replace("_0", "").replace("_1", "");

    let parsed = stem
        .strip_prefix(FILE_PREFIX)
        .map(|rest| rest.trim_start_matches('-'))
        .and_then(|rest| NaiveDate::parse_from_str(rest, "%d-%B-%Y").ok());
    parsed.unwrap_or_else(|| {
        warn!("Unexpected infographic file name {}", basename);
        fallback
    })
}

/// A row of the testing panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestRow {
    Top,
    Bottom,
}

/// Where a text box sits on the infographic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    MapLabel(State),
    Icu,
    Hospitalized,
    Tests(TestRow),
    TestPositivity(TestRow),
    UpdateTime,
    Ignored,
}

/// Layout revision with a taller testing panel.
fn is_new_layout(file_date: NaiveDate) -> bool {
    NaiveDate::from_ymd_opt(2020, 5, 26).is_some_and(|start| file_date >= start)
}

/// Assign a box at reference coordinates (`left`, `bottom`) to a slot.
pub fn classify(left: f64, bottom: f64, file_date: NaiveDate) -> Slot {
    // ---
    let new_layout = is_new_layout(file_date);

    if left > 600.0 && bottom > 350.0 {
        return Slot::MapLabel(map_state(left, bottom));
    }
    // National totals; the same figures come from the map.
    if bottom > 470.0 {
        return Slot::Ignored;
    }
    if bottom > 300.0 {
        // National callout, then the aged care table past x=250.
        if bottom > 350.0 || left > 250.0 {
            return Slot::Ignored;
        }
        return Slot::Icu;
    }
    if bottom > 200.0 {
        if bottom > 250.0 || left > 240.0 {
            return Slot::Ignored;
        }
        return Slot::Hospitalized;
    }
    if bottom > 25.0 || (new_layout && bottom > 12.0) {
        if bottom > 125.0 || left > 250.0 {
            return Slot::Ignored;
        }
        let above = |old: f64, new: f64| bottom > old || (new_layout && bottom > new);
        return if above(100.0, 90.0) {
            Slot::Tests(TestRow::Top)
        } else if above(75.0, 67.0) {
            Slot::TestPositivity(TestRow::Top)
        } else if above(50.0, 37.0) {
            Slot::Tests(TestRow::Bottom)
        } else {
            Slot::TestPositivity(TestRow::Bottom)
        };
    }
    if left < 30.0 {
        return Slot::UpdateTime;
    }
    Slot::Ignored
}

/// State labels on the map, from the far west inwards.
fn map_state(left: f64, bottom: f64) -> State {
    // ---
    if left < 650.0 {
        State::Wa
    } else if left < 675.0 && bottom > 450.0 {
        State::Nt
    } else if left < 675.0 && bottom > 400.0 {
        State::Sa
    } else if left < 675.0 {
        // Victoria's label floats out to the left.
        State::Vic
    } else if bottom > 425.0 {
        State::Qld
    } else if bottom > 400.0 {
        State::Nsw
    } else if bottom > 375.0 {
        State::Act
    } else {
        State::Tas
    }
}

/// A box whose lines all repeat the same value was pasted twice.
fn collapse_duplicate_lines(text: &str) -> &str {
    // ---
    let mut lines = text.lines().map(str::trim);
    let first = lines.next().unwrap_or_default();
    if text.contains('\n') && lines.all(|line| line == first) {
        first
    } else {
        text
    }
}

/// `"1,234 (5)"`: total cases and, in brackets, deaths (0 when absent).
fn parse_map_label(state: State, text: &str) -> Result<(i64, i64), PipelineError> {
    // ---
    let caps = MAP_LABEL
        .captures(text.trim())
        .or_else(|| text.lines().find_map(|line| MAP_LABEL.captures(line.trim())));
    let unparseable = || PipelineError::UnparseableMapLabel {
        state,
        text: text.to_string(),
    };
    let caps = caps.ok_or_else(unparseable)?;

    let total = parse_num(&caps["total"]).ok_or_else(unparseable)?;
    let deaths = match caps.name("deaths") {
        Some(deaths) => parse_num(deaths.as_str()).ok_or_else(unparseable)?,
        None => 0,
    };
    Ok((total, deaths))
}

fn count(field: &'static str, text: &str) -> Result<i64, PipelineError> {
    parse_num(text).ok_or_else(|| PipelineError::UnparseableValue {
        field,
        text: text.to_string(),
    })
}

fn ratio(field: &'static str, text: &str) -> Result<f64, PipelineError> {
    parse_perc(text).ok_or_else(|| PipelineError::UnparseableValue {
        field,
        text: text.to_string(),
    })
}

/// The spurious ICU value hidden behind the QLD figure from 2020-04-17.
fn is_hidden_icu_value(left: f64, value: i64) -> bool {
    (left - 118.22).abs() < 0.5 && value == 11
}

/// Parse one infographic into its "last updated" date and per-state values.
pub fn parse_infographic(
    boxes: &[TextBox],
    file_date: NaiveDate,
) -> Result<(NaiveDate, Infographic), PipelineError> {
    // ---
    let mut infographic: Infographic = BTreeMap::new();
    let mut update_time = None;

    let mut icu = Vec::new();
    let mut hospitalized = Vec::new();
    let mut top_tests = Vec::new();
    let mut bottom_tests = Vec::new();
    let mut top_percs = Vec::new();
    let mut bottom_percs = Vec::new();

    for text_box in boxes {
        let (left, bottom) = (text_box.reference_x(), text_box.reference_y());
        let text = collapse_duplicate_lines(text_box.text.trim());
        let slot = classify(left, bottom, file_date);

        match slot {
            Slot::MapLabel(state) => {
                let (total, deaths) = parse_map_label(state, text)?;
                let snapshot = infographic.entry(state).or_default();
                snapshot.total = Some(total);
                snapshot.deaths = Some(deaths);
            }
            Slot::Icu => icu.push((left, count("icu", text)?)),
            Slot::Hospitalized => hospitalized.push((left, count("hospitalized", text)?)),
            Slot::Tests(TestRow::Top) => top_tests.push((left, count("tests", text)?)),
            Slot::Tests(TestRow::Bottom) => bottom_tests.push((left, count("tests", text)?)),
            Slot::TestPositivity(TestRow::Top) => top_percs.push((left, ratio("test_pos_perc", text)?)),
            Slot::TestPositivity(TestRow::Bottom) => {
                bottom_percs.push((left, ratio("test_pos_perc", text)?))
            }
            Slot::UpdateTime => {
                let date = text
                    .strip_prefix("Last updated")
                    .and_then(|rest| parse_full_date(rest.trim()))
                    .ok_or_else(|| PipelineError::UnparseableValue {
                        field: "update time",
                        text: text.to_string(),
                    })?;
                update_time = Some(date);
            }
            Slot::Ignored => {}
        }
    }

    let updated = update_time.ok_or(PipelineError::MissingUpdateTime)?;

    if NaiveDate::from_ymd_opt(2020, 4, 17).is_some_and(|start| updated >= start) {
        if let Some(index) = icu.iter().position(|&(left, value)| is_hidden_icu_value(left, value)) {
            icu.remove(index);
        }
    }

    for (state, value) in zip_states("icu", left_to_right(icu))? {
        infographic.entry(state).or_default().icu = Some(value);
    }
    for (state, value) in zip_states("hospitalized", left_to_right(hospitalized))? {
        infographic.entry(state).or_default().hospitalized = Some(value);
    }

    let tests = left_to_right(top_tests).into_iter().chain(left_to_right(bottom_tests)).collect();
    for (state, value) in zip_states("tests", tests)? {
        infographic.entry(state).or_default().tests = Some(value);
    }

    let percs = left_to_right(top_percs).into_iter().chain(left_to_right(bottom_percs)).collect();
    for (state, value) in zip_states("test_pos_perc", percs)? {
        infographic.entry(state).or_default().test_pos_perc = Some(value);
    }

    Ok((updated, infographic))
}

fn left_to_right<T>(mut values: Vec<(f64, T)>) -> Vec<T> {
    values.sort_by(|a, b| a.0.total_cmp(&b.0));
    values.into_iter().map(|(_, value)| value).collect()
}

/// Pair panel values with the states; the panel must have exactly one
/// value per state.
fn zip_states<T: fmt::Debug>(panel: &'static str, values: Vec<T>) -> Result<Vec<(State, T)>, PipelineError> {
    // ---
    if values.len() != State::ALL.len() {
        return Err(PipelineError::PanelCountMismatch {
            panel,
            expected: State::ALL.len(),
            found: values.len(),
            values: values.iter().map(|v| format!("{v:?}")).collect(),
        });
    }
    Ok(State::ALL.into_iter().zip(values).collect())
}
