//! The VIC case linelist, exported from the public BI dashboard.
//!
//! The endpoint answers a fixed semantic query with a compressed table:
//! each row lists only the columns that changed since the previous row
//! (bitmask `R`), and string columns are indices into per-column
//! dictionaries (`ValueDicts`, selected by the schema's `DN`).

use std::collections::HashMap;

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, Utc};
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;
use uuid::Uuid;

use crate::error::{FetchError, PipelineError};
use crate::http::HttpClient;
use crate::models::{BreakdownKind, DailyRecord, Metric, PartialSeries};
use crate::sources::nsw::{LOCAL_CONTACT, LOCAL_UNKNOWN, OVERSEAS, UNDER_INVESTIGATION};

pub const QUERY_URL: &str =
    "https://wabi-australia-southeast-api.analysis.windows.net/public/reports/querydata?synchronous=true";
const RESOURCE_KEY: &str = "80f2a75d-ece4-49dd-9566-236a6522677c";

/// Linelist query: one row per case, grouped by age group.
pub const QUERY: &str = r#"{"version":"1.0.0","queries":[{"Query":{"Commands":[{"SemanticQueryDataShapeCommand":{"Query":{"Version":2,"From":[{"Name":"d","Entity":"dimAgeGroup"},{"Name":"l","Entity":"Linelist"}],"Select":[{"Column":{"Expression":{"SourceRef":{"Source":"d"}},"Property":"AgeGroup"},"Name":"dimAgeGroup.AgeGroup"},{"Column":{"Expression":{"SourceRef":{"Source":"l"}},"Property":"Sex"},"Name":"Linelist.Sex"},{"Column":{"Expression":{"SourceRef":{"Source":"l"}},"Property":"PHESSID"},"Name":"CountNonNull(Linelist.PHESSID)"},{"Column":{"Expression":{"SourceRef":{"Source":"l"}},"Property":"clin_status"},"Name":"Linelist.clin_status"},{"Column":{"Expression":{"SourceRef":{"Source":"l"}},"Property":"acquired"},"Name":"Linelist.acquired"},{"Column":{"Expression":{"SourceRef":{"Source":"l"}},"Property":"acquired_country"},"Name":"Linelist.acquired_country"},{"Column":{"Expression":{"SourceRef":{"Source":"l"}},"Property":"Eventdate"},"Name":"Linelist.Eventdate"},{"Column":{"Expression":{"SourceRef":{"Source":"l"}},"Property":"clin_status_n"},"Name":"Linelist.clin_status_n"},{"Column":{"Expression":{"SourceRef":{"Source":"l"}},"Property":"acquired_n"},"Name":"Linelist.acquired_n"},{"Column":{"Expression":{"SourceRef":{"Source":"l"}},"Property":"acquired_country_n"},"Name":"Linelist.acquired_country_n"},{"Column":{"Expression":{"SourceRef":{"Source":"l"}},"Property":"CountValue"},"Name":"Linelist.CountValue"},{"Column":{"Expression":{"SourceRef":{"Source":"l"}},"Property":"Localgovernmentarea"},"Name":"Linelist.Localgovernmentarea"},{"Measure":{"Expression":{"SourceRef":{"Source":"l"}},"Property":"M_Age_MedianANDRange"},"Name":"Linelist.M_Age_MedianANDRange"}],"OrderBy":[{"Direction":1,"Expression":{"Column":{"Expression":{"SourceRef":{"Source":"d"}},"Property":"AgeGroup"}}}],"GroupBy":[{"SourceRef":{"Source":"l"},"Name":"Linelist"}]},"Binding":{"Primary":{"Groupings":[{"Projections":[0,1,2,3,4,5,6,7,8,9,10,11],"ShowItemsWithNoData":[0,1,2,3,4,5,6,7,8,9,10,11],"GroupBy":[0]}]},"Projections":[12],"DataReduction":{"Primary":{"Top":{"Count":1000}}},"Version":1}}}]},"QueryId":"","ApplicationContext":{"DatasetId":"5b547437-24c9-4b22-92de-900b3b3f4785","Sources":[{"ReportId":"964ef513-8ff4-407c-8068-ade1e7f64ca5"}]}}],"cancelQueries":[],"modelId":1959902}"#;

/// Columns per decoded row.
pub const COLUMNS: usize = 12;

const AGE_GROUP: usize = 0;
const ACQUIRED: usize = 4;
const EVENT_DATE: usize = 6;

/// Marker key on rows the decoder does not understand.
const UNKNOWN_ROW_MARKER: &str = "\u{d8}";

/// Send the linelist query.
pub async fn request_export(http: &HttpClient) -> Result<String, FetchError> {
    // ---
    let url = Url::parse(QUERY_URL).map_err(|e| FetchError::InvalidHeader(format!("query url: {e}")))?;

    let mut headers = HashMap::new();
    headers.insert("Origin", "https://app.powerbi.com".to_string());
    headers.insert("ActivityId", Uuid::new_v4().to_string());
    headers.insert("RequestId", Uuid::new_v4().to_string());
    headers.insert("X-PowerBI-ResourceKey", RESOURCE_KEY.to_string());
    headers.insert("Content-Type", "application/json".to_string());

    http.post_text(&url, headers, QUERY.to_string()).await
}

/// A rate-limited request comes back as a bare JSON empty string.
pub fn is_empty_export(body: &str) -> bool {
    let body = body.trim();
    body.is_empty() || serde_json::from_str::<Value>(body).is_ok_and(|v| v == Value::String(String::new()))
}

/// The columns of a decoded row the aggregation uses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaseRow {
    pub age_group: Option<String>,
    pub acquired: Option<String>,
    pub event_date: Option<NaiveDateTime>,
}

fn malformed(what: impl Into<String>) -> PipelineError {
    PipelineError::MalformedExport(what.into())
}

/// Decode the compressed table into one [`CaseRow`] per case.
pub fn decode(export: &Value) -> Result<Vec<CaseRow>, PipelineError> {
    // ---
    let dataset = export
        .pointer("/results/0/result/data/dsr/DS/0")
        .ok_or_else(|| malformed("no dataset at results[0].result.data.dsr.DS[0]"))?;
    let empty = serde_json::Map::new();
    let value_dicts = dataset
        .get("ValueDicts")
        .and_then(Value::as_object)
        .unwrap_or(&empty);
    let rows = dataset
        .pointer("/PH/0/DM0")
        .and_then(Value::as_array)
        .ok_or_else(|| malformed("no DM0 rows"))?;
    let header = rows.first().ok_or_else(|| malformed("DM0 is empty"))?;
    let schema = header
        .get("S")
        .and_then(Value::as_array)
        .ok_or_else(|| malformed("first row has no schema"))?;

    // The first row is short one implicit null from the group-by.
    let header_padding = match header.get("C").and_then(Value::as_array) {
        Some(columns) if columns.len() != COLUMNS => 1,
        _ => 0,
    };

    let mut decoded: Vec<Vec<Value>> = Vec::with_capacity(rows.len());

    for (index, row) in rows.iter().enumerate() {
        if row.get(UNKNOWN_ROW_MARKER).is_some() {
            warn!("Skipping BI row {} with an unknown marker", index);
            continue;
        }

        let mut columns: Vec<Value> = row
            .get("C")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        if index == 0 && header_padding == 1 {
            columns.insert(0, Value::Null);
        }
        let repeat = row.get("R").and_then(Value::as_u64).unwrap_or(0);

        let mut values = Vec::with_capacity(COLUMNS);
        let mut next = columns.into_iter();
        for i in 0..COLUMNS {
            if (repeat >> i) & 1 == 1 {
                let previous = decoded.last().map(|prev| prev[i].clone());
                values.push(previous.unwrap_or(Value::Null));
                continue;
            }

            let value = next
                .next()
                .ok_or_else(|| malformed(format!("row {index} is missing column {i}")))?;
            let dictionary = schema.get(i).and_then(|s| s.get("DN")).and_then(Value::as_str);
            let value = match (dictionary, value.as_u64()) {
                (Some(dn), Some(key)) => value_dicts
                    .get(dn)
                    .and_then(|dict| dict.get(key as usize))
                    .cloned()
                    .ok_or_else(|| malformed(format!("no entry {key} in dictionary {dn}")))?,
                _ => value,
            };
            values.push(value);
        }
        decoded.push(values);
    }

    Ok(decoded.iter().map(Vec::as_slice).map(case_row).collect())
}

fn case_row(values: &[Value]) -> CaseRow {
    // ---
    CaseRow {
        age_group: values[AGE_GROUP].as_str().map(|s| s.replace('\u{2013}', "-")),
        acquired: values[ACQUIRED].as_str().map(str::to_string),
        event_date: values[EVENT_DATE]
            .as_i64()
            .and_then(DateTime::<Utc>::from_timestamp_millis)
            .map(|dt| dt.naive_utc()),
    }
}

/// Ten-year buckets matching the NSW tables; everyone 80 and over is `80+`.
pub fn normalize_age_group(age_group: &str) -> Option<String> {
    // ---
    match age_group {
        "Unknown" => None,
        "80-84" | "85+" => Some("80+".to_string()),
        _ => {
            let mut start: i64 = age_group.split('-').next()?.trim().parse().ok()?;
            if start % 10 != 0 {
                start -= 5;
            }
            Some(format!("{}-{}", start, start + 9))
        }
    }
}

pub fn normalize_source(source: &str) -> Option<&'static str> {
    match source {
        "Contact with a confirmed case" => Some(LOCAL_CONTACT),
        "Acquired in Australia, unknown source" => Some(LOCAL_UNKNOWN),
        "Travel overseas" => Some(OVERSEAS),
        "Under investigation" => Some(UNDER_INVESTIGATION),
        _ => None,
    }
}

/// Event dates are sometimes entered a year early; anything before
/// 2018-06-01 is unusable, anything before 2019-06-01 is moved forward a
/// year.
fn corrected_event_date(event: NaiveDateTime) -> Option<NaiveDate> {
    // ---
    let date = event.date();
    if date < NaiveDate::from_ymd_opt(2018, 6, 1)? {
        return None;
    }
    if date < NaiveDate::from_ymd_opt(2019, 6, 1)? {
        return date.with_year(date.year() + 1);
    }
    Some(date)
}

/// Cumulative confirmed cases, age groups and sources for every day from
/// the first to the last event date.
pub fn cumulative_cases(rows: &[CaseRow]) -> PartialSeries {
    // ---
    let mut daily = PartialSeries::new();

    for row in rows {
        let Some(date) = row.event_date.and_then(corrected_event_date) else {
            debug!("Case without a usable event date: {:?}", row);
            continue;
        };
        let record = daily.entry(date).or_default();
        *record.metrics.entry(Metric::Confirmed).or_insert(0) += 1;

        if let Some(group) = row.age_group.as_deref().and_then(normalize_age_group) {
            *record.breakdown_mut(BreakdownKind::AgeGroups).entry(group).or_insert(0) += 1;
        }
        if let Some(source) = row.acquired.as_deref().and_then(normalize_source) {
            *record
                .breakdown_mut(BreakdownKind::Sources)
                .entry(source.to_string())
                .or_insert(0) += 1;
        }
    }

    let (Some(first), Some(last)) = (daily.keys().next().copied(), daily.keys().last().copied()) else {
        return daily;
    };

    let mut cumulative = PartialSeries::new();
    let mut running = DailyRecord::default();
    running.set(Metric::Confirmed, 0);
    running.breakdown_mut(BreakdownKind::AgeGroups);
    running.breakdown_mut(BreakdownKind::Sources);

    let mut date = first;
    while date <= last {
        if let Some(today) = daily.get(&date) {
            for (metric, value) in &today.metrics {
                *running.metrics.entry(*metric).or_insert(0) += value;
            }
            for (kind, breakdown) in &today.breakdowns {
                let totals = running.breakdown_mut(*kind);
                for (key, value) in breakdown {
                    *totals.entry(key.clone()).or_insert(0) += value;
                }
            }
        }
        cumulative.insert(date, running.clone());
        date += Duration::days(1);
    }

    cumulative
}
