//! Manual correction tables (`manual/<region>.json`).
//!
//! Early releases were prose, images or tweets, so a handful of values were
//! transcribed by hand. Each region keeps them in a declarative table:
//!
//! ```json
//! {
//!   "breakdown_mode": "incremental",
//!   "create_missing_dates": false,
//!   "forced_metrics": ["current_icu"],
//!   "forced_breakdowns": [],
//!   "entries": {
//!     "2020-03-24": { "metrics": { "current_icu": 12 }, "note": "release 20200324_00" }
//!   }
//! }
//! ```
//!
//! Entries only fill fields the scrape left absent, except forced metrics
//! and forced breakdowns, which always overwrite.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::NaiveDate;
use serde::Deserialize;

use crate::error::PipelineError;
use crate::models::{Breakdown, BreakdownKind, Metric, PartialSeries};

/// How breakdown values in the entries are written.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakdownMode {
    /// Each entry holds that day's cumulative counts.
    #[default]
    Cumulative,
    /// Each entry holds that day's new counts; running totals are applied.
    Incremental,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ManualEntry {
    #[serde(default)]
    pub metrics: BTreeMap<Metric, i64>,
    #[serde(default)]
    pub breakdowns: BTreeMap<BreakdownKind, Breakdown>,
    /// Where the value was transcribed from.
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ManualTable {
    #[serde(default)]
    pub breakdown_mode: BreakdownMode,
    /// Insert entries for dates the scrape never saw.
    #[serde(default)]
    pub create_missing_dates: bool,
    #[serde(default)]
    pub forced_metrics: Vec<Metric>,
    #[serde(default)]
    pub forced_breakdowns: Vec<BreakdownKind>,
    #[serde(default)]
    pub entries: BTreeMap<NaiveDate, ManualEntry>,
}

impl ManualTable {
    pub fn from_json(text: &str) -> Result<Self, PipelineError> {
        serde_json::from_str(text).map_err(|e| PipelineError::InvalidManualTable(e.to_string()))
    }

    /// Load a table from disk; a missing file is an empty table.
    pub async fn load(path: &Path) -> Result<Self, PipelineError> {
        // ---
        match tokio::fs::read_to_string(path).await {
            Ok(text) => Self::from_json(&text).map_err(|e| {
                PipelineError::InvalidManualTable(format!("{}: {}", path.display(), e))
            }),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("No manual table at {}", path.display());
                Ok(ManualTable::default())
            }
            Err(err) => Err(PipelineError::InvalidManualTable(format!(
                "{}: {}",
                path.display(),
                err
            ))),
        }
    }

    /// Layer the table over `series`.
    pub fn apply(&self, series: &mut PartialSeries) {
        // ---
        let mut running: BTreeMap<BreakdownKind, Breakdown> = BTreeMap::new();

        for (date, entry) in &self.entries {
            let breakdowns = match self.breakdown_mode {
                BreakdownMode::Cumulative => entry.breakdowns.clone(),
                BreakdownMode::Incremental => {
                    accumulate(&mut running, &entry.breakdowns);
                    running.clone()
                }
            };

            let record = match series.get_mut(date) {
                Some(record) => record,
                None if self.create_missing_dates => series.entry(*date).or_default(),
                None => {
                    tracing::trace!("Manual entry for {} has no scraped record, skipped", date);
                    continue;
                }
            };

            for (metric, value) in &entry.metrics {
                if self.forced_metrics.contains(metric) || !record.has(*metric) {
                    record.set(*metric, *value);
                }
            }

            for (kind, breakdown) in breakdowns {
                if self.forced_breakdowns.contains(&kind) || record.breakdown(kind).is_none() {
                    record.set_breakdown(kind, breakdown);
                }
            }
        }
    }
}

/// Add `increments` into `running`. A kind named in the entry exists from
/// then on, even when the increment is empty.
fn accumulate(
    running: &mut BTreeMap<BreakdownKind, Breakdown>,
    increments: &BTreeMap<BreakdownKind, Breakdown>,
) {
    for (kind, increment) in increments {
        let totals = running.entry(*kind).or_default();
        for (key, value) in increment {
            *totals.entry(key.clone()).or_insert(0) += value;
        }
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::models::{record_mut, DailyRecord};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_fills_only_absent_fields_unless_forced() {
        // ---
        let table = ManualTable::from_json(
            r#"{
                "forced_metrics": ["current_icu"],
                "entries": {
                    "2020-03-24": { "metrics": { "confirmed": 1, "current_icu": 12 } }
                }
            }"#,
        )
        .unwrap();

        let mut series = PartialSeries::new();
        let record = record_mut(&mut series, date(2020, 3, 24));
        record.set(Metric::Confirmed, 100);
        record.set(Metric::CurrentIcu, 3);

        table.apply(&mut series);
        let record = &series[&date(2020, 3, 24)];
        assert_eq!(record.get(Metric::Confirmed), Some(100));
        assert_eq!(record.get(Metric::CurrentIcu), Some(12));
    }

    #[test]
    fn test_missing_dates_skipped_or_created() {
        // ---
        let text = |create: bool| {
            format!(
                r#"{{"create_missing_dates": {create},
                    "entries": {{ "2020-01-29": {{ "metrics": {{ "confirmed": 1 }} }} }} }}"#
            )
        };

        let mut series = PartialSeries::new();
        ManualTable::from_json(&text(false)).unwrap().apply(&mut series);
        assert!(series.is_empty());

        ManualTable::from_json(&text(true)).unwrap().apply(&mut series);
        assert_eq!(series[&date(2020, 1, 29)].get(Metric::Confirmed), Some(1));
    }

    #[test]
    fn test_incremental_breakdowns_become_running_totals() {
        // ---
        let table = ManualTable::from_json(
            r#"{
                "breakdown_mode": "incremental",
                "entries": {
                    "2020-01-25": { "breakdowns": { "sources": { "Overseas acquired": 3 } } },
                    "2020-01-26": {},
                    "2020-01-27": { "breakdowns": { "sources": { "Overseas acquired": 1, "Under investigation": 2 } } }
                }
            }"#,
        )
        .unwrap();

        let mut series = PartialSeries::new();
        for day in 25..=27 {
            series.insert(date(2020, 1, day), DailyRecord::default());
        }
        table.apply(&mut series);

        let sources = |day| series[&date(2020, 1, day)].breakdown(BreakdownKind::Sources).cloned();
        assert_eq!(sources(25).unwrap()["Overseas acquired"], 3);
        assert_eq!(sources(26).unwrap()["Overseas acquired"], 3);
        let third = sources(27).unwrap();
        assert_eq!(third["Overseas acquired"], 4);
        assert_eq!(third["Under investigation"], 2);
    }

    #[test]
    fn test_scraped_breakdown_wins_over_manual() {
        // ---
        let table = ManualTable::from_json(
            r#"{"entries": {"2020-03-01": {"breakdowns": {"age_groups": {"20-29": 1}}}}}"#,
        )
        .unwrap();

        let mut series = PartialSeries::new();
        record_mut(&mut series, date(2020, 3, 1))
            .breakdown_mut(BreakdownKind::AgeGroups)
            .insert("30-39".to_string(), 7);
        table.apply(&mut series);

        let ages = series[&date(2020, 3, 1)].breakdown(BreakdownKind::AgeGroups).unwrap();
        assert_eq!(ages.len(), 1);
        assert_eq!(ages["30-39"], 7);
    }

    #[test]
    fn test_unknown_fields_are_rejected() {
        // ---
        let err = ManualTable::from_json(r#"{"entries": {"2020-03-01": {"icu": 3}}}"#).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidManualTable(_)));
    }

    #[test]
    fn test_missing_file_is_empty_table() {
        // ---
        let dir = tempfile::tempdir().unwrap();
        let table = tokio_test::block_on(ManualTable::load(&dir.path().join("none.json"))).unwrap();
        assert_eq!(table, ManualTable::default());
    }

    #[test]
    fn test_shipped_tables() {
        // ---
        let nsw = ManualTable::from_json(include_str!("../../manual/nsw.json")).unwrap();
        assert_eq!(nsw.breakdown_mode, BreakdownMode::Incremental);
        assert!(!nsw.create_missing_dates);

        let mut series = PartialSeries::new();
        record_mut(&mut series, date(2020, 3, 15)).set(Metric::Confirmed, 134);
        record_mut(&mut series, date(2020, 3, 24)).set(Metric::CurrentIcu, 1);
        nsw.apply(&mut series);

        let day = &series[&date(2020, 3, 15)];
        assert_eq!(day.breakdown(BreakdownKind::AgeGroups).unwrap()["30-39"], 27);
        assert_eq!(day.breakdown(BreakdownKind::Sources).unwrap()["Overseas acquired"], 54);
        assert_eq!(series[&date(2020, 3, 24)].get(Metric::CurrentIcu), Some(12));
        assert_eq!(series[&date(2020, 3, 24)].get(Metric::CurrentVentilators), Some(8));
        assert_eq!(series.len(), 2);

        let qld = ManualTable::from_json(include_str!("../../manual/qld.json")).unwrap();
        let mut series = PartialSeries::new();
        record_mut(&mut series, date(2020, 3, 19)).set(Metric::Tested, 1);
        qld.apply(&mut series);
        assert_eq!(series[&date(2020, 3, 19)].get(Metric::Tested), Some(27_064));
        assert_eq!(series[&date(2020, 1, 28)].breakdown(BreakdownKind::Lga), Some(&Breakdown::new()));

        let vic = ManualTable::from_json(include_str!("../../manual/vic.json")).unwrap();
        let mut series = PartialSeries::new();
        vic.apply(&mut series);
        assert_eq!(series[&date(2020, 2, 1)].get(Metric::Tested), Some(78));
        assert_eq!(series[&date(2020, 1, 24)].get(Metric::CurrentIcu), Some(0));
    }
}
