//! Data models shared by every source adapter and the series stages.
//!
//! A scrape produces a [`PartialSeries`]: a sparse map of calendar date to
//! [`DailyRecord`]. After manual corrections and forward filling it becomes
//! a contiguous [`TimeSeries`], which is finally reshaped into the
//! [`OutputDocument`] written to disk.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

// ---

/// A region with its own source adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Region {
    Nsw,
    Qld,
    Vic,
    Wa,
    National,
}

impl Region {
    /// Every region, in default execution order (national last).
    pub const ALL: [Region; 5] = [
        Region::Nsw,
        Region::Qld,
        Region::Vic,
        Region::Wa,
        Region::National,
    ];

    /// Lowercase name used for cache directories and output files.
    pub fn slug(&self) -> &'static str {
        match self {
            Region::Nsw => "nsw",
            Region::Qld => "qld",
            Region::Vic => "vic",
            Region::Wa => "wa",
            Region::National => "national",
        }
    }
}

impl FromStr for Region {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Region::ALL
            .iter()
            .copied()
            .find(|r| r.slug().eq_ignore_ascii_case(s.trim()))
            .ok_or(())
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}

/// An Australian state or territory as laid out on the national infographic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum State {
    Act,
    Nsw,
    Nt,
    Qld,
    Sa,
    Tas,
    Vic,
    Wa,
}

impl State {
    /// Alphabetical order, which is also the left-to-right order of every
    /// per-state panel on the infographic.
    pub const ALL: [State; 8] = [
        State::Act,
        State::Nsw,
        State::Nt,
        State::Qld,
        State::Sa,
        State::Tas,
        State::Vic,
        State::Wa,
    ];

    pub fn slug(&self) -> &'static str {
        match self {
            State::Act => "act",
            State::Nsw => "nsw",
            State::Nt => "nt",
            State::Qld => "qld",
            State::Sa => "sa",
            State::Tas => "tas",
            State::Vic => "vic",
            State::Wa => "wa",
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.slug().to_ascii_uppercase())
    }
}

/// Scalar metrics tracked per day.
///
/// `Current*` metrics are point-in-time snapshots; everything else is a
/// cumulative total to date. Variants are declared in the alphabetical order
/// of their serialized names so maps keyed by `Metric` serialize sorted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    Confirmed,
    CurrentHospitalized,
    CurrentIcu,
    CurrentVentilators,
    Deaths,
    Recovered,
    Tested,
}

impl Metric {
    pub fn name(&self) -> &'static str {
        match self {
            Metric::Confirmed => "confirmed",
            Metric::Deaths => "deaths",
            Metric::Tested => "tested",
            Metric::Recovered => "recovered",
            Metric::CurrentHospitalized => "current_hospitalized",
            Metric::CurrentIcu => "current_icu",
            Metric::CurrentVentilators => "current_ventilators",
        }
    }
}

/// Categorical breakdowns carried alongside the scalar metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakdownKind {
    AgeGroups,
    Sources,
    Lga,
}

/// Bucket label to count.
pub type Breakdown = BTreeMap<String, i64>;

/// Everything known about one region on one calendar day.
///
/// An absent metric means "unknown"; it is emitted as `null` unless the
/// fill stage carries a previous value forward.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyRecord {
    #[serde(default)]
    pub metrics: BTreeMap<Metric, i64>,
    #[serde(default)]
    pub breakdowns: BTreeMap<BreakdownKind, Breakdown>,
}

impl DailyRecord {
    pub fn get(&self, metric: Metric) -> Option<i64> {
        self.metrics.get(&metric).copied()
    }

    pub fn set(&mut self, metric: Metric, value: i64) {
        self.metrics.insert(metric, value);
    }

    /// Set `metric` when a value was extracted; `None` leaves the record as is.
    pub fn set_opt(&mut self, metric: Metric, value: Option<i64>) {
        if let Some(value) = value {
            self.set(metric, value);
        }
    }

    pub fn has(&self, metric: Metric) -> bool {
        self.metrics.contains_key(&metric)
    }

    pub fn breakdown(&self, kind: BreakdownKind) -> Option<&Breakdown> {
        self.breakdowns.get(&kind)
    }

    pub fn set_breakdown(&mut self, kind: BreakdownKind, breakdown: Breakdown) {
        self.breakdowns.insert(kind, breakdown);
    }

    /// Mutable access to a breakdown, starting from an empty map.
    pub fn breakdown_mut(&mut self, kind: BreakdownKind) -> &mut Breakdown {
        self.breakdowns.entry(kind).or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty() && self.breakdowns.is_empty()
    }
}

/// Sparse, date-keyed records as produced by an adapter.
pub type PartialSeries = BTreeMap<NaiveDate, DailyRecord>;

/// Mutable access to the record for `date`, inserting an empty one if needed.
pub fn record_mut(series: &mut PartialSeries, date: NaiveDate) -> &mut DailyRecord {
    series.entry(date).or_default()
}

/// Contiguous, forward-filled series: one record per calendar day.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TimeSeries {
    pub dates: Vec<NaiveDate>,
    pub records: Vec<DailyRecord>,
}

impl TimeSeries {
    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    pub fn get(&self, date: NaiveDate) -> Option<&DailyRecord> {
        self.dates
            .binary_search(&date)
            .ok()
            .map(|index| &self.records[index])
    }

    pub fn iter(&self) -> impl Iterator<Item = (&NaiveDate, &DailyRecord)> {
        self.dates.iter().zip(self.records.iter())
    }
}

/// Dense per-bucket arrays aligned to `timeseries_dates`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakdownSeries {
    pub keys: Vec<String>,
    pub subseries: BTreeMap<String, Vec<i64>>,
}

/// The JSON document written for a region.
///
/// Fields are declared alphabetically so the serialized keys come out
/// sorted, as every consumer of these files expects.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub age_groups: Option<BreakdownSeries>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lga: Option<BreakdownSeries>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sources: Option<BreakdownSeries>,
    pub timeseries_dates: Vec<NaiveDate>,
    #[serde(default)]
    pub total: BTreeMap<Metric, Vec<Option<i64>>>,
}

impl OutputDocument {
    pub fn breakdown(&self, kind: BreakdownKind) -> Option<&BreakdownSeries> {
        match kind {
            BreakdownKind::AgeGroups => self.age_groups.as_ref(),
            BreakdownKind::Sources => self.sources.as_ref(),
            BreakdownKind::Lga => self.lga.as_ref(),
        }
    }

    pub fn breakdown_slot(&mut self, kind: BreakdownKind) -> &mut Option<BreakdownSeries> {
        match kind {
            BreakdownKind::AgeGroups => &mut self.age_groups,
            BreakdownKind::Sources => &mut self.sources,
            BreakdownKind::Lga => &mut self.lga,
        }
    }

    /// Check the structural invariants: strictly increasing unique dates
    /// and every array as long as the date axis.
    pub fn validate(&self) -> Result<(), PipelineError> {
        // ---
        if let Some(pair) = self.timeseries_dates.windows(2).find(|w| w[0] >= w[1]) {
            return Err(PipelineError::InvalidDocument(format!(
                "dates out of order: {} then {}",
                pair[0], pair[1]
            )));
        }

        let expected = self.timeseries_dates.len();
        for (metric, values) in &self.total {
            if values.len() != expected {
                return Err(PipelineError::InvalidDocument(format!(
                    "total.{} has {} values for {} dates",
                    metric.name(),
                    values.len(),
                    expected
                )));
            }
        }

        for kind in [BreakdownKind::AgeGroups, BreakdownKind::Sources, BreakdownKind::Lga] {
            let Some(series) = self.breakdown(kind) else {
                continue;
            };
            for (key, values) in &series.subseries {
                if values.len() != expected {
                    return Err(PipelineError::InvalidDocument(format!(
                        "{:?}.{} has {} values for {} dates",
                        kind,
                        key,
                        values.len(),
                        expected
                    )));
                }
            }
        }

        Ok(())
    }
}
