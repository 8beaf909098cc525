//! Forward filling onto a contiguous calendar.

use chrono::Days;

use crate::models::{DailyRecord, PartialSeries, TimeSeries};

/// Expand `series` to every day between its first and last date.
///
/// A day with no record copies the whole previous day. A day with a record
/// keeps what it has and copies only the metrics and breakdowns it lacks.
/// An empty input gives an empty series.
pub fn fill(series: &PartialSeries) -> TimeSeries {
    // ---
    let (Some(first), Some(last)) = (series.keys().next(), series.keys().next_back()) else {
        return TimeSeries::default();
    };

    let mut filled = TimeSeries::default();
    let mut previous: Option<DailyRecord> = None;
    let mut day = *first;

    while day <= *last {
        let record = match (series.get(&day), previous.as_ref()) {
            (Some(current), Some(prev)) => carry_missing(current, prev),
            (Some(current), None) => current.clone(),
            (None, Some(prev)) => prev.clone(),
            (None, None) => DailyRecord::default(),
        };

        filled.dates.push(day);
        filled.records.push(record.clone());
        previous = Some(record);

        match day.checked_add_days(Days::new(1)) {
            Some(next) => day = next,
            None => break,
        }
    }

    filled
}

fn carry_missing(current: &DailyRecord, previous: &DailyRecord) -> DailyRecord {
    // ---
    let mut merged = current.clone();
    for (metric, value) in &previous.metrics {
        merged.metrics.entry(*metric).or_insert(*value);
    }
    for (kind, breakdown) in &previous.breakdowns {
        merged
            .breakdowns
            .entry(*kind)
            .or_insert_with(|| breakdown.clone());
    }
    merged
}
