//! Dense output arrays from a filled series.

use std::collections::BTreeSet;

use crate::models::{BreakdownKind, BreakdownSeries, Metric, OutputDocument, TimeSeries};

/// Build the output document for `metrics` and `breakdowns`.
///
/// Every declared metric gets one entry per date (`None` when unknown).
/// Every declared breakdown gets the sorted union of its bucket labels and
/// one dense array per label, with 0 on days the label was not reported.
pub fn reshape(series: &TimeSeries, metrics: &[Metric], breakdowns: &[BreakdownKind]) -> OutputDocument {
    // ---
    let mut doc = OutputDocument {
        timeseries_dates: series.dates.clone(),
        ..Default::default()
    };

    for metric in metrics {
        let values = series.records.iter().map(|r| r.get(*metric)).collect();
        doc.total.insert(*metric, values);
    }

    for kind in breakdowns {
        *doc.breakdown_slot(*kind) = Some(breakdown_series(series, *kind));
    }

    doc
}

fn breakdown_series(series: &TimeSeries, kind: BreakdownKind) -> BreakdownSeries {
    // ---
    let keys: BTreeSet<&String> = series
        .records
        .iter()
        .filter_map(|r| r.breakdown(kind))
        .flat_map(|b| b.keys())
        .collect();

    let subseries = keys
        .iter()
        .map(|key| {
            let values = series
                .records
                .iter()
                .map(|r| r.breakdown(kind).and_then(|b| b.get(*key)).copied().unwrap_or(0))
                .collect();
            ((*key).clone(), values)
        })
        .collect();

    BreakdownSeries {
        keys: keys.into_iter().cloned().collect(),
        subseries,
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::models::{record_mut, PartialSeries};
    use crate::series::fill;
    use chrono::NaiveDate;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_breakdown_keys_are_unioned_with_zero_default() {
        // ---
        let mut series = PartialSeries::new();
        record_mut(&mut series, date(2020, 3, 1))
            .breakdown_mut(BreakdownKind::AgeGroups)
            .insert("20-29".to_string(), 1);
        record_mut(&mut series, date(2020, 3, 2))
            .breakdown_mut(BreakdownKind::AgeGroups)
            .insert("30-39".to_string(), 2);

        let doc = reshape(&fill(&series), &[], &[BreakdownKind::AgeGroups]);
        let ages = doc.age_groups.as_ref().unwrap();

        assert_eq!(ages.keys, vec!["20-29", "30-39"]);
        assert_eq!(ages.subseries["20-29"], vec![1, 0]);
        assert_eq!(ages.subseries["30-39"], vec![0, 2]);
        assert!(doc.validate().is_ok());
    }

    #[test]
    fn test_declared_metrics_are_null_filled() {
        // ---
        let mut series = PartialSeries::new();
        record_mut(&mut series, date(2020, 3, 1)).set(Metric::Confirmed, 4);
        record_mut(&mut series, date(2020, 3, 2)).set(Metric::Deaths, 1);

        let doc = reshape(
            &fill(&series),
            &[Metric::Confirmed, Metric::Deaths, Metric::Tested],
            &[BreakdownKind::Sources],
        );

        assert_eq!(doc.total[&Metric::Confirmed], vec![Some(4), Some(4)]);
        assert_eq!(doc.total[&Metric::Deaths], vec![None, Some(1)]);
        assert_eq!(doc.total[&Metric::Tested], vec![None, None]);
        assert_eq!(doc.sources, Some(BreakdownSeries::default()));
        assert_eq!(doc.age_groups, None);
    }
}
