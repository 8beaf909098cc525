//! Merging national infographic values into state documents.

use chrono::NaiveDate;

use crate::error::PipelineError;
use crate::models::{BreakdownKind, Metric, OutputDocument, PartialSeries};

/// Metrics the national infographic reports for every state.
pub const RECONCILED_METRICS: [Metric; 5] = [
    Metric::Confirmed,
    Metric::Tested,
    Metric::Deaths,
    Metric::CurrentHospitalized,
    Metric::CurrentIcu,
];

/// Backfill a state document from `national` values.
///
/// Metrics the document lacks are added as all-null arrays first. For each
/// national date:
/// - a date on the state axis fills only the state's `None` values;
/// - a date after the state's last date is appended: totals get `None`
///   before backfilling, breakdowns repeat their last value;
/// - any other date is [`PipelineError::OutOfOrderDate`].
pub fn reconcile(
    mut doc: OutputDocument,
    national: &PartialSeries,
) -> Result<OutputDocument, PipelineError> {
    // ---
    let len = doc.timeseries_dates.len();
    for metric in RECONCILED_METRICS {
        doc.total.entry(metric).or_insert_with(|| vec![None; len]);
    }

    for (date, record) in national {
        let index = match doc.timeseries_dates.binary_search(date) {
            Ok(index) => index,
            Err(_) => {
                if let Some(last) = doc.timeseries_dates.last().copied() {
                    if *date <= last {
                        return Err(PipelineError::OutOfOrderDate { date: *date, last });
                    }
                }
                append_date(&mut doc, *date)
            }
        };

        for metric in RECONCILED_METRICS {
            if let Some(slot) = doc.total.get_mut(&metric).and_then(|v| v.get_mut(index)) {
                if slot.is_none() {
                    *slot = record.get(metric);
                }
            }
        }
    }

    doc.validate()?;
    Ok(doc)
}

fn append_date(doc: &mut OutputDocument, date: NaiveDate) -> usize {
    // ---
    doc.timeseries_dates.push(date);
    for values in doc.total.values_mut() {
        values.push(None);
    }
    for kind in [BreakdownKind::AgeGroups, BreakdownKind::Sources, BreakdownKind::Lga] {
        if let Some(series) = doc.breakdown_slot(kind).as_mut() {
            for values in series.subseries.values_mut() {
                let last = values.last().copied().unwrap_or(0);
                values.push(last);
            }
        }
    }
    doc.timeseries_dates.len() - 1
}

/// Document for a state with no scraped data of its own.
pub fn national_only(national: &PartialSeries) -> OutputDocument {
    // ---
    let mut doc = OutputDocument {
        timeseries_dates: national.keys().copied().collect(),
        ..Default::default()
    };
    for metric in RECONCILED_METRICS {
        let values = national.values().map(|r| r.get(metric)).collect();
        doc.total.insert(metric, values);
    }
    doc
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::models::{record_mut, BreakdownSeries};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn state_doc() -> OutputDocument {
        let mut doc = OutputDocument {
            timeseries_dates: vec![date(2020, 4, 1), date(2020, 4, 2)],
            ..Default::default()
        };
        doc.total.insert(Metric::Confirmed, vec![Some(10), None]);
        doc.total.insert(Metric::Recovered, vec![Some(1), Some(2)]);
        doc.age_groups = Some(BreakdownSeries {
            keys: vec!["20-29".to_string()],
            subseries: [("20-29".to_string(), vec![3, 4])].into_iter().collect(),
        });
        doc
    }

    #[test]
    fn test_backfills_nulls_and_appends_later_dates() {
        // ---
        let mut national = PartialSeries::new();
        let d2 = record_mut(&mut national, date(2020, 4, 2));
        d2.set(Metric::Confirmed, 12);
        d2.set(Metric::CurrentIcu, 2);
        record_mut(&mut national, date(2020, 4, 1)).set(Metric::Confirmed, 99);
        record_mut(&mut national, date(2020, 4, 3)).set(Metric::Deaths, 1);

        let doc = reconcile(state_doc(), &national).unwrap();

        assert_eq!(doc.timeseries_dates.len(), 3);
        assert_eq!(doc.timeseries_dates[2], date(2020, 4, 3));
        assert_eq!(doc.total[&Metric::Confirmed], vec![Some(10), Some(12), None]);
        assert_eq!(doc.total[&Metric::CurrentIcu], vec![None, Some(2), None]);
        assert_eq!(doc.total[&Metric::Deaths], vec![None, None, Some(1)]);
        assert_eq!(doc.total[&Metric::Recovered], vec![Some(1), Some(2), None]);
        assert_eq!(doc.age_groups.unwrap().subseries["20-29"], vec![3, 4, 4]);
    }

    #[test]
    fn test_earlier_missing_date_is_an_error() {
        // ---
        let mut national = PartialSeries::new();
        record_mut(&mut national, date(2020, 3, 31)).set(Metric::Confirmed, 1);

        let err = reconcile(state_doc(), &national).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::OutOfOrderDate { date: d, last } if d == date(2020, 3, 31) && last == date(2020, 4, 2)
        ));
    }

    #[test]
    fn test_gap_inside_state_axis_is_an_error() {
        // ---
        let mut doc = state_doc();
        doc.timeseries_dates[1] = date(2020, 4, 5);
        let mut national = PartialSeries::new();
        record_mut(&mut national, date(2020, 4, 3)).set(Metric::Confirmed, 1);

        assert!(reconcile(doc, &national).is_err());
    }

    #[test]
    fn test_national_only_document() {
        // ---
        let mut national = PartialSeries::new();
        record_mut(&mut national, date(2020, 4, 5)).set(Metric::Confirmed, 5);
        record_mut(&mut national, date(2020, 4, 6)).set(Metric::Tested, 60);

        let doc = national_only(&national);
        assert_eq!(doc.timeseries_dates, vec![date(2020, 4, 5), date(2020, 4, 6)]);
        assert_eq!(doc.total.len(), RECONCILED_METRICS.len());
        assert_eq!(doc.total[&Metric::Tested], vec![None, Some(60)]);
        assert!(doc.validate().is_ok());
    }
}
