use chrono::NaiveDate;

use crate::models::StatusInterval;

/// True iff some active interval covers `date`. Interval order does not matter,
/// and overlapping intervals are read permissively: any active cover wins.
pub fn is_active(intervals: &[StatusInterval], date: NaiveDate) -> bool {
    intervals.iter().any(|interval| {
        interval.is_active
            && interval.start_date <= date
            && interval.end_date.map_or(true, |end| end >= date)
    })
}

/// True iff some active interval overlaps the closed range `[start, end]`.
pub fn active_during(intervals: &[StatusInterval], start: NaiveDate, end: NaiveDate) -> bool {
    intervals.iter().any(|interval| {
        interval.is_active
            && interval.start_date <= end
            && interval.end_date.map_or(true, |until| until >= start)
    })
}
