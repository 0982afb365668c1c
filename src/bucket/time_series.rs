//! Monthly incidence bucketing.

use crate::extract::EventTable;
use crate::models::{CountSeries, Histogram, YearMonth};

pub const COUNT_SERIES: &str = "count";

/// Every calendar month from `start` through `end`, both inclusive.
/// Empty when `end` precedes `start`; requests are validated before they
/// get here.
pub fn months(start: YearMonth, end: YearMonth) -> Vec<YearMonth> {
    let mut months = Vec::new();
    let mut month = start;
    while month <= end {
        months.push(month);
        month = month.succ();
    }
    months
}

/// Counts events per month of `[start, end]`; events outside the range
/// are not counted anywhere.
pub fn bucketize(table: &EventTable, start: YearMonth, end: YearMonth) -> Histogram {
    let months = months(start, end);
    let mut counts = vec![0u32; months.len()];

    for event in &table.events {
        let offset = start.months_until(YearMonth::of(event.recorded));
        if let Ok(index) = usize::try_from(offset) {
            if let Some(count) = counts.get_mut(index) {
                *count += 1;
            }
        }
    }

    Histogram {
        label_header: "month",
        labels: months.iter().map(YearMonth::to_string).collect(),
        series: vec![CountSeries::new(COUNT_SERIES, counts)],
    }
}
