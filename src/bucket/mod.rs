//! Bucketizers.
//!
//! Pure, deterministic transforms from a typed table to fixed-length count
//! vectors. Identical input and parameters always yield identical labels,
//! order, and counts: no randomness, no clock, no process state. Every
//! party relies on this to line up its vectors with everyone else's
//! without ever exchanging labels.

pub mod age;
pub mod time_series;

use crate::extract::{AgeTable, EventTable};
use crate::models::{Histogram, YearMonth};

/// Male and female age-band vectors, in that order.
pub fn age_pyramid(table: &AgeTable) -> Histogram {
    age::bucketize(table)
}

/// One monthly count vector spanning `start..=end`.
pub fn monthly(table: &EventTable, start: YearMonth, end: YearMonth) -> Histogram {
    time_series::bucketize(table, start, end)
}
