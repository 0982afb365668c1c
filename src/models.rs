//! Data models for the cohort pipeline.
//!
//! This module holds the typed analysis requests, the calendar month
//! type used by time-series bucketing, the count histograms produced by
//! the bucketizers, and the final report.

use crate::error::{Error, Result};
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The analyses every party knows how to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisKind {
    AgePyramid,
    TimeSeries,
    DiagnosisCoincidence,
}

impl AnalysisKind {
    pub fn name(&self) -> &'static str {
        match self {
            AnalysisKind::AgePyramid => "Age pyramid",
            AnalysisKind::TimeSeries => "Time series",
            AnalysisKind::DiagnosisCoincidence => "Diagnosis coincidence",
        }
    }
}

impl fmt::Display for AnalysisKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Condition families available for the time-series analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimeSeriesVariant {
    #[serde(rename = "covid-19")]
    Covid19,
    #[serde(rename = "cf-pku")]
    CfPku,
}

impl fmt::Display for TimeSeriesVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeSeriesVariant::Covid19 => write!(f, "covid-19"),
            TimeSeriesVariant::CfPku => write!(f, "cf-pku"),
        }
    }
}

/// A calendar month, ordered chronologically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct YearMonth {
    year: i32,
    month: u32,
}

impl YearMonth {
    /// The month a calendar date falls in.
    pub fn of(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    /// The following calendar month.
    pub fn succ(self) -> Self {
        if self.month == 12 {
            Self {
                year: self.year + 1,
                month: 1,
            }
        } else {
            Self {
                year: self.year,
                month: self.month + 1,
            }
        }
    }

    /// Signed number of months from `self` to `later`.
    pub fn months_until(self, later: YearMonth) -> i64 {
        (i64::from(later.year) - i64::from(self.year)) * 12 + i64::from(later.month)
            - i64::from(self.month)
    }
}

impl fmt::Display for YearMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for YearMonth {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let bytes = s.as_bytes();
        if bytes.len() != 7 || bytes[4] != b'-' {
            return Err(Error::format(format!(
                "month '{}' must have the form YYYY-MM",
                s
            )));
        }

        let date = NaiveDate::parse_from_str(&format!("{}-01", s), "%Y-%m-%d")
            .map_err(|e| Error::format(format!("month '{}' is not a valid YYYY-MM: {}", s, e)))?;

        Ok(Self::of(date))
    }
}

/// A fully typed analysis request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnalysisRequest {
    AgePyramid {
        diagnosis: String,
    },
    TimeSeries {
        variant: TimeSeriesVariant,
        start: YearMonth,
        end: YearMonth,
    },
    DiagnosisCoincidence,
}

impl AnalysisRequest {
    /// Builds a time-series request, rejecting ranges that end before they start.
    pub fn time_series(variant: TimeSeriesVariant, start: YearMonth, end: YearMonth) -> Result<Self> {
        if end < start {
            return Err(Error::format(format!(
                "time range ends ({}) before it starts ({})",
                end, start
            )));
        }
        Ok(AnalysisRequest::TimeSeries {
            variant,
            start,
            end,
        })
    }

    pub fn kind(&self) -> AnalysisKind {
        match self {
            AnalysisRequest::AgePyramid { .. } => AnalysisKind::AgePyramid,
            AnalysisRequest::TimeSeries { .. } => AnalysisKind::TimeSeries,
            AnalysisRequest::DiagnosisCoincidence => AnalysisKind::DiagnosisCoincidence,
        }
    }
}

/// One named count vector aligned with a histogram's labels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountSeries {
    pub name: String,
    pub counts: Vec<u32>,
}

impl CountSeries {
    pub fn new(name: impl Into<String>, counts: Vec<u32>) -> Self {
        Self {
            name: name.into(),
            counts,
        }
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().map(|&c| u64::from(c)).sum()
    }
}

/// Bucket labels shared by one or more count series.
///
/// For a fixed request every party derives the same labels in the same
/// order without talking to anyone; the aggregation rounds pair vectors
/// purely by position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Histogram {
    /// Column header for the labels ("age", "month").
    pub label_header: &'static str,
    pub labels: Vec<String>,
    pub series: Vec<CountSeries>,
}

impl Histogram {
    /// Looks up the count of `label` in the series called `series`.
    #[cfg(test)]
    pub fn count(&self, series: &str, label: &str) -> Option<u32> {
        let position = self.labels.iter().position(|l| l == label)?;
        self.series
            .iter()
            .find(|s| s.name == series)
            .and_then(|s| s.counts.get(position).copied())
    }

    /// Sum over every series and bucket.
    pub fn total(&self) -> u64 {
        self.series.iter().map(CountSeries::total).sum()
    }
}

/// The assembled, suppressed result of one analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub title: String,
    pub kind: AnalysisKind,
    pub label_header: String,
    pub labels: Vec<String>,
    pub series: Vec<CountSeries>,
    /// Aggregated counts at or below this value were replaced by zero.
    pub suppression_threshold: u32,
    /// Number of parties in the roster.
    pub parties: usize,
    pub generated_at: DateTime<Utc>,
}

impl Report {
    /// Aggregate-level suppression note. Never names individual cells.
    pub fn suppression_note(&self) -> String {
        if self.suppression_threshold == 0 {
            "suppression disabled (k = 0)".to_string()
        } else {
            format!("counts ≤ {} suppressed", self.suppression_threshold)
        }
    }

    #[cfg(test)]
    pub fn count(&self, series: &str, label: &str) -> Option<u32> {
        let position = self.labels.iter().position(|l| l == label)?;
        self.series
            .iter()
            .find(|s| s.name == series)
            .and_then(|s| s.counts.get(position).copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_year_month_parse_and_display() {
        let month: YearMonth = "2021-03".parse().unwrap();
        assert_eq!(month, YearMonth::of(NaiveDate::from_ymd_opt(2021, 3, 17).unwrap()));
        assert_eq!(month.to_string(), "2021-03");
    }

    #[test]
    fn test_year_month_rejects_malformed() {
        assert!("2021-3".parse::<YearMonth>().is_err());
        assert!("2021-13".parse::<YearMonth>().is_err());
        assert!("202103".parse::<YearMonth>().is_err());
        assert!("March".parse::<YearMonth>().is_err());
    }

    #[test]
    fn test_year_month_succ_wraps_year() {
        let dec: YearMonth = "2020-12".parse().unwrap();
        assert_eq!(dec.succ().to_string(), "2021-01");
        assert_eq!(dec.months_until("2021-03".parse().unwrap()), 3);
        assert_eq!(dec.months_until("2020-10".parse().unwrap()), -2);
    }

    #[test]
    fn test_inverted_time_range_rejected() {
        let start: YearMonth = "2021-03".parse().unwrap();
        let end: YearMonth = "2021-01".parse().unwrap();
        let err = AnalysisRequest::time_series(TimeSeriesVariant::Covid19, start, end).unwrap_err();
        assert!(matches!(err, Error::Format(_)));

        let single = AnalysisRequest::time_series(TimeSeriesVariant::CfPku, start, start).unwrap();
        assert_eq!(single.kind(), AnalysisKind::TimeSeries);
    }

    #[test]
    fn test_histogram_lookup() {
        let histogram = Histogram {
            label_header: "month",
            labels: vec!["2021-01".to_string(), "2021-02".to_string()],
            series: vec![CountSeries::new("count", vec![4, 7])],
        };
        assert_eq!(histogram.count("count", "2021-02"), Some(7));
        assert_eq!(histogram.count("count", "2021-03"), None);
        assert_eq!(histogram.total(), 11);
    }

    #[test]
    fn test_suppression_note() {
        let mut report = Report {
            title: "t".to_string(),
            kind: AnalysisKind::AgePyramid,
            label_header: "age".to_string(),
            labels: vec![],
            series: vec![],
            suppression_threshold: 5,
            parties: 2,
            generated_at: Utc::now(),
        };
        assert_eq!(report.suppression_note(), "counts ≤ 5 suppressed");

        report.suppression_threshold = 0;
        assert!(report.suppression_note().contains("disabled"));
    }
}
