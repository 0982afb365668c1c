//! Result assembly and rendering.

pub mod generator;

pub use generator::{generate_json_report, generate_markdown_report, generate_text_report};

use crate::models::{AnalysisKind, CountSeries, Report};
use chrono::{DateTime, Utc};

/// Descriptive fields of a report that do not come from the aggregation.
#[derive(Debug, Clone)]
pub struct ReportHeader {
    pub title: String,
    pub kind: AnalysisKind,
    pub label_header: String,
    pub suppression_threshold: u32,
    pub parties: usize,
    pub generated_at: DateTime<Utc>,
}

/// Joins the bucket labels with the aggregated series. All series share
/// the label set and are matched to it by index.
pub fn combine(header: ReportHeader, labels: Vec<String>, series: Vec<CountSeries>) -> Report {
    Report {
        title: header.title,
        kind: header.kind,
        label_header: header.label_header,
        labels,
        series,
        suppression_threshold: header.suppression_threshold,
        parties: header.parties,
        generated_at: header.generated_at,
    }
}
