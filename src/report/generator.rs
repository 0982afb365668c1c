//! Report rendering for standard output.
//!
//! Reports are printed as aligned text (default), a Markdown table, or
//! JSON. Suppression is only ever described for the report as a whole.

use crate::extract::RawTable;
use crate::models::{AnalysisKind, Report};
use anyhow::Result;

/// Generate the plain-text report.
pub fn generate_text_report(report: &Report) -> String {
    let mut output = String::new();

    output.push_str(&format!(
        "Result of {} computation between {} parties:\n",
        report.kind, report.parties
    ));
    output.push_str(&report.title);
    output.push_str("\n\n");

    let headers: Vec<&str> = std::iter::once(report.label_header.as_str())
        .chain(report.series.iter().map(|s| s.name.as_str()))
        .collect();
    let rows: Vec<Vec<String>> = report
        .labels
        .iter()
        .enumerate()
        .map(|(i, label)| {
            std::iter::once(label.clone())
                .chain(report.series.iter().map(|s| cell(s.counts.get(i))))
                .collect()
        })
        .collect();

    let mut widths: Vec<usize> = headers.iter().map(|h| h.chars().count()).collect();
    for row in &rows {
        for (width, value) in widths.iter_mut().zip(row) {
            *width = (*width).max(value.chars().count());
        }
    }

    output.push_str(&format_row(headers.iter().copied(), &widths));
    for row in &rows {
        output.push_str(&format_row(row.iter().map(String::as_str), &widths));
    }

    output.push_str(&format!("\nNote: {}\n", report.suppression_note()));
    output
}

/// Generate a Markdown report.
pub fn generate_markdown_report(report: &Report) -> String {
    let mut output = String::new();

    output.push_str(&format!("# {}\n\n", report.title));
    output.push_str(&generate_metadata_section(report));

    output.push_str(&format!("| {} |", report.label_header));
    for series in &report.series {
        output.push_str(&format!(" {} |", series.name));
    }
    output.push('\n');
    output.push_str("|:---|");
    for _ in &report.series {
        output.push_str("---:|");
    }
    output.push('\n');

    for (i, label) in report.labels.iter().enumerate() {
        output.push_str(&format!("| {} |", label));
        for series in &report.series {
            output.push_str(&format!(" {} |", cell(series.counts.get(i))));
        }
        output.push('\n');
    }

    output.push_str(&format!("\n> Note: {}\n", report.suppression_note()));
    output
}

/// Generate a JSON report.
pub fn generate_json_report(report: &Report) -> Result<String> {
    serde_json::to_string_pretty(report).map_err(Into::into)
}

/// Render the placeholder output of an analysis that only extracts data.
pub fn generate_unimplemented_notice(kind: AnalysisKind, table: &RawTable) -> String {
    format!(
        "{} analysis is not implemented yet. Extracted data:\n\n{}\n",
        kind, table
    )
}

fn generate_metadata_section(report: &Report) -> String {
    let mut section = String::new();

    section.push_str(&format!("- **Analysis:** {}\n", report.kind));
    section.push_str(&format!("- **Parties:** {}\n", report.parties));
    section.push_str(&format!(
        "- **Generated:** {}\n",
        report.generated_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    section.push_str(&format!("- **Suppression:** {}\n\n", report.suppression_note()));

    section
}

fn cell(count: Option<&u32>) -> String {
    count.map_or_else(|| "-".to_string(), u32::to_string)
}

fn format_row<'a>(cells: impl Iterator<Item = &'a str>, widths: &[usize]) -> String {
    let mut line = String::new();
    for (i, (value, width)) in cells.zip(widths).enumerate() {
        if i == 0 {
            line.push_str(&format!("{:<width$}", value, width = *width));
        } else {
            line.push_str(&format!("  {:>width$}", value, width = *width));
        }
    }
    line.push('\n');
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CountSeries;
    use chrono::Utc;

    fn create_test_report() -> Report {
        Report {
            title: "Age pyramid for diagnosis I11.00 across 2 parties".to_string(),
            kind: AnalysisKind::AgePyramid,
            label_header: "age".to_string(),
            labels: vec!["[0, 10]".to_string(), "(10, 20]".to_string()],
            series: vec![
                CountSeries::new("male", vec![12, 0]),
                CountSeries::new("female", vec![0, 6]),
            ],
            suppression_threshold: 5,
            parties: 2,
            generated_at: Utc::now(),
        }
    }

    #[test]
    fn test_generate_text_report() {
        let text = generate_text_report(&create_test_report());

        assert!(text.starts_with("Result of Age pyramid computation between 2 parties:"));
        assert!(text.contains("age       male  female\n"));
        assert!(text.contains("[0, 10]     12       0\n"));
        assert!(text.contains("(10, 20]     0       6\n"));
        assert!(text.contains("Note: counts ≤ 5 suppressed"));
    }

    #[test]
    fn test_generate_markdown_report() {
        let markdown = generate_markdown_report(&create_test_report());

        assert!(markdown.contains("# Age pyramid for diagnosis I11.00"));
        assert!(markdown.contains("| age | male | female |"));
        assert!(markdown.contains("| [0, 10] | 12 | 0 |"));
        assert!(markdown.contains("- **Parties:** 2"));
    }

    #[test]
    fn test_generate_json_report() {
        let json = generate_json_report(&create_test_report()).unwrap();

        assert!(json.contains("\"suppression_threshold\": 5"));
        assert!(json.contains("\"kind\": \"age_pyramid\""));
        assert!(json.contains("\"labels\""));
    }

    #[test]
    fn test_unimplemented_notice_shows_table() {
        let table = RawTable::from_csv("id,subject,icd10,gender\nc1,p1,E84.0,female\n").unwrap();
        let notice = generate_unimplemented_notice(AnalysisKind::DiagnosisCoincidence, &table);

        assert!(notice.starts_with("Diagnosis coincidence analysis is not implemented yet"));
        assert!(notice.contains("E84.0"));
    }
}
