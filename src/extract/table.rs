//! Tabular data returned by the extraction service.

use crate::error::{Error, Result};
use std::fmt;

/// Rows shown when a table is printed.
const DISPLAY_ROWS: usize = 20;

/// A CSV table with named columns. Empty cells are `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawTable {
    columns: Vec<String>,
    rows: Vec<Vec<Option<String>>>,
}

impl RawTable {
    /// Parses a CSV document whose first record is the header.
    pub fn from_csv(body: &str) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_reader(body.as_bytes());

        let columns: Vec<String> = reader
            .headers()
            .map_err(|e| Error::schema(format!("cannot read CSV header: {}", e)))?
            .iter()
            .map(str::to_string)
            .collect();

        let mut rows = Vec::new();
        for (line, record) in reader.records().enumerate() {
            let record =
                record.map_err(|e| Error::schema(format!("malformed CSV row {}: {}", line + 1, e)))?;
            rows.push(
                record
                    .iter()
                    .map(|cell| (!cell.is_empty()).then(|| cell.to_string()))
                    .collect(),
            );
        }

        Ok(Self { columns, rows })
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Fails with a schema error naming every missing column.
    pub fn require_columns(&self, required: &[&str]) -> Result<()> {
        let missing: Vec<&str> = required
            .iter()
            .copied()
            .filter(|name| self.column_index(name).is_none())
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(Error::schema(format!(
                "missing column(s) {} (got: {})",
                missing.join(", "),
                self.columns.join(", ")
            )))
        }
    }

    /// Iterates the cells of one column.
    pub fn column(&self, name: &str) -> Result<impl Iterator<Item = Option<&str>> + '_> {
        let index = self
            .column_index(name)
            .ok_or_else(|| Error::schema(format!("missing column {}", name)))?;
        Ok(self.rows.iter().map(move |row| row[index].as_deref()))
    }

    /// Keeps only rows where every cell has a value.
    pub fn drop_incomplete(mut self) -> Self {
        self.rows.retain(|row| row.iter().all(Option::is_some));
        self
    }
}

impl fmt::Display for RawTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shown = &self.rows[..self.rows.len().min(DISPLAY_ROWS)];

        let mut widths: Vec<usize> = self.columns.iter().map(|c| c.chars().count()).collect();
        for row in shown {
            for (width, cell) in widths.iter_mut().zip(row) {
                let len = cell.as_deref().map_or(3, |c| c.chars().count());
                *width = (*width).max(len);
            }
        }

        for (column, width) in self.columns.iter().zip(&widths) {
            write!(f, "{:<width$}  ", column, width = *width)?;
        }
        writeln!(f)?;

        for row in shown {
            for (cell, width) in row.iter().zip(&widths) {
                write!(f, "{:<width$}  ", cell.as_deref().unwrap_or("NaN"), width = *width)?;
            }
            writeln!(f)?;
        }

        if self.rows.len() > shown.len() {
            writeln!(f, "… {} more rows", self.rows.len() - shown.len())?;
        }
        write!(f, "[{} rows x {} columns]", self.rows.len(), self.columns.len())
    }
}
