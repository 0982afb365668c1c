//! Extraction adapters.
//!
//! Each analysis kind fetches one fixed projection from the extraction
//! service and turns the raw CSV into the typed rows its bucketizer
//! consumes. Tables live only until bucketization and are never persisted.

pub mod fhir;
pub mod query;
pub mod table;

pub use fhir::{DataSource, FhirClient, FhirSettings};
pub use query::QueryDescriptor;
pub use table::RawTable;

use crate::error::{Error, Result};
use crate::models::TimeSeriesVariant;
use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime};
use tracing::{debug, warn};

/// One patient row of the age-pyramid extraction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgeRecord {
    /// Gender code as delivered ("male", "female", "other", ...).
    pub gender: String,
    pub age: u32,
}

/// Typed age-pyramid table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AgeTable {
    pub records: Vec<AgeRecord>,
    /// Rows without a birth year.
    pub skipped: usize,
}

/// One condition row of the time-series extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordedEvent {
    pub recorded: NaiveDate,
}

/// Typed time-series table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventTable {
    pub events: Vec<RecordedEvent>,
    /// Rows without a recorded date.
    pub skipped: usize,
}

/// Fetches the age-pyramid projection and derives ages.
pub async fn fetch_age_table<S: DataSource>(
    source: &S,
    diagnosis: &str,
    reference_year: i32,
) -> Result<AgeTable> {
    let raw = source.fetch(&query::age_pyramid(diagnosis)?).await?;
    age_table(&raw, reference_year)
}

/// Fetches the time-series projection and parses recorded dates.
pub async fn fetch_event_table<S: DataSource>(
    source: &S,
    variant: TimeSeriesVariant,
) -> Result<EventTable> {
    let raw = source.fetch(&query::time_series(variant)).await?;
    event_table(&raw)
}

/// Fetches the diagnosis-coincidence projection, keeping only complete rows.
pub async fn fetch_coincidence_table<S: DataSource>(source: &S) -> Result<RawTable> {
    let raw = source.fetch(&query::diagnosis_coincidence()).await?;
    let total = raw.len();
    let complete = raw.drop_incomplete();
    debug!("Kept {} of {} coincidence rows", complete.len(), total);
    Ok(complete)
}

/// Derives `age = reference_year - birth_year` for every row.
///
/// Rows with an empty birth year cannot be placed in any bucket and are
/// skipped; a birth year that is not a number, or lies after the
/// reference year, means the projection is not what we asked for.
pub fn age_table(raw: &RawTable, reference_year: i32) -> Result<AgeTable> {
    raw.require_columns(&[query::GENDER_COLUMN, query::BIRTH_YEAR_COLUMN])?;

    let mut table = AgeTable::default();
    let rows = raw
        .column(query::GENDER_COLUMN)?
        .zip(raw.column(query::BIRTH_YEAR_COLUMN)?);

    for (gender, birth_year) in rows {
        let Some(birth_year) = birth_year else {
            table.skipped += 1;
            continue;
        };

        let year = parse_birth_year(birth_year)?;
        let age = u32::try_from(reference_year - year).map_err(|_| {
            Error::schema(format!(
                "birth year {} lies after the reference year {}",
                year, reference_year
            ))
        })?;

        table.records.push(AgeRecord {
            gender: gender.unwrap_or_default().to_string(),
            age,
        });
    }

    if table.skipped > 0 {
        warn!("Skipped {} patient rows without a birth year", table.skipped);
    }
    Ok(table)
}

/// Parses the recorded date of every row.
pub fn event_table(raw: &RawTable) -> Result<EventTable> {
    let mut table = EventTable::default();

    for value in raw.column(query::RECORDED_DATE_COLUMN)? {
        match value {
            Some(value) => table.events.push(RecordedEvent {
                recorded: parse_recorded_date(value)?,
            }),
            None => table.skipped += 1,
        }
    }

    if table.skipped > 0 {
        warn!("Skipped {} condition rows without a recorded date", table.skipped);
    }
    Ok(table)
}

/// Accepts a bare `YYYY` (what the projection keeps) or a full
/// `YYYY-MM-DD` birth date.
fn parse_birth_year(value: &str) -> Result<i32> {
    if value.len() == 4 && value.bytes().all(|b| b.is_ascii_digit()) {
        return value
            .parse::<i32>()
            .map_err(|_| Error::schema(format!("birth year '{}' is not a number", value)));
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map(|date| date.year())
        .map_err(|_| Error::schema(format!("birth date '{}' is neither YYYY nor YYYY-MM-DD", value)))
}

/// Accepts the date shapes FHIR allows for `recordedDate`. The calendar
/// date is taken as written, without converting time zones, so that the
/// same record falls into the same month at every party.
pub fn parse_recorded_date(value: &str) -> Result<NaiveDate> {
    let value = value.trim();

    if let Ok(timestamp) = DateTime::parse_from_rfc3339(value) {
        return Ok(timestamp.date_naive());
    }
    if let Ok(timestamp) = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f") {
        return Ok(timestamp.date());
    }
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        return Ok(date);
    }
    if value.len() == 7 {
        if let Ok(date) = NaiveDate::parse_from_str(&format!("{}-01", value), "%Y-%m-%d") {
            return Ok(date);
        }
    }
    if value.len() == 4 {
        if let Ok(date) = NaiveDate::parse_from_str(&format!("{}-01-01", value), "%Y-%m-%d") {
            return Ok(date);
        }
    }

    Err(Error::schema(format!("recorded date '{}' is not a FHIR date", value)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(csv: &str) -> RawTable {
        RawTable::from_csv(csv).unwrap()
    }

    #[test]
    fn test_age_derivation() {
        let raw = table("id,gender,birthDate\n1,male,1980\n2,female,2024\n3,,1950\n");
        let ages = age_table(&raw, 2024).unwrap();
        assert_eq!(
            ages.records,
            vec![
                AgeRecord { gender: "male".to_string(), age: 44 },
                AgeRecord { gender: "female".to_string(), age: 0 },
                AgeRecord { gender: String::new(), age: 74 },
            ]
        );
        assert_eq!(ages.skipped, 0);
    }

    #[test]
    fn test_age_rows_without_birth_year_are_skipped() {
        let raw = table("id,gender,birthDate\n1,male,\n2,female,1990\n");
        let ages = age_table(&raw, 2020).unwrap();
        assert_eq!(ages.records.len(), 1);
        assert_eq!(ages.skipped, 1);
    }

    #[test]
    fn test_age_full_birth_date_accepted() {
        let raw = table("id,gender,birthDate\n1,male,1990-05-17\n");
        assert_eq!(age_table(&raw, 2020).unwrap().records[0].age, 30);
    }

    #[test]
    fn test_age_rejects_bad_birth_years() {
        let raw = table("id,gender,birthDate\n1,male,19x0\n");
        assert!(matches!(age_table(&raw, 2020), Err(Error::Schema(_))));

        let raw = table("id,gender,birthDate\n1,male,2030\n");
        assert!(matches!(age_table(&raw, 2020), Err(Error::Schema(_))));
    }

    #[test]
    fn test_age_rejects_padded_birth_years() {
        for value in ["19801", "1980abc", "1980-13-01", "980", "1980-05"] {
            let raw = table(&format!("id,gender,birthDate\n1,male,{}\n", value));
            assert!(
                matches!(age_table(&raw, 2020), Err(Error::Schema(_))),
                "{} was accepted",
                value
            );
        }
    }

    #[test]
    fn test_age_requires_columns() {
        let raw = table("id,sex,birthDate\n1,male,1980\n");
        assert!(matches!(age_table(&raw, 2020), Err(Error::Schema(_))));
    }

    #[test]
    fn test_recorded_date_shapes() {
        let expected = NaiveDate::from_ymd_opt(2021, 2, 14).unwrap();
        for value in [
            "2021-02-14",
            "2021-02-14T08:30:00",
            "2021-02-14T08:30:00.250",
            "2021-02-14T23:30:00-05:00",
            "2021-02-14T00:10:00+01:00",
        ] {
            assert_eq!(parse_recorded_date(value).unwrap(), expected, "{}", value);
        }
        assert_eq!(
            parse_recorded_date("2021-02").unwrap(),
            NaiveDate::from_ymd_opt(2021, 2, 1).unwrap()
        );
        assert_eq!(
            parse_recorded_date("2021").unwrap(),
            NaiveDate::from_ymd_opt(2021, 1, 1).unwrap()
        );
        assert!(parse_recorded_date("14.02.2021").is_err());
    }

    #[test]
    fn test_event_table_skips_missing_dates() {
        let raw = table("condition_id,recordedDate\nc1,2021-01-03\nc2,\nc3,2021-03-31T10:00:00Z\n");
        let events = event_table(&raw).unwrap();
        assert_eq!(events.events.len(), 2);
        assert_eq!(events.skipped, 1);
    }
}
