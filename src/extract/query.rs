//! Fixed remote query descriptors.
//!
//! Each analysis kind asks the extraction service for exactly one
//! projection. The bucketizers read columns by name, so these strings
//! must stay byte-for-byte stable across parties and releases.

use crate::error::{Error, Result};
use crate::models::{AnalysisKind, TimeSeriesVariant};

const AGE_PYRAMID_COLUMNS: &str = "id%3AgetIdPart(id)%40join(%22%20%22)%2Cgender%3Agender%40join(%22%2C%20%22)%2CbirthDate%3AbirthDate.substring(0%5C%2C%204)%40join(%22%2C%20%22)";

const COVID_19_PATH: &str = "/fhir/Condition?code=J12.8,U07.1,U08.9,U09.9&__columns=condition_id%3AgetIdPart(id)%40join(%22%2C%20%22)%2Ccode%3Acode.coding.where(system%3D'http%3A%2F%2Ffhir.de%2FCodeSystem%2Fdimdi%2Ficd-10-gm').code%40join(%22%2C%20%22)%2Cdisplay%3Acode.coding.where(system%3D'http%3A%2F%2Ffhir.de%2FCodeSystem%2Fdimdi%2Ficd-10-gm').display%40join(%22%2C%20%22)%2Cpatient_id%3AgetIdPart(subject.reference)%40join(%22%2C%20%22)%2Cencounter_id%3AgetIdPart(encounter.reference)%40join(%22%2C%20%22)%2CrecordedDate%3ArecordedDate%40join(%22%2C%20%22)";

const CF_PKU_PATH: &str = "/fhir/Condition?code=E70.0,E70.1,E84.0,E84.1,E84.8,E84.80,E84.87,E84.88,E84.9&__columns=condition_id%3AgetIdPart(id)%40join(%22%2C%20%22)%2Ccode%3Acode.coding.where(system%3D'http%3A%2F%2Ffhir.de%2FCodeSystem%2Fdimdi%2Ficd-10-gm').code%40join(%22%2C%20%22)%2CrecordedDate%3ACondition.recordedDate%40join(%22%20%22)%2Cpatient_id%3AgetIdPart(subject.reference)%40join(%22%2C%20%22)%2Cencounter_id%3AgetIdPart(encounter.reference)%40join(%22%2C%20%22)%2Cdisplay%3Acode.coding.where(system%3D'http%3A%2F%2Ffhir.de%2FCodeSystem%2Fdimdi%2Ficd-10-gm').display%40join(%22%2C%20%22)%2Cname_use%3Asubject.resolve().name.use%40join(%22%2C%20%22)%2Cname_family%3Asubject.resolve().name.family%40join(%22%2C%20%22)%2Cname_given%3Asubject.resolve().name.given%40join(%22%2C%20%22)%2Cgender%3Asubject.resolve().gender%40join(%22%2C%20%22)%2Cbirthdate%3Asubject.resolve().birthdate%40join(%22%2C%20%22)";

const DIAGNOSIS_COINCIDENCE_PATH: &str = "/fhir/Patient?_has:Condition:subject:code=E84.0,E84.1,E84.8,E84.80,E84.87,E84.88,E84.9&_has:Condition:subject:code=O30,O30.0,O30.1,O30.2,O30.8,O30.9&_revinclude=Condition:subject&__columns=id%3AgetIdPart(Condition.id)%40join(%22%2C%20%22)%2Csubject%3AgetIdPart(Condition.subject.reference)%40join(%22%2C%20%22)%2Cicd10%3Acode.coding.where(system%3D'http%3A%2F%2Ffhir.de%2FCodeSystem%2Fdimdi%2Ficd-10-gm').extension('http%3A%2F%2Ffhir.de%2FStructureDefinition%2Ficd-10-gm-primaercode').value.code%40join(%22%2C%20%22)%2Cgender%3ACondition.subject.resolve().gender%40join(%22%2C%20%22)";

/// Column names the age-pyramid post-processing reads.
pub const GENDER_COLUMN: &str = "gender";
pub const BIRTH_YEAR_COLUMN: &str = "birthDate";
/// Column name the time-series post-processing reads.
pub const RECORDED_DATE_COLUMN: &str = "recordedDate";

/// A versioned request against the extraction service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryDescriptor {
    pub kind: AnalysisKind,
    /// Path and query string, starting with `/fhir/`.
    pub path: String,
    /// Columns the downstream stages cannot do without.
    pub required_columns: &'static [&'static str],
}

impl QueryDescriptor {
    /// Joins the descriptor with the service address the same way every
    /// party does: `<server>:<port><path>`.
    pub fn url(&self, server: &str, port: u16) -> String {
        format!("{}:{}{}", server.trim_end_matches('/'), port, self.path)
    }
}

/// Patients with a condition coded as `diagnosis`, projected to id,
/// gender, and birth year.
pub fn age_pyramid(diagnosis: &str) -> Result<QueryDescriptor> {
    validate_diagnosis(diagnosis)?;
    Ok(QueryDescriptor {
        kind: AnalysisKind::AgePyramid,
        path: format!(
            "/fhir/Patient?_has:Condition:subject:code={}&__columns={}",
            diagnosis, AGE_PYRAMID_COLUMNS
        ),
        required_columns: &[GENDER_COLUMN, BIRTH_YEAR_COLUMN],
    })
}

/// Conditions of the variant's code family with their recorded dates.
pub fn time_series(variant: TimeSeriesVariant) -> QueryDescriptor {
    let path = match variant {
        TimeSeriesVariant::Covid19 => COVID_19_PATH,
        TimeSeriesVariant::CfPku => CF_PKU_PATH,
    };
    QueryDescriptor {
        kind: AnalysisKind::TimeSeries,
        path: path.to_string(),
        required_columns: &[RECORDED_DATE_COLUMN],
    }
}

/// Cystic fibrosis patients with a pregnancy condition, one row per condition.
pub fn diagnosis_coincidence() -> QueryDescriptor {
    QueryDescriptor {
        kind: AnalysisKind::DiagnosisCoincidence,
        path: DIAGNOSIS_COINCIDENCE_PATH.to_string(),
        required_columns: &["id", "subject", "icd10", GENDER_COLUMN],
    }
}

/// Diagnosis codes are spliced into the query path, so only ICD-10 style
/// characters are allowed.
fn validate_diagnosis(diagnosis: &str) -> Result<()> {
    let valid = !diagnosis.is_empty()
        && diagnosis
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | ',' | '-'));
    if valid {
        Ok(())
    } else {
        Err(Error::format(format!(
            "diagnosis code '{}' may only contain letters, digits, '.', ',' and '-'",
            diagnosis
        )))
    }
}
