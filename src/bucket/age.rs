//! Age-pyramid bucketing.

use crate::extract::AgeTable;
use crate::models::{CountSeries, Histogram};

/// Number of age bands.
pub const AGE_BANDS: usize = 10;

/// Gender code counted in the male series. Every other value, including
/// an empty one, is counted as female.
pub const MALE: &str = "male";

pub const MALE_SERIES: &str = "male";
pub const FEMALE_SERIES: &str = "female";

/// Band labels: `[0, 10]`, `(10, 20]`, ..., `(80, 90]`, `(90, inf)`.
pub fn labels() -> Vec<String> {
    (0..AGE_BANDS)
        .map(|band| match band {
            0 => "[0, 10]".to_string(),
            b if b == AGE_BANDS - 1 => format!("({}, inf)", b * 10),
            b => format!("({}, {}]", b * 10, (b + 1) * 10),
        })
        .collect()
}

/// Index of the band containing `age`. The first band is closed at both
/// ends, every other band is open below and closed above, and the last
/// band is unbounded.
pub fn band(age: u32) -> usize {
    if age <= 10 {
        0
    } else {
        (((age - 1) / 10) as usize).min(AGE_BANDS - 1)
    }
}

/// Counts records per gender and age band. The male round always comes
/// first.
pub fn bucketize(table: &AgeTable) -> Histogram {
    let mut male = vec![0u32; AGE_BANDS];
    let mut female = vec![0u32; AGE_BANDS];

    for record in &table.records {
        let counts = if record.gender == MALE {
            &mut male
        } else {
            &mut female
        };
        counts[band(record.age)] += 1;
    }

    Histogram {
        label_header: "age",
        labels: labels(),
        series: vec![
            CountSeries::new(MALE_SERIES, male),
            CountSeries::new(FEMALE_SERIES, female),
        ],
    }
}
