//! Conversion of polars columns into the arrays consumed by the label transforms.

use ndarray::Array1;
use polars::prelude::*;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SeriesError {
    #[error("polars error: {0}")]
    Polars(#[from] PolarsError),
    #[error("column '{0}' contains missing values")]
    Nulls(String),
    #[error("column '{name}' has type {found}, expected a numeric column")]
    WrongType { name: String, found: String },
    #[error("column '{name}' contains the non-finite duration {value}")]
    NonFinite { name: String, value: f64 },
    #[error("column '{name}' contains {value}, which is not a non-negative integer event code")]
    InvalidEventCode { name: String, value: f64 },
}

fn numeric_values(series: &Series) -> Result<Vec<f64>, SeriesError> {
    let name = series.name().to_string();
    if series.null_count() > 0 {
        return Err(SeriesError::Nulls(name));
    }
    let wrong_type = || SeriesError::WrongType {
        name: name.clone(),
        found: format!("{:?}", series.dtype()),
    };
    let casted = series.cast(&DataType::Float64).map_err(|_| wrong_type())?;
    // Non-strict casts turn unparsable entries into nulls.
    if casted.null_count() > 0 {
        return Err(wrong_type());
    }
    Ok(casted.f64()?.into_no_null_iter().collect())
}

/// Durations as `f64`; every value must be finite.
pub fn durations_from_series(series: &Series) -> Result<Array1<f64>, SeriesError> {
    let values = numeric_values(series)?;
    if let Some(&value) = values.iter().find(|v| !v.is_finite()) {
        return Err(SeriesError::NonFinite {
            name: series.name().to_string(),
            value,
        });
    }
    Ok(Array1::from_vec(values))
}

/// Event codes as `u32`: `0` for censored, `1..` for the event type. Boolean and
/// float columns are accepted as long as every value is a whole number.
pub fn events_from_series(series: &Series) -> Result<Array1<u32>, SeriesError> {
    numeric_values(series)?
        .into_iter()
        .map(|value| {
            if value.is_finite() && value >= 0.0 && value.fract() == 0.0 && value <= u32::MAX as f64
            {
                Ok(value as u32)
            } else {
                Err(SeriesError::InvalidEventCode {
                    name: series.name().to_string(),
                    value,
                })
            }
        })
        .collect::<Result<Vec<_>, _>>()
        .map(Array1::from_vec)
}
