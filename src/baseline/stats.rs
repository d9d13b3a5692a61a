//! Robust center and dispersion: median and median absolute deviation.

use crate::baseline::BaselineError;

/// Order-statistic median; even counts average the two middle values.
pub fn median(values: &[f64]) -> Result<f64, BaselineError> {
    if values.is_empty() {
        return Err(BaselineError::EmptyInput);
    }

    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);

    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 1 {
        Ok(sorted[mid])
    } else {
        Ok((sorted[mid - 1] + sorted[mid]) / 2.0)
    }
}

/// Compute `(median, mad)` where `mad = median(|x - median(x)|)`.
///
/// The returned MAD is never below `min_mad`: a raw MAD under the floor is
/// replaced by `min_mad` exactly. This keeps every baseline usable as a
/// divisor. NaN or infinite inputs are rejected.
pub fn compute_center_and_dispersion(values: &[f64], min_mad: f64) -> Result<(f64, f64), BaselineError> {
    if let Some(index) = values.iter().position(|v| !v.is_finite()) {
        return Err(BaselineError::NonFiniteInput { index });
    }

    let center = median(values)?;
    let abs_devs: Vec<f64> = values.iter().map(|v| (v - center).abs()).collect();
    let raw_mad = median(&abs_devs)?;

    let mad = if raw_mad < min_mad { min_mad } else { raw_mad };
    Ok((center, mad))
}
