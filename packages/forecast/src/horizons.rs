//! Horizon list parsing and validation.

use crate::ForecastError;

/// Parses a comma separated horizon list such as `"5,10,15"`.
///
/// Blank tokens are ignored. Values are not range checked here; see
/// [`validate_horizons`].
///
/// # Errors
///
/// * [`ForecastError::InvalidHorizonsFormat`] if any token is not an integer
/// * [`ForecastError::NoHorizons`] if the list has no tokens
pub fn parse_horizons(input: &str) -> Result<Vec<i64>, ForecastError> {
    let horizons = input
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(|t| {
            t.parse::<i64>()
                .map_err(|_| ForecastError::InvalidHorizonsFormat {
                    token: t.to_string(),
                })
        })
        .collect::<Result<Vec<_>, _>>()?;

    if horizons.is_empty() {
        return Err(ForecastError::NoHorizons);
    }
    Ok(horizons)
}

/// Deduplicates and sorts horizons, checking each lies in `1..=max_minutes`.
///
/// # Errors
///
/// * [`ForecastError::NoHorizons`] if `horizons` is empty
/// * [`ForecastError::InvalidHorizon`] for the first out-of-range value
pub fn validate_horizons(horizons: &[i64], max_minutes: u32) -> Result<Vec<u32>, ForecastError> {
    if horizons.is_empty() {
        return Err(ForecastError::NoHorizons);
    }

    let mut valid = horizons
        .iter()
        .map(|&h| {
            u32::try_from(h)
                .ok()
                .filter(|m| (1..=max_minutes).contains(m))
                .ok_or(ForecastError::InvalidHorizon {
                    horizon: h,
                    max: max_minutes,
                })
        })
        .collect::<Result<Vec<_>, _>>()?;

    valid.sort_unstable();
    valid.dedup();
    Ok(valid)
}
