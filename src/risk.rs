//! Empirical risk measures on return samples.
//!
//! Quantiles use linear interpolation between order statistics, so that
//! `quantile(x, q)` matches the common `(n - 1) * q` definition.

/// Arithmetic mean; NaN for an empty slice.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Probability-weighted mean. Lengths must match.
pub fn weighted_mean(values: &[f64], probabilities: &[f64]) -> f64 {
    values
        .iter()
        .zip(probabilities.iter())
        .map(|(v, p)| v * p)
        .sum()
}

/// Linearly interpolated quantile, `q` in `[0, 1]`.
///
/// Returns NaN for an empty sample or any NaN observation.
pub fn quantile(values: &[f64], q: f64) -> f64 {
    if values.is_empty() || values.iter().any(|v| v.is_nan()) {
        return f64::NAN;
    }

    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let q = q.clamp(0.0, 1.0);
    let position = (sorted.len() - 1) as f64 * q;
    let lower = position.floor() as usize;
    let upper = position.ceil() as usize;
    let fraction = position - lower as f64;

    sorted[lower] + (sorted[upper] - sorted[lower]) * fraction
}

/// Linearly interpolated percentile, `p` in `[0, 100]`.
pub fn percentile(values: &[f64], p: f64) -> f64 {
    quantile(values, p / 100.0)
}

/// Empirical Value-at-Risk at level `beta`, expressed as a positive loss:
/// `-quantile(returns, 1 - beta)`.
pub fn value_at_risk(returns: &[f64], beta: f64) -> f64 {
    -quantile(returns, 1.0 - beta)
}

/// Empirical Conditional Value-at-Risk via the Rockafellar-Uryasev identity
/// evaluated at the empirical VaR.
pub fn conditional_value_at_risk(returns: &[f64], beta: f64) -> f64 {
    let var = value_at_risk(returns, beta);
    let shortfall: Vec<f64> = returns.iter().map(|r| (-r - var).max(0.0)).collect();
    var + mean(&shortfall) / (1.0 - beta)
}

/// Sample covariance with `ddof = 1`.
pub fn covariance(x: &[f64], y: &[f64]) -> f64 {
    let n = x.len().min(y.len());
    if n < 2 {
        return f64::NAN;
    }
    let mx = mean(&x[..n]);
    let my = mean(&y[..n]);
    x.iter()
        .zip(y.iter())
        .map(|(a, b)| (a - mx) * (b - my))
        .sum::<f64>()
        / (n - 1) as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quantile_interpolates() {
        let values = vec![4.0, 1.0, 3.0, 2.0];
        assert!((quantile(&values, 0.0) - 1.0).abs() < 1e-12);
        assert!((quantile(&values, 1.0) - 4.0).abs() < 1e-12);
        assert!((quantile(&values, 0.5) - 2.5).abs() < 1e-12);
        // (n - 1) * 0.1 = 0.3 -> 1.0 + 0.3 * (2.0 - 1.0)
        assert!((quantile(&values, 0.1) - 1.3).abs() < 1e-12);
        assert!((percentile(&values, 90.0) - 3.7).abs() < 1e-12);
    }

    #[test]
    fn test_quantile_degenerate() {
        assert!(quantile(&[], 0.5).is_nan());
        assert!(quantile(&[1.0, f64::NAN], 0.5).is_nan());
        assert_eq!(quantile(&[2.0], 0.3), 2.0);
    }

    #[test]
    fn test_var_and_cvar() {
        let returns: Vec<f64> = (1..=10).map(|i| i as f64 / 100.0 - 0.06).collect();
        // returns = -0.05 .. 0.04
        let var = value_at_risk(&returns, 0.9);
        assert!((var - 0.041).abs() < 1e-12);

        let cvar = conditional_value_at_risk(&returns, 0.9);
        // only -0.05 exceeds the VaR, by 0.009, spread over 10 observations
        assert!((cvar - (0.041 + 0.0009 / 0.1)).abs() < 1e-12);
        assert!(cvar >= var);
    }

    #[test]
    fn test_weighted_mean_and_covariance() {
        assert!((weighted_mean(&[1.0, 3.0], &[0.25, 0.75]) - 2.5).abs() < 1e-12);

        let x = vec![1.0, 2.0, 3.0];
        let y = vec![2.0, 4.0, 6.0];
        assert!((covariance(&x, &y) - 2.0).abs() < 1e-12);
        assert!(covariance(&[1.0], &[1.0]).is_nan());
    }
}
