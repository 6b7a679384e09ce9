//! Portfolio weights and no-lookahead wealth path simulation.
//!
//! Wealth paths are indexed to 100 at period 0 and have one more point than
//! there are return observations. Between rebalances the holdings drift with
//! realised returns.

use crate::error::{Result, TrackerError};
use crate::types::ReturnPanel;
use serde::{Deserialize, Serialize};

/// Starting level of every wealth index.
pub const INITIAL_WEALTH: f64 = 100.0;

const BUDGET_TOLERANCE: f64 = 1e-6;
const SHORT_TOLERANCE: f64 = -1e-8;

/// Fully invested long-only weight vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Portfolio {
    weights: Vec<f64>,
}

impl Portfolio {
    /// Validate `Σw = 1` and `w ≥ 0` within solver tolerance.
    pub fn new(weights: Vec<f64>) -> Result<Self> {
        if weights.is_empty() {
            return Err(TrackerError::InvalidInput(
                "portfolio has no weights".to_string(),
            ));
        }

        let total: f64 = weights.iter().sum();
        if (total - 1.0).abs() > BUDGET_TOLERANCE {
            return Err(TrackerError::InvalidInput(format!(
                "weights sum to {}, expected 1",
                total
            )));
        }

        if let Some(w) = weights.iter().find(|w| **w < SHORT_TOLERANCE || w.is_nan()) {
            return Err(TrackerError::InvalidInput(format!(
                "negative weight {} in long-only portfolio",
                w
            )));
        }

        Ok(Self { weights })
    }

    /// Equal weights over `n` assets.
    pub fn equal_weight(n: usize) -> Result<Self> {
        if n == 0 {
            return Err(TrackerError::InvalidInput(
                "portfolio has no weights".to_string(),
            ));
        }
        Self::new(vec![1.0 / n as f64; n])
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    /// Indices and weights above `threshold`, largest first.
    pub fn holdings(&self, threshold: f64) -> Vec<(usize, f64)> {
        let mut held: Vec<(usize, f64)> = self
            .weights
            .iter()
            .copied()
            .enumerate()
            .filter(|(_, w)| *w > threshold)
            .collect();
        held.sort_by(|a, b| b.1.total_cmp(&a.1));
        held
    }
}

/// When holdings are reset to the target weights.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum RebalancePolicy {
    /// Buy and hold; weights drift for the whole path.
    #[default]
    Never,
    /// Reset to target every `n` periods.
    Every(usize),
}

impl RebalancePolicy {
    fn rebalances_after(&self, period: usize) -> bool {
        match self {
            RebalancePolicy::Never => false,
            RebalancePolicy::Every(n) => *n > 0 && (period + 1) % n == 0,
        }
    }
}

/// Wealth path of `portfolio` over the return rows, starting at 100.
///
/// Period `t` earns `current · returns[t]`, after which the current weights
/// drift to `current ⊙ (1 + returns[t])`, renormalised.
pub fn simulate_wealth(
    portfolio: &Portfolio,
    returns: &[Vec<f64>],
    policy: RebalancePolicy,
) -> Result<Vec<f64>> {
    let target = portfolio.weights();
    let mut current = target.to_vec();
    let mut path = Vec::with_capacity(returns.len() + 1);
    path.push(INITIAL_WEALTH);

    for (t, row) in returns.iter().enumerate() {
        if row.len() != current.len() {
            return Err(TrackerError::DataAlignment(format!(
                "return row {} has {} assets, portfolio has {}",
                t,
                row.len(),
                current.len()
            )));
        }

        let growth: f64 = row.iter().zip(current.iter()).map(|(r, w)| r * w).sum();
        let last = path[path.len() - 1];
        path.push(last * (1.0 + growth));

        if policy.rebalances_after(t) {
            current.copy_from_slice(target);
            continue;
        }

        for (w, r) in current.iter_mut().zip(row.iter()) {
            *w *= 1.0 + r;
        }
        let total: f64 = current.iter().sum();
        if total != 0.0 {
            for w in current.iter_mut() {
                *w /= total;
            }
        }
    }

    Ok(path)
}

/// Wealth path of a panel's assets, with an optional constant risk-free
/// column prepended (the portfolio's weight 0 then belongs to it).
pub fn simulate_panel(
    portfolio: &Portfolio,
    panel: &ReturnPanel,
    risk_free: Option<f64>,
    policy: RebalancePolicy,
) -> Result<Vec<f64>> {
    match risk_free {
        Some(rate) => {
            let rows: Vec<Vec<f64>> = panel
                .assets()
                .iter()
                .map(|row| std::iter::once(rate).chain(row.iter().copied()).collect())
                .collect();
            simulate_wealth(portfolio, &rows, policy)
        }
        None => simulate_wealth(portfolio, panel.assets(), policy),
    }
}

/// Wealth index of a single return series, shifted by `alpha` per period.
///
/// With `alpha = 0` this is the plain benchmark index; otherwise it is the
/// enhanced benchmark the portfolio is meant to beat.
pub fn index_path(returns: &[f64], alpha: f64) -> Vec<f64> {
    let mut path = Vec::with_capacity(returns.len() + 1);
    path.push(INITIAL_WEALTH);
    for r in returns {
        let last = path[path.len() - 1];
        path.push(last * (1.0 + r + alpha));
    }
    path
}

/// Single-period returns `P[t+1] / P[t] - 1` of a wealth path.
pub fn path_returns(path: &[f64]) -> Vec<f64> {
    path.windows(2).map(|w| w[1] / w[0] - 1.0).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_portfolio_validation() {
        assert!(Portfolio::new(vec![0.5, 0.5]).is_ok());
        assert!(Portfolio::new(vec![0.5, 0.5 + 1e-9, -1e-9]).is_ok());
        assert!(Portfolio::new(vec![0.6, 0.6]).is_err());
        assert!(Portfolio::new(vec![1.1, -0.1]).is_err());
        assert!(Portfolio::new(vec![]).is_err());
    }

    #[test]
    fn test_holdings_sorted() {
        let p = Portfolio::new(vec![0.2, 0.0, 0.8]).unwrap();
        assert_eq!(p.holdings(1e-6), vec![(2, 0.8), (0, 0.2)]);
    }

    #[test]
    fn test_weights_drift_without_rebalance() {
        let p = Portfolio::new(vec![0.5, 0.5]).unwrap();
        let returns = vec![vec![0.10, 0.0], vec![0.0, 0.10]];
        let path = simulate_wealth(&p, &returns, RebalancePolicy::Never).unwrap();

        assert_eq!(path.len(), 3);
        assert!((path[1] - 105.0).abs() < 1e-10);
        // weights drifted to 55/105 and 50/105
        let expected = 105.0 * (1.0 + 0.10 * 50.0 / 105.0);
        assert!((path[2] - expected).abs() < 1e-10);
    }

    #[test]
    fn test_rebalancing_resets_weights() {
        let p = Portfolio::new(vec![0.5, 0.5]).unwrap();
        let returns = vec![vec![0.10, 0.0], vec![0.0, 0.10]];
        let path = simulate_wealth(&p, &returns, RebalancePolicy::Every(1)).unwrap();
        assert!((path[2] - 105.0 * 1.05).abs() < 1e-10);
    }

    #[test]
    fn test_buy_and_hold_equals_weighted_asset_paths() {
        let p = Portfolio::new(vec![0.25, 0.75]).unwrap();
        let returns = vec![vec![0.02, -0.01], vec![-0.03, 0.04], vec![0.01, 0.0]];
        let path = simulate_wealth(&p, &returns, RebalancePolicy::Never).unwrap();

        let a = index_path(&[0.02, -0.03, 0.01], 0.0);
        let b = index_path(&[-0.01, 0.04, 0.0], 0.0);
        let expected = 0.25 * a[3] + 0.75 * b[3];
        assert!((path[3] - expected).abs() < 1e-10);
    }

    #[test]
    fn test_risk_free_column() {
        let panel = ReturnPanel::from_returns(vec![0.0, 0.0], vec![vec![0.05], vec![0.05]]).unwrap();
        let p = Portfolio::new(vec![1.0, 0.0]).unwrap();
        let path = simulate_panel(&p, &panel, Some(0.01), RebalancePolicy::Never).unwrap();
        assert!((path[2] - 100.0 * 1.01 * 1.01).abs() < 1e-10);

        assert!(simulate_panel(&p, &panel, None, RebalancePolicy::Never).is_err());
    }

    #[test]
    fn test_index_and_path_returns() {
        let path = index_path(&[0.01, -0.02], 0.001);
        assert!((path[1] - 101.1).abs() < 1e-10);
        let r = path_returns(&path);
        assert!((r[0] - 0.011).abs() < 1e-12);
        assert!((r[1] - (-0.019)).abs() < 1e-12);
    }
}
