//! Core data types: the return panel, excess returns, model parameters and
//! solved result rows.

use crate::error::{Result, TrackerError};
use chrono::{Datelike, Duration, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};
use std::ops::Range;

/// Ordered scenario set of benchmark and asset returns.
///
/// Row `t` holds the single-period returns observed on `dates[t]`. Asset
/// returns are stored row-major, one `Vec` of length `n_assets` per date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReturnPanel {
    dates: Vec<NaiveDate>,
    benchmark: Vec<f64>,
    assets: Vec<Vec<f64>>,
    tickers: Vec<String>,
}

impl ReturnPanel {
    /// Create a panel, checking that all series are aligned.
    pub fn new(
        dates: Vec<NaiveDate>,
        benchmark: Vec<f64>,
        assets: Vec<Vec<f64>>,
        tickers: Vec<String>,
    ) -> Result<Self> {
        if dates.len() != benchmark.len() || dates.len() != assets.len() {
            return Err(TrackerError::DataAlignment(format!(
                "{} dates, {} benchmark returns and {} asset rows",
                dates.len(),
                benchmark.len(),
                assets.len()
            )));
        }

        if let Some(pos) = dates.windows(2).position(|w| w[0] >= w[1]) {
            return Err(TrackerError::DataAlignment(format!(
                "dates are not strictly increasing at {}",
                dates[pos + 1]
            )));
        }

        let n_assets = tickers.len();
        if let Some(t) = assets.iter().position(|row| row.len() != n_assets) {
            return Err(TrackerError::DataAlignment(format!(
                "row {} has {} asset returns, expected {}",
                t,
                assets[t].len(),
                n_assets
            )));
        }

        Ok(Self {
            dates,
            benchmark,
            assets,
            tickers,
        })
    }

    /// Create a panel from bare return series, stamping consecutive weekdays
    /// starting on 2000-01-03 and naming assets `A1..AN`.
    pub fn from_returns(benchmark: Vec<f64>, assets: Vec<Vec<f64>>) -> Result<Self> {
        let n_assets = assets.first().map(|row| row.len()).unwrap_or(0);
        let tickers = (1..=n_assets).map(|i| format!("A{}", i)).collect();
        let dates = weekdays_from(default_start_date(), benchmark.len());
        Self::new(dates, benchmark, assets, tickers)
    }

    /// Join a benchmark series and an asset series observed on their own
    /// calendars. Both must carry exactly the same dates.
    pub fn align(
        benchmark: &[(NaiveDate, f64)],
        assets: &[(NaiveDate, Vec<f64>)],
        tickers: Vec<String>,
    ) -> Result<Self> {
        if benchmark.len() != assets.len() {
            return Err(TrackerError::DataAlignment(format!(
                "benchmark has {} observations, assets have {}",
                benchmark.len(),
                assets.len()
            )));
        }

        for ((bench_date, _), (asset_date, _)) in benchmark.iter().zip(assets.iter()) {
            if bench_date != asset_date {
                return Err(TrackerError::DataAlignment(format!(
                    "benchmark date {} does not match asset date {}",
                    bench_date, asset_date
                )));
            }
        }

        Self::new(
            benchmark.iter().map(|(d, _)| *d).collect(),
            benchmark.iter().map(|(_, r)| *r).collect(),
            assets.iter().map(|(_, row)| row.clone()).collect(),
            tickers,
        )
    }

    /// Number of observations.
    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    /// Number of assets (excluding any risk-free column).
    pub fn n_assets(&self) -> usize {
        self.tickers.len()
    }

    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    pub fn benchmark(&self) -> &[f64] {
        &self.benchmark
    }

    pub fn assets(&self) -> &[Vec<f64>] {
        &self.assets
    }

    pub fn tickers(&self) -> &[String] {
        &self.tickers
    }

    /// Copy out the observations in `range`.
    pub fn slice(&self, range: Range<usize>) -> Result<Self> {
        if range.start > range.end || range.end > self.len() {
            return Err(TrackerError::InvalidInput(format!(
                "slice {}..{} out of bounds for panel of length {}",
                range.start,
                range.end,
                self.len()
            )));
        }

        Ok(Self {
            dates: self.dates[range.clone()].to_vec(),
            benchmark: self.benchmark[range.clone()].to_vec(),
            assets: self.assets[range].to_vec(),
            tickers: self.tickers.clone(),
        })
    }

    /// Observations dated within `[start, end]`.
    pub fn between(&self, start: NaiveDate, end: NaiveDate) -> Self {
        let from = self.dates.partition_point(|d| *d < start);
        let to = self.dates.partition_point(|d| *d <= end);
        let to = to.max(from);

        Self {
            dates: self.dates[from..to].to_vec(),
            benchmark: self.benchmark[from..to].to_vec(),
            assets: self.assets[from..to].to_vec(),
            tickers: self.tickers.clone(),
        }
    }

    /// Compound daily observations into ISO-week observations, stamped with
    /// the last trading day of each week.
    pub fn to_weekly(&self) -> Self {
        let mut dates = Vec::new();
        let mut benchmark = Vec::new();
        let mut assets: Vec<Vec<f64>> = Vec::new();
        let mut current_week = None;

        for t in 0..self.len() {
            let week = self.dates[t].iso_week();
            let key = (week.year(), week.week());

            if current_week != Some(key) {
                current_week = Some(key);
                dates.push(self.dates[t]);
                benchmark.push(self.benchmark[t]);
                assets.push(self.assets[t].clone());
                continue;
            }

            let last = dates.len() - 1;
            dates[last] = self.dates[t];
            benchmark[last] = (1.0 + benchmark[last]) * (1.0 + self.benchmark[t]) - 1.0;
            for (acc, r) in assets[last].iter_mut().zip(self.assets[t].iter()) {
                *acc = (1.0 + *acc) * (1.0 + r) - 1.0;
            }
        }

        Self {
            dates,
            benchmark,
            assets,
            tickers: self.tickers.clone(),
        }
    }
}

fn default_start_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2000, 1, 3).unwrap_or_default()
}

/// `count` consecutive weekdays beginning at `start` (or the next weekday).
pub(crate) fn weekdays_from(start: NaiveDate, count: usize) -> Vec<NaiveDate> {
    let mut dates = Vec::with_capacity(count);
    let mut day = start;
    while dates.len() < count {
        if !matches!(day.weekday(), Weekday::Sat | Weekday::Sun) {
            dates.push(day);
        }
        day += Duration::days(1);
    }
    dates
}

/// How probability mass is spread over the scenarios.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ScenarioWeighting {
    /// Uniform weights 1/T.
    #[default]
    Equal,
    /// Geometric decay with the given half-life in observations; the most
    /// recent scenario carries the largest weight.
    ExponentialDecay { half_life: f64 },
}

impl ScenarioWeighting {
    /// Probability vector of length `t`, summing to one.
    pub fn probabilities(&self, t: usize) -> Vec<f64> {
        if t == 0 {
            return Vec::new();
        }

        match self {
            ScenarioWeighting::Equal => vec![1.0 / t as f64; t],
            ScenarioWeighting::ExponentialDecay { half_life } => {
                let decay = 0.5_f64.powf(1.0 / half_life.max(f64::MIN_POSITIVE));
                let raw: Vec<f64> = (0..t).map(|i| decay.powi((t - 1 - i) as i32)).collect();
                let total: f64 = raw.iter().sum();
                raw.into_iter().map(|p| p / total).collect()
            }
        }
    }
}

/// Excess return matrix ξ (T × M) over an enhanced benchmark.
///
/// When a risk-free rate is given, column 0 is the risk-free asset and the
/// remaining columns follow the panel's asset order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExcessReturns {
    rows: Vec<Vec<f64>>,
    n_assets: usize,
}

impl ExcessReturns {
    /// ξ_t = assets_t − (benchmark_t + alpha), with an optional constant
    /// risk-free column prepended to the assets.
    pub fn compute(
        assets: &[Vec<f64>],
        benchmark: &[f64],
        alpha: f64,
        risk_free: Option<f64>,
    ) -> Result<Self> {
        if assets.len() != benchmark.len() {
            return Err(TrackerError::DataAlignment(format!(
                "{} asset rows but {} benchmark returns",
                assets.len(),
                benchmark.len()
            )));
        }

        let base_assets = assets.first().map(|row| row.len()).unwrap_or(0);
        let n_assets = base_assets + usize::from(risk_free.is_some());

        let rows = assets
            .iter()
            .zip(benchmark.iter())
            .map(|(row, bench)| {
                let target = bench + alpha;
                risk_free
                    .iter()
                    .chain(row.iter())
                    .map(|r| r - target)
                    .collect::<Vec<f64>>()
            })
            .collect::<Vec<_>>();

        if let Some(t) = rows.iter().position(|row| row.len() != n_assets) {
            return Err(TrackerError::DataAlignment(format!(
                "asset row {} has {} entries, expected {}",
                t,
                rows[t].len(),
                n_assets
            )));
        }

        Ok(Self { rows, n_assets })
    }

    /// Excess returns of a whole panel.
    pub fn from_panel(panel: &ReturnPanel, alpha: f64, risk_free: Option<f64>) -> Result<Self> {
        Self::compute(panel.assets(), panel.benchmark(), alpha, risk_free)
    }

    /// Number of scenarios T.
    pub fn n_scenarios(&self) -> usize {
        self.rows.len()
    }

    /// Number of portfolio weights M.
    pub fn n_assets(&self) -> usize {
        self.n_assets
    }

    pub fn rows(&self) -> &[Vec<f64>] {
        &self.rows
    }

    /// Portfolio excess returns ξw.
    pub fn portfolio_returns(&self, weights: &[f64]) -> Result<Vec<f64>> {
        if weights.len() != self.n_assets {
            return Err(TrackerError::InvalidInput(format!(
                "{} weights for {} assets",
                weights.len(),
                self.n_assets
            )));
        }

        Ok(self
            .rows
            .iter()
            .map(|row| row.iter().zip(weights.iter()).map(|(x, w)| x * w).sum())
            .collect())
    }
}

/// One point of the (β, ρ, ε) parameter space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelParameters {
    /// CVaR quantile level β ∈ (0, 1).
    pub beta: f64,
    /// CVaR risk aversion ρ ≥ 0.
    pub rho: f64,
    /// Wasserstein radius ε ≥ 0. Zero is the sample-average baseline.
    pub epsilon: f64,
}

impl ModelParameters {
    pub fn new(beta: f64, rho: f64, epsilon: f64) -> Self {
        Self { beta, rho, epsilon }
    }

    /// Check the domain of each parameter.
    pub fn validate(&self) -> Result<()> {
        if !(self.beta > 0.0 && self.beta < 1.0) {
            return Err(TrackerError::InvalidInput(format!(
                "beta must lie in (0, 1), got {}",
                self.beta
            )));
        }
        if !(self.rho >= 0.0) || !self.rho.is_finite() {
            return Err(TrackerError::InvalidInput(format!(
                "rho must be non-negative, got {}",
                self.rho
            )));
        }
        if !(self.epsilon >= 0.0) || !self.epsilon.is_finite() {
            return Err(TrackerError::InvalidInput(format!(
                "epsilon must be non-negative, got {}",
                self.epsilon
            )));
        }
        Ok(())
    }
}

/// A solved grid point with diagnostics recomputed from the weights.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRow {
    /// Optimal objective value reported by the solver.
    pub objective: f64,
    pub epsilon: f64,
    pub rho: f64,
    pub beta: f64,
    /// π-weighted mean of the portfolio excess return.
    pub excess_return: f64,
    /// π-weighted mean absolute portfolio excess return.
    pub tracking_error: f64,
    /// Empirical VaR of the portfolio excess return.
    pub var: f64,
    /// Empirical CVaR of the portfolio excess return.
    pub cvar: f64,
    /// Level of the VaR auxiliary ν at the optimum.
    pub nu: f64,
    pub weights: Vec<f64>,
}

impl ResultRow {
    pub fn parameters(&self) -> ModelParameters {
        ModelParameters::new(self.beta, self.rho, self.epsilon)
    }
}

/// Ordered rows produced by one sweep.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultSet {
    rows: Vec<ResultRow>,
}

impl ResultSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, row: ResultRow) {
        self.rows.push(row);
    }

    pub fn rows(&self) -> &[ResultRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ResultRow> {
        self.rows.iter()
    }

    /// First row solved at exactly this radius.
    pub fn find_epsilon(&self, epsilon: f64) -> Option<&ResultRow> {
        self.rows.iter().find(|row| row.epsilon == epsilon)
    }

    /// Rows solved at a strictly positive radius, with their row index.
    pub fn robust_rows(&self) -> impl Iterator<Item = (usize, &ResultRow)> {
        self.rows
            .iter()
            .enumerate()
            .filter(|(_, row)| row.epsilon != 0.0)
    }

    /// Objective values in row order.
    pub fn objectives(&self) -> Vec<f64> {
        self.rows.iter().map(|row| row.objective).collect()
    }
}

impl IntoIterator for ResultSet {
    type Item = ResultRow;
    type IntoIter = std::vec::IntoIter<ResultRow>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_panel() -> ReturnPanel {
        ReturnPanel::from_returns(
            vec![0.01, -0.02, 0.005, 0.0],
            vec![
                vec![0.02, 0.0],
                vec![-0.01, -0.03],
                vec![0.0, 0.01],
                vec![0.01, -0.01],
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_panel_alignment_checks() {
        let dates = weekdays_from(default_start_date(), 3);
        let result = ReturnPanel::new(
            dates,
            vec![0.0, 0.0],
            vec![vec![0.0], vec![0.0], vec![0.0]],
            vec!["A".to_string()],
        );
        assert!(matches!(result, Err(TrackerError::DataAlignment(_))));
    }

    #[test]
    fn test_align_rejects_date_mismatch() {
        let d1 = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        let d2 = NaiveDate::from_ymd_opt(2024, 1, 3).unwrap();
        let d3 = NaiveDate::from_ymd_opt(2024, 1, 4).unwrap();

        let benchmark = vec![(d1, 0.01), (d2, 0.02)];
        let assets = vec![(d1, vec![0.0]), (d3, vec![0.01])];
        let result = ReturnPanel::align(&benchmark, &assets, vec!["X".to_string()]);
        assert!(matches!(result, Err(TrackerError::DataAlignment(_))));

        let assets = vec![(d1, vec![0.0]), (d2, vec![0.01])];
        let panel = ReturnPanel::align(&benchmark, &assets, vec!["X".to_string()]).unwrap();
        assert_eq!(panel.len(), 2);
    }

    #[test]
    fn test_weekdays_skip_weekends() {
        let dates = weekdays_from(NaiveDate::from_ymd_opt(2024, 1, 5).unwrap(), 3);
        assert_eq!(dates[0].weekday(), Weekday::Fri);
        assert_eq!(dates[1].weekday(), Weekday::Mon);
        assert_eq!(dates[2].weekday(), Weekday::Tue);
    }

    #[test]
    fn test_slice_and_between() {
        let panel = sample_panel();
        let slice = panel.slice(1..3).unwrap();
        assert_eq!(slice.len(), 2);
        assert_eq!(slice.benchmark(), &[-0.02, 0.005]);
        assert!(panel.slice(2..9).is_err());

        let dates = panel.dates().to_vec();
        let window = panel.between(dates[1], dates[2]);
        assert_eq!(window.len(), 2);
    }

    #[test]
    fn test_weekly_compounding() {
        let benchmark = vec![0.01; 10];
        let assets = vec![vec![0.0]; 10];
        let panel = ReturnPanel::from_returns(benchmark, assets).unwrap();
        let weekly = panel.to_weekly();

        // 2000-01-03 is a Monday, so ten weekdays are exactly two weeks.
        assert_eq!(weekly.len(), 2);
        assert!((weekly.benchmark()[0] - (1.01_f64.powi(5) - 1.0)).abs() < 1e-12);
    }

    #[test]
    fn test_excess_returns_with_risk_free() {
        let panel = sample_panel();
        let xi = ExcessReturns::from_panel(&panel, 0.001, Some(0.0001)).unwrap();
        assert_eq!(xi.n_assets(), 3);
        assert_eq!(xi.n_scenarios(), 4);
        assert!((xi.rows()[0][0] - (0.0001 - 0.011)).abs() < 1e-12);
        assert!((xi.rows()[0][1] - (0.02 - 0.011)).abs() < 1e-12);

        let r = xi.portfolio_returns(&[0.0, 1.0, 0.0]).unwrap();
        assert!((r[1] - (-0.01 + 0.02 - 0.001)).abs() < 1e-12);
        assert!(xi.portfolio_returns(&[1.0]).is_err());
    }

    #[test]
    fn test_scenario_weighting() {
        let equal = ScenarioWeighting::Equal.probabilities(4);
        assert_eq!(equal, vec![0.25; 4]);

        let decay = ScenarioWeighting::ExponentialDecay { half_life: 2.0 }.probabilities(5);
        assert!((decay.iter().sum::<f64>() - 1.0).abs() < 1e-12);
        assert!(decay[4] > decay[0]);
        assert!((decay[4] / decay[2] - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_parameter_validation() {
        assert!(ModelParameters::new(0.9, 2.0, 0.0).validate().is_ok());
        assert!(ModelParameters::new(1.0, 2.0, 0.0).validate().is_err());
        assert!(ModelParameters::new(0.9, -1.0, 0.0).validate().is_err());
        assert!(ModelParameters::new(0.9, 1.0, f64::NAN).validate().is_err());
    }
}
