//! Performance metrics of a portfolio wealth path against a benchmark path.
//!
//! Every metric works on single-period returns `P[t+1] / P[t] - 1`, never on
//! index levels, except the two totals which compare end points of the
//! 100-based paths. Zero denominators produce NaN or infinite values.

use crate::error::{Result, TrackerError};
use crate::portfolio::{path_returns, INITIAL_WEALTH};
use crate::risk::{covariance, mean, percentile};
use crate::types::ResultSet;
use serde::{Deserialize, Serialize};
use tabled::{builder::Builder, settings::Style};

/// Trading periods per year used for annualisation.
pub const PERIODS_PER_YEAR: i32 = 252;

/// Metrics in their fixed storage order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MetricKind {
    DownsideSemiDeviation,
    UpsideSemiDeviation,
    Rmse,
    Mad,
    ValueAtRisk,
    ConditionalValueAtRisk,
    AverageExcessReturn,
    TotalExcessReturn,
    Sortino,
    BeatBenchmarkRatio,
    TotalReturn,
    AnnualizedReturn,
    P5,
    P10,
    P90,
    P95,
}

impl MetricKind {
    /// All metrics in storage order.
    pub const ALL: [MetricKind; 16] = [
        MetricKind::DownsideSemiDeviation,
        MetricKind::UpsideSemiDeviation,
        MetricKind::Rmse,
        MetricKind::Mad,
        MetricKind::ValueAtRisk,
        MetricKind::ConditionalValueAtRisk,
        MetricKind::AverageExcessReturn,
        MetricKind::TotalExcessReturn,
        MetricKind::Sortino,
        MetricKind::BeatBenchmarkRatio,
        MetricKind::TotalReturn,
        MetricKind::AnnualizedReturn,
        MetricKind::P5,
        MetricKind::P10,
        MetricKind::P90,
        MetricKind::P95,
    ];

    pub const COUNT: usize = 16;

    /// Position in [`MetricKind::ALL`].
    pub fn index(&self) -> usize {
        *self as usize
    }

    pub fn name(&self) -> &'static str {
        match self {
            MetricKind::DownsideSemiDeviation => "DownsideSemiStandardDeviation",
            MetricKind::UpsideSemiDeviation => "UpsideSemiStandardDeviation",
            MetricKind::Rmse => "RMSE",
            MetricKind::Mad => "MAD",
            MetricKind::ValueAtRisk => "VaR",
            MetricKind::ConditionalValueAtRisk => "CVaR",
            MetricKind::AverageExcessReturn => "AverageExcessReturn",
            MetricKind::TotalExcessReturn => "ExcessReturn",
            MetricKind::Sortino => "SortinoIndex",
            MetricKind::BeatBenchmarkRatio => "BeatBenchmarkRatio",
            MetricKind::TotalReturn => "TotalReturn",
            MetricKind::AnnualizedReturn => "AnnualizedAverageReturn",
            MetricKind::P5 => "P5",
            MetricKind::P10 => "P10",
            MetricKind::P90 => "P90",
            MetricKind::P95 => "P95",
        }
    }
}

/// Metrics of a portfolio path measured against a benchmark path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub beta: f64,
    pub downside_semi_deviation: f64,
    pub upside_semi_deviation: f64,
    pub rmse: f64,
    pub mad: f64,
    /// `(1 - β)` percentile of the active return.
    pub var: f64,
    /// Negated mean active return at or below the VaR.
    pub cvar: f64,
    pub average_excess_return: f64,
    /// Difference of end levels of the 100-based paths.
    pub total_excess_return: f64,
    pub sortino: f64,
    pub beat_benchmark_ratio: f64,
    /// End level of the portfolio path minus 100.
    pub total_return: f64,
    /// `((1 + mean r)^252 - 1) · 100`.
    pub annualized_return: f64,
    pub p5: f64,
    pub p10: f64,
    pub p90: f64,
    pub p95: f64,

    /// Mean portfolio return in percent.
    pub average_return: f64,
    /// Mean portfolio return over periods that beat the benchmark.
    pub beat_benchmark_excess: f64,
    /// Mean portfolio return over periods that did not.
    pub beat_benchmark_shortfall: f64,
    /// CVaR of the negated absolute active return.
    pub cvar_abs: f64,
    /// Sample `cov(r, b) / var(b)`.
    pub market_beta: f64,
}

impl PerformanceMetrics {
    /// Compute all metrics. Paths must have equal length of at least two.
    pub fn compute(portfolio: &[f64], benchmark: &[f64], beta: f64) -> Result<Self> {
        if portfolio.len() != benchmark.len() {
            return Err(TrackerError::DataAlignment(format!(
                "portfolio path has {} points, benchmark path has {}",
                portfolio.len(),
                benchmark.len()
            )));
        }
        if portfolio.len() < 2 {
            return Err(TrackerError::InvalidInput(
                "wealth paths need at least two points".to_string(),
            ));
        }

        let r = path_returns(portfolio);
        let b = path_returns(benchmark);
        let active: Vec<f64> = r.iter().zip(b.iter()).map(|(x, y)| x - y).collect();

        let downside: Vec<f64> = active.iter().map(|e| e.min(0.0).powi(2)).collect();
        let upside: Vec<f64> = active.iter().map(|e| e.max(0.0).powi(2)).collect();
        let squared: Vec<f64> = active.iter().map(|e| e * e).collect();
        let absolute: Vec<f64> = active.iter().map(|e| e.abs()).collect();

        let downside_semi_deviation = mean(&downside).sqrt();
        let average_excess_return = mean(&active);

        let var = percentile(&active, (1.0 - beta) * 100.0);
        let cvar = -tail_mean(&active, var);

        let negated_abs: Vec<f64> = absolute.iter().map(|e| -e).collect();
        let var_abs = percentile(&negated_abs, (1.0 - beta) * 100.0);
        let cvar_abs = -tail_mean(&negated_abs, var_abs);

        let beats: Vec<f64> = r
            .iter()
            .zip(b.iter())
            .filter(|(x, y)| x > y)
            .map(|(x, _)| *x)
            .collect();
        let misses: Vec<f64> = r
            .iter()
            .zip(b.iter())
            .filter(|(x, y)| x <= y)
            .map(|(x, _)| *x)
            .collect();

        let mean_return = mean(&r);
        let last = portfolio.len() - 1;

        Ok(Self {
            beta,
            downside_semi_deviation,
            upside_semi_deviation: mean(&upside).sqrt(),
            rmse: mean(&squared).sqrt(),
            mad: mean(&absolute),
            var,
            cvar,
            average_excess_return,
            total_excess_return: portfolio[last] - benchmark[last],
            sortino: average_excess_return / downside_semi_deviation,
            beat_benchmark_ratio: beats.len() as f64 / r.len() as f64,
            total_return: portfolio[last] - INITIAL_WEALTH,
            annualized_return: ((1.0 + mean_return).powi(PERIODS_PER_YEAR) - 1.0) * 100.0,
            p5: percentile(&active, 5.0),
            p10: percentile(&active, 10.0),
            p90: percentile(&active, 90.0),
            p95: percentile(&active, 95.0),
            average_return: mean_return * 100.0,
            beat_benchmark_excess: mean_or_zero(&beats),
            beat_benchmark_shortfall: mean_or_zero(&misses),
            cvar_abs,
            market_beta: covariance(&r, &b) / covariance(&b, &b),
        })
    }

    /// Value of one metric.
    pub fn get(&self, kind: MetricKind) -> f64 {
        match kind {
            MetricKind::DownsideSemiDeviation => self.downside_semi_deviation,
            MetricKind::UpsideSemiDeviation => self.upside_semi_deviation,
            MetricKind::Rmse => self.rmse,
            MetricKind::Mad => self.mad,
            MetricKind::ValueAtRisk => self.var,
            MetricKind::ConditionalValueAtRisk => self.cvar,
            MetricKind::AverageExcessReturn => self.average_excess_return,
            MetricKind::TotalExcessReturn => self.total_excess_return,
            MetricKind::Sortino => self.sortino,
            MetricKind::BeatBenchmarkRatio => self.beat_benchmark_ratio,
            MetricKind::TotalReturn => self.total_return,
            MetricKind::AnnualizedReturn => self.annualized_return,
            MetricKind::P5 => self.p5,
            MetricKind::P10 => self.p10,
            MetricKind::P90 => self.p90,
            MetricKind::P95 => self.p95,
        }
    }

    /// Values in [`MetricKind::ALL`] order.
    pub fn to_array(&self) -> [f64; MetricKind::COUNT] {
        MetricKind::ALL.map(|kind| self.get(kind))
    }
}

/// Mean of the values at or below `threshold`.
fn tail_mean(values: &[f64], threshold: f64) -> f64 {
    let tail: Vec<f64> = values.iter().copied().filter(|v| *v <= threshold).collect();
    mean(&tail)
}

fn mean_or_zero(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        mean(values)
    }
}

/// Format results for terminal display.
pub struct ResultFormatter;

impl ResultFormatter {
    /// One column per labelled metric set, one row per metric.
    pub fn metrics_table(columns: &[(&str, &PerformanceMetrics)]) -> String {
        let mut builder = Builder::new();

        let mut header = vec!["Metric".to_string()];
        header.extend(columns.iter().map(|(label, _)| label.to_string()));
        builder.push_record(header);

        for kind in MetricKind::ALL {
            let mut record = vec![kind.name().to_string()];
            record.extend(columns.iter().map(|(_, m)| format!("{:.6}", m.get(kind))));
            builder.push_record(record);
        }

        builder.build().with(Style::rounded()).to_string()
    }

    /// Print [`ResultFormatter::metrics_table`] to stdout.
    pub fn print_metrics(columns: &[(&str, &PerformanceMetrics)]) {
        println!("{}", Self::metrics_table(columns));
    }

    /// Summary of a sweep, one row per grid point.
    pub fn result_set_table(results: &ResultSet) -> String {
        let mut builder = Builder::new();
        builder.push_record([
            "Epsilon", "Rho", "Beta", "Objective", "Excess", "TE", "VaR", "CVaR", "Holdings",
        ]);

        for row in results.iter() {
            let holdings = row.weights.iter().filter(|w| **w > 1e-4).count();
            builder.push_record([
                format!("{:.2e}", row.epsilon),
                format!("{:.2}", row.rho),
                format!("{:.2}", row.beta),
                format!("{:.6}", row.objective),
                format!("{:.6}", row.excess_return),
                format!("{:.6}", row.tracking_error),
                format!("{:.6}", row.var),
                format!("{:.6}", row.cvar),
                holdings.to_string(),
            ]);
        }

        builder.build().with(Style::rounded()).to_string()
    }

    /// Export metrics to JSON.
    pub fn to_json(metrics: &PerformanceMetrics) -> String {
        serde_json::to_string_pretty(metrics).unwrap_or_else(|_| "{}".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_scenario_totals() {
        let portfolio = [100.0, 105.0, 103.0, 110.0];
        let benchmark = [100.0, 102.0, 102.0, 104.0];
        let m = PerformanceMetrics::compute(&portfolio, &benchmark, 0.95).unwrap();

        assert!((m.total_return - 10.0).abs() < 1e-6);
        assert!((m.total_excess_return - 6.0).abs() < 1e-6);
        assert!((m.beat_benchmark_ratio - 2.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_active_return_statistics() {
        let portfolio = [100.0, 105.0, 103.0, 110.0];
        let benchmark = [100.0, 102.0, 102.0, 104.0];
        let m = PerformanceMetrics::compute(&portfolio, &benchmark, 0.95).unwrap();

        let r = path_returns(&portfolio);
        let b = path_returns(&benchmark);
        let e: Vec<f64> = r.iter().zip(b.iter()).map(|(x, y)| x - y).collect();

        assert!((m.average_excess_return - mean(&e)).abs() < 1e-12);
        assert!((m.mad - mean(&e.iter().map(|x| x.abs()).collect::<Vec<_>>())).abs() < 1e-12);
        // only the second period underperforms
        assert!((m.downside_semi_deviation - (e[1] * e[1] / 3.0).sqrt()).abs() < 1e-12);
        assert!((m.sortino - m.average_excess_return / m.downside_semi_deviation).abs() < 1e-12);
        assert!(m.rmse >= m.mad);
        assert!(m.p5 <= m.p10 && m.p10 <= m.p90 && m.p90 <= m.p95);
        // VaR at β = 0.95 is the 5th percentile
        assert!((m.var - m.p5).abs() < 1e-12);
        assert!((m.cvar - (-e[1])).abs() < 1e-12);
    }

    #[test]
    fn test_sortino_unclamped() {
        let portfolio = [100.0, 102.0, 104.0];
        let benchmark = [100.0, 101.0, 102.0];
        let m = PerformanceMetrics::compute(&portfolio, &benchmark, 0.9).unwrap();
        assert_eq!(m.downside_semi_deviation, 0.0);
        assert!(m.sortino.is_infinite());

        let same = PerformanceMetrics::compute(&benchmark, &benchmark, 0.9).unwrap();
        assert!(same.sortino.is_nan());
    }

    #[test]
    fn test_annualized_return() {
        let daily = 0.0004_f64;
        let portfolio: Vec<f64> = (0..5).map(|t| 100.0 * (1.0 + daily).powi(t)).collect();
        let m = PerformanceMetrics::compute(&portfolio, &portfolio, 0.9).unwrap();
        let expected = ((1.0 + daily).powi(252) - 1.0) * 100.0;
        assert!((m.annualized_return - expected).abs() < 1e-9);
        assert!((m.market_beta - 1.0).abs() < 1e-9 || m.market_beta.is_nan());
    }

    #[test]
    fn test_market_beta() {
        let benchmark = [100.0, 101.0, 99.0, 102.0, 101.0];
        let b = path_returns(&benchmark);
        let mut portfolio = vec![100.0];
        for r in &b {
            let last = portfolio[portfolio.len() - 1];
            portfolio.push(last * (1.0 + 2.0 * r));
        }
        let m = PerformanceMetrics::compute(&portfolio, &benchmark, 0.9).unwrap();
        assert!((m.market_beta - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_array_order_and_errors() {
        let portfolio = [100.0, 105.0, 103.0, 110.0];
        let benchmark = [100.0, 102.0, 102.0, 104.0];
        let m = PerformanceMetrics::compute(&portfolio, &benchmark, 0.95).unwrap();
        let values = m.to_array();
        assert_eq!(values[MetricKind::TotalReturn.index()], m.total_return);
        assert_eq!(values[MetricKind::P95.index()], m.p95);

        assert!(PerformanceMetrics::compute(&portfolio, &benchmark[..3], 0.95).is_err());
        assert!(PerformanceMetrics::compute(&[100.0], &[100.0], 0.95).is_err());
    }

    #[test]
    fn test_metrics_table_renders() {
        let portfolio = [100.0, 105.0, 103.0, 110.0];
        let benchmark = [100.0, 102.0, 102.0, 104.0];
        let m = PerformanceMetrics::compute(&portfolio, &benchmark, 0.95).unwrap();
        let table = ResultFormatter::metrics_table(&[("DRO", &m)]);
        assert!(table.contains("SortinoIndex"));
        assert!(table.contains("DRO"));
    }
}
