//! Sensitivity of in-sample and out-of-sample performance to the radius.
//!
//! For every training size and window the model is solved over the whole ε
//! grid on the training segment. Each solution is then scored twice:
//!
//! - in sample, on the training segment, with the solver objective,
//! - out of sample, on the test segment, with the empirical objective.
//!
//! There is no validation segment; windows are planned with
//! [`WindowPlan::build_without_validation`] so test segments stay aligned
//! across training sizes.
//!
//! # Example
//!
//! ```ignore
//! use robust_index::sensitivity::RadiusSensitivity;
//!
//! let study = RadiusSensitivity::new(windows, epsilons).run(&mut model, &panel)?;
//! let curve = study.mean_curve(Scope::OutOfSample, 0, MetricKind::TotalReturn)?;
//! ```

use crate::accumulator::Arena;
use crate::analytics::{MetricKind, PerformanceMetrics};
use crate::error::Result;
use crate::model::{DroCvarModel, ParameterGrid};
use crate::persistence::{Manifest, ResultSink};
use crate::portfolio::{index_path, simulate_panel, Portfolio, RebalancePolicy};
use crate::solver::ConicSolver;
use crate::types::ReturnPanel;
use crate::windows::{WindowPlan, WindowSpec};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Column of the objective in the statistics arenas; metrics follow it.
pub const OBJECTIVE_COLUMN: usize = 0;

/// Columns per statistics row: the objective plus every metric.
pub const N_STATISTICS: usize = MetricKind::COUNT + 1;

/// Which segment a statistic was measured on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Scope {
    InSample,
    OutOfSample,
}

/// Radius sensitivity study configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RadiusSensitivity {
    pub windows: WindowSpec,
    pub epsilons: Vec<f64>,
    pub rebalance: RebalancePolicy,
}

impl RadiusSensitivity {
    pub fn new(windows: WindowSpec, epsilons: Vec<f64>) -> Self {
        Self {
            windows,
            epsilons,
            rebalance: RebalancePolicy::Never,
        }
    }

    pub fn with_rebalance(mut self, policy: RebalancePolicy) -> Self {
        self.rebalance = policy;
        self
    }

    /// Run the study with a single reusable model.
    pub fn run<S: ConicSolver>(
        &self,
        model: &mut DroCvarModel<S>,
        panel: &ReturnPanel,
    ) -> Result<SensitivityReport> {
        model.spec().validate()?;
        let plan = WindowPlan::build_without_validation(&self.windows, panel.len())?;
        let spec = model.spec().clone();
        let grid = ParameterGrid::single(spec.beta, spec.rho, self.epsilons.clone());
        grid.validate()?;

        let n_ts = plan.n_training_sizes();
        let n_windows = plan.n_windows();
        let n_eps = self.epsilons.len();
        let n_weights = panel.n_assets() + usize::from(spec.risk_free.is_some());

        let mut in_sample = Arena::zeros(&[n_ts, n_windows, n_eps, N_STATISTICS]);
        let mut out_of_sample = Arena::zeros(&[n_ts, n_windows, n_eps, N_STATISTICS]);
        let mut weights = Arena::zeros(&[n_ts, n_eps, n_weights]);

        for window in plan.iter() {
            let ts = window.training_size_index;
            let k = window.window_index;
            if k == 0 {
                info!("Radius sensitivity for training size {}", self.windows.training_sizes[ts]);
            }

            let train = panel.slice(window.train.clone())?;
            let test = panel.slice(window.test.clone())?;
            model.set_data(&train)?;
            let results = model.sweep(&grid)?;
            if results.is_empty() {
                warn!(training_size_index = ts, window_index = k, "no grid point solved");
                continue;
            }

            let train_benchmark = index_path(train.benchmark(), spec.alpha);
            let test_benchmark = index_path(test.benchmark(), spec.alpha);

            for row in results.iter() {
                let Some(e) = self.epsilons.iter().position(|eps| *eps == row.epsilon) else {
                    continue;
                };

                let portfolio = Portfolio::new(row.weights.clone())?;

                let wealth = simulate_panel(&portfolio, &train, spec.risk_free, self.rebalance)?;
                let metrics = PerformanceMetrics::compute(&wealth, &train_benchmark, row.beta)?;
                in_sample.set_row(&[ts, k, e], &statistics_row(row.objective, &metrics))?;

                let objective = model.approximate_objective_on(&test, &row.weights, row.rho, row.beta)?;
                let wealth = simulate_panel(&portfolio, &test, spec.risk_free, self.rebalance)?;
                let metrics = PerformanceMetrics::compute(&wealth, &test_benchmark, row.beta)?;
                out_of_sample.set_row(&[ts, k, e], &statistics_row(objective, &metrics))?;

                for (i, w) in row.weights.iter().enumerate() {
                    weights.add(&[ts, e, i], *w)?;
                }
            }
        }

        Ok(SensitivityReport {
            plan,
            epsilons: self.epsilons.clone(),
            n_weights,
            in_sample,
            out_of_sample,
            weights,
        })
    }
}

fn statistics_row(objective: f64, metrics: &PerformanceMetrics) -> Vec<f64> {
    let mut row = Vec::with_capacity(N_STATISTICS);
    row.push(objective);
    row.extend_from_slice(&metrics.to_array());
    row
}

/// Arenas produced by a [`RadiusSensitivity`] run.
///
/// `in_sample` and `out_of_sample` are `[ts][window][eps][statistic]`, with
/// the objective in column 0. `weights` is `[ts][eps][asset]`, summed over
/// windows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensitivityReport {
    pub plan: WindowPlan,
    pub epsilons: Vec<f64>,
    pub n_weights: usize,
    pub in_sample: Arena,
    pub out_of_sample: Arena,
    pub weights: Arena,
}

impl SensitivityReport {
    fn arena(&self, scope: Scope) -> &Arena {
        match scope {
            Scope::InSample => &self.in_sample,
            Scope::OutOfSample => &self.out_of_sample,
        }
    }

    /// Mean of one metric over windows, per radius.
    pub fn mean_curve(&self, scope: Scope, ts: usize, kind: MetricKind) -> Result<Vec<f64>> {
        self.mean_column(scope, ts, kind.index() + 1)
    }

    /// Mean objective over windows, per radius.
    pub fn mean_objective(&self, scope: Scope, ts: usize) -> Result<Vec<f64>> {
        self.mean_column(scope, ts, OBJECTIVE_COLUMN)
    }

    /// Means skip windows where the radius was not solved.
    fn mean_column(&self, scope: Scope, ts: usize, column: usize) -> Result<Vec<f64>> {
        let arena = self.arena(scope);
        let n_windows = self.plan.n_windows();
        (0..self.epsilons.len())
            .map(|e| arena.mean_written((0..n_windows).map(|k| vec![ts, k, e, column])))
            .collect()
    }

    /// Windows in which the radius at `eps_index` was solved.
    pub fn solved_windows(&self, ts: usize, eps_index: usize) -> Result<usize> {
        let mut count = 0;
        for k in 0..self.plan.n_windows() {
            if self.in_sample.is_written(&[ts, k, eps_index, OBJECTIVE_COLUMN])? {
                count += 1;
            }
        }
        Ok(count)
    }

    /// Weights averaged over the solved windows for one training size and
    /// radius. NaN when the radius was never solved.
    pub fn average_weights(&self, ts: usize, eps_index: usize) -> Result<Vec<f64>> {
        let solved = self.solved_windows(ts, eps_index)?;
        let row = self.weights.row(&[ts, eps_index])?;
        if solved == 0 {
            return Ok(vec![f64::NAN; row.len()]);
        }
        Ok(row.iter().map(|w| w / solved as f64).collect())
    }

    /// Persist the three arenas as `{prefix}_IS`, `{prefix}_OoS` and
    /// `{prefix}_WassersteinWeights`.
    pub fn flush(&self, sink: &mut dyn ResultSink, prefix: &str) -> Result<()> {
        let mut statistics = vec!["Objective"];
        statistics.extend(MetricKind::ALL.iter().map(|k| k.name()));

        let eps: Vec<String> = self.epsilons.iter().map(|e| format!("{:e}", e)).collect();
        let base = Manifest::new()
            .with("nSimulations", self.plan.n_windows())
            .with("nAssets", self.n_weights)
            .with("nEps", self.epsilons.len())
            .with_list("epsCollection", &eps)
            .with_list("trainingSizes", &self.plan.spec.training_sizes)
            .with("testSize", self.plan.spec.test_size);

        let arrays = [
            ("IS", &self.in_sample, true),
            ("OoS", &self.out_of_sample, true),
            ("WassersteinWeights", &self.weights, false),
        ];
        for (suffix, arena, has_statistics) in arrays {
            let mut manifest = base.clone();
            if has_statistics {
                manifest = manifest.with_list("nStatistics", &statistics);
            }
            let manifest = manifest.with_shape(arena.shape());
            sink.persist(&format!("{}_{}", prefix, suffix), arena.data(), &manifest)?;
        }
        Ok(())
    }
}
