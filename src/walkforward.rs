//! Walk-forward radius selection and out-of-sample evaluation.
//!
//! For every training size and window of a [`WindowPlan`]:
//!
//! 1. sweep the full ε grid on the training segment,
//! 2. score every ε ≠ 0 portfolio on the validation segment with the
//!    empirical objective and keep the first minimiser ε*,
//! 3. retrain on train ∪ validate with `{0, ε*}`,
//! 4. score both portfolios on the test segment (empirical objective and
//!    wealth-path metrics against the enhanced benchmark),
//! 5. write the results into the [`BacktestAccumulator`].
//!
//! Windows only read the panel and write disjoint accumulator cells, so
//! [`WalkForwardController::run_parallel`] evaluates them on a rayon pool with
//! one model per worker.

use crate::accumulator::{BacktestAccumulator, ModelSlot};
use crate::analytics::{MetricKind, PerformanceMetrics};
use crate::error::Result;
use crate::model::{DroCvarModel, ModelSpec, ParameterGrid};
use crate::persistence::{Manifest, ResultSink};
use crate::portfolio::{index_path, simulate_panel, Portfolio, RebalancePolicy};
use crate::solver::ConicSolver;
use crate::types::{ResultRow, ReturnPanel};
use crate::windows::{Window, WindowPlan, WindowSpec};
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tabled::{builder::Builder, settings::Style};
use tracing::{debug, info, warn};

/// Configuration for a walk-forward run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalkForwardConfig {
    pub windows: WindowSpec,
    /// Radii swept on every training segment, in selection order.
    pub epsilons: Vec<f64>,
    pub rebalance: RebalancePolicy,
    pub show_progress: bool,
}

impl Default for WalkForwardConfig {
    fn default() -> Self {
        Self {
            windows: WindowSpec::default(),
            epsilons: ParameterGrid::logspace_with_zero(-6.0, -2.0, 20),
            rebalance: RebalancePolicy::Never,
            show_progress: false,
        }
    }
}

impl WalkForwardConfig {
    pub fn new(windows: WindowSpec, epsilons: Vec<f64>) -> Self {
        Self {
            windows,
            epsilons,
            ..Default::default()
        }
    }

    pub fn with_rebalance(mut self, policy: RebalancePolicy) -> Self {
        self.rebalance = policy;
        self
    }

    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }
}

/// First index of the smallest finite score. Ties keep the earlier index.
pub fn select_radius(scores: &[f64]) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (i, &score) in scores.iter().enumerate() {
        if !score.is_finite() {
            continue;
        }
        match best {
            Some((_, value)) if score >= value => {}
            _ => best = Some((i, score)),
        }
    }
    best.map(|(i, _)| i)
}

/// Results of one retrained model on the test segment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelOutcome {
    /// In-sample objective of the retrained model.
    pub certificate: f64,
    /// Empirical objective on the test segment.
    pub objective: f64,
    pub metrics: PerformanceMetrics,
    pub weights: Vec<f64>,
}

/// Everything computed for one window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowOutcome {
    pub training_size_index: usize,
    pub window_index: usize,
    /// Grid points solved on the training segment.
    pub feasible_points: usize,
    /// Validation scores of the ε ≠ 0 rows, with their radii.
    pub validation_scores: Vec<(f64, f64)>,
    pub epsilon_opt: Option<f64>,
    pub saa: Option<ModelOutcome>,
    pub dro: Option<ModelOutcome>,
}

impl WindowOutcome {
    fn empty(window: &Window) -> Self {
        Self {
            training_size_index: window.training_size_index,
            window_index: window.window_index,
            feasible_points: 0,
            validation_scores: Vec::new(),
            epsilon_opt: None,
            saa: None,
            dro: None,
        }
    }

    pub fn model(&self, slot: ModelSlot) -> Option<&ModelOutcome> {
        match slot {
            ModelSlot::Saa => self.saa.as_ref(),
            ModelSlot::Dro => self.dro.as_ref(),
        }
    }
}

/// Drives a model through every window of a plan.
#[derive(Debug, Clone, Default)]
pub struct WalkForwardController {
    config: WalkForwardConfig,
}

impl WalkForwardController {
    pub fn new(config: WalkForwardConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &WalkForwardConfig {
        &self.config
    }

    /// Run every window sequentially, reusing `model`.
    pub fn run<S: ConicSolver>(
        &self,
        model: &mut DroCvarModel<S>,
        panel: &ReturnPanel,
    ) -> Result<WalkForwardReport> {
        let plan = self.setup(model.spec(), panel)?;
        let grid = self.grid(model.spec());
        let mut accumulator = BacktestAccumulator::new(plan.n_training_sizes(), plan.n_windows());
        let mut outcomes = Vec::with_capacity(plan.n_training_sizes() * plan.n_windows());

        let progress = self.progress_bar(plan.n_training_sizes() * plan.n_windows());

        for (ts, windows) in plan.windows.iter().enumerate() {
            info!(
                "Training size {} ({}/{})",
                plan.spec.training_sizes[ts],
                ts + 1,
                plan.n_training_sizes()
            );

            for window in windows {
                let outcome = evaluate_window(model, panel, window, &grid, self.config.rebalance)?;
                record(&mut accumulator, &outcome)?;
                outcomes.push(outcome);

                if let Some(pb) = &progress {
                    pb.inc(1);
                }
            }
        }

        if let Some(pb) = progress {
            pb.finish_with_message("done");
        }

        Ok(self.report(model.spec(), panel, plan, accumulator, outcomes))
    }

    /// Run windows in parallel. `factory` creates one model per worker.
    pub fn run_parallel<S, F>(
        &self,
        spec: &ModelSpec,
        panel: &ReturnPanel,
        factory: F,
    ) -> Result<WalkForwardReport>
    where
        S: ConicSolver,
        F: Fn() -> DroCvarModel<S> + Sync + Send,
    {
        let plan = self.setup(spec, panel)?;
        let grid = self.grid(spec);
        let rebalance = self.config.rebalance;
        let windows: Vec<&Window> = plan.iter().collect();

        info!(
            "Evaluating {} windows in parallel ({} threads)",
            windows.len(),
            rayon::current_num_threads()
        );

        let outcomes: Vec<WindowOutcome> = windows
            .par_iter()
            .map_init(&factory, |model, window| {
                evaluate_window(model, panel, window, &grid, rebalance)
            })
            .collect::<Result<Vec<_>>>()?;

        let mut accumulator = BacktestAccumulator::new(plan.n_training_sizes(), plan.n_windows());
        for outcome in &outcomes {
            record(&mut accumulator, outcome)?;
        }

        Ok(self.report(spec, panel, plan, accumulator, outcomes))
    }

    fn setup(&self, spec: &ModelSpec, panel: &ReturnPanel) -> Result<WindowPlan> {
        spec.validate()?;
        let plan = WindowPlan::build(&self.config.windows, panel.len())?;
        self.grid(spec).validate()?;

        info!(
            "Walk-forward setup: {} observations, {} training sizes, {} windows, {} radii",
            panel.len(),
            plan.n_training_sizes(),
            plan.n_windows(),
            self.config.epsilons.len()
        );
        Ok(plan)
    }

    fn grid(&self, spec: &ModelSpec) -> ParameterGrid {
        ParameterGrid::single(spec.beta, spec.rho, self.config.epsilons.clone())
    }

    fn progress_bar(&self, total: usize) -> Option<ProgressBar> {
        if !self.config.show_progress {
            return None;
        }
        let pb = ProgressBar::new(total as u64);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
        {
            pb.set_style(style.progress_chars("#>-"));
        }
        Some(pb)
    }

    fn report(
        &self,
        spec: &ModelSpec,
        panel: &ReturnPanel,
        plan: WindowPlan,
        accumulator: BacktestAccumulator,
        outcomes: Vec<WindowOutcome>,
    ) -> WalkForwardReport {
        WalkForwardReport {
            spec: spec.clone(),
            n_weights: panel.n_assets() + usize::from(spec.risk_free.is_some()),
            plan,
            epsilon_grid: self.config.epsilons.clone(),
            accumulator,
            outcomes,
        }
    }
}

/// Evaluate one window end to end. Infeasible points never abort the window.
pub fn evaluate_window<S: ConicSolver>(
    model: &mut DroCvarModel<S>,
    panel: &ReturnPanel,
    window: &Window,
    grid: &ParameterGrid,
    rebalance: RebalancePolicy,
) -> Result<WindowOutcome> {
    let mut outcome = WindowOutcome::empty(window);

    let train = panel.slice(window.train.clone())?;
    model.set_data(&train)?;
    let results = model.sweep(grid)?;
    outcome.feasible_points = results.len();

    if results.is_empty() {
        warn!(
            training_size_index = window.training_size_index,
            window_index = window.window_index,
            "no grid point solved, leaving window at zero"
        );
        return Ok(outcome);
    }

    let validate = panel.slice(window.validate.clone())?;
    let mut candidates = Vec::new();
    for (_, row) in results.robust_rows() {
        let score = model.approximate_objective_on(&validate, &row.weights, row.rho, row.beta)?;
        candidates.push((row.epsilon, score));
    }
    let scores: Vec<f64> = candidates.iter().map(|(_, score)| *score).collect();

    let epsilon_opt = select_radius(&scores).map(|i| candidates[i].0);
    outcome.validation_scores = candidates;
    outcome.epsilon_opt = epsilon_opt;

    let retrain_radii = match epsilon_opt {
        Some(eps) => vec![0.0, eps],
        None => {
            warn!(
                window_index = window.window_index,
                "no robust candidate on validation, retraining baseline only"
            );
            vec![0.0]
        }
    };

    let retrain = panel.slice(window.retrain())?;
    model.set_data(&retrain)?;
    let retrained = model.sweep(&grid.with_epsilons(retrain_radii))?;

    let test = panel.slice(window.test.clone())?;
    let spec = model.spec().clone();
    let benchmark = index_path(test.benchmark(), spec.alpha);

    let score = |row: &ResultRow| -> Result<ModelOutcome> {
        let objective = model.approximate_objective_on(&test, &row.weights, row.rho, row.beta)?;
        let portfolio = Portfolio::new(row.weights.clone())?;
        let wealth = simulate_panel(&portfolio, &test, spec.risk_free, rebalance)?;
        let metrics = PerformanceMetrics::compute(&wealth, &benchmark, row.beta)?;
        Ok(ModelOutcome {
            certificate: row.objective,
            objective,
            metrics,
            weights: row.weights.clone(),
        })
    };

    if let Some(row) = retrained.find_epsilon(0.0) {
        outcome.saa = Some(score(row)?);
    }
    if let Some(row) = epsilon_opt.and_then(|eps| retrained.find_epsilon(eps)) {
        outcome.dro = Some(score(row)?);
    }

    debug!(
        training_size_index = window.training_size_index,
        window_index = window.window_index,
        epsilon_opt = ?outcome.epsilon_opt,
        "window evaluated"
    );

    Ok(outcome)
}

fn record(accumulator: &mut BacktestAccumulator, outcome: &WindowOutcome) -> Result<()> {
    let ts = outcome.training_size_index;
    let w = outcome.window_index;

    if let Some(eps) = outcome.epsilon_opt {
        accumulator.record_epsilon(ts, w, eps)?;
    }
    for slot in ModelSlot::ALL {
        if let Some(result) = outcome.model(slot) {
            accumulator.record_certificate(slot, ts, w, result.certificate)?;
            accumulator.record_objective(slot, ts, w, result.objective)?;
            accumulator.record_metrics(slot, ts, w, &result.metrics)?;
        }
    }
    Ok(())
}

/// Output of a walk-forward run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalkForwardReport {
    pub spec: ModelSpec,
    /// Portfolio weights per solution, including any risk-free asset.
    pub n_weights: usize,
    pub plan: WindowPlan,
    pub epsilon_grid: Vec<f64>,
    pub accumulator: BacktestAccumulator,
    pub outcomes: Vec<WindowOutcome>,
}

impl WalkForwardReport {
    /// Outcome of one window.
    pub fn outcome(&self, training_size_index: usize, window_index: usize) -> Option<&WindowOutcome> {
        self.outcomes.iter().find(|o| {
            o.training_size_index == training_size_index && o.window_index == window_index
        })
    }

    /// Windows where neither model produced a result.
    pub fn empty_windows(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.saa.is_none() && o.dro.is_none())
            .count()
    }

    /// Mean out-of-sample figures per training size and model.
    pub fn summary(&self) -> String {
        let mut builder = Builder::new();
        builder.push_record([
            "Training size",
            "Model",
            "Mean J",
            "Total return",
            "Excess return",
            "CVaR",
            "Sortino",
            "Beat ratio",
        ]);

        for (ts, size) in self.plan.spec.training_sizes.iter().enumerate() {
            for slot in ModelSlot::ALL {
                let mean_j = self
                    .accumulator
                    .mean_objective(slot, ts)
                    .unwrap_or(f64::NAN);
                let metric = |kind: MetricKind| {
                    self.accumulator
                        .mean_metric(slot, ts, kind)
                        .unwrap_or(f64::NAN)
                };
                builder.push_record([
                    size.to_string(),
                    slot.label().to_string(),
                    format!("{:.6}", mean_j),
                    format!("{:.3}", metric(MetricKind::TotalReturn)),
                    format!("{:.3}", metric(MetricKind::TotalExcessReturn)),
                    format!("{:.6}", metric(MetricKind::ConditionalValueAtRisk)),
                    format!("{:.3}", metric(MetricKind::Sortino)),
                    format!("{:.3}", metric(MetricKind::BeatBenchmarkRatio)),
                ]);
            }
        }

        builder.build().with(Style::rounded()).to_string()
    }

    /// Manifest entries shared by every persisted array of this run.
    pub fn manifest(&self) -> Manifest {
        Manifest::new()
            .with("model", self.spec.kind)
            .with("alphaDaily", self.spec.alpha)
            .with(
                "riskFreeDaily",
                self.spec.risk_free.map_or("none".to_string(), |r| r.to_string()),
            )
            .with("nSimulations", self.plan.n_windows())
            .with("nAssets", self.n_weights)
            .with("nEps", self.epsilon_grid.len())
            .with("epsCollection", join(&self.epsilon_grid))
            .with("betaCollection", self.spec.beta)
            .with("rhoCollection", self.spec.rho)
            .with_list("trainingSizes", &self.plan.spec.training_sizes)
            .with("testSize", self.plan.spec.test_size)
            .with("validationFraction", self.plan.spec.validation_fraction)
    }

    /// Persist all accumulator arenas.
    pub fn flush(&self, sink: &mut dyn ResultSink, prefix: &str) -> Result<()> {
        self.accumulator.flush(sink, prefix, &self.manifest())
    }
}

fn join(values: &[f64]) -> String {
    values
        .iter()
        .map(|v| format!("{:e}", v))
        .collect::<Vec<_>>()
        .join(",")
}
