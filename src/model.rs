//! Wasserstein distributionally-robust CVaR model builder.
//!
//! For a fixed excess return matrix ξ (T × M) and probability vector π the
//! model solves, for each grid point (ε, ρ, β),
//!
//! ```text
//! minimize    ε·λ + Σ_t π_t s_t
//! subject to  c_k (ξ_t · w) + d_k ν ≤ s_t      k = 1..K, t = 1..T
//!             ±c_k w_i ≤ λ                     k = 1..K, i = 1..M
//!             Σ w = 1,  w ≥ 0
//! ```
//!
//! which is the dual of the worst-case expectation of the piecewise-affine
//! loss `max_k (c_k ξ·w + d_k ν)` over a 1-norm Wasserstein ball of radius ε.
//! The pieces `(c_k, d_k)` come from [`ObjectiveKind::affine_pieces`].
//!
//! Decision vector layout: `[w (M), ν, λ, s (T)]`.
//!
//! The program is built once per (ρ, β). Moving along the ε axis only
//! rewrites the objective coefficient of λ.

use crate::error::{Result, TrackerError};
use crate::risk::{conditional_value_at_risk, mean, value_at_risk, weighted_mean};
use crate::solver::{Cone, ConicProgram, ConicSolver, SparseMatrix};
use crate::types::{
    ExcessReturns, ModelParameters, ResultRow, ResultSet, ReturnPanel, ScenarioWeighting,
};
use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Which risk objective the loss encodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ObjectiveKind {
    /// Mean absolute tracking error plus ρ·CVaR_β.
    #[default]
    Tracking,
    /// Negative mean excess return plus ρ·CVaR_β.
    ExcessCvar,
}

/// One affine piece `slope · (ξ·w) + nu · ν` of the loss.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AffinePiece {
    pub slope: f64,
    pub nu: f64,
}

impl ObjectiveKind {
    /// Slopes of the base loss in the portfolio excess return `r`.
    ///
    /// Tracking uses `|r| = max(r, -r)`; excess-CVaR uses `-r`.
    fn base_slopes(&self) -> &'static [f64] {
        match self {
            ObjectiveKind::Tracking => &[1.0, -1.0],
            ObjectiveKind::ExcessCvar => &[-1.0],
        }
    }

    /// Pieces of `base(r) + ρ·(ν + max(-r - ν, 0) / (1 - β))`.
    ///
    /// The CVaR term is `max(ρν, ρν - g(r + ν))` with `g = ρ / (1 - β)`.
    /// Every (CVaR branch, base slope) pair gives one piece, tail branch
    /// first.
    pub fn affine_pieces(&self, rho: f64, beta: f64) -> Vec<AffinePiece> {
        let g = rho / (1.0 - beta);
        let branches = [(-g, rho - g), (0.0, rho)];

        branches
            .iter()
            .flat_map(|(tail_slope, nu)| {
                self.base_slopes().iter().map(move |base| AffinePiece {
                    slope: base + tail_slope,
                    nu: *nu,
                })
            })
            .collect()
    }

    /// Empirical value of the objective on realised portfolio excess returns.
    pub fn empirical_value(&self, returns: &[f64], rho: f64, beta: f64) -> f64 {
        let cvar = conditional_value_at_risk(returns, beta);
        let base = match self {
            ObjectiveKind::Tracking => {
                let abs: Vec<f64> = returns.iter().map(|r| r.abs()).collect();
                mean(&abs)
            }
            ObjectiveKind::ExcessCvar => -mean(returns),
        };
        base + rho * cvar
    }
}

impl std::fmt::Display for ObjectiveKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ObjectiveKind::Tracking => write!(f, "TrackingCVaR"),
            ObjectiveKind::ExcessCvar => write!(f, "ExcessCVaR"),
        }
    }
}

/// Fixed description of a model: objective, default (β, ρ) and the data
/// transformation applied by `set_data`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSpec {
    pub kind: ObjectiveKind,
    pub beta: f64,
    pub rho: f64,
    /// Daily enhancement target α added to the benchmark.
    pub alpha: f64,
    /// Daily risk-free rate; when set a risk-free asset is prepended.
    pub risk_free: Option<f64>,
    pub weighting: ScenarioWeighting,
}

impl Default for ModelSpec {
    fn default() -> Self {
        Self {
            kind: ObjectiveKind::Tracking,
            beta: 0.95,
            rho: 2.0,
            alpha: 0.0,
            risk_free: None,
            weighting: ScenarioWeighting::Equal,
        }
    }
}

impl ModelSpec {
    pub fn new(kind: ObjectiveKind, beta: f64, rho: f64) -> Self {
        Self {
            kind,
            beta,
            rho,
            ..Default::default()
        }
    }

    pub fn with_alpha(mut self, alpha: f64) -> Self {
        self.alpha = alpha;
        self
    }

    pub fn with_risk_free(mut self, rate: f64) -> Self {
        self.risk_free = Some(rate);
        self
    }

    pub fn with_weighting(mut self, weighting: ScenarioWeighting) -> Self {
        self.weighting = weighting;
        self
    }

    pub fn validate(&self) -> Result<()> {
        ModelParameters::new(self.beta, self.rho, 0.0).validate()?;
        if !self.alpha.is_finite() {
            return Err(TrackerError::InvalidInput(format!(
                "alpha must be finite, got {}",
                self.alpha
            )));
        }
        if let ScenarioWeighting::ExponentialDecay { half_life } = self.weighting {
            if !(half_life > 0.0) {
                return Err(TrackerError::InvalidInput(format!(
                    "half-life must be positive, got {}",
                    half_life
                )));
            }
        }
        Ok(())
    }
}

/// Grid of (ε, ρ, β) points. Iteration order is ρ outer, β middle and ε
/// inner, which is also the row order of a sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterGrid {
    pub epsilons: Vec<f64>,
    pub rhos: Vec<f64>,
    pub betas: Vec<f64>,
}

impl ParameterGrid {
    pub fn new(epsilons: Vec<f64>, rhos: Vec<f64>, betas: Vec<f64>) -> Self {
        Self {
            epsilons,
            rhos,
            betas,
        }
    }

    /// A single (ρ, β) pair with a list of radii.
    pub fn single(beta: f64, rho: f64, epsilons: Vec<f64>) -> Self {
        Self::new(epsilons, vec![rho], vec![beta])
    }

    /// `[0] ++ 10^linspace(start_exponent, end_exponent, count)`.
    pub fn logspace_with_zero(start_exponent: f64, end_exponent: f64, count: usize) -> Vec<f64> {
        let mut epsilons = vec![0.0];
        epsilons.extend(logspace(start_exponent, end_exponent, count));
        epsilons
    }

    /// Same (ρ, β) values with a different radius list.
    pub fn with_epsilons(&self, epsilons: Vec<f64>) -> Self {
        Self::new(epsilons, self.rhos.clone(), self.betas.clone())
    }

    pub fn len(&self) -> usize {
        self.epsilons.len() * self.rhos.len() * self.betas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All points in sweep order.
    pub fn points(&self) -> Vec<ModelParameters> {
        let mut points = Vec::with_capacity(self.len());
        for &rho in &self.rhos {
            for &beta in &self.betas {
                for &epsilon in &self.epsilons {
                    points.push(ModelParameters::new(beta, rho, epsilon));
                }
            }
        }
        points
    }

    pub fn validate(&self) -> Result<()> {
        if self.is_empty() {
            return Err(TrackerError::InvalidInput(
                "parameter grid is empty".to_string(),
            ));
        }
        for point in self.points() {
            point.validate()?;
        }
        Ok(())
    }
}

/// `count` points evenly spaced in log10 between `10^start` and `10^end`.
pub fn logspace(start_exponent: f64, end_exponent: f64, count: usize) -> Vec<f64> {
    match count {
        0 => Vec::new(),
        1 => vec![10f64.powf(start_exponent)],
        _ => {
            let step = (end_exponent - start_exponent) / (count - 1) as f64;
            (0..count)
                .map(|i| 10f64.powf(start_exponent + step * i as f64))
                .collect()
        }
    }
}

/// Excess returns and scenario probabilities, always replaced together.
#[derive(Debug, Clone)]
struct ModelData {
    xi: ExcessReturns,
    probabilities: Vec<f64>,
}

/// Program built for one (ρ, β) pair.
#[derive(Debug, Clone)]
struct BuiltProgram {
    rho: f64,
    beta: f64,
    program: ConicProgram,
}

/// Reusable DRO-CVaR model bound to one solver backend.
///
/// The model owns its data exclusively; [`DroCvarModel::set_data`] is the only
/// way to change it. Use one instance per thread.
#[derive(Debug)]
pub struct DroCvarModel<S> {
    spec: ModelSpec,
    solver: S,
    data: Option<ModelData>,
    built: Option<BuiltProgram>,
    show_progress: bool,
}

impl<S: ConicSolver> DroCvarModel<S> {
    pub fn new(spec: ModelSpec, solver: S) -> Self {
        Self {
            spec,
            solver,
            data: None,
            built: None,
            show_progress: false,
        }
    }

    /// Show a progress bar while sweeping.
    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    pub fn spec(&self) -> &ModelSpec {
        &self.spec
    }

    pub fn solver(&self) -> &S {
        &self.solver
    }

    /// Number of portfolio weights M, once data is set.
    pub fn n_weights(&self) -> Option<usize> {
        self.data.as_ref().map(|data| data.xi.n_assets())
    }

    /// Number of scenarios T, once data is set.
    pub fn n_scenarios(&self) -> Option<usize> {
        self.data.as_ref().map(|data| data.xi.n_scenarios())
    }

    /// Scenario probabilities π of the current data.
    pub fn probabilities(&self) -> Option<&[f64]> {
        self.data.as_ref().map(|data| data.probabilities.as_slice())
    }

    /// Replace the scenario set. Recomputes ξ and π together and discards
    /// any program built on the previous data.
    pub fn set_data(&mut self, panel: &ReturnPanel) -> Result<()> {
        self.set_returns(panel.assets(), panel.benchmark())
    }

    /// As [`DroCvarModel::set_data`], from raw return arrays.
    pub fn set_returns(&mut self, assets: &[Vec<f64>], benchmark: &[f64]) -> Result<()> {
        let xi = ExcessReturns::compute(assets, benchmark, self.spec.alpha, self.spec.risk_free)?;
        if xi.n_scenarios() == 0 || xi.n_assets() == 0 {
            return Err(TrackerError::InvalidInput(format!(
                "scenario set must be non-empty, got {}x{}",
                xi.n_scenarios(),
                xi.n_assets()
            )));
        }
        let probabilities = self.spec.weighting.probabilities(xi.n_scenarios());

        self.data = Some(ModelData { xi, probabilities });
        self.built = None;
        Ok(())
    }

    /// Solve every point of `grid` in sweep order.
    ///
    /// Points that are not solved to optimality are logged and skipped.
    pub fn sweep(&mut self, grid: &ParameterGrid) -> Result<ResultSet> {
        grid.validate()?;

        let progress = if self.show_progress {
            let pb = ProgressBar::new(grid.len() as u64);
            if let Ok(style) = ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            {
                pb.set_style(style.progress_chars("#>-"));
            }
            Some(pb)
        } else {
            None
        };

        let mut results = ResultSet::new();
        for point in grid.points() {
            if let Some(pb) = &progress {
                pb.set_message(format!("eps={:.2e}", point.epsilon));
            }

            if let Some(row) = self.solve_point(&point)? {
                results.push(row);
            }

            if let Some(pb) = &progress {
                pb.inc(1);
            }
        }

        if let Some(pb) = progress {
            pb.finish_and_clear();
        }

        Ok(results)
    }

    /// Solve a single grid point.
    pub fn solve_single(&mut self, params: ModelParameters) -> Result<Option<ResultRow>> {
        params.validate()?;
        self.solve_point(&params)
    }

    fn solve_point(&mut self, params: &ModelParameters) -> Result<Option<ResultRow>> {
        let data = self
            .data
            .as_ref()
            .ok_or_else(|| TrackerError::InvalidInput("model has no data".to_string()))?;

        let m = data.xi.n_assets();
        let rebuild = !matches!(
            &self.built,
            Some(built) if built.rho == params.rho && built.beta == params.beta
        );
        if rebuild {
            let program = build_program(self.spec.kind, data, params.rho, params.beta)?;
            self.built = Some(BuiltProgram {
                rho: params.rho,
                beta: params.beta,
                program,
            });
        }

        let built = self
            .built
            .as_mut()
            .ok_or_else(|| TrackerError::InvalidInput("program was not built".to_string()))?;
        built.program.set_objective_coefficient(m + 1, params.epsilon)?;

        let solution = self.solver.solve(&built.program)?;
        if !solution.is_optimal() {
            warn!(
                epsilon = params.epsilon,
                rho = params.rho,
                beta = params.beta,
                status = ?solution.status,
                "grid point not solved, skipping"
            );
            return Ok(None);
        }

        let weights = solution.x[..m].to_vec();
        let nu = solution.x[m];
        let row = describe_solution(
            params,
            solution.objective,
            nu,
            weights,
            &data.xi,
            &data.probabilities,
        )?;

        debug!(
            epsilon = row.epsilon,
            objective = row.objective,
            cvar = row.cvar,
            "grid point solved"
        );

        Ok(Some(row))
    }

    /// Empirical objective of `weights` on new data, at the model's (ρ, β).
    pub fn approximate_objective(
        &self,
        assets: &[Vec<f64>],
        benchmark: &[f64],
        weights: &[f64],
    ) -> Result<f64> {
        self.approximate_objective_at(assets, benchmark, weights, self.spec.rho, self.spec.beta)
    }

    /// Empirical objective of `weights` on new data at an explicit (ρ, β).
    ///
    /// Uses the model's α and risk-free column but never touches its data.
    pub fn approximate_objective_at(
        &self,
        assets: &[Vec<f64>],
        benchmark: &[f64],
        weights: &[f64],
        rho: f64,
        beta: f64,
    ) -> Result<f64> {
        let xi = ExcessReturns::compute(assets, benchmark, self.spec.alpha, self.spec.risk_free)?;
        let returns = xi.portfolio_returns(weights)?;
        Ok(self.spec.kind.empirical_value(&returns, rho, beta))
    }

    /// [`DroCvarModel::approximate_objective_at`] on a panel.
    pub fn approximate_objective_on(
        &self,
        panel: &ReturnPanel,
        weights: &[f64],
        rho: f64,
        beta: f64,
    ) -> Result<f64> {
        self.approximate_objective_at(panel.assets(), panel.benchmark(), weights, rho, beta)
    }
}

/// Result row for an optimal portfolio, with diagnostics recomputed from the
/// weights rather than read from solver internals.
pub(crate) fn describe_solution(
    params: &ModelParameters,
    objective: f64,
    nu: f64,
    weights: Vec<f64>,
    xi: &ExcessReturns,
    probabilities: &[f64],
) -> Result<ResultRow> {
    let returns = xi.portfolio_returns(&weights)?;
    let abs_returns: Vec<f64> = returns.iter().map(|r| r.abs()).collect();

    Ok(ResultRow {
        objective,
        epsilon: params.epsilon,
        rho: params.rho,
        beta: params.beta,
        excess_return: weighted_mean(&returns, probabilities),
        tracking_error: weighted_mean(&abs_returns, probabilities),
        var: value_at_risk(&returns, params.beta),
        cvar: conditional_value_at_risk(&returns, params.beta),
        nu,
        weights,
    })
}

fn build_program(kind: ObjectiveKind, data: &ModelData, rho: f64, beta: f64) -> Result<ConicProgram> {
    let pieces = kind.affine_pieces(rho, beta);
    let k = pieces.len();
    let m = data.xi.n_assets();
    let t = data.xi.n_scenarios();

    let nu_col = m;
    let lambda_col = m + 1;
    let s_col = m + 2;
    let n_vars = m + 2 + t;
    let n_rows = 1 + k * t + 2 * k * m + m;

    let mut triplets = Vec::with_capacity(m + k * t * (m + 2) + 2 * k * m * 2 + m);
    let mut b = vec![0.0; n_rows];

    // Σ w = 1
    for i in 0..m {
        triplets.push((0, i, 1.0));
    }
    b[0] = 1.0;

    let mut row = 1;
    for piece in &pieces {
        for (scenario, xi_t) in data.xi.rows().iter().enumerate() {
            for (i, x) in xi_t.iter().enumerate() {
                triplets.push((row, i, piece.slope * x));
            }
            triplets.push((row, nu_col, piece.nu));
            triplets.push((row, s_col + scenario, -1.0));
            row += 1;
        }
    }

    for piece in &pieces {
        for sign in [1.0, -1.0] {
            for i in 0..m {
                triplets.push((row, i, sign * piece.slope));
                triplets.push((row, lambda_col, -1.0));
                row += 1;
            }
        }
    }

    for i in 0..m {
        triplets.push((row, i, -1.0));
        row += 1;
    }

    let a = SparseMatrix::from_triplets(n_rows, n_vars, &triplets)?;

    let mut q = vec![0.0; n_vars];
    q[s_col..].copy_from_slice(&data.probabilities);

    ConicProgram::new(
        q,
        a,
        b,
        vec![Cone::Zero(1), Cone::Nonnegative(n_rows - 1)],
    )
}
