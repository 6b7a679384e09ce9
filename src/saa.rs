//! Sample-average (non-robust) reference formulations.
//!
//! These are written directly in their textbook LP form, independent of the
//! affine-piece machinery in [`crate::model`], so that the robust model at
//! ε = 0 can be checked against them.
//!
//! Tracking:
//!
//! ```text
//! minimize    Σ π_t y_t + ρ (ν + 1/(1-β) Σ π_t u_t)
//! subject to  ±ξ_t·w ≤ y_t,  ξ_t·w + ν + u_t ≥ 0,  u ≥ 0,  y ≥ 0
//!             Σ w = 1,  w ≥ 0
//! ```
//!
//! Excess-CVaR drops `y` and replaces `Σ π_t y_t` with `-Σ π_t ξ_t·w`.

use crate::error::{Result, TrackerError};
use crate::model::{describe_solution, ModelSpec, ObjectiveKind};
use crate::solver::{Cone, ConicProgram, ConicSolver, SparseMatrix};
use crate::types::{ExcessReturns, ModelParameters, ResultRow, ReturnPanel};
use tracing::warn;

/// Sample-average CVaR model for either objective.
#[derive(Debug)]
pub struct SaaModel<S> {
    spec: ModelSpec,
    solver: S,
    data: Option<(ExcessReturns, Vec<f64>)>,
}

impl<S: ConicSolver> SaaModel<S> {
    pub fn new(spec: ModelSpec, solver: S) -> Self {
        Self {
            spec,
            solver,
            data: None,
        }
    }

    pub fn set_data(&mut self, panel: &ReturnPanel) -> Result<()> {
        let xi = ExcessReturns::from_panel(panel, self.spec.alpha, self.spec.risk_free)?;
        let probabilities = self.spec.weighting.probabilities(xi.n_scenarios());
        self.data = Some((xi, probabilities));
        Ok(())
    }

    /// Solve at (ρ, β). `None` when the solver does not reach optimality.
    pub fn solve(&mut self, rho: f64, beta: f64) -> Result<Option<ResultRow>> {
        let params = ModelParameters::new(beta, rho, 0.0);
        params.validate()?;

        let (xi, probabilities) = self
            .data
            .as_ref()
            .ok_or_else(|| TrackerError::InvalidInput("model has no data".to_string()))?;

        let program = build_saa_program(self.spec.kind, xi, probabilities, rho, beta)?;
        let solution = self.solver.solve(&program)?;
        if !solution.is_optimal() {
            warn!(rho, beta, status = ?solution.status, "sample-average model not solved");
            return Ok(None);
        }

        let m = xi.n_assets();
        describe_solution(
            &params,
            solution.objective,
            solution.x[m],
            solution.x[..m].to_vec(),
            xi,
            probabilities,
        )
        .map(Some)
    }
}

/// Layout: `[w (M), ν, u (T), y (T)]`, the `y` block only for tracking.
fn build_saa_program(
    kind: ObjectiveKind,
    xi: &ExcessReturns,
    probabilities: &[f64],
    rho: f64,
    beta: f64,
) -> Result<ConicProgram> {
    let m = xi.n_assets();
    let t = xi.n_scenarios();
    let tracking = kind == ObjectiveKind::Tracking;

    let nu_col = m;
    let u_col = m + 1;
    let y_col = m + 1 + t;
    let n_vars = if tracking { m + 1 + 2 * t } else { m + 1 + t };

    let mut q = vec![0.0; n_vars];
    q[nu_col] = rho;
    for (s, p) in probabilities.iter().enumerate() {
        q[u_col + s] = rho * p / (1.0 - beta);
        if tracking {
            q[y_col + s] = *p;
        }
    }
    if !tracking {
        for (row, p) in xi.rows().iter().zip(probabilities.iter()) {
            for (i, x) in row.iter().enumerate() {
                q[i] -= p * x;
            }
        }
    }

    let mut triplets = Vec::new();
    let mut b = Vec::new();

    for i in 0..m {
        triplets.push((0, i, 1.0));
    }
    b.push(1.0);

    let mut row = 1;
    for (s, xi_t) in xi.rows().iter().enumerate() {
        // -ξ_t·w - ν - u_t <= 0
        for (i, x) in xi_t.iter().enumerate() {
            triplets.push((row, i, -x));
        }
        triplets.push((row, nu_col, -1.0));
        triplets.push((row, u_col + s, -1.0));
        b.push(0.0);
        row += 1;

        triplets.push((row, u_col + s, -1.0));
        b.push(0.0);
        row += 1;

        if tracking {
            for sign in [1.0, -1.0] {
                for (i, x) in xi_t.iter().enumerate() {
                    triplets.push((row, i, sign * x));
                }
                triplets.push((row, y_col + s, -1.0));
                b.push(0.0);
                row += 1;
            }
            triplets.push((row, y_col + s, -1.0));
            b.push(0.0);
            row += 1;
        }
    }

    for i in 0..m {
        triplets.push((row, i, -1.0));
        b.push(0.0);
        row += 1;
    }

    let a = SparseMatrix::from_triplets(row, n_vars, &triplets)?;
    ConicProgram::new(q, a, b, vec![Cone::Zero(1), Cone::Nonnegative(row - 1)])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DroCvarModel, ParameterGrid};
    use crate::solver::ClarabelSolver;
    use crate::synthetic::SyntheticMarket;

    fn panel() -> ReturnPanel {
        SyntheticMarket::new(4).with_seed(11).generate(60).unwrap()
    }

    /// Sample-average objective of fixed portfolio returns, minimised over ν.
    fn sample_average_value(kind: ObjectiveKind, returns: &[f64], rho: f64, beta: f64) -> f64 {
        let n = returns.len() as f64;
        let base = match kind {
            ObjectiveKind::Tracking => returns.iter().map(|r| r.abs()).sum::<f64>() / n,
            ObjectiveKind::ExcessCvar => -returns.iter().sum::<f64>() / n,
        };
        let tail = returns
            .iter()
            .map(|candidate| {
                let nu = -candidate;
                let shortfall: f64 = returns.iter().map(|r| (-r - nu).max(0.0)).sum::<f64>() / n;
                nu + shortfall / (1.0 - beta)
            })
            .fold(f64::INFINITY, f64::min);
        base + rho * tail
    }

    #[test]
    fn test_epsilon_zero_matches_sample_average() {
        let panel = panel();
        for kind in [ObjectiveKind::Tracking, ObjectiveKind::ExcessCvar] {
            let spec = ModelSpec::new(kind, 0.9, 2.0).with_alpha(0.0001);

            let mut saa = SaaModel::new(spec.clone(), ClarabelSolver::default());
            saa.set_data(&panel).unwrap();
            let reference = saa.solve(2.0, 0.9).unwrap().unwrap();

            let mut dro = DroCvarModel::new(spec, ClarabelSolver::default());
            dro.set_data(&panel).unwrap();
            let rows = dro.sweep(&ParameterGrid::single(0.9, 2.0, vec![0.0])).unwrap();
            let robust = &rows.rows()[0];

            assert!(
                (robust.objective - reference.objective).abs() < 1e-6,
                "{kind}: {} vs {}",
                robust.objective,
                reference.objective
            );

            // the robust weights must also be optimal for the sample-average problem
            let xi = ExcessReturns::from_panel(&panel, 0.0001, None).unwrap();
            let returns = xi.portfolio_returns(&robust.weights).unwrap();
            let value = sample_average_value(kind, &returns, 2.0, 0.9);
            assert!((value - reference.objective).abs() < 1e-5);
        }
    }

    #[test]
    fn test_saa_objective_matches_empirical_value() {
        let panel = panel();
        let spec = ModelSpec::new(ObjectiveKind::Tracking, 0.9, 1.0);
        let mut saa = SaaModel::new(spec, ClarabelSolver::default());
        saa.set_data(&panel).unwrap();
        let row = saa.solve(1.0, 0.9).unwrap().unwrap();

        // the LP optimum can only be at or below the plug-in value at the optimal w
        let empirical = row.tracking_error + row.cvar;
        assert!(row.objective <= empirical + 1e-6);
        let total: f64 = row.weights.iter().sum();
        assert!((total - 1.0).abs() < 1e-6);
    }
}
