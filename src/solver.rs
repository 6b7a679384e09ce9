//! Linear conic programs and the solver seam.
//!
//! A [`ConicProgram`] is stored in the standard form
//!
//! ```text
//! minimize    q'x
//! subject to  Ax + s = b,  s ∈ K
//! ```
//!
//! where `K` is a product of zero and non-negative cones, listed in row
//! order. Programs are owned by the caller and handed by reference to a
//! [`ConicSolver`]; objective coefficients can be updated in place between
//! solves without touching the constraint data.

use crate::error::{Result, TrackerError};
use clarabel::algebra::*;
use clarabel::solver::{
    DefaultSettingsBuilder, DefaultSolver, IPSolver, SolverStatus, SupportedConeT,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Compressed sparse column matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct SparseMatrix {
    pub rows: usize,
    pub cols: usize,
    pub colptr: Vec<usize>,
    pub rowval: Vec<usize>,
    pub nzval: Vec<f64>,
}

impl SparseMatrix {
    /// Build from `(row, col, value)` triplets. Duplicate entries are summed
    /// and exact zeros are dropped.
    pub fn from_triplets(rows: usize, cols: usize, triplets: &[(usize, usize, f64)]) -> Result<Self> {
        if let Some((r, c, _)) = triplets.iter().find(|(r, c, _)| *r >= rows || *c >= cols) {
            return Err(TrackerError::InvalidInput(format!(
                "entry ({}, {}) outside a {}x{} matrix",
                r, c, rows, cols
            )));
        }

        let mut sorted = triplets.to_vec();
        sorted.sort_by_key(|(r, c, _)| (*c, *r));

        let mut colptr = vec![0usize; cols + 1];
        let mut rowval = Vec::with_capacity(sorted.len());
        let mut nzval = Vec::with_capacity(sorted.len());
        let mut last: Option<(usize, usize)> = None;

        for (r, c, v) in sorted {
            if last == Some((r, c)) {
                if let Some(value) = nzval.last_mut() {
                    *value += v;
                }
                continue;
            }
            last = Some((r, c));
            rowval.push(r);
            nzval.push(v);
            colptr[c + 1] += 1;
        }

        for c in 0..cols {
            colptr[c + 1] += colptr[c];
        }

        let mut matrix = Self {
            rows,
            cols,
            colptr,
            rowval,
            nzval,
        };
        matrix.drop_zeros();
        Ok(matrix)
    }

    fn drop_zeros(&mut self) {
        let mut colptr = vec![0usize; self.cols + 1];
        let mut rowval = Vec::with_capacity(self.rowval.len());
        let mut nzval = Vec::with_capacity(self.nzval.len());

        for c in 0..self.cols {
            for idx in self.colptr[c]..self.colptr[c + 1] {
                if self.nzval[idx] != 0.0 {
                    rowval.push(self.rowval[idx]);
                    nzval.push(self.nzval[idx]);
                }
            }
            colptr[c + 1] = rowval.len();
        }

        self.colptr = colptr;
        self.rowval = rowval;
        self.nzval = nzval;
    }

    /// Number of stored entries.
    pub fn nnz(&self) -> usize {
        self.nzval.len()
    }

    /// Dense lookup, mainly for tests.
    pub fn get(&self, row: usize, col: usize) -> f64 {
        if col >= self.cols {
            return 0.0;
        }
        (self.colptr[col]..self.colptr[col + 1])
            .find(|idx| self.rowval[*idx] == row)
            .map(|idx| self.nzval[idx])
            .unwrap_or(0.0)
    }

    /// Compute `Ax`.
    pub fn mul_vec(&self, x: &[f64]) -> Vec<f64> {
        let mut out = vec![0.0; self.rows];
        for c in 0..self.cols.min(x.len()) {
            for idx in self.colptr[c]..self.colptr[c + 1] {
                out[self.rowval[idx]] += self.nzval[idx] * x[c];
            }
        }
        out
    }
}

/// One block of rows in the cone product.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Cone {
    /// `s = 0`, i.e. equality rows.
    Zero(usize),
    /// `s >= 0`, i.e. `Ax <= b` rows.
    Nonnegative(usize),
}

impl Cone {
    pub fn dim(&self) -> usize {
        match self {
            Cone::Zero(n) | Cone::Nonnegative(n) => *n,
        }
    }
}

/// A linear program in conic standard form.
#[derive(Debug, Clone, PartialEq)]
pub struct ConicProgram {
    q: Vec<f64>,
    a: SparseMatrix,
    b: Vec<f64>,
    cones: Vec<Cone>,
}

impl ConicProgram {
    /// Assemble a program, checking that the shapes agree.
    pub fn new(q: Vec<f64>, a: SparseMatrix, b: Vec<f64>, cones: Vec<Cone>) -> Result<Self> {
        if a.cols != q.len() {
            return Err(TrackerError::InvalidInput(format!(
                "constraint matrix has {} columns but objective has {} entries",
                a.cols,
                q.len()
            )));
        }
        if a.rows != b.len() {
            return Err(TrackerError::InvalidInput(format!(
                "constraint matrix has {} rows but right-hand side has {} entries",
                a.rows,
                b.len()
            )));
        }
        let cone_rows: usize = cones.iter().map(Cone::dim).sum();
        if cone_rows != a.rows {
            return Err(TrackerError::InvalidInput(format!(
                "cones cover {} rows, constraint matrix has {}",
                cone_rows, a.rows
            )));
        }

        Ok(Self { q, a, b, cones })
    }

    pub fn n_variables(&self) -> usize {
        self.q.len()
    }

    pub fn n_constraints(&self) -> usize {
        self.b.len()
    }

    pub fn objective(&self) -> &[f64] {
        &self.q
    }

    pub fn constraints(&self) -> &SparseMatrix {
        &self.a
    }

    pub fn rhs(&self) -> &[f64] {
        &self.b
    }

    pub fn cones(&self) -> &[Cone] {
        &self.cones
    }

    /// Overwrite one objective coefficient in place.
    pub fn set_objective_coefficient(&mut self, index: usize, value: f64) -> Result<()> {
        match self.q.get_mut(index) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(TrackerError::InvalidInput(format!(
                "objective index {} out of range for {} variables",
                index,
                self.q.len()
            ))),
        }
    }

    /// Evaluate `q'x`.
    pub fn objective_value(&self, x: &[f64]) -> f64 {
        self.q.iter().zip(x.iter()).map(|(c, v)| c * v).sum()
    }

    /// Largest violation of `Ax + s = b, s ∈ K` at `x`.
    pub fn max_violation(&self, x: &[f64]) -> f64 {
        let ax = self.a.mul_vec(x);
        let mut row = 0;
        let mut worst: f64 = 0.0;
        for cone in &self.cones {
            for _ in 0..cone.dim() {
                let slack = self.b[row] - ax[row];
                let violation = match cone {
                    Cone::Zero(_) => slack.abs(),
                    Cone::Nonnegative(_) => (-slack).max(0.0),
                };
                worst = worst.max(violation);
                row += 1;
            }
        }
        worst
    }
}

/// Terminal state of a solve, as seen by the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SolveStatus {
    Optimal,
    Infeasible,
    Unknown,
}

/// Primal solution reported by a solver.
#[derive(Debug, Clone, PartialEq)]
pub struct Solution {
    pub status: SolveStatus,
    pub x: Vec<f64>,
    pub objective: f64,
}

impl Solution {
    pub fn is_optimal(&self) -> bool {
        self.status == SolveStatus::Optimal
    }
}

/// A backend able to solve [`ConicProgram`]s.
///
/// Infeasibility is reported through [`SolveStatus`], not as an error. An
/// `Err` means the backend could not be run at all.
pub trait ConicSolver {
    fn solve(&mut self, program: &ConicProgram) -> Result<Solution>;
}

/// Tolerances and limits for the interior-point backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClarabelSettings {
    pub max_iter: u32,
    pub tol_gap_abs: f64,
    pub tol_gap_rel: f64,
    pub tol_feas: f64,
    pub verbose: bool,
}

impl Default for ClarabelSettings {
    fn default() -> Self {
        Self {
            max_iter: 200,
            tol_gap_abs: 1e-8,
            tol_gap_rel: 1e-8,
            tol_feas: 1e-8,
            verbose: false,
        }
    }
}

/// Interior-point backend built on `clarabel`.
#[derive(Debug, Clone, Default)]
pub struct ClarabelSolver {
    settings: ClarabelSettings,
}

impl ClarabelSolver {
    pub fn new(settings: ClarabelSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &ClarabelSettings {
        &self.settings
    }
}

impl ConicSolver for ClarabelSolver {
    fn solve(&mut self, program: &ConicProgram) -> Result<Solution> {
        let n = program.n_variables();
        let a = program.constraints();

        let p = CscMatrix::<f64>::zeros((n, n));
        let a = CscMatrix::new(
            a.rows,
            a.cols,
            a.colptr.clone(),
            a.rowval.clone(),
            a.nzval.clone(),
        );
        let cones: Vec<SupportedConeT<f64>> = program
            .cones()
            .iter()
            .map(|cone| match cone {
                Cone::Zero(dim) => SupportedConeT::ZeroConeT(*dim),
                Cone::Nonnegative(dim) => SupportedConeT::NonnegativeConeT(*dim),
            })
            .collect();

        let settings = DefaultSettingsBuilder::default()
            .verbose(self.settings.verbose)
            .max_iter(self.settings.max_iter)
            .tol_gap_abs(self.settings.tol_gap_abs)
            .tol_gap_rel(self.settings.tol_gap_rel)
            .tol_feas(self.settings.tol_feas)
            .build()
            .map_err(|e| TrackerError::Solver(e.to_string()))?;

        let mut solver =
            DefaultSolver::new(&p, program.objective(), &a, program.rhs(), &cones, settings)
                .map_err(|e| TrackerError::Solver(format!("Failed to create solver: {:?}", e)))?;
        solver.solve();

        let status = match solver.solution.status {
            SolverStatus::Solved | SolverStatus::AlmostSolved => SolveStatus::Optimal,
            SolverStatus::PrimalInfeasible
            | SolverStatus::DualInfeasible
            | SolverStatus::AlmostPrimalInfeasible
            | SolverStatus::AlmostDualInfeasible => SolveStatus::Infeasible,
            _ => SolveStatus::Unknown,
        };

        debug!(
            status = ?solver.solution.status,
            iterations = solver.solution.iterations,
            objective = solver.solution.obj_val,
            "clarabel solve finished"
        );

        Ok(Solution {
            status,
            x: solver.solution.x.clone(),
            objective: solver.solution.obj_val,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_triplets_sum_duplicates_and_drop_zeros() {
        let m = SparseMatrix::from_triplets(
            2,
            3,
            &[(1, 2, 1.0), (0, 0, 2.0), (1, 2, 3.0), (0, 1, 0.0), (1, 0, -1.0)],
        )
        .unwrap();

        assert_eq!(m.nnz(), 3);
        assert_eq!(m.colptr, vec![0, 2, 2, 3]);
        assert_eq!(m.rowval, vec![0, 1, 1]);
        assert!((m.get(1, 2) - 4.0).abs() < 1e-12);
        assert_eq!(m.get(0, 1), 0.0);
        assert_eq!(m.mul_vec(&[1.0, 1.0, 1.0]), vec![2.0, 3.0]);
    }

    #[test]
    fn test_triplet_bounds() {
        assert!(SparseMatrix::from_triplets(1, 1, &[(1, 0, 1.0)]).is_err());
    }

    #[test]
    fn test_program_shape_checks() {
        let a = SparseMatrix::from_triplets(2, 2, &[(0, 0, 1.0), (1, 1, 1.0)]).unwrap();
        assert!(ConicProgram::new(vec![1.0], a.clone(), vec![0.0, 0.0], vec![Cone::Nonnegative(2)]).is_err());
        assert!(ConicProgram::new(vec![1.0, 1.0], a.clone(), vec![0.0], vec![Cone::Nonnegative(1)]).is_err());
        assert!(ConicProgram::new(vec![1.0, 1.0], a.clone(), vec![0.0, 0.0], vec![Cone::Zero(1)]).is_err());

        let mut program =
            ConicProgram::new(vec![1.0, 1.0], a, vec![0.0, 0.0], vec![Cone::Nonnegative(2)]).unwrap();
        program.set_objective_coefficient(1, 5.0).unwrap();
        assert_eq!(program.objective(), &[1.0, 5.0]);
        assert!(program.set_objective_coefficient(2, 1.0).is_err());
    }

    #[test]
    fn test_clarabel_solves_small_lp() {
        // minimize x + 2y  s.t.  x + y = 1, x, y >= 0  ->  x = 1, y = 0
        let a = SparseMatrix::from_triplets(
            3,
            2,
            &[(0, 0, 1.0), (0, 1, 1.0), (1, 0, -1.0), (2, 1, -1.0)],
        )
        .unwrap();
        let program = ConicProgram::new(
            vec![1.0, 2.0],
            a,
            vec![1.0, 0.0, 0.0],
            vec![Cone::Zero(1), Cone::Nonnegative(2)],
        )
        .unwrap();

        let mut solver = ClarabelSolver::default();
        let solution = solver.solve(&program).unwrap();

        assert!(solution.is_optimal());
        assert!((solution.objective - 1.0).abs() < 1e-6);
        assert!((solution.x[0] - 1.0).abs() < 1e-6);
        assert!(program.max_violation(&solution.x) < 1e-6);
    }

    #[test]
    fn test_clarabel_reports_infeasible() {
        // x = 1 and x <= 0
        let a = SparseMatrix::from_triplets(2, 1, &[(0, 0, 1.0), (1, 0, 1.0)]).unwrap();
        let program = ConicProgram::new(
            vec![1.0],
            a,
            vec![1.0, 0.0],
            vec![Cone::Zero(1), Cone::Nonnegative(1)],
        )
        .unwrap();

        let solution = ClarabelSolver::default().solve(&program).unwrap();
        assert_eq!(solution.status, SolveStatus::Infeasible);
    }
}
