//! Robust index - distributionally robust CVaR models for enhanced index tracking.
//!
//! # Overview
//!
//! The crate builds Wasserstein distributionally-robust CVaR portfolio models
//! against a benchmark index and evaluates them out of sample:
//!
//! - **Model builder**: one linear program per data set, swept over a grid of
//!   Wasserstein radii ε without rebuilding
//! - **Two objectives**: tracking error plus CVaR, or negative excess return
//!   plus CVaR
//! - **Walk-forward controller**: rolling train / validate / test windows with
//!   validation-based radius selection against a sample-average baseline
//! - **Performance metrics**: sixteen statistics over wealth paths
//! - **Persistence**: flat arrays with a shape manifest and a shared log
//!
//! # Quick Start
//!
//! ```no_run
//! use robust_index::{
//!     ClarabelSolver, DroCvarModel, ModelSpec, ObjectiveKind, SyntheticMarket,
//!     WalkForwardConfig, WalkForwardController, WindowSpec,
//! };
//!
//! let panel = SyntheticMarket::new(10).generate(1000).unwrap();
//!
//! let spec = ModelSpec::new(ObjectiveKind::Tracking, 0.95, 2.0);
//! let mut model = DroCvarModel::new(spec, ClarabelSolver::default());
//!
//! let config = WalkForwardConfig::new(
//!     WindowSpec::new(vec![63, 252], 126, 10),
//!     robust_index::ParameterGrid::logspace_with_zero(-6.0, -2.0, 20),
//! );
//! let report = WalkForwardController::new(config).run(&mut model, &panel).unwrap();
//! println!("{}", report.summary());
//! ```
//!
//! # Custom solvers
//!
//! The model talks to its optimizer through [`solver::ConicSolver`]. Any type
//! that can solve a [`solver::ConicProgram`] (linear objective, sparse
//! constraints, zero and nonnegative cones) can be plugged in.
//!
//! # Modules
//!
//! - [`types`]: return panels, excess returns, result rows
//! - [`data`]: return sources and CSV price loading
//! - [`risk`]: quantiles, VaR and CVaR on samples
//! - [`solver`]: conic program container and the Clarabel backend
//! - [`model`]: the distributionally robust model builder
//! - [`saa`]: sample-average reference models
//! - [`portfolio`]: wealth path simulation
//! - [`analytics`]: performance metrics and reporting
//! - [`windows`]: rolling window planning
//! - [`accumulator`]: pre-sized result arenas
//! - [`walkforward`]: walk-forward radius selection
//! - [`sensitivity`]: in-sample and out-of-sample sensitivity to the radius
//! - [`persistence`]: result sinks
//! - [`config`]: TOML configuration file support
//! - [`synthetic`]: synthetic market generation

pub mod accumulator;
pub mod analytics;
pub mod config;
pub mod data;
pub mod error;
pub mod model;
pub mod persistence;
pub mod portfolio;
pub mod risk;
pub mod saa;
pub mod sensitivity;
pub mod solver;
pub mod synthetic;
pub mod types;
pub mod walkforward;
pub mod windows;

// Re-exports for convenience
pub use accumulator::{Arena, BacktestAccumulator, ModelSlot};
pub use analytics::{MetricKind, PerformanceMetrics, ResultFormatter};
pub use config::ExperimentConfig;
pub use data::{CsvPriceConfig, CsvPriceSource, Frequency, ReturnSource};
pub use error::{Result, TrackerError};
pub use model::{DroCvarModel, ModelSpec, ObjectiveKind, ParameterGrid};
pub use persistence::{ExperimentLogSink, Manifest, MemorySink, ResultSink};
pub use portfolio::{Portfolio, RebalancePolicy};
pub use saa::SaaModel;
pub use sensitivity::{RadiusSensitivity, Scope, SensitivityReport};
pub use solver::{ClarabelSettings, ClarabelSolver, ConicProgram, ConicSolver, Solution, SolveStatus};
pub use synthetic::SyntheticMarket;
pub use types::{ExcessReturns, ModelParameters, ResultRow, ResultSet, ReturnPanel, ScenarioWeighting};
pub use walkforward::{WalkForwardConfig, WalkForwardController, WalkForwardReport, WindowOutcome};
pub use windows::{Window, WindowPlan, WindowSpec};
