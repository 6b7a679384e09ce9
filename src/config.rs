//! Configuration file support for experiments.
//!
//! Loads model, grid, window and solver settings from TOML so runs are
//! reproducible. Rates are given annually in the file and converted to daily
//! rates with [`daily_rate`].

use crate::data::{CsvPriceConfig, Frequency};
use crate::error::{Result, TrackerError};
use crate::model::{ModelSpec, ObjectiveKind, ParameterGrid};
use crate::portfolio::RebalancePolicy;
use crate::solver::{ClarabelSettings, ClarabelSolver};
use crate::types::ScenarioWeighting;
use crate::walkforward::WalkForwardConfig;
use crate::windows::WindowSpec;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// Trading days per year used for rate conversion.
pub const TRADING_DAYS: f64 = 252.0;

/// `(1 + annual)^(1/252) - 1`.
pub fn daily_rate(annual: f64) -> f64 {
    (1.0 + annual).powf(1.0 / TRADING_DAYS) - 1.0
}

/// Complete experiment configuration loaded from a file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExperimentConfig {
    #[serde(default)]
    pub model: ModelSettings,
    #[serde(default)]
    pub grid: GridSettings,
    #[serde(default)]
    pub windows: WindowSettings,
    #[serde(default)]
    pub backtest: BacktestSettings,
    #[serde(default)]
    pub solver: ClarabelSettings,
    /// Price file to read; synthetic data is used when absent.
    #[serde(default)]
    pub data: Option<DataSettings>,
}

/// Objective and its fixed parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSettings {
    #[serde(default)]
    pub kind: ObjectiveKind,
    #[serde(default = "default_beta")]
    pub beta: f64,
    #[serde(default = "default_rho")]
    pub rho: f64,
    /// Annual return the portfolio should add over the benchmark.
    #[serde(default)]
    pub excess_return_annual: f64,
    /// Annual risk-free rate; adds a cash asset when set.
    #[serde(default)]
    pub risk_free_annual: Option<f64>,
    #[serde(default)]
    pub weighting: ScenarioWeighting,
}

fn default_beta() -> f64 { 0.95 }
fn default_rho() -> f64 { 2.0 }

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            kind: ObjectiveKind::Tracking,
            beta: default_beta(),
            rho: default_rho(),
            excess_return_annual: 0.0,
            risk_free_annual: None,
            weighting: ScenarioWeighting::Equal,
        }
    }
}

/// Wasserstein radius grid: optional zero followed by a log-spaced range.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridSettings {
    #[serde(default = "default_true")]
    pub include_zero: bool,
    #[serde(default = "default_start_exponent")]
    pub start_exponent: f64,
    #[serde(default = "default_end_exponent")]
    pub end_exponent: f64,
    #[serde(default = "default_count")]
    pub count: usize,
}

fn default_true() -> bool { true }
fn default_start_exponent() -> f64 { -6.0 }
fn default_end_exponent() -> f64 { -2.0 }
fn default_count() -> usize { 20 }

impl Default for GridSettings {
    fn default() -> Self {
        Self {
            include_zero: true,
            start_exponent: default_start_exponent(),
            end_exponent: default_end_exponent(),
            count: default_count(),
        }
    }
}

/// Rolling window layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowSettings {
    #[serde(default = "default_training_sizes")]
    pub training_sizes: Vec<usize>,
    #[serde(default = "default_test_size")]
    pub test_size: usize,
    #[serde(default = "default_validation_fraction")]
    pub validation_fraction: f64,
    #[serde(default = "default_simulations")]
    pub n_simulations: usize,
}

fn default_training_sizes() -> Vec<usize> { vec![63, 252] }
fn default_test_size() -> usize { 126 }
fn default_validation_fraction() -> f64 { 0.2 }
fn default_simulations() -> usize { 10 }

impl Default for WindowSettings {
    fn default() -> Self {
        Self {
            training_sizes: default_training_sizes(),
            test_size: default_test_size(),
            validation_fraction: default_validation_fraction(),
            n_simulations: default_simulations(),
        }
    }
}

/// Out-of-sample simulation settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BacktestSettings {
    /// Rebalance to target weights every n days; buy and hold when absent.
    #[serde(default)]
    pub rebalance_every: Option<usize>,
    #[serde(default)]
    pub show_progress: bool,
    /// Evaluate windows on a worker pool.
    #[serde(default)]
    pub parallel: bool,
}

/// Source file and date range for real data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataSettings {
    pub path: PathBuf,
    #[serde(default = "default_date_column")]
    pub date_column: String,
    #[serde(default = "default_index_column")]
    pub index_column: String,
    #[serde(default)]
    pub date_format: Option<String>,
    /// Inclusive start date (YYYY-MM-DD).
    pub start_date: String,
    /// Inclusive end date (YYYY-MM-DD).
    pub end_date: String,
    #[serde(default)]
    pub frequency: Frequency,
}

fn default_date_column() -> String { "Dates".to_string() }
fn default_index_column() -> String { "Index".to_string() }

impl DataSettings {
    pub fn csv_config(&self) -> CsvPriceConfig {
        CsvPriceConfig {
            date_column: self.date_column.clone(),
            index_column: self.index_column.clone(),
            date_format: self.date_format.clone(),
            ..Default::default()
        }
    }

    /// Parsed `(start, end)` dates.
    pub fn date_range(&self) -> Result<(NaiveDate, NaiveDate)> {
        let parse = |s: &str| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .map_err(|e| TrackerError::ConfigError(format!("invalid date '{}': {}", s, e)))
        };
        let start = parse(&self.start_date)?;
        let end = parse(&self.end_date)?;
        if end < start {
            return Err(TrackerError::ConfigError(format!(
                "end date {} precedes start date {}",
                end, start
            )));
        }
        Ok((start, end))
    }
}

impl ExperimentConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Loading configuration from: {}", path.display());

        let content = fs::read_to_string(path)?;
        let config: ExperimentConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| TrackerError::ConfigError(e.to_string()))?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Check value ranges that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        let bad = |msg: String| Err(TrackerError::ConfigError(msg));

        if !(self.model.beta > 0.0 && self.model.beta < 1.0) {
            return bad(format!("beta must lie in (0, 1), got {}", self.model.beta));
        }
        if !(self.model.rho >= 0.0) {
            return bad(format!("rho must be non-negative, got {}", self.model.rho));
        }
        if self.model.excess_return_annual <= -1.0 {
            return bad("excess_return_annual must exceed -1".to_string());
        }
        if matches!(self.model.risk_free_annual, Some(r) if r <= -1.0) {
            return bad("risk_free_annual must exceed -1".to_string());
        }
        if let ScenarioWeighting::ExponentialDecay { half_life } = self.model.weighting {
            if !(half_life > 0.0) {
                return bad(format!("half_life must be positive, got {}", half_life));
            }
        }
        if self.grid.end_exponent < self.grid.start_exponent {
            return bad("grid end_exponent precedes start_exponent".to_string());
        }
        if self.epsilons().is_empty() {
            return bad("radius grid is empty".to_string());
        }
        if self.windows.training_sizes.is_empty() || self.windows.training_sizes.contains(&0) {
            return bad("training_sizes must be non-empty and positive".to_string());
        }
        if self.windows.test_size == 0 || self.windows.n_simulations == 0 {
            return bad("test_size and n_simulations must be positive".to_string());
        }
        if !(0.0..1.0).contains(&self.windows.validation_fraction) {
            return bad(format!(
                "validation_fraction must lie in [0, 1), got {}",
                self.windows.validation_fraction
            ));
        }
        if self.backtest.rebalance_every == Some(0) {
            return bad("rebalance_every must be positive".to_string());
        }
        if let Some(data) = &self.data {
            data.date_range()?;
        }
        Ok(())
    }

    pub fn model_spec(&self) -> ModelSpec {
        let m = &self.model;
        let mut spec = ModelSpec::new(m.kind, m.beta, m.rho)
            .with_alpha(daily_rate(m.excess_return_annual))
            .with_weighting(m.weighting);
        if let Some(rate) = m.risk_free_annual {
            spec = spec.with_risk_free(daily_rate(rate));
        }
        spec
    }

    /// Radius list in sweep order.
    pub fn epsilons(&self) -> Vec<f64> {
        let g = &self.grid;
        if g.include_zero {
            ParameterGrid::logspace_with_zero(g.start_exponent, g.end_exponent, g.count)
        } else {
            crate::model::logspace(g.start_exponent, g.end_exponent, g.count)
        }
    }

    /// Grid at the configured (ρ, β).
    pub fn parameter_grid(&self) -> ParameterGrid {
        ParameterGrid::single(self.model.beta, self.model.rho, self.epsilons())
    }

    pub fn window_spec(&self) -> WindowSpec {
        let w = &self.windows;
        WindowSpec::new(w.training_sizes.clone(), w.test_size, w.n_simulations)
            .with_validation_fraction(w.validation_fraction)
    }

    pub fn rebalance(&self) -> RebalancePolicy {
        match self.backtest.rebalance_every {
            Some(n) => RebalancePolicy::Every(n),
            None => RebalancePolicy::Never,
        }
    }

    pub fn solver(&self) -> ClarabelSolver {
        ClarabelSolver::new(self.solver.clone())
    }

    pub fn walkforward_config(&self) -> WalkForwardConfig {
        WalkForwardConfig::new(self.window_spec(), self.epsilons())
            .with_rebalance(self.rebalance())
            .with_progress(self.backtest.show_progress)
    }

    /// Generate an example configuration file content.
    pub fn example() -> String {
        r#"# Robust index tracking experiment

[model]
kind = "tracking"          # or "excess-cvar"
beta = 0.95
rho = 2.0
excess_return_annual = 0.02
# risk_free_annual = 0.01
weighting = { type = "equal" }
# weighting = { type = "exponential-decay", half_life = 126.0 }

[grid]
include_zero = true
start_exponent = -6.0
end_exponent = -2.0
count = 20

[windows]
training_sizes = [63, 252]
test_size = 126
validation_fraction = 0.2
n_simulations = 10

[backtest]
# rebalance_every = 21
show_progress = true
parallel = false

[solver]
max_iter = 200
tol_gap_abs = 1e-8
tol_gap_rel = 1e-8
tol_feas = 1e-8
verbose = false

# [data]
# path = "data/prices.csv"
# index_column = "SPX-INDEX"
# start_date = "2010-01-01"
# end_date = "2020-12-31"
# frequency = "daily"
"#
        .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = ExperimentConfig::default();
        assert_eq!(config.model.kind, ObjectiveKind::Tracking);
        assert_eq!(config.windows.training_sizes, vec![63, 252]);
        assert_eq!(config.epsilons().len(), 21);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_daily_rate() {
        assert_eq!(daily_rate(0.0), 0.0);
        let r = daily_rate(0.05);
        assert!(((1.0 + r).powf(252.0) - 1.05).abs() < 1e-12);
    }

    #[test]
    fn test_load_config() {
        let toml_content = r#"
[model]
kind = "excess-cvar"
beta = 0.9
rho = 1.0
risk_free_annual = 0.01
weighting = { type = "exponential-decay", half_life = 50.0 }

[grid]
include_zero = false
count = 5

[windows]
training_sizes = [100]
test_size = 50
n_simulations = 3

[backtest]
rebalance_every = 21

[solver]
max_iter = 100
"#;
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "{}", toml_content).unwrap();

        let config = ExperimentConfig::load(file.path()).unwrap();
        assert_eq!(config.model.kind, ObjectiveKind::ExcessCvar);
        assert_eq!(config.epsilons().len(), 5);
        assert_eq!(config.rebalance(), RebalancePolicy::Every(21));
        assert_eq!(config.solver.max_iter, 100);
        assert_eq!(
            config.model.weighting,
            ScenarioWeighting::ExponentialDecay { half_life: 50.0 }
        );

        let spec = config.model_spec();
        assert!((spec.risk_free.unwrap() - daily_rate(0.01)).abs() < 1e-15);
        assert_eq!(config.window_spec().validation_fraction, 0.2);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[model]\nbeta = 1.5\n").unwrap();
        let result = ExperimentConfig::load(file.path());
        assert!(matches!(result, Err(TrackerError::ConfigError(_))));

        let mut config = ExperimentConfig::default();
        config.windows.validation_fraction = 1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_save_config() {
        let config = ExperimentConfig::default();
        let file = NamedTempFile::new().unwrap();
        config.save(file.path()).unwrap();

        let loaded = ExperimentConfig::load(file.path()).unwrap();
        assert_eq!(loaded.windows.test_size, config.windows.test_size);
        assert_eq!(loaded.epsilons(), config.epsilons());
    }

    #[test]
    fn test_example_config() {
        let example = ExperimentConfig::example();
        let config: ExperimentConfig = toml::from_str(&example).unwrap();
        assert!(config.validate().is_ok());
        assert!(config.data.is_none());
        assert!(example.contains("[windows]"));
    }
}
