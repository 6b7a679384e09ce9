//! Train / validate / test window planning.
//!
//! All windows for a given simulation index end at the same absolute offset,
//! whatever the training size, so results are comparable across training
//! sizes. The span reserved per simulation is `windowSizeMax = max(training
//! sizes) + test size`; consecutive simulations slide by
//! `(total - windowSizeMax) / n_simulations` observations.

use crate::error::{Result, TrackerError};
use serde::{Deserialize, Serialize};
use std::ops::Range;
use tracing::debug;

/// Requested window geometry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowSpec {
    /// In-sample lengths to compare. Each includes its validation segment.
    pub training_sizes: Vec<usize>,
    pub test_size: usize,
    /// Share of each training size held out for validation.
    pub validation_fraction: f64,
    pub n_simulations: usize,
}

impl Default for WindowSpec {
    fn default() -> Self {
        Self {
            training_sizes: vec![63, 252],
            test_size: 126,
            validation_fraction: 0.2,
            n_simulations: 10,
        }
    }
}

impl WindowSpec {
    pub fn new(training_sizes: Vec<usize>, test_size: usize, n_simulations: usize) -> Self {
        Self {
            training_sizes,
            test_size,
            n_simulations,
            ..Default::default()
        }
    }

    pub fn with_validation_fraction(mut self, fraction: f64) -> Self {
        self.validation_fraction = fraction;
        self
    }

    /// Longest training size plus the test size.
    pub fn window_size_max(&self) -> usize {
        self.training_sizes.iter().copied().max().unwrap_or(0) + self.test_size
    }

    /// Observations held out for validation from a training size.
    pub fn validation_size(&self, training_size: usize) -> usize {
        (training_size as f64 * self.validation_fraction).floor() as usize
    }
}

/// Index ranges of one backtest iteration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Window {
    pub training_size_index: usize,
    pub window_index: usize,
    pub train: Range<usize>,
    pub validate: Range<usize>,
    pub test: Range<usize>,
}

impl Window {
    /// Train and validation segments joined.
    pub fn retrain(&self) -> Range<usize> {
        self.train.start..self.validate.end
    }
}

/// Every window of a run, grouped by training size.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowPlan {
    pub spec: WindowSpec,
    pub total_observations: usize,
    pub window_size_max: usize,
    pub slide: usize,
    /// `windows[ts][window]`.
    pub windows: Vec<Vec<Window>>,
}

impl WindowPlan {
    /// Plan all windows over `total_observations` observations.
    ///
    /// Fails with [`TrackerError::WindowConstruction`] rather than truncating
    /// when the history is too short.
    pub fn build(spec: &WindowSpec, total_observations: usize) -> Result<Self> {
        Self::build_with(spec, total_observations, true)
    }

    /// Plan train / test windows with no validation segment.
    pub fn build_without_validation(spec: &WindowSpec, total_observations: usize) -> Result<Self> {
        Self::build_with(spec, total_observations, false)
    }

    fn build_with(spec: &WindowSpec, total: usize, validate: bool) -> Result<Self> {
        let window_size_max = spec.window_size_max();
        let fail = |reason: String| TrackerError::WindowConstruction {
            required: window_size_max,
            available: total,
            reason,
        };

        if spec.training_sizes.is_empty() {
            return Err(fail("no training sizes requested".to_string()));
        }
        if spec.test_size == 0 {
            return Err(fail("test size must be positive".to_string()));
        }
        if spec.n_simulations == 0 {
            return Err(fail("number of simulations must be positive".to_string()));
        }
        if !(0.0..1.0).contains(&spec.validation_fraction) {
            return Err(fail(format!(
                "validation fraction {} outside [0, 1)",
                spec.validation_fraction
            )));
        }
        if total < window_size_max {
            return Err(fail("history shorter than the largest window".to_string()));
        }

        let rolling_max = total - window_size_max;
        let slide = rolling_max / spec.n_simulations;
        if slide == 0 {
            return Err(fail(format!(
                "{} spare observations cannot be spread over {} simulations",
                rolling_max, spec.n_simulations
            )));
        }

        let mut windows = Vec::with_capacity(spec.training_sizes.len());
        for (ts_idx, &size) in spec.training_sizes.iter().enumerate() {
            let validation = if validate { spec.validation_size(size) } else { 0 };
            let train = size.saturating_sub(validation);
            if train == 0 {
                return Err(fail(format!("training size {} leaves no training data", size)));
            }
            if validate && validation == 0 {
                return Err(fail(format!(
                    "training size {} leaves no validation data",
                    size
                )));
            }

            let per_size = (0..spec.n_simulations)
                .map(|k| {
                    let shift = k * slide;
                    let end = shift + window_size_max;
                    let offset = end - (size + spec.test_size);
                    Window {
                        training_size_index: ts_idx,
                        window_index: k,
                        train: offset..offset + train,
                        validate: offset + train..offset + size,
                        test: offset + size..end,
                    }
                })
                .collect();
            windows.push(per_size);
        }

        debug!(
            window_size_max,
            slide,
            n_windows = spec.n_simulations,
            "window plan built"
        );

        Ok(Self {
            spec: spec.clone(),
            total_observations: total,
            window_size_max,
            slide,
            windows,
        })
    }

    pub fn n_training_sizes(&self) -> usize {
        self.windows.len()
    }

    pub fn n_windows(&self) -> usize {
        self.spec.n_simulations
    }

    pub fn get(&self, training_size_index: usize, window_index: usize) -> Option<&Window> {
        self.windows
            .get(training_size_index)
            .and_then(|w| w.get(window_index))
    }

    /// All windows, training size outer.
    pub fn iter(&self) -> impl Iterator<Item = &Window> {
        self.windows.iter().flatten()
    }
}
