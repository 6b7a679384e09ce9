//! Pre-sized result arenas for walk-forward runs.
//!
//! Every cell is addressed by a fixed multi-index and may be written once.
//! Unwritten cells stay at zero, which is also how a window with no feasible
//! solution shows up in the output.

use crate::analytics::{MetricKind, PerformanceMetrics};
use crate::error::{Result, TrackerError};
use crate::persistence::{Manifest, ResultSink};
use serde::{Deserialize, Serialize};

/// Row-major dense array with write-once cells.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Arena {
    shape: Vec<usize>,
    data: Vec<f64>,
    written: Vec<bool>,
}

impl Arena {
    /// Zero-filled arena of the given shape.
    pub fn zeros(shape: &[usize]) -> Self {
        let len = shape.iter().product();
        Self {
            shape: shape.to_vec(),
            data: vec![0.0; len],
            written: vec![false; len],
        }
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Flat row-major contents.
    pub fn data(&self) -> &[f64] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    fn offset(&self, index: &[usize]) -> Result<usize> {
        if index.len() != self.shape.len() {
            return Err(TrackerError::InvalidInput(format!(
                "index of rank {} for arena of rank {}",
                index.len(),
                self.shape.len()
            )));
        }

        let mut offset = 0;
        for (i, (&idx, &dim)) in index.iter().zip(self.shape.iter()).enumerate() {
            if idx >= dim {
                return Err(TrackerError::InvalidInput(format!(
                    "index {} out of bounds for axis {} of size {}",
                    idx, i, dim
                )));
            }
            offset = offset * dim + idx;
        }
        Ok(offset)
    }

    pub fn get(&self, index: &[usize]) -> Result<f64> {
        Ok(self.data[self.offset(index)?])
    }

    pub fn is_written(&self, index: &[usize]) -> Result<bool> {
        Ok(self.written[self.offset(index)?])
    }

    /// Write one cell. A second write to the same cell is an error.
    pub fn set(&mut self, index: &[usize], value: f64) -> Result<()> {
        let offset = self.offset(index)?;
        if self.written[offset] {
            return Err(TrackerError::InvalidInput(format!(
                "cell {:?} already written",
                index
            )));
        }
        self.data[offset] = value;
        self.written[offset] = true;
        Ok(())
    }

    /// Add to a cell without the write-once check.
    pub fn add(&mut self, index: &[usize], value: f64) -> Result<()> {
        let offset = self.offset(index)?;
        self.data[offset] += value;
        self.written[offset] = true;
        Ok(())
    }

    /// Write the innermost axis at `prefix` in one go.
    pub fn set_row(&mut self, prefix: &[usize], values: &[f64]) -> Result<()> {
        let inner = self.shape.last().copied().unwrap_or(0);
        if values.len() != inner {
            return Err(TrackerError::InvalidInput(format!(
                "row of length {} for innermost axis of size {}",
                values.len(),
                inner
            )));
        }
        let mut index = prefix.to_vec();
        index.push(0);
        for (i, value) in values.iter().enumerate() {
            if let Some(last) = index.last_mut() {
                *last = i;
            }
            self.set(&index, *value)?;
        }
        Ok(())
    }

    /// Innermost axis at `prefix`.
    pub fn row(&self, prefix: &[usize]) -> Result<&[f64]> {
        let mut index = prefix.to_vec();
        index.push(0);
        let start = self.offset(&index)?;
        let inner = self.shape.last().copied().unwrap_or(0);
        Ok(&self.data[start..start + inner])
    }

    /// Number of cells written so far.
    pub fn written_count(&self) -> usize {
        self.written.iter().filter(|w| **w).count()
    }

    /// Mean of the written, finite cells among `indices`. Unwritten cells
    /// hold a placeholder zero and are skipped; NaN when nothing qualifies.
    pub fn mean_written<I>(&self, indices: I) -> Result<f64>
    where
        I: IntoIterator<Item = Vec<usize>>,
    {
        let mut total = 0.0;
        let mut count = 0usize;
        for index in indices {
            let offset = self.offset(&index)?;
            let value = self.data[offset];
            if self.written[offset] && value.is_finite() {
                total += value;
                count += 1;
            }
        }
        Ok(if count == 0 { f64::NAN } else { total / count as f64 })
    }
}

/// Index of the stored model along the first accumulator axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelSlot {
    /// Sample-average baseline (ε = 0).
    Saa = 0,
    /// Robust model at the selected radius.
    Dro = 1,
}

impl ModelSlot {
    pub const ALL: [ModelSlot; 2] = [ModelSlot::Saa, ModelSlot::Dro];

    pub fn index(&self) -> usize {
        *self as usize
    }

    pub fn label(&self) -> &'static str {
        match self {
            ModelSlot::Saa => "SAA",
            ModelSlot::Dro => "DRO",
        }
    }
}

/// Arenas filled by a walk-forward run.
///
/// * `certificate[model][ts][window]`: in-sample objective after retraining
/// * `objective[model][ts][window]`: out-of-sample empirical objective J
/// * `epsilon_opt[ts][window]`: selected radius
/// * `metrics[model][ts][window][metric]`: out-of-sample performance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestAccumulator {
    pub certificate: Arena,
    pub objective: Arena,
    pub epsilon_opt: Arena,
    pub metrics: Arena,
}

impl BacktestAccumulator {
    pub fn new(n_training_sizes: usize, n_windows: usize) -> Self {
        let n_models = ModelSlot::ALL.len();
        Self {
            certificate: Arena::zeros(&[n_models, n_training_sizes, n_windows]),
            objective: Arena::zeros(&[n_models, n_training_sizes, n_windows]),
            epsilon_opt: Arena::zeros(&[n_training_sizes, n_windows]),
            metrics: Arena::zeros(&[n_models, n_training_sizes, n_windows, MetricKind::COUNT]),
        }
    }

    pub fn n_training_sizes(&self) -> usize {
        self.epsilon_opt.shape()[0]
    }

    pub fn n_windows(&self) -> usize {
        self.epsilon_opt.shape()[1]
    }

    pub fn record_certificate(&mut self, model: ModelSlot, ts: usize, window: usize, value: f64) -> Result<()> {
        self.certificate.set(&[model.index(), ts, window], value)
    }

    pub fn record_objective(&mut self, model: ModelSlot, ts: usize, window: usize, value: f64) -> Result<()> {
        self.objective.set(&[model.index(), ts, window], value)
    }

    pub fn record_epsilon(&mut self, ts: usize, window: usize, epsilon: f64) -> Result<()> {
        self.epsilon_opt.set(&[ts, window], epsilon)
    }

    pub fn record_metrics(
        &mut self,
        model: ModelSlot,
        ts: usize,
        window: usize,
        metrics: &PerformanceMetrics,
    ) -> Result<()> {
        self.metrics
            .set_row(&[model.index(), ts, window], &metrics.to_array())
    }

    pub fn metric(&self, model: ModelSlot, ts: usize, window: usize, kind: MetricKind) -> Result<f64> {
        self.metrics.get(&[model.index(), ts, window, kind.index()])
    }

    /// Mean of a metric over the windows that produced it, ignoring
    /// non-finite values.
    pub fn mean_metric(&self, model: ModelSlot, ts: usize, kind: MetricKind) -> Result<f64> {
        self.metrics.mean_written(
            (0..self.n_windows()).map(|w| vec![model.index(), ts, w, kind.index()]),
        )
    }

    /// Mean out-of-sample objective J over the windows that produced it.
    pub fn mean_objective(&self, model: ModelSlot, ts: usize) -> Result<f64> {
        self.objective
            .mean_written((0..self.n_windows()).map(|w| vec![model.index(), ts, w]))
    }

    /// Persist the four arenas under `{prefix}_Certificate`, `{prefix}_J`,
    /// `{prefix}_epsOpt` and `{prefix}_OoS`, each with `base` plus its shape.
    pub fn flush(&self, sink: &mut dyn ResultSink, prefix: &str, base: &Manifest) -> Result<()> {
        let metric_names: Vec<&str> = MetricKind::ALL.iter().map(|k| k.name()).collect();
        let arrays = [
            ("Certificate", &self.certificate, None),
            ("J", &self.objective, None),
            ("epsOpt", &self.epsilon_opt, None),
            ("OoS", &self.metrics, Some(metric_names.join(","))),
        ];

        for (suffix, arena, statistics) in arrays {
            let mut manifest = base.clone();
            if let Some(statistics) = statistics {
                manifest = manifest.with("nStatistics", statistics);
            }
            let manifest = manifest.with_shape(arena.shape());
            sink.persist(&format!("{}_{}", prefix, suffix), arena.data(), &manifest)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::MemorySink;

    #[test]
    fn test_arena_indexing() {
        let mut arena = Arena::zeros(&[2, 3, 4]);
        assert_eq!(arena.len(), 24);
        arena.set(&[1, 2, 3], 5.0).unwrap();
        assert_eq!(arena.data()[23], 5.0);
        arena.set(&[0, 1, 0], 1.0).unwrap();
        assert_eq!(arena.data()[4], 1.0);
        assert_eq!(arena.get(&[0, 0, 0]).unwrap(), 0.0);
        assert_eq!(arena.written_count(), 2);
    }

    #[test]
    fn test_arena_write_once_and_bounds() {
        let mut arena = Arena::zeros(&[2, 2]);
        arena.set(&[0, 1], 1.0).unwrap();
        assert!(arena.set(&[0, 1], 2.0).is_err());
        assert!(arena.set(&[2, 0], 1.0).is_err());
        assert!(arena.set(&[0], 1.0).is_err());
        assert_eq!(arena.get(&[0, 1]).unwrap(), 1.0);

        arena.add(&[1, 1], 0.5).unwrap();
        arena.add(&[1, 1], 0.5).unwrap();
        assert_eq!(arena.get(&[1, 1]).unwrap(), 1.0);
    }

    #[test]
    fn test_rows() {
        let mut arena = Arena::zeros(&[2, 3]);
        arena.set_row(&[1], &[1.0, 2.0, 3.0]).unwrap();
        assert_eq!(arena.row(&[1]).unwrap(), &[1.0, 2.0, 3.0]);
        assert!(arena.set_row(&[0], &[1.0]).is_err());
    }

    #[test]
    fn test_means_skip_unwritten_windows() {
        let mut arena = Arena::zeros(&[3]);
        arena.set(&[0], 4.0).unwrap();
        arena.set(&[2], f64::NAN).unwrap();
        let mean = arena.mean_written((0..3).map(|i| vec![i])).unwrap();
        assert_eq!(mean, 4.0);
        assert!(Arena::zeros(&[2]).mean_written((0..2).map(|i| vec![i])).unwrap().is_nan());

        let mut acc = BacktestAccumulator::new(1, 3);
        let mut metrics = PerformanceMetrics::compute(&[100.0, 110.0], &[100.0, 100.0], 0.95).unwrap();
        metrics.total_return = -12.0;
        acc.record_metrics(ModelSlot::Saa, 0, 0, &metrics).unwrap();
        acc.record_objective(ModelSlot::Saa, 0, 0, 0.25).unwrap();

        // windows 1 and 2 were never solved
        assert_eq!(acc.mean_metric(ModelSlot::Saa, 0, MetricKind::TotalReturn).unwrap(), -12.0);
        assert_eq!(acc.mean_objective(ModelSlot::Saa, 0).unwrap(), 0.25);
        assert!(acc.mean_metric(ModelSlot::Dro, 0, MetricKind::TotalReturn).unwrap().is_nan());
        assert!(acc.mean_objective(ModelSlot::Dro, 0).unwrap().is_nan());
    }

    #[test]
    fn test_accumulator_flush() {
        let mut acc = BacktestAccumulator::new(2, 3);
        acc.record_epsilon(1, 2, 0.01).unwrap();
        acc.record_objective(ModelSlot::Dro, 0, 1, 0.5).unwrap();
        assert!(acc.record_objective(ModelSlot::Dro, 0, 1, 0.7).is_err());

        let mut sink = MemorySink::new();
        let base = Manifest::new().with("nSimulations", 3);
        acc.flush(&mut sink, "TrackingDRO", &base).unwrap();

        assert_eq!(sink.arrays.len(), 4);
        let eps = sink.get("TrackingDRO_epsOpt").unwrap();
        assert_eq!(eps.manifest.shape(), Some(vec![2, 3]));
        assert_eq!(eps.data[5], 0.01);

        let oos = sink.get("TrackingDRO_OoS").unwrap();
        assert_eq!(oos.data.len(), 2 * 2 * 3 * MetricKind::COUNT);
        assert_eq!(oos.manifest.get("nSimulations"), Some("3"));
    }
}
