//! Synthetic market generator.
//!
//! One-factor geometric Brownian motion: the benchmark follows a GBM and each
//! asset loads on the benchmark's log-return shock plus an independent shock.
//! Time is measured in trading days (`dt = 1/252`).

use crate::error::{Result, TrackerError};
use crate::types::{weekdays_from, ReturnPanel};
use chrono::NaiveDate;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};

const DT: f64 = 1.0 / 252.0;

/// Builder for reproducible return panels.
#[derive(Debug, Clone)]
pub struct SyntheticMarket {
    n_assets: usize,
    seed: u64,
    /// Annual drift of the benchmark.
    pub market_drift: f64,
    /// Annual volatility of the benchmark.
    pub market_volatility: f64,
    /// Range of asset factor loadings.
    pub loading_range: (f64, f64),
    /// Range of annual idiosyncratic volatilities.
    pub idiosyncratic_range: (f64, f64),
    /// Range of annual asset alphas over the benchmark drift.
    pub alpha_range: (f64, f64),
    pub start: NaiveDate,
}

impl SyntheticMarket {
    pub fn new(n_assets: usize) -> Self {
        Self {
            n_assets,
            seed: 42,
            market_drift: 0.07,
            market_volatility: 0.18,
            loading_range: (0.7, 1.3),
            idiosyncratic_range: (0.10, 0.30),
            alpha_range: (-0.02, 0.04),
            start: NaiveDate::from_ymd_opt(2015, 1, 2).unwrap_or_default(),
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_market(mut self, drift: f64, volatility: f64) -> Self {
        self.market_drift = drift;
        self.market_volatility = volatility;
        self
    }

    /// Simulate `n_periods` daily observations.
    pub fn generate(&self, n_periods: usize) -> Result<ReturnPanel> {
        if self.n_assets == 0 {
            return Err(TrackerError::InvalidInput(
                "synthetic market needs at least one asset".to_string(),
            ));
        }

        let mut rng = StdRng::seed_from_u64(self.seed);
        let standard = Normal::new(0.0, 1.0)
            .map_err(|e| TrackerError::InvalidInput(format!("normal distribution: {}", e)))?;

        let loadings: Vec<f64> = (0..self.n_assets)
            .map(|_| sample_range(&mut rng, self.loading_range))
            .collect();
        let idio_vols: Vec<f64> = (0..self.n_assets)
            .map(|_| sample_range(&mut rng, self.idiosyncratic_range))
            .collect();
        let alphas: Vec<f64> = (0..self.n_assets)
            .map(|_| sample_range(&mut rng, self.alpha_range))
            .collect();

        let market_vol = self.market_volatility;
        let market_mu = (self.market_drift - 0.5 * market_vol * market_vol) * DT;

        let mut benchmark = Vec::with_capacity(n_periods);
        let mut assets = Vec::with_capacity(n_periods);

        for _ in 0..n_periods {
            let market_shock = market_vol * DT.sqrt() * standard.sample(&mut rng);
            benchmark.push((market_mu + market_shock).exp() - 1.0);

            let row = (0..self.n_assets)
                .map(|i| {
                    let total_vol_sq = (loadings[i] * market_vol).powi(2) + idio_vols[i].powi(2);
                    let mu = (self.market_drift + alphas[i] - 0.5 * total_vol_sq) * DT;
                    let idio = idio_vols[i] * DT.sqrt() * standard.sample(&mut rng);
                    (mu + loadings[i] * market_shock + idio).exp() - 1.0
                })
                .collect();
            assets.push(row);
        }

        let tickers = (1..=self.n_assets).map(|i| format!("SYN{:03}", i)).collect();
        ReturnPanel::new(weekdays_from(self.start, n_periods), benchmark, assets, tickers)
    }
}

fn sample_range(rng: &mut StdRng, (low, high): (f64, f64)) -> f64 {
    if high > low {
        rng.gen_range(low..high)
    } else {
        low
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generation_is_reproducible() {
        let a = SyntheticMarket::new(5).with_seed(3).generate(50).unwrap();
        let b = SyntheticMarket::new(5).with_seed(3).generate(50).unwrap();
        let c = SyntheticMarket::new(5).with_seed(4).generate(50).unwrap();

        assert_eq!(a, b);
        assert_ne!(a.benchmark(), c.benchmark());
        assert_eq!(a.n_assets(), 5);
        assert_eq!(a.len(), 50);
    }

    #[test]
    fn test_returns_are_plausible() {
        let panel = SyntheticMarket::new(4).generate(500).unwrap();
        let mean_bench = panel.benchmark().iter().sum::<f64>() / 500.0;
        assert!(mean_bench.abs() < 0.01);
        assert!(panel
            .assets()
            .iter()
            .flatten()
            .all(|r| *r > -1.0 && r.abs() < 0.5));
    }

    #[test]
    fn test_zero_assets_rejected() {
        assert!(SyntheticMarket::new(0).generate(10).is_err());
    }
}
