//! Example: Walk-forward radius selection
//!
//! Each window trains the robust model over a grid of Wasserstein radii,
//! picks the radius with the best validation objective, retrains on the full
//! training segment and compares the result with the sample-average model on
//! unseen test data.
//!
//! Run with: cargo run --example walkforward [config.toml]
//!
//! Set `RUST_LOG=debug` for per-window logs.

use robust_index::analytics::ResultFormatter;
use robust_index::config::ExperimentConfig;
use robust_index::data::{CsvPriceSource, ReturnSource};
use robust_index::model::DroCvarModel;
use robust_index::persistence::ExperimentLogSink;
use robust_index::sensitivity::{RadiusSensitivity, Scope};
use robust_index::synthetic::SyntheticMarket;
use robust_index::types::ReturnPanel;
use robust_index::walkforward::WalkForwardController;
use robust_index::{MetricKind, ModelSlot, Result};
use tracing_subscriber::EnvFilter;

fn load_panel(config: &ExperimentConfig) -> Result<ReturnPanel> {
    match &config.data {
        Some(data) => {
            let source = CsvPriceSource::open_with(&data.path, &data.csv_config())?;
            let (start, end) = data.date_range()?;
            source.get_returns(start, end, data.frequency)
        }
        None => {
            println!("   Using synthetic data");
            SyntheticMarket::new(12).generate(800)
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    println!("=== Walk-Forward Radius Selection ===\n");

    // 1. Configuration
    println!("1. Loading configuration...");
    let config = match std::env::args().nth(1) {
        Some(path) => ExperimentConfig::load(path)?,
        None => {
            let mut config = ExperimentConfig::default();
            config.windows.training_sizes = vec![63, 126];
            config.windows.n_simulations = 5;
            config.grid.count = 8;
            config.model.excess_return_annual = 0.02;
            config
        }
    };
    println!("   Model: {}", config.model.kind);
    println!("   Radii: {}", config.epsilons().len());
    println!("   Training sizes: {:?}\n", config.windows.training_sizes);

    // 2. Data
    println!("2. Loading data...");
    let panel = load_panel(&config)?;
    println!("   {} observations, {} assets\n", panel.len(), panel.n_assets());

    // 3. Walk-forward run
    println!("3. Running walk-forward analysis...");
    let spec = config.model_spec();
    let controller = WalkForwardController::new(config.walkforward_config());
    let report = if config.backtest.parallel {
        controller.run_parallel(&spec, &panel, || {
            DroCvarModel::new(spec.clone(), config.solver())
        })?
    } else {
        let mut model = DroCvarModel::new(spec.clone(), config.solver());
        controller.run(&mut model, &panel)?
    };
    println!("{}\n", report.summary());

    if let Some(outcome) = report.outcome(0, 0) {
        if let (Some(saa), Some(dro)) = (outcome.model(ModelSlot::Saa), outcome.model(ModelSlot::Dro)) {
            println!("   First window, selected radius {:?}:", outcome.epsilon_opt);
            ResultFormatter::print_metrics(&[("SAA", &saa.metrics), ("DRO", &dro.metrics)]);
        }
    }

    // 4. Radius sensitivity on the same data
    println!("\n4. Radius sensitivity...");
    let mut model = DroCvarModel::new(spec, config.solver());
    let study = RadiusSensitivity::new(config.window_spec(), config.epsilons())
        .with_rebalance(config.rebalance())
        .run(&mut model, &panel)?;
    for (ts, size) in config.windows.training_sizes.iter().enumerate() {
        let curve = study.mean_curve(Scope::OutOfSample, ts, MetricKind::TotalExcessReturn)?;
        let formatted: Vec<String> = curve.iter().map(|v| format!("{:.2}", v)).collect();
        println!("   Training size {}: out-of-sample excess return {}", size, formatted.join(" "));
    }

    // 5. Persist
    let folder = std::env::temp_dir().join("robust-index-results");
    println!("\n5. Writing results to {}", folder.display());
    let mut sink = ExperimentLogSink::new(&folder, 1)?;
    let prefix = config.model.kind.to_string();
    report.flush(&mut sink, &prefix)?;
    study.flush(&mut sink, &format!("{}_Sensitivity", prefix))?;

    println!("\n=== Walk-Forward Complete ===");
    Ok(())
}
