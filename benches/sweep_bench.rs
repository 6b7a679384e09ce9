//! Performance benchmarks for model sweeps and metrics.
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use robust_index::analytics::PerformanceMetrics;
use robust_index::model::{DroCvarModel, ModelSpec, ObjectiveKind, ParameterGrid};
use robust_index::portfolio::{index_path, simulate_panel, Portfolio, RebalancePolicy};
use robust_index::risk::conditional_value_at_risk;
use robust_index::solver::ClarabelSolver;
use robust_index::synthetic::SyntheticMarket;
use robust_index::windows::{WindowPlan, WindowSpec};

/// Benchmark the radius sweep for growing scenario sets.
fn bench_sweep(c: &mut Criterion) {
    let mut group = c.benchmark_group("sweep");
    group.sample_size(10); // Fewer samples for slow benchmarks

    let grid = ParameterGrid::single(0.95, 2.0, ParameterGrid::logspace_with_zero(-6.0, -2.0, 10));

    for scenarios in [63, 126, 252].iter() {
        let panel = SyntheticMarket::new(20).generate(*scenarios).unwrap();
        for kind in [ObjectiveKind::Tracking, ObjectiveKind::ExcessCvar] {
            group.bench_with_input(
                BenchmarkId::new(kind.to_string(), scenarios),
                &panel,
                |b, panel| {
                    b.iter(|| {
                        let spec = ModelSpec::new(kind, 0.95, 2.0);
                        let mut model = DroCvarModel::new(spec, ClarabelSolver::default());
                        model.set_data(black_box(panel)).unwrap();
                        model.sweep(&grid).unwrap()
                    })
                },
            );
        }
    }

    group.finish();
}

/// Benchmark metric computation and wealth simulation.
fn bench_metrics(c: &mut Criterion) {
    let panel = SyntheticMarket::new(50).generate(1000).unwrap();
    let portfolio = Portfolio::equal_weight(50).unwrap();
    let benchmark = index_path(panel.benchmark(), 0.0);

    let mut group = c.benchmark_group("metrics");

    group.bench_function("simulate_buy_and_hold_1000", |b| {
        b.iter(|| simulate_panel(&portfolio, black_box(&panel), None, RebalancePolicy::Never))
    });

    group.bench_function("simulate_monthly_rebalance_1000", |b| {
        b.iter(|| simulate_panel(&portfolio, black_box(&panel), None, RebalancePolicy::Every(21)))
    });

    let wealth = simulate_panel(&portfolio, &panel, None, RebalancePolicy::Never).unwrap();
    group.bench_function("performance_metrics_1000", |b| {
        b.iter(|| PerformanceMetrics::compute(black_box(&wealth), black_box(&benchmark), 0.95))
    });

    group.bench_function("cvar_1000", |b| {
        b.iter(|| conditional_value_at_risk(black_box(panel.benchmark()), 0.95))
    });

    group.finish();
}

/// Benchmark window planning.
fn bench_windows(c: &mut Criterion) {
    let spec = WindowSpec::new(vec![63, 126, 252, 504], 126, 50);
    c.bench_function("window_plan_5000", |b| {
        b.iter(|| WindowPlan::build(black_box(&spec), 5000))
    });
}

criterion_group!(benches, bench_sweep, bench_metrics, bench_windows);

criterion_main!(benches);
