//! Hot-path benchmarks

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use framepace::analyzer::RenderAnalyzer;
use framepace::config::{AnalyzerSettings, CollectorSettings, SchedulerSettings};
use framepace::device::DeviceClassification;
use framepace::metrics::MetricsCollector;
use framepace::perf_config::PerformanceConfigStore;
use framepace::scheduler::SchedulerState;

fn populated_collector(components: usize, samples: usize) -> Arc<MetricsCollector> {
    let collector = Arc::new(MetricsCollector::new(
        CollectorSettings::default(),
        DeviceClassification::Medium,
    ));
    for c in 0..components {
        let name = format!("Component{}", c);
        for s in 0..samples {
            collector.record_render(&name, (s % 40) as f64);
        }
    }
    collector
}

fn benchmark_record_render(c: &mut Criterion) {
    let mut group = c.benchmark_group("Record Render");

    let collector = populated_collector(1, 0);
    group.bench_function("single_component", |b| {
        b.iter(|| collector.record_render(black_box("Header"), black_box(4.2)))
    });

    let collector = populated_collector(200, 20);
    let names: Vec<String> = (0..200).map(|c| format!("Component{}", c)).collect();
    group.bench_function("200_components", |b| {
        let mut i = 0;
        b.iter(|| {
            i = (i + 1) % names.len();
            collector.record_render(black_box(&names[i]), black_box(12.5))
        })
    });

    group.finish();
}

fn benchmark_analyze_all(c: &mut Criterion) {
    let mut group = c.benchmark_group("Analyze");

    for components in [10, 100, 500].iter() {
        let collector = populated_collector(*components, 60);
        let analyzer = RenderAnalyzer::new(collector, AnalyzerSettings::default());
        group.bench_function(format!("components_{}", components), |b| {
            b.iter(|| black_box(analyzer.analyze_all()))
        });
    }

    group.finish();
}

fn benchmark_scheduler_advance(c: &mut Criterion) {
    let settings = SchedulerSettings::default();

    c.bench_function("scheduler_advance_60hz", |b| {
        let mut state = SchedulerState::new(1000.0 / 30.0, settings.fps_history);
        let mut now = 0.0;
        b.iter(|| {
            now += 1000.0 / 60.0;
            black_box(state.advance(black_box(now), false, &settings))
        })
    });
}

fn benchmark_config_snapshot(c: &mut Criterion) {
    let store = PerformanceConfigStore::new(DeviceClassification::High, Default::default());
    c.bench_function("config_snapshot", |b| b.iter(|| black_box(store.get_snapshot())));
}

criterion_group!(
    benches,
    benchmark_record_render,
    benchmark_analyze_all,
    benchmark_scheduler_advance,
    benchmark_config_snapshot,
);
criterion_main!(benches);
