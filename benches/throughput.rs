use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use serde_json::json;

use markup_history::{
    annotation::Annotation,
    config::HistoryConfig,
    core::history::AnnotationHistoryManager,
    types::AnnotationKind,
};

fn stroke(i: u64) -> Annotation {
    Annotation::local(
        format!("local_{i}"),
        AnnotationKind::Freehand,
        json!({ "points": [[i, i], [i + 1, i + 2], [i + 3, i + 5]], "width": 2 }),
    )
}

fn bench_adds(c: &mut Criterion) {
    c.bench_function("history_add_1k", |b| {
        b.iter(|| {
            let mut history = AnnotationHistoryManager::new();
            for i in 0..1_000u64 {
                history.add_annotation(stroke(i));
            }
        });
    });
}

fn bench_undo_redo_cycle(c: &mut Criterion) {
    c.bench_function("history_undo_redo_500", |b| {
        b.iter(|| {
            let mut history =
                AnnotationHistoryManager::with_config(HistoryConfig { max_history_size: 500 });
            for i in 0..500u64 {
                history.add_annotation(stroke(i));
            }
            while history.undo().is_some() {}
            while history.redo().is_some() {}
        });
    });
}

fn bench_batch_delete(c: &mut Criterion) {
    let mut group = c.benchmark_group("batch_delete");

    for n in [10usize, 100usize, 1000usize] {
        let seed: Vec<Annotation> = (0..2_000u64).map(stroke).collect();
        let victims: Vec<Annotation> = seed.iter().step_by(2).take(n).cloned().collect();
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, _| {
            b.iter(|| {
                let mut history = AnnotationHistoryManager::new();
                history.initialize(seed.clone());
                history.delete_annotations(victims.clone());
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_adds, bench_undo_redo_cycle, bench_batch_delete);
criterion_main!(benches);
