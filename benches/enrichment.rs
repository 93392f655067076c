use criterion::{black_box, criterion_group, criterion_main, Criterion};

use phewas_stats::enrichment::batch::{class_enrichments, TargetClass};
use phewas_stats::enrichment::fisher_exact;

fn classes(n_classes: usize, n_genes: usize) -> Vec<TargetClass> {
    (0..n_classes)
        .map(|c| {
            let step = 3 + c % 17;
            let targets = (0..n_genes).map(|i| (i + c) % step == 0).collect();
            TargetClass::new(format!("ATC{c:04}"), targets)
        })
        .collect()
}

fn enrichment_benchmark(c: &mut Criterion) {
    c.bench_function("fisher-exact", |b| {
        b.iter(|| fisher_exact(black_box([[120, 880], [400, 18600]])))
    });

    let is_significant: Vec<bool> = (0..20_000).map(|i| i % 40 == 0).collect();
    let atc = classes(1_000, 20_000);
    c.bench_function("classes 1000", |b| {
        b.iter(|| class_enrichments(black_box(&is_significant), black_box(&atc)).unwrap())
    });
}

criterion_group!(enrichment, enrichment_benchmark);
criterion_main!(enrichment);
