#[macro_use]
extern crate criterion;

use std::collections::BTreeSet;

use cairn_gcs::GcsFilter;
use criterion::Criterion;
use rand::RngCore;

fn random_elements(count: usize) -> BTreeSet<Vec<u8>> {
    let mut rng = rand::thread_rng();
    let mut elements = BTreeSet::new();
    while elements.len() < count {
        let mut element = vec![0u8; 32];
        rng.fill_bytes(&mut element);
        elements.insert(element);
    }
    elements
}

fn bench(c: &mut Criterion) {
    let elements = random_elements(10_000);

    c.bench_function("GCS build 10k", |b| {
        b.iter(|| GcsFilter::new(0, 0, 20, &elements).expect("build"));
    });

    let filter = GcsFilter::new(0, 0, 20, &elements).expect("build");
    let absent = random_elements(1);
    let absent_element = absent.iter().next().expect("one element").clone();

    c.bench_function("GCS match absent", |b| {
        b.iter(|| filter.matches(&absent_element));
    });

    let queries = random_elements(100);
    c.bench_function("GCS match-any 100 absent", |b| {
        b.iter(|| filter.matches_any(&queries));
    });
}

criterion_group!(benches, bench);
criterion_main!(benches);
