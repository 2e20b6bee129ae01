//! Benchmarks for stratus core operations.
//!
//! Run with: cargo bench
//!
//! Results include 95% confidence intervals via Criterion.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use indexmap::IndexMap;
use std::path::Path;
use stratus::core::env::Environment;
use stratus::core::{parser, resolver, state, synth};
use stratus::tripwire::hasher;

const CONFIG: &str = r#"
version: "1.0"
name: bench-app
network:
  cidr: 10.0.0.0/16
  max_azs: 3
database:
  name: bench_db
  min_capacity: 1
  max_capacity: 8
secrets:
  external:
    AWS_API_KEY_ID: { name: AwsApiKeyId }
    AWS_API_SECRET: { name: AwsApiSecret, field: secret }
service:
  cpu: 512
  memory_mib: 2048
  image:
    registry:
      uri: public.ecr.aws/example/app:latest
"#;

fn bench_blake3_string(c: &mut Criterion) {
    let mut group = c.benchmark_group("blake3_string");
    for size in [64, 256, 1024, 4096] {
        let input: String = "x".repeat(size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &input, |b, input| {
            b.iter(|| black_box(hasher::hash_string(black_box(input))));
        });
    }
    group.finish();
}

fn bench_hash_directory(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    for i in 0..32 {
        let sub = dir.path().join(format!("pkg{}", i % 4));
        std::fs::create_dir_all(&sub).unwrap();
        std::fs::write(sub.join(format!("mod{i}.py")), vec![b'#'; 4096]).unwrap();
    }

    c.bench_function("hash_directory_32_files", |b| {
        b.iter(|| black_box(hasher::hash_directory(black_box(dir.path())).unwrap()));
    });
}

fn bench_config_parse(c: &mut Criterion) {
    c.bench_function("parse_and_validate_config", |b| {
        b.iter(|| {
            let config = parser::parse_config(black_box(CONFIG)).unwrap();
            black_box(parser::validate_config(&config));
        });
    });
}

fn bench_synthesize(c: &mut Criterion) {
    let config = parser::parse_config(CONFIG).unwrap();
    let env = Environment::new("123456789012", "us-east-1").unwrap();

    c.bench_function("synthesize_assembly", |b| {
        b.iter(|| black_box(synth::synthesize(black_box(&config), &env, Path::new(".")).unwrap()));
    });

    let assembly = synth::synthesize(&config, &env, Path::new(".")).unwrap();
    c.bench_function("manifest_from_assembly", |b| {
        b.iter(|| black_box(state::manifest_from_assembly(black_box(&assembly)).unwrap()));
    });
}

fn bench_topo_sort(c: &mut Criterion) {
    let mut group = c.benchmark_group("topo_sort");
    for n in [10, 50, 100] {
        let mut edges: IndexMap<String, Vec<String>> = IndexMap::new();
        for i in 0..n {
            let deps = if i > 0 {
                vec![format!("node-{:04}", i - 1)]
            } else {
                Vec::new()
            };
            edges.insert(format!("node-{i:04}"), deps);
        }
        group.bench_with_input(BenchmarkId::from_parameter(n), &edges, |b, edges| {
            b.iter(|| black_box(resolver::topo_order(black_box(edges)).unwrap()));
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_blake3_string,
    bench_hash_directory,
    bench_config_parse,
    bench_synthesize,
    bench_topo_sort
);
criterion_main!(benches);
