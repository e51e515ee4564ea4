//! FILENAME: core/pivot-engine/benches/pivot_calculations.rs
//! Benchmarks for grouping, client pivot and column hierarchy construction.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use pivot_engine::{build_column_hierarchy, build_grouped_rows, pivot_rows, PivotMetric, Row};

const REGIONS: &[&str] = &["North", "South", "East", "West"];
const CATEGORIES: &[&str] = &["Hardware", "Software", "Services", "Support", "Training"];

fn sales_rows(count: usize) -> Vec<Row> {
    (0..count)
        .map(|i| {
            Row::new()
                .with("Region", REGIONS[i % REGIONS.len()])
                .with("Category", CATEGORIES[(i / 3) % CATEGORIES.len()])
                .with("Year", format!("{}", 2018 + (i % 7)))
                .with("Sales", (i % 97) as f64 * 1.5)
                .with("Quantity", (i % 13) as i64)
        })
        .collect()
}

fn fields(names: &[&str]) -> Vec<String> {
    names.iter().map(|n| n.to_string()).collect()
}

fn bench_grouping(c: &mut Criterion) {
    let mut group = c.benchmark_group("grouping");
    let grouping = fields(&["Region", "Category", "Year"]);
    for size in [1_000usize, 10_000, 100_000] {
        let rows = sales_rows(size);
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &rows, |b, rows| {
            b.iter(|| build_grouped_rows(black_box(rows), &grouping))
        });
    }
    group.finish();
}

fn bench_client_pivot(c: &mut Criterion) {
    let mut group = c.benchmark_group("client_pivot");
    let grouping = fields(&["Region"]);
    let split = fields(&["Category", "Year"]);
    let metrics = vec![PivotMetric::new("Sales"), PivotMetric::new("Quantity")];
    for size in [1_000usize, 10_000, 100_000] {
        let rows = sales_rows(size);
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &rows, |b, rows| {
            b.iter(|| pivot_rows(black_box(rows), &grouping, &split, &metrics, "|"))
        });
    }
    group.finish();
}

fn bench_column_hierarchy(c: &mut Criterion) {
    let names: Vec<String> = CATEGORIES
        .iter()
        .flat_map(|category| {
            (2000..2025).flat_map(move |year| {
                ["Sales", "Quantity"]
                    .iter()
                    .map(move |metric| format!("{}|{}|{}", category, year, metric))
            })
        })
        .collect();

    c.bench_function("column_hierarchy", |b| {
        b.iter(|| build_column_hierarchy(black_box(&names), "|"))
    });
}

criterion_group!(benches, bench_grouping, bench_client_pivot, bench_column_hierarchy);
criterion_main!(benches);
