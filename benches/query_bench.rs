//! Benchmarks for load-query generation and source selection.
//!
//! These measure SQL rendering for a single rollup and load planning across
//! a time-bucket hierarchy of growing size. No load engine is involved.
//!
//! Run with: `cargo bench --bench query_bench`

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use rollup_tables::agg::{ChildSchemaBuilder, Expr, LogicalPlan, PlanValidator};
use rollup_tables::catalog::ParentTableMetadata;
use rollup_tables::query::LoadOptions;
use rollup_tables::{
    AggregateTableDescriptor, DataType, InMemoryCatalog, QueryGenerator, RollupConfig,
    TableIdentity,
};

// ── Helpers ────────────────────────────────────────────────────────────────

const LADDER: [&str; 8] = [
    "1sec", "10sec", "1min", "5min", "15min", "1hour", "6hour", "1day",
];

fn make_catalog() -> (InMemoryCatalog, TableIdentity) {
    let catalog = InMemoryCatalog::new();
    let table = catalog
        .create_table(
            "db",
            "metrics",
            &[
                ("host", DataType::String),
                ("cpu", DataType::Double),
                ("ts", DataType::Timestamp),
            ],
        )
        .unwrap();
    (catalog, table)
}

fn make_rollup(
    catalog: &InMemoryCatalog,
    table: &TableIdentity,
    granularity: &str,
) -> AggregateTableDescriptor {
    let config = RollupConfig::default();
    let bucket = || Expr::call("timeseries", vec![Expr::col("ts"), Expr::string(granularity)]);
    let plan = LogicalPlan::scan(table.clone()).aggregate(
        vec![bucket(), Expr::col("host")],
        vec![
            bucket(),
            Expr::col("host"),
            Expr::agg("avg", Expr::col("cpu")),
            Expr::agg("max", Expr::col("cpu")),
        ],
    );
    let validated = PlanValidator::new(&config).validate(&plan, catalog).unwrap();
    ChildSchemaBuilder::new(&config)
        .build(&format!("metrics_{granularity}"), &validated)
        .unwrap()
}

// ── SQL rendering ──────────────────────────────────────────────────────────

fn bench_from_base_table(c: &mut Criterion) {
    let (catalog, table) = make_catalog();
    let child = make_rollup(&catalog, &table, "1hour");
    let generator = QueryGenerator::new(&RollupConfig::default());

    c.bench_function("from_base_table", |b| {
        b.iter(|| generator.from_base_table(black_box(&child)).unwrap());
    });
}

fn bench_from_ancestor(c: &mut Criterion) {
    let (catalog, table) = make_catalog();
    let hour = make_rollup(&catalog, &table, "1hour");
    let day = make_rollup(&catalog, &table, "1day");
    let generator = QueryGenerator::new(&RollupConfig::default());

    c.bench_function("from_ancestor", |b| {
        b.iter(|| generator.from_ancestor(black_box(&day), black_box(&hour)).unwrap());
    });
}

// ── Load planning ──────────────────────────────────────────────────────────

fn bench_build_load_job(c: &mut Criterion) {
    let (catalog, table) = make_catalog();
    let generator = QueryGenerator::new(&RollupConfig::default());
    let mut group = c.benchmark_group("build_load_job");

    for depth in [2, 4, 8] {
        let mut metadata = ParentTableMetadata::new(table.clone());
        metadata.children = LADDER[..depth]
            .iter()
            .rev()
            .map(|g| make_rollup(&catalog, &table, g))
            .collect();
        let target = format!("metrics_{}", LADDER[depth - 1]);

        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{depth}siblings")),
            &metadata,
            |b, metadata| {
                b.iter(|| {
                    generator
                        .build_load_job(black_box(metadata), &target, LoadOptions::default())
                        .unwrap()
                });
            },
        );
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_from_base_table,
    bench_from_ancestor,
    bench_build_load_job,
);
criterion_main!(benches);
