//! Shared test helpers: an in-memory sales fixture plus fault-injecting
//! collaborators.

#![allow(dead_code)]

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use rollup_tables::agg::{Expr, LogicalPlan};
use rollup_tables::catalog::{MetadataStore, ParentTableMetadata};
use rollup_tables::query::{LoadEngine, LoadRequest};
use rollup_tables::{
    DataType, InMemoryCatalog, InMemoryLockManager, RollupConfig, RollupError, RollupManager,
    TableIdentity,
};

/// Install a fmt subscriber once so `RUST_LOG=debug cargo test` shows the
/// crate's tracing output.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// ── Fault-injecting metadata store ─────────────────────────────────────────

/// Which store call should fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    None,
    /// Fail the next `put_metadata` before writing.
    Put,
    /// Fail the next `refresh_cache` (the write before it has landed).
    Refresh,
    /// Fail every `get_metadata` after the first N successful reads.
    GetAfter(usize),
    /// Fail the next `refresh_cache`, then every later read.
    RefreshThenReads,
}

/// Wraps an [`InMemoryCatalog`] and fails one chosen call.
pub struct FlakyStore {
    pub inner: InMemoryCatalog,
    fault: Mutex<Fault>,
    gets: AtomicUsize,
    pub puts: AtomicUsize,
}

impl FlakyStore {
    pub fn new(inner: InMemoryCatalog) -> Self {
        Self {
            inner,
            fault: Mutex::new(Fault::None),
            gets: AtomicUsize::new(0),
            puts: AtomicUsize::new(0),
        }
    }

    pub fn arm(&self, fault: Fault) {
        *self.fault.lock().unwrap() = fault;
        self.gets.store(0, Ordering::SeqCst);
    }

    fn take(&self, wanted: Fault) -> bool {
        let mut fault = self.fault.lock().unwrap();
        if *fault == wanted {
            *fault = Fault::None;
            true
        } else {
            false
        }
    }
}

impl MetadataStore for FlakyStore {
    fn get_metadata(&self, table: &TableIdentity) -> Result<ParentTableMetadata, RollupError> {
        let n = self.gets.fetch_add(1, Ordering::SeqCst);
        if let Fault::GetAfter(limit) = *self.fault.lock().unwrap() {
            if n >= limit {
                return Err(RollupError::MetadataWrite("injected read failure".into()));
            }
        }
        self.inner.get_metadata(table)
    }

    fn put_metadata(
        &self,
        table: &TableIdentity,
        metadata: &ParentTableMetadata,
    ) -> Result<(), RollupError> {
        if self.take(Fault::Put) {
            return Err(RollupError::MetadataWrite("injected write failure".into()));
        }
        self.puts.fetch_add(1, Ordering::SeqCst);
        self.inner.put_metadata(table, metadata)
    }

    fn refresh_cache(&self, table: &TableIdentity) -> Result<(), RollupError> {
        if self.take(Fault::Refresh) {
            return Err(RollupError::MetadataWrite("injected cache refresh failure".into()));
        }
        if self.take(Fault::RefreshThenReads) {
            self.arm(Fault::GetAfter(0));
            return Err(RollupError::MetadataWrite("injected cache refresh failure".into()));
        }
        self.inner.refresh_cache(table)
    }
}

// ── Recording load engine ──────────────────────────────────────────────────

/// Records every load request; can be told to fail.
#[derive(Default)]
pub struct RecordingLoader {
    pub requests: Mutex<Vec<LoadRequest>>,
    fail: Mutex<Option<String>>,
}

impl RecordingLoader {
    pub fn fail_with(&self, message: &str) {
        *self.fail.lock().unwrap() = Some(message.to_string());
    }

    pub fn recorded(&self) -> Vec<LoadRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl LoadEngine for RecordingLoader {
    fn run_load(&self, request: &LoadRequest) -> Result<(), RollupError> {
        if let Some(message) = self.fail.lock().unwrap().clone() {
            return Err(RollupError::Load(message));
        }
        self.requests.lock().unwrap().push(request.clone());
        Ok(())
    }
}

// ── Sales fixture ──────────────────────────────────────────────────────────

/// `db.sales(id int, region string, store string, amount decimal(10,2), ts timestamp)`
/// behind a fault-injecting store.
pub struct SalesDb {
    pub catalog: InMemoryCatalog,
    pub store: FlakyStore,
    pub locks: InMemoryLockManager,
    pub loader: RecordingLoader,
    pub sales: TableIdentity,
}

impl SalesDb {
    pub fn new() -> Self {
        init_tracing();
        let catalog = InMemoryCatalog::new();
        let sales = catalog
            .create_table(
                "db",
                "sales",
                &[
                    ("id", DataType::Int),
                    ("region", DataType::String),
                    ("store", DataType::String),
                    (
                        "amount",
                        DataType::Decimal {
                            precision: 10,
                            scale: 2,
                        },
                    ),
                    ("ts", DataType::Timestamp),
                ],
            )
            .unwrap();
        Self {
            store: FlakyStore::new(catalog.clone()),
            catalog,
            locks: InMemoryLockManager::new(),
            loader: RecordingLoader::default(),
            sales,
        }
    }

    pub fn manager(&self) -> RollupManager<'_> {
        self.manager_with(RollupConfig::default())
    }

    pub fn manager_with(&self, config: RollupConfig) -> RollupManager<'_> {
        RollupManager::new(&self.catalog, &self.store, &self.locks, &self.loader, config)
    }

    pub fn child_names(&self) -> Vec<String> {
        self.catalog.get_metadata(&self.sales).unwrap().child_names()
    }

    /// `SELECT region, SUM(amount) FROM sales GROUP BY region`
    pub fn region_sum_plan(&self) -> LogicalPlan {
        LogicalPlan::scan(self.sales.clone()).aggregate(
            vec![Expr::col("region")],
            vec![Expr::col("region"), Expr::agg("sum", Expr::col("amount"))],
        )
    }

    /// `SELECT timeseries(ts, g), region, SUM(amount), AVG(amount) ... GROUP BY 1, 2`
    pub fn bucketed_plan(&self, granularity: &str) -> LogicalPlan {
        let bucket = || Expr::call("timeseries", vec![Expr::col("ts"), Expr::string(granularity)]);
        LogicalPlan::scan(self.sales.clone()).aggregate(
            vec![bucket(), Expr::col("region")],
            vec![
                bucket(),
                Expr::col("region"),
                Expr::agg("sum", Expr::col("amount")),
                Expr::agg("avg", Expr::col("amount")),
            ],
        )
    }
}
