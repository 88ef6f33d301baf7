//! Caller-facing rollup operations.
//!
//! [`RollupManager`] wires the validator, schema builder, registrar and query
//! generator to the external collaborators: a table resolver, a metadata
//! store, a lock provider and a load engine. Settings come from an explicit
//! [`RollupConfig`]; nothing is read from ambient state.

use std::time::Instant;

use crate::agg::{ChildSchemaBuilder, LogicalPlan, PlanValidator};
use crate::catalog::{AggregateTableDescriptor, MetadataStore, TableIdentity, TableResolver};
use crate::config::RollupConfig;
use crate::dag::order_by_granularity;
use crate::error::RollupError;
use crate::lock::LockProvider;
use crate::query::{LoadEngine, LoadOptions, LoadRequest, QueryGenerator};
use crate::registrar::{MetadataRegistrar, RegistrationReport};

/// Result of [`RollupManager::create_rollup`].
#[derive(Debug, Clone)]
pub struct CreatedRollup {
    pub descriptor: AggregateTableDescriptor,
    pub registration: RegistrationReport,
    /// The initial load, when `load_on_create` is enabled.
    pub initial_load: Option<LoadRequest>,
}

/// Creates, loads, drops and lists rollups of base tables.
pub struct RollupManager<'a> {
    resolver: &'a dyn TableResolver,
    store: &'a dyn MetadataStore,
    locks: &'a dyn LockProvider,
    loader: &'a dyn LoadEngine,
    config: RollupConfig,
}

impl<'a> RollupManager<'a> {
    pub fn new(
        resolver: &'a dyn TableResolver,
        store: &'a dyn MetadataStore,
        locks: &'a dyn LockProvider,
        loader: &'a dyn LoadEngine,
        config: RollupConfig,
    ) -> Self {
        Self {
            resolver,
            store,
            locks,
            loader,
            config,
        }
    }

    pub fn config(&self) -> &RollupConfig {
        &self.config
    }

    fn registrar(&self) -> MetadataRegistrar<'a> {
        MetadataRegistrar::new(self.store, self.locks)
    }

    /// Create a rollup named `name` defined by the analyzed aggregate `plan`.
    ///
    /// `name` may be qualified (`db.name`); the database must be the base
    /// table's. If the initial load fails and `drop_on_failed_load` is set,
    /// the new descriptor is unregistered again before the load error is
    /// returned.
    pub fn create_rollup(
        &self,
        name: &str,
        plan: &LogicalPlan,
    ) -> Result<CreatedRollup, RollupError> {
        // ── Validation (no side effects) ────────────────────────────────
        let validated = PlanValidator::new(&self.config).validate(plan, self.resolver)?;
        let base = validated.base.identity.clone();
        let child_name = parse_child_name(name, &base)?;
        let descriptor = ChildSchemaBuilder::new(&self.config).build(&child_name, &validated)?;

        // ── Registration ────────────────────────────────────────────────
        let registration = self.registrar().register(&base, descriptor.clone())?;

        // ── Initial load ────────────────────────────────────────────────
        let initial_load = if self.config.load_on_create {
            let options = LoadOptions {
                overwrite: true,
                segments: None,
            };
            match self.run_load(&base, &descriptor.name, options) {
                Ok(request) => Some(request),
                Err(e) => {
                    if self.config.drop_on_failed_load {
                        self.compensate_failed_load(&base, &descriptor.name, &e);
                    }
                    return Err(e);
                }
            }
        } else {
            None
        };

        tracing::info!(
            base = %base,
            child = %descriptor.name,
            columns = descriptor.schema.columns.len(),
            granularity = ?descriptor.granularity.map(|g| g.label()),
            loaded = initial_load.is_some(),
            "rollup created"
        );

        Ok(CreatedRollup {
            descriptor,
            registration,
            initial_load,
        })
    }

    /// Load (append to) an existing rollup, optionally restricted to
    /// `segments`.
    pub fn load_rollup(
        &self,
        base: &TableIdentity,
        child_name: &str,
        segments: Option<Vec<String>>,
    ) -> Result<LoadRequest, RollupError> {
        let options = LoadOptions {
            overwrite: false,
            segments,
        };
        self.run_load(base, child_name, options)
    }

    /// Unregister a rollup from its base table.
    pub fn drop_rollup(
        &self,
        base: &TableIdentity,
        child_name: &str,
    ) -> Result<RegistrationReport, RollupError> {
        let report = self.registrar().unregister(base, child_name)?;
        tracing::info!(base = %base, child = child_name, "rollup dropped");
        Ok(report)
    }

    /// Rollups of `base`: time-bucketed ones finest first, then the rest in
    /// registration order.
    pub fn list_rollups(
        &self,
        base: &TableIdentity,
    ) -> Result<Vec<AggregateTableDescriptor>, RollupError> {
        let metadata = self.store.get_metadata(base)?;
        Ok(order_by_granularity(&metadata.children))
    }

    fn run_load(
        &self,
        base: &TableIdentity,
        child_name: &str,
        options: LoadOptions,
    ) -> Result<LoadRequest, RollupError> {
        let metadata = self.store.get_metadata(base)?;
        let job = QueryGenerator::new(&self.config).build_load_job(&metadata, child_name, options)?;

        let started = Instant::now();
        self.loader.run_load(&job.request)?;
        tracing::info!(
            base = %base,
            child = child_name,
            source = ?job.source,
            elapsed_ms = started.elapsed().as_secs_f64() * 1000.0,
            "rollup loaded"
        );
        Ok(job.request)
    }

    fn compensate_failed_load(&self, base: &TableIdentity, child_name: &str, cause: &RollupError) {
        tracing::warn!(
            base = %base,
            child = child_name,
            error = %cause,
            "initial rollup load failed; unregistering"
        );
        if let Err(e) = self.registrar().unregister(base, child_name) {
            tracing::error!(
                base = %base,
                child = child_name,
                error = %e,
                "failed to unregister rollup after failed load"
            );
        }
    }
}

/// Split a possibly database-qualified rollup name. The database, when
/// given, must match the base table's.
fn parse_child_name(name: &str, base: &TableIdentity) -> Result<String, RollupError> {
    let parts: Vec<&str> = name.trim().splitn(2, '.').collect();
    let child = match parts.as_slice() {
        [child] => *child,
        [database, child] if database.eq_ignore_ascii_case(&base.database) => *child,
        [database, _] => {
            return Err(RollupError::InvalidArgument(format!(
                "rollup {name} must live in database {} of its base table, not {database}",
                base.database
            )));
        }
        _ => {
            return Err(RollupError::InvalidArgument(format!(
                "invalid rollup name: {name}"
            )));
        }
    };
    if child.is_empty() {
        return Err(RollupError::InvalidArgument(format!(
            "invalid rollup name: {name}"
        )));
    }
    Ok(child.to_string())
}
