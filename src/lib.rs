//! rollup_tables: pre-aggregated rollup tables over columnar base tables.
//!
//! Given an analyzed aggregation query over a base table, this crate
//!
//! - derives the schema of a child table holding the pre-computed aggregates
//!   ([`agg::PlanValidator`], [`agg::FieldDeriver`], [`agg::ChildSchemaBuilder`]),
//! - registers the child's descriptor in the base table's metadata under the
//!   table's named locks, reverting on failure ([`registrar::MetadataRegistrar`]),
//! - generates the SQL that populates the child, reading from the coarsest
//!   compatible sibling rollup when rollups form a time-bucket hierarchy
//!   ([`query::QueryGenerator`], [`dag::RollupSelector`]).
//!
//! The SQL analyzer, lock primitive, metadata persistence and load engine are
//! external; they plug in through [`catalog::TableResolver`],
//! [`catalog::MetadataStore`], [`lock::LockProvider`] and
//! [`query::LoadEngine`]. In-memory implementations of the first three ship
//! with the crate.
//!
//! # Background
//!
//! - **Gupta & Mumick (1995)**: "Maintenance of Materialized Views: Problems,
//!   Techniques, and Applications", IEEE Data Engineering Bulletin.
//! - **Gray et al. (1997)**: "Data Cube: A Relational Aggregation Operator
//!   Generalizing Group-By, Cross-Tab, and Sub-Totals": distributive
//!   (`sum`, `count`, `min`, `max`) and algebraic (`avg`) aggregates, the ones
//!   that can be rolled up again.

pub mod agg;
pub mod api;
pub mod catalog;
pub mod config;
pub mod dag;
pub mod error;
pub mod hash;
pub mod lock;
pub mod query;
pub mod registrar;

pub use api::{CreatedRollup, RollupManager};
pub use catalog::{
    AggTag, AggregateTableDescriptor, Column, DataType, InMemoryCatalog, ParentTableMetadata,
    TableIdentity, TableSchema,
};
pub use config::RollupConfig;
pub use dag::{Granularity, RollupSelector, SourceCompatibility, TimeSeriesCompatibility};
pub use error::{RollupError, RollupErrorKind};
pub use lock::{InMemoryLockManager, LockKind};
pub use query::{LoadEngine, LoadRequest, QueryGenerator};
pub use registrar::{MetadataRegistrar, RegistrationReport, RegistrationState};
