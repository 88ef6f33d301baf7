//! Catalog layer: table model, the rollup metadata document, and the
//! collaborator traits through which it is read and written.
//!
//! The base table owns a persisted [`ParentTableMetadata`] document listing
//! every registered [`AggregateTableDescriptor`]. How that document is stored
//! and how caches keyed by table identity are refreshed is up to the
//! [`MetadataStore`] implementation; this crate only reads it, mutates it
//! inside the registrar's lock window, and writes it back.
//!
//! [`InMemoryCatalog`] implements both [`TableResolver`] and [`MetadataStore`]
//! and serializes every document through JSON so that persistence behaves the
//! same way as against a real store.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::dag::Granularity;
use crate::error::RollupError;
use crate::hash;

// ── Table identity ─────────────────────────────────────────────────────────

/// Identity of a table: database, name, and stable id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableIdentity {
    pub database: String,
    pub table_name: String,
    pub table_id: String,
}

impl TableIdentity {
    pub fn new(
        database: impl Into<String>,
        table_name: impl Into<String>,
        table_id: impl Into<String>,
    ) -> Self {
        Self {
            database: database.into(),
            table_name: table_name.into(),
            table_id: table_id.into(),
        }
    }

    /// `database.table` as used in generated SQL.
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.database, self.table_name)
    }

    /// Case-insensitive lookup key (`database.table`, lowercased).
    pub fn key(&self) -> String {
        self.qualified_name().to_lowercase()
    }
}

impl fmt::Display for TableIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.database, self.table_name)
    }
}

// ── Data types ─────────────────────────────────────────────────────────────

/// Logical column type. The canonical string form doubles as the serde form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum DataType {
    Boolean,
    SmallInt,
    Int,
    BigInt,
    Float,
    Double,
    Decimal { precision: u8, scale: u8 },
    String,
    Date,
    Timestamp,
}

impl DataType {
    /// Canonical lowercase type name, e.g. `bigint` or `decimal(10,2)`.
    pub fn canonical_name(&self) -> String {
        match self {
            DataType::Boolean => "boolean".to_string(),
            DataType::SmallInt => "smallint".to_string(),
            DataType::Int => "int".to_string(),
            DataType::BigInt => "bigint".to_string(),
            DataType::Float => "float".to_string(),
            DataType::Double => "double".to_string(),
            DataType::Decimal { precision, scale } => format!("decimal({precision},{scale})"),
            DataType::String => "string".to_string(),
            DataType::Date => "date".to_string(),
            DataType::Timestamp => "timestamp".to_string(),
        }
    }

    /// Parse a type name. Accepts the canonical names plus common aliases.
    pub fn parse(s: &str) -> Result<Self, RollupError> {
        let norm = s.trim().to_lowercase();
        if let Some((precision, scale)) = parse_decimal_params(&norm) {
            return Ok(DataType::Decimal { precision, scale });
        }
        match norm.as_str() {
            "boolean" | "bool" => Ok(DataType::Boolean),
            "smallint" | "short" => Ok(DataType::SmallInt),
            "int" | "integer" => Ok(DataType::Int),
            "bigint" | "long" => Ok(DataType::BigInt),
            "float" | "real" => Ok(DataType::Float),
            "double" => Ok(DataType::Double),
            "decimal" => Ok(DataType::Decimal {
                precision: 10,
                scale: 0,
            }),
            "string" | "text" | "varchar" => Ok(DataType::String),
            "date" => Ok(DataType::Date),
            "timestamp" => Ok(DataType::Timestamp),
            _ => Err(RollupError::InvalidArgument(format!(
                "unknown data type '{s}'"
            ))),
        }
    }

    /// Whether values of this type can be time-bucketed.
    pub fn is_temporal(&self) -> bool {
        matches!(self, DataType::Date | DataType::Timestamp)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical_name())
    }
}

impl TryFrom<String> for DataType {
    type Error = RollupError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        DataType::parse(&value)
    }
}

impl From<DataType> for String {
    fn from(value: DataType) -> Self {
        value.canonical_name()
    }
}

/// Extract `(precision, scale)` from a `decimal(p,s)` type string.
///
/// Returns `None` for anything that is not a parameterised decimal.
pub fn parse_decimal_params(type_name: &str) -> Option<(u8, u8)> {
    let inner = type_name
        .trim()
        .strip_prefix("decimal(")?
        .strip_suffix(')')?;
    let (p, s) = inner.split_once(',')?;
    let precision = p.trim().parse().ok()?;
    let scale = s.trim().parse().ok()?;
    Some((precision, scale))
}

// ── Aggregate tags ─────────────────────────────────────────────────────────

/// The aggregate applied to a derived column. `None` marks a grouping
/// (dimension) column and serializes as the empty string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[derive(Serialize, Deserialize)]
pub enum AggTag {
    #[default]
    #[serde(rename = "")]
    None,
    #[serde(rename = "sum")]
    Sum,
    #[serde(rename = "count")]
    Count,
    #[serde(rename = "min")]
    Min,
    #[serde(rename = "max")]
    Max,
}

impl AggTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            AggTag::None => "",
            AggTag::Sum => "sum",
            AggTag::Count => "count",
            AggTag::Min => "min",
            AggTag::Max => "max",
        }
    }

    /// Parse a stored tag. Unknown values yield `None` (the Rust `Option`).
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "" => Some(AggTag::None),
            "sum" => Some(AggTag::Sum),
            "count" => Some(AggTag::Count),
            "min" => Some(AggTag::Min),
            "max" => Some(AggTag::Max),
            _ => None,
        }
    }

    pub fn is_none(&self) -> bool {
        *self == AggTag::None
    }
}

impl fmt::Display for AggTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Columns and schemas ────────────────────────────────────────────────────

/// Link from a derived column back to the single source column it reads.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ParentColumnRelation {
    pub column_id: String,
    pub column_name: String,
    pub table: TableIdentity,
}

/// A table column. Base-table columns leave the rollup fields at their
/// defaults; child columns carry the aggregate tag, the optional
/// time-bucket, and the relation to their source column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub data_type: DataType,
    #[serde(default)]
    pub precision: Option<u8>,
    #[serde(default)]
    pub scale: Option<u8>,
    pub column_id: String,
    pub table: TableIdentity,
    #[serde(default)]
    pub aggregate: AggTag,
    #[serde(default)]
    pub time_bucket: Option<Granularity>,
    #[serde(default)]
    pub parent: Option<ParentColumnRelation>,
    /// Literal `` `name` type`` text kept for schema-definition generation.
    #[serde(default)]
    pub ddl: Option<String>,
    /// Invisible placeholder measure; excluded from derivation and queries.
    #[serde(default)]
    pub invisible: bool,
}

impl Column {
    /// A plain base-table column.
    pub fn new(
        name: impl Into<String>,
        data_type: DataType,
        column_id: impl Into<String>,
        table: TableIdentity,
    ) -> Self {
        let (precision, scale) = match data_type {
            DataType::Decimal { precision, scale } => (Some(precision), Some(scale)),
            _ => (None, None),
        };
        Self {
            name: name.into(),
            data_type,
            precision,
            scale,
            column_id: column_id.into(),
            table,
            aggregate: AggTag::None,
            time_bucket: None,
            parent: None,
            ddl: None,
            invisible: false,
        }
    }

    /// Grouping column of a child table (no aggregate, no time bucket).
    pub fn is_dimension(&self) -> bool {
        !self.invisible && self.aggregate.is_none() && self.time_bucket.is_none()
    }

    /// Aggregated column of a child table.
    pub fn is_measure(&self) -> bool {
        !self.invisible && !self.aggregate.is_none()
    }

    /// Name of the source column this derived column reads, if any.
    pub fn source_column(&self) -> Option<&str> {
        self.parent.as_ref().map(|p| p.column_name.as_str())
    }
}

/// Ordered column list of a table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    pub columns: Vec<Column>,
}

impl TableSchema {
    pub fn new(columns: Vec<Column>) -> Self {
        Self { columns }
    }

    /// Case-insensitive column lookup.
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }

    /// Columns that take part in derivation and query generation.
    pub fn visible_columns(&self) -> impl Iterator<Item = &Column> {
        self.columns.iter().filter(|c| !c.invisible)
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }
}

// ── Rollup descriptors ─────────────────────────────────────────────────────

/// Structural + provenance record of one child (rollup) table, stored in the
/// parent's metadata document. Built once by the schema builder and never
/// modified afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateTableDescriptor {
    pub name: String,
    pub table_id: String,
    pub schema: TableSchema,
    pub parent: TableIdentity,
    #[serde(default)]
    pub granularity: Option<Granularity>,
    pub created_at: DateTime<Utc>,
    /// SHA-256 over the column layout; see [`hash::schema_fingerprint`].
    pub fingerprint: String,
}

impl AggregateTableDescriptor {
    /// Identity of the child table itself (lives in the parent's database).
    pub fn identity(&self) -> TableIdentity {
        TableIdentity::new(
            self.parent.database.clone(),
            self.name.clone(),
            self.table_id.clone(),
        )
    }

    /// The time-bucketed column, if this is a time-series rollup.
    pub fn time_column(&self) -> Option<&Column> {
        self.schema
            .visible_columns()
            .find(|c| c.time_bucket.is_some())
    }

    /// Source column names of the plain grouping columns (lowercased).
    pub fn dimension_sources(&self) -> BTreeSet<String> {
        self.schema
            .visible_columns()
            .filter(|c| c.is_dimension())
            .filter_map(|c| c.source_column().map(str::to_lowercase))
            .collect()
    }

    /// `(source column, aggregate)` pairs of every measure (lowercased names).
    pub fn measure_sources(&self) -> BTreeSet<(String, AggTag)> {
        self.schema
            .visible_columns()
            .filter(|c| c.is_measure())
            .filter_map(|c| c.source_column().map(|s| (s.to_lowercase(), c.aggregate)))
            .collect()
    }

    /// The non-time child column deriving `source` with the given tag.
    pub fn column_for_source(&self, source: &str, tag: AggTag) -> Option<&Column> {
        self.schema.visible_columns().find(|c| {
            c.time_bucket.is_none()
                && c.aggregate == tag
                && c.source_column()
                    .is_some_and(|s| s.eq_ignore_ascii_case(source))
        })
    }

    /// Case-insensitive name comparison.
    pub fn has_name(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }
}

/// Marks a table as a child: names the parent it was derived from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentRelationIdentifier {
    pub parent: TableIdentity,
    pub child_name: String,
}

/// Metadata document persisted with every table.
///
/// For a base table it lists the registered children; for a child table it
/// carries the relation identifiers pointing at its parent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentTableMetadata {
    pub table: TableIdentity,
    #[serde(default)]
    pub children: Vec<AggregateTableDescriptor>,
    #[serde(default)]
    pub parent_relations: Vec<ParentRelationIdentifier>,
}

impl ParentTableMetadata {
    pub fn new(table: TableIdentity) -> Self {
        Self {
            table,
            children: Vec::new(),
            parent_relations: Vec::new(),
        }
    }

    /// Whether this table is itself a rollup of another table.
    pub fn is_child_table(&self) -> bool {
        !self.parent_relations.is_empty()
    }

    /// Case-insensitive child lookup.
    pub fn child(&self, name: &str) -> Option<&AggregateTableDescriptor> {
        self.children.iter().find(|c| c.has_name(name))
    }

    pub fn child_names(&self) -> Vec<String> {
        self.children.iter().map(|c| c.name.clone()).collect()
    }

    /// Look up a child or fail with the list of known names.
    pub fn require_child(&self, name: &str) -> Result<&AggregateTableDescriptor, RollupError> {
        self.child(name).ok_or_else(|| RollupError::ChildNotFound {
            name: name.to_string(),
            known: self.child_names(),
        })
    }

    /// Serialize for storage.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from storage.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

// ── Collaborator traits ────────────────────────────────────────────────────

/// Storage format of a resolved relation. Only tables of the rollup-capable
/// columnar store can host rollups.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TableFormat {
    Columnar,
    External(String),
}

/// A resolved base table with a queryable schema.
#[derive(Debug, Clone)]
pub struct BaseTable {
    pub identity: TableIdentity,
    pub schema: TableSchema,
    pub format: TableFormat,
    /// True when the table's own metadata marks it as a child of another.
    pub is_child: bool,
}

impl BaseTable {
    /// Look up a source column; a missing column is a malformed definition.
    pub fn column(&self, name: &str) -> Result<&Column, RollupError> {
        self.schema.column(name).ok_or_else(|| {
            RollupError::MalformedSpecification(format!(
                "column {name} does not exist in table {}",
                self.identity
            ))
        })
    }
}

/// Resolves a table reference into a table whose schema can be queried.
pub trait TableResolver {
    fn resolve(&self, table: &TableIdentity) -> Result<BaseTable, RollupError>;
}

/// Read/write access to per-table metadata documents.
pub trait MetadataStore {
    fn get_metadata(&self, table: &TableIdentity) -> Result<ParentTableMetadata, RollupError>;

    fn put_metadata(
        &self,
        table: &TableIdentity,
        metadata: &ParentTableMetadata,
    ) -> Result<(), RollupError>;

    /// Invalidate any cache keyed by the table's identity.
    fn refresh_cache(&self, table: &TableIdentity) -> Result<(), RollupError>;
}

// ── In-memory catalog ──────────────────────────────────────────────────────

#[derive(Debug)]
struct CatalogEntry {
    identity: TableIdentity,
    schema: TableSchema,
    format: TableFormat,
    /// Metadata stored as JSON, exactly as a persisted document would be.
    metadata_json: Option<String>,
    cache_epoch: u64,
}

/// Thread-safe in-memory [`TableResolver`] + [`MetadataStore`].
#[derive(Debug, Clone, Default)]
pub struct InMemoryCatalog {
    inner: Arc<RwLock<HashMap<String, CatalogEntry>>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a columnar base table from `(name, type)` pairs. Column ids
    /// are derived from the table id and column name.
    pub fn create_table(
        &self,
        database: &str,
        table_name: &str,
        columns: &[(&str, DataType)],
    ) -> Result<TableIdentity, RollupError> {
        let table_id = hash::stable_id(&[database, table_name]);
        let identity = TableIdentity::new(database, table_name, table_id);
        let columns = columns
            .iter()
            .map(|(name, data_type)| {
                Column::new(
                    *name,
                    *data_type,
                    hash::stable_id(&[&identity.table_id, name]),
                    identity.clone(),
                )
            })
            .collect();
        self.register_table(identity.clone(), TableSchema::new(columns), TableFormat::Columnar)?;
        Ok(identity)
    }

    /// Register a table with an explicit schema and format.
    pub fn register_table(
        &self,
        identity: TableIdentity,
        schema: TableSchema,
        format: TableFormat,
    ) -> Result<(), RollupError> {
        let mut inner = self.write()?;
        let key = identity.key();
        if inner.contains_key(&key) {
            return Err(RollupError::InvalidArgument(format!(
                "table {identity} already exists in catalog"
            )));
        }
        inner.insert(
            key,
            CatalogEntry {
                identity,
                schema,
                format,
                metadata_json: None,
                cache_epoch: 0,
            },
        );
        Ok(())
    }

    /// Create the physical child table for a registered descriptor. Its
    /// metadata carries the parent relation, so it can never be used as a
    /// base for further plain rollups.
    pub fn materialize_child(
        &self,
        descriptor: &AggregateTableDescriptor,
    ) -> Result<TableIdentity, RollupError> {
        let identity = descriptor.identity();
        self.register_table(
            identity.clone(),
            descriptor.schema.clone(),
            TableFormat::Columnar,
        )?;
        let mut metadata = ParentTableMetadata::new(identity.clone());
        metadata.parent_relations.push(ParentRelationIdentifier {
            parent: descriptor.parent.clone(),
            child_name: descriptor.name.clone(),
        });
        self.put_metadata(&identity, &metadata)?;
        Ok(identity)
    }

    /// Look up a registered table by database and name.
    pub fn table(&self, database: &str, table_name: &str) -> Option<TableIdentity> {
        let key = format!("{database}.{table_name}").to_lowercase();
        self.read().ok()?.get(&key).map(|e| e.identity.clone())
    }

    /// How many times the cache for `table` has been refreshed.
    pub fn cache_epoch(&self, table: &TableIdentity) -> u64 {
        self.read()
            .ok()
            .and_then(|inner| inner.get(&table.key()).map(|e| e.cache_epoch))
            .unwrap_or(0)
    }

    fn read(
        &self,
    ) -> Result<std::sync::RwLockReadGuard<'_, HashMap<String, CatalogEntry>>, RollupError> {
        self.inner
            .read()
            .map_err(|_| RollupError::InternalError("catalog lock poisoned".into()))
    }

    fn write(
        &self,
    ) -> Result<std::sync::RwLockWriteGuard<'_, HashMap<String, CatalogEntry>>, RollupError> {
        self.inner
            .write()
            .map_err(|_| RollupError::InternalError("catalog lock poisoned".into()))
    }
}

fn table_not_found(table: &TableIdentity) -> RollupError {
    RollupError::NotFound(table.qualified_name())
}

impl TableResolver for InMemoryCatalog {
    fn resolve(&self, table: &TableIdentity) -> Result<BaseTable, RollupError> {
        let is_child = self.get_metadata(table)?.is_child_table();
        let inner = self.read()?;
        let entry = inner.get(&table.key()).ok_or_else(|| table_not_found(table))?;
        Ok(BaseTable {
            identity: entry.identity.clone(),
            schema: entry.schema.clone(),
            format: entry.format.clone(),
            is_child,
        })
    }
}

impl MetadataStore for InMemoryCatalog {
    fn get_metadata(&self, table: &TableIdentity) -> Result<ParentTableMetadata, RollupError> {
        let inner = self.read()?;
        let entry = inner.get(&table.key()).ok_or_else(|| table_not_found(table))?;
        match &entry.metadata_json {
            Some(json) => ParentTableMetadata::from_json(json).map_err(|e| {
                RollupError::MetadataWrite(format!("corrupt metadata for {table}: {e}"))
            }),
            None => Ok(ParentTableMetadata::new(entry.identity.clone())),
        }
    }

    fn put_metadata(
        &self,
        table: &TableIdentity,
        metadata: &ParentTableMetadata,
    ) -> Result<(), RollupError> {
        let json = metadata.to_json().map_err(|e| {
            RollupError::MetadataWrite(format!("metadata serialization failed: {e}"))
        })?;
        let mut inner = self.write()?;
        let entry = inner
            .get_mut(&table.key())
            .ok_or_else(|| table_not_found(table))?;
        entry.metadata_json = Some(json);
        Ok(())
    }

    fn refresh_cache(&self, table: &TableIdentity) -> Result<(), RollupError> {
        let mut inner = self.write()?;
        let entry = inner
            .get_mut(&table.key())
            .ok_or_else(|| table_not_found(table))?;
        entry.cache_epoch += 1;
        Ok(())
    }
}
