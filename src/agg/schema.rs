//! Child schema construction and column naming.
//!
//! Child columns are named after the base table and their source column:
//!
//! - grouping column: `<base>_<column>`
//! - measure: `<base>_<column>_<aggregate>`
//! - time bucket: `<base>_<column>_<granularity>`
//!
//! The name is the only human-readable link from a child column back to its
//! origin, so it must be deterministic. [`parse_child_column_name`] inverts it.

use chrono::Utc;

use crate::agg::derive::DerivedField;
use crate::agg::validate::ValidatedPlan;
use crate::catalog::{
    AggTag, AggregateTableDescriptor, Column, DataType, TableIdentity, TableSchema,
    parse_decimal_params,
};
use crate::config::RollupConfig;
use crate::dag::Granularity;
use crate::error::RollupError;
use crate::hash;

const AGGREGATE_SUFFIXES: [AggTag; 4] = [AggTag::Sum, AggTag::Count, AggTag::Min, AggTag::Max];

/// Name of the child column derived from `source` with `tag`.
pub fn child_column_name(
    base_table: &str,
    source: &str,
    tag: AggTag,
    time_bucket: Option<&Granularity>,
) -> String {
    match (time_bucket, tag) {
        (Some(g), _) => format!("{base_table}_{source}_{}", g.label()),
        (None, AggTag::None) => format!("{base_table}_{source}"),
        (None, tag) => format!("{base_table}_{source}_{tag}"),
    }
}

/// Recover `(source column, aggregate tag)` from a child column name.
///
/// A trailing canonical granularity label is stripped. Returns `None` when
/// the name does not start with `<base_table>_`.
pub fn parse_child_column_name(base_table: &str, name: &str) -> Option<(String, AggTag)> {
    let head = name.get(..base_table.len())?;
    let rest = name.get(base_table.len()..)?.strip_prefix('_')?;
    if rest.is_empty() || !head.eq_ignore_ascii_case(base_table) {
        return None;
    }

    if let Some((source, suffix)) = rest.rsplit_once('_') {
        for tag in AGGREGATE_SUFFIXES {
            if suffix == tag.as_str() && !source.is_empty() {
                return Some((source.to_string(), tag));
            }
        }
        let is_bucket = Granularity::parse(suffix).is_ok_and(|g| g.label() == suffix);
        if is_bucket && !source.is_empty() {
            return Some((source.to_string(), AggTag::None));
        }
    }
    Some((rest.to_string(), AggTag::None))
}

/// Builds child descriptors from validated plans.
#[derive(Debug, Clone)]
pub struct ChildSchemaBuilder {
    placeholder_column: String,
}

impl ChildSchemaBuilder {
    pub fn new(config: &RollupConfig) -> Self {
        Self {
            placeholder_column: config.placeholder_column.clone(),
        }
    }

    pub fn build(
        &self,
        child_name: &str,
        plan: &ValidatedPlan,
    ) -> Result<AggregateTableDescriptor, RollupError> {
        let child_name = child_name.trim();
        if child_name.is_empty() {
            return Err(RollupError::InvalidArgument(
                "rollup name cannot be empty".into(),
            ));
        }
        let parent = plan.base.identity.clone();
        let table_id = hash::stable_id(&[&parent.table_id, &child_name.to_lowercase()]);
        let child = TableIdentity::new(parent.database.clone(), child_name, table_id.clone());

        let mut columns: Vec<Column> = plan
            .fields
            .iter()
            .map(|field| derived_column(&parent.table_name, &child, field))
            .collect();

        for (i, column) in columns.iter().enumerate() {
            if let Some(other) = columns[..i]
                .iter()
                .find(|c| c.name.eq_ignore_ascii_case(&column.name))
            {
                return Err(RollupError::MalformedSpecification(format!(
                    "derived column name {} collides: {} and {} map to the same child column",
                    column.name,
                    field_label(other),
                    field_label(column)
                )));
            }
        }
        if columns.iter().any(|c| c.name.eq_ignore_ascii_case(&self.placeholder_column)) {
            return Err(RollupError::MalformedSpecification(format!(
                "derived column name {} collides with the placeholder column",
                self.placeholder_column
            )));
        }
        columns.push(self.placeholder(&child));

        let fingerprint = hash::schema_fingerprint(&columns);
        Ok(AggregateTableDescriptor {
            name: child_name.to_string(),
            table_id,
            schema: TableSchema::new(columns),
            parent,
            granularity: plan.granularity,
            created_at: Utc::now(),
            fingerprint,
        })
    }

    fn placeholder(&self, child: &TableIdentity) -> Column {
        let name = self.placeholder_column.clone();
        let mut column = Column::new(
            name.clone(),
            DataType::Int,
            hash::stable_id(&[&child.table_id, &name]),
            child.clone(),
        );
        column.ddl = Some(ddl_text(&name, DataType::Int));
        column.invisible = true;
        column
    }
}

fn derived_column(base_table: &str, child: &TableIdentity, field: &DerivedField) -> Column {
    let name = child_column_name(
        base_table,
        &field.spec.source_column,
        field.meta.tag,
        field.spec.time_bucket.as_ref(),
    );
    let data_type = field.spec.data_type;
    let (precision, scale) = match parse_decimal_params(&data_type.canonical_name()) {
        Some((p, s)) => (Some(p), Some(s)),
        None => (None, None),
    };
    Column {
        ddl: Some(ddl_text(&name, data_type)),
        column_id: hash::stable_id(&[&child.table_id, &name]),
        name,
        data_type,
        precision,
        scale,
        table: child.clone(),
        aggregate: field.meta.tag,
        time_bucket: field.spec.time_bucket,
        parent: Some(field.meta.relation.clone()),
        invisible: false,
    }
}

/// `sum(amount)`, `1hour bucket of ts` or `column region`.
fn field_label(column: &Column) -> String {
    let source = column.source_column().unwrap_or(&column.name);
    match (&column.time_bucket, column.aggregate) {
        (Some(g), _) => format!("{g} bucket of {source}"),
        (None, AggTag::None) => format!("column {source}"),
        (None, tag) => format!("{tag}({source})"),
    }
}

fn ddl_text(name: &str, data_type: DataType) -> String {
    format!("`{name}` {data_type}")
}
