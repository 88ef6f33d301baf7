//! Plan validation: analyzed aggregate plan → ordered derived-field map.
//!
//! Accepted shape: `Aggregate(group_by, aggregates, relation)`, where the
//! relation is a columnar base table, optionally under one alias. The base
//! table must not itself be a rollup. Every projected expression must be a
//! supported aggregate, a bare grouping column, a time-bucket call, or the
//! analyzer's rewrite guard.

use crate::agg::derive::{DerivedField, FieldDeriver, FieldKey, unsupported_select};
use crate::agg::plan::{Expr, LogicalPlan, RelationRef};
use crate::catalog::{BaseTable, TableFormat, TableResolver};
use crate::config::RollupConfig;
use crate::dag::Granularity;
use crate::error::{RollupError, malformed};

/// Ordered derived fields, unique by [`FieldKey`].
///
/// Inserting a field whose key is already present replaces the earlier value
/// in place; the first position is kept.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DerivedFieldMap {
    entries: Vec<(FieldKey, DerivedField)>,
}

impl DerivedFieldMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, field: DerivedField) {
        let key = field.key();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, existing)) => *existing = field,
            None => self.entries.push((key, field)),
        }
    }

    pub fn get(&self, key: &FieldKey) -> Option<&DerivedField> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, f)| f)
    }

    pub fn contains_key(&self, key: &FieldKey) -> bool {
        self.get(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DerivedField> {
        self.entries.iter().map(|(_, f)| f)
    }

    pub fn keys(&self) -> impl Iterator<Item = &FieldKey> {
        self.entries.iter().map(|(k, _)| k)
    }
}

/// Result of a successful validation.
#[derive(Debug, Clone)]
pub struct ValidatedPlan {
    pub base: BaseTable,
    pub fields: DerivedFieldMap,
    pub granularity: Option<Granularity>,
}

/// Validates analyzed plans against their base table.
#[derive(Debug, Clone)]
pub struct PlanValidator {
    time_bucket_function: String,
}

impl PlanValidator {
    pub fn new(config: &RollupConfig) -> Self {
        Self {
            time_bucket_function: config.time_bucket_function.clone(),
        }
    }

    pub fn validate(
        &self,
        plan: &LogicalPlan,
        resolver: &dyn TableResolver,
    ) -> Result<ValidatedPlan, RollupError> {
        let LogicalPlan::Aggregate {
            group_by,
            aggregates,
            input,
        } = plan
        else {
            return Err(malformed(format!(
                "unsupported statement: expected an aggregation, got {}",
                plan.node_kind()
            )));
        };

        let (relation, alias) = base_relation(input)?;
        let base = resolver.resolve(&relation.table)?;
        if let TableFormat::External(format) = &base.format {
            return Err(malformed(format!(
                "unsupported statement: {} is a {format} table",
                base.identity
            )));
        }
        if base.is_child {
            return Err(malformed(format!(
                "pre-aggregation on pre-aggregated table {}",
                base.identity
            )));
        }

        let deriver = FieldDeriver::new(&base).with_alias(alias);
        let fields = aggregates
            .iter()
            .try_fold(DerivedFieldMap::new(), |mut acc, expr| {
                for field in self.fields_for(&deriver, expr)? {
                    acc.insert(field);
                }
                Ok::<_, RollupError>(acc)
            })?;

        let granularity = self.check_grouping(&deriver, group_by, aggregates, &fields)?;

        tracing::debug!(
            base = %base.identity,
            fields = fields.len(),
            granularity = ?granularity.map(|g| g.label()),
            "validated rollup plan"
        );

        Ok(ValidatedPlan {
            base,
            fields,
            granularity,
        })
    }

    fn is_time_bucket(&self, name: &str) -> bool {
        name.eq_ignore_ascii_case(&self.time_bucket_function)
    }

    fn fields_for(
        &self,
        deriver: &FieldDeriver<'_>,
        expr: &Expr,
    ) -> Result<Vec<DerivedField>, RollupError> {
        match expr.unaliased() {
            Expr::Aggregate(_) | Expr::Column { .. } => deriver.derive(expr),
            Expr::ScalarFunction { name, args } if self.is_time_bucket(name) => {
                Ok(vec![deriver.derive_time_bucket(name, args, expr)?])
            }
            Expr::RewriteGuard => Ok(Vec::new()),
            Expr::Alias { .. }
            | Expr::Cast { .. }
            | Expr::ScalarFunction { .. }
            | Expr::Literal(_)
            | Expr::Star { .. } => Err(unsupported_select(expr)),
        }
    }

    /// Cross-check grouping and projection; returns the time-bucket
    /// granularity, if any.
    fn check_grouping(
        &self,
        deriver: &FieldDeriver<'_>,
        group_by: &[Expr],
        aggregates: &[Expr],
        fields: &DerivedFieldMap,
    ) -> Result<Option<Granularity>, RollupError> {
        let mut grouped = Vec::with_capacity(group_by.len());
        for expr in group_by {
            let field = match expr.unaliased() {
                Expr::Column { .. } => deriver.derive(expr)?.remove(0),
                Expr::ScalarFunction { name, args } if self.is_time_bucket(name) => {
                    deriver.derive_time_bucket(name, args, expr)?
                }
                _ => return Err(unsupported_select(expr)),
            };
            let key = field.key();
            if !fields.contains_key(&key) {
                return Err(malformed(format!(
                    "unsupported select statement {}: grouping column is not projected",
                    expr.to_sql()
                )));
            }
            grouped.push(key);
        }

        for expr in aggregates {
            if matches!(expr.unaliased(), Expr::Aggregate(_) | Expr::RewriteGuard) {
                continue;
            }
            let key = self.fields_for(deriver, expr)?.remove(0).key();
            if !grouped.contains(&key) {
                return Err(malformed(format!(
                    "unsupported select statement {}: projected column must appear in group by",
                    expr.to_sql()
                )));
            }
        }

        let buckets: Vec<Granularity> = fields.iter().filter_map(|f| f.spec.time_bucket).collect();
        match buckets.as_slice() {
            [] => Ok(None),
            [g] => Ok(Some(*g)),
            _ => Err(malformed("at most one time-bucket column is supported")),
        }
    }
}

/// The base relation and its alias; at most one alias level.
fn base_relation(input: &LogicalPlan) -> Result<(&RelationRef, Option<&str>), RollupError> {
    match input {
        LogicalPlan::Relation(r) => Ok((r, None)),
        LogicalPlan::SubqueryAlias { alias, input } => match input.as_ref() {
            LogicalPlan::Relation(r) => Ok((r, Some(alias.as_str()))),
            other => Err(unsupported_statement(other)),
        },
        other => Err(unsupported_statement(other)),
    }
}

fn unsupported_statement(plan: &LogicalPlan) -> RollupError {
    let detail = match plan {
        LogicalPlan::Unresolved(name) => format!("unresolved relation {name}"),
        other => format!("{} over base table", other.node_kind()),
    };
    malformed(format!("unsupported statement: {detail}"))
}
