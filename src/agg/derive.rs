//! Field derivation: one aggregate invocation → one or more derived fields.
//!
//! | Function | Fields                  | Type                             |
//! |----------|-------------------------|----------------------------------|
//! | `sum`    | `sum`                   | cast target if cast, else column |
//! | `count`  | `count`                 | column's own type, cast ignored  |
//! | `min`    | `min`                   | cast target if cast, else column |
//! | `max`    | `max`                   | cast target if cast, else column |
//! | `avg`    | `sum`, `count`          | cast target if cast, else column |
//!
//! An invocation is first classified into an [`AggShape`]; derivation is an
//! exhaustive match over the shape.

use crate::agg::plan::{AggFunc, Expr, Literal};
use crate::catalog::{AggTag, BaseTable, DataType, ParentColumnRelation};
use crate::dag::Granularity;
use crate::error::{RollupError, malformed};

/// Classified form of a projected expression.
#[derive(Debug, Clone, PartialEq)]
pub enum AggShape {
    /// A bare column reference.
    DirectColumn(String),
    /// `sum`, `count`, `min` or `max` over an argument shape.
    SimpleAggregate(AggTag, Box<AggShape>),
    /// `avg` over an argument shape.
    AverageAggregate(Box<AggShape>),
    /// `CAST(inner AS type)`.
    CastWrapped(Box<AggShape>, DataType),
}

impl AggShape {
    /// Classify an aggregate invocation or a bare column.
    pub fn classify(expr: &Expr) -> Result<Self, RollupError> {
        match expr.unaliased() {
            Expr::Column { name, .. } => Ok(AggShape::DirectColumn(name.clone())),
            Expr::Aggregate(call) => {
                if call.distinct {
                    return Err(malformed("distinct not supported"));
                }
                let tag = match &call.func {
                    AggFunc::Sum => Some(AggTag::Sum),
                    AggFunc::Count => Some(AggTag::Count),
                    AggFunc::Min => Some(AggTag::Min),
                    AggFunc::Max => Some(AggTag::Max),
                    AggFunc::Avg => None,
                    AggFunc::Other(name) => {
                        return Err(malformed(format!("unsupported aggregation type {name}")));
                    }
                };
                let arg = match call.args.as_slice() {
                    [arg] => classify_argument(arg).ok_or_else(|| unsupported_select(expr))?,
                    _ => return Err(unsupported_select(expr)),
                };
                Ok(match tag {
                    Some(tag) => AggShape::SimpleAggregate(tag, Box::new(arg)),
                    None => AggShape::AverageAggregate(Box::new(arg)),
                })
            }
            _ => Err(unsupported_select(expr)),
        }
    }
}

/// Aggregate arguments: a column, or a column under a cast.
fn classify_argument(arg: &Expr) -> Option<AggShape> {
    match arg {
        Expr::Column { name, .. } => Some(AggShape::DirectColumn(name.clone())),
        Expr::Cast { expr, data_type } => match expr.as_ref() {
            Expr::Column { name, .. } => Some(AggShape::CastWrapped(
                Box::new(AggShape::DirectColumn(name.clone())),
                *data_type,
            )),
            _ => None,
        },
        _ => None,
    }
}

pub(crate) fn unsupported_select(expr: &Expr) -> RollupError {
    malformed(format!("unsupported select statement {}", expr.to_sql()))
}

// ── Derived fields ─────────────────────────────────────────────────────────

/// Structural part of a derived field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    /// Source column name as spelled in the base table's schema.
    pub source_column: String,
    pub data_type: DataType,
    pub time_bucket: Option<Granularity>,
}

/// Provenance part of a derived field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregateMeta {
    pub tag: AggTag,
    pub relation: ParentColumnRelation,
}

/// Identity of a derived field within one derivation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldKey {
    pub column: String,
    pub tag: AggTag,
    pub time_bucket: Option<Granularity>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivedField {
    pub spec: FieldSpec,
    pub meta: AggregateMeta,
}

impl DerivedField {
    pub fn key(&self) -> FieldKey {
        FieldKey {
            column: self.spec.source_column.to_lowercase(),
            tag: self.meta.tag,
            time_bucket: self.spec.time_bucket,
        }
    }

    pub fn is_grouping(&self) -> bool {
        self.meta.tag.is_none()
    }
}

/// Maps projected expressions to derived fields against a base table.
#[derive(Debug, Clone, Copy)]
pub struct FieldDeriver<'a> {
    base: &'a BaseTable,
    alias: Option<&'a str>,
}

impl<'a> FieldDeriver<'a> {
    pub fn new(base: &'a BaseTable) -> Self {
        Self { base, alias: None }
    }

    /// Column qualifiers must name `alias` instead of the table.
    pub fn with_alias(mut self, alias: Option<&'a str>) -> Self {
        self.alias = alias;
        self
    }

    /// Derive the fields for an aggregate invocation or bare column.
    pub fn derive(&self, expr: &Expr) -> Result<Vec<DerivedField>, RollupError> {
        self.check_qualifiers(expr, expr)?;
        let shape = AggShape::classify(expr)?;
        self.derive_shape(&shape, expr)
    }

    fn derive_shape(&self, shape: &AggShape, expr: &Expr) -> Result<Vec<DerivedField>, RollupError> {
        match shape {
            AggShape::DirectColumn(name) => {
                let column = self.base.column(name)?;
                Ok(vec![self.field(name, column.data_type, AggTag::None, None)?])
            }
            AggShape::SimpleAggregate(AggTag::Count, arg) => {
                let (name, _cast) = argument_column(arg, expr)?;
                let own_type = self.base.column(name)?.data_type;
                Ok(vec![self.field(name, own_type, AggTag::Count, None)?])
            }
            AggShape::SimpleAggregate(tag, arg) => {
                let (name, data_type) = self.argument_type(arg, expr)?;
                Ok(vec![self.field(name, data_type, *tag, None)?])
            }
            AggShape::AverageAggregate(arg) => {
                let (name, data_type) = self.argument_type(arg, expr)?;
                Ok(vec![
                    self.field(name, data_type, AggTag::Sum, None)?,
                    self.field(name, data_type, AggTag::Count, None)?,
                ])
            }
            AggShape::CastWrapped(..) => Err(unsupported_select(expr)),
        }
    }

    /// A time-bucket projection `fn(column, 'granularity')`.
    pub fn derive_time_bucket(
        &self,
        function: &str,
        args: &[Expr],
        expr: &Expr,
    ) -> Result<DerivedField, RollupError> {
        let (name, granularity) = match args {
            [Expr::Column { name, .. }, Expr::Literal(Literal::String(g))] => (name, g),
            _ => {
                return Err(malformed(format!(
                    "{function} expects a column and a granularity literal, got {}",
                    expr.to_sql()
                )));
            }
        };
        self.check_qualifiers(expr, expr)?;
        let granularity = Granularity::parse(granularity)
            .map_err(|e| malformed(format!("{}: {e}", expr.to_sql())))?;
        let column = self.base.column(name)?;
        if !column.data_type.is_temporal() {
            return Err(malformed(format!(
                "time-bucket column {name} must be a timestamp or date, got {}",
                column.data_type
            )));
        }
        self.field(name, column.data_type, AggTag::None, Some(granularity))
    }

    /// Every qualified column reference in `node` must point at the base
    /// relation: its alias if it has one, otherwise `table` or `db.table`.
    fn check_qualifiers(&self, node: &Expr, expr: &Expr) -> Result<(), RollupError> {
        match node {
            Expr::Column {
                qualifier: Some(q),
                ..
            } if !self.qualifies_base(q) => Err(unsupported_select(expr)),
            Expr::Column { .. } | Expr::Literal(_) | Expr::RewriteGuard => Ok(()),
            Expr::Star { qualifier } => match qualifier {
                Some(q) if !self.qualifies_base(q) => Err(unsupported_select(expr)),
                _ => Ok(()),
            },
            Expr::Alias { expr: inner, .. } | Expr::Cast { expr: inner, .. } => {
                self.check_qualifiers(inner, expr)
            }
            Expr::Aggregate(call) => call
                .args
                .iter()
                .try_for_each(|arg| self.check_qualifiers(arg, expr)),
            Expr::ScalarFunction { args, .. } => args
                .iter()
                .try_for_each(|arg| self.check_qualifiers(arg, expr)),
        }
    }

    fn qualifies_base(&self, qualifier: &str) -> bool {
        match self.alias {
            Some(alias) => qualifier.eq_ignore_ascii_case(alias),
            None => {
                let table = &self.base.identity;
                qualifier.eq_ignore_ascii_case(&table.table_name)
                    || qualifier.eq_ignore_ascii_case(&table.qualified_name())
            }
        }
    }

    fn argument_type<'s>(
        &self,
        arg: &'s AggShape,
        expr: &Expr,
    ) -> Result<(&'s str, DataType), RollupError> {
        let (name, cast) = argument_column(arg, expr)?;
        let data_type = match cast {
            Some(t) => t,
            None => self.base.column(name)?.data_type,
        };
        Ok((name, data_type))
    }

    fn field(
        &self,
        name: &str,
        data_type: DataType,
        tag: AggTag,
        time_bucket: Option<Granularity>,
    ) -> Result<DerivedField, RollupError> {
        let column = self.base.column(name)?;
        Ok(DerivedField {
            spec: FieldSpec {
                source_column: column.name.clone(),
                data_type,
                time_bucket,
            },
            meta: AggregateMeta {
                tag,
                relation: ParentColumnRelation {
                    column_id: column.column_id.clone(),
                    column_name: column.name.clone(),
                    table: self.base.identity.clone(),
                },
            },
        })
    }
}

/// `(column name, cast type)` of an aggregate argument shape.
fn argument_column<'s>(
    arg: &'s AggShape,
    expr: &Expr,
) -> Result<(&'s str, Option<DataType>), RollupError> {
    match arg {
        AggShape::DirectColumn(name) => Ok((name.as_str(), None)),
        AggShape::CastWrapped(inner, data_type) => match inner.as_ref() {
            AggShape::DirectColumn(name) => Ok((name.as_str(), Some(*data_type))),
            _ => Err(unsupported_select(expr)),
        },
        AggShape::SimpleAggregate(..) | AggShape::AverageAggregate(_) => {
            Err(unsupported_select(expr))
        }
    }
}
