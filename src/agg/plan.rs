//! Analyzed-plan grammar consumed by the validator.
//!
//! Plans arrive already analyzed: relations are resolved to table
//! identities and expressions are typed trees. The grammar is closed; every
//! consumer matches it exhaustively.

use crate::catalog::{DataType, TableIdentity};

/// A reference to a resolved table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationRef {
    pub table: TableIdentity,
}

/// Logical plan node.
#[derive(Debug, Clone, PartialEq)]
pub enum LogicalPlan {
    /// `SELECT aggregates FROM input GROUP BY group_by`.
    Aggregate {
        group_by: Vec<Expr>,
        aggregates: Vec<Expr>,
        input: Box<LogicalPlan>,
    },
    /// `(input) AS alias`.
    SubqueryAlias { alias: String, input: Box<LogicalPlan> },
    /// A resolved table scan.
    Relation(RelationRef),
    /// A relation the analyzer could not resolve.
    Unresolved(String),
    /// A projection without aggregation.
    Project { exprs: Vec<Expr>, input: Box<LogicalPlan> },
    Filter { predicate: Expr, input: Box<LogicalPlan> },
    Join {
        left: Box<LogicalPlan>,
        right: Box<LogicalPlan>,
    },
}

impl LogicalPlan {
    pub fn scan(table: TableIdentity) -> Self {
        LogicalPlan::Relation(RelationRef { table })
    }

    pub fn alias(self, alias: impl Into<String>) -> Self {
        LogicalPlan::SubqueryAlias {
            alias: alias.into(),
            input: Box::new(self),
        }
    }

    pub fn aggregate(self, group_by: Vec<Expr>, aggregates: Vec<Expr>) -> Self {
        LogicalPlan::Aggregate {
            group_by,
            aggregates,
            input: Box::new(self),
        }
    }

    /// Short node name for error messages.
    pub fn node_kind(&self) -> &'static str {
        match self {
            LogicalPlan::Aggregate { .. } => "aggregate",
            LogicalPlan::SubqueryAlias { .. } => "subquery alias",
            LogicalPlan::Relation(_) => "relation",
            LogicalPlan::Unresolved(_) => "unresolved relation",
            LogicalPlan::Project { .. } => "projection",
            LogicalPlan::Filter { .. } => "filter",
            LogicalPlan::Join { .. } => "join",
        }
    }
}

/// Literal value.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    String(String),
    Number(String),
    Boolean(bool),
    Null,
}

impl Literal {
    pub fn to_sql(&self) -> String {
        match self {
            Literal::String(s) => format!("'{}'", s.replace('\'', "''")),
            Literal::Number(n) => n.clone(),
            Literal::Boolean(b) => b.to_string(),
            Literal::Null => "NULL".to_string(),
        }
    }
}

/// Aggregate function names recognised by the plan grammar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AggFunc {
    Sum,
    Count,
    Avg,
    Min,
    Max,
    /// Any other aggregate (`stddev`, `collect_set`, ...).
    Other(String),
}

impl AggFunc {
    pub fn from_name(name: &str) -> Self {
        match name.to_lowercase().as_str() {
            "sum" => AggFunc::Sum,
            "count" => AggFunc::Count,
            "avg" => AggFunc::Avg,
            "min" => AggFunc::Min,
            "max" => AggFunc::Max,
            other => AggFunc::Other(other.to_string()),
        }
    }

    /// Lowercase function name for SQL generation.
    pub fn sql_name(&self) -> &str {
        match self {
            AggFunc::Sum => "sum",
            AggFunc::Count => "count",
            AggFunc::Avg => "avg",
            AggFunc::Min => "min",
            AggFunc::Max => "max",
            AggFunc::Other(name) => name,
        }
    }
}

/// An aggregate invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct AggCall {
    pub func: AggFunc,
    pub args: Vec<Expr>,
    pub distinct: bool,
}

/// Expression tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Column {
        qualifier: Option<String>,
        name: String,
    },
    Alias { expr: Box<Expr>, name: String },
    Cast { expr: Box<Expr>, data_type: DataType },
    Aggregate(AggCall),
    ScalarFunction { name: String, args: Vec<Expr> },
    Literal(Literal),
    /// `*` or `t.*`.
    Star { qualifier: Option<String> },
    /// Marker the analyzer injects into plans it rewrote itself.
    RewriteGuard,
}

impl Expr {
    pub fn col(name: impl Into<String>) -> Self {
        Expr::Column {
            qualifier: None,
            name: name.into(),
        }
    }

    pub fn qualified(qualifier: impl Into<String>, name: impl Into<String>) -> Self {
        Expr::Column {
            qualifier: Some(qualifier.into()),
            name: name.into(),
        }
    }

    pub fn string(value: impl Into<String>) -> Self {
        Expr::Literal(Literal::String(value.into()))
    }

    pub fn number(value: impl Into<String>) -> Self {
        Expr::Literal(Literal::Number(value.into()))
    }

    pub fn agg(func: &str, arg: Expr) -> Self {
        Expr::Aggregate(AggCall {
            func: AggFunc::from_name(func),
            args: vec![arg],
            distinct: false,
        })
    }

    pub fn distinct_agg(func: &str, arg: Expr) -> Self {
        Expr::Aggregate(AggCall {
            func: AggFunc::from_name(func),
            args: vec![arg],
            distinct: true,
        })
    }

    /// `count(*)`.
    pub fn count_star() -> Self {
        Expr::Aggregate(AggCall {
            func: AggFunc::Count,
            args: vec![Expr::Star { qualifier: None }],
            distinct: false,
        })
    }

    pub fn call(name: impl Into<String>, args: Vec<Expr>) -> Self {
        Expr::ScalarFunction {
            name: name.into(),
            args,
        }
    }

    pub fn cast(self, data_type: DataType) -> Self {
        Expr::Cast {
            expr: Box::new(self),
            data_type,
        }
    }

    pub fn alias(self, name: impl Into<String>) -> Self {
        Expr::Alias {
            expr: Box::new(self),
            name: name.into(),
        }
    }

    /// The expression under any number of aliases.
    pub fn unaliased(&self) -> &Expr {
        match self {
            Expr::Alias { expr, .. } => expr.unaliased(),
            other => other,
        }
    }

    /// Convert expression back to SQL text.
    pub fn to_sql(&self) -> String {
        match self {
            Expr::Column { qualifier, name } => match qualifier {
                Some(q) => format!("{q}.{name}"),
                None => name.clone(),
            },
            Expr::Alias { expr, name } => format!("{} AS {name}", expr.to_sql()),
            Expr::Cast { expr, data_type } => {
                format!("CAST({} AS {data_type})", expr.to_sql())
            }
            Expr::Aggregate(call) => {
                let args: Vec<String> = call.args.iter().map(Expr::to_sql).collect();
                let distinct = if call.distinct { "DISTINCT " } else { "" };
                format!("{}({distinct}{})", call.func.sql_name(), args.join(", "))
            }
            Expr::ScalarFunction { name, args } => {
                let args: Vec<String> = args.iter().map(Expr::to_sql).collect();
                format!("{name}({})", args.join(", "))
            }
            Expr::Literal(lit) => lit.to_sql(),
            Expr::Star { qualifier } => match qualifier {
                Some(q) => format!("{q}.*"),
                None => "*".to_string(),
            },
            Expr::RewriteGuard => "<rewrite guard>".to_string(),
        }
    }
}
