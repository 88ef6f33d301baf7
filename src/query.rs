//! Load-query generation for rollup tables.
//!
//! A rollup is populated by an `INSERT`-style load of the result of
//!
//! ```text
//! select <grouping-cols>,<agg-exprs> from <db>.<source> group by <grouping-cols>
//! ```
//!
//! where the source is either the base table or a finer sibling rollup chosen
//! by [`RollupSelector`]. When reading from a sibling, every reference goes
//! through that sibling's derived column for the same source column, and
//! `count` becomes `sum` (the sibling already holds partial counts).

use crate::catalog::{AggTag, AggregateTableDescriptor, Column, ParentTableMetadata, TableIdentity};
use crate::config::RollupConfig;
use crate::dag::{RollupSelector, order_by_granularity};
use crate::error::RollupError;

// ── Load requests ──────────────────────────────────────────────────────────

/// Where a load reads its rows from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadSource {
    BaseTable(TableIdentity),
    /// A sibling rollup, by name.
    Ancestor(String),
}

/// Everything the load engine needs to populate one rollup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadRequest {
    pub target: TableIdentity,
    /// Child column names in the order the source query produces them.
    pub header_columns: Vec<String>,
    pub source_query: String,
    pub overwrite: bool,
    /// Restrict the load to these segments; `None` loads everything.
    pub segments: Option<Vec<String>>,
}

/// A planned load: the request plus where its data comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadJob {
    pub source: LoadSource,
    pub request: LoadRequest,
}

/// Caller-controlled options for a load.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadOptions {
    pub overwrite: bool,
    pub segments: Option<Vec<String>>,
}

/// Executes generated load requests.
pub trait LoadEngine {
    fn run_load(&self, request: &LoadRequest) -> Result<(), RollupError>;
}

// ── Generator ──────────────────────────────────────────────────────────────

/// Builds load SQL and load jobs for rollups.
#[derive(Debug, Clone)]
pub struct QueryGenerator {
    time_bucket_function: String,
    rollup_from_ancestor: bool,
    selector: RollupSelector,
}

impl QueryGenerator {
    pub fn new(config: &RollupConfig) -> Self {
        Self {
            time_bucket_function: config.time_bucket_function.clone(),
            rollup_from_ancestor: config.rollup_from_ancestor,
            selector: RollupSelector::default(),
        }
    }

    /// SQL reading `child`'s rows straight from its base table.
    pub fn from_base_table(&self, child: &AggregateTableDescriptor) -> Result<String, RollupError> {
        let mut grouping = Vec::new();
        for column in grouping_columns(child) {
            let source = source_of(column, child)?;
            grouping.push(match &column.time_bucket {
                Some(g) => self.bucket_expr(source, &g.label()),
                None => source.to_string(),
            });
        }
        let mut aggregates = Vec::new();
        for column in measure_columns(child) {
            let source = source_of(column, child)?;
            aggregates.push(format!("{}({source})", column.aggregate));
        }
        Ok(render_select(
            &grouping,
            &aggregates,
            &child.parent.qualified_name(),
        ))
    }

    /// SQL reading `child`'s rows from the finer sibling `ancestor`.
    pub fn from_ancestor(
        &self,
        child: &AggregateTableDescriptor,
        ancestor: &AggregateTableDescriptor,
    ) -> Result<String, RollupError> {
        let mut grouping = Vec::new();
        for column in grouping_columns(child) {
            grouping.push(match &column.time_bucket {
                Some(g) => {
                    let time = ancestor
                        .time_column()
                        .ok_or_else(|| missing_in_ancestor(child, ancestor, &column.name))?;
                    self.bucket_expr(&time.name, &g.label())
                }
                None => {
                    let source = source_of(column, child)?;
                    ancestor
                        .column_for_source(source, AggTag::None)
                        .ok_or_else(|| missing_in_ancestor(child, ancestor, &column.name))?
                        .name
                        .clone()
                }
            });
        }
        let mut aggregates = Vec::new();
        for column in measure_columns(child) {
            let source = source_of(column, child)?;
            let derived = ancestor
                .column_for_source(source, column.aggregate)
                .ok_or_else(|| missing_in_ancestor(child, ancestor, &column.name))?;
            let func = match column.aggregate {
                AggTag::Count => AggTag::Sum,
                other => other,
            };
            aggregates.push(format!("{func}({})", derived.name));
        }
        Ok(render_select(
            &grouping,
            &aggregates,
            &ancestor.identity().qualified_name(),
        ))
    }

    /// Plan the load of `child_name`. Reads from the coarsest compatible
    /// sibling when ancestor loading is enabled and one exists.
    pub fn build_load_job(
        &self,
        metadata: &ParentTableMetadata,
        child_name: &str,
        options: LoadOptions,
    ) -> Result<LoadJob, RollupError> {
        let child = metadata.require_child(child_name)?;

        let ancestor = if self.rollup_from_ancestor && child.granularity.is_some() {
            let siblings = order_by_granularity(&metadata.children);
            self.selector.select(&siblings, child).cloned()
        } else {
            None
        };

        let (source, source_query) = match &ancestor {
            Some(a) => (
                LoadSource::Ancestor(a.name.clone()),
                self.from_ancestor(child, a)?,
            ),
            None => (
                LoadSource::BaseTable(child.parent.clone()),
                self.from_base_table(child)?,
            ),
        };

        tracing::debug!(
            child = %child.name,
            source = ?source,
            query = %source_query,
            "built rollup load query"
        );

        Ok(LoadJob {
            source,
            request: LoadRequest {
                target: child.identity(),
                header_columns: header_columns(child),
                source_query,
                overwrite: options.overwrite,
                segments: options.segments,
            },
        })
    }

    fn bucket_expr(&self, column: &str, granularity: &str) -> String {
        format!("{}({column},'{granularity}')", self.time_bucket_function)
    }
}

/// Visible child column names, in the order the load SQL produces them.
pub fn header_columns(child: &AggregateTableDescriptor) -> Vec<String> {
    grouping_columns(child)
        .chain(measure_columns(child))
        .map(|c| c.name.clone())
        .collect()
}

fn grouping_columns(child: &AggregateTableDescriptor) -> impl Iterator<Item = &Column> {
    child
        .schema
        .visible_columns()
        .filter(|c| c.aggregate.is_none())
}

fn measure_columns(child: &AggregateTableDescriptor) -> impl Iterator<Item = &Column> {
    child.schema.visible_columns().filter(|c| c.is_measure())
}

fn source_of<'c>(column: &'c Column, child: &AggregateTableDescriptor) -> Result<&'c str, RollupError> {
    column.source_column().ok_or_else(|| {
        RollupError::InternalError(format!(
            "column {} of rollup {} has no parent column relation",
            column.name, child.name
        ))
    })
}

fn missing_in_ancestor(
    child: &AggregateTableDescriptor,
    ancestor: &AggregateTableDescriptor,
    column: &str,
) -> RollupError {
    RollupError::InvalidArgument(format!(
        "rollup {} cannot be loaded from {}: no source for column {column}",
        child.name, ancestor.name
    ))
}

fn render_select(grouping: &[String], aggregates: &[String], from: &str) -> String {
    let select: Vec<&str> = grouping
        .iter()
        .chain(aggregates.iter())
        .map(String::as_str)
        .collect();
    let mut sql = format!("select {} from {from}", select.join(","));
    if !grouping.is_empty() {
        sql.push_str(" group by ");
        sql.push_str(&grouping.join(","));
    }
    sql
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agg::plan::{Expr, LogicalPlan};
    use crate::agg::schema::ChildSchemaBuilder;
    use crate::agg::validate::PlanValidator;
    use crate::catalog::{DataType, InMemoryCatalog, TableResolver};

    struct Fixture {
        catalog: InMemoryCatalog,
        table: TableIdentity,
        config: RollupConfig,
    }

    impl Fixture {
        fn new() -> Self {
            let catalog = InMemoryCatalog::new();
            let table = catalog
                .create_table(
                    "db",
                    "sales",
                    &[
                        ("id", DataType::Int),
                        ("region", DataType::String),
                        ("amount", DataType::Int),
                        ("ts", DataType::Timestamp),
                    ],
                )
                .unwrap();
            Self {
                catalog,
                table,
                config: RollupConfig::default(),
            }
        }

        fn descriptor(&self, name: &str, group_by: Vec<Expr>, aggregates: Vec<Expr>) -> AggregateTableDescriptor {
            let plan = LogicalPlan::scan(self.table.clone()).aggregate(group_by, aggregates);
            let resolver: &dyn TableResolver = &self.catalog;
            let validated = PlanValidator::new(&self.config).validate(&plan, resolver).unwrap();
            ChildSchemaBuilder::new(&self.config).build(name, &validated).unwrap()
        }

        fn bucketed(&self, gran: &str) -> AggregateTableDescriptor {
            let bucket = || Expr::call("timeseries", vec![Expr::col("ts"), Expr::string(gran)]);
            self.descriptor(
                &format!("sales_{gran}"),
                vec![bucket(), Expr::col("region")],
                vec![
                    bucket(),
                    Expr::col("region"),
                    Expr::agg("sum", Expr::col("amount")),
                    Expr::agg("count", Expr::col("amount")),
                ],
            )
        }

        fn generator(&self) -> QueryGenerator {
            QueryGenerator::new(&self.config)
        }
    }

    #[test]
    fn test_base_table_query() {
        let f = Fixture::new();
        let child = f.descriptor(
            "by_region",
            vec![Expr::col("region")],
            vec![Expr::col("region"), Expr::agg("sum", Expr::col("amount"))],
        );
        assert_eq!(
            f.generator().from_base_table(&child).unwrap(),
            "select region,sum(amount) from db.sales group by region"
        );
    }

    #[test]
    fn test_base_query_without_grouping() {
        let f = Fixture::new();
        let child = f.descriptor(
            "totals",
            vec![],
            vec![Expr::agg("count", Expr::col("id")), Expr::agg("max", Expr::col("amount"))],
        );
        assert_eq!(
            f.generator().from_base_table(&child).unwrap(),
            "select count(id),max(amount) from db.sales"
        );
    }

    #[test]
    fn test_grouping_columns_come_first() {
        let f = Fixture::new();
        let child = f.descriptor(
            "mixed",
            vec![Expr::col("region")],
            vec![Expr::agg("sum", Expr::col("amount")), Expr::col("region")],
        );
        assert_eq!(
            f.generator().from_base_table(&child).unwrap(),
            "select region,sum(amount) from db.sales group by region"
        );
        assert_eq!(header_columns(&child), vec!["sales_region", "sales_amount_sum"]);
    }

    #[test]
    fn test_time_bucket_base_query() {
        let f = Fixture::new();
        let child = f.bucketed("1hour");
        assert_eq!(
            f.generator().from_base_table(&child).unwrap(),
            "select timeseries(ts,'1hour'),region,sum(amount),count(amount) \
             from db.sales group by timeseries(ts,'1hour'),region"
        );
    }

    #[test]
    fn test_ancestor_query_rewrites_count_to_sum() {
        let f = Fixture::new();
        let hour = f.bucketed("1hour");
        let day = f.bucketed("1day");
        assert_eq!(
            f.generator().from_ancestor(&day, &hour).unwrap(),
            "select timeseries(sales_ts_1hour,'1day'),sales_region,\
             sum(sales_amount_sum),sum(sales_amount_count) \
             from db.sales_1hour group by timeseries(sales_ts_1hour,'1day'),sales_region"
        );
    }

    #[test]
    fn test_ancestor_missing_measure() {
        let f = Fixture::new();
        let hour = f.bucketed("1hour");
        let bucket = || Expr::call("timeseries", vec![Expr::col("ts"), Expr::string("1day")]);
        let day = f.descriptor(
            "sales_max_1day",
            vec![bucket()],
            vec![bucket(), Expr::agg("max", Expr::col("amount"))],
        );
        let err = f.generator().from_ancestor(&day, &hour).unwrap_err();
        assert!(err.to_string().contains("sales_amount_max"));
    }

    #[test]
    fn test_build_load_job_prefers_ancestor() {
        let f = Fixture::new();
        let mut metadata = ParentTableMetadata::new(f.table.clone());
        metadata.children = vec![f.bucketed("1day"), f.bucketed("1min"), f.bucketed("1hour")];

        let job = f
            .generator()
            .build_load_job(&metadata, "SALES_1DAY", LoadOptions::default())
            .unwrap();
        assert_eq!(job.source, LoadSource::Ancestor("sales_1hour".into()));
        assert!(job.request.source_query.contains("from db.sales_1hour"));
        assert_eq!(job.request.target.table_name, "sales_1day");

        let job = f
            .generator()
            .build_load_job(&metadata, "sales_1min", LoadOptions::default())
            .unwrap();
        assert_eq!(job.source, LoadSource::BaseTable(f.table.clone()));
    }

    #[test]
    fn test_build_load_job_ancestor_disabled() {
        let mut f = Fixture::new();
        f.config.rollup_from_ancestor = false;
        let mut metadata = ParentTableMetadata::new(f.table.clone());
        metadata.children = vec![f.bucketed("1hour"), f.bucketed("1day")];
        let options = LoadOptions {
            overwrite: true,
            segments: Some(vec!["3".into()]),
        };
        let job = f.generator().build_load_job(&metadata, "sales_1day", options).unwrap();
        assert_eq!(job.source, LoadSource::BaseTable(f.table.clone()));
        assert!(job.request.overwrite);
        assert_eq!(job.request.segments, Some(vec!["3".to_string()]));
    }

    #[test]
    fn test_build_load_job_unknown_child() {
        let f = Fixture::new();
        let mut metadata = ParentTableMetadata::new(f.table.clone());
        metadata.children = vec![f.bucketed("1hour")];
        match f.generator().build_load_job(&metadata, "nope", LoadOptions::default()) {
            Err(RollupError::ChildNotFound { name, known }) => {
                assert_eq!(name, "nope");
                assert_eq!(known, vec!["sales_1hour".to_string()]);
            }
            other => panic!("expected ChildNotFound, got {other:?}"),
        }
    }

    #[test]
    fn test_header_matches_select_order() {
        let f = Fixture::new();
        let child = f.bucketed("5min");
        assert_eq!(
            header_columns(&child),
            vec![
                "sales_ts_5min",
                "sales_region",
                "sales_amount_sum",
                "sales_amount_count"
            ]
        );
    }
}
