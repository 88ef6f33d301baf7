//! Aggregate engine: plan grammar, validation, field derivation, and child
//! schema construction.
//!
//! ```text
//! LogicalPlan ──► PlanValidator ──► DerivedFieldMap ──► ChildSchemaBuilder ──► descriptor
//!                      │
//!                      └─► FieldDeriver (per projected expression)
//! ```

pub mod derive;
pub mod plan;
pub mod schema;
pub mod validate;

pub use derive::{AggShape, DerivedField, FieldDeriver, FieldKey};
pub use plan::{AggCall, AggFunc, Expr, Literal, LogicalPlan, RelationRef};
pub use schema::{ChildSchemaBuilder, child_column_name, parse_child_column_name};
pub use validate::{DerivedFieldMap, PlanValidator, ValidatedPlan};
