//! Formflow Core - Values, expressions and form schemas
//!
//! This crate provides the data model shared by the formflow runtime and
//! schema loader:
//! - Dynamic field values (`Value`, `ValueMap`)
//! - Condition expressions with named, cycle-checked rules (`Expr`)
//! - The immutable form description (`Schema`, `Field`, `Action`,
//!   `Layout`, `Workflow`, `BusinessRule`)

mod error;
pub mod expr;
pub mod schema;
mod value;

pub use error::{Error, Result};
pub use expr::{EvalContext, Expr};
pub use schema::{
    Action, ActionType, BusinessRule, Conditional, Field, FieldType, FieldValidation, Format,
    Layout, MixinRef, RepeatableConfig, RuleViolation, Schema, Section, SectionKind, Severity,
    Stage, Transition, ValidationMessages, Workflow,
};
pub use value::{Value, ValueMap};
