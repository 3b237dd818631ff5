//! Formflow Script - RON loader and mixins for form schemas
//!
//! Loads form definitions from RON files:
//! - Form schemas (fields, actions, layout, workflow, rules)
//! - Mixins: reusable field groups merged into schemas by name
//!
//! Loaded schemas keep their `mixins` list untouched until
//! [`SchemaDefs::compose`] or [`MixinRegistry::compose`] applies it.

mod error;
mod loader;
mod mixin;

pub use error::{Error, Result};
pub use loader::{SchemaDefs, SchemaLoader};
pub use mixin::{Mixin, MixinRegistry};
