//! Renderer contract
//!
//! The runtime never renders. Drivers ask it for [`FieldView`]s and a
//! [`FormView`] and hand those to whatever [`Renderer`] they use.

use formflow_core::{FieldType, Value};
use serde::{Deserialize, Serialize};

/// Turns runtime views into some output (markup, terminal text, widgets)
pub trait Renderer {
    type Output;

    fn render_field(&self, field: &FieldView) -> Self::Output;

    fn render_form(&self, form: &FormView) -> Self::Output;
}

/// Render-ready state of one field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldView {
    pub name: String,
    pub label: String,
    pub field_type: FieldType,
    pub value: Value,
    pub visible: bool,
    pub editable: bool,
    pub required: bool,
    pub touched: bool,
    pub dirty: bool,
    pub errors: Vec<String>,
    /// Errors exist and the user has interacted with the field
    pub show_errors: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionView {
    pub id: String,
    pub text: String,
    pub available: bool,
}

/// Render-ready state of the whole form
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormView {
    pub name: String,
    pub title: Option<String>,
    /// Visible fields only, in declaration order
    pub fields: Vec<FieldView>,
    pub actions: Vec<ActionView>,
    pub stage: Option<String>,
    pub is_valid: bool,
    pub is_dirty: bool,
}

impl FormView {
    pub fn field(&self, name: &str) -> Option<&FieldView> {
        self.fields.iter().find(|f| f.name == name)
    }
}
