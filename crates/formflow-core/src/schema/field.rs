//! Field definitions

use crate::{Expr, Value};
use serde::{Deserialize, Serialize};

/// Input kind of a field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum FieldType {
    #[default]
    Text,
    TextArea,
    Email,
    Password,
    Url,
    Number,
    Integer,
    Boolean,
    Date,
    DateTime,
    Time,
    Select,
    MultiSelect,
    Repeatable,
}

impl FieldType {
    /// Whether values of this type are lists
    pub fn is_list(&self) -> bool {
        matches!(self, FieldType::MultiSelect | FieldType::Repeatable)
    }
}

/// A single form field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    /// Unique name within the schema
    pub name: String,
    /// Input kind
    #[serde(default)]
    pub field_type: FieldType,
    /// Human readable label used in messages (falls back to the name)
    #[serde(default)]
    pub label: Option<String>,
    /// Statically required
    #[serde(default)]
    pub required: bool,
    /// Statically disabled
    #[serde(default)]
    pub disabled: bool,
    /// Statically hidden
    #[serde(default)]
    pub hidden: bool,
    /// Value used when initial data does not provide one
    #[serde(default)]
    pub default: Option<Value>,
    /// Allowed values for select fields
    #[serde(default)]
    pub options: Vec<Value>,
    /// Validation rules
    #[serde(default)]
    pub validation: Option<FieldValidation>,
    /// Dynamic behavior driven by other field values
    #[serde(default)]
    pub conditional: Option<Conditional>,
    /// Present only on repeatable fields
    #[serde(default)]
    pub repeatable: Option<RepeatableConfig>,
}

impl Field {
    /// Create a field with no rules
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            label: None,
            required: false,
            disabled: false,
            hidden: false,
            default: None,
            options: Vec::new(),
            validation: None,
            conditional: None,
            repeatable: None,
        }
    }

    /// Label shown to users
    pub fn label(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.name)
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.disabled = true;
        self
    }

    pub fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }

    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn with_options(mut self, options: Vec<Value>) -> Self {
        self.options = options;
        self
    }

    pub fn with_validation(mut self, validation: FieldValidation) -> Self {
        self.validation = Some(validation);
        self
    }

    pub fn with_conditional(mut self, conditional: Conditional) -> Self {
        self.conditional = Some(conditional);
        self
    }

    pub fn with_repeatable(mut self, repeatable: RepeatableConfig) -> Self {
        self.repeatable = Some(repeatable);
        self
    }

    /// Value a fresh form starts with
    pub fn initial_value(&self) -> Value {
        self.default.clone().unwrap_or(Value::Null)
    }

    /// Apply `f` to every field name referenced by this field's expressions
    pub fn visit_expr_fields_mut(&mut self, f: &mut dyn FnMut(&mut String)) {
        if let Some(conditional) = &mut self.conditional {
            for expr in conditional.exprs_mut() {
                expr.visit_fields_mut(f);
            }
        }
        if let Some(custom) = self.validation.as_mut().and_then(|v| v.custom.as_mut()) {
            custom.visit_fields_mut(f);
        }
    }
}

/// Conditions that change a field's state at runtime
///
/// `hide` takes precedence over `show`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Conditional {
    #[serde(default)]
    pub show: Option<Expr>,
    #[serde(default)]
    pub hide: Option<Expr>,
    #[serde(default)]
    pub required: Option<Expr>,
    #[serde(default)]
    pub disabled: Option<Expr>,
}

impl Conditional {
    pub fn show_when(expr: Expr) -> Self {
        Self {
            show: Some(expr),
            ..Self::default()
        }
    }

    pub fn hide_when(expr: Expr) -> Self {
        Self {
            hide: Some(expr),
            ..Self::default()
        }
    }

    pub fn required_when(expr: Expr) -> Self {
        Self {
            required: Some(expr),
            ..Self::default()
        }
    }

    pub fn disabled_when(expr: Expr) -> Self {
        Self {
            disabled: Some(expr),
            ..Self::default()
        }
    }

    fn exprs_mut(&mut self) -> impl Iterator<Item = &mut Expr> {
        [
            self.show.as_mut(),
            self.hide.as_mut(),
            self.required.as_mut(),
            self.disabled.as_mut(),
        ]
        .into_iter()
        .flatten()
    }
}

/// Well-known string formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Format {
    Email,
    Url,
    Uuid,
    /// `YYYY-MM-DD`
    Date,
    /// RFC 3339
    DateTime,
    /// `HH:MM:SS`
    Time,
}

/// Validation rules for a field value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct FieldValidation {
    // String rules
    pub min_length: Option<usize>,
    pub max_length: Option<usize>,
    pub pattern: Option<String>,
    pub format: Option<Format>,

    // Numeric rules
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub exclusive_min: bool,
    pub exclusive_max: bool,
    pub integer: bool,
    pub positive: bool,
    pub negative: bool,
    pub multiple_of: Option<f64>,
    pub step: Option<f64>,

    // List rules
    pub min_items: Option<usize>,
    pub max_items: Option<usize>,
    pub unique_items: bool,

    /// Must evaluate truthy against the form values
    pub custom: Option<Expr>,

    /// Overrides for the generated messages
    pub messages: ValidationMessages,
}

impl FieldValidation {
    pub fn length(min: Option<usize>, max: Option<usize>) -> Self {
        Self {
            min_length: min,
            max_length: max,
            ..Self::default()
        }
    }

    pub fn range(min: Option<f64>, max: Option<f64>) -> Self {
        Self {
            min,
            max,
            ..Self::default()
        }
    }

    pub fn format(format: Format) -> Self {
        Self {
            format: Some(format),
            ..Self::default()
        }
    }

    pub fn pattern(pattern: impl Into<String>) -> Self {
        Self {
            pattern: Some(pattern.into()),
            ..Self::default()
        }
    }
}

/// Custom messages replacing the generated ones
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ValidationMessages {
    pub required: Option<String>,
    pub min_length: Option<String>,
    pub max_length: Option<String>,
    pub pattern: Option<String>,
    pub min: Option<String>,
    pub max: Option<String>,
    pub custom: Option<String>,
}

/// Item template and bounds for repeatable fields
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct RepeatableConfig {
    /// Fields each item carries
    pub template: Vec<Field>,
    #[serde(default)]
    pub min_items: Option<usize>,
    #[serde(default)]
    pub max_items: Option<usize>,
}

impl RepeatableConfig {
    pub fn new(template: Vec<Field>) -> Self {
        Self {
            template,
            min_items: None,
            max_items: None,
        }
    }

    pub fn with_bounds(mut self, min_items: Option<usize>, max_items: Option<usize>) -> Self {
        self.min_items = min_items;
        self.max_items = max_items;
        self
    }
}
