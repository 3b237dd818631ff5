//! Cross-field business rules

use crate::Expr;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Severity {
    #[default]
    Error,
    Warning,
    Info,
}

/// A condition over several fields that must hold for the form to be acceptable
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusinessRule {
    pub id: String,
    /// Fields the violation is reported against
    #[serde(default)]
    pub fields: Vec<String>,
    pub condition: Expr,
    pub message: String,
    #[serde(default)]
    pub severity: Severity,
}

impl BusinessRule {
    pub fn new(id: impl Into<String>, condition: Expr, message: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            fields: Vec::new(),
            condition,
            message: message.into(),
            severity: Severity::Error,
        }
    }

    pub fn on_fields(mut self, fields: Vec<String>) -> Self {
        self.fields = fields;
        self
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }
}

/// A failed business rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleViolation {
    pub rule_id: String,
    pub fields: Vec<String>,
    pub message: String,
    pub severity: Severity,
}
