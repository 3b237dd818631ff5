//! Form actions (buttons)

use crate::Expr;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ActionType {
    #[default]
    Submit,
    Reset,
    Button,
}

/// A user-triggerable action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub id: String,
    #[serde(default)]
    pub action_type: ActionType,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub hidden: bool,
    /// Action is available only while this holds
    #[serde(default)]
    pub condition: Option<Expr>,
}

impl Action {
    pub fn new(id: impl Into<String>, action_type: ActionType) -> Self {
        let id = id.into();
        Self {
            text: id.clone(),
            id,
            action_type,
            disabled: false,
            hidden: false,
            condition: None,
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    pub fn with_condition(mut self, condition: Expr) -> Self {
        self.condition = Some(condition);
        self
    }
}
