//! Form schema: the immutable description a runtime is built from

pub mod action;
pub mod field;
pub mod layout;
pub mod rule;
pub mod workflow;

pub use action::{Action, ActionType};
pub use field::{
    Conditional, Field, FieldType, FieldValidation, Format, RepeatableConfig, ValidationMessages,
};
pub use layout::{Layout, Section, SectionKind};
pub use rule::{BusinessRule, RuleViolation, Severity};
pub use workflow::{Stage, Transition, Workflow};

use crate::{Error, EvalContext, Expr, Result, Value, ValueMap};
use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};

/// Reference to a mixin the schema wants merged in before use
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MixinRef {
    pub name: String,
    /// Field names become `{prefix}_{name}`
    #[serde(default)]
    pub prefix: Option<String>,
}

/// A complete form description
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    pub name: String,
    #[serde(default)]
    pub title: Option<String>,
    pub fields: Vec<Field>,
    #[serde(default)]
    pub actions: Vec<Action>,
    #[serde(default)]
    pub layout: Option<Layout>,
    #[serde(default)]
    pub workflow: Option<Workflow>,
    /// Named predicates shared by conditions (`Expr::Rule`)
    #[serde(default)]
    pub rules: IndexMap<String, Expr>,
    #[serde(default)]
    pub business_rules: Vec<BusinessRule>,
    /// Mixins still to be merged
    #[serde(default)]
    pub mixins: Vec<MixinRef>,
    /// Mixins already merged, in application order
    #[serde(default)]
    pub applied_mixins: Vec<String>,
}

impl Schema {
    /// Create an empty schema
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            title: None,
            fields: Vec::new(),
            actions: Vec::new(),
            layout: None,
            workflow: None,
            rules: IndexMap::new(),
            business_rules: Vec::new(),
            mixins: Vec::new(),
            applied_mixins: Vec::new(),
        }
    }

    pub fn with_field(mut self, field: Field) -> Self {
        self.fields.push(field);
        self
    }

    pub fn with_action(mut self, action: Action) -> Self {
        self.actions.push(action);
        self
    }

    pub fn with_layout(mut self, layout: Layout) -> Self {
        self.layout = Some(layout);
        self
    }

    pub fn with_workflow(mut self, workflow: Workflow) -> Self {
        self.workflow = Some(workflow);
        self
    }

    pub fn with_rule(mut self, name: impl Into<String>, expr: Expr) -> Self {
        self.rules.insert(name.into(), expr);
        self
    }

    pub fn with_business_rule(mut self, rule: BusinessRule) -> Self {
        self.business_rules.push(rule);
        self
    }

    /// Look up a field by name
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Look up an action by id
    pub fn action(&self, id: &str) -> Option<&Action> {
        self.actions.iter().find(|a| a.id == id)
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.field(name).is_some()
    }

    /// Field names in declaration order
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }

    /// Evaluate an expression against `data` with this schema's named rules
    pub fn evaluate(&self, expr: &Expr, data: &ValueMap) -> Result<Value> {
        let mut ctx = EvalContext::new(data, &self.rules);
        expr.eval(&mut ctx)
    }

    /// Evaluate an expression to a boolean
    pub fn evaluate_bool(&self, expr: &Expr, data: &ValueMap) -> Result<bool> {
        Ok(self.evaluate(expr, data)?.is_truthy())
    }

    /// Check structural consistency
    ///
    /// Conditions are not checked here: a condition naming an undeclared
    /// field is reported when it is evaluated.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::InvalidSchema("schema name is empty".to_string()));
        }

        let mut names = IndexSet::new();
        for field in &self.fields {
            validate_field(field)?;
            if !names.insert(field.name.as_str()) {
                return Err(Error::InvalidSchema(format!(
                    "duplicate field name '{}'",
                    field.name
                )));
            }
        }

        let mut action_ids = IndexSet::new();
        for action in &self.actions {
            if !action_ids.insert(action.id.as_str()) {
                return Err(Error::InvalidSchema(format!(
                    "duplicate action id '{}'",
                    action.id
                )));
            }
        }

        if let Some(layout) = &self.layout {
            for section in &layout.sections {
                for name in &section.fields {
                    if !names.contains(name.as_str()) {
                        return Err(Error::InvalidSchema(format!(
                            "section '{}' references undeclared field '{}'",
                            section.id, name
                        )));
                    }
                }
            }
        }

        if let Some(workflow) = &self.workflow {
            if workflow.stage(&workflow.initial_stage).is_none() {
                return Err(Error::InvalidSchema(format!(
                    "workflow initial stage '{}' is not declared",
                    workflow.initial_stage
                )));
            }
            for stage in &workflow.stages {
                if let Some(name) = stage.fields.iter().find(|f| !names.contains(f.as_str())) {
                    return Err(Error::InvalidSchema(format!(
                        "stage '{}' references undeclared field '{}'",
                        stage.id, name
                    )));
                }
            }
            for transition in &workflow.transitions {
                for stage in [&transition.from, &transition.to] {
                    if workflow.stage(stage).is_none() {
                        return Err(Error::InvalidSchema(format!(
                            "transition '{}' references undeclared stage '{}'",
                            transition.action, stage
                        )));
                    }
                }
            }
        }

        Ok(())
    }

    /// Values a fresh form starts with, one entry per declared field
    pub fn default_values(&self) -> ValueMap {
        self.fields
            .iter()
            .map(|f| (f.name.clone(), f.initial_value()))
            .collect()
    }
}

fn validate_field(field: &Field) -> Result<()> {
    if field.name.trim().is_empty() {
        return Err(Error::InvalidSchema("field name is empty".to_string()));
    }
    let invalid = |what: &str| -> Result<()> {
        Err(Error::InvalidSchema(format!(
            "field '{}': {}",
            field.name, what
        )))
    };

    if let Some(v) = &field.validation {
        if let (Some(min), Some(max)) = (v.min_length, v.max_length) {
            if min > max {
                return invalid("min_length is greater than max_length");
            }
        }
        if let (Some(min), Some(max)) = (v.min, v.max) {
            if min > max {
                return invalid("min is greater than max");
            }
        }
        if let (Some(min), Some(max)) = (v.min_items, v.max_items) {
            if min > max {
                return invalid("min_items is greater than max_items");
            }
        }
        if v.positive && v.negative {
            return invalid("cannot be both positive and negative");
        }
        if matches!(v.multiple_of, Some(m) if m <= 0.0) || matches!(v.step, Some(s) if s <= 0.0) {
            return invalid("multiple_of and step must be greater than zero");
        }
    }

    match (&field.field_type, &field.repeatable) {
        (FieldType::Repeatable, None) => invalid("repeatable field has no template"),
        (FieldType::Repeatable, Some(config)) => {
            if config.template.is_empty() {
                return invalid("repeatable template has no fields");
            }
            if let (Some(min), Some(max)) = (config.min_items, config.max_items) {
                if min > max {
                    return invalid("repeatable min_items is greater than max_items");
                }
            }
            let mut names = IndexSet::new();
            for item_field in &config.template {
                validate_field(item_field)?;
                if !names.insert(item_field.name.as_str()) {
                    return invalid(&format!(
                        "duplicate template field '{}'",
                        item_field.name
                    ));
                }
            }
            Ok(())
        }
        (_, Some(_)) => invalid("repeatable config on a non-repeatable field"),
        (_, None) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order_schema() -> Schema {
        Schema::new("order")
            .with_field(Field::new("quantity", FieldType::Integer).with_default(1i64))
            .with_field(Field::new("unit_price", FieldType::Number))
            .with_field(
                Field::new("gift_message", FieldType::TextArea)
                    .with_conditional(Conditional::show_when(Expr::field_eq("is_gift", true))),
            )
            .with_field(Field::new("is_gift", FieldType::Boolean).with_default(false))
            .with_action(Action::new("submit", ActionType::Submit))
    }

    #[test]
    fn test_valid_schema() {
        assert!(order_schema().validate().is_ok());
    }

    #[test]
    fn test_duplicate_field_rejected() {
        let schema = order_schema().with_field(Field::new("quantity", FieldType::Number));
        match schema.validate() {
            Err(Error::InvalidSchema(msg)) => assert!(msg.contains("quantity")),
            other => panic!("expected InvalidSchema, got {:?}", other),
        }
    }

    #[test]
    fn test_repeatable_requires_template() {
        let schema = Schema::new("s").with_field(Field::new("items", FieldType::Repeatable));
        assert!(matches!(schema.validate(), Err(Error::InvalidSchema(_))));

        let schema = Schema::new("s").with_field(
            Field::new("items", FieldType::Repeatable).with_repeatable(RepeatableConfig::new(
                vec![Field::new("sku", FieldType::Text)],
            )),
        );
        assert!(schema.validate().is_ok());
    }

    #[test]
    fn test_inverted_bounds_rejected() {
        let schema = Schema::new("s").with_field(
            Field::new("name", FieldType::Text)
                .with_validation(FieldValidation::length(Some(5), Some(2))),
        );
        assert!(matches!(schema.validate(), Err(Error::InvalidSchema(_))));
    }

    #[test]
    fn test_layout_must_reference_declared_fields() {
        let schema = order_schema().with_layout(Layout::new(vec![Section::new(
            "main",
            SectionKind::Section,
            vec!["quantity".into(), "nope".into()],
        )]));
        assert!(matches!(schema.validate(), Err(Error::InvalidSchema(_))));
    }

    #[test]
    fn test_condition_on_undeclared_field_is_accepted() {
        let schema = Schema::new("s").with_field(
            Field::new("a", FieldType::Text)
                .with_conditional(Conditional::show_when(Expr::field_eq("ghost", true))),
        );
        assert!(schema.validate().is_ok());
    }

    #[test]
    fn test_default_values_cover_every_field() {
        let values = order_schema().default_values();
        assert_eq!(values.len(), 4);
        assert_eq!(values["quantity"], Value::Int(1));
        assert_eq!(values["unit_price"], Value::Null);
        assert_eq!(values["is_gift"], Value::Bool(false));
    }

    #[test]
    fn test_schema_from_ron() {
        let content = r#"
        (
            name: "signup",
            fields: [
                (
                    name: "email",
                    field_type: Email,
                    label: Some("Email"),
                    required: true,
                    validation: Some((format: Some(Email))),
                ),
                (
                    name: "age",
                    field_type: Integer,
                    validation: Some((min: Some(18.0), integer: true)),
                ),
            ],
            rules: {
                "adult": Ge(Field("age"), Literal(Int(18))),
            },
        )
        "#;
        let schema: Schema = ron::from_str(content).unwrap();
        assert!(schema.validate().is_ok());
        assert_eq!(schema.field("email").map(|f| f.label()), Some("Email"));
        assert!(schema.rules.contains_key("adult"));
    }
}
