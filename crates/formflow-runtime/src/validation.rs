//! Field, action, workflow and business-rule validation
//!
//! [`Validator`] is a pure function of the schema and the values it is
//! given; it never touches runtime state. The runtime decides when to call
//! it (see [`ValidationTiming`](crate::ValidationTiming)) and stores what it
//! returns.

use crate::conditional::FieldConditionalResult;
use chrono::{DateTime, NaiveDate, NaiveTime};
use formflow_core::{
    expr::values_equal, Action, BusinessRule, Field, FieldValidation, Format, RuleViolation,
    Schema, Severity, Value, ValueMap, Workflow,
};
use indexmap::IndexMap;
use parking_lot::Mutex;
use regex::Regex;
use std::collections::HashMap;
use tracing::warn;

static NULL: Value = Value::Null;

const EMAIL_PATTERN: &str = r"^[^@\s]+@[^@\s]+\.[^@\s]+$";
const URL_PATTERN: &str = r"^[a-zA-Z][a-zA-Z0-9+.-]*://[^\s/?#]+[^\s]*$";
const UUID_PATTERN: &str =
    r"^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}$";

/// What a validator can see besides the value itself
#[derive(Debug, Clone, Copy)]
pub struct ValidationContext<'a> {
    pub schema: &'a Schema,
    /// All current form values
    pub data: &'a ValueMap,
    /// Current conditional state per field; fields without an entry use
    /// their static flags
    pub conditions: Option<&'a IndexMap<String, FieldConditionalResult>>,
}

impl<'a> ValidationContext<'a> {
    pub fn new(schema: &'a Schema, data: &'a ValueMap) -> Self {
        Self {
            schema,
            data,
            conditions: None,
        }
    }

    pub fn with_conditions(mut self, conditions: &'a IndexMap<String, FieldConditionalResult>) -> Self {
        self.conditions = Some(conditions);
        self
    }

    pub fn is_visible(&self, field: &Field) -> bool {
        self.conditions
            .and_then(|c| c.get(&field.name))
            .map(|r| r.visible)
            .unwrap_or(!field.hidden)
    }

    pub fn is_required(&self, field: &Field) -> bool {
        self.conditions
            .and_then(|c| c.get(&field.name))
            .map(|r| r.required)
            .unwrap_or(field.required)
    }
}

/// Validates values against schema rules
pub trait Validator: Send + Sync {
    /// Messages for one field's value; empty means valid
    fn validate_field(&self, field: &Field, value: &Value, ctx: &ValidationContext) -> Vec<String>;

    /// Messages for every visible field, non-empty entries only
    fn validate_all_fields(&self, ctx: &ValidationContext) -> IndexMap<String, Vec<String>> {
        ctx.schema
            .fields
            .iter()
            .filter_map(|field| {
                let value = ctx.data.get(&field.name).unwrap_or(&NULL);
                let errors = self.validate_field(field, value, ctx);
                (!errors.is_empty()).then(|| (field.name.clone(), errors))
            })
            .collect()
    }

    /// Reasons an action cannot be triggered; empty means it can
    fn validate_action(&self, action: &Action, ctx: &ValidationContext) -> Vec<String>;

    /// Messages for the fields of a workflow stage, non-empty entries only
    fn validate_workflow(
        &self,
        workflow: &Workflow,
        stage: &str,
        ctx: &ValidationContext,
    ) -> IndexMap<String, Vec<String>>;

    /// Business rules that do not hold
    fn validate_business_rules(
        &self,
        rules: &[BusinessRule],
        ctx: &ValidationContext,
    ) -> Vec<RuleViolation>;
}

/// Validator for the built-in rule set
///
/// Compiled patterns are cached per validator; a pattern that fails to
/// compile is cached as `None` and reported on every use.
#[derive(Debug, Default)]
pub struct RuleValidator {
    patterns: Mutex<HashMap<String, Option<Regex>>>,
}

impl RuleValidator {
    pub fn new() -> Self {
        Self::default()
    }

    /// `None` when the pattern does not compile
    fn matches(&self, pattern: &str, value: &str) -> Option<bool> {
        let mut patterns = self.patterns.lock();
        let regex = patterns.entry(pattern.to_string()).or_insert_with(|| {
            Regex::new(pattern)
                .map_err(|err| warn!(pattern, error = %err, "invalid validation pattern"))
                .ok()
        });
        regex.as_ref().map(|r| r.is_match(value))
    }

    fn validate_string(&self, field: &Field, rules: &FieldValidation, value: &str, out: &mut Vec<String>) {
        let label = field.label();
        let len = value.chars().count();
        let messages = &rules.messages;

        if let Some(min) = rules.min_length {
            if len < min {
                out.push(message(
                    &messages.min_length,
                    format!("{} must be at least {} characters", label, min),
                ));
            }
        }
        if let Some(max) = rules.max_length {
            if len > max {
                out.push(message(
                    &messages.max_length,
                    format!("{} must be at most {} characters", label, max),
                ));
            }
        }
        if let Some(pattern) = &rules.pattern {
            match self.matches(pattern, value) {
                Some(true) => {}
                Some(false) => out.push(message(
                    &messages.pattern,
                    format!("{} format is invalid", label),
                )),
                None => out.push(format!("{} has an invalid validation pattern", label)),
            }
        }
        if let Some(format) = rules.format {
            if !self.matches_format(format, value) {
                out.push(format_message(label, format));
            }
        }
    }

    fn matches_format(&self, format: Format, value: &str) -> bool {
        match format {
            Format::Email => self.matches(EMAIL_PATTERN, value).unwrap_or(false),
            Format::Url => self.matches(URL_PATTERN, value).unwrap_or(false),
            Format::Uuid => self.matches(UUID_PATTERN, value).unwrap_or(false),
            Format::Date => NaiveDate::parse_from_str(value, "%Y-%m-%d").is_ok(),
            Format::DateTime => DateTime::parse_from_rfc3339(value).is_ok(),
            Format::Time => NaiveTime::parse_from_str(value, "%H:%M:%S").is_ok(),
        }
    }

    fn validate_repeatable(
        &self,
        field: &Field,
        value: &Value,
        ctx: &ValidationContext,
        out: &mut Vec<String>,
    ) {
        let Some(config) = &field.repeatable else {
            return;
        };
        let items = value.as_list().unwrap_or(&[]);
        let label = field.label();

        if let Some(min) = config.min_items {
            if items.len() < min {
                out.push(format!("{} must have at least {} items", label, min));
            }
        }
        if let Some(max) = config.max_items {
            if items.len() > max {
                out.push(format!("{} must have at most {} items", label, max));
            }
        }

        for (index, item) in items.iter().enumerate() {
            let Some(record) = item.as_map() else {
                out.push(format!("{} item {} must be a record", label, index + 1));
                continue;
            };
            let item_ctx = ValidationContext::new(ctx.schema, record);
            for template in &config.template {
                let item_value = record.get(&template.name).unwrap_or(&NULL);
                for msg in self.validate_field(template, item_value, &item_ctx) {
                    out.push(format!("{} item {}: {}", label, index + 1, msg));
                }
            }
        }
    }
}

impl Validator for RuleValidator {
    fn validate_field(&self, field: &Field, value: &Value, ctx: &ValidationContext) -> Vec<String> {
        if !ctx.is_visible(field) {
            return Vec::new();
        }
        let label = field.label();
        let rules = field.validation.as_ref();

        if value.is_empty() {
            if ctx.is_required(field) {
                let custom = rules.and_then(|r| r.messages.required.clone());
                return vec![custom.unwrap_or_else(|| format!("{} is required", label))];
            }
            return Vec::new();
        }

        let mut out = Vec::new();
        if let Some(rules) = rules {
            match value {
                Value::String(s) => self.validate_string(field, rules, s, &mut out),
                Value::Int(_) | Value::Float(_) => validate_number(field, rules, value, &mut out),
                Value::List(items) => validate_list(field, rules, items, &mut out),
                _ => {}
            }
            if let Some(custom) = &rules.custom {
                match ctx.schema.evaluate_bool(custom, ctx.data) {
                    Ok(true) => {}
                    Ok(false) => out.push(message(
                        &rules.messages.custom,
                        format!("{} is invalid", label),
                    )),
                    Err(err) => out.push(format!("{} could not be validated: {}", label, err)),
                }
            }
        }
        self.validate_repeatable(field, value, ctx, &mut out);
        out
    }

    fn validate_action(&self, action: &Action, ctx: &ValidationContext) -> Vec<String> {
        let mut reasons = Vec::new();
        if action.hidden {
            reasons.push(format!("{} is hidden", action.text));
        }
        if action.disabled {
            reasons.push(format!("{} is disabled", action.text));
        }
        if let Some(condition) = &action.condition {
            match ctx.schema.evaluate_bool(condition, ctx.data) {
                Ok(true) => {}
                Ok(false) => reasons.push(format!("{} is not available", action.text)),
                Err(err) => reasons.push(format!("{} could not be evaluated: {}", action.text, err)),
            }
        }
        reasons
    }

    fn validate_workflow(
        &self,
        workflow: &Workflow,
        stage: &str,
        ctx: &ValidationContext,
    ) -> IndexMap<String, Vec<String>> {
        let Some(stage) = workflow.stage(stage) else {
            return IndexMap::new();
        };
        ctx.schema
            .fields
            .iter()
            .filter(|f| stage.fields.is_empty() || stage.fields.contains(&f.name))
            .filter_map(|field| {
                let value = ctx.data.get(&field.name).unwrap_or(&NULL);
                let errors = self.validate_field(field, value, ctx);
                (!errors.is_empty()).then(|| (field.name.clone(), errors))
            })
            .collect()
    }

    fn validate_business_rules(
        &self,
        rules: &[BusinessRule],
        ctx: &ValidationContext,
    ) -> Vec<RuleViolation> {
        rules
            .iter()
            .filter_map(|rule| {
                let message = match ctx.schema.evaluate_bool(&rule.condition, ctx.data) {
                    Ok(true) => return None,
                    Ok(false) => rule.message.clone(),
                    Err(err) => format!("{} (rule could not be evaluated: {})", rule.message, err),
                };
                Some(RuleViolation {
                    rule_id: rule.id.clone(),
                    fields: rule.fields.clone(),
                    message,
                    severity: rule.severity,
                })
            })
            .collect()
    }
}

/// Split violations into blocking field errors keyed by field
///
/// Rules without fields report under their own id.
pub fn violations_by_field(violations: &[RuleViolation]) -> IndexMap<String, Vec<String>> {
    let mut out: IndexMap<String, Vec<String>> = IndexMap::new();
    for violation in violations.iter().filter(|v| v.severity == Severity::Error) {
        if violation.fields.is_empty() {
            out.entry(violation.rule_id.clone())
                .or_default()
                .push(violation.message.clone());
        }
        for field in &violation.fields {
            out.entry(field.clone())
                .or_default()
                .push(violation.message.clone());
        }
    }
    out
}

fn message(custom: &Option<String>, default: String) -> String {
    custom.clone().unwrap_or(default)
}

fn format_message(label: &str, format: Format) -> String {
    match format {
        Format::Email => format!("{} must be a valid email address", label),
        Format::Url => format!("{} must be a valid URL", label),
        Format::Uuid => format!("{} must be a valid UUID", label),
        Format::Date => format!("{} must be a valid date (YYYY-MM-DD)", label),
        Format::DateTime => format!("{} must be a valid datetime (RFC3339)", label),
        Format::Time => format!("{} must be a valid time (HH:MM:SS)", label),
    }
}

fn validate_number(field: &Field, rules: &FieldValidation, value: &Value, out: &mut Vec<String>) {
    let Some(n) = value.as_float() else {
        return;
    };
    let label = field.label();
    let messages = &rules.messages;

    if let Some(min) = rules.min {
        if rules.exclusive_min && n <= min {
            out.push(format!("{} must be greater than {}", label, min));
        } else if !rules.exclusive_min && n < min {
            out.push(message(&messages.min, format!("{} must be at least {}", label, min)));
        }
    }
    if let Some(max) = rules.max {
        if rules.exclusive_max && n >= max {
            out.push(format!("{} must be less than {}", label, max));
        } else if !rules.exclusive_max && n > max {
            out.push(message(&messages.max, format!("{} must be at most {}", label, max)));
        }
    }
    if rules.integer && n.fract() != 0.0 {
        out.push(format!("{} must be an integer", label));
    }
    if rules.positive && n <= 0.0 {
        out.push(format!("{} must be positive", label));
    }
    if rules.negative && n >= 0.0 {
        out.push(format!("{} must be negative", label));
    }
    if let Some(m) = rules.multiple_of {
        if !is_multiple(n, m) {
            out.push(format!("{} must be a multiple of {}", label, m));
        }
    }
    if let Some(step) = rules.step {
        let base = rules.min.unwrap_or(0.0);
        if !is_multiple(n - base, step) {
            out.push(format!("{} must be in steps of {}", label, step));
        }
    }
}

fn is_multiple(n: f64, of: f64) -> bool {
    let ratio = n / of;
    (ratio - ratio.round()).abs() < 1e-9
}

fn validate_list(field: &Field, rules: &FieldValidation, items: &[Value], out: &mut Vec<String>) {
    let label = field.label();
    if let Some(min) = rules.min_items {
        if items.len() < min {
            out.push(format!("{} must have at least {} items", label, min));
        }
    }
    if let Some(max) = rules.max_items {
        if items.len() > max {
            out.push(format!("{} must have at most {} items", label, max));
        }
    }
    if rules.unique_items {
        let duplicate = items
            .iter()
            .enumerate()
            .any(|(i, a)| items[i + 1..].iter().any(|b| values_equal(a, b)));
        if duplicate {
            out.push(format!("{} must have unique items", label));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use formflow_core::{Conditional, Expr, FieldType, RepeatableConfig, Stage, Transition};

    fn check(field: &Field, value: impl Into<Value>) -> Vec<String> {
        let schema = Schema::new("t").with_field(field.clone());
        let data = schema.default_values();
        RuleValidator::new().validate_field(field, &value.into(), &ValidationContext::new(&schema, &data))
    }

    #[test]
    fn test_required() {
        let field = Field::new("email", FieldType::Email).with_label("Email").required();
        assert_eq!(check(&field, Value::Null), vec!["Email is required"]);
        assert_eq!(check(&field, "  "), vec!["Email is required"]);
        assert!(check(&field, "a@b.co").is_empty());
    }

    #[test]
    fn test_optional_empty_skips_rules() {
        let field = Field::new("name", FieldType::Text)
            .with_validation(FieldValidation::length(Some(3), None));
        assert!(check(&field, "").is_empty());
        assert_eq!(check(&field, "ab"), vec!["name must be at least 3 characters"]);
    }

    #[test]
    fn test_string_rules_collect_all_failures() {
        let field = Field::new("code", FieldType::Text).with_label("Code").with_validation(
            FieldValidation {
                max_length: Some(3),
                pattern: Some("^[A-Z]+$".into()),
                ..FieldValidation::default()
            },
        );
        assert_eq!(
            check(&field, "abcd"),
            vec!["Code must be at most 3 characters", "Code format is invalid"]
        );
    }

    #[test]
    fn test_invalid_pattern_is_reported() {
        let field = Field::new("x", FieldType::Text).with_validation(FieldValidation::pattern("(["));
        assert_eq!(check(&field, "a"), vec!["x has an invalid validation pattern"]);
    }

    #[test]
    fn test_formats() {
        let cases = [
            (Format::Email, "user@example.com", "nope"),
            (Format::Url, "https://example.com/a?b=c", "example dot com"),
            (Format::Uuid, "123e4567-e89b-12d3-a456-426614174000", "123e4567"),
            (Format::Date, "2024-02-29", "2023-02-29"),
            (Format::DateTime, "2024-01-01T10:00:00Z", "2024-01-01 10:00"),
            (Format::Time, "23:59:59", "24:00:00"),
        ];
        for (format, good, bad) in cases {
            let field = Field::new("f", FieldType::Text).with_validation(FieldValidation::format(format));
            assert!(check(&field, good).is_empty(), "{:?} rejected {}", format, good);
            assert_eq!(check(&field, bad).len(), 1, "{:?} accepted {}", format, bad);
        }
    }

    #[test]
    fn test_numeric_rules() {
        let field = Field::new("qty", FieldType::Integer).with_label("Quantity").with_validation(
            FieldValidation {
                min: Some(1.0),
                max: Some(10.0),
                integer: true,
                multiple_of: Some(2.0),
                ..FieldValidation::default()
            },
        );
        assert!(check(&field, 4i64).is_empty());
        assert_eq!(check(&field, 0i64), vec!["Quantity must be at least 1"]);
        assert_eq!(check(&field, 12i64), vec!["Quantity must be at most 10"]);
        assert_eq!(check(&field, 2.5), vec!["Quantity must be an integer", "Quantity must be a multiple of 2"]);
    }

    #[test]
    fn test_exclusive_bounds() {
        let field = Field::new("p", FieldType::Number).with_validation(FieldValidation {
            min: Some(0.0),
            exclusive_min: true,
            ..FieldValidation::default()
        });
        assert_eq!(check(&field, 0.0), vec!["p must be greater than 0"]);
        assert!(check(&field, 0.01).is_empty());
    }

    #[test]
    fn test_list_rules() {
        let field = Field::new("tags", FieldType::MultiSelect).with_validation(FieldValidation {
            max_items: Some(2),
            unique_items: true,
            ..FieldValidation::default()
        });
        assert!(check(&field, vec!["a", "b"]).is_empty());
        assert_eq!(
            check(&field, vec!["a", "b", "a"]),
            vec!["tags must have at most 2 items", "tags must have unique items"]
        );
    }

    #[test]
    fn test_custom_rule_sees_other_fields() {
        let confirm = Field::new("confirm", FieldType::Password)
            .with_label("Confirmation")
            .with_validation(FieldValidation {
                custom: Some(Expr::Eq(
                    Box::new(Expr::field("password")),
                    Box::new(Expr::field("confirm")),
                )),
                ..FieldValidation::default()
            });
        let schema = Schema::new("signup")
            .with_field(Field::new("password", FieldType::Password))
            .with_field(confirm.clone());
        let mut data = schema.default_values();
        data.insert("password".into(), Value::from("hunter2"));
        data.insert("confirm".into(), Value::from("hunter3"));

        let validator = RuleValidator::new();
        let ctx = ValidationContext::new(&schema, &data);
        assert_eq!(
            validator.validate_field(&confirm, &data["confirm"], &ctx),
            vec!["Confirmation is invalid"]
        );
    }

    #[test]
    fn test_hidden_fields_are_not_validated() {
        let field = Field::new("state", FieldType::Text).required().with_conditional(
            Conditional::show_when(Expr::field_eq("country", "US")),
        );
        let schema = Schema::new("s")
            .with_field(Field::new("country", FieldType::Text))
            .with_field(field.clone());
        let data = schema.default_values();
        let mut conditions = IndexMap::new();
        conditions.insert(
            "state".to_string(),
            FieldConditionalResult {
                field_name: "state".into(),
                visible: false,
                editable: true,
                required: true,
                reason: None,
            },
        );
        let ctx = ValidationContext::new(&schema, &data).with_conditions(&conditions);
        assert!(RuleValidator::new().validate_field(&field, &Value::Null, &ctx).is_empty());
        assert!(RuleValidator::new().validate_all_fields(&ctx).is_empty());
    }

    #[test]
    fn test_repeatable_items_use_template() {
        let field = Field::new("items", FieldType::Repeatable).with_label("Items").with_repeatable(
            RepeatableConfig::new(vec![
                Field::new("sku", FieldType::Text).with_label("SKU").required(),
            ])
            .with_bounds(Some(1), Some(3)),
        );
        let mut good = ValueMap::new();
        good.insert("sku".into(), Value::from("A-1"));
        let bad = ValueMap::new();

        assert!(check(&field, vec![Value::Map(good.clone())]).is_empty());
        assert_eq!(
            check(&field, vec![Value::Map(good), Value::Map(bad)]),
            vec!["Items item 2: SKU is required"]
        );
    }

    #[test]
    fn test_workflow_validates_stage_fields_only() {
        let schema = Schema::new("w")
            .with_field(Field::new("title", FieldType::Text).required())
            .with_field(Field::new("approver", FieldType::Text).required())
            .with_workflow(Workflow {
                initial_stage: "draft".into(),
                stages: vec![
                    Stage::new("draft", vec!["title".into()]),
                    Stage::new("approval", vec!["approver".into()]),
                ],
                transitions: vec![Transition::new("draft", "approval", "send")],
            });
        let data = schema.default_values();
        let ctx = ValidationContext::new(&schema, &data);
        let workflow = schema.workflow.as_ref().unwrap();
        let errors = RuleValidator::new().validate_workflow(workflow, "draft", &ctx);
        assert_eq!(errors.keys().collect::<Vec<_>>(), vec!["title"]);
    }

    #[test]
    fn test_business_rules() {
        let schema = Schema::new("booking")
            .with_field(Field::new("start", FieldType::Date))
            .with_field(Field::new("end", FieldType::Date));
        let mut data = schema.default_values();
        data.insert("start".into(), Value::Date(NaiveDate::from_ymd_opt(2024, 5, 2).unwrap()));
        data.insert("end".into(), Value::Date(NaiveDate::from_ymd_opt(2024, 5, 1).unwrap()));
        let rules = vec![
            BusinessRule::new(
                "dates",
                Expr::Le(Box::new(Expr::field("start")), Box::new(Expr::field("end"))),
                "Start must be before end",
            )
            .on_fields(vec!["start".into(), "end".into()]),
            BusinessRule::new("soft", Expr::lit(false), "Just so you know")
                .with_severity(Severity::Warning),
        ];
        let ctx = ValidationContext::new(&schema, &data);
        let violations = RuleValidator::new().validate_business_rules(&rules, &ctx);
        assert_eq!(violations.len(), 2);

        let blocking = violations_by_field(&violations);
        assert_eq!(blocking.len(), 2);
        assert_eq!(blocking["start"], vec!["Start must be before end"]);
    }

    #[test]
    fn test_action_validation() {
        let schema = Schema::new("s").with_field(Field::new("agree", FieldType::Boolean));
        let mut data = schema.default_values();
        data.insert("agree".into(), Value::Bool(false));
        let action = Action::new("submit", formflow_core::ActionType::Submit)
            .with_text("Send")
            .with_condition(Expr::field("agree"));
        let ctx = ValidationContext::new(&schema, &data);
        assert_eq!(
            RuleValidator::new().validate_action(&action, &ctx),
            vec!["Send is not available"]
        );
    }
}
