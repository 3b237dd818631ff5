//! Conditional engine
//!
//! Computes per-field visibility, required-ness and editability from the
//! schema's static flags and conditional expressions. The engine itself is
//! pure; [`ConditionalCache`] remembers the previous results per scope
//! (fields, layout sections, workflow transitions) so each evaluation can
//! report only what changed.
//!
//! A field whose condition fails to evaluate falls back to
//! visible + editable + not required, and the error is reported for that
//! field alone.

use formflow_core::{
    Action, Error as CoreError, Field, Result as CoreResult, Schema, Section, Transition, ValueMap,
};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Dynamic state of one field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldConditionalResult {
    pub field_name: String,
    pub visible: bool,
    pub editable: bool,
    pub required: bool,
    /// What determined a non-default state, if anything
    pub reason: Option<String>,
}

impl FieldConditionalResult {
    /// Default used when a field's conditions cannot be evaluated
    pub fn fail_open(field_name: impl Into<String>) -> Self {
        Self {
            field_name: field_name.into(),
            visible: true,
            editable: true,
            required: false,
            reason: Some("condition evaluation failed".to_string()),
        }
    }
}

/// Outcome of evaluating one scope against its previous evaluation
#[derive(Debug, Clone, PartialEq)]
pub struct ConditionalEvaluationResult<T = FieldConditionalResult> {
    /// True when at least one entry differs from the previous evaluation
    pub changed: bool,
    /// Entries that differ, in declaration order
    pub updates: IndexMap<String, T>,
    /// Entries whose condition failed to evaluate
    pub errors: IndexMap<String, CoreError>,
}

impl<T> Default for ConditionalEvaluationResult<T> {
    fn default() -> Self {
        Self {
            changed: false,
            updates: IndexMap::new(),
            errors: IndexMap::new(),
        }
    }
}

impl<T> ConditionalEvaluationResult<T> {
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

/// Evaluates conditions for a schema against form values
pub trait ConditionalEngine: Send + Sync {
    fn evaluate_field_visibility(
        &self,
        schema: &Schema,
        field: &Field,
        data: &ValueMap,
    ) -> CoreResult<bool>;

    fn evaluate_field_required(
        &self,
        schema: &Schema,
        field: &Field,
        data: &ValueMap,
    ) -> CoreResult<bool>;

    fn evaluate_field_editable(
        &self,
        schema: &Schema,
        field: &Field,
        data: &ValueMap,
    ) -> CoreResult<bool>;

    /// Whether an action can be triggered
    fn evaluate_action_conditions(
        &self,
        schema: &Schema,
        action: &Action,
        data: &ValueMap,
    ) -> CoreResult<bool>;

    /// Whether a layout section is shown
    fn evaluate_section(&self, schema: &Schema, section: &Section, data: &ValueMap)
        -> CoreResult<bool>;

    /// Whether a workflow transition's condition holds
    fn evaluate_transition(
        &self,
        schema: &Schema,
        transition: &Transition,
        data: &ValueMap,
    ) -> CoreResult<bool>;

    /// All three field states at once
    fn evaluate_field(
        &self,
        schema: &Schema,
        field: &Field,
        data: &ValueMap,
    ) -> CoreResult<FieldConditionalResult> {
        let visible = self.evaluate_field_visibility(schema, field, data)?;
        let required = self.evaluate_field_required(schema, field, data)?;
        let editable = self.evaluate_field_editable(schema, field, data)?;
        let reason = if !visible {
            Some(if field.hidden { "hidden" } else { "hidden by condition" })
        } else if !editable {
            Some(if field.disabled { "disabled" } else { "disabled by condition" })
        } else if required && !field.required {
            Some("required by condition")
        } else {
            None
        };
        Ok(FieldConditionalResult {
            field_name: field.name.clone(),
            visible,
            editable,
            required,
            reason: reason.map(str::to_string),
        })
    }
}

/// Engine backed by the schema's `Expr` conditions
#[derive(Debug, Clone, Copy, Default)]
pub struct ExprConditionalEngine;

impl ExprConditionalEngine {
    pub fn new() -> Self {
        Self
    }
}

impl ConditionalEngine for ExprConditionalEngine {
    fn evaluate_field_visibility(
        &self,
        schema: &Schema,
        field: &Field,
        data: &ValueMap,
    ) -> CoreResult<bool> {
        if field.hidden {
            return Ok(false);
        }
        let Some(conditional) = &field.conditional else {
            return Ok(true);
        };
        if let Some(hide) = &conditional.hide {
            if schema.evaluate_bool(hide, data)? {
                return Ok(false);
            }
        }
        match &conditional.show {
            Some(show) => schema.evaluate_bool(show, data),
            None => Ok(true),
        }
    }

    fn evaluate_field_required(
        &self,
        schema: &Schema,
        field: &Field,
        data: &ValueMap,
    ) -> CoreResult<bool> {
        if field.required {
            return Ok(true);
        }
        match field.conditional.as_ref().and_then(|c| c.required.as_ref()) {
            Some(expr) => schema.evaluate_bool(expr, data),
            None => Ok(false),
        }
    }

    fn evaluate_field_editable(
        &self,
        schema: &Schema,
        field: &Field,
        data: &ValueMap,
    ) -> CoreResult<bool> {
        if field.disabled {
            return Ok(false);
        }
        match field.conditional.as_ref().and_then(|c| c.disabled.as_ref()) {
            Some(expr) => Ok(!schema.evaluate_bool(expr, data)?),
            None => Ok(true),
        }
    }

    fn evaluate_action_conditions(
        &self,
        schema: &Schema,
        action: &Action,
        data: &ValueMap,
    ) -> CoreResult<bool> {
        if action.hidden || action.disabled {
            return Ok(false);
        }
        match &action.condition {
            Some(expr) => schema.evaluate_bool(expr, data),
            None => Ok(true),
        }
    }

    fn evaluate_section(
        &self,
        schema: &Schema,
        section: &Section,
        data: &ValueMap,
    ) -> CoreResult<bool> {
        match &section.condition {
            Some(expr) => schema.evaluate_bool(expr, data),
            None => Ok(true),
        }
    }

    fn evaluate_transition(
        &self,
        schema: &Schema,
        transition: &Transition,
        data: &ValueMap,
    ) -> CoreResult<bool> {
        match &transition.condition {
            Some(expr) => schema.evaluate_bool(expr, data),
            None => Ok(true),
        }
    }
}

/// Previous results for each evaluation scope
#[derive(Debug, Clone, Default)]
pub struct ConditionalCache {
    fields: IndexMap<String, FieldConditionalResult>,
    sections: IndexMap<String, bool>,
    transitions: IndexMap<String, bool>,
}

impl ConditionalCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last computed state of every field
    pub fn fields(&self) -> &IndexMap<String, FieldConditionalResult> {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldConditionalResult> {
        self.fields.get(name)
    }

    /// Last computed visibility of every layout section
    pub fn sections(&self) -> &IndexMap<String, bool> {
        &self.sections
    }

    /// Last computed availability of transitions out of the current stage
    pub fn transitions(&self) -> &IndexMap<String, bool> {
        &self.transitions
    }

    /// Number of fields currently visible
    pub fn visible_count(&self) -> usize {
        self.fields.values().filter(|r| r.visible).count()
    }

    /// Evaluate every field, folding in layout and workflow constraints
    ///
    /// A field listed in a hidden section is hidden. While a workflow stage
    /// restricts its fields, fields outside it are not editable.
    pub fn evaluate_fields(
        &mut self,
        engine: &dyn ConditionalEngine,
        schema: &Schema,
        data: &ValueMap,
        stage: Option<&str>,
    ) -> ConditionalEvaluationResult {
        let mut errors = IndexMap::new();

        let hidden_sections: Vec<&Section> = schema
            .layout
            .iter()
            .flat_map(|l| l.sections.iter())
            .filter(|s| matches!(engine.evaluate_section(schema, s, data), Ok(false)))
            .collect();
        let stage = stage.and_then(|id| schema.workflow.as_ref().and_then(|w| w.stage(id)));

        let mut current = IndexMap::with_capacity(schema.fields.len());
        for field in &schema.fields {
            let mut result = match engine.evaluate_field(schema, field, data) {
                Ok(result) => result,
                Err(err) => {
                    warn!(field = %field.name, error = %err, "field condition failed, using defaults");
                    errors.insert(field.name.clone(), err);
                    FieldConditionalResult::fail_open(&field.name)
                }
            };
            if result.visible {
                if let Some(section) = hidden_sections
                    .iter()
                    .find(|s| s.fields.iter().any(|f| *f == field.name))
                {
                    result.visible = false;
                    result.reason = Some(format!("section '{}' is hidden", section.id));
                }
            }
            if let Some(stage) = stage {
                if result.editable && !stage.allows(&field.name) {
                    result.editable = false;
                    result.reason = Some(format!("not editable in stage '{}'", stage.id));
                }
            }
            current.insert(field.name.clone(), result);
        }

        diff_into(&mut self.fields, current, errors)
    }

    /// Evaluate layout section visibility
    ///
    /// A section whose condition fails stays visible.
    pub fn evaluate_layout(
        &mut self,
        engine: &dyn ConditionalEngine,
        schema: &Schema,
        data: &ValueMap,
    ) -> ConditionalEvaluationResult<bool> {
        let mut errors = IndexMap::new();
        let mut current = IndexMap::new();
        for section in schema.layout.iter().flat_map(|l| l.sections.iter()) {
            let visible = engine
                .evaluate_section(schema, section, data)
                .unwrap_or_else(|err| {
                    warn!(section = %section.id, error = %err, "section condition failed");
                    errors.insert(section.id.clone(), err);
                    true
                });
            current.insert(section.id.clone(), visible);
        }
        diff_into(&mut self.sections, current, errors)
    }

    /// Evaluate which transitions out of `stage` are available, keyed by action
    ///
    /// A transition whose condition fails is unavailable.
    pub fn evaluate_workflow(
        &mut self,
        engine: &dyn ConditionalEngine,
        schema: &Schema,
        stage: Option<&str>,
        data: &ValueMap,
    ) -> ConditionalEvaluationResult<bool> {
        let mut errors = IndexMap::new();
        let mut current = IndexMap::new();
        if let (Some(workflow), Some(stage)) = (&schema.workflow, stage) {
            for transition in workflow.transitions_from(stage) {
                let available = engine
                    .evaluate_transition(schema, transition, data)
                    .unwrap_or_else(|err| {
                        warn!(action = %transition.action, error = %err, "transition condition failed");
                        errors.insert(transition.action.clone(), err);
                        false
                    });
                current.insert(transition.action.clone(), available);
            }
        }
        diff_into(&mut self.transitions, current, errors)
    }

    /// Forget every previous result
    pub fn clear(&mut self) {
        self.fields.clear();
        self.sections.clear();
        self.transitions.clear();
    }
}

/// Replace `previous` with `current`, returning the entries that differ
fn diff_into<T: Clone + PartialEq>(
    previous: &mut IndexMap<String, T>,
    current: IndexMap<String, T>,
    errors: IndexMap<String, CoreError>,
) -> ConditionalEvaluationResult<T> {
    let updates: IndexMap<String, T> = current
        .iter()
        .filter(|(k, v)| previous.get(*k) != Some(*v))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    *previous = current;
    ConditionalEvaluationResult {
        changed: !updates.is_empty(),
        updates,
        errors,
    }
}
