//! The form runtime
//!
//! [`FormRuntime`] owns the live state of one form and is the only way to
//! mutate it. Every user action reported by a driver goes through it:
//! the stores are updated under one write lock, conditional state is
//! recomputed, validation runs according to the configured
//! [`ValidationTiming`], and an event is dispatched once the lock has been
//! released so handlers may call back into the runtime.

use crate::conditional::{
    ConditionalEngine, ConditionalEvaluationResult, ExprConditionalEngine, FieldConditionalResult,
};
use crate::config::{RuntimeConfig, ValidationTiming};
use crate::debounce::Debouncer;
use crate::events::{
    DebouncedDispatcher, DispatchReport, EventCallback, EventDispatcher, EventStats, EventType,
    FormEvent, HandlerError, HandlerId,
};
use crate::history::SnapshotHistory;
use crate::orchestrator::{
    AsyncCallback, AsyncCheck, AsyncValidationOutcome, ValidationOrchestrator,
};
use crate::render::{ActionView, FieldView, FormView};
use crate::state::{FieldState, FormState, RuntimeStats, StateManager, StateSnapshot};
use crate::validation::{violations_by_field, RuleValidator, ValidationContext, Validator};
use crate::{Error, Result};
use chrono::Utc;
use formflow_core::{
    Action, ActionType, Error as CoreError, Field, RuleViolation, Schema, Value, ValueMap,
};
use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::{Arc, Weak};
use tokio::runtime::Handle;
use tracing::{debug, warn};

struct Inner {
    schema: Schema,
    config: RuntimeConfig,
    state: RwLock<FormState>,
    history: Mutex<SnapshotHistory>,
    dispatcher: Arc<EventDispatcher>,
    debounced: DebouncedDispatcher,
    validation_timers: Debouncer<String>,
    orchestrator: ValidationOrchestrator,
    validator: Arc<dyn Validator>,
    engine: Arc<dyn ConditionalEngine>,
}

impl Inner {
    fn field(&self, name: &str) -> Result<&Field> {
        self.schema.field(name).ok_or_else(|| {
            debug!(form = %self.schema.name, field = name, "rejected: unknown field");
            Error::UnknownField(name.to_string())
        })
    }

    fn action(&self, id: &str) -> Result<&Action> {
        self.schema
            .action(id)
            .ok_or_else(|| Error::UnknownAction(id.to_string()))
    }

    fn initial_stage(&self) -> Option<String> {
        self.schema.workflow.as_ref().map(|w| w.initial_stage.clone())
    }

    /// Defaults overlaid with `data`; unknown keys are rejected
    fn initial_values(&self, data: ValueMap) -> Result<ValueMap> {
        complete_values(&self.schema, data)
    }

    fn context<'a>(&'a self, state: &'a FormState) -> ValidationContext<'a> {
        ValidationContext::new(&self.schema, state.values.values())
            .with_conditions(state.conditions.fields())
    }

    fn evaluate_fields(&self, state: &mut FormState) -> ConditionalEvaluationResult {
        let FormState {
            values,
            conditions,
            stage,
            ..
        } = state;
        conditions.evaluate_fields(&*self.engine, &self.schema, values.values(), stage.as_deref())
    }

    /// Recompute field conditions if conditionals are enabled
    fn refresh_conditions(&self, state: &mut FormState) -> ConditionalEvaluationResult {
        if !self.config.enable_conditionals {
            return ConditionalEvaluationResult::default();
        }
        self.evaluate_fields(state)
    }

    fn validate_one(&self, state: &mut FormState, field: &Field) -> Vec<String> {
        let errors = {
            let ctx = self.context(state);
            let value = state.values.get(&field.name).cloned().unwrap_or_default();
            self.validator.validate_field(field, &value, &ctx)
        };
        state.errors.set_errors(&field.name, errors.clone());
        errors
    }

    /// Validate every field and replace all stored field errors
    fn validate_all(&self, state: &mut FormState) -> IndexMap<String, Vec<String>> {
        let results = {
            let ctx = self.context(state);
            self.validator.validate_all_fields(&ctx)
        };
        for field in &self.schema.fields {
            let errors = results.get(&field.name).cloned().unwrap_or_default();
            state.errors.set_errors(&field.name, errors);
        }
        results
    }

    fn auto_validates(&self, timing: ValidationTiming) -> bool {
        self.config.enable_validation && self.config.validation_timing == timing
    }

    fn cancel_pending(&self) {
        let timers = self.validation_timers.cancel_all();
        let in_flight = self.orchestrator.cancel_all();
        if timers + in_flight > 0 {
            debug!(form = %self.schema.name, timers, in_flight, "pending validations cancelled");
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.validation_timers.cancel_all();
        self.debounced.cancel_all();
        self.orchestrator.cancel_all();
    }
}

fn complete_values(schema: &Schema, data: ValueMap) -> Result<ValueMap> {
    let mut values = schema.default_values();
    for (name, value) in data {
        match values.get_mut(&name) {
            Some(slot) => *slot = value,
            None => return Err(Error::UnknownField(name)),
        }
    }
    Ok(values)
}

fn schema_error(err: CoreError) -> Error {
    match err {
        CoreError::InvalidSchema(msg) => Error::InvalidSchema(msg),
        other => Error::Core(other),
    }
}

/// Builder for [`FormRuntime`]
pub struct RuntimeBuilder {
    schema: Schema,
    config: RuntimeConfig,
    initial: ValueMap,
    validator: Option<Arc<dyn Validator>>,
    engine: Option<Arc<dyn ConditionalEngine>>,
    handlers: Vec<(EventType, EventCallback)>,
}

impl RuntimeBuilder {
    pub fn new(schema: Schema) -> Self {
        Self {
            schema,
            config: RuntimeConfig::default(),
            initial: ValueMap::new(),
            validator: None,
            engine: None,
            handlers: Vec::new(),
        }
    }

    pub fn with_config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_initial_data(mut self, data: ValueMap) -> Self {
        self.initial = data;
        self
    }

    /// Replace the built-in [`RuleValidator`]
    pub fn with_validator(mut self, validator: Arc<dyn Validator>) -> Self {
        self.validator = Some(validator);
        self
    }

    /// Replace the built-in [`ExprConditionalEngine`]
    pub fn with_conditional_engine(mut self, engine: Arc<dyn ConditionalEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    /// Register a handler before initialization, so it also sees the init event
    pub fn with_event_handler<F>(mut self, event_type: EventType, callback: F) -> Self
    where
        F: Fn(&FormEvent) -> std::result::Result<(), HandlerError> + Send + Sync + 'static,
    {
        self.handlers.push((event_type, Arc::new(callback)));
        self
    }

    pub fn build(self) -> Result<FormRuntime> {
        self.schema.validate().map_err(schema_error)?;
        let values = complete_values(&self.schema, self.initial)?;

        let dispatcher = Arc::new(EventDispatcher::new(self.config.max_events));
        dispatcher.set_tracking(self.config.enable_event_tracking);
        for (event_type, callback) in self.handlers {
            dispatcher.register(event_type, callback);
        }

        let stage = self.schema.workflow.as_ref().map(|w| w.initial_stage.clone());
        let inner = Inner {
            debounced: DebouncedDispatcher::new(Arc::clone(&dispatcher), self.config.debounced.clone()),
            history: Mutex::new(SnapshotHistory::new(self.config.max_state_snapshots)),
            state: RwLock::new(FormState::new(values.clone(), stage)),
            validation_timers: Debouncer::new(),
            orchestrator: ValidationOrchestrator::new(),
            validator: self
                .validator
                .unwrap_or_else(|| Arc::new(RuleValidator::new()) as Arc<dyn Validator>),
            engine: self
                .engine
                .unwrap_or_else(|| Arc::new(ExprConditionalEngine::new()) as Arc<dyn ConditionalEngine>),
            dispatcher,
            config: self.config,
            schema: self.schema,
        };

        let runtime = FormRuntime {
            inner: Arc::new(inner),
        };
        {
            let mut state = runtime.inner.state.write();
            runtime.inner.refresh_conditions(&mut state);
        }
        debug!(
            form = %runtime.inner.schema.name,
            fields = runtime.inner.schema.fields.len(),
            "form runtime initialized"
        );
        runtime.notify(FormEvent::init(values));
        Ok(runtime)
    }
}

/// Live state of one form
///
/// Cloning is cheap and every clone refers to the same form. Dropping
/// the last clone aborts pending debounce timers and async validations.
///
/// ```
/// use formflow_core::{Field, FieldType, Schema, Value, ValueMap};
/// use formflow_runtime::FormRuntime;
///
/// let schema = Schema::new("order")
///     .with_field(Field::new("quantity", FieldType::Integer).with_default(1))
///     .with_field(Field::new("unit_price", FieldType::Number));
/// let runtime = FormRuntime::initialize(schema, ValueMap::new()).unwrap();
///
/// runtime.set_value("quantity", Value::Int(3)).unwrap();
/// assert!(runtime.is_dirty("quantity"));
/// assert_eq!(runtime.dirty_fields(), vec!["quantity".to_string()]);
/// ```
#[derive(Clone)]
pub struct FormRuntime {
    inner: Arc<Inner>,
}

impl FormRuntime {
    /// Initialize with the default configuration
    pub fn initialize(schema: Schema, initial: ValueMap) -> Result<Self> {
        Self::builder(schema).with_initial_data(initial).build()
    }

    pub fn builder(schema: Schema) -> RuntimeBuilder {
        RuntimeBuilder::new(schema)
    }

    pub fn schema(&self) -> &Schema {
        &self.inner.schema
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    fn downgrade(&self) -> Weak<Inner> {
        Arc::downgrade(&self.inner)
    }

    /// Dispatch an event generated by the runtime
    fn notify(&self, event: FormEvent) {
        if let Err(err) = self.inner.dispatcher.emit(&event) {
            warn!(error = %err, "runtime event not dispatched");
        }
    }

    // ---------------------------------------------------------------------
    // Mutation
    // ---------------------------------------------------------------------

    /// Set a field's value
    ///
    /// Returns the fields whose conditional state changed as a result.
    pub fn set_value(&self, name: &str, value: Value) -> Result<ConditionalEvaluationResult> {
        self.inner.field(name)?;
        let (old, conditions) = {
            let mut state = self.inner.state.write();
            let old = state.values.set(name, value.clone())?;
            state.mark_activity();
            let conditions = self.inner.refresh_conditions(&mut state);
            (old, conditions)
        };
        self.after_change(name);
        self.notify(FormEvent::change(name, value, old));
        Ok(conditions)
    }

    /// Set several values at once
    ///
    /// Nothing is written if any name is undeclared. One change event is
    /// emitted per field, in the order given.
    pub fn update_values(&self, values: ValueMap) -> Result<ConditionalEvaluationResult> {
        let (changes, conditions) = {
            let mut state = self.inner.state.write();
            let changes = state.values.update(values)?;
            state.mark_activity();
            let conditions = self.inner.refresh_conditions(&mut state);
            (changes, conditions)
        };
        for (name, value, old) in changes {
            self.after_change(&name);
            self.notify(FormEvent::change(name, value, old));
        }
        Ok(conditions)
    }

    /// Validation that follows a value change under `OnChange` timing
    fn after_change(&self, name: &str) {
        if !self.inner.auto_validates(ValidationTiming::OnChange) {
            return;
        }
        if let Some(delay) = self.inner.config.change_validation_delay() {
            match Handle::try_current() {
                Ok(handle) => {
                    let weak = self.downgrade();
                    let field = name.to_string();
                    self.inner
                        .validation_timers
                        .schedule(&handle, name.to_string(), delay, move || {
                            if let Some(inner) = weak.upgrade() {
                                FormRuntime { inner }.run_validation(&field);
                            }
                        });
                    return;
                }
                Err(_) => debug!(field = name, "no async runtime, validating immediately"),
            }
        }
        self.run_validation(name);
    }

    fn run_validation(&self, name: &str) {
        if let Err(err) = self.validate_field(name) {
            debug!(field = name, error = %err, "scheduled validation skipped");
        }
    }

    /// Mark a field as touched; returns true if it was not touched before
    pub fn touch(&self, name: &str) -> Result<bool> {
        self.inner.field(name)?;
        let mut state = self.inner.state.write();
        state.mark_activity();
        Ok(state.touched.touch(name))
    }

    /// The field lost focus: touch it, validate under `OnBlur` timing and
    /// emit a blur event
    pub fn blur(&self, name: &str) -> Result<()> {
        let field = self.inner.field(name)?;
        let value = {
            let mut state = self.inner.state.write();
            state.touched.touch(name);
            state.mark_activity();
            if self.inner.auto_validates(ValidationTiming::OnBlur) {
                self.inner.validate_one(&mut state, field);
            }
            state.values.get(name).cloned().unwrap_or_default()
        };
        self.notify(FormEvent::blur(name, value));
        Ok(())
    }

    pub fn focus(&self, name: &str) -> Result<()> {
        self.inner.field(name)?;
        self.inner.state.write().mark_activity();
        self.notify(FormEvent::focus(name));
        Ok(())
    }

    /// Validate the whole form and, if it is valid, emit a submit event
    ///
    /// Returns the submitted values. With validation disabled or timing
    /// `Never` the form is submitted as is. Error-severity business rule
    /// violations block submission like field errors do. Fields are not
    /// touched by submitting.
    pub fn submit(&self) -> Result<ValueMap> {
        let inner = &self.inner;
        let data = {
            let mut state = inner.state.write();
            state.mark_activity();
            let config = &inner.config;
            if config.enable_validation && config.validation_timing != ValidationTiming::Never {
                let mut errors = inner.validate_all(&mut state);
                let violations = {
                    let ctx = inner.context(&state);
                    inner
                        .validator
                        .validate_business_rules(&inner.schema.business_rules, &ctx)
                };
                for (key, messages) in violations_by_field(&violations) {
                    if inner.schema.has_field(&key) {
                        let mut stored = state.errors.get_errors(&key).to_vec();
                        stored.extend(messages.iter().cloned());
                        state.errors.set_errors(&key, stored);
                    }
                    errors.entry(key).or_default().extend(messages);
                }
                if !errors.is_empty() {
                    debug!(form = %inner.schema.name, fields = errors.len(), "submit blocked by validation");
                    return Err(Error::ValidationFailed { errors });
                }
            }
            state.values.get_all()
        };
        self.notify(FormEvent::submit(data.clone()));
        Ok(data)
    }

    /// Restore initial values and clear touched state and errors
    ///
    /// Pending debounced and async validations are cancelled first.
    pub fn reset(&self) {
        self.inner.cancel_pending();
        {
            let mut state = self.inner.state.write();
            state.values.reset();
            state.touched.clear();
            state.errors.clear();
            state.stage = self.inner.initial_stage();
            state.discard_all_async_through(self.inner.orchestrator.latest_generation());
            state.mark_activity();
            self.inner.refresh_conditions(&mut state);
        }
        self.notify(FormEvent::reset());
    }

    /// Restore one field to its initial value and clear its errors
    ///
    /// The field stays touched; only a full [`reset`](Self::reset) clears
    /// touched state. Pending validations and debounced events for the
    /// field are cancelled.
    pub fn reset_field(&self, name: &str) -> Result<()> {
        self.inner.field(name)?;
        self.inner.validation_timers.cancel(&name.to_string());
        self.inner.orchestrator.cancel(name);
        self.inner.debounced.cancel_field(name);
        let (value, old) = {
            let mut state = self.inner.state.write();
            let old = state.values.get(name).cloned().unwrap_or_default();
            state.values.reset_field(name)?;
            let floor = self.inner.orchestrator.latest_generation();
            state.discard_async_through(name, floor);
            state.errors.clear_field(name);
            state.mark_activity();
            self.inner.refresh_conditions(&mut state);
            (state.values.get(name).cloned().unwrap_or_default(), old)
        };
        if value != old {
            self.notify(FormEvent::change(name, value, old));
        }
        Ok(())
    }

    /// Replace a field's errors, e.g. with messages from a server
    pub fn set_errors(&self, name: &str, errors: Vec<String>) -> Result<()> {
        self.inner.field(name)?;
        self.inner.state.write().errors.set_errors(name, errors);
        Ok(())
    }

    pub fn clear_errors(&self, name: &str) -> Result<()> {
        self.set_errors(name, Vec::new())
    }

    /// Replace the initial data and start over
    ///
    /// Touched state, errors, checkpoints and event statistics are all
    /// cleared, then an init event is emitted.
    pub fn reinitialize(&self, initial: ValueMap) -> Result<()> {
        let values = self.inner.initial_values(initial)?;
        self.inner.cancel_pending();
        {
            let mut state = self.inner.state.write();
            let floor = self.inner.orchestrator.latest_generation();
            *state = FormState::new(values.clone(), self.inner.initial_stage());
            state.discard_all_async_through(floor);
            self.inner.refresh_conditions(&mut state);
        }
        self.inner.history.lock().clear();
        self.inner.dispatcher.clear_tracking();
        self.notify(FormEvent::init(values));
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Queries
    // ---------------------------------------------------------------------

    pub fn get_value(&self, name: &str) -> Option<Value> {
        self.inner.state.read().values.get(name).cloned()
    }

    pub fn get_all(&self) -> ValueMap {
        self.inner.state.read().values.get_all()
    }

    pub fn initial_values(&self) -> ValueMap {
        self.inner.state.read().values.initial_values()
    }

    pub fn changed_values(&self) -> ValueMap {
        self.inner.state.read().values.changed_values()
    }

    pub fn is_touched(&self, name: &str) -> bool {
        self.inner.state.read().touched.is_touched(name)
    }

    pub fn touched_fields(&self) -> Vec<String> {
        self.inner.state.read().touched.touched_fields()
    }

    pub fn is_dirty(&self, name: &str) -> bool {
        self.inner.state.read().values.is_dirty(name)
    }

    pub fn is_any_dirty(&self) -> bool {
        self.inner.state.read().values.is_any_dirty()
    }

    pub fn dirty_fields(&self) -> Vec<String> {
        self.inner.state.read().values.dirty_fields()
    }

    pub fn get_errors(&self, name: &str) -> Vec<String> {
        self.inner.state.read().errors.get_errors(name).to_vec()
    }

    pub fn get_all_errors(&self) -> IndexMap<String, Vec<String>> {
        self.inner.state.read().errors.get_all_errors()
    }

    /// True when no field has stored errors
    pub fn is_valid(&self) -> bool {
        self.inner.state.read().errors.is_valid()
    }

    pub fn current_stage(&self) -> Option<String> {
        self.inner.state.read().stage.clone()
    }

    /// Last computed conditional state of every field
    pub fn conditions(&self) -> IndexMap<String, FieldConditionalResult> {
        self.inner.state.read().conditions.fields().clone()
    }

    pub fn field_state(&self, name: &str) -> Result<FieldState> {
        let field = self.inner.field(name)?;
        let state = self.inner.state.read();
        Ok(FieldState {
            name: field.name.clone(),
            value: state.values.get(name).cloned().unwrap_or_default(),
            initial: state.values.initial().get(name).cloned().unwrap_or_default(),
            touched: state.touched.is_touched(name),
            dirty: state.values.is_dirty(name),
            errors: state.errors.get_errors(name).to_vec(),
            conditions: field_conditions(&state, field),
        })
    }

    pub fn field_view(&self, name: &str) -> Result<FieldView> {
        let field = self.inner.field(name)?;
        let state = self.inner.state.read();
        Ok(build_field_view(&state, field))
    }

    /// Visible fields and declared actions, ready for a renderer
    pub fn form_view(&self) -> FormView {
        let inner = &self.inner;
        let state = inner.state.read();
        let data = state.values.values();
        let fields = inner
            .schema
            .fields
            .iter()
            .map(|f| build_field_view(&state, f))
            .filter(|v| v.visible)
            .collect();
        let actions = inner
            .schema
            .actions
            .iter()
            .filter(|a| !a.hidden)
            .map(|a| ActionView {
                id: a.id.clone(),
                text: a.text.clone(),
                available: inner
                    .engine
                    .evaluate_action_conditions(&inner.schema, a, data)
                    .unwrap_or(false),
            })
            .collect();
        FormView {
            name: inner.schema.name.clone(),
            title: inner.schema.title.clone(),
            fields,
            actions,
            stage: state.stage.clone(),
            is_valid: state.errors.is_valid(),
            is_dirty: state.values.is_any_dirty(),
        }
    }

    pub fn stats(&self) -> RuntimeStats {
        let state = self.inner.state.read();
        let uptime = (Utc::now() - state.initialized_at)
            .to_std()
            .unwrap_or_default();
        RuntimeStats {
            field_count: self.inner.schema.fields.len(),
            visible_fields: if state.conditions.fields().is_empty() {
                self.inner.schema.fields.iter().filter(|f| !f.hidden).count()
            } else {
                state.conditions.visible_count()
            },
            touched_fields: state.touched.count(),
            dirty_fields: state.values.dirty_fields().len(),
            fields_with_errors: state.errors.field_count(),
            error_count: state.errors.error_count(),
            is_valid: state.errors.is_valid(),
            pending_validations: self.inner.validation_timers.pending_count()
                + self.inner.orchestrator.in_flight_count(),
            checkpoints: self.inner.history.lock().len(),
            initialized_at: state.initialized_at,
            last_activity: state.last_activity,
            uptime,
            events: self
                .inner
                .dispatcher
                .is_tracking()
                .then(|| self.inner.dispatcher.stats()),
        }
    }

    // ---------------------------------------------------------------------
    // Snapshots
    // ---------------------------------------------------------------------

    pub fn create_snapshot(&self) -> StateSnapshot {
        self.inner.state.read().snapshot()
    }

    /// Replace values, initial values, touched state, errors and stage
    ///
    /// Fields the snapshot does not mention get their defaults. A snapshot
    /// naming an undeclared field is rejected without changing anything.
    pub fn restore_snapshot(&self, snapshot: &StateSnapshot) -> Result<()> {
        let schema = &self.inner.schema;
        let mut normalized = snapshot.clone();
        normalized.values = complete_values(schema, snapshot.values.clone())?;
        normalized.initial = complete_values(schema, snapshot.initial.clone())?;
        let unknown = normalized
            .touched
            .iter()
            .chain(normalized.errors.keys())
            .find(|name| !schema.has_field(name));
        if let Some(name) = unknown {
            return Err(Error::UnknownField(name.clone()));
        }

        self.inner.cancel_pending();
        let mut state = self.inner.state.write();
        state.restore(&normalized);
        state.discard_all_async_through(self.inner.orchestrator.latest_generation());
        self.inner.refresh_conditions(&mut state);
        Ok(())
    }

    /// Push the current state onto the undo history
    ///
    /// Returns false when `max_state_snapshots` is 0.
    pub fn checkpoint(&self) -> bool {
        let snapshot = self.create_snapshot();
        self.inner.history.lock().push(snapshot)
    }

    /// Restore the most recent checkpoint; returns false if there is none
    pub fn undo(&self) -> Result<bool> {
        let snapshot = self.inner.history.lock().pop();
        match snapshot {
            Some(snapshot) => self.restore_snapshot(&snapshot).map(|_| true),
            None => Ok(false),
        }
    }

    pub fn history_len(&self) -> usize {
        self.inner.history.lock().len()
    }

    // ---------------------------------------------------------------------
    // Conditionals
    // ---------------------------------------------------------------------

    fn evaluate_with<T>(
        &self,
        name: &str,
        eval: impl FnOnce(&dyn ConditionalEngine, &Schema, &Field, &ValueMap) -> formflow_core::Result<T>,
    ) -> Result<T> {
        let field = self.inner.field(name)?;
        let state = self.inner.state.read();
        eval(&*self.inner.engine, &self.inner.schema, field, state.values.values()).map_err(
            |source| Error::ConditionalEvaluation {
                field: name.to_string(),
                source,
            },
        )
    }

    pub fn evaluate_field_visibility(&self, name: &str) -> Result<bool> {
        self.evaluate_with(name, |e, s, f, d| e.evaluate_field_visibility(s, f, d))
    }

    pub fn evaluate_field_required(&self, name: &str) -> Result<bool> {
        self.evaluate_with(name, |e, s, f, d| e.evaluate_field_required(s, f, d))
    }

    pub fn evaluate_field_editable(&self, name: &str) -> Result<bool> {
        self.evaluate_with(name, |e, s, f, d| e.evaluate_field_editable(s, f, d))
    }

    /// Whether an action can currently be triggered
    pub fn evaluate_action_conditions(&self, id: &str) -> Result<bool> {
        let action = self.inner.action(id)?;
        let state = self.inner.state.read();
        self.inner
            .engine
            .evaluate_action_conditions(&self.inner.schema, action, state.values.values())
            .map_err(|source| Error::ConditionalEvaluation {
                field: id.to_string(),
                source,
            })
    }

    /// Re-evaluate every field and return what changed since the last
    /// evaluation
    pub fn evaluate_all_conditions(&self) -> ConditionalEvaluationResult {
        let mut state = self.inner.state.write();
        self.inner.evaluate_fields(&mut state)
    }

    /// Re-evaluate layout section visibility
    pub fn evaluate_layout_conditions(&self) -> ConditionalEvaluationResult<bool> {
        let inner = &self.inner;
        let mut state = inner.state.write();
        let FormState {
            values, conditions, ..
        } = &mut *state;
        conditions.evaluate_layout(&*inner.engine, &inner.schema, values.values())
    }

    /// Re-evaluate which transitions out of the current stage are available
    pub fn evaluate_workflow_conditions(&self) -> ConditionalEvaluationResult<bool> {
        let inner = &self.inner;
        let mut state = inner.state.write();
        let FormState {
            values,
            conditions,
            stage,
            ..
        } = &mut *state;
        conditions.evaluate_workflow(&*inner.engine, &inner.schema, stage.as_deref(), values.values())
    }

    // ---------------------------------------------------------------------
    // Validation
    // ---------------------------------------------------------------------

    /// Validate one field now and store the result
    pub fn validate_field(&self, name: &str) -> Result<Vec<String>> {
        let field = self.inner.field(name)?;
        let mut state = self.inner.state.write();
        Ok(self.inner.validate_one(&mut state, field))
    }

    /// Validate every field now and replace all stored errors
    pub fn validate_all_fields(&self) -> IndexMap<String, Vec<String>> {
        let mut state = self.inner.state.write();
        self.inner.validate_all(&mut state)
    }

    /// Reasons the action cannot be triggered; empty means it can
    pub fn validate_action(&self, id: &str) -> Result<Vec<String>> {
        let action = self.inner.action(id)?;
        let state = self.inner.state.read();
        let ctx = self.inner.context(&state);
        Ok(self.inner.validator.validate_action(action, &ctx))
    }

    /// Trigger an action by id
    ///
    /// Submit actions submit, reset actions reset, and any other action
    /// advances the workflow when a transition for it leaves the current
    /// stage.
    pub fn trigger_action(&self, id: &str) -> Result<()> {
        let reasons = self.validate_action(id)?;
        if !reasons.is_empty() {
            return Err(Error::ActionUnavailable {
                id: id.to_string(),
                reasons,
            });
        }
        match self.inner.action(id)?.action_type {
            ActionType::Submit => self.submit().map(|_| ()),
            ActionType::Reset => {
                self.reset();
                Ok(())
            }
            ActionType::Button => {
                let has_transition = match (&self.inner.schema.workflow, self.current_stage()) {
                    (Some(workflow), Some(stage)) => {
                        workflow.transitions_from(&stage).any(|t| t.action == id)
                    }
                    _ => false,
                };
                if has_transition {
                    self.advance_workflow(id)?;
                }
                Ok(())
            }
        }
    }

    /// Validate the fields of the current workflow stage and store the result
    pub fn validate_workflow(&self) -> IndexMap<String, Vec<String>> {
        let inner = &self.inner;
        let mut state = inner.state.write();
        let (Some(workflow), Some(stage)) = (&inner.schema.workflow, state.stage.clone()) else {
            return IndexMap::new();
        };
        let results = {
            let ctx = inner.context(&state);
            inner.validator.validate_workflow(workflow, &stage, &ctx)
        };
        if let Some(stage) = workflow.stage(&stage) {
            for field in inner.schema.fields.iter().filter(|f| stage.allows(&f.name)) {
                let errors = results.get(&field.name).cloned().unwrap_or_default();
                state.errors.set_errors(&field.name, errors);
            }
        }
        results
    }

    /// Move to the next stage via `action`
    ///
    /// Fails if no transition for `action` leaves the current stage, its
    /// condition does not hold, or the current stage's fields are invalid.
    /// Returns the new stage.
    pub fn advance_workflow(&self, action: &str) -> Result<String> {
        let inner = &self.inner;
        let Some(workflow) = &inner.schema.workflow else {
            return Err(Error::WorkflowTransition {
                stage: String::new(),
                action: action.to_string(),
            });
        };
        let stage = self.current_stage().unwrap_or_default();
        let rejected = || Error::WorkflowTransition {
            stage: stage.clone(),
            action: action.to_string(),
        };

        let transition = {
            let state = inner.state.read();
            let data = state.values.values();
            let found = workflow
                .transitions_from(&stage)
                .filter(|t| t.action == action)
                .find(|t| {
                    inner
                        .engine
                        .evaluate_transition(&inner.schema, t, data)
                        .unwrap_or(false)
                })
                .cloned();
            found
        };
        let transition = transition.ok_or_else(rejected)?;

        let errors = self.validate_workflow();
        if !errors.is_empty() {
            return Err(Error::ValidationFailed { errors });
        }

        let mut state = inner.state.write();
        if state.stage.as_deref() != Some(stage.as_str()) {
            return Err(rejected());
        }
        state.stage = Some(transition.to.clone());
        state.mark_activity();
        inner.refresh_conditions(&mut state);
        debug!(form = %inner.schema.name, from = %stage, to = %transition.to, action, "workflow advanced");
        Ok(transition.to)
    }

    pub fn validate_business_rules(&self) -> Vec<RuleViolation> {
        let state = self.inner.state.read();
        let ctx = self.inner.context(&state);
        self.inner
            .validator
            .validate_business_rules(&self.inner.schema.business_rules, &ctx)
    }

    /// Run `check` for a field in the background
    ///
    /// The check receives the field, its current value and all values. A
    /// newer call for the same field supersedes this one. When the check
    /// completes and is still the newest for its field, its messages
    /// replace the field's stored errors; `callback` is invoked exactly
    /// once either way. Returns the validation's generation.
    pub fn validate_field_async(
        &self,
        name: &str,
        check: AsyncCheck,
        callback: AsyncCallback,
    ) -> Result<u64> {
        let handle = Handle::try_current().map_err(|_| Error::NoAsyncRuntime)?;
        let field = self.inner.field(name)?.clone();
        let (value, data) = {
            let state = self.inner.state.read();
            let values = state.values.values();
            (values.get(name).cloned().unwrap_or_default(), values.clone())
        };
        let future = check(field, value, data);

        let weak = self.downgrade();
        let apply: AsyncCallback = Box::new(move |outcome: AsyncValidationOutcome| {
            if let (Ok(errors), Some(inner)) = (&outcome.result, weak.upgrade()) {
                FormRuntime { inner }.apply_async_result(&outcome.field, outcome.generation, errors.clone());
            }
            callback(outcome);
        });
        Ok(self.inner.orchestrator.start(&handle, name, future, apply))
    }

    fn apply_async_result(&self, name: &str, generation: u64, errors: Vec<String>) {
        let mut state = self.inner.state.write();
        if !state.accept_async(name, generation) {
            debug!(field = name, generation, "stale async result discarded");
            return;
        }
        state.errors.set_errors(name, errors);
    }

    pub fn cancel_async_validation(&self, name: &str) -> bool {
        self.inner.orchestrator.cancel(name)
    }

    pub fn pending_async_validations(&self) -> usize {
        self.inner.orchestrator.in_flight_count()
    }

    // ---------------------------------------------------------------------
    // Events
    // ---------------------------------------------------------------------

    pub fn on<F>(&self, event_type: EventType, callback: F) -> HandlerId
    where
        F: Fn(&FormEvent) -> std::result::Result<(), HandlerError> + Send + Sync + 'static,
    {
        self.inner.dispatcher.on(event_type, callback)
    }

    pub fn off(&self, id: HandlerId) -> bool {
        self.inner.dispatcher.unregister(id)
    }

    /// Dispatch a driver-supplied event now
    pub fn emit(&self, event: FormEvent) -> Result<DispatchReport> {
        self.inner.dispatcher.emit(&event)
    }

    /// Dispatch a driver-supplied event through the debounced dispatcher
    pub fn emit_debounced(&self, event: FormEvent) -> Result<Option<DispatchReport>> {
        self.inner.debounced.emit(event)
    }

    /// Switch event delivery on or off; a disabled runtime still updates state
    pub fn set_events_enabled(&self, enabled: bool) {
        self.inner.dispatcher.set_enabled(enabled);
    }

    pub fn events_enabled(&self) -> bool {
        self.inner.dispatcher.is_enabled()
    }

    pub fn event_stats(&self) -> EventStats {
        self.inner.dispatcher.stats()
    }

    pub fn event_history(&self) -> Vec<FormEvent> {
        self.inner.dispatcher.history()
    }

    pub fn dispatcher(&self) -> &Arc<EventDispatcher> {
        &self.inner.dispatcher
    }
}

fn field_conditions(state: &FormState, field: &Field) -> FieldConditionalResult {
    state
        .conditions
        .field(&field.name)
        .cloned()
        .unwrap_or_else(|| FieldConditionalResult {
            field_name: field.name.clone(),
            visible: !field.hidden,
            editable: !field.disabled,
            required: field.required,
            reason: None,
        })
}

fn build_field_view(state: &FormState, field: &Field) -> FieldView {
    let conditions = field_conditions(state, field);
    let errors = state.errors.get_errors(&field.name).to_vec();
    let touched = state.touched.is_touched(&field.name);
    FieldView {
        name: field.name.clone(),
        label: field.label().to_string(),
        field_type: field.field_type,
        value: state.values.get(&field.name).cloned().unwrap_or_default(),
        visible: conditions.visible,
        editable: conditions.editable,
        required: conditions.required,
        touched,
        dirty: state.values.is_dirty(&field.name),
        show_errors: touched && !errors.is_empty(),
        errors,
    }
}

impl StateManager for FormRuntime {
    fn create_snapshot(&self) -> StateSnapshot {
        FormRuntime::create_snapshot(self)
    }

    fn restore_snapshot(&self, snapshot: &StateSnapshot) -> Result<()> {
        FormRuntime::restore_snapshot(self, snapshot)
    }

    fn reset(&self) {
        FormRuntime::reset(self)
    }
}

impl fmt::Debug for FormRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FormRuntime")
            .field("form", &self.inner.schema.name)
            .field("fields", &self.inner.schema.fields.len())
            .field("orchestrator", &self.inner.orchestrator)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use formflow_core::{Conditional, Expr, FieldType, FieldValidation, Stage, Transition, Workflow};
    use futures::FutureExt;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn schema() -> Schema {
        Schema::new("signup")
            .with_field(
                Field::new("name", FieldType::Text)
                    .with_label("Name")
                    .required()
                    .with_validation(FieldValidation::length(Some(2), None)),
            )
            .with_field(Field::new("newsletter", FieldType::Boolean).with_default(false))
            .with_field(
                Field::new("email", FieldType::Email)
                    .with_label("Email")
                    .with_conditional(Conditional {
                        show: Some(Expr::field_eq("newsletter", true)),
                        required: Some(Expr::field_eq("newsletter", true)),
                        ..Conditional::default()
                    }),
            )
            .with_action(Action::new("send", ActionType::Submit).with_text("Send"))
    }

    fn runtime(config: RuntimeConfig) -> FormRuntime {
        FormRuntime::builder(schema())
            .with_config(config)
            .build()
            .unwrap()
    }

    #[test]
    fn test_initialize_fills_every_field() {
        let rt = runtime(RuntimeConfig::default());
        let values = rt.get_all();
        assert_eq!(values.len(), 3);
        assert_eq!(values["newsletter"], Value::Bool(false));
        assert_eq!(values["name"], Value::Null);
        assert!(!rt.is_any_dirty());
        assert!(rt.is_valid());
    }

    #[test]
    fn test_initialize_rejects_unknown_initial_data() {
        let mut data = ValueMap::new();
        data.insert("nickname".into(), Value::from("ada"));
        let result = FormRuntime::initialize(schema(), data);
        assert!(matches!(result, Err(Error::UnknownField(name)) if name == "nickname"));
    }

    #[test]
    fn test_initialize_rejects_duplicate_fields() {
        let schema = schema().with_field(Field::new("name", FieldType::Text));
        let result = FormRuntime::initialize(schema, ValueMap::new());
        assert!(matches!(result, Err(Error::InvalidSchema(msg)) if msg.contains("duplicate")));
    }

    #[test]
    fn test_set_value_unknown_field_changes_nothing() {
        let rt = runtime(RuntimeConfig::default());
        let before = rt.create_snapshot();
        assert!(matches!(
            rt.set_value("nope", Value::Int(1)),
            Err(Error::UnknownField(_))
        ));
        let after = rt.create_snapshot();
        assert_eq!(before.values, after.values);
        assert_eq!(before.dirty, after.dirty);
    }

    #[test]
    fn test_set_value_reports_condition_changes() {
        let rt = runtime(RuntimeConfig::default());
        assert!(!rt.conditions()["email"].visible);

        let result = rt.set_value("newsletter", Value::Bool(true)).unwrap();
        assert!(result.changed);
        let email = &result.updates["email"];
        assert!(email.visible);
        assert!(email.required);

        let again = rt.evaluate_all_conditions();
        assert!(!again.changed);
        assert!(again.updates.is_empty());
    }

    #[test]
    fn test_blur_validates_on_blur_timing() {
        let rt = runtime(RuntimeConfig::default());
        rt.set_value("name", Value::from("A")).unwrap();
        assert!(rt.get_errors("name").is_empty());

        rt.blur("name").unwrap();
        assert!(rt.is_touched("name"));
        assert_eq!(
            rt.get_errors("name"),
            vec!["Name must be at least 2 characters".to_string()]
        );
    }

    #[test]
    fn test_on_change_without_tokio_validates_immediately() {
        let rt = runtime(RuntimeConfig::default().with_validation_timing(ValidationTiming::OnChange));
        rt.set_value("name", Value::from("A")).unwrap();
        assert_eq!(rt.get_errors("name").len(), 1);
        rt.set_value("name", Value::from("Ada")).unwrap();
        assert!(rt.get_errors("name").is_empty());
    }

    #[test]
    fn test_submit_collects_errors_and_does_not_emit() {
        let submits = Arc::new(AtomicUsize::new(0));
        let s = Arc::clone(&submits);
        let rt = FormRuntime::builder(schema())
            .with_event_handler(EventType::Submit, move |_| {
                s.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .build()
            .unwrap();

        rt.set_value("newsletter", Value::Bool(true)).unwrap();
        let err = rt.submit().unwrap_err();
        let errors = err.validation_errors().unwrap();
        assert_eq!(errors["name"], vec!["Name is required".to_string()]);
        assert_eq!(errors["email"], vec!["Email is required".to_string()]);
        assert_eq!(submits.load(Ordering::SeqCst), 0);
        assert!(rt.touched_fields().is_empty());

        rt.set_value("name", Value::from("Ada")).unwrap();
        rt.set_value("email", Value::from("ada@example.com")).unwrap();
        let data = rt.submit().unwrap();
        assert_eq!(data["name"], Value::from("Ada"));
        assert_eq!(submits.load(Ordering::SeqCst), 1);
        assert!(rt.is_valid());
    }

    #[test]
    fn test_submit_without_validation() {
        let rt = runtime(RuntimeConfig::default().without_validation());
        assert!(rt.submit().is_ok());
    }

    #[test]
    fn test_reset_field() {
        let rt = runtime(RuntimeConfig::default());
        rt.set_value("name", Value::from("A")).unwrap();
        rt.blur("name").unwrap();
        rt.reset_field("name").unwrap();
        assert!(!rt.is_dirty("name"));
        assert!(rt.get_errors("name").is_empty());
    }

    #[test]
    fn test_reset_field_keeps_touched() {
        let rt = runtime(RuntimeConfig::default());
        rt.set_value("name", Value::from("Ada")).unwrap();
        rt.touch("name").unwrap();
        rt.reset_field("name").unwrap();
        assert_eq!(rt.get_value("name"), Some(Value::Null));
        assert!(rt.is_touched("name"));

        rt.reset();
        assert!(!rt.is_touched("name"));
    }

    #[tokio::test]
    async fn test_late_async_result_after_reset_is_discarded() {
        let rt = runtime(RuntimeConfig::default());
        let check: AsyncCheck = Arc::new(|_: Field, _: Value, _: ValueMap| {
            futures::future::pending::<Vec<String>>().boxed()
        });
        let generation = rt
            .validate_field_async("email", check, Box::new(|_| {}))
            .unwrap();
        rt.reset();

        // a task that finished its check just before the reset
        rt.apply_async_result("email", generation, vec!["already registered".into()]);
        assert!(rt.get_errors("email").is_empty());

        rt.apply_async_result("email", generation + 1, vec!["already registered".into()]);
        assert_eq!(rt.get_errors("email"), vec!["already registered".to_string()]);
    }

    #[test]
    fn test_set_and_clear_errors() {
        let rt = runtime(RuntimeConfig::default());
        rt.set_errors("email", vec!["already registered".into()]).unwrap();
        assert!(!rt.is_valid());
        rt.clear_errors("email").unwrap();
        assert!(rt.is_valid());
        assert!(rt.set_errors("nope", vec![]).is_err());
    }

    #[test]
    fn test_checkpoint_and_undo() {
        let rt = runtime(RuntimeConfig::default().with_max_state_snapshots(2));
        rt.set_value("name", Value::from("Ada")).unwrap();
        assert!(rt.checkpoint());
        rt.set_value("name", Value::from("Grace")).unwrap();

        assert!(rt.undo().unwrap());
        assert_eq!(rt.get_value("name"), Some(Value::from("Ada")));
        assert!(!rt.undo().unwrap());

        let disabled = runtime(RuntimeConfig::default().with_max_state_snapshots(0));
        assert!(!disabled.checkpoint());
    }

    #[test]
    fn test_restore_rejects_unknown_fields() {
        let rt = runtime(RuntimeConfig::default());
        let mut snapshot = rt.create_snapshot();
        snapshot.values.insert("ghost".into(), Value::Null);
        assert!(matches!(
            rt.restore_snapshot(&snapshot),
            Err(Error::UnknownField(name)) if name == "ghost"
        ));
    }

    #[test]
    fn test_field_and_form_views() {
        let rt = runtime(RuntimeConfig::default());
        rt.set_value("name", Value::from("A")).unwrap();
        rt.blur("name").unwrap();

        let view = rt.field_view("name").unwrap();
        assert_eq!(view.label, "Name");
        assert!(view.required);
        assert!(view.show_errors);

        let form = rt.form_view();
        assert!(form.field("email").is_none());
        assert_eq!(form.fields.len(), 2);
        assert_eq!(form.actions[0].text, "Send");
        assert!(form.actions[0].available);
        assert!(!form.is_valid);
    }

    #[test]
    fn test_trigger_action() {
        let rt = runtime(RuntimeConfig::default());
        assert!(matches!(rt.trigger_action("send"), Err(Error::ValidationFailed { .. })));
        assert!(matches!(rt.trigger_action("nope"), Err(Error::UnknownAction(_))));
    }

    #[test]
    fn test_workflow_advances_when_stage_is_valid() {
        let schema = schema()
            .with_action(Action::new("next", ActionType::Button))
            .with_workflow(Workflow {
                initial_stage: "account".into(),
                stages: vec![
                    Stage::new("account", vec!["name".into()]),
                    Stage::new("preferences", vec!["newsletter".into(), "email".into()]),
                ],
                transitions: vec![Transition::new("account", "preferences", "next")],
            });
        let rt = FormRuntime::initialize(schema, ValueMap::new()).unwrap();
        assert_eq!(rt.current_stage().as_deref(), Some("account"));
        assert!(!rt.conditions()["newsletter"].editable);

        assert!(matches!(rt.advance_workflow("next"), Err(Error::ValidationFailed { .. })));
        assert!(matches!(rt.advance_workflow("back"), Err(Error::WorkflowTransition { .. })));

        rt.set_value("name", Value::from("Ada")).unwrap();
        rt.trigger_action("next").unwrap();
        assert_eq!(rt.current_stage().as_deref(), Some("preferences"));
        assert!(rt.conditions()["newsletter"].editable);
        assert!(!rt.conditions()["name"].editable);

        rt.reset();
        assert_eq!(rt.current_stage().as_deref(), Some("account"));
    }

    #[test]
    fn test_stats() {
        let rt = runtime(RuntimeConfig::default().with_event_tracking(10));
        rt.set_value("name", Value::from("A")).unwrap();
        rt.blur("name").unwrap();
        let stats = rt.stats();
        assert_eq!(stats.field_count, 3);
        assert_eq!(stats.visible_fields, 2);
        assert_eq!(stats.touched_fields, 1);
        assert_eq!(stats.dirty_fields, 1);
        assert_eq!(stats.fields_with_errors, 1);
        assert!(!stats.is_valid);
        let events = stats.events.unwrap();
        // init, change, blur
        assert_eq!(events.total_events, 3);
    }

    #[test]
    fn test_reinitialize_clears_everything() {
        let rt = runtime(RuntimeConfig::default().with_event_tracking(10));
        rt.set_value("name", Value::from("A")).unwrap();
        rt.blur("name").unwrap();
        rt.checkpoint();

        let mut data = ValueMap::new();
        data.insert("name".into(), Value::from("Grace"));
        rt.reinitialize(data).unwrap();

        assert_eq!(rt.get_value("name"), Some(Value::from("Grace")));
        assert!(!rt.is_any_dirty());
        assert!(rt.touched_fields().is_empty());
        assert!(rt.is_valid());
        assert_eq!(rt.history_len(), 0);
        assert_eq!(rt.event_stats().total_events, 1);
    }

    #[test]
    fn test_async_validation_needs_runtime() {
        let rt = runtime(RuntimeConfig::default());
        let check: AsyncCheck = Arc::new(|_: Field, _: Value, _: ValueMap| async { Vec::<String>::new() }.boxed());
        let result = rt.validate_field_async("name", check, Box::new(|_: AsyncValidationOutcome| {}));
        assert!(matches!(result, Err(Error::NoAsyncRuntime)));
    }
}
