//! Debounced validation and async validation through `FormRuntime`
//!
//! All tests run on tokio's paused clock, so sleeps complete instantly and
//! timers fire in a deterministic order.

mod common;

use common::{init_tracing, order_schema, order_values};
use formflow_core::{
    Action, BusinessRule, Field, FieldType, RuleViolation, Schema, Value, ValueMap, Workflow,
};
use formflow_runtime::{
    AsyncCallback, AsyncCheck, AsyncValidationOutcome, FormEvent, FormRuntime, RuleValidator,
    RuntimeConfig, ValidationContext, ValidationTiming, Validator,
};
use futures::FutureExt;
use indexmap::IndexMap;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// Records every value it is asked to validate
#[derive(Default)]
struct CountingValidator {
    rules: RuleValidator,
    seen: Mutex<Vec<(String, Value)>>,
}

impl CountingValidator {
    fn seen(&self) -> Vec<(String, Value)> {
        self.seen.lock().clone()
    }
}

impl Validator for CountingValidator {
    fn validate_field(&self, field: &Field, value: &Value, ctx: &ValidationContext) -> Vec<String> {
        self.seen.lock().push((field.name.clone(), value.clone()));
        self.rules.validate_field(field, value, ctx)
    }

    fn validate_action(&self, action: &Action, ctx: &ValidationContext) -> Vec<String> {
        self.rules.validate_action(action, ctx)
    }

    fn validate_workflow(
        &self,
        workflow: &Workflow,
        stage: &str,
        ctx: &ValidationContext,
    ) -> IndexMap<String, Vec<String>> {
        self.rules.validate_workflow(workflow, stage, ctx)
    }

    fn validate_business_rules(
        &self,
        rules: &[BusinessRule],
        ctx: &ValidationContext,
    ) -> Vec<RuleViolation> {
        self.rules.validate_business_rules(rules, ctx)
    }
}

fn on_change_runtime(validator: &Arc<CountingValidator>) -> FormRuntime {
    FormRuntime::builder(order_schema())
        .with_config(RuntimeConfig::default().with_validation_timing(ValidationTiming::OnChange))
        .with_initial_data(order_values())
        .with_validator(Arc::clone(validator) as Arc<dyn Validator>)
        .build()
        .unwrap()
}

fn ms(n: u64) -> Duration {
    Duration::from_millis(n)
}

#[tokio::test(start_paused = true)]
async fn test_rapid_changes_validate_once_with_latest_value() {
    init_tracing();
    let validator = Arc::new(CountingValidator::default());
    let rt = on_change_runtime(&validator);

    for qty in [0, 5, 7] {
        rt.set_value("quantity", Value::Int(qty)).unwrap();
        tokio::time::sleep(ms(50)).await;
    }
    // last change at t=100, window is 300ms
    tokio::time::sleep(ms(200)).await;
    assert!(validator.seen().is_empty());
    assert_eq!(rt.stats().pending_validations, 1);

    tokio::time::sleep(ms(100)).await;
    assert_eq!(validator.seen(), vec![("quantity".to_string(), Value::Int(7))]);
    assert!(rt.is_valid());
}

#[tokio::test(start_paused = true)]
async fn test_fields_debounce_independently() {
    let validator = Arc::new(CountingValidator::default());
    let rt = on_change_runtime(&validator);

    rt.set_value("quantity", Value::Int(0)).unwrap();
    rt.set_value("unit_price", Value::Float(-2.0)).unwrap();
    tokio::time::sleep(ms(350)).await;

    assert_eq!(validator.seen().len(), 2);
    assert_eq!(rt.get_all_errors().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_reset_cancels_pending_validation() {
    let validator = Arc::new(CountingValidator::default());
    let rt = on_change_runtime(&validator);

    rt.set_value("quantity", Value::Int(0)).unwrap();
    rt.reset();
    tokio::time::sleep(ms(500)).await;

    assert!(validator.seen().is_empty());
    assert!(rt.is_valid());
}

#[tokio::test(start_paused = true)]
async fn test_debounce_disabled_validates_immediately() {
    let validator = Arc::new(CountingValidator::default());
    let rt = FormRuntime::builder(order_schema())
        .with_config(
            RuntimeConfig::default()
                .with_validation_timing(ValidationTiming::OnChange)
                .without_debounce(),
        )
        .with_initial_data(order_values())
        .with_validator(Arc::clone(&validator) as Arc<dyn Validator>)
        .build()
        .unwrap();

    rt.set_value("quantity", Value::Int(0)).unwrap();
    assert_eq!(validator.seen().len(), 1);
    assert_eq!(
        rt.get_errors("quantity"),
        vec!["Quantity must be at least 1".to_string()]
    );
}

fn username_schema() -> Schema {
    Schema::new("signup").with_field(Field::new("username", FieldType::Text).with_label("Username"))
}

/// Pretends to ask a server whether the name is free
fn availability_check(latency: Duration) -> AsyncCheck {
    Arc::new(move |field: Field, value: Value, _all: ValueMap| {
        async move {
            tokio::time::sleep(latency).await;
            if value == Value::from("admin") {
                vec![format!("{} is already taken", field.label())]
            } else {
                Vec::new()
            }
        }
        .boxed()
    })
}

type Outcomes = Arc<Mutex<Vec<(u64, Result<Vec<String>, String>)>>>;

fn record(outcomes: &Outcomes) -> AsyncCallback {
    let outcomes = Arc::clone(outcomes);
    Box::new(move |outcome: AsyncValidationOutcome| {
        outcomes
            .lock()
            .push((outcome.generation, outcome.result.map_err(|e| e.to_string())));
    })
}

#[tokio::test(start_paused = true)]
async fn test_newest_async_result_wins() {
    let rt = FormRuntime::initialize(username_schema(), ValueMap::new()).unwrap();
    let outcomes: Outcomes = Arc::default();
    let check = availability_check(ms(100));

    rt.set_value("username", Value::from("ada")).unwrap();
    let first = rt
        .validate_field_async("username", Arc::clone(&check), record(&outcomes))
        .unwrap();
    rt.set_value("username", Value::from("admin")).unwrap();
    let second = rt
        .validate_field_async("username", check, record(&outcomes))
        .unwrap();
    assert!(second > first);

    tokio::time::sleep(ms(150)).await;
    let outcomes = outcomes.lock().clone();
    assert_eq!(outcomes.len(), 2);
    assert_eq!(
        outcomes[0],
        (first, Err("async validation for 'username' was superseded".to_string()))
    );
    assert_eq!(
        outcomes[1],
        (second, Ok(vec!["Username is already taken".to_string()]))
    );
    assert_eq!(
        rt.get_errors("username"),
        vec!["Username is already taken".to_string()]
    );
    assert_eq!(rt.pending_async_validations(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_restore_cancels_async_validation() {
    let rt = FormRuntime::initialize(username_schema(), ValueMap::new()).unwrap();
    let snapshot = rt.create_snapshot();
    let outcomes: Outcomes = Arc::default();

    rt.set_value("username", Value::from("admin")).unwrap();
    rt.validate_field_async("username", availability_check(ms(100)), record(&outcomes))
        .unwrap();
    rt.restore_snapshot(&snapshot).unwrap();

    tokio::time::sleep(ms(200)).await;
    let outcomes = outcomes.lock();
    assert_eq!(outcomes.len(), 1);
    assert!(matches!(&outcomes[0].1, Err(msg) if msg.contains("cancelled")));
    assert!(rt.is_valid());
    assert_eq!(rt.get_value("username"), Some(Value::Null));
}

#[tokio::test(start_paused = true)]
async fn test_debounced_events_through_runtime() {
    let rt = FormRuntime::builder(order_schema())
        .with_config(RuntimeConfig::default().with_event_tracking(0))
        .with_initial_data(order_values())
        .build()
        .unwrap();

    for code in ["S", "SA", "SAVE"] {
        let event = FormEvent::change("discount_code", Value::from(code), Value::Null);
        assert!(rt.emit_debounced(event).unwrap().is_none());
        tokio::time::sleep(ms(100)).await;
    }
    let report = rt.emit_debounced(FormEvent::reset()).unwrap();
    assert!(report.is_some());

    tokio::time::sleep(ms(400)).await;
    let changes: Vec<_> = rt
        .event_history()
        .into_iter()
        .filter(|e| e.field_name() == Some("discount_code"))
        .filter_map(|e| e.value().cloned())
        .collect();
    assert_eq!(changes, vec![Value::from("SAVE")]);
}

#[tokio::test(start_paused = true)]
async fn test_reset_field_drops_debounced_events_for_that_field() {
    let rt = FormRuntime::builder(order_schema())
        .with_config(RuntimeConfig::default().with_event_tracking(0))
        .with_initial_data(order_values())
        .build()
        .unwrap();

    rt.emit_debounced(FormEvent::change("discount_code", Value::from("SAVE"), Value::Null))
        .unwrap();
    rt.emit_debounced(FormEvent::change("quantity", Value::Int(4), Value::Int(2)))
        .unwrap();
    rt.reset_field("discount_code").unwrap();

    tokio::time::sleep(ms(400)).await;
    let debounced: Vec<_> = rt
        .event_history()
        .into_iter()
        .filter(|e| e.value() == Some(&Value::from("SAVE")) || e.value() == Some(&Value::Int(4)))
        .filter_map(|e| e.field_name().map(String::from))
        .collect();
    assert_eq!(debounced, vec!["quantity"]);
}
