//! Shared fixtures for runtime integration tests

#![allow(dead_code)]

use formflow_core::{
    Action, ActionType, Conditional, Expr, Field, FieldType, FieldValidation, Schema, Value,
    ValueMap,
};
use tracing_subscriber::EnvFilter;

/// Route runtime logs to the test output; `RUST_LOG=formflow_runtime=debug`
/// shows them
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn values(pairs: &[(&str, Value)]) -> ValueMap {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

/// Line item with a discount code that only matters for large orders
pub fn order_schema() -> Schema {
    Schema::new("order")
        .with_field(
            Field::new("quantity", FieldType::Integer)
                .with_label("Quantity")
                .required()
                .with_validation(FieldValidation {
                    min: Some(1.0),
                    integer: true,
                    ..FieldValidation::default()
                }),
        )
        .with_field(
            Field::new("unit_price", FieldType::Number)
                .with_label("Unit price")
                .with_validation(FieldValidation {
                    positive: true,
                    ..FieldValidation::default()
                }),
        )
        .with_field(
            Field::new("discount_code", FieldType::Text)
                .with_label("Discount code")
                .with_conditional(Conditional::show_when(Expr::Ge(
                    Box::new(Expr::field("quantity")),
                    Box::new(Expr::lit(10)),
                )))
                .with_validation(FieldValidation::length(Some(4), Some(12))),
        )
        .with_action(Action::new("place", ActionType::Submit).with_text("Place order"))
        .with_action(Action::new("clear", ActionType::Reset).with_text("Clear"))
}

pub fn order_values() -> ValueMap {
    values(&[
        ("quantity", Value::Int(1)),
        ("unit_price", Value::Float(10.0)),
    ])
}
