//! Field values
//!
//! [`Value`] is what a single form field holds. Emptiness ("was anything
//! entered?") and truthiness ("does a condition hold?") are separate
//! questions: `false` and `0` are answers, so they are not empty, but
//! they are falsy.

use chrono::NaiveDate;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Content of one form field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub enum Value {
    /// Nothing entered
    #[default]
    Null,
    /// Checkbox or toggle
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Date(NaiveDate),
    /// Multi-select choices or repeatable items
    List(Vec<Value>),
    /// One record, e.g. an item of a repeatable field
    Map(ValueMap),
}

/// Field name to value, in schema declaration order
pub type ValueMap = IndexMap<String, Value>;

impl Value {
    pub fn is_null(&self) -> bool {
        *self == Self::Null
    }

    /// Whether the field counts as not filled in
    ///
    /// Null, whitespace-only text and empty collections are empty.
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Null => true,
            Self::String(text) => text.trim().is_empty(),
            Self::List(items) => items.is_empty(),
            Self::Map(entries) => entries.is_empty(),
            Self::Bool(_) | Self::Int(_) | Self::Float(_) | Self::Date(_) => false,
        }
    }

    /// Truthiness used by conditions
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Null => false,
            Self::Bool(flag) => *flag,
            Self::Int(n) => *n != 0,
            Self::Float(x) => *x != 0.0,
            Self::String(text) => !text.is_empty(),
            Self::Date(_) => true,
            Self::List(items) => !items.is_empty(),
            Self::Map(entries) => !entries.is_empty(),
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match *self {
            Self::Bool(flag) => Some(flag),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match *self {
            Self::Int(n) => Some(n),
            _ => None,
        }
    }

    /// Numeric view; integers widen to floats
    pub fn as_float(&self) -> Option<f64> {
        match *self {
            Self::Float(x) => Some(x),
            Self::Int(n) => Some(n as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(text) => Some(text.as_str()),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<NaiveDate> {
        match *self {
            Self::Date(day) => Some(day),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Self::List(items) => Some(items.as_slice()),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&ValueMap> {
        match self {
            Self::Map(entries) => Some(entries),
            _ => None,
        }
    }

    /// Length of text (in characters), a list or a record
    pub fn len(&self) -> Option<usize> {
        match self {
            Self::String(text) => Some(text.chars().count()),
            Self::List(items) => Some(items.len()),
            Self::Map(entries) => Some(entries.len()),
            _ => None,
        }
    }

    /// Kind name used in type errors
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::Date(_) => "date",
            Self::List(_) => "list",
            Self::Map(_) => "map",
        }
    }
}

/// Formats the value as a text input would show it: null is blank, text
/// is unquoted and dates are `YYYY-MM-DD`.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => Ok(()),
            Self::Bool(flag) => write!(f, "{flag}"),
            Self::Int(n) => write!(f, "{n}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::String(text) => f.write_str(text),
            Self::Date(day) => write!(f, "{}", day.format("%Y-%m-%d")),
            Self::List(items) => {
                for (index, item) in items.iter().enumerate() {
                    if index > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                Ok(())
            }
            Self::Map(entries) => {
                for (index, (key, item)) in entries.iter().enumerate() {
                    if index > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{key}={item}")?;
                }
                Ok(())
            }
        }
    }
}

macro_rules! value_from {
    ($($source:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$source> for Value {
                fn from(inner: $source) -> Self {
                    Self::$variant(inner.into())
                }
            }
        )*
    };
}

value_from! {
    bool => Bool,
    i32 => Int,
    i64 => Int,
    f64 => Float,
    String => String,
    &str => String,
    NaiveDate => Date,
    ValueMap => Map,
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Self::List(items.into_iter().map(Into::into).collect())
    }
}

/// `None` becomes [`Value::Null`]
impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(maybe: Option<T>) -> Self {
        maybe.map_or(Self::Null, Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_accessors() {
        assert_eq!(Value::from(true).as_bool(), Some(true));
        assert_eq!(Value::from(7).as_int(), Some(7));
        assert_eq!(Value::from(7).as_float(), Some(7.0));
        assert_eq!(Value::from(0.5).as_float(), Some(0.5));
        assert_eq!(Value::from("ada").as_str(), Some("ada"));
        assert_eq!(Value::from(day(2024, 2, 29)).as_date(), Some(day(2024, 2, 29)));
        assert_eq!(Value::from("7").as_int(), None);
        assert!(Value::default().is_null());
    }

    #[test]
    fn test_empty_is_not_falsy() {
        for answer in [Value::Bool(false), Value::Int(0), Value::Float(0.0)] {
            assert!(!answer.is_empty(), "{answer:?} is an answer");
            assert!(!answer.is_truthy(), "{answer:?} should not satisfy a condition");
        }
        assert!(Value::from("  ").is_empty());
        assert!(Value::from("  ").is_truthy());
        assert!(Value::List(vec![]).is_empty());
        assert!(Value::Map(ValueMap::new()).is_empty());
        assert!(Value::Null.is_empty() && !Value::Null.is_truthy());
        assert!(Value::from(day(2000, 1, 1)).is_truthy());
    }

    #[test]
    fn test_display_as_input_text() {
        assert_eq!(Value::Null.to_string(), "");
        assert_eq!(Value::from("Main St").to_string(), "Main St");
        assert_eq!(Value::Float(-1.0).to_string(), "-1");
        assert_eq!(Value::from(day(2024, 3, 5)).to_string(), "2024-03-05");
        assert_eq!(Value::from(vec!["red", "blue"]).to_string(), "red, blue");

        let mut item = ValueMap::new();
        item.insert("sku".into(), Value::from("A1"));
        item.insert("qty".into(), Value::from(2));
        assert_eq!(Value::from(item).to_string(), "sku=A1, qty=2");
    }

    #[test]
    fn test_len_counts_characters() {
        assert_eq!(Value::from("héllo").len(), Some(5));
        assert_eq!(Value::from(vec![1i64, 2]).len(), Some(2));
        assert_eq!(Value::Int(3).len(), None);
    }

    #[test]
    fn test_option_conversion() {
        assert_eq!(Value::from(None::<i64>), Value::Null);
        assert_eq!(Value::from(Some("x")), Value::from("x"));
    }

    #[test]
    fn test_ron_shape() {
        let value: Value = ron::from_str(r#"List([Int(1), String("a"), Null])"#).unwrap();
        assert_eq!(
            value,
            Value::List(vec![Value::Int(1), Value::from("a"), Value::Null])
        );
    }
}
