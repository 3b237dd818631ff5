//! Value store: current values, initial values and the dirty set
//!
//! Every declared field always has an entry. Dirtiness is recomputed
//! eagerly on every write, so `is_dirty(name)` is always
//! `values[name] != initial[name]`.

use crate::{Error, Result};
use formflow_core::{Value, ValueMap};
use std::collections::HashSet;

#[derive(Debug, Clone, Default)]
pub struct ValueStore {
    values: ValueMap,
    initial: ValueMap,
    dirty: HashSet<String>,
}

impl ValueStore {
    /// Create a store where current and initial values are both `initial`
    pub fn new(initial: ValueMap) -> Self {
        Self {
            values: initial.clone(),
            initial,
            dirty: HashSet::new(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// Set a value and return the previous one
    pub fn set(&mut self, name: &str, value: Value) -> Result<Value> {
        let slot = self
            .values
            .get_mut(name)
            .ok_or_else(|| Error::UnknownField(name.to_string()))?;
        let old = std::mem::replace(slot, value);
        self.recompute_dirty(name);
        Ok(old)
    }

    /// Set several values; nothing is written if any name is unknown
    pub fn update(&mut self, values: ValueMap) -> Result<Vec<(String, Value, Value)>> {
        if let Some(name) = values.keys().find(|k| !self.values.contains_key(*k)) {
            return Err(Error::UnknownField(name.clone()));
        }
        let mut changes = Vec::with_capacity(values.len());
        for (name, value) in values {
            let old = self.set(&name, value.clone())?;
            changes.push((name, value, old));
        }
        Ok(changes)
    }

    /// Replace the baseline a field is compared against
    pub fn set_initial(&mut self, name: &str, value: Value) -> Result<()> {
        let slot = self
            .initial
            .get_mut(name)
            .ok_or_else(|| Error::UnknownField(name.to_string()))?;
        *slot = value;
        self.recompute_dirty(name);
        Ok(())
    }

    /// Borrow the current values
    pub fn values(&self) -> &ValueMap {
        &self.values
    }

    /// Owned copy of the current values
    pub fn get_all(&self) -> ValueMap {
        self.values.clone()
    }

    pub fn initial(&self) -> &ValueMap {
        &self.initial
    }

    pub fn initial_values(&self) -> ValueMap {
        self.initial.clone()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn is_dirty(&self, name: &str) -> bool {
        self.dirty.contains(name)
    }

    pub fn is_any_dirty(&self) -> bool {
        !self.dirty.is_empty()
    }

    /// Dirty field names in declaration order
    pub fn dirty_fields(&self) -> Vec<String> {
        self.values
            .keys()
            .filter(|k| self.dirty.contains(*k))
            .cloned()
            .collect()
    }

    /// Values of dirty fields only
    pub fn changed_values(&self) -> ValueMap {
        self.values
            .iter()
            .filter(|(k, _)| self.dirty.contains(*k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Restore every value to its initial value
    ///
    /// Touched state and errors live elsewhere and are not affected.
    pub fn reset(&mut self) {
        self.values = self.initial.clone();
        self.dirty.clear();
    }

    pub fn reset_field(&mut self, name: &str) -> Result<()> {
        let initial = self
            .initial
            .get(name)
            .cloned()
            .ok_or_else(|| Error::UnknownField(name.to_string()))?;
        self.set(name, initial).map(|_| ())
    }

    /// Replace both maps wholesale and recompute the dirty set
    pub fn restore(&mut self, values: ValueMap, initial: ValueMap) {
        self.values = values;
        self.initial = initial;
        self.dirty = self
            .values
            .iter()
            .filter(|(k, v)| self.initial.get(*k) != Some(*v))
            .map(|(k, _)| k.clone())
            .collect();
    }

    fn recompute_dirty(&mut self, name: &str) {
        if self.values.get(name) == self.initial.get(name) {
            self.dirty.remove(name);
        } else {
            self.dirty.insert(name.to_string());
        }
    }
}
