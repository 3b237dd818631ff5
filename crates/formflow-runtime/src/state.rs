//! Form state, snapshots and statistics
//!
//! [`FormState`] is everything a runtime mutates; it lives behind a single
//! lock in [`FormRuntime`](crate::FormRuntime). [`StateSnapshot`] is an
//! immutable serializable copy of the user-visible part of it.

use crate::conditional::{ConditionalCache, FieldConditionalResult};
use crate::events::EventStats;
use crate::field_errors::ErrorStore;
use crate::touched::TouchTracker;
use crate::values::ValueStore;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use formflow_core::{Value, ValueMap};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Mutable state of one form
#[derive(Debug, Clone)]
pub(crate) struct FormState {
    pub values: ValueStore,
    pub touched: TouchTracker,
    pub errors: ErrorStore,
    pub conditions: ConditionalCache,
    /// Current workflow stage, if the schema has a workflow
    pub stage: Option<String>,
    /// Highest async generation applied or discarded, per field
    pub applied_generations: HashMap<String, u64>,
    /// Async results at or below this generation are stale for every field
    pub async_floor: u64,
    pub initialized_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

impl FormState {
    pub fn new(initial: ValueMap, stage: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            values: ValueStore::new(initial),
            touched: TouchTracker::new(),
            errors: ErrorStore::new(),
            conditions: ConditionalCache::new(),
            stage,
            applied_generations: HashMap::new(),
            async_floor: 0,
            initialized_at: now,
            last_activity: now,
        }
    }

    /// Record an async result for `name`; false if a newer one was
    /// already applied or the field was reset after it started
    pub fn accept_async(&mut self, name: &str, generation: u64) -> bool {
        let applied = self.applied_generations.entry(name.to_string()).or_insert(0);
        if generation <= self.async_floor || generation <= *applied {
            return false;
        }
        *applied = generation;
        true
    }

    pub fn discard_async_through(&mut self, name: &str, generation: u64) {
        let applied = self.applied_generations.entry(name.to_string()).or_insert(0);
        *applied = (*applied).max(generation);
    }

    pub fn discard_all_async_through(&mut self, generation: u64) {
        self.async_floor = self.async_floor.max(generation);
    }

    pub fn mark_activity(&mut self) {
        self.last_activity = Utc::now();
    }

    pub fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            values: self.values.get_all(),
            initial: self.values.initial_values(),
            touched: self.touched.touched_fields(),
            dirty: self.values.dirty_fields(),
            errors: self.errors.get_all_errors(),
            stage: self.stage.clone(),
            timestamp: Utc::now(),
            initialized_at: self.initialized_at,
        }
    }

    /// Replace values, touched, errors and stage from a snapshot
    ///
    /// The dirty set is recomputed from the restored values rather than
    /// trusted from the snapshot.
    pub fn restore(&mut self, snapshot: &StateSnapshot) {
        self.values
            .restore(snapshot.values.clone(), snapshot.initial.clone());
        self.touched.restore(snapshot.touched.iter().cloned());
        self.errors.restore(snapshot.errors.clone());
        self.stage = snapshot.stage.clone();
        self.mark_activity();
    }
}

/// Immutable copy of a form's state at one moment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub values: ValueMap,
    pub initial: ValueMap,
    /// Touched fields in the order they were first touched
    pub touched: Vec<String>,
    /// Dirty fields in declaration order
    pub dirty: Vec<String>,
    pub errors: IndexMap<String, Vec<String>>,
    #[serde(default)]
    pub stage: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub initialized_at: DateTime<Utc>,
}

impl StateSnapshot {
    pub fn to_ron(&self) -> Result<String> {
        Ok(ron::ser::to_string_pretty(
            self,
            ron::ser::PrettyConfig::default(),
        )?)
    }

    /// Parse a snapshot written by [`to_ron`](Self::to_ron)
    pub fn from_ron(content: &str) -> Result<Self> {
        ron::from_str(content).map_err(|err| Error::Serialization(err.code))
    }
}

/// Everything a driver needs to know about one field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldState {
    pub name: String,
    pub value: Value,
    pub initial: Value,
    pub touched: bool,
    pub dirty: bool,
    pub errors: Vec<String>,
    pub conditions: FieldConditionalResult,
}

/// Counters describing a runtime
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeStats {
    pub field_count: usize,
    pub visible_fields: usize,
    pub touched_fields: usize,
    pub dirty_fields: usize,
    pub fields_with_errors: usize,
    pub error_count: usize,
    pub is_valid: bool,
    pub pending_validations: usize,
    pub checkpoints: usize,
    pub initialized_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub uptime: Duration,
    /// Present when event tracking is enabled
    pub events: Option<EventStats>,
}

/// Snapshot and restore contract for form state holders
pub trait StateManager {
    fn create_snapshot(&self) -> StateSnapshot;

    fn restore_snapshot(&self, snapshot: &StateSnapshot) -> Result<()>;

    fn reset(&self);
}
