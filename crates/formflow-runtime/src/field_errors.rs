//! Error store: validation messages per field

use indexmap::IndexMap;

/// Validation messages keyed by field
///
/// An entry exists only while it holds at least one message, so the form
/// is valid exactly when the store is empty.
#[derive(Debug, Clone, Default)]
pub struct ErrorStore {
    errors: IndexMap<String, Vec<String>>,
}

impl ErrorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace a field's messages; an empty list clears the entry
    ///
    /// Returns true when the stored messages changed.
    pub fn set_errors(&mut self, name: &str, errors: Vec<String>) -> bool {
        if errors.is_empty() {
            return self.errors.shift_remove(name).is_some();
        }
        match self.errors.get_mut(name) {
            Some(existing) if *existing == errors => false,
            Some(existing) => {
                *existing = errors;
                true
            }
            None => {
                self.errors.insert(name.to_string(), errors);
                true
            }
        }
    }

    pub fn get_errors(&self, name: &str) -> &[String] {
        self.errors.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn has_errors(&self, name: &str) -> bool {
        self.errors.contains_key(name)
    }

    /// Owned copy of all non-empty entries
    pub fn get_all_errors(&self) -> IndexMap<String, Vec<String>> {
        self.errors.clone()
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Total number of messages across all fields
    pub fn error_count(&self) -> usize {
        self.errors.values().map(Vec::len).sum()
    }

    /// Number of fields with at least one message
    pub fn field_count(&self) -> usize {
        self.errors.len()
    }

    pub fn clear_field(&mut self, name: &str) -> bool {
        self.errors.shift_remove(name).is_some()
    }

    pub(crate) fn clear(&mut self) {
        self.errors.clear();
    }

    pub(crate) fn restore(&mut self, errors: IndexMap<String, Vec<String>>) {
        self.errors = errors.into_iter().filter(|(_, v)| !v.is_empty()).collect();
    }
}
