//! Touch tracker: fields the user has interacted with

use indexmap::IndexSet;

/// Set of touched fields in first-touch order
///
/// Touching is monotonic; only a full reset or a snapshot restore removes
/// entries.
#[derive(Debug, Clone, Default)]
pub struct TouchTracker {
    touched: IndexSet<String>,
}

impl TouchTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a field touched; returns true if it was not touched before
    pub fn touch(&mut self, name: &str) -> bool {
        if self.touched.contains(name) {
            return false;
        }
        self.touched.insert(name.to_string())
    }

    pub fn is_touched(&self, name: &str) -> bool {
        self.touched.contains(name)
    }

    pub fn touched_fields(&self) -> Vec<String> {
        self.touched.iter().cloned().collect()
    }

    pub fn count(&self) -> usize {
        self.touched.len()
    }

    pub(crate) fn clear(&mut self) {
        self.touched.clear();
    }

    pub(crate) fn restore(&mut self, names: impl IntoIterator<Item = String>) {
        self.touched = names.into_iter().collect();
    }
}
