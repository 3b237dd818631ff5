//! Runtime configuration
//!
//! Controls which runtime features are active, when validation runs and
//! how long events and validations are debounced. Configurations can be
//! built in code or loaded from RON; durations are written in milliseconds.

use crate::events::EventType;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// When field validation runs automatically
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ValidationTiming {
    /// Validate on every value change (debounced when enabled)
    OnChange,
    /// Validate when a field loses focus
    #[default]
    OnBlur,
    /// Validate only on submit
    OnSubmit,
    /// Never validate automatically
    Never,
}

/// Per-event-type debounce windows for the debounced dispatcher
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DebouncedConfig {
    #[serde(with = "duration_ms")]
    pub change: Duration,
    #[serde(with = "duration_ms")]
    pub blur: Duration,
    #[serde(with = "duration_ms")]
    pub focus: Duration,
}

impl DebouncedConfig {
    /// Window for an event type, `None` for types that are never debounced
    pub fn delay_for(&self, event_type: EventType) -> Option<Duration> {
        let delay = match event_type {
            EventType::Change => self.change,
            EventType::Blur => self.blur,
            EventType::Focus => self.focus,
            EventType::Submit | EventType::Reset | EventType::Init => return None,
        };
        (!delay.is_zero()).then_some(delay)
    }
}

impl Default for DebouncedConfig {
    fn default() -> Self {
        Self {
            change: Duration::from_millis(300),
            blur: Duration::from_millis(100),
            focus: Duration::from_millis(50),
        }
    }
}

/// Configuration for a form runtime
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Recompute conditional field state after every change
    pub enable_conditionals: bool,
    /// Run validation according to `validation_timing`
    pub enable_validation: bool,
    /// Keep event history and statistics
    pub enable_event_tracking: bool,
    pub validation_timing: ValidationTiming,
    /// Coalesce change-triggered validation per field
    pub enable_debounce: bool,
    #[serde(with = "duration_ms")]
    pub debounce_delay: Duration,
    /// Checkpoints kept for undo (0 disables checkpoints)
    pub max_state_snapshots: usize,
    /// Events kept in history (0 = unlimited)
    pub max_events: usize,
    pub debounced: DebouncedConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            enable_conditionals: true,
            enable_validation: true,
            enable_event_tracking: false,
            validation_timing: ValidationTiming::OnBlur,
            enable_debounce: true,
            debounce_delay: Duration::from_millis(300),
            max_state_snapshots: 10,
            max_events: 1000,
            debounced: DebouncedConfig::default(),
        }
    }
}

impl RuntimeConfig {
    /// Parse a configuration from RON; missing keys keep their defaults
    ///
    /// ```
    /// use formflow_runtime::{RuntimeConfig, ValidationTiming};
    ///
    /// let config = RuntimeConfig::from_ron("(validation_timing: OnChange, debounce_delay: 150)").unwrap();
    /// assert_eq!(config.validation_timing, ValidationTiming::OnChange);
    /// assert_eq!(config.debounce_delay.as_millis(), 150);
    /// assert!(config.enable_conditionals);
    /// ```
    pub fn from_ron(content: &str) -> Result<Self> {
        Ok(ron::from_str(content)?)
    }

    pub fn with_validation_timing(mut self, timing: ValidationTiming) -> Self {
        self.validation_timing = timing;
        self
    }

    pub fn with_debounce(mut self, delay: Duration) -> Self {
        self.enable_debounce = !delay.is_zero();
        self.debounce_delay = delay;
        self
    }

    pub fn without_debounce(mut self) -> Self {
        self.enable_debounce = false;
        self
    }

    pub fn with_event_tracking(mut self, max_events: usize) -> Self {
        self.enable_event_tracking = true;
        self.max_events = max_events;
        self
    }

    pub fn with_max_state_snapshots(mut self, n: usize) -> Self {
        self.max_state_snapshots = n;
        self
    }

    pub fn without_conditionals(mut self) -> Self {
        self.enable_conditionals = false;
        self
    }

    pub fn without_validation(mut self) -> Self {
        self.enable_validation = false;
        self
    }

    /// Delay to apply to change-triggered validation, if any
    pub(crate) fn change_validation_delay(&self) -> Option<Duration> {
        (self.enable_debounce && !self.debounce_delay.is_zero()).then_some(self.debounce_delay)
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RuntimeConfig::default();
        assert!(config.enable_conditionals);
        assert!(config.enable_validation);
        assert!(!config.enable_event_tracking);
        assert_eq!(config.validation_timing, ValidationTiming::OnBlur);
        assert_eq!(config.debounce_delay, Duration::from_millis(300));
        assert_eq!(config.max_state_snapshots, 10);
        assert_eq!(config.max_events, 1000);
    }

    #[test]
    fn test_debounce_windows() {
        let config = DebouncedConfig::default();
        assert_eq!(config.delay_for(EventType::Change), Some(Duration::from_millis(300)));
        assert_eq!(config.delay_for(EventType::Blur), Some(Duration::from_millis(100)));
        assert_eq!(config.delay_for(EventType::Focus), Some(Duration::from_millis(50)));
        assert_eq!(config.delay_for(EventType::Submit), None);
        assert_eq!(config.delay_for(EventType::Reset), None);
        assert_eq!(config.delay_for(EventType::Init), None);
    }

    #[test]
    fn test_from_ron_partial() {
        let config = RuntimeConfig::from_ron(
            "(enable_event_tracking: true, max_events: 3, debounced: (change: 500))",
        )
        .unwrap();
        assert!(config.enable_event_tracking);
        assert_eq!(config.max_events, 3);
        assert_eq!(config.debounced.change, Duration::from_millis(500));
        assert_eq!(config.debounced.blur, Duration::from_millis(100));
    }

    #[test]
    fn test_from_ron_rejects_garbage() {
        assert!(matches!(
            RuntimeConfig::from_ron("(validation_timing: Sometimes)"),
            Err(crate::Error::Config(_))
        ));
    }

    #[test]
    fn test_zero_delay_disables_debounce() {
        let config = RuntimeConfig::default().with_debounce(Duration::ZERO);
        assert_eq!(config.change_validation_delay(), None);
    }
}
