//! Formflow Runtime - Live state for schema-driven forms
//!
//! This crate owns everything that changes while a user fills in a form
//! described by a [`formflow_core::Schema`].
//!
//! ## Architecture
//!
//! ```text
//! Driver (UI, CLI, test)
//!  │
//!  └── FormRuntime (composition root, one RwLock<FormState>)
//!       ├── ValueStore / TouchTracker / ErrorStore
//!       ├── ConditionalEngine (trait) + ConditionalCache
//!       ├── Validator (trait) + ValidationOrchestrator (async)
//!       ├── Debouncer (change-triggered validation)
//!       └── EventDispatcher + DebouncedDispatcher + BatchDispatcher + EventTracker
//! ```
//!
//! ## Key Components
//!
//! - [`FormRuntime`]: Applies driver actions, recomputes conditions,
//!   validates per [`ValidationTiming`] and dispatches [`FormEvent`]s
//! - [`ConditionalEngine`]: Per-field visibility, required-ness and
//!   editability; failures fall back to visible and editable
//! - [`Validator`]: Pure rule checks; [`RuleValidator`] is the built-in set
//! - [`EventDispatcher`]: Ordered handlers with isolated failures and
//!   bounded history
//!
//! The runtime never renders; drivers read [`FieldView`]/[`FormView`] and
//! pass them to a [`Renderer`].

mod conditional;
mod config;
mod debounce;
mod error;
pub mod events;
mod field_errors;
mod history;
mod orchestrator;
pub mod render;
mod runtime;
mod state;
mod touched;
pub mod validation;
mod values;

pub use conditional::{
    ConditionalCache, ConditionalEngine, ConditionalEvaluationResult, ExprConditionalEngine,
    FieldConditionalResult,
};
pub use config::{DebouncedConfig, RuntimeConfig, ValidationTiming};
pub use debounce::Debouncer;
pub use error::{Error, Result};
pub use events::{
    BatchDispatcher, DebouncedDispatcher, DispatchReport, EventCallback, EventDispatcher,
    EventStats, EventTracker, EventType, FlushCallback, FormEvent, HandlerError, HandlerFailure,
    HandlerId, ProcessingTime,
};
pub use field_errors::ErrorStore;
pub use history::SnapshotHistory;
pub use orchestrator::{AsyncCallback, AsyncCheck, AsyncValidationOutcome, ValidationOrchestrator};
pub use render::{ActionView, FieldView, FormView, Renderer};
pub use runtime::{FormRuntime, RuntimeBuilder};
pub use state::{FieldState, RuntimeStats, StateManager, StateSnapshot};
pub use touched::TouchTracker;
pub use validation::{RuleValidator, ValidationContext, Validator};
pub use values::ValueStore;
