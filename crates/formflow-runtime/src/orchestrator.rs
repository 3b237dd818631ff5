//! Async validation orchestrator
//!
//! Runs asynchronous field checks (uniqueness lookups and the like) as
//! tokio tasks. At most one check per field is in flight: starting a new
//! one aborts the previous task and reports it as superseded. Every
//! callback is invoked exactly once, with the check's messages, a
//! superseded error or a cancelled error.

use crate::{Error, Result};
use formflow_core::{Field, Value, ValueMap};
use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::task::AbortHandle;
use tracing::debug;

/// An asynchronous check: receives the field, its value and all values
pub type AsyncCheck =
    Arc<dyn Fn(Field, Value, ValueMap) -> BoxFuture<'static, Vec<String>> + Send + Sync>;

/// Receives the outcome of one async validation
pub type AsyncCallback = Box<dyn FnOnce(AsyncValidationOutcome) + Send>;

/// Outcome delivered to an [`AsyncCallback`]
#[derive(Debug)]
pub struct AsyncValidationOutcome {
    pub field: String,
    /// Monotonic per orchestrator; later validations have larger numbers
    pub generation: u64,
    /// Messages from the check, or why it did not complete
    pub result: Result<Vec<String>>,
}

struct InFlight {
    generation: u64,
    abort: AbortHandle,
    callback: Option<AsyncCallback>,
}

#[derive(Default)]
struct OrchestratorState {
    next_generation: u64,
    in_flight: HashMap<String, InFlight>,
}

/// Tracks in-flight async validations per field
#[derive(Clone, Default)]
pub struct ValidationOrchestrator {
    state: Arc<Mutex<OrchestratorState>>,
}

impl ValidationOrchestrator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start `check` for `field`, superseding any validation already in flight
    ///
    /// Returns the generation assigned to this validation.
    pub fn start(
        &self,
        handle: &Handle,
        field: &str,
        check: BoxFuture<'static, Vec<String>>,
        callback: AsyncCallback,
    ) -> u64 {
        let mut state = self.state.lock();
        state.next_generation += 1;
        let generation = state.next_generation;

        let shared = Arc::clone(&self.state);
        let task_field = field.to_string();
        let task = handle.spawn(async move {
            let errors = check.await;
            let callback = {
                let mut state = shared.lock();
                match state.in_flight.get(&task_field) {
                    Some(f) if f.generation == generation => state
                        .in_flight
                        .remove(&task_field)
                        .and_then(|f| f.callback),
                    _ => None,
                }
            };
            if let Some(callback) = callback {
                callback(AsyncValidationOutcome {
                    field: task_field,
                    generation,
                    result: Ok(errors),
                });
            }
        });

        let previous = state.in_flight.insert(
            field.to_string(),
            InFlight {
                generation,
                abort: task.abort_handle(),
                callback: Some(callback),
            },
        );
        drop(state);

        if let Some(previous) = previous {
            debug!(field, superseded = previous.generation, by = generation, "async validation superseded");
            finish(
                previous,
                field,
                Error::AsyncValidationSuperseded {
                    field: field.to_string(),
                },
            );
        }
        generation
    }

    /// Cancel the validation in flight for `field`
    pub fn cancel(&self, field: &str) -> bool {
        let removed = self.state.lock().in_flight.remove(field);
        match removed {
            Some(in_flight) => {
                finish(
                    in_flight,
                    field,
                    Error::AsyncValidationCancelled {
                        field: field.to_string(),
                    },
                );
                true
            }
            None => false,
        }
    }

    /// Cancel every validation in flight; returns how many were cancelled
    pub fn cancel_all(&self) -> usize {
        let drained: Vec<(String, InFlight)> = self.state.lock().in_flight.drain().collect();
        let count = drained.len();
        for (field, in_flight) in drained {
            let err = Error::AsyncValidationCancelled {
                field: field.clone(),
            };
            finish(in_flight, &field, err);
        }
        count
    }

    pub fn is_pending(&self, field: &str) -> bool {
        self.state.lock().in_flight.contains_key(field)
    }

    /// Generation assigned to the most recently started validation
    pub fn latest_generation(&self) -> u64 {
        self.state.lock().next_generation
    }

    pub fn in_flight_count(&self) -> usize {
        self.state.lock().in_flight.len()
    }
}

impl std::fmt::Debug for ValidationOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValidationOrchestrator")
            .field("in_flight", &self.in_flight_count())
            .finish()
    }
}

/// Abort a removed validation and deliver `err` to its callback
fn finish(in_flight: InFlight, field: &str, err: Error) {
    in_flight.abort.abort();
    if let Some(callback) = in_flight.callback {
        callback(AsyncValidationOutcome {
            field: field.to_string(),
            generation: in_flight.generation,
            result: Err(err),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use std::time::Duration;

    type Log = Arc<Mutex<Vec<(u64, std::result::Result<Vec<String>, String>)>>>;

    fn recorder(log: &Log) -> AsyncCallback {
        let log = Arc::clone(log);
        Box::new(move |outcome: AsyncValidationOutcome| {
            log.lock()
                .push((outcome.generation, outcome.result.map_err(|e| e.to_string())));
        })
    }

    fn delayed(ms: u64, errors: Vec<&'static str>) -> BoxFuture<'static, Vec<String>> {
        async move {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            errors.into_iter().map(String::from).collect()
        }
        .boxed()
    }

    #[tokio::test(start_paused = true)]
    async fn test_newer_validation_supersedes_older() {
        let orchestrator = ValidationOrchestrator::new();
        let handle = Handle::current();
        let log: Log = Arc::default();

        let first = orchestrator.start(&handle, "username", delayed(100, vec!["taken"]), recorder(&log));
        let second = orchestrator.start(&handle, "username", delayed(100, vec![]), recorder(&log));
        assert!(second > first);

        // superseded callback fires right away
        assert_eq!(log.lock().len(), 1);
        assert_eq!(
            log.lock()[0],
            (first, Err("async validation for 'username' was superseded".to_string()))
        );

        tokio::time::sleep(Duration::from_millis(150)).await;
        let log = log.lock();
        assert_eq!(log.len(), 2);
        assert_eq!(log[1], (second, Ok(vec![])));
        assert_eq!(orchestrator.in_flight_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fields_run_independently() {
        let orchestrator = ValidationOrchestrator::new();
        let handle = Handle::current();
        let log: Log = Arc::default();

        orchestrator.start(&handle, "a", delayed(10, vec!["bad a"]), recorder(&log));
        orchestrator.start(&handle, "b", delayed(20, vec![]), recorder(&log));
        assert_eq!(orchestrator.in_flight_count(), 2);

        tokio::time::sleep(Duration::from_millis(30)).await;
        let results: Vec<_> = log.lock().iter().map(|(_, r)| r.clone()).collect();
        assert_eq!(results, vec![Ok(vec!["bad a".to_string()]), Ok(vec![])]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_delivers_cancelled() {
        let orchestrator = ValidationOrchestrator::new();
        let handle = Handle::current();
        let log: Log = Arc::default();

        orchestrator.start(&handle, "email", delayed(50, vec!["x"]), recorder(&log));
        assert!(orchestrator.is_pending("email"));
        assert!(orchestrator.cancel("email"));
        assert!(!orchestrator.cancel("email"));

        tokio::time::sleep(Duration::from_millis(100)).await;
        let log = log.lock();
        assert_eq!(log.len(), 1);
        assert!(matches!(&log[0].1, Err(msg) if msg.contains("cancelled")));
    }
}
