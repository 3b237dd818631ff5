//! Form events, dispatch and tracking
//!
//! Handlers are registered per [`EventType`] and invoked synchronously in
//! registration order. A failing or panicking handler is recorded in the
//! [`DispatchReport`] and does not stop the remaining handlers.
//!
//! When tracking is enabled the dispatcher keeps a bounded history
//! (oldest evicted first) and cumulative [`EventStats`].
//!
//! Two fronts sit over a shared [`EventDispatcher`]: [`DebouncedDispatcher`]
//! coalesces bursts per field, and [`BatchDispatcher`] delivers queued
//! events in groups.

use crate::config::DebouncedConfig;
use crate::debounce::Debouncer;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use formflow_core::{Value, ValueMap};
use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tracing::{trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    Change,
    Blur,
    Focus,
    Submit,
    Reset,
    Init,
}

impl EventType {
    pub const ALL: [EventType; 6] = [
        EventType::Change,
        EventType::Blur,
        EventType::Focus,
        EventType::Submit,
        EventType::Reset,
        EventType::Init,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Change => "change",
            EventType::Blur => "blur",
            EventType::Focus => "focus",
            EventType::Submit => "submit",
            EventType::Reset => "reset",
            EventType::Init => "init",
        }
    }

    /// Field-level events carry a field name
    pub fn requires_field(&self) -> bool {
        matches!(self, EventType::Change | EventType::Blur | EventType::Focus)
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Something that happened to the form
///
/// Immutable once built; the timestamp is taken at construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormEvent {
    event_type: EventType,
    field_name: Option<String>,
    value: Option<Value>,
    old_value: Option<Value>,
    timestamp: DateTime<Utc>,
    data: ValueMap,
    metadata: IndexMap<String, String>,
}

impl FormEvent {
    pub fn new(event_type: EventType) -> Self {
        Self {
            event_type,
            field_name: None,
            value: None,
            old_value: None,
            timestamp: Utc::now(),
            data: ValueMap::new(),
            metadata: IndexMap::new(),
        }
    }

    fn for_field(event_type: EventType, field: impl Into<String>) -> Self {
        Self {
            field_name: Some(field.into()),
            ..Self::new(event_type)
        }
    }

    pub fn change(field: impl Into<String>, value: Value, old_value: Value) -> Self {
        Self {
            value: Some(value),
            old_value: Some(old_value),
            ..Self::for_field(EventType::Change, field)
        }
    }

    pub fn blur(field: impl Into<String>, value: Value) -> Self {
        Self {
            value: Some(value),
            ..Self::for_field(EventType::Blur, field)
        }
    }

    pub fn focus(field: impl Into<String>) -> Self {
        Self::for_field(EventType::Focus, field)
    }

    pub fn submit(data: ValueMap) -> Self {
        Self {
            data,
            ..Self::new(EventType::Submit)
        }
    }

    pub fn reset() -> Self {
        Self::new(EventType::Reset)
    }

    pub fn init(data: ValueMap) -> Self {
        Self {
            data,
            ..Self::new(EventType::Init)
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn event_type(&self) -> EventType {
        self.event_type
    }

    pub fn field_name(&self) -> Option<&str> {
        self.field_name.as_deref()
    }

    pub fn value(&self) -> Option<&Value> {
        self.value.as_ref()
    }

    pub fn old_value(&self) -> Option<&Value> {
        self.old_value.as_ref()
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn data(&self) -> &ValueMap {
        &self.data
    }

    pub fn metadata(&self) -> &IndexMap<String, String> {
        &self.metadata
    }

    fn check(&self) -> Result<()> {
        if self.event_type.requires_field() && self.field_name.is_none() {
            return Err(Error::InvalidEvent(format!(
                "field name is required for {} event",
                self.event_type
            )));
        }
        Ok(())
    }
}

/// Error a handler may return
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Registered event callback
pub type EventCallback =
    Arc<dyn Fn(&FormEvent) -> std::result::Result<(), HandlerError> + Send + Sync>;

/// Identifies a registration for [`EventDispatcher::unregister`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerId(u64);

/// A handler that returned an error or panicked
#[derive(Debug, Clone, PartialEq)]
pub struct HandlerFailure {
    pub handler: HandlerId,
    pub message: String,
    pub panicked: bool,
}

/// Result of dispatching one event
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchReport {
    pub event_type: EventType,
    pub handlers_invoked: usize,
    pub failures: Vec<HandlerFailure>,
}

impl DispatchReport {
    pub fn is_ok(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Accumulated processing time for one event type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProcessingTime {
    pub count: u64,
    pub total: Duration,
    pub max: Duration,
}

impl ProcessingTime {
    fn record(&mut self, elapsed: Duration) {
        self.count += 1;
        self.total += elapsed;
        self.max = self.max.max(elapsed);
    }

    pub fn average(&self) -> Duration {
        if self.count == 0 {
            return Duration::ZERO;
        }
        let nanos = self.total.as_nanos() / u128::from(self.count);
        Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
    }
}

/// Counters accumulated over a runtime's lifetime
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EventStats {
    pub total_events: u64,
    pub events_by_type: IndexMap<EventType, u64>,
    pub events_by_field: IndexMap<String, u64>,
    pub last_event_type: Option<EventType>,
    pub last_event_field: Option<String>,
    #[serde(default)]
    pub last_event_metadata: IndexMap<String, String>,
    pub first_event_time: Option<DateTime<Utc>>,
    pub last_event_time: Option<DateTime<Utc>>,
    pub processing_times: IndexMap<EventType, ProcessingTime>,
}

/// Bounded history plus statistics
#[derive(Debug, Clone)]
pub struct EventTracker {
    max_events: usize,
    history: VecDeque<FormEvent>,
    stats: EventStats,
    started: Instant,
}

impl EventTracker {
    /// `max_events == 0` keeps every event
    pub fn new(max_events: usize) -> Self {
        Self {
            max_events,
            history: VecDeque::new(),
            stats: EventStats::default(),
            started: Instant::now(),
        }
    }

    pub fn record(&mut self, event: &FormEvent, elapsed: Duration) {
        let stats = &mut self.stats;
        stats.total_events += 1;
        *stats.events_by_type.entry(event.event_type).or_default() += 1;
        if let Some(field) = &event.field_name {
            *stats.events_by_field.entry(field.clone()).or_default() += 1;
        }
        stats.last_event_type = Some(event.event_type);
        stats.last_event_field = event.field_name.clone();
        stats.last_event_metadata = event.metadata.clone();
        stats.first_event_time.get_or_insert(event.timestamp);
        stats.last_event_time = Some(event.timestamp);
        stats
            .processing_times
            .entry(event.event_type)
            .or_default()
            .record(elapsed);

        self.history.push_back(event.clone());
        self.enforce_limits();
    }

    pub fn history(&self) -> impl Iterator<Item = &FormEvent> {
        self.history.iter()
    }

    pub fn stats(&self) -> &EventStats {
        &self.stats
    }

    /// Time since the tracker was created or last cleared
    pub fn duration(&self) -> Duration {
        self.started.elapsed()
    }

    /// Average rate over [`duration`](Self::duration)
    pub fn events_per_second(&self) -> f64 {
        let seconds = self.duration().as_secs_f64();
        if seconds == 0.0 {
            return 0.0;
        }
        self.stats.total_events as f64 / seconds
    }

    pub fn clear(&mut self) {
        self.history.clear();
        self.stats = EventStats::default();
        self.started = Instant::now();
    }

    fn enforce_limits(&mut self) {
        if self.max_events > 0 && self.history.len() > self.max_events {
            let excess = self.history.len() - self.max_events;
            self.history.drain(0..excess);
        }
    }
}

/// Synchronous event dispatcher
pub struct EventDispatcher {
    handlers: RwLock<HashMap<EventType, Vec<(HandlerId, EventCallback)>>>,
    next_id: AtomicU64,
    enabled: AtomicBool,
    tracking: AtomicBool,
    tracker: Mutex<EventTracker>,
}

impl EventDispatcher {
    /// Create an enabled dispatcher; tracking starts disabled
    pub fn new(max_events: usize) -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            enabled: AtomicBool::new(true),
            tracking: AtomicBool::new(false),
            tracker: Mutex::new(EventTracker::new(max_events)),
        }
    }

    /// Create a dispatcher that records history and statistics
    pub fn with_tracking(max_events: usize) -> Self {
        let dispatcher = Self::new(max_events);
        dispatcher.set_tracking(true);
        dispatcher
    }

    /// Register a callback for one event type
    pub fn on<F>(&self, event_type: EventType, callback: F) -> HandlerId
    where
        F: Fn(&FormEvent) -> std::result::Result<(), HandlerError> + Send + Sync + 'static,
    {
        self.register(event_type, Arc::new(callback))
    }

    pub fn register(&self, event_type: EventType, callback: EventCallback) -> HandlerId {
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers
            .write()
            .entry(event_type)
            .or_default()
            .push((id, callback));
        id
    }

    /// Register one callback for several event types
    pub fn register_many(&self, event_types: &[EventType], callback: EventCallback) -> Vec<HandlerId> {
        event_types
            .iter()
            .map(|t| self.register(*t, Arc::clone(&callback)))
            .collect()
    }

    pub fn unregister(&self, id: HandlerId) -> bool {
        let mut handlers = self.handlers.write();
        for list in handlers.values_mut() {
            if let Some(pos) = list.iter().position(|(h, _)| *h == id) {
                list.remove(pos);
                return true;
            }
        }
        false
    }

    pub fn unregister_all(&self, event_type: EventType) -> usize {
        self.handlers
            .write()
            .remove(&event_type)
            .map(|l| l.len())
            .unwrap_or(0)
    }

    pub fn handler_count(&self, event_type: EventType) -> usize {
        self.handlers
            .read()
            .get(&event_type)
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Invoke every handler for the event's type
    ///
    /// Handlers run outside the registry lock, so they may register or
    /// unregister handlers themselves. A disabled dispatcher invokes no
    /// handlers and records nothing.
    pub fn emit(&self, event: &FormEvent) -> Result<DispatchReport> {
        event.check()?;
        if !self.is_enabled() {
            trace!(event = %event.event_type, "dispatcher disabled, event skipped");
            return Ok(DispatchReport {
                event_type: event.event_type,
                handlers_invoked: 0,
                failures: Vec::new(),
            });
        }
        let handlers: Vec<(HandlerId, EventCallback)> = self
            .handlers
            .read()
            .get(&event.event_type)
            .cloned()
            .unwrap_or_default();

        let started = Instant::now();
        let mut failures = Vec::new();
        for (id, callback) in &handlers {
            let outcome = catch_unwind(AssertUnwindSafe(|| callback(event)));
            let failure = match outcome {
                Ok(Ok(())) => None,
                Ok(Err(err)) => Some((err.to_string(), false)),
                Err(panic) => Some((panic_message(panic.as_ref()), true)),
            };
            if let Some((message, panicked)) = failure {
                warn!(event = %event.event_type, handler = id.0, panicked, %message, "event handler failed");
                failures.push(HandlerFailure {
                    handler: *id,
                    message,
                    panicked,
                });
            }
        }
        let elapsed = started.elapsed();

        if self.is_tracking() {
            self.tracker.lock().record(event, elapsed);
        }
        trace!(event = %event.event_type, field = ?event.field_name, handlers = handlers.len(), "event dispatched");

        Ok(DispatchReport {
            event_type: event.event_type,
            handlers_invoked: handlers.len(),
            failures,
        })
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn set_tracking(&self, enabled: bool) {
        self.tracking.store(enabled, Ordering::Relaxed);
    }

    pub fn is_tracking(&self) -> bool {
        self.tracking.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> EventStats {
        self.tracker.lock().stats().clone()
    }

    /// Tracked events, oldest first
    pub fn history(&self) -> Vec<FormEvent> {
        self.tracker.lock().history().cloned().collect()
    }

    pub fn tracking_duration(&self) -> Duration {
        self.tracker.lock().duration()
    }

    pub fn events_per_second(&self) -> f64 {
        self.tracker.lock().events_per_second()
    }

    pub fn clear_tracking(&self) {
        self.tracker.lock().clear();
    }
}

impl fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let handlers: usize = self.handlers.read().values().map(Vec::len).sum();
        f.debug_struct("EventDispatcher")
            .field("handlers", &handlers)
            .field("enabled", &self.is_enabled())
            .field("tracking", &self.is_tracking())
            .finish()
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("handler panicked: {}", s)
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("handler panicked: {}", s)
    } else {
        "handler panicked".to_string()
    }
}

/// Dispatcher front that coalesces bursts of field events
///
/// Within a type's window only the most recent event per
/// (type, field) is delivered. Submit, reset and init are delivered
/// immediately, as is everything when no tokio runtime is running.
#[derive(Debug)]
pub struct DebouncedDispatcher {
    dispatcher: Arc<EventDispatcher>,
    config: DebouncedConfig,
    debouncer: Debouncer<(EventType, String)>,
}

impl DebouncedDispatcher {
    pub fn new(dispatcher: Arc<EventDispatcher>, config: DebouncedConfig) -> Self {
        Self {
            dispatcher,
            config,
            debouncer: Debouncer::new(),
        }
    }

    /// Deliver now (`Some(report)`) or schedule delivery (`None`)
    pub fn emit(&self, event: FormEvent) -> Result<Option<DispatchReport>> {
        event.check()?;
        let delay = self.config.delay_for(event.event_type);
        let (Some(delay), Ok(handle)) = (delay, Handle::try_current()) else {
            return self.dispatcher.emit(&event).map(Some);
        };
        let key = (event.event_type, event.field_name.clone().unwrap_or_default());
        let dispatcher = Arc::clone(&self.dispatcher);
        self.debouncer.schedule(&handle, key, delay, move || {
            if let Err(err) = dispatcher.emit(&event) {
                warn!(error = %err, "debounced event dropped");
            }
        });
        Ok(None)
    }

    pub fn pending_count(&self) -> usize {
        self.debouncer.pending_count()
    }

    /// Drop every pending event for one field, whatever its type
    pub fn cancel_field(&self, name: &str) -> usize {
        self.debouncer.cancel_where(|(_, field)| field == name)
    }

    pub fn cancel_all(&self) -> usize {
        self.debouncer.cancel_all()
    }

    pub fn dispatcher(&self) -> &Arc<EventDispatcher> {
        &self.dispatcher
    }
}

/// Receives a whole batch in place of per-event dispatch
pub type FlushCallback =
    Arc<dyn Fn(&[FormEvent]) -> std::result::Result<(), HandlerError> + Send + Sync>;

#[derive(Default)]
struct BatchQueue {
    events: Vec<FormEvent>,
    on_flush: Option<FlushCallback>,
}

/// Dispatcher front that delivers events in groups
///
/// A batch goes out when `batch_size` events are queued, when
/// `batch_timeout` passes without a new event, or on [`flush`](Self::flush).
/// The timeout needs a running tokio runtime.
pub struct BatchDispatcher {
    dispatcher: Arc<EventDispatcher>,
    batch_size: usize,
    batch_timeout: Duration,
    queue: Arc<Mutex<BatchQueue>>,
    timer: Debouncer<()>,
}

impl BatchDispatcher {
    pub fn new(dispatcher: Arc<EventDispatcher>, batch_size: usize, batch_timeout: Duration) -> Self {
        Self {
            dispatcher,
            batch_size: batch_size.max(1),
            batch_timeout,
            queue: Arc::default(),
            timer: Debouncer::new(),
        }
    }

    pub fn set_flush_callback<F>(&self, callback: F)
    where
        F: Fn(&[FormEvent]) -> std::result::Result<(), HandlerError> + Send + Sync + 'static,
    {
        self.queue.lock().on_flush = Some(Arc::new(callback));
    }

    /// Queue an event
    ///
    /// Returns `Some(count)` when this event filled the batch and it was
    /// delivered.
    pub fn add(&self, event: FormEvent) -> Result<Option<usize>> {
        event.check()?;
        let full = {
            let mut queue = self.queue.lock();
            queue.events.push(event);
            queue.events.len() >= self.batch_size
        };
        if full {
            self.timer.cancel(&());
            return flush_batch(&self.queue, &self.dispatcher).map(Some);
        }
        if let Ok(handle) = Handle::try_current() {
            let queue = Arc::clone(&self.queue);
            let dispatcher = Arc::clone(&self.dispatcher);
            self.timer.schedule(&handle, (), self.batch_timeout, move || {
                if let Err(err) = flush_batch(&queue, &dispatcher) {
                    warn!(error = %err, "batch flush failed");
                }
            });
        }
        Ok(None)
    }

    /// Deliver everything queued now; returns how many events went out
    pub fn flush(&self) -> Result<usize> {
        self.timer.cancel(&());
        flush_batch(&self.queue, &self.dispatcher)
    }

    pub fn queue_len(&self) -> usize {
        self.queue.lock().events.len()
    }
}

impl fmt::Debug for BatchDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchDispatcher")
            .field("batch_size", &self.batch_size)
            .field("batch_timeout", &self.batch_timeout)
            .field("queued", &self.queue_len())
            .finish()
    }
}

fn flush_batch(queue: &Mutex<BatchQueue>, dispatcher: &EventDispatcher) -> Result<usize> {
    let (events, on_flush) = {
        let mut queue = queue.lock();
        (std::mem::take(&mut queue.events), queue.on_flush.clone())
    };
    if events.is_empty() {
        return Ok(0);
    }
    trace!(events = events.len(), "flushing event batch");
    match on_flush {
        Some(callback) => callback(&events).map_err(|err| Error::BatchFlush(err.to_string()))?,
        None => {
            for event in &events {
                dispatcher.emit(event)?;
            }
        }
    }
    Ok(events.len())
}
