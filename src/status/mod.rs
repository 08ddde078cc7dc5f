//! Progress and log state shared with callers
//!
//! [`StatusTracker`] is the single record of what the updater is doing. It
//! keeps the last 100 log lines, mirrors every line to `tracing`, an optional
//! callback and a broadcast channel of [`OperationEvent`]s.
//!
//! Engine functions never see the tracker directly; they report through a
//! [`ProgressSink`]. [`StatusReporter`] adapts the tracker to that trait for
//! one operation state, and any `Fn(&str)` closure is a sink too.

pub mod guard;

pub use guard::{OperationGuard, OperationKind, OperationPermit};

use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast;

use crate::constants::STATUS_LOG_CAPACITY;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Callback receiving every log line.
pub type LogCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Where an engine step reports what it is doing.
pub trait ProgressSink: Send + Sync {
    /// A free-form log line.
    fn log(&self, line: &str);

    /// A milestone with an overall percentage. Defaults to logging the step.
    fn step(&self, percent: u8, step: &str) {
        let _ = percent;
        self.log(step);
    }
}

impl<F> ProgressSink for F
where
    F: Fn(&str) + Send + Sync,
{
    fn log(&self, line: &str) {
        self(line);
    }
}

/// Phase of the updater.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum UpdaterState {
    #[default]
    Idle,
    Checking,
    Updating,
    Building,
    Rollback,
    CherryPick,
    Revert,
    Done,
    Error,
}

/// Point-in-time copy of the tracker.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdaterStatus {
    pub state: UpdaterState,
    /// Overall progress, 0-100
    pub progress: u8,
    pub current_step: String,
    /// Most recent log lines, oldest first
    pub logs: Vec<String>,
    pub error: Option<String>,
}

/// Streamed to subscribers in the order it happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationEvent {
    Log(String),
    Progress {
        state: UpdaterState,
        percent: u8,
        step: String,
    },
}

#[derive(Debug, Default)]
struct StatusRecord {
    state: UpdaterState,
    progress: u8,
    current_step: String,
    logs: VecDeque<String>,
    error: Option<String>,
}

/// Thread-safe status record with log fan-out.
pub struct StatusTracker {
    record: Mutex<StatusRecord>,
    callback: Mutex<Option<LogCallback>>,
    events: broadcast::Sender<OperationEvent>,
}

impl std::fmt::Debug for StatusTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusTracker").field("status", &self.snapshot()).finish_non_exhaustive()
    }
}

impl Default for StatusTracker {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

impl StatusTracker {
    /// An idle tracker with no callback.
    #[must_use]
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            record: Mutex::new(StatusRecord::default()),
            callback: Mutex::new(None),
            events,
        }
    }

    /// Installs or clears the log callback.
    pub fn set_log_callback(&self, callback: Option<LogCallback>) {
        *lock(&self.callback) = callback;
    }

    /// A receiver for events emitted from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<OperationEvent> {
        self.events.subscribe()
    }

    /// Starts a fresh operation: clears logs, progress and error.
    pub fn reset(&self, state: UpdaterState) {
        let mut record = lock(&self.record);
        *record = StatusRecord {
            state,
            ..StatusRecord::default()
        };
    }

    /// Moves to `state` at `progress` percent and logs `step`.
    pub fn update(&self, state: UpdaterState, progress: u8, step: &str) {
        let progress = progress.min(100);
        {
            let mut record = lock(&self.record);
            record.state = state;
            record.progress = progress;
            record.current_step = step.to_string();
        }
        let _ = self.events.send(OperationEvent::Progress {
            state,
            percent: progress,
            step: step.to_string(),
        });
        self.log(step);
    }

    /// Appends a log line.
    pub fn log(&self, line: &str) {
        {
            let mut record = lock(&self.record);
            record.logs.push_back(line.to_string());
            while record.logs.len() > STATUS_LOG_CAPACITY {
                record.logs.pop_front();
            }
        }

        tracing::info!("{}", line);
        let callback = lock(&self.callback).clone();
        if let Some(callback) = callback {
            callback(line);
        }
        let _ = self.events.send(OperationEvent::Log(line.to_string()));
    }

    /// Records a failure and moves to [`UpdaterState::Error`].
    pub fn set_error(&self, error: &str) {
        {
            let mut record = lock(&self.record);
            record.state = UpdaterState::Error;
            record.error = Some(error.to_string());
        }
        tracing::error!("{}", error);
        self.log(&format!("Error: {error}"));
    }

    /// Copy of the current status.
    #[must_use]
    pub fn snapshot(&self) -> UpdaterStatus {
        let record = lock(&self.record);
        UpdaterStatus {
            state: record.state,
            progress: record.progress,
            current_step: record.current_step.clone(),
            logs: record.logs.iter().cloned().collect(),
            error: record.error.clone(),
        }
    }
}

/// [`ProgressSink`] that records into a tracker under one state.
#[derive(Debug, Clone)]
pub struct StatusReporter {
    tracker: Arc<StatusTracker>,
    state: UpdaterState,
}

impl StatusReporter {
    /// Reports under `state`.
    #[must_use]
    pub const fn new(tracker: Arc<StatusTracker>, state: UpdaterState) -> Self {
        Self {
            tracker,
            state,
        }
    }
}

impl ProgressSink for StatusReporter {
    fn log(&self, line: &str) {
        self.tracker.log(line);
    }

    fn step(&self, percent: u8, step: &str) {
        self.tracker.update(self.state, percent, step);
    }
}

/// Maps a sub-operation's 0-100 steps into the `from..=to` band of the
/// parent operation.
pub struct ScaledProgress<'a> {
    inner: &'a dyn ProgressSink,
    from: u8,
    to: u8,
}

impl<'a> ScaledProgress<'a> {
    #[must_use]
    pub const fn new(inner: &'a dyn ProgressSink, from: u8, to: u8) -> Self {
        Self {
            inner,
            from,
            to,
        }
    }
}

impl ProgressSink for ScaledProgress<'_> {
    fn log(&self, line: &str) {
        self.inner.log(line);
    }

    fn step(&self, percent: u8, step: &str) {
        let span = u16::from(self.to.saturating_sub(self.from));
        let offset = span * u16::from(percent.min(100)) / 100;
        self.inner.step(self.from.saturating_add(offset as u8), step);
    }
}
