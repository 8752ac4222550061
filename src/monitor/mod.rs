//! Progress monitor
//!
//! Watches externally executed tasks. Each monitored task id gets its own
//! tokio worker driven by a fixed interval: on every tick the worker asks the
//! [`StatusSource`] for news, folds the answer into the task's
//! [`TaskProgress`], and hands a snapshot to the [`Renderer`]. When a task
//! reaches a terminal status the monitor broadcasts
//! [`MonitorEvent::Finished`] and discards the record after a grace delay.
//!
//! # Components
//!
//! - [`progress`] - task record, status machine and snapshots
//! - [`source`] - status source capability plus simulated/scripted sources
//! - [`render`] - render sinks (terminal, JSON lines, in-memory)

pub mod progress;
pub mod render;
pub mod source;

pub use progress::{
    LogEntry, LogLevel, ProgressSnapshot, TaskProgress, TaskStatus, TickOutcome, TickPolicy,
};
pub use render::{JsonRenderer, ProgressBar, RecordingRenderer, Renderer, TerminalRenderer};
pub use source::{ScriptedSource, SimulatedSource, SourceError, StatusReport, StatusSource};

use crate::config::MonitorConfig;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

const EVENT_CAPACITY: usize = 256;

/// Errors surfaced synchronously to callers of the monitor
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MonitorError {
    #[error("invalid task id: {0:?}")]
    InvalidTaskId(String),

    #[error("monitoring requires a running tokio runtime")]
    NoRuntime,
}

/// Why a task stopped being monitored
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Terminal status reached and the grace delay elapsed
    Finished,
    /// `stop_monitoring` was called
    Requested,
    /// `stop_all` / `shutdown`
    Shutdown,
}

/// Lifecycle notifications broadcast by the monitor
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorEvent {
    Started { task_id: String },
    /// Sent once per monitoring session that reaches a terminal status
    Finished { task_id: String, status: TaskStatus },
    Stopped { task_id: String, reason: StopReason },
}

#[derive(Debug, Clone, Copy)]
struct MonitorSettings {
    tick_interval: Duration,
    grace_delay: Duration,
    render_log_lines: usize,
    policy: TickPolicy,
}

struct MonitorHandle {
    generation: u64,
    cancel: CancellationToken,
    progress: Arc<Mutex<TaskProgress>>,
    worker: JoinHandle<()>,
}

struct Shared {
    settings: MonitorSettings,
    source: Arc<dyn StatusSource>,
    renderer: Arc<dyn Renderer>,
    registry: Mutex<HashMap<String, MonitorHandle>>,
    retired: Mutex<Vec<JoinHandle<()>>>,
    events: broadcast::Sender<MonitorEvent>,
    next_generation: AtomicU64,
}

/// Tracks any number of tasks, one periodic worker per task id.
///
/// Cloning is cheap and every clone drives the same registry, so a shutdown
/// hook can hold its own handle.
#[derive(Clone)]
pub struct ProgressMonitor {
    inner: Arc<Shared>,
}

impl ProgressMonitor {
    pub fn new(
        config: &MonitorConfig,
        source: Arc<dyn StatusSource>,
        renderer: Arc<dyn Renderer>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Shared {
                settings: MonitorSettings {
                    tick_interval: config.tick_interval(),
                    grace_delay: config.grace_delay(),
                    render_log_lines: config.render_log_lines,
                    policy: config.tick_policy(),
                },
                source,
                renderer,
                registry: Mutex::new(HashMap::new()),
                retired: Mutex::new(Vec::new()),
                events,
                next_generation: AtomicU64::new(1),
            }),
        }
    }

    /// Receiver for lifecycle events emitted after this call
    pub fn subscribe(&self) -> broadcast::Receiver<MonitorEvent> {
        self.inner.events.subscribe()
    }

    /// Starts polling `task_id`.
    ///
    /// Returns `Ok(false)` when the id is already monitored, and
    /// `MonitorError::NoRuntime` outside a tokio runtime.
    pub fn start_monitoring(&self, task_id: &str) -> Result<bool, MonitorError> {
        validate_task_id(task_id)?;
        let runtime =
            tokio::runtime::Handle::try_current().map_err(|_| MonitorError::NoRuntime)?;

        let mut registry = self.inner.lock_registry();
        if registry.contains_key(task_id) {
            tracing::debug!("Already monitoring {}", task_id);
            return Ok(false);
        }

        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        let progress = Arc::new(Mutex::new(TaskProgress::new(task_id, Instant::now())));

        // Sent under the registry lock so Started always precedes Finished
        self.inner.emit(MonitorEvent::Started {
            task_id: task_id.to_string(),
        });

        self.inner.source.forget(task_id);
        let worker = runtime.spawn(supervise_worker(
            Arc::clone(&self.inner),
            task_id.to_string(),
            generation,
            Arc::clone(&progress),
            cancel.clone(),
        ));

        registry.insert(
            task_id.to_string(),
            MonitorHandle {
                generation,
                cancel,
                progress,
                worker,
            },
        );
        tracing::info!("Monitoring {} (generation {})", task_id, generation);
        Ok(true)
    }

    /// Cancels the worker for `task_id` and drops its record.
    ///
    /// Returns `Ok(false)` when the id was not monitored. Safe to call from
    /// inside a status source or renderer while a tick is running.
    pub fn stop_monitoring(&self, task_id: &str) -> Result<bool, MonitorError> {
        validate_task_id(task_id)?;

        let removed = self.inner.lock_registry().remove(task_id);
        match removed {
            Some(handle) => {
                self.inner.retire(task_id, handle, StopReason::Requested);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Stops every monitored task. Returns how many were stopped.
    pub fn stop_all(&self) -> usize {
        let drained: Vec<(String, MonitorHandle)> = self.inner.lock_registry().drain().collect();
        let count = drained.len();
        for (task_id, handle) in drained {
            self.inner.retire(&task_id, handle, StopReason::Shutdown);
        }
        if count > 0 {
            tracing::info!("Stopped {} monitored task(s)", count);
        }
        count
    }

    /// `stop_all`, then waits for every worker to exit
    pub async fn shutdown(&self) {
        self.stop_all();
        let workers: Vec<JoinHandle<()>> = {
            let mut retired = self.inner.retired.lock().unwrap_or_else(|e| e.into_inner());
            retired.drain(..).collect()
        };
        for result in futures::future::join_all(workers).await {
            if let Err(e) = result {
                tracing::warn!("Monitor worker ended abnormally: {}", e);
            }
        }
    }

    /// Resolves once no task is monitored
    pub async fn wait_until_idle(&self) {
        let mut events = self.subscribe();
        loop {
            if self.active_count() == 0 {
                return;
            }
            match events.recv().await {
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return,
            }
        }
    }

    pub fn is_monitoring(&self, task_id: &str) -> bool {
        self.inner.lock_registry().contains_key(task_id)
    }

    pub fn active_count(&self) -> usize {
        self.inner.lock_registry().len()
    }

    /// Monitored ids, sorted
    pub fn active_tasks(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.inner.lock_registry().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Current snapshot of a monitored task
    pub fn snapshot(&self, task_id: &str) -> Option<ProgressSnapshot> {
        let progress = {
            let registry = self.inner.lock_registry();
            Arc::clone(&registry.get(task_id)?.progress)
        };
        let task = progress.lock().unwrap_or_else(|e| e.into_inner());
        Some(task.snapshot(Instant::now(), self.inner.settings.render_log_lines))
    }
}

impl Shared {
    fn lock_registry(&self) -> MutexGuard<'_, HashMap<String, MonitorHandle>> {
        self.registry.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn emit(&self, event: MonitorEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    /// Cancels a handle already removed from the registry
    fn retire(&self, task_id: &str, handle: MonitorHandle, reason: StopReason) {
        handle.cancel.cancel();
        {
            let mut retired = self.retired.lock().unwrap_or_else(|e| e.into_inner());
            retired.retain(|w| !w.is_finished());
            retired.push(handle.worker);
        }
        tracing::debug!("Stopped monitoring {} ({:?})", task_id, reason);
        self.source.forget(task_id);
        self.renderer.clear(task_id);
        self.emit(MonitorEvent::Stopped {
            task_id: task_id.to_string(),
            reason,
        });
    }

    /// Removes a finished task unless it was already stopped or replaced
    fn release_finished(&self, task_id: &str, generation: u64) {
        let mut registry = self.lock_registry();
        let current = registry.get(task_id).map(|h| h.generation) == Some(generation);
        if !current {
            return;
        }
        registry.remove(task_id);
        drop(registry);

        self.source.forget(task_id);
        self.renderer.clear(task_id);
        self.emit(MonitorEvent::Stopped {
            task_id: task_id.to_string(),
            reason: StopReason::Finished,
        });
    }
}

/// Runs the worker and releases the task if the worker panics
async fn supervise_worker(
    shared: Arc<Shared>,
    task_id: String,
    generation: u64,
    progress: Arc<Mutex<TaskProgress>>,
    cancel: CancellationToken,
) {
    let worker = run_worker(
        Arc::clone(&shared),
        task_id.clone(),
        generation,
        Arc::clone(&progress),
        cancel.clone(),
    );
    if AssertUnwindSafe(worker).catch_unwind().await.is_ok() {
        return;
    }

    tracing::error!("Monitor worker for {} panicked", task_id);
    if cancel.is_cancelled() {
        return;
    }
    let status = progress.lock().unwrap_or_else(|e| e.into_inner()).status();
    if !status.is_terminal() {
        shared.emit(MonitorEvent::Finished {
            task_id: task_id.clone(),
            status: TaskStatus::Failed,
        });
    }
    shared.release_finished(&task_id, generation);
}

async fn run_worker(
    shared: Arc<Shared>,
    task_id: String,
    generation: u64,
    progress: Arc<Mutex<TaskProgress>>,
    cancel: CancellationToken,
) {
    let settings = shared.settings;

    let initial = {
        let task = progress.lock().unwrap_or_else(|e| e.into_inner());
        task.snapshot(Instant::now(), settings.render_log_lines)
    };
    shared.renderer.render(&initial);

    let mut ticker = tokio::time::interval(settings.tick_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {}
        }

        let fetched = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            result = shared.source.get_status(&task_id) => result,
        };

        let now = Instant::now();
        let (outcome, snapshot) = {
            let mut task = progress.lock().unwrap_or_else(|e| e.into_inner());
            let outcome = match &fetched {
                Ok(report) => task.apply_report(report, now, &settings.policy),
                Err(e) => {
                    tracing::warn!(
                        "Status source error for {} ({} in a row): {}",
                        task_id,
                        task.consecutive_failures() + 1,
                        e
                    );
                    task.record_source_error(e, &settings.policy)
                }
            };
            (outcome, task.snapshot(now, settings.render_log_lines))
        };

        // Stopped from inside this tick
        if cancel.is_cancelled() {
            return;
        }
        shared.renderer.render(&snapshot);
        // A stop landing during the draw may have cleared before it
        if cancel.is_cancelled() {
            shared.renderer.clear(&task_id);
            return;
        }

        if let TickOutcome::Finished(status) = outcome {
            tracing::info!("Task {} finished: {}", task_id, status);
            shared.emit(MonitorEvent::Finished {
                task_id: task_id.clone(),
                status,
            });

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(settings.grace_delay) => {}
            }
            shared.release_finished(&task_id, generation);
            return;
        }
    }
}

/// Task ids are opaque but must be non-blank and free of control characters
pub fn validate_task_id(task_id: &str) -> Result<(), MonitorError> {
    if task_id.trim().is_empty() || task_id.chars().any(char::is_control) {
        return Err(MonitorError::InvalidTaskId(task_id.to_string()));
    }
    Ok(())
}
