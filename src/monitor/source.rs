//! Status sources
//!
//! A status source is the external collaborator the monitor asks, once per
//! tick, for the latest state of a task. Production callers plug in an
//! adapter over their task-execution system; this module ships the
//! randomized `SimulatedSource` used by the CLI demo and the deterministic
//! `ScriptedSource` used in tests.

use super::progress::TaskStatus;
use crate::config::SimulationConfig;
use async_trait::async_trait;
use rand_core::{OsRng, RngCore};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use thiserror::Error;

/// Errors a status source may return for a single fetch
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SourceError {
    #[error("status source unavailable: {0}")]
    Unavailable(String),

    #[error("unknown task: {0}")]
    UnknownTask(String),

    #[error("malformed status report: {0}")]
    Malformed(String),
}

/// What a status source reports for one task on one tick
#[derive(Debug, Clone, PartialEq)]
pub struct StatusReport {
    pub status: TaskStatus,
    /// Percentage points gained since the previous report
    pub progress_delta: f64,
    pub step_label: Option<String>,
    /// Free-form note appended to the task log
    pub message: Option<String>,
}

impl StatusReport {
    pub fn pending() -> Self {
        Self {
            status: TaskStatus::Pending,
            progress_delta: 0.0,
            step_label: None,
            message: None,
        }
    }

    pub fn running(progress_delta: f64) -> Self {
        Self {
            status: TaskStatus::Running,
            progress_delta,
            step_label: None,
            message: None,
        }
    }

    pub fn completed() -> Self {
        Self {
            status: TaskStatus::Completed,
            progress_delta: 0.0,
            step_label: None,
            message: None,
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            status: TaskStatus::Failed,
            progress_delta: 0.0,
            step_label: None,
            message: Some(reason.into()),
        }
    }

    pub fn with_step(mut self, label: impl Into<String>) -> Self {
        self.step_label = Some(label.into());
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Capability the monitor polls each tick
#[async_trait]
pub trait StatusSource: Send + Sync {
    async fn get_status(&self, task_id: &str) -> Result<StatusReport, SourceError>;

    /// Called when a monitoring session for `task_id` begins or ends.
    /// Sources keeping per-task state drop it here.
    fn forget(&self, _task_id: &str) {}
}

#[derive(Debug, Default)]
struct SimulatedJob {
    ticks: u32,
    progress: f64,
    done: bool,
}

/// Randomized stand-in for real task telemetry.
///
/// Every task id gets its own simulated job that stays pending for
/// `startup_ticks`, then advances by a random step in
/// `[min_step, max_step]` until it crosses 100%.
pub struct SimulatedSource {
    config: SimulationConfig,
    jobs: Mutex<HashMap<String, SimulatedJob>>,
}

impl SimulatedSource {
    pub fn new(config: SimulationConfig) -> Self {
        Self {
            config,
            jobs: Mutex::new(HashMap::new()),
        }
    }

    /// Number of task ids with simulated state
    pub fn tracked_jobs(&self) -> usize {
        self.jobs.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Uniform sample in [0, 1)
    fn unit_sample() -> f64 {
        (OsRng.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }
}

#[async_trait]
impl StatusSource for SimulatedSource {
    async fn get_status(&self, task_id: &str) -> Result<StatusReport, SourceError> {
        let mut jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
        let job = jobs.entry(task_id.to_string()).or_default();
        job.ticks += 1;

        if job.done {
            return Ok(StatusReport::completed());
        }
        if job.ticks <= self.config.startup_ticks {
            return Ok(StatusReport::pending());
        }
        if self.config.failure_rate > 0.0 && Self::unit_sample() < self.config.failure_rate {
            job.done = true;
            return Ok(StatusReport::failed("simulated worker crashed"));
        }

        let span = self.config.max_step - self.config.min_step;
        let delta = self.config.min_step + Self::unit_sample() * span;
        job.progress += delta;
        if job.progress >= 100.0 {
            job.done = true;
        }
        Ok(StatusReport::running(delta))
    }

    fn forget(&self, task_id: &str) {
        let mut jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
        jobs.remove(task_id);
    }
}

/// Deterministic source replaying a scripted sequence per task id.
///
/// Once a task's script runs out, `fallback` is returned on every call.
pub struct ScriptedSource {
    scripts: Mutex<HashMap<String, VecDeque<Result<StatusReport, SourceError>>>>,
    calls: Mutex<HashMap<String, usize>>,
    fallback: Result<StatusReport, SourceError>,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            calls: Mutex::new(HashMap::new()),
            fallback: Ok(StatusReport::running(0.0)),
        }
    }

    /// Replaces the exhaustion behaviour
    pub fn with_fallback(mut self, fallback: Result<StatusReport, SourceError>) -> Self {
        self.fallback = fallback;
        self
    }

    /// Queues responses for `task_id`, after anything already queued
    pub fn script(
        &self,
        task_id: &str,
        steps: impl IntoIterator<Item = Result<StatusReport, SourceError>>,
    ) {
        let mut scripts = self.scripts.lock().unwrap_or_else(|e| e.into_inner());
        scripts
            .entry(task_id.to_string())
            .or_default()
            .extend(steps);
    }

    /// Number of `get_status` calls made for `task_id`
    pub fn calls(&self, task_id: &str) -> usize {
        let calls = self.calls.lock().unwrap_or_else(|e| e.into_inner());
        calls.get(task_id).copied().unwrap_or(0)
    }
}

impl Default for ScriptedSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StatusSource for ScriptedSource {
    async fn get_status(&self, task_id: &str) -> Result<StatusReport, SourceError> {
        {
            let mut calls = self.calls.lock().unwrap_or_else(|e| e.into_inner());
            *calls.entry(task_id.to_string()).or_insert(0) += 1;
        }
        let mut scripts = self.scripts.lock().unwrap_or_else(|e| e.into_inner());
        scripts
            .get_mut(task_id)
            .and_then(|queue| queue.pop_front())
            .unwrap_or_else(|| self.fallback.clone())
    }
}
