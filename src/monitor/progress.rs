//! Task progress model
//!
//! Holds the per-task record the monitor mutates on every tick, plus the
//! serializable snapshot handed to renderers.

use super::source::{SourceError, StatusReport};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;

/// Lifecycle status of a monitored task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    /// `completed` and `failed` never transition again
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    fn rank(&self) -> u8 {
        match self {
            TaskStatus::Pending => 0,
            TaskStatus::Running => 1,
            TaskStatus::Completed | TaskStatus::Failed => 2,
        }
    }

    /// Whether moving from `self` to `next` is a forward transition
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        !self.is_terminal() && next.rank() > self.rank()
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::Running => write!(f, "running"),
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Severity of a task log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Warn => write!(f, "WARN"),
            LogLevel::Error => write!(f, "ERROR"),
        }
    }
}

/// A single timestamped entry in a task's log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
}

/// Knobs for the per-tick transition rules, derived from `MonitorConfig`
#[derive(Debug, Clone, Copy)]
pub struct TickPolicy {
    /// Consecutive source errors before the task is marked failed
    pub failure_threshold: u32,
    /// How long a task may stay pending before it is assumed to be running
    pub start_timeout: Duration,
    /// Progress below this percent produces no ETA
    pub eta_floor_percent: f64,
}

impl Default for TickPolicy {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            start_timeout: Duration::from_secs(5),
            eta_floor_percent: 1.0,
        }
    }
}

/// Result of applying one tick to a `TaskProgress`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Keep polling
    Continue,
    /// The task just reached a terminal status on this tick
    Finished(TaskStatus),
}

/// Maps percent-complete to a step label. Monotonic over [0,100].
pub fn step_for_percent(percent: f64) -> &'static str {
    match percent {
        p if p < 25.0 => "analyzing",
        p if p < 50.0 => "executing",
        p if p < 75.0 => "validating",
        _ => "finalizing",
    }
}

/// Progress record for one monitored task
#[derive(Debug, Clone)]
pub struct TaskProgress {
    task_id: String,
    status: TaskStatus,
    progress_percent: f64,
    current_step: String,
    eta: Option<Duration>,
    log: Vec<LogEntry>,
    consecutive_failures: u32,
    started_at: Instant,
    running_since: Option<Instant>,
}

impl TaskProgress {
    /// Fresh record in `pending` with an empty log
    pub fn new(task_id: impl Into<String>, now: Instant) -> Self {
        Self {
            task_id: task_id.into(),
            status: TaskStatus::Pending,
            progress_percent: 0.0,
            current_step: "queued".to_string(),
            eta: None,
            log: Vec::new(),
            consecutive_failures: 0,
            started_at: now,
            running_since: None,
        }
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    pub fn progress_percent(&self) -> f64 {
        self.progress_percent
    }

    pub fn current_step(&self) -> &str {
        &self.current_step
    }

    pub fn eta(&self) -> Option<Duration> {
        self.eta
    }

    pub fn log(&self) -> &[LogEntry] {
        &self.log
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Applies a successful status fetch
    pub fn apply_report(
        &mut self,
        report: &StatusReport,
        now: Instant,
        policy: &TickPolicy,
    ) -> TickOutcome {
        if self.status.is_terminal() {
            return TickOutcome::Continue;
        }
        self.consecutive_failures = 0;

        if report.status == TaskStatus::Failed {
            let reason = report
                .message
                .clone()
                .or_else(|| report.step_label.clone())
                .unwrap_or_else(|| "task reported failure".to_string());
            self.fail(format!("Task failed: {}", reason));
            return TickOutcome::Finished(TaskStatus::Failed);
        }

        if self.status == TaskStatus::Pending {
            let active = report.status != TaskStatus::Pending || report.progress_delta > 0.0;
            let waited = now.saturating_duration_since(self.started_at);
            if active {
                self.begin_running(now, "Task started".to_string());
            } else if waited >= policy.start_timeout {
                self.begin_running(
                    now,
                    format!(
                        "Task started (no activity reported after {}s)",
                        waited.as_secs()
                    ),
                );
            } else {
                return TickOutcome::Continue;
            }
        }

        if let Some(message) = &report.message {
            self.push(LogLevel::Info, message.clone());
        }

        // f64::max drops NaN, so a garbage delta counts as no progress
        let delta = if report.status == TaskStatus::Completed {
            100.0
        } else {
            report.progress_delta.max(0.0)
        };
        self.progress_percent = (self.progress_percent + delta).clamp(0.0, 100.0);

        if self.progress_percent >= 100.0 {
            self.complete(now);
            return TickOutcome::Finished(TaskStatus::Completed);
        }

        let label = report
            .step_label
            .as_deref()
            .filter(|l| !l.trim().is_empty())
            .unwrap_or_else(|| step_for_percent(self.progress_percent))
            .to_string();
        if label != self.current_step {
            self.push(
                LogLevel::Info,
                format!("{} ({:.0}%)", label, self.progress_percent),
            );
            self.current_step = label;
        }

        self.eta = self.estimate_remaining(now, policy.eta_floor_percent);
        TickOutcome::Continue
    }

    /// Records a failed status fetch. Escalates to `failed` once the
    /// consecutive-failure threshold is reached.
    pub fn record_source_error(&mut self, err: &SourceError, policy: &TickPolicy) -> TickOutcome {
        if self.status.is_terminal() {
            return TickOutcome::Continue;
        }
        self.consecutive_failures += 1;
        self.push(LogLevel::Error, format!("Status source error: {}", err));

        if self.consecutive_failures >= policy.failure_threshold {
            self.fail(format!(
                "Giving up after {} consecutive status source errors",
                self.consecutive_failures
            ));
            return TickOutcome::Finished(TaskStatus::Failed);
        }
        TickOutcome::Continue
    }

    /// Serializable view with the last `log_lines` entries
    pub fn snapshot(&self, now: Instant, log_lines: usize) -> ProgressSnapshot {
        let skip = self.log.len().saturating_sub(log_lines);
        ProgressSnapshot {
            task_id: self.task_id.clone(),
            status: self.status,
            progress_percent: self.progress_percent,
            step: self.current_step.clone(),
            eta_secs: self.eta.map(|d| d.as_secs_f64()),
            elapsed_secs: now.saturating_duration_since(self.started_at).as_secs_f64(),
            recent_log: self.log[skip..].to_vec(),
            log_len: self.log.len(),
        }
    }

    fn estimate_remaining(&self, now: Instant, floor: f64) -> Option<Duration> {
        let since = self.running_since?;
        let p = self.progress_percent;
        if p <= floor {
            return None;
        }
        let elapsed = now.saturating_duration_since(since).as_secs_f64();
        // Tiny percentages overflow Duration; no estimate beats a bogus one
        Duration::try_from_secs_f64(elapsed * (100.0 - p) / p).ok()
    }

    fn begin_running(&mut self, now: Instant, message: String) {
        self.transition(TaskStatus::Running);
        self.running_since = Some(now);
        self.current_step = step_for_percent(0.0).to_string();
        self.push(LogLevel::Info, message);
    }

    fn complete(&mut self, now: Instant) {
        self.transition(TaskStatus::Completed);
        self.progress_percent = 100.0;
        self.eta = None;
        self.current_step = "done".to_string();
        let took = now.saturating_duration_since(self.running_since.unwrap_or(self.started_at));
        self.push(
            LogLevel::Info,
            format!("Task completed in {:.1}s", took.as_secs_f64()),
        );
    }

    fn fail(&mut self, message: String) {
        self.transition(TaskStatus::Failed);
        self.eta = None;
        self.current_step = "failed".to_string();
        self.push(LogLevel::Error, message);
    }

    fn transition(&mut self, next: TaskStatus) {
        debug_assert!(
            self.status.can_transition_to(next),
            "illegal transition {} -> {}",
            self.status,
            next
        );
        self.status = next;
    }

    fn push(&mut self, level: LogLevel, message: String) {
        self.log.push(LogEntry {
            timestamp: Utc::now(),
            level,
            message,
        });
    }
}

/// Point-in-time view of a `TaskProgress`, as rendered and serialized
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub task_id: String,
    pub status: TaskStatus,
    pub progress_percent: f64,
    pub step: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eta_secs: Option<f64>,
    pub elapsed_secs: f64,
    /// Most recent log entries, newest last
    pub recent_log: Vec<LogEntry>,
    /// Total number of entries in the full log
    #[serde(default)]
    pub log_len: usize,
}

impl ProgressSnapshot {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_core::{OsRng, RngCore};

    fn policy() -> TickPolicy {
        TickPolicy {
            failure_threshold: 3,
            start_timeout: Duration::from_secs(5),
            eta_floor_percent: 1.0,
        }
    }

    #[test]
    fn test_new_task_is_pending() {
        let task = TaskProgress::new("t1", Instant::now());
        assert_eq!(task.status(), TaskStatus::Pending);
        assert_eq!(task.progress_percent(), 0.0);
        assert!(task.log().is_empty());
        assert!(task.eta().is_none());
    }

    #[test]
    fn test_activity_starts_running() {
        let now = Instant::now();
        let mut task = TaskProgress::new("t1", now);

        let outcome = task.apply_report(&StatusReport::running(10.0), now, &policy());

        assert_eq!(outcome, TickOutcome::Continue);
        assert_eq!(task.status(), TaskStatus::Running);
        assert_eq!(task.progress_percent(), 10.0);
        assert_eq!(task.log()[0].level, LogLevel::Info);
        assert!(task.log()[0].message.contains("started"));
    }

    #[test]
    fn test_pending_report_keeps_pending_until_timeout() {
        let now = Instant::now();
        let mut task = TaskProgress::new("t1", now);

        task.apply_report(&StatusReport::pending(), now + Duration::from_secs(1), &policy());
        assert_eq!(task.status(), TaskStatus::Pending);

        task.apply_report(&StatusReport::pending(), now + Duration::from_secs(5), &policy());
        assert_eq!(task.status(), TaskStatus::Running);
        assert!(task.log()[0].message.contains("no activity"));
    }

    #[test]
    fn test_progress_is_clamped_and_monotonic() {
        let now = Instant::now();
        let mut task = TaskProgress::new("t1", now);
        let mut last = 0.0;

        for delta in [5.0, -20.0, f64::NAN, 30.0, 0.0, 40.0] {
            task.apply_report(&StatusReport::running(delta), now, &policy());
            assert!(task.progress_percent() >= last);
            assert!((0.0..=100.0).contains(&task.progress_percent()));
            last = task.progress_percent();
        }
        assert_eq!(task.progress_percent(), 75.0);
    }

    #[test]
    fn test_reaching_hundred_completes() {
        let now = Instant::now();
        let mut task = TaskProgress::new("t1", now);
        task.apply_report(&StatusReport::running(60.0), now, &policy());

        let outcome = task.apply_report(&StatusReport::running(60.0), now, &policy());

        assert_eq!(outcome, TickOutcome::Finished(TaskStatus::Completed));
        assert_eq!(task.status(), TaskStatus::Completed);
        assert_eq!(task.progress_percent(), 100.0);
        assert_eq!(task.current_step(), "done");
        assert!(task.eta().is_none());
    }

    #[test]
    fn test_completed_report_from_pending_goes_through_running() {
        let now = Instant::now();
        let mut task = TaskProgress::new("t1", now);

        let outcome = task.apply_report(&StatusReport::completed(), now, &policy());

        assert_eq!(outcome, TickOutcome::Finished(TaskStatus::Completed));
        assert_eq!(task.log().len(), 2);
        assert!(task.log()[0].message.contains("started"));
        assert!(task.log()[1].message.contains("completed"));
    }

    #[test]
    fn test_terminal_state_is_sticky() {
        let now = Instant::now();
        let mut task = TaskProgress::new("t1", now);
        task.apply_report(&StatusReport::failed("boom"), now, &policy());
        assert_eq!(task.status(), TaskStatus::Failed);

        let outcome = task.apply_report(&StatusReport::running(50.0), now, &policy());
        assert_eq!(outcome, TickOutcome::Continue);
        assert_eq!(task.status(), TaskStatus::Failed);
        assert_eq!(task.progress_percent(), 0.0);

        let err = SourceError::Unavailable("down".into());
        assert_eq!(task.record_source_error(&err, &policy()), TickOutcome::Continue);
        assert_eq!(task.consecutive_failures(), 0);
    }

    #[test]
    fn test_failure_report_logs_error() {
        let now = Instant::now();
        let mut task = TaskProgress::new("t1", now);
        task.apply_report(&StatusReport::running(20.0), now, &policy());

        let outcome = task.apply_report(&StatusReport::failed("disk full"), now, &policy());

        assert_eq!(outcome, TickOutcome::Finished(TaskStatus::Failed));
        let last = task.log().last().unwrap();
        assert_eq!(last.level, LogLevel::Error);
        assert!(last.message.contains("disk full"));
        assert_eq!(task.progress_percent(), 20.0);
    }

    #[test]
    fn test_source_errors_escalate_at_threshold() {
        let now = Instant::now();
        let mut task = TaskProgress::new("t1", now);
        let err = SourceError::Unavailable("timeout".into());

        assert_eq!(task.record_source_error(&err, &policy()), TickOutcome::Continue);
        assert_eq!(task.record_source_error(&err, &policy()), TickOutcome::Continue);
        assert_eq!(task.status(), TaskStatus::Pending);

        let outcome = task.record_source_error(&err, &policy());
        assert_eq!(outcome, TickOutcome::Finished(TaskStatus::Failed));
        assert_eq!(task.status(), TaskStatus::Failed);
    }

    #[test]
    fn test_success_resets_failure_counter() {
        let now = Instant::now();
        let mut task = TaskProgress::new("t1", now);
        let err = SourceError::Unavailable("flaky".into());

        task.record_source_error(&err, &policy());
        task.record_source_error(&err, &policy());
        task.apply_report(&StatusReport::running(5.0), now, &policy());
        task.record_source_error(&err, &policy());

        assert_eq!(task.consecutive_failures(), 1);
        assert_eq!(task.status(), TaskStatus::Running);
    }

    #[test]
    fn test_eta_requires_progress_above_floor() {
        let now = Instant::now();
        let mut task = TaskProgress::new("t1", now);

        task.apply_report(&StatusReport::running(0.5), now, &policy());
        assert!(task.eta().is_none());

        task.apply_report(
            &StatusReport::running(24.5),
            now + Duration::from_secs(10),
            &policy(),
        );
        // 10s for 25% -> 30s left
        let eta = task.eta().unwrap();
        assert!((eta.as_secs_f64() - 30.0).abs() < 0.01);
    }

    #[test]
    fn test_step_label_changes_are_logged() {
        let now = Instant::now();
        let mut task = TaskProgress::new("t1", now);

        task.apply_report(&StatusReport::running(10.0), now, &policy());
        task.apply_report(&StatusReport::running(10.0), now, &policy());
        assert_eq!(task.current_step(), "analyzing");
        let before = task.log().len();

        task.apply_report(&StatusReport::running(10.0), now, &policy());
        assert_eq!(task.current_step(), "executing");
        assert_eq!(task.log().len(), before + 1);

        task.apply_report(
            &StatusReport::running(1.0).with_step("uploading artifacts"),
            now,
            &policy(),
        );
        assert_eq!(task.current_step(), "uploading artifacts");
    }

    #[test]
    fn test_step_buckets_are_monotonic() {
        let order = ["analyzing", "executing", "validating", "finalizing"];
        let mut last = 0;
        for p in 0..=100 {
            let idx = order
                .iter()
                .position(|s| *s == step_for_percent(p as f64))
                .unwrap();
            assert!(idx >= last);
            last = idx;
        }
        assert_eq!(last, 3);
    }

    #[test]
    fn test_transitions_never_regress() {
        let all = [
            TaskStatus::Pending,
            TaskStatus::Running,
            TaskStatus::Completed,
            TaskStatus::Failed,
        ];
        for from in all {
            for to in all {
                if from.can_transition_to(to) {
                    assert!(to.rank() > from.rank());
                }
            }
        }
        assert!(!TaskStatus::Completed.can_transition_to(TaskStatus::Running));
        assert!(!TaskStatus::Failed.can_transition_to(TaskStatus::Completed));
        assert!(TaskStatus::Pending.can_transition_to(TaskStatus::Failed));
    }

    #[test]
    fn test_snapshot_window_and_json() {
        let now = Instant::now();
        let mut task = TaskProgress::new("t1", now);
        for _ in 0..9 {
            task.apply_report(&StatusReport::running(10.0), now, &policy());
        }

        let snapshot = task.snapshot(now, 2);
        assert_eq!(snapshot.recent_log.len(), 2);
        assert_eq!(snapshot.log_len, task.log().len());
        assert_eq!(snapshot.recent_log.last(), task.log().last());

        let json = snapshot.to_json().unwrap();
        assert!(json.contains("\"status\":\"running\""));
        let parsed = ProgressSnapshot::from_json(&json).unwrap();
        assert_eq!(parsed, snapshot);
    }

    #[test]
    fn test_tiny_progress_with_zero_eta_floor() {
        let policy = TickPolicy {
            eta_floor_percent: 0.0,
            ..policy()
        };
        let start = Instant::now();
        let mut task = TaskProgress::new("t1", start);

        task.apply_report(&StatusReport::running(1e-300), start, &policy);
        let outcome = task.apply_report(
            &StatusReport::running(1e-300),
            start + Duration::from_secs(10),
            &policy,
        );

        assert_eq!(outcome, TickOutcome::Continue);
        assert_eq!(task.status(), TaskStatus::Running);
        assert!(task.eta().is_none());

        let outcome = task.apply_report(
            &StatusReport::running(50.0),
            start + Duration::from_secs(20),
            &policy,
        );
        assert_eq!(outcome, TickOutcome::Continue);
        assert_eq!(task.eta(), Some(Duration::from_secs(20)));
    }

    fn unit_sample() -> f64 {
        (OsRng.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    fn random_update(task: &mut TaskProgress, now: Instant, policy: &TickPolicy) -> TickOutcome {
        match OsRng.next_u32() % 40 {
            0 => task.apply_report(&StatusReport::completed(), now, policy),
            1 => task.apply_report(&StatusReport::failed("boom"), now, policy),
            2..=7 => task.record_source_error(&SourceError::Unavailable("flaky".into()), policy),
            8..=11 => task.apply_report(&StatusReport::pending(), now, policy),
            12 => task.apply_report(&StatusReport::running(f64::NAN), now, policy),
            13 => task.apply_report(&StatusReport::running(1e-300), now, policy),
            14 => task.apply_report(&StatusReport::running(f64::INFINITY), now, policy),
            15..=18 => task.apply_report(&StatusReport::running(-unit_sample() * 50.0), now, policy),
            19 => task.apply_report(&StatusReport::running(5.0).with_step("linking"), now, policy),
            _ => task.apply_report(&StatusReport::running(unit_sample() * 12.0), now, policy),
        }
    }

    #[test]
    fn test_random_update_sequences_keep_invariants() {
        let policy = TickPolicy {
            eta_floor_percent: 0.0,
            ..policy()
        };

        for _ in 0..300 {
            let start = Instant::now();
            let mut task = TaskProgress::new("t1", start);
            let mut finished = 0;

            for tick in 1..=80u64 {
                let before_status = task.status();
                let before_percent = task.progress_percent();
                let now = start + Duration::from_millis(250 * tick);

                let outcome = random_update(&mut task, now, &policy);
                let after = task.status();

                assert!(
                    after == before_status || before_status.can_transition_to(after),
                    "status regressed: {} -> {}",
                    before_status,
                    after
                );
                assert!((0.0..=100.0).contains(&task.progress_percent()));
                if before_status == TaskStatus::Running && after == TaskStatus::Running {
                    assert!(task.progress_percent() >= before_percent);
                }
                if let Some(eta) = task.eta() {
                    assert!(eta.as_secs_f64().is_finite());
                }
                match outcome {
                    TickOutcome::Finished(status) => {
                        finished += 1;
                        assert_eq!(status, after);
                        assert!(!before_status.is_terminal());
                    }
                    TickOutcome::Continue => assert!(!after.is_terminal() || before_status.is_terminal()),
                }
            }
            assert!(finished <= 1);
        }
    }
}
