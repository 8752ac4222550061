//! Render sinks for progress snapshots
//!
//! Rendering is synchronous: the monitor hands each snapshot to the sink at
//! the end of a tick and moves on.

use super::progress::{LogLevel, ProgressSnapshot, TaskStatus};
use crossterm::style::Stylize;
use std::io::Write;
use std::sync::Mutex;

/// Surface the monitor writes snapshots to
pub trait Renderer: Send + Sync {
    /// Draw the current state of one task
    fn render(&self, snapshot: &ProgressSnapshot);

    /// Called once a task's record has been discarded
    fn clear(&self, _task_id: &str) {}
}

/// Fixed-width proportional progress bar
#[derive(Debug, Clone)]
pub struct ProgressBar {
    width: usize,
    filled_char: char,
    empty_char: char,
    show_percentage: bool,
}

impl ProgressBar {
    pub fn new(width: usize) -> Self {
        Self {
            width,
            filled_char: '█',
            empty_char: '░',
            show_percentage: true,
        }
    }

    pub fn ascii(width: usize) -> Self {
        Self {
            filled_char: '#',
            empty_char: '-',
            ..Self::new(width)
        }
    }

    pub fn without_percentage(mut self) -> Self {
        self.show_percentage = false;
        self
    }

    /// Number of filled cells for `percent`
    pub fn filled_cells(&self, percent: f64) -> usize {
        let ratio = (percent / 100.0).clamp(0.0, 1.0);
        ((ratio * self.width as f64).round() as usize).min(self.width)
    }

    pub fn render(&self, percent: f64) -> String {
        let filled = self.filled_cells(percent);
        let empty = self.width - filled;

        let bar: String = std::iter::repeat_n(self.filled_char, filled)
            .chain(std::iter::repeat_n(self.empty_char, empty))
            .collect();

        if self.show_percentage {
            format!("[{}] {:3.0}%", bar, percent.clamp(0.0, 100.0))
        } else {
            format!("[{}]", bar)
        }
    }
}

/// Compact human duration: `42s`, `3m 07s`, `1h 05m`
pub fn format_eta(secs: f64) -> String {
    let total = secs.max(0.0).round() as u64;
    match total {
        t if t < 60 => format!("{}s", t),
        t if t < 3600 => format!("{}m {:02}s", t / 60, t % 60),
        t => format!("{}h {:02}m", t / 3600, (t % 3600) / 60),
    }
}

fn status_icon(status: TaskStatus) -> &'static str {
    match status {
        TaskStatus::Pending => "⏳",
        TaskStatus::Running => "🔄",
        TaskStatus::Completed => "✅",
        TaskStatus::Failed => "❌",
    }
}

/// Renders snapshots as text blocks on stdout
pub struct TerminalRenderer {
    bar: ProgressBar,
    color: bool,
}

impl TerminalRenderer {
    pub fn new(bar_width: usize) -> Self {
        Self {
            bar: ProgressBar::new(bar_width),
            color: true,
        }
    }

    pub fn with_color(mut self, color: bool) -> Self {
        self.color = color;
        self
    }

    /// Text block for one snapshot: status line, bar, ETA and log window
    pub fn format_snapshot(&self, snapshot: &ProgressSnapshot) -> String {
        let status = snapshot.status.to_string();
        let status = if self.color {
            match snapshot.status {
                TaskStatus::Pending => status.dark_grey().to_string(),
                TaskStatus::Running => status.cyan().to_string(),
                TaskStatus::Completed => status.green().bold().to_string(),
                TaskStatus::Failed => status.red().bold().to_string(),
            }
        } else {
            status
        };

        let mut out = format!(
            "{} {} [{}] {}\n  {}",
            status_icon(snapshot.status),
            snapshot.task_id,
            status,
            snapshot.step,
            self.bar.render(snapshot.progress_percent),
        );
        if let Some(eta) = snapshot.eta_secs {
            out.push_str(&format!("  ETA {}", format_eta(eta)));
        }
        out.push('\n');

        for entry in &snapshot.recent_log {
            let level = entry.level.to_string();
            let level = match (self.color, entry.level) {
                (true, LogLevel::Warn) => level.yellow().to_string(),
                (true, LogLevel::Error) => level.red().to_string(),
                _ => level,
            };
            out.push_str(&format!(
                "    {} {:<5} {}\n",
                entry.timestamp.format("%H:%M:%S"),
                level,
                entry.message
            ));
        }
        out
    }
}

impl Renderer for TerminalRenderer {
    fn render(&self, snapshot: &ProgressSnapshot) {
        let block = self.format_snapshot(snapshot);
        let mut stdout = std::io::stdout().lock();
        let _ = stdout.write_all(block.as_bytes());
        let _ = stdout.flush();
    }

    fn clear(&self, task_id: &str) {
        let mut stdout = std::io::stdout().lock();
        let _ = writeln!(stdout, "   {} no longer monitored", task_id);
    }
}

/// Emits one JSON line per snapshot
pub struct JsonRenderer<W: Write + Send = std::io::Stdout> {
    out: Mutex<W>,
}

impl JsonRenderer<std::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write + Send> JsonRenderer<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    pub fn into_inner(self) -> W {
        self.out.into_inner().unwrap_or_else(|e| e.into_inner())
    }
}

impl<W: Write + Send> Renderer for JsonRenderer<W> {
    fn render(&self, snapshot: &ProgressSnapshot) {
        let line = match snapshot.to_json() {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!("Failed to serialize snapshot for {}: {}", snapshot.task_id, e);
                return;
            }
        };
        let mut out = self.out.lock().unwrap_or_else(|e| e.into_inner());
        let _ = writeln!(out, "{}", line);
        let _ = out.flush();
    }
}

/// Keeps every snapshot in memory
#[derive(Default)]
pub struct RecordingRenderer {
    snapshots: Mutex<Vec<ProgressSnapshot>>,
    cleared: Mutex<Vec<String>>,
}

impl RecordingRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshots(&self) -> Vec<ProgressSnapshot> {
        self.snapshots
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn snapshots_for(&self, task_id: &str) -> Vec<ProgressSnapshot> {
        self.snapshots()
            .into_iter()
            .filter(|s| s.task_id == task_id)
            .collect()
    }

    pub fn last_for(&self, task_id: &str) -> Option<ProgressSnapshot> {
        self.snapshots_for(task_id).pop()
    }

    pub fn cleared(&self) -> Vec<String> {
        self.cleared
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl Renderer for RecordingRenderer {
    fn render(&self, snapshot: &ProgressSnapshot) {
        self.snapshots
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(snapshot.clone());
    }

    fn clear(&self, task_id: &str) {
        self.cleared
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(task_id.to_string());
    }
}
