use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use lazy_static::lazy_static;
use chrono::Local;

lazy_static! {
    static ref LOG_FILE: Mutex<Option<File>> = Mutex::new(None);
}

static DEBUG_MODE: AtomicBool = AtomicBool::new(false);

/// Initialize the log file (default location unless `path` is given)
pub fn init_logger(path: Option<&Path>) -> anyhow::Result<PathBuf> {
    let log_path = path.map(Path::to_path_buf).unwrap_or_else(get_log_path);

    // Create parent directory if it doesn't exist
    if let Some(parent) = log_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    let mut log_file = LOG_FILE.lock().unwrap_or_else(|e| e.into_inner());
    *log_file = Some(file);

    // Write session start marker
    let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S");
    if let Some(ref mut f) = *log_file {
        let _ = writeln!(f, "\n=== Hive Monitor Session Started at {} ===\n", timestamp);
    }

    Ok(log_path)
}

/// Get the log file path
fn get_log_path() -> PathBuf {
    if let Some(data_dir) = dirs::data_dir() {
        data_dir.join("hive-monitor").join("hive-monitor.log")
    } else {
        PathBuf::from("hive-monitor.log")
    }
}

/// Second handle on the open log file, for the tracing subscriber
pub fn log_file_handle() -> Option<File> {
    let log_file = LOG_FILE.lock().unwrap_or_else(|e| e.into_inner());
    log_file.as_ref().and_then(|f| f.try_clone().ok())
}

/// Enable DEBUG entries
pub fn set_debug_mode(enabled: bool) {
    DEBUG_MODE.store(enabled, Ordering::Relaxed);
}

pub fn is_debug_mode() -> bool {
    DEBUG_MODE.load(Ordering::Relaxed)
}

/// Log a message to file
pub fn log(level: &str, message: &str) {
    if level == "DEBUG" && !is_debug_mode() {
        return;
    }

    let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
    let formatted = format!("[{}] {}: {}", timestamp, level, message);

    let mut log_file = LOG_FILE.lock().unwrap_or_else(|e| e.into_inner());
    if let Some(ref mut f) = *log_file {
        let _ = writeln!(f, "{}", formatted);
        let _ = f.flush();
    }
}

/// Macros for easier logging
#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        $crate::logging::log("INFO", &format!($($arg)*));
    };
}

#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        $crate::logging::log("DEBUG", &format!($($arg)*));
    };
}

#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        $crate::logging::log("WARN", &format!($($arg)*));
    };
}

#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        $crate::logging::log("ERROR", &format!($($arg)*));
    };
}

/// Get the current log file path for display
pub fn get_log_path_display() -> String {
    get_log_path().display().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_logger_writes_to_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("logs").join("monitor.log");

        let opened = init_logger(Some(path.as_path())).unwrap();
        assert_eq!(opened, path);

        crate::log_info!("watching {} tasks", 3);
        crate::log_debug!("hidden while debug is off");
        set_debug_mode(true);
        crate::log_debug!("visible now");
        set_debug_mode(false);

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("Hive Monitor Session Started"));
        assert!(content.contains("INFO: watching 3 tasks"));
        assert!(!content.contains("hidden while debug is off"));
        assert!(content.contains("DEBUG: visible now"));
        assert!(log_file_handle().is_some());
    }
}
