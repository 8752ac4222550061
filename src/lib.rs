//! Hive Monitor - poll-driven progress monitor
//!
//! Watches tasks executed by some external system. Every monitored task id
//! gets its own periodic worker that polls a pluggable status source, keeps
//! an in-memory progress record, renders it, and cleans itself up once the
//! task completes, fails, or monitoring is cancelled.
//!
//! # Módulos Principales
//!
//! - [`monitor`] - `ProgressMonitor`, progress model, status sources, renderers
//! - [`config`] - JSON configuration with environment overrides
//! - [`logging`] - file logger used while the terminal belongs to the renderer
//! - [`signal`] - shutdown hook for SIGINT/SIGTERM
//!
//! # Ejemplo de Uso
//!
//! ```rust,no_run
//! use hive_monitor::config::MonitorConfig;
//! use hive_monitor::monitor::{ProgressMonitor, SimulatedSource, TerminalRenderer};
//! use std::sync::Arc;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = MonitorConfig::default();
//! let monitor = ProgressMonitor::new(
//!     &config,
//!     Arc::new(SimulatedSource::new(config.simulation.clone())),
//!     Arc::new(TerminalRenderer::new(config.bar_width)),
//! );
//!
//! monitor.start_monitoring("build-42")?;
//! monitor.wait_until_idle().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod logging;
pub mod monitor;
pub mod signal;

pub use config::MonitorConfig;
pub use monitor::{MonitorError, MonitorEvent, ProgressMonitor, StatusSource, TaskStatus};
