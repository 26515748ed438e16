//! Memory usage notifications for Linux desktops.
//!
//! This crate watches system memory through `/proc/meminfo` and sends a
//! notification when utilization reaches a configurable threshold, with a
//! minimum delay between repeated notifications.
//!
//! # Examples
//!
//! ```rust,no_run
//! use notifymem::{Monitor, TextNotifier};
//! use notifymem_core::MonitorConfig;
//!
//! // Notify on stdout once memory usage reaches 90%
//! let monitor = Monitor::builder(MonitorConfig::new().with_threshold(90))
//!     .notifier(TextNotifier::stdout())
//!     .build()?;
//!
//! let reading = monitor.check_threshold()?;
//! println!("Memory usage: {}%", reading.utilization);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod meminfo;
pub mod monitor;
pub mod notifier;

pub use meminfo::{compute_utilization, MemoryReader, ProcMeminfo};
pub use monitor::{debug_sink, is_supported_platform, Monitor, MonitorBuilder, Reading};
pub use notifier::{DesktopNotifier, TextNotifier, Urgency};
