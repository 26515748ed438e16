//! # notifymem-core
//!
//! Core types shared by the notifymem memory monitor.
//!
//! ## Features
//!
//! - **Monitor configuration** - Validated polling interval, resend delay and threshold
//! - **Memory samples** - Raw `/proc/meminfo` style totals in kB
//! - **Notifier capability** - The single seam used to deliver notifications
//! - **Error handling** - One error type covering every way a run can end
//!
//! ## Quick Start
//!
//! ```rust
//! use async_trait::async_trait;
//! use notifymem_core::{MonitorConfig, MonitorError, Notifier};
//! use std::time::Duration;
//!
//! struct LogNotifier;
//!
//! #[async_trait]
//! impl Notifier for LogNotifier {
//!     async fn notify(&self, title: &str, body: &str) -> Result<(), MonitorError> {
//!         println!("{title}: {body}");
//!         Ok(())
//!     }
//! }
//!
//! let config = MonitorConfig::new()
//!     .with_interval(Duration::from_secs(5))
//!     .with_threshold(90);
//! assert!(config.validate().is_ok());
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// A single capture of the memory-information source.
///
/// Both values are in kB, exactly as the kernel reports them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemorySample {
    /// Total physical memory
    pub total: u64,
    /// Memory available for new allocations without swapping
    pub available: u64,
}

impl MemorySample {
    /// Create a sample from raw kB values.
    #[must_use]
    pub const fn new(total: u64, available: u64) -> Self {
        Self { total, available }
    }

    /// Memory currently in use, in kB.
    #[must_use]
    pub const fn used(&self) -> u64 {
        self.total.saturating_sub(self.available)
    }
}

/// Polling and notification settings for a monitor.
///
/// Immutable once a monitor has been built from it. Bounds are checked by
/// [`MonitorConfig::validate`], which the monitor builder calls.
///
/// # Examples
///
/// ```rust
/// use notifymem_core::MonitorConfig;
/// use std::time::Duration;
///
/// let config = MonitorConfig::new()
///     .with_interval(Duration::from_secs(2))
///     .with_resend_delay(Duration::from_secs(60))
///     .with_threshold(85);
///
/// assert_eq!(config.threshold, 85);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorConfig {
    /// Time between two memory polls (1s to one day)
    pub interval: Duration,
    /// Minimum time between two dispatched notifications (5s to one week)
    pub resend_delay: Duration,
    /// Utilization percentage at or above which a notification is due (1-100)
    pub threshold: u8,
    /// Append the number of earlier notifications to the title
    pub count_in_title: bool,
}

impl MonitorConfig {
    /// Minimum allowed polling interval.
    pub const MIN_INTERVAL: Duration = Duration::from_secs(1);

    /// Minimum allowed delay between notifications.
    pub const MIN_RESEND_DELAY: Duration = Duration::from_secs(5);

    /// Maximum allowed polling interval (one day).
    pub const MAX_INTERVAL: Duration = Duration::from_secs(86_400);

    /// Maximum allowed delay between notifications (one week).
    pub const MAX_RESEND_DELAY: Duration = Duration::from_secs(604_800);

    /// Lowest accepted threshold percentage.
    pub const MIN_THRESHOLD: u8 = 1;

    /// Highest accepted threshold percentage.
    pub const MAX_THRESHOLD: u8 = 100;

    /// Create a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the polling interval.
    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Set the polling interval in whole seconds.
    #[must_use]
    pub fn with_interval_secs(self, secs: u64) -> Self {
        self.with_interval(Duration::from_secs(secs))
    }

    /// Set the resend delay.
    #[must_use]
    pub fn with_resend_delay(mut self, delay: Duration) -> Self {
        self.resend_delay = delay;
        self
    }

    /// Set the resend delay in whole seconds.
    #[must_use]
    pub fn with_resend_delay_secs(self, secs: u64) -> Self {
        self.with_resend_delay(Duration::from_secs(secs))
    }

    /// Set the threshold percentage.
    #[must_use]
    pub fn with_threshold(mut self, threshold: u8) -> Self {
        self.threshold = threshold;
        self
    }

    /// Choose whether titles carry the notification count.
    #[must_use]
    pub fn with_count_in_title(mut self, enabled: bool) -> Self {
        self.count_in_title = enabled;
        self
    }

    /// Check every field against its bounds.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::Config`] naming the first offending field.
    pub fn validate(&self) -> Result<(), MonitorError> {
        if self.interval < Self::MIN_INTERVAL {
            return Err(MonitorError::config_with_value(
                format!("interval must be at least {:?}", Self::MIN_INTERVAL),
                format!("{:?}", self.interval),
            ));
        }

        if self.interval > Self::MAX_INTERVAL {
            return Err(MonitorError::config_with_value(
                format!("interval must be at most {:?}", Self::MAX_INTERVAL),
                format!("{:?}", self.interval),
            ));
        }

        if self.resend_delay < Self::MIN_RESEND_DELAY {
            return Err(MonitorError::config_with_value(
                format!("resend delay must be at least {:?}", Self::MIN_RESEND_DELAY),
                format!("{:?}", self.resend_delay),
            ));
        }

        if self.resend_delay > Self::MAX_RESEND_DELAY {
            return Err(MonitorError::config_with_value(
                format!("resend delay must be at most {:?}", Self::MAX_RESEND_DELAY),
                format!("{:?}", self.resend_delay),
            ));
        }

        if !(Self::MIN_THRESHOLD..=Self::MAX_THRESHOLD).contains(&self.threshold) {
            return Err(MonitorError::config_with_value(
                format!(
                    "threshold must be between {} and {}",
                    Self::MIN_THRESHOLD,
                    Self::MAX_THRESHOLD
                ),
                self.threshold.to_string(),
            ));
        }

        Ok(())
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            resend_delay: Duration::from_secs(30),
            threshold: 80,
            count_in_title: true,
        }
    }
}

/// Capability used by the monitor to deliver a notification.
///
/// Implementations decide how the message reaches the user; the monitor
/// only cares whether delivery succeeded.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver a notification.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::Notify`] if the message could not be delivered.
    async fn notify(&self, title: &str, body: &str) -> Result<(), MonitorError>;

    /// Short identifier used in log output.
    fn name(&self) -> &str {
        "notifier"
    }
}

#[async_trait]
impl<N: Notifier + ?Sized> Notifier for Arc<N> {
    async fn notify(&self, title: &str, body: &str) -> Result<(), MonitorError> {
        (**self).notify(title, body).await
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// Optional callback receiving lifecycle messages when debug mode is on.
pub type DebugSink = Arc<dyn Fn(&str) + Send + Sync>;

/// Formatting helpers for notification text.
pub mod format {
    use super::MemorySample;

    /// Title used for every threshold notification.
    pub const NOTIFICATION_TITLE: &str = "Memory Usage Threshold Reached [notifymem]";

    /// Format a byte count into a human-readable string.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use notifymem_core::format;
    ///
    /// assert_eq!(format::bytes_to_human(512), "512B");
    /// assert_eq!(format::bytes_to_human(1536), "1.5KB");
    /// assert_eq!(format::bytes_to_human(1073741824), "1.0GB");
    /// ```
    #[must_use]
    pub fn bytes_to_human(bytes: u64) -> String {
        const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB", "PB"];
        const THRESHOLD: f64 = 1024.0;

        if bytes == 0 {
            return "0B".to_owned();
        }

        let mut size = bytes as f64;
        let mut unit_idx = 0;

        while size >= THRESHOLD && unit_idx < UNITS.len() - 1 {
            size /= THRESHOLD;
            unit_idx += 1;
        }

        if unit_idx == 0 {
            format!("{size:.0}{}", UNITS[unit_idx])
        } else {
            format!("{size:.1}{}", UNITS[unit_idx])
        }
    }

    /// Format a kB count (as found in `/proc/meminfo`) into a human-readable string.
    #[must_use]
    pub fn kb_to_human(kb: u64) -> String {
        bytes_to_human(kb.saturating_mul(1024))
    }

    /// Build the notification title.
    ///
    /// `previously_sent` is the number of notifications dispatched before this
    /// one. The count is only shown from the second notification on.
    #[must_use]
    pub fn notification_title(previously_sent: u64, count_in_title: bool) -> String {
        if count_in_title && previously_sent > 0 {
            format!("{NOTIFICATION_TITLE} ({previously_sent})")
        } else {
            NOTIFICATION_TITLE.to_owned()
        }
    }

    /// Build the notification body.
    ///
    /// The used/total figures are omitted when no sample is at hand.
    #[must_use]
    pub fn notification_body(utilization: u8, sample: Option<&MemorySample>) -> String {
        match sample {
            Some(sample) => format!(
                "Memory usage at {utilization}% ({} of {})",
                kb_to_human(sample.used()),
                kb_to_human(sample.total)
            ),
            None => format!("Memory usage at {utilization}%"),
        }
    }
}

/// Every way a monitor operation can fail or stop.
#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    /// Invalid construction parameters.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration issue
        message: String,
        /// The invalid configuration value if applicable
        value: Option<String>,
    },

    /// The memory-information source could not be read.
    #[error("I/O error reading {}: {source}", path.display())]
    Io {
        /// The source that failed
        path: PathBuf,
        /// Underlying I/O failure
        #[source]
        source: std::io::Error,
    },

    /// A sample could not be turned into a utilization figure.
    #[error("Invalid data: {message}")]
    InvalidData {
        /// Description of what makes the data invalid
        message: String,
    },

    /// A notification could not be delivered.
    #[error("Notification failed: {message}")]
    Notify {
        /// Description of the delivery failure
        message: String,
        /// Optional source error for chaining
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The run loop was cancelled. Not a failure.
    #[error("Monitor cancelled")]
    Cancelled,
}

impl MonitorError {
    /// Create a new configuration error.
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config {
            message: message.into(),
            value: None,
        }
    }

    /// Create a new configuration error with the invalid value.
    pub fn config_with_value<S: Into<String>, V: Into<String>>(message: S, value: V) -> Self {
        Self::Config {
            message: message.into(),
            value: Some(value.into()),
        }
    }

    /// Create a new I/O error for the given source path.
    pub fn io<P: Into<PathBuf>>(path: P, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create a new invalid data error.
    pub fn invalid_data<S: Into<String>>(message: S) -> Self {
        Self::InvalidData {
            message: message.into(),
        }
    }

    /// Create a new notification error with a simple message.
    pub fn notify<S: Into<String>>(message: S) -> Self {
        Self::Notify {
            message: message.into(),
            source: None,
        }
    }

    /// Create a new notification error with a source error.
    pub fn notify_with_source<S: Into<String>, E>(message: S, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Notify {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Check if this error is the graceful-shutdown signal.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// The kind of error, for structured logging.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Config { .. } => ErrorKind::Config,
            Self::Io { .. } => ErrorKind::Io,
            Self::InvalidData { .. } => ErrorKind::Data,
            Self::Notify { .. } => ErrorKind::Notify,
            Self::Cancelled => ErrorKind::Cancelled,
        }
    }
}

/// Coarse classification of a [`MonitorError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Invalid construction parameters
    Config,
    /// Unreadable memory-information source
    Io,
    /// Sample that cannot produce a utilization figure
    Data,
    /// Failed notification delivery
    Notify,
    /// Graceful shutdown
    Cancelled,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Config => "config",
            Self::Io => "io",
            Self::Data => "data",
            Self::Notify => "notify",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{name}")
    }
}
