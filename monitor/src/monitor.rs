//! The polling monitor.
//!
//! A [`Monitor`] samples memory on a fixed interval, compares utilization
//! against its threshold and sends a notification when the threshold is
//! reached, at most once per resend delay.

use crate::meminfo::{compute_utilization, MemoryReader, ProcMeminfo};
use notifymem_core::{format, DebugSink, MemorySample, MonitorConfig, MonitorError, Notifier};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Platform predicate used by production builds: only Linux exposes `/proc/meminfo`.
#[must_use]
pub fn is_supported_platform() -> bool {
    cfg!(target_os = "linux")
}

/// Result of a single evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Reading {
    /// The sample the utilization was computed from
    pub sample: MemorySample,
    /// Percentage of memory in use (0-100)
    pub utilization: u8,
    /// Threshold the utilization was compared against
    pub threshold: u8,
    /// Whether `utilization >= threshold`
    pub reached: bool,
}

/// Memory monitor that notifies when utilization crosses a threshold.
///
/// # Examples
///
/// ```rust,no_run
/// use notifymem::{DesktopNotifier, Monitor};
/// use notifymem_core::MonitorConfig;
/// use tokio_util::sync::CancellationToken;
///
/// # async fn run() -> Result<(), notifymem_core::MonitorError> {
/// let mut monitor = Monitor::builder(MonitorConfig::default())
///     .notifier(DesktopNotifier::new())
///     .build()?;
///
/// let cancel = CancellationToken::new();
/// match monitor.run(cancel).await {
///     Err(e) if e.is_cancelled() => Ok(()),
///     other => other,
/// }
/// # }
/// ```
pub struct Monitor {
    config: MonitorConfig,
    last_notified_at: Option<Instant>,
    notifications_sent: u64,
    notifier: Box<dyn Notifier>,
    reader: Box<dyn MemoryReader>,
    debug_sink: Option<DebugSink>,
}

/// Builder for [`Monitor`]. All validation happens in [`MonitorBuilder::build`].
pub struct MonitorBuilder {
    config: MonitorConfig,
    notifier: Option<Box<dyn Notifier>>,
    reader: Box<dyn MemoryReader>,
    debug_sink: Option<DebugSink>,
    platform_check: fn() -> bool,
}

impl MonitorBuilder {
    fn new(config: MonitorConfig) -> Self {
        Self {
            config,
            notifier: None,
            reader: Box::new(ProcMeminfo::default()),
            debug_sink: None,
            platform_check: is_supported_platform,
        }
    }

    /// Set the notifier used to deliver threshold notifications (required).
    #[must_use]
    pub fn notifier(mut self, notifier: impl Notifier + 'static) -> Self {
        self.notifier = Some(Box::new(notifier));
        self
    }

    /// Set the memory source. Defaults to `/proc/meminfo`.
    #[must_use]
    pub fn reader(mut self, reader: impl MemoryReader + 'static) -> Self {
        self.reader = Box::new(reader);
        self
    }

    /// Set a callback receiving lifecycle messages.
    #[must_use]
    pub fn debug_sink(mut self, sink: DebugSink) -> Self {
        self.debug_sink = Some(sink);
        self
    }

    /// Replace the platform predicate checked by [`MonitorBuilder::build`].
    #[must_use]
    pub fn platform_check(mut self, check: fn() -> bool) -> Self {
        self.platform_check = check;
        self
    }

    /// Validate the settings and create the monitor.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::Config`] if the platform is unsupported, no
    /// notifier was set, or the configuration is out of bounds.
    pub fn build(self) -> Result<Monitor, MonitorError> {
        if !(self.platform_check)() {
            return Err(MonitorError::config(format!(
                "notifymem only supports Linux (running on {})",
                std::env::consts::OS
            )));
        }

        let notifier = self
            .notifier
            .ok_or_else(|| MonitorError::config("notifier is required"))?;

        self.config.validate()?;

        Ok(Monitor {
            config: self.config,
            last_notified_at: None,
            notifications_sent: 0,
            notifier,
            reader: self.reader,
            debug_sink: self.debug_sink,
        })
    }
}

impl Monitor {
    /// Start building a monitor with the given configuration.
    #[must_use]
    pub fn builder(config: MonitorConfig) -> MonitorBuilder {
        MonitorBuilder::new(config)
    }

    /// The configuration this monitor was built with.
    #[must_use]
    pub const fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Number of notifications dispatched so far, including failed attempts.
    #[must_use]
    pub const fn notifications_sent(&self) -> u64 {
        self.notifications_sent
    }

    /// When the last notification was dispatched, if ever.
    #[must_use]
    pub const fn last_notified_at(&self) -> Option<Instant> {
        self.last_notified_at
    }

    fn debug(&self, msg: &str) {
        tracing::debug!("{msg}");
        if let Some(sink) = &self.debug_sink {
            sink(msg);
        }
    }

    /// Capture a fresh sample and compare its utilization to the threshold.
    ///
    /// # Errors
    ///
    /// Propagates reader errors ([`MonitorError::Io`]) and zero-total samples
    /// ([`MonitorError::InvalidData`]).
    pub fn check_threshold(&self) -> Result<Reading, MonitorError> {
        let sample = self.reader.read()?;
        let utilization = compute_utilization(&sample)?;

        Ok(Reading {
            sample,
            utilization,
            threshold: self.config.threshold,
            reached: utilization >= self.config.threshold,
        })
    }

    /// Send a notification for `utilization` unless the resend delay is still running.
    ///
    /// Returns `Ok(true)` if the notifier was invoked and `Ok(false)` if the
    /// notification was suppressed.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::Notify`] if delivery failed. The attempt still
    /// counts towards the resend delay.
    pub async fn notify(&mut self, utilization: u8) -> Result<bool, MonitorError> {
        self.send(utilization, None).await
    }

    async fn send(
        &mut self,
        utilization: u8,
        sample: Option<&MemorySample>,
    ) -> Result<bool, MonitorError> {
        let now = Instant::now();
        if let Some(last) = self.last_notified_at {
            if now.duration_since(last) < self.config.resend_delay {
                self.debug("resend delay not reached");
                return Ok(false);
            }
        }

        self.debug("sending notification");
        tracing::info!(
            utilization,
            threshold = self.config.threshold,
            notifier = self.notifier.name(),
            "notifying at {utilization}% memory usage"
        );

        let title = format::notification_title(self.notifications_sent, self.config.count_in_title);
        let body = format::notification_body(utilization, sample);

        self.last_notified_at = Some(now);
        self.notifications_sent += 1;

        self.notifier.notify(&title, &body).await?;
        Ok(true)
    }

    /// Evaluate once and send a notification regardless of the threshold.
    ///
    /// Used to check the notification path end to end. The resend delay
    /// still applies.
    ///
    /// # Errors
    ///
    /// Returns any evaluation or delivery error.
    pub async fn probe(&mut self) -> Result<Reading, MonitorError> {
        self.debug("running test");
        let reading = self.check_threshold()?;
        self.send(reading.utilization, Some(&reading.sample)).await?;
        Ok(reading)
    }

    async fn poll(&mut self) -> Result<(), MonitorError> {
        let reading = self.check_threshold()?;
        self.debug(&format!("memory usage: {}%", reading.utilization));

        if reading.reached {
            tracing::warn!(
                utilization = reading.utilization,
                threshold = reading.threshold,
                "memory usage above threshold"
            );
            self.send(reading.utilization, Some(&reading.sample)).await?;
        }

        Ok(())
    }

    /// Poll until cancelled or until an evaluation or notification fails.
    ///
    /// The first poll happens one interval after the call. Cancellation wins
    /// over a tick that becomes ready at the same time, but a poll that is
    /// already running finishes first.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::Cancelled`] when `cancel` fires; callers should
    /// treat it as a clean shutdown. Any other error is fatal for this run.
    pub async fn run(&mut self, cancel: CancellationToken) -> Result<(), MonitorError> {
        self.debug("starting monitor");

        let interval = self.config.interval;
        let mut ticker = time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    self.debug("stopping monitor");
                    return Err(MonitorError::Cancelled);
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.poll().await {
                        tracing::error!(kind = %e.kind(), error = %e, "monitor stopped");
                        return Err(e);
                    }
                }
            }
        }
    }
}

impl fmt::Debug for Monitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Monitor")
            .field("config", &self.config)
            .field("last_notified_at", &self.last_notified_at)
            .field("notifications_sent", &self.notifications_sent)
            .field("notifier", &self.notifier.name())
            .field("debug_sink", &self.debug_sink.is_some())
            .finish_non_exhaustive()
    }
}

/// Convenience for building a [`DebugSink`] from a closure.
pub fn debug_sink(f: impl Fn(&str) + Send + Sync + 'static) -> DebugSink {
    Arc::new(f)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Clone, Default)]
    struct RecordingNotifier {
        calls: Arc<Mutex<Vec<(String, String)>>>,
    }

    impl RecordingNotifier {
        fn calls(&self) -> Vec<(String, String)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn notify(&self, title: &str, body: &str) -> Result<(), MonitorError> {
            self.calls
                .lock()
                .unwrap()
                .push((title.to_owned(), body.to_owned()));
            Ok(())
        }
    }

    #[derive(Clone, Default)]
    struct FailingNotifier {
        attempts: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Notifier for FailingNotifier {
        async fn notify(&self, _title: &str, _body: &str) -> Result<(), MonitorError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(MonitorError::notify("display unavailable"))
        }
    }

    /// Reader returning a fixed sample and counting reads.
    #[derive(Clone)]
    struct FixedReader {
        sample: MemorySample,
        reads: Arc<AtomicUsize>,
    }

    impl FixedReader {
        fn new(total: u64, available: u64) -> Self {
            Self {
                sample: MemorySample::new(total, available),
                reads: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    impl MemoryReader for FixedReader {
        fn read(&self) -> Result<MemorySample, MonitorError> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            Ok(self.sample)
        }
    }

    struct BrokenReader;

    impl MemoryReader for BrokenReader {
        fn read(&self) -> Result<MemorySample, MonitorError> {
            Err(MonitorError::io(
                "/proc/meminfo",
                std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
            ))
        }
    }

    fn config() -> MonitorConfig {
        MonitorConfig::new()
            .with_interval_secs(2)
            .with_resend_delay_secs(30)
            .with_threshold(80)
    }

    fn monitor_with(
        config: MonitorConfig,
        reader: impl MemoryReader + 'static,
        notifier: impl Notifier + 'static,
    ) -> Monitor {
        Monitor::builder(config)
            .notifier(notifier)
            .reader(reader)
            .platform_check(|| true)
            .build()
            .unwrap()
    }

    fn recording_sink() -> (DebugSink, Arc<Mutex<Vec<String>>>) {
        let messages = Arc::new(Mutex::new(Vec::new()));
        let captured = Arc::clone(&messages);
        let sink = debug_sink(move |msg| captured.lock().unwrap().push(msg.to_owned()));
        (sink, messages)
    }

    #[test]
    fn test_build_valid_config() {
        let monitor = monitor_with(config(), FixedReader::new(100, 50), RecordingNotifier::default());

        assert_eq!(monitor.config(), &config());
        assert_eq!(monitor.notifications_sent(), 0);
        assert!(monitor.last_notified_at().is_none());
    }

    #[test]
    fn test_build_rejects_invalid_settings() {
        let invalid = [
            config().with_interval(Duration::ZERO),
            config().with_interval(Duration::from_millis(500)),
            config().with_resend_delay(Duration::ZERO),
            config().with_resend_delay_secs(4),
            config().with_interval(MonitorConfig::MAX_INTERVAL + Duration::from_secs(1)),
            config().with_resend_delay_secs(u64::MAX),
            config().with_threshold(0),
            config().with_threshold(101),
        ];

        for config in invalid {
            let err = Monitor::builder(config.clone())
                .notifier(RecordingNotifier::default())
                .platform_check(|| true)
                .build()
                .unwrap_err();
            assert!(
                matches!(err, MonitorError::Config { .. }),
                "expected config error for {config:?}, got {err}"
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_build_rejects_interval_too_large_for_timer() {
        let err = Monitor::builder(config().with_interval_secs(u64::MAX))
            .notifier(RecordingNotifier::default())
            .platform_check(|| true)
            .build()
            .unwrap_err();
        assert!(matches!(err, MonitorError::Config { .. }));

        // The largest accepted interval still schedules and cancels cleanly
        let mut monitor = monitor_with(
            config().with_interval(MonitorConfig::MAX_INTERVAL),
            FixedReader::new(100, 50),
            RecordingNotifier::default(),
        );
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(monitor.run(cancel).await.unwrap_err().is_cancelled());
    }

    #[test]
    fn test_build_requires_notifier() {
        let err = Monitor::builder(config())
            .platform_check(|| true)
            .build()
            .unwrap_err();

        assert!(matches!(err, MonitorError::Config { .. }));
        assert!(err.to_string().contains("notifier is required"));
    }

    #[test]
    fn test_build_rejects_unsupported_platform() {
        let err = Monitor::builder(config())
            .notifier(RecordingNotifier::default())
            .platform_check(|| false)
            .build()
            .unwrap_err();

        assert!(err.to_string().contains("only supports Linux"));
    }

    #[test]
    fn test_check_threshold_boundary() {
        let notifier = RecordingNotifier::default();

        let at = monitor_with(config(), FixedReader::new(100, 20), notifier.clone());
        let reading = at.check_threshold().unwrap();
        assert_eq!(reading.utilization, 80);
        assert!(reading.reached);

        let below = monitor_with(config(), FixedReader::new(100, 21), notifier);
        let reading = below.check_threshold().unwrap();
        assert_eq!(reading.utilization, 79);
        assert!(!reading.reached);
        assert_eq!(reading.threshold, 80);
    }

    #[test]
    fn test_check_threshold_is_idempotent() {
        let reader = FixedReader::new(16_384_000, 4_000_000);
        let monitor = monitor_with(config(), reader.clone(), RecordingNotifier::default());

        let first = monitor.check_threshold().unwrap();
        let second = monitor.check_threshold().unwrap();

        assert_eq!(first, second);
        // Every evaluation reads a fresh sample
        assert_eq!(reader.reads.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_check_threshold_propagates_errors() {
        let monitor = monitor_with(config(), FixedReader::new(0, 0), RecordingNotifier::default());
        assert!(matches!(
            monitor.check_threshold().unwrap_err(),
            MonitorError::InvalidData { .. }
        ));

        let monitor = monitor_with(config(), BrokenReader, RecordingNotifier::default());
        assert!(matches!(
            monitor.check_threshold().unwrap_err(),
            MonitorError::Io { .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_notify_respects_resend_delay() {
        let notifier = RecordingNotifier::default();
        let mut monitor = monitor_with(config(), FixedReader::new(100, 10), notifier.clone());

        assert!(monitor.notify(90).await.unwrap());
        time::advance(Duration::from_secs(29)).await;
        assert!(!monitor.notify(91).await.unwrap());
        assert_eq!(notifier.calls().len(), 1);
        assert_eq!(monitor.notifications_sent(), 1);

        time::advance(Duration::from_secs(1)).await;
        assert!(monitor.notify(92).await.unwrap());

        let calls = notifier.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].0, format::NOTIFICATION_TITLE);
        assert_eq!(calls[0].1, "Memory usage at 90%");
        assert_eq!(calls[1].0, "Memory Usage Threshold Reached [notifymem] (1)");
        assert_eq!(calls[1].1, "Memory usage at 92%");
    }

    #[tokio::test(start_paused = true)]
    async fn test_notify_without_count_in_title() {
        let notifier = RecordingNotifier::default();
        let config = config().with_resend_delay_secs(5).with_count_in_title(false);
        let mut monitor = monitor_with(config, FixedReader::new(100, 10), notifier.clone());

        monitor.notify(90).await.unwrap();
        time::advance(Duration::from_secs(5)).await;
        monitor.notify(90).await.unwrap();

        assert!(notifier
            .calls()
            .iter()
            .all(|(title, _)| title == format::NOTIFICATION_TITLE));
    }

    #[tokio::test(start_paused = true)]
    async fn test_notify_failure_still_starts_resend_delay() {
        let notifier = FailingNotifier::default();
        let mut monitor = monitor_with(config(), FixedReader::new(100, 10), notifier.clone());

        let err = monitor.notify(95).await.unwrap_err();
        assert!(matches!(err, MonitorError::Notify { .. }));
        assert_eq!(monitor.notifications_sent(), 1);
        assert!(monitor.last_notified_at().is_some());

        // An immediate retry is suppressed rather than hitting the notifier again
        assert!(!monitor.notify(95).await.unwrap());
        assert_eq!(notifier.attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_debug_sink_receives_lifecycle_messages() {
        let (sink, messages) = recording_sink();
        let mut monitor = Monitor::builder(config())
            .notifier(RecordingNotifier::default())
            .reader(FixedReader::new(100, 10))
            .debug_sink(sink)
            .platform_check(|| true)
            .build()
            .unwrap();

        monitor.notify(90).await.unwrap();
        monitor.notify(90).await.unwrap();

        assert_eq!(
            *messages.lock().unwrap(),
            vec!["sending notification", "resend delay not reached"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_notifies_below_threshold() {
        let notifier = RecordingNotifier::default();
        let mut monitor = monitor_with(config(), FixedReader::new(1024 * 1024, 768 * 1024), notifier.clone());

        let reading = monitor.probe().await.unwrap();

        assert_eq!(reading.utilization, 25);
        assert!(!reading.reached);
        assert_eq!(
            notifier.calls(),
            vec![(
                format::NOTIFICATION_TITLE.to_owned(),
                "Memory usage at 25% (256.0MB of 1.0GB)".to_owned()
            )]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_cancelled_before_first_tick() {
        let notifier = RecordingNotifier::default();
        let reader = FixedReader::new(100, 1);
        let (sink, messages) = recording_sink();
        let mut monitor = Monitor::builder(config())
            .notifier(notifier.clone())
            .reader(reader.clone())
            .debug_sink(sink)
            .platform_check(|| true)
            .build()
            .unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = monitor.run(cancel).await.unwrap_err();

        assert!(err.is_cancelled());
        assert_eq!(monitor.notifications_sent(), 0);
        assert!(notifier.calls().is_empty());
        assert_eq!(reader.reads.load(Ordering::SeqCst), 0);
        assert_eq!(
            *messages.lock().unwrap(),
            vec!["starting monitor", "stopping monitor"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_zero_total_memory() {
        let reader = FixedReader::new(0, 0);
        let notifier = RecordingNotifier::default();
        let mut monitor = monitor_with(config(), reader.clone(), notifier.clone());

        let err = monitor.run(CancellationToken::new()).await.unwrap_err();

        assert!(matches!(err, MonitorError::InvalidData { .. }));
        assert_eq!(reader.reads.load(Ordering::SeqCst), 1);
        assert!(notifier.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_read_error() {
        let mut monitor = monitor_with(config(), BrokenReader, RecordingNotifier::default());

        let err = monitor.run(CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, MonitorError::Io { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_notify_error() {
        let notifier = FailingNotifier::default();
        let mut monitor = monitor_with(config(), FixedReader::new(100, 5), notifier.clone());

        let err = monitor.run(CancellationToken::new()).await.unwrap_err();

        assert!(matches!(err, MonitorError::Notify { .. }));
        assert_eq!(notifier.attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_rate_limits_notifications() {
        let notifier = RecordingNotifier::default();
        let reader = FixedReader::new(100, 10);
        let config = config().with_resend_delay_secs(5);
        let mut monitor = monitor_with(config, reader.clone(), notifier.clone());

        let cancel = CancellationToken::new();
        let handle = tokio::spawn({
            let cancel = cancel.clone();
            async move {
                let result = monitor.run(cancel).await;
                (monitor, result)
            }
        });

        // Polls at 2s, 4s, 6s, 8s and 10s; sends at 2s and 8s
        time::sleep(Duration::from_secs(11)).await;
        cancel.cancel();

        let (monitor, result) = handle.await.unwrap();
        assert!(result.unwrap_err().is_cancelled());
        assert_eq!(reader.reads.load(Ordering::SeqCst), 5);
        assert_eq!(monitor.notifications_sent(), 2);

        let calls = notifier.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].0, "Memory Usage Threshold Reached [notifymem] (1)");
        assert!(calls[0].1.starts_with("Memory usage at 90%"));
    }
}
