//! Notification delivery.
//!
//! Two [`Notifier`] implementations: desktop notifications through
//! `notify-send`, and a plain text sink (stdout by default).

use async_trait::async_trait;
use notifymem_core::{MonitorError, Notifier};
use std::io::{self, Write};
use std::sync::Mutex;
use tokio::process::Command;

/// Desktop notifications via the freedesktop `notify-send` tool.
#[derive(Debug, Clone)]
pub struct DesktopNotifier {
    program: String,
    app_name: String,
    urgency: Urgency,
}

/// Urgency level passed to `notify-send`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Urgency {
    Low,
    #[default]
    Normal,
    Critical,
}

impl Urgency {
    fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::Critical => "critical",
        }
    }
}

impl DesktopNotifier {
    /// Name of the notification tool looked up on `PATH`.
    pub const DEFAULT_PROGRAM: &'static str = "notify-send";

    /// Create a notifier with the default program and app name.
    #[must_use]
    pub fn new() -> Self {
        Self {
            program: Self::DEFAULT_PROGRAM.to_owned(),
            app_name: "notifymem".to_owned(),
            urgency: Urgency::default(),
        }
    }

    /// Use a different notification program (useful for testing).
    #[must_use]
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// Set the urgency level.
    #[must_use]
    pub fn with_urgency(mut self, urgency: Urgency) -> Self {
        self.urgency = urgency;
        self
    }

    fn command(&self, title: &str, body: &str) -> Command {
        let mut command = Command::new(&self.program);
        command
            .arg(format!("--urgency={}", self.urgency.as_str()))
            .arg(format!("--app-name={}", self.app_name))
            .arg(title)
            .arg(body);
        command
    }
}

impl Default for DesktopNotifier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Notifier for DesktopNotifier {
    async fn notify(&self, title: &str, body: &str) -> Result<(), MonitorError> {
        let output = self
            .command(title, body)
            .output()
            .await
            .map_err(|e| {
                MonitorError::notify_with_source(format!("failed to run {}", self.program), e)
            })?;

        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(MonitorError::notify(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )))
        }
    }

    fn name(&self) -> &str {
        "desktop"
    }
}

/// Notifier that writes one line per notification to a text sink.
#[derive(Debug)]
pub struct TextNotifier<W> {
    sink: Mutex<W>,
}

impl TextNotifier<io::Stdout> {
    /// Write notifications to standard output.
    #[must_use]
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write + Send> TextNotifier<W> {
    /// Write notifications to the given sink.
    pub fn new(sink: W) -> Self {
        Self {
            sink: Mutex::new(sink),
        }
    }

    /// Recover the sink.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::Notify`] if a writer panicked while holding the sink.
    pub fn into_inner(self) -> Result<W, MonitorError> {
        self.sink
            .into_inner()
            .map_err(|_| MonitorError::notify("text sink poisoned"))
    }
}

#[async_trait]
impl<W: Write + Send> Notifier for TextNotifier<W> {
    async fn notify(&self, title: &str, body: &str) -> Result<(), MonitorError> {
        let mut sink = self
            .sink
            .lock()
            .map_err(|_| MonitorError::notify("text sink poisoned"))?;

        writeln!(sink, "notify: {title} {body}")
            .and_then(|()| sink.flush())
            .map_err(|e| MonitorError::notify_with_source("failed to write notification", e))
    }

    fn name(&self) -> &str {
        "text"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_text_notifier_writes_line() {
        let notifier = TextNotifier::new(Vec::new());

        notifier.notify("Title", "Body").await.unwrap();
        notifier.notify("Again", "More").await.unwrap();

        let written = String::from_utf8(notifier.into_inner().unwrap()).unwrap();
        assert_eq!(written, "notify: Title Body\nnotify: Again More\n");
    }

    struct BrokenSink;

    impl Write for BrokenSink {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_text_notifier_write_failure() {
        let notifier = TextNotifier::new(BrokenSink);

        let err = notifier.notify("Title", "Body").await.unwrap_err();
        assert!(matches!(err, MonitorError::Notify { source: Some(_), .. }));
    }

    #[test]
    fn test_desktop_command_arguments() {
        let notifier = DesktopNotifier::new().with_urgency(Urgency::Critical);
        let command = notifier.command("Title", "Body");
        let std_command = command.as_std();

        assert_eq!(std_command.get_program(), "notify-send");
        let args: Vec<_> = std_command
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            args,
            vec!["--urgency=critical", "--app-name=notifymem", "Title", "Body"]
        );
    }

    #[tokio::test]
    async fn test_desktop_notifier_missing_program() {
        let notifier = DesktopNotifier::new().with_program("notifymem-no-such-program");

        let err = notifier.notify("Title", "Body").await.unwrap_err();
        assert!(matches!(err, MonitorError::Notify { .. }));
        assert!(err.to_string().contains("notifymem-no-such-program"));
    }
}
