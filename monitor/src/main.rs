//! notifymem: desktop notifications when memory usage gets high.
//!
//! Polls `/proc/meminfo` and notifies when utilization reaches the threshold.

use anyhow::Context;
use clap::{Parser, ValueEnum};
use notifymem::{debug_sink, DesktopNotifier, MemoryReader, Monitor, ProcMeminfo, TextNotifier};
use notifymem_core::{DebugSink, MonitorConfig};
use std::io::{self, Write};
use std::process;
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Version injected at build time, falling back to the package version.
const VERSION: &str = match option_env!("NOTIFYMEM_BUILD_VERSION") {
    Some(version) => version,
    None => env!("CARGO_PKG_VERSION"),
};

/// How notifications are delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum NotifierKind {
    /// Desktop notification through notify-send
    Desktop,
    /// One line per notification on stdout
    Stdout,
}

/// Command-line arguments for the memory notifier.
#[derive(Parser)]
#[command(name = "notifymem")]
#[command(about = "Notify when memory usage crosses a threshold")]
#[command(version = VERSION)]
#[command(author)]
struct Args {
    /// Print lifecycle messages to stdout
    #[arg(long)]
    debug: bool,

    /// Interval between memory checks in seconds (1-86400)
    #[arg(long, default_value = "2", value_parser = validate_interval)]
    interval: u64,

    /// Delay between notifications being sent in seconds (5-604800)
    #[arg(long, default_value = "30", value_parser = validate_delay)]
    delay: u64,

    /// Memory threshold as a percentage (1-100)
    #[arg(long, default_value = "80", value_parser = validate_percentage)]
    threshold: u8,

    /// Notification delivery method
    #[arg(long, value_enum, default_value_t = NotifierKind::Desktop)]
    notifier: NotifierKind,

    /// Do not append the notification count to titles
    #[arg(long)]
    no_count: bool,

    /// Print the current reading as JSON and exit
    #[arg(long)]
    once: bool,

    /// Send a test notification with the current reading and exit
    #[arg(long, conflicts_with = "once")]
    test: bool,

    /// Check that memory statistics are readable and exit
    #[arg(long)]
    check: bool,
}

/// Validate that the interval is between one second and one day.
fn validate_interval(s: &str) -> Result<u64, String> {
    let secs = s
        .parse::<u64>()
        .map_err(|_| "Interval must be a positive integer".to_owned())?;

    if secs < MonitorConfig::MIN_INTERVAL.as_secs() {
        return Err(format!(
            "Interval must be at least {}s",
            MonitorConfig::MIN_INTERVAL.as_secs()
        ));
    }

    if secs > MonitorConfig::MAX_INTERVAL.as_secs() {
        return Err(format!(
            "Interval must be at most {}s",
            MonitorConfig::MAX_INTERVAL.as_secs()
        ));
    }

    Ok(secs)
}

/// Validate that the resend delay is between five seconds and one week.
fn validate_delay(s: &str) -> Result<u64, String> {
    let secs = s
        .parse::<u64>()
        .map_err(|_| "Delay must be a positive integer".to_owned())?;

    if secs < MonitorConfig::MIN_RESEND_DELAY.as_secs() {
        return Err(format!(
            "Delay must be at least {}s",
            MonitorConfig::MIN_RESEND_DELAY.as_secs()
        ));
    }

    if secs > MonitorConfig::MAX_RESEND_DELAY.as_secs() {
        return Err(format!(
            "Delay must be at most {}s",
            MonitorConfig::MAX_RESEND_DELAY.as_secs()
        ));
    }

    Ok(secs)
}

/// Validate that the percentage is between 1 and 100.
fn validate_percentage(s: &str) -> Result<u8, String> {
    let percentage = s
        .parse::<u8>()
        .map_err(|_| "Percentage must be a number between 1-100".to_owned())?;

    if !(MonitorConfig::MIN_THRESHOLD..=MonitorConfig::MAX_THRESHOLD).contains(&percentage) {
        return Err("Percentage must be between 1-100".to_owned());
    }

    Ok(percentage)
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "notifymem=info".into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Lifecycle messages go to stdout with `--debug`, whatever `RUST_LOG` says.
fn debug_sink_for(debug: bool, out: impl Write + Send + 'static) -> Option<DebugSink> {
    if !debug {
        return None;
    }

    let out = Mutex::new(out);
    Some(debug_sink(move |msg| {
        if let Ok(mut out) = out.lock() {
            let _ = writeln!(out, "[debug] {msg}").and_then(|()| out.flush());
        }
    }))
}

/// Resolve once Ctrl-C or SIGTERM is received.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("received SIGINT, stopping"),
        () = terminate => tracing::info!("received SIGTERM, stopping"),
    }
}

async fn run(args: Args, version: &str) -> anyhow::Result<()> {
    tracing::info!(version, "running notifymem");

    if args.check {
        ProcMeminfo::default()
            .check_availability()
            .context("memory statistics are not available")?;
        println!("Memory statistics are available");
        return Ok(());
    }

    let config = MonitorConfig::new()
        .with_interval_secs(args.interval)
        .with_resend_delay_secs(args.delay)
        .with_threshold(args.threshold)
        .with_count_in_title(!args.no_count);

    let mut builder = Monitor::builder(config);
    if let Some(sink) = debug_sink_for(args.debug, io::stdout()) {
        builder = builder.debug_sink(sink);
    }
    let builder = match args.notifier {
        NotifierKind::Desktop => builder.notifier(DesktopNotifier::new()),
        NotifierKind::Stdout => builder.notifier(TextNotifier::stdout()),
    };
    let mut monitor = builder.build().context("failed to create monitor")?;
    tracing::debug!(?monitor, "monitor created");

    if args.once {
        let reading = monitor.check_threshold()?;
        println!("{}", serde_json::to_string(&reading)?);
        return Ok(());
    }

    if args.test {
        let reading = monitor.probe().await.context("test notification failed")?;
        println!("Test notification sent at {}% memory usage", reading.utilization);
        return Ok(());
    }

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            shutdown_signal().await;
            cancel.cancel();
        }
    });

    match monitor.run(cancel).await {
        Err(e) if e.is_cancelled() => {
            tracing::info!(
                notifications = monitor.notifications_sent(),
                "monitor stopped"
            );
            Ok(())
        }
        result => result.context("monitor failed"),
    }
}

/// Main entry point for the memory notifier.
#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_tracing();

    if let Err(e) = run(args, VERSION).await {
        eprintln!("[error] {e:#}");
        process::exit(1);
    }
}
