use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::Level;
use tracing_subscriber::filter::FilterFn;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::Layer;

/// Logging arguments shared by every Hermod binary.
#[derive(Debug, clap::Args)]
pub struct LogArgs {
    /// The log verbosity. Can be one of trace|debug|info|warn|error|off
    #[arg(
        long = "log.level",
        default_value_t = LogLevel::Info,
        group = "logging",
        ignore_case = true,
        value_enum,
        global = true
    )]
    pub level: LogLevel,

    #[arg(long = "log.format", value_enum, global = true, group = "logging")]
    pub format: Option<LogFormat>,

    /// Keep 1 in every N warn/error events; all other levels pass
    /// through unsampled. Overridden by `HERMOD_LOG_SAMPLE_N` if set.
    #[arg(long = "log.sample-n", default_value_t = 1, global = true)]
    pub sample_n: u64,
}

#[derive(Debug, clap::ValueEnum, Clone, Copy)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl ToString for LogLevel {
    fn to_string(&self) -> String {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
        .to_string()
    }
}

/// The format for logs.
#[derive(Debug, clap::ValueEnum, Clone, Copy)]
pub enum LogFormat {
    /// JSON lines on stderr; the default for non-interactive runs.
    Json,
    /// Plain text with no colors.
    Text,
    /// Plain text with colors for interactive terminals.
    Color,
}

fn default_log_format() -> LogFormat {
    if atty::is(atty::Stream::Stderr) {
        LogFormat::Color
    } else {
        LogFormat::Json
    }
}

fn sample_n_from_env(args: &LogArgs) -> u64 {
    std::env::var("HERMOD_LOG_SAMPLE_N")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(args.sample_n)
        .max(1)
}

/// A filter that keeps every event more verbose than `WARN`, and 1-in-N
/// of `WARN`/`ERROR` events (spec's `HERMOD_LOG_SAMPLE_N` environment
/// toggle). `N == 1` disables sampling entirely.
fn sampling_filter(sample_n: u64) -> FilterFn<impl Fn(&tracing::Metadata<'_>) -> bool> {
    let counter = Arc::new(AtomicU64::new(0));
    FilterFn::new(move |metadata| {
        if sample_n <= 1 || *metadata.level() > Level::WARN {
            return true;
        }
        let seen = counter.fetch_add(1, Ordering::Relaxed);
        seen % sample_n == 0
    })
}

/// Initializes logging for a Hermod binary. Panics if called twice.
pub fn init_logging(args: &LogArgs) {
    let sample_n = sample_n_from_env(args);
    let filter = sampling_filter(sample_n);
    let env_filter = tracing_subscriber::EnvFilter::new(args.level.to_string());

    let base = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .with_span_events(tracing_subscriber::fmt::format::FmtSpan::CLOSE)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_target(false);

    match args.format.unwrap_or_else(default_log_format) {
        LogFormat::Json => {
            let layer = base
                .json()
                .flatten_event(true)
                .with_current_span(true)
                .with_span_list(false)
                .with_filter(filter);
            tracing_subscriber::registry().with(env_filter).with(layer).init();
        }
        LogFormat::Text => {
            let layer = base.compact().with_ansi(false).with_filter(filter);
            tracing_subscriber::registry().with(env_filter).with(layer).init();
        }
        LogFormat::Color => {
            let layer = base.compact().with_ansi(true).with_filter(filter);
            tracing_subscriber::registry().with(env_filter).with(layer).init();
        }
    }
}
