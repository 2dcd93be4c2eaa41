//! Logging for Yulan
//!
//! Every line goes to stderr as `[LEVEL] message`, so stdout stays free for
//! printed states and `--json` output.
//!
//! ```rust
//! use yulan::util::logger;
//!
//! logger::init();
//! tracing::info!("revision {}: {}", 1, "rendered");
//! ```

use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer, Registry};

/// Minimum level that reaches stderr
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Per-stage pipeline detail
    Debug,
    /// Published phases
    Info,
    /// Warnings and errors only
    Warn,
}

impl LogLevel {
    /// `-v` selects debug output, otherwise only warnings reach stderr
    pub fn from_verbose(verbose: bool) -> Self {
        if verbose {
            LogLevel::Debug
        } else {
            LogLevel::Warn
        }
    }

    fn filter(self) -> LevelFilter {
        match self {
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Warn => LevelFilter::WARN,
        }
    }
}

/// Install the subscriber at INFO
pub fn init() {
    init_with_level(LogLevel::Info);
}

/// Install the subscriber at `level`
///
/// A second call is a no-op; the first subscriber stays installed.
pub fn init_with_level(level: LogLevel) {
    // [LEVEL] 前缀，无时间、无模块路径、无颜色
    let layer = tracing_subscriber::fmt::layer()
        .without_time()
        .with_target(false)
        .with_ansi(false)
        .with_writer(std::io::stderr)
        .compact()
        .with_filter(level.filter());

    let _ = Registry::default().with(layer).try_init();
}

/// Install the subscriber for the CLI
pub fn init_cli(verbose: bool) {
    init_with_level(LogLevel::from_verbose(verbose));
}

/// Install the subscriber at DEBUG
pub fn init_debug() {
    init_with_level(LogLevel::Debug);
}
