//! Structured logging setup.
//!
//! Console output goes to stderr so stdout stays free for reports. It is
//! either human-readable or JSON lines. An optional log directory adds a
//! daily-rotating JSON file via `tracing-appender`. `RUST_LOG` overrides the
//! level passed in.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Console rendering for [`init_logging`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Install the global subscriber. Call once, first thing in `main`.
///
/// `module_name` becomes the log file prefix. The file layer is always JSON
/// regardless of `format`, so audit trails keep their structured fields.
pub fn init_logging(log_level: &str, log_dir: Option<&str>, module_name: &str, format: LogFormat) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let (pretty_layer, json_layer) = match format {
        LogFormat::Pretty => (Some(fmt::layer().with_writer(std::io::stderr).with_target(true).with_ansi(true)), None),
        LogFormat::Json => (None, Some(fmt::layer().json().with_writer(std::io::stderr).with_target(true))),
    };

    let file_layer = log_dir.map(|dir| {
        let file_appender = tracing_appender::rolling::daily(dir, module_name);
        fmt::layer()
            .json()
            .with_writer(file_appender)
            .with_ansi(false)
            .with_target(true)
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(pretty_layer)
        .with(json_layer)
        .with(file_layer)
        .init();
}
