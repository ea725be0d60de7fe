use std::env;
use std::io;

use encore_service::config::{Config, LogFormat};
use encore_service::logging::init_json_logging;
use sentry::integrations::tracing::EventFilter;
use tracing::Level;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::prelude::*;
use tracing_subscriber::util::SubscriberInitExt;

/// The filter used when `RUST_LOG` is not set.
///
/// Encore's own crates log at `level`, everything else at most at `WARN`.
fn default_filter(level: LevelFilter) -> String {
    if level == LevelFilter::OFF {
        return "off".to_owned();
    }
    let dependencies = level.min(LevelFilter::WARN);
    format!("{dependencies},encore={level},encore_service={level}")
}

/// Initializes logging to `stderr`, keeping `stdout` free for reports.
///
/// `RUST_LOG` takes precedence over the configured level. With
/// [`enable_backtraces`](encore_service::config::Logging::enable_backtraces), `RUST_BACKTRACE` is
/// set as well.
///
/// # Safety
/// This function uses [`std::env::set_var`], and must be called while the process is still
/// single-threaded.
pub unsafe fn init_logging(config: &Config) {
    if config.logging.enable_backtraces {
        // SAFETY: see the function's safety requirements.
        unsafe { env::set_var("RUST_BACKTRACE", "1") };
    }

    let filter = env::var("RUST_LOG").unwrap_or_else(|_| default_filter(config.logging.level));

    let pretty = match config.logging.format {
        LogFormat::Json => return init_json_logging(&filter, io::stderr),
        LogFormat::Auto => console::user_attended_stderr(),
        LogFormat::Pretty => true,
        LogFormat::Simplified => false,
    };

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(io::stderr)
        .with_timer(UtcTime::rfc_3339());
    let fmt_layer = if pretty {
        fmt_layer.pretty().boxed()
    } else {
        fmt_layer.compact().with_ansi(false).boxed()
    };

    // Errors become Sentry events, warnings and info are attached to them as logs.
    let sentry_layer =
        sentry::integrations::tracing::layer().event_filter(|metadata| match *metadata.level() {
            Level::ERROR => EventFilter::Event | EventFilter::Log,
            Level::WARN | Level::INFO => EventFilter::Log,
            Level::DEBUG | Level::TRACE => EventFilter::Ignore,
        });

    tracing_subscriber::registry()
        .with(fmt_layer.with_filter(EnvFilter::new(&filter)))
        .with(sentry_layer)
        .init();
}

/// Reports a fatal error through the logger, or on `stderr` before logging is up.
pub fn ensure_log_error(error: &anyhow::Error) {
    if tracing::enabled!(Level::ERROR) {
        tracing::error!("{error:?}");
    } else {
        eprintln!("{error:?}");
    }
}
