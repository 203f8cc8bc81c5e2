//! Tracing subscriber setup.

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;
use warden_config::LoggingConfig;

const VERBOSE_FILTER: &str = "warden=debug,warden_session=debug,warden_server=debug,warden_config=debug,info";

const FILE_FILTER: &str = "warden=trace,warden_session=trace,warden_server=trace,info";

/// Install the global subscriber.
///
/// Console output is human-readable unless `json` is set. With a log
/// directory, a daily-rotated JSON file is written as well; the returned
/// guard must live until exit so buffered lines are flushed.
pub fn init(config: &LoggingConfig, verbose: bool) -> Option<WorkerGuard> {
    let console_filter = if verbose {
        EnvFilter::new(VERBOSE_FILTER)
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.filter))
    };

    let (file_layer, guard) = match &config.directory {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "warden.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .json()
                .with_writer(writer)
                .with_filter(EnvFilter::new(FILE_FILTER));
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let (pretty, json) = if config.json {
        (
            None,
            Some(tracing_subscriber::fmt::layer().json().with_filter(console_filter)),
        )
    } else {
        (
            Some(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_filter(console_filter),
            ),
            None,
        )
    };

    tracing_subscriber::registry()
        .with(pretty)
        .with(json)
        .with(file_layer)
        .init();

    guard
}
