//! Subscriber setup for the binary.

use std::path::Path;
use tracing_appender::non_blocking::NonBlocking;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

const LOG_FILE: &str = "iepos.log";

/// Console logging plus, when `config.dir` is set and writable, a daily
/// rolling file. `RUST_LOG` overrides the configured level.
pub fn init_logging(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},iepos=debug", config.level)));

    let file_layer = config.dir.as_deref().and_then(file_writer).map(|writer| {
        tracing_subscriber::fmt::layer()
            .with_writer(writer)
            .with_ansi(false)
            .with_target(true)
    });
    let file_logging_enabled = file_layer.is_some();

    let (plain, json) = if config.json {
        (
            None,
            Some(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(true)
                    .with_current_span(false),
            ),
        )
    } else {
        (
            Some(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            ),
            None,
        )
    };

    let initialized = tracing_subscriber::registry()
        .with(filter)
        .with(plain)
        .with(json)
        .with(file_layer)
        .try_init()
        .is_ok();

    if initialized && file_logging_enabled {
        if let Some(dir) = &config.dir {
            eprintln!("Logging to: {}/{}", dir.display(), LOG_FILE);
        }
    }
}

fn file_writer(dir: &Path) -> Option<NonBlocking> {
    // rolling::daily aborts if the first file cannot be created
    if let Err(e) = std::fs::create_dir_all(dir) {
        eprintln!(
            "Warning: Could not create log directory {} ({}), file logging disabled",
            dir.display(),
            e
        );
        return None;
    }
    let probe = dir.join(".iepos_write_test");
    if let Err(e) = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&probe)
    {
        eprintln!(
            "Warning: Could not write to log directory {} ({}), file logging disabled",
            dir.display(),
            e
        );
        return None;
    }
    let _ = std::fs::remove_file(&probe);

    let appender = tracing_appender::rolling::daily(dir, LOG_FILE);
    let (non_blocking, guard) = tracing_appender::non_blocking(appender);
    // the process logs until exit
    Box::leak(Box::new(guard));

    Some(non_blocking)
}

/// Minimal logging for one-shot CLI commands
pub fn init_logging_simple() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .try_init();
}
