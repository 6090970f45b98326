//! Log setup: a non-blocking rolling file appender plus, in text mode, a
//! colored stdout mirror. The returned guard must outlive the process main
//! loop or buffered lines are dropped on shutdown.

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::config::AppConfig;

fn parse_rotation(value: &str) -> Rotation {
    match value {
        "minutely" => Rotation::MINUTELY,
        "hourly" => Rotation::HOURLY,
        "daily" => Rotation::DAILY,
        "never" => Rotation::NEVER,
        other => {
            // No subscriber yet, so this cannot go through tracing.
            eprintln!("unknown log rotation {other:?}, falling back to never");
            Rotation::NEVER
        }
    }
}

fn build_filter(config: &AppConfig) -> EnvFilter {
    // RUST_LOG wins over the config file.
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }
    let mut directives = config.log_level.clone();
    if !config.enable_tracing {
        directives.push_str(",settlecore=off");
    }
    EnvFilter::new(directives)
}

pub fn init_logging(config: &AppConfig) -> WorkerGuard {
    let appender = RollingFileAppender::new(
        parse_rotation(&config.rotation),
        &config.log_dir,
        &config.log_file,
    );
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let registry = tracing_subscriber::registry().with(build_filter(config));

    if config.use_json {
        // JSON goes to the file only; a stdout mirror would double-feed
        // any log shipper tailing both streams.
        let file_layer = fmt::layer()
            .json()
            .with_target(true)
            .with_writer(writer)
            .with_ansi(false);
        registry.with(file_layer).init();
    } else {
        let file_layer = fmt::layer()
            .with_target(false)
            .with_writer(writer)
            .with_ansi(false);
        let stdout_layer = fmt::layer().with_target(false).with_ansi(true);
        registry.with(file_layer).with(stdout_layer).init();
    }

    guard
}
