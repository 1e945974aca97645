use chrono::Local;
use log::{LevelFilter, Record};
use std::{
    fmt::Display,
    fs::OpenOptions,
    io::{self, Write},
};

use env_logger::{Builder, Target};

/// Initialize logging: to `log_file` (or `INVPOLL_LOG_FILE`) when given,
/// otherwise the default `RUST_LOG`-driven stderr logger.
pub fn init_common(log_file: Option<&str>) {
    let log_file = log_file
        .map(str::to_string)
        .or_else(|| std::env::var("INVPOLL_LOG_FILE").ok());

    let Some(path) = log_file else {
        init_logger(Target::Stderr, LevelFilter::Info);
        return;
    };
    match OpenOptions::new().create(true).append(true).open(&path) {
        Ok(file) => {
            // Poll logs are read after the fact, so keep the frame dumps.
            init_logger(Target::Pipe(Box::new(file)), LevelFilter::Debug);
            log::info!("Appending poll log to {path}");
        }
        Err(err) => {
            init_logger(Target::Stderr, LevelFilter::Info);
            log::warn!("Cannot open log file '{path}', logging to stderr: {err}");
        }
    }
}

fn init_logger(target: Target, level: LevelFilter) {
    Builder::new()
        .format(|buf, record| {
            writeln!(
                buf,
                "{}",
                log_line(record, Local::now().format("%Y-%m-%d %H:%M:%S%.3f"))
            )
        })
        .target(target)
        .filter_level(level)
        .parse_default_env()
        .init();
}

/// One log line: timestamp, padded level, emitting module, message.
fn log_line(record: &Record, timestamp: impl Display) -> String {
    format!(
        "{} {:<5} {}: {}",
        timestamp,
        record.level(),
        record.target(),
        record.args()
    )
}
