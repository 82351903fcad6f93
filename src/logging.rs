//! Structured logging setup built directly on the `log` facade, in the
//! teacher crate's style of hand-rolling small systems rather than
//! pulling in a heavier framework for a narrow need.
//!
//! `init` installs a process-wide [`log::Log`] implementation that
//! filters by level and by module-path prefix (spec's
//! `VESPER_LOG_MODULES`) and writes to either stderr or a file.

use crate::config::RuntimeConfig;
use log::{Level, LevelFilter, Metadata, Record};
use std::fs::OpenOptions;
use std::io::Write;
use std::sync::Mutex;

enum Destination {
    Stderr,
    File(Mutex<std::fs::File>),
}

struct RuntimeLogger {
    level: LevelFilter,
    module_filters: Vec<String>,
    destination: Destination,
}

impl log::Log for RuntimeLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        if !self.module_filters.is_empty() {
            let target = record.target();
            if !self.module_filters.iter().any(|prefix| target.starts_with(prefix.as_str())) {
                return;
            }
        }

        let line = format!(
            "[{} {}] {}\n",
            record.level(),
            record.target(),
            record.args()
        );
        match &self.destination {
            Destination::Stderr => {
                let _ = std::io::stderr().write_all(line.as_bytes());
            }
            Destination::File(file) => {
                if let Ok(mut f) = file.lock() {
                    let _ = f.write_all(line.as_bytes());
                }
            }
        }
    }

    fn flush(&self) {
        if let Destination::File(file) = &self.destination {
            if let Ok(mut f) = file.lock() {
                let _ = f.flush();
            }
        }
    }
}

fn parse_level(s: &str) -> LevelFilter {
    match s.to_ascii_lowercase().as_str() {
        "off" => LevelFilter::Off,
        "error" => LevelFilter::Error,
        "warn" => LevelFilter::Warn,
        "debug" => LevelFilter::Debug,
        "trace" => LevelFilter::Trace,
        _ => LevelFilter::Info,
    }
}

/// Installs a process-wide logger sourced from `config`. Safe to call
/// more than once; later calls are ignored (matches `log::set_logger`'s
/// contract), which lets tests and embedding hosts call it defensively.
pub fn init(config: &RuntimeConfig) {
    let level = if config.debug {
        LevelFilter::Trace
    } else {
        parse_level(&config.log_level)
    };
    let destination = match &config.log_file {
        Some(path) => match OpenOptions::new().create(true).append(true).open(path) {
            Ok(file) => Destination::File(Mutex::new(file)),
            Err(_) => Destination::Stderr,
        },
        None => Destination::Stderr,
    };

    let logger = RuntimeLogger {
        level,
        module_filters: config.log_modules.clone(),
        destination,
    };

    if log::set_boxed_logger(Box::new(logger)).is_ok() {
        log::set_max_level(level);
    }
}

/// True if `level` would currently be emitted, given `config`, without
/// installing anything. Used by call sites that want to skip building
/// an expensive log message entirely.
pub fn would_log(config: &RuntimeConfig, level: Level) -> bool {
    config.debug || level <= parse_level(&config.log_level)
}
