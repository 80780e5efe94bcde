use std::io::{self, Write};

use log::{LevelFilter, SetLoggerError};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
struct LogEntry {
    pub level: Level,
    pub message: String,
    pub target: String,
    pub module: String,
    pub file: String,
    pub line: u32,
}

#[derive(Debug, Serialize, Deserialize, Copy, Clone, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
enum Level {
    Error = 1,
    Warn = 2,
    Info = 3,
    Debug = 4,
    Trace = 5,
}

impl From<log::Level> for Level {
    fn from(value: log::Level) -> Self {
        match value {
            log::Level::Error => Level::Error,
            log::Level::Warn => Level::Warn,
            log::Level::Info => Level::Info,
            log::Level::Debug => Level::Debug,
            log::Level::Trace => Level::Trace,
        }
    }
}

impl From<&log::Record<'_>> for LogEntry {
    fn from(value: &log::Record) -> Self {
        Self {
            level: value.level().into(),
            message: value.args().to_string(),
            target: value.target().to_string(),
            module: value.module_path().unwrap_or_default().to_string(),
            file: value.file().unwrap_or_default().to_string(),
            line: value.line().unwrap_or_default(),
        }
    }
}

/// Installs an stderr logger for tools embedding the planner.
///
/// `RUST_LOG` takes precedence over `level` when it is set.
pub fn init_logger(level: LevelFilter) -> Result<(), SetLoggerError> {
    env_logger::builder()
        .format_timestamp(None)
        .filter_level(level)
        .parse_default_env()
        .try_init()
}

/// Like [`init_logger`], but writes one JSON object per record so that logs
/// of a commit can be collected by a supervising process.
pub fn init_json_logger(level: LevelFilter) -> Result<(), SetLoggerError> {
    env_logger::builder()
        .format(|buf, record| {
            let entry = serde_json::to_string(&LogEntry::from(record))
                .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
            writeln!(buf, "{entry}")
        })
        .filter_level(level)
        .parse_default_env()
        .try_init()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_entry() {
        let entry = LogEntry::from(
            &log::Record::builder()
                .args(format_args!("Created partition /dev/sda1"))
                .level(log::Level::Info)
                .target("strata::engine")
                .module_path(Some("strata::engine"))
                .file(Some("src/engine/mod.rs"))
                .line(Some(1))
                .build(),
        );

        assert_eq!(entry.level, Level::Info);
        assert_eq!(entry.message, "Created partition /dev/sda1");
        assert_eq!(entry.target, "strata::engine");
        assert_eq!(entry.module, "strata::engine");
        assert_eq!(entry.file, "src/engine/mod.rs");
        assert_eq!(entry.line, 1);
    }

    #[test]
    fn test_log_entry_json() {
        let entry = LogEntry::from(
            &log::Record::builder()
                .args(format_args!("Settling udev"))
                .level(log::Level::Debug)
                .target("strata")
                .build(),
        );

        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["level"], "debug");
        assert_eq!(json["message"], "Settling udev");
        assert_eq!(json["module"], "");
        assert_eq!(json["line"], 0);
    }
}
