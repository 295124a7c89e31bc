//! Rolling file logging for processes embedding the schema engine.
//!
//! # Responsibility
//! - Start the `flexi_logger` backend once per process.
//! - Capture panics as metadata-only log events.
//!
//! # Invariants
//! - Re-initializing with identical settings is a no-op.
//! - Re-initializing with different settings is rejected.
//! - Initialization never panics.

use flexi_logger::{Cleanup, Criterion, FileSpec, Logger, LoggerHandle, Naming, WriteMode};
use log::{error, info};
use once_cell::sync::OnceCell;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};

const LOG_FILE_BASENAME: &str = "gatehouse";
const ROTATE_AT_BYTES: u64 = 5 * 1024 * 1024;
const KEEP_LOG_FILES: usize = 7;
const PANIC_SUMMARY_CHARS: usize = 120;

static ACTIVE: OnceCell<ActiveLogger> = OnceCell::new();
static PANIC_HOOK: OnceCell<()> = OnceCell::new();

struct ActiveLogger {
    settings: LogSettings,
    _handle: LoggerHandle,
}

/// Normalized logger settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    pub level: &'static str,
    pub log_dir: PathBuf,
}

impl LogSettings {
    /// Normalizes a level name and an absolute log directory.
    pub fn parse(level: &str, log_dir: &str) -> Result<Self, LoggingError> {
        Ok(Self {
            level: parse_level(level)?,
            log_dir: parse_log_dir(log_dir)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoggingError {
    UnsupportedLevel(String),
    InvalidLogDir(String),
    /// Already running with different settings.
    Conflict {
        active: LogSettings,
        requested: LogSettings,
    },
    Backend(String),
}

impl Display for LoggingError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnsupportedLevel(level) => write!(
                f,
                "unsupported log level `{level}`; expected trace|debug|info|warn|error"
            ),
            Self::InvalidLogDir(message) => write!(f, "invalid log directory: {message}"),
            Self::Conflict { active, requested } => write!(
                f,
                "logging already running with level `{}` at `{}`; refusing `{}` at `{}`",
                active.level,
                active.log_dir.display(),
                requested.level,
                requested.log_dir.display()
            ),
            Self::Backend(message) => write!(f, "logger backend failed: {message}"),
        }
    }
}

impl Error for LoggingError {}

/// Starts file logging at `log_dir` with `level`.
///
/// # Errors
/// - Unsupported level or a relative/empty directory.
/// - Settings differing from an already running logger.
/// - Directory creation or backend start failures.
pub fn init_logging(level: &str, log_dir: &str) -> Result<(), LoggingError> {
    let requested = LogSettings::parse(level, log_dir)?;

    let active = ACTIVE.get_or_try_init(|| start(requested.clone()))?;
    if active.settings != requested {
        return Err(LoggingError::Conflict {
            active: active.settings.clone(),
            requested,
        });
    }
    Ok(())
}

/// Settings of the running logger, if started.
pub fn logging_status() -> Option<LogSettings> {
    ACTIVE.get().map(|active| active.settings.clone())
}

/// `debug` in debug builds, `info` otherwise.
pub fn default_log_level() -> &'static str {
    if cfg!(debug_assertions) {
        "debug"
    } else {
        "info"
    }
}

fn start(settings: LogSettings) -> Result<ActiveLogger, LoggingError> {
    std::fs::create_dir_all(&settings.log_dir).map_err(|err| {
        LoggingError::InvalidLogDir(format!(
            "cannot create `{}`: {err}",
            settings.log_dir.display()
        ))
    })?;

    let handle = Logger::try_with_str(settings.level)
        .map_err(|err| LoggingError::Backend(err.to_string()))?
        .log_to_file(
            FileSpec::default()
                .directory(settings.log_dir.as_path())
                .basename(LOG_FILE_BASENAME),
        )
        .rotate(
            Criterion::Size(ROTATE_AT_BYTES),
            Naming::Numbers,
            Cleanup::KeepLogFiles(KEEP_LOG_FILES),
        )
        .write_mode(WriteMode::BufferAndFlush)
        .append()
        .format_for_files(flexi_logger::detailed_format)
        .start()
        .map_err(|err| LoggingError::Backend(err.to_string()))?;

    install_panic_hook();
    info!(
        "event=logging_start module=logging status=ok level={} version={}",
        settings.level,
        env!("CARGO_PKG_VERSION")
    );

    Ok(ActiveLogger {
        settings,
        _handle: handle,
    })
}

fn parse_level(level: &str) -> Result<&'static str, LoggingError> {
    match level.trim().to_ascii_lowercase().as_str() {
        "trace" => Ok("trace"),
        "debug" => Ok("debug"),
        "info" => Ok("info"),
        "warn" | "warning" => Ok("warn"),
        "error" => Ok("error"),
        other => Err(LoggingError::UnsupportedLevel(other.to_string())),
    }
}

fn parse_log_dir(log_dir: &str) -> Result<PathBuf, LoggingError> {
    let trimmed = log_dir.trim();
    if trimmed.is_empty() {
        return Err(LoggingError::InvalidLogDir("path is empty".to_string()));
    }
    let path = Path::new(trimmed);
    if !path.is_absolute() {
        return Err(LoggingError::InvalidLogDir(format!(
            "`{trimmed}` is not absolute"
        )));
    }
    Ok(path.to_path_buf())
}

fn install_panic_hook() {
    if PANIC_HOOK.set(()).is_err() {
        return;
    }

    let previous = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        let location = panic_info
            .location()
            .map(|loc| format!("{}:{}", loc.file(), loc.line()))
            .unwrap_or_else(|| "unknown".to_string());
        let payload = panic_info
            .payload()
            .downcast_ref::<&str>()
            .map(|message| message.to_string())
            .or_else(|| panic_info.payload().downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        error!(
            "event=panic module=logging status=error location={} payload={}",
            location,
            single_line(&payload, PANIC_SUMMARY_CHARS)
        );
        previous(panic_info);
    }));
}

/// Flattens newlines and caps length at `max_chars`.
fn single_line(value: &str, max_chars: usize) -> String {
    let flat = value.replace(['\n', '\r'], " ");
    if flat.chars().count() <= max_chars {
        return flat;
    }
    let mut capped: String = flat.chars().take(max_chars).collect();
    capped.push_str("...");
    capped
}

#[cfg(test)]
mod tests {
    use super::{init_logging, logging_status, parse_level, single_line, LogSettings};
    use super::LoggingError;

    #[test]
    fn parses_levels_case_insensitively() {
        assert_eq!(parse_level(" WARNING ").expect("warning"), "warn");
        assert_eq!(parse_level("Trace").expect("trace"), "trace");
        assert!(matches!(
            parse_level("verbose"),
            Err(LoggingError::UnsupportedLevel(_))
        ));
    }

    #[test]
    fn rejects_relative_and_empty_dirs() {
        assert!(matches!(
            LogSettings::parse("info", "logs"),
            Err(LoggingError::InvalidLogDir(_))
        ));
        assert!(matches!(
            LogSettings::parse("info", "   "),
            Err(LoggingError::InvalidLogDir(_))
        ));
    }

    #[test]
    fn single_line_flattens_and_caps() {
        assert_eq!(single_line("a\nb", 10), "a b");
        assert_eq!(single_line("abcdef", 3), "abc...");
    }

    #[test]
    fn init_is_idempotent_and_rejects_reconfiguration() {
        let dir = tempfile::tempdir().expect("temp dir");
        let other = tempfile::tempdir().expect("temp dir");
        let dir_str = dir.path().to_str().expect("utf-8 path");
        let other_str = other.path().to_str().expect("utf-8 path");

        init_logging("info", dir_str).expect("first init");
        init_logging("INFO", dir_str).expect("same settings");

        assert!(matches!(
            init_logging("debug", dir_str),
            Err(LoggingError::Conflict { .. })
        ));
        assert!(matches!(
            init_logging("info", other_str),
            Err(LoggingError::Conflict { .. })
        ));

        let active = logging_status().expect("logging active");
        assert_eq!(active.level, "info");
        assert_eq!(active.log_dir, dir.path());
    }
}
