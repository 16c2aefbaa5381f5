/// Structured logging for the validation pipeline
///
/// Every entry carries the pipeline stage that produced it and, where one
/// applies, the site id. Console output is always on; a log file can be
/// added for unattended batch runs.

use chrono::Utc;
use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::sync::Mutex;

use crate::model::PipelineError;

// ---------------------------------------------------------------------------
// Log Levels
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl LogLevel {
    /// Parses the `SWE_LOG_LEVEL` spelling (case-insensitive).
    pub fn parse(raw: &str) -> Option<LogLevel> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "debug" => Some(LogLevel::Debug),
            "info" => Some(LogLevel::Info),
            "warn" | "warning" => Some(LogLevel::Warning),
            "error" => Some(LogLevel::Error),
            _ => None,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Debug => write!(f, "DEBUG"),
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Warning => write!(f, "WARN"),
            LogLevel::Error => write!(f, "ERROR"),
        }
    }
}

// ---------------------------------------------------------------------------
// Pipeline Stages
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Ingest,
    Smooth,
    Lag,
    Thermal,
    Align,
    Agree,
    Report,
    System,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Ingest => write!(f, "INGEST"),
            Stage::Smooth => write!(f, "SMOOTH"),
            Stage::Lag => write!(f, "LAG"),
            Stage::Thermal => write!(f, "THERMAL"),
            Stage::Align => write!(f, "ALIGN"),
            Stage::Agree => write!(f, "AGREE"),
            Stage::Report => write!(f, "REPORT"),
            Stage::System => write!(f, "SYS"),
        }
    }
}

// ---------------------------------------------------------------------------
// Failure Classification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureType {
    /// Expected at field sites: gaps or a season too short to calibrate
    Expected,
    /// Configuration or input file problem that needs fixing
    Unexpected,
    /// Could be either; needs a look at the data
    Unknown,
}

impl fmt::Display for FailureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureType::Expected => write!(f, "EXPECTED"),
            FailureType::Unexpected => write!(f, "UNEXPECTED"),
            FailureType::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

// ---------------------------------------------------------------------------
// Logger Configuration
// ---------------------------------------------------------------------------

/// Global logger instance
static LOGGER: Mutex<Option<Logger>> = Mutex::new(None);

pub struct Logger {
    /// Minimum log level to display
    min_level: LogLevel,
    /// Optional file path for logging
    log_file: Option<String>,
    /// Whether to include timestamps in console output
    console_timestamps: bool,
}

impl Logger {
    /// Initialize the global logger
    pub fn init(min_level: LogLevel, log_file: Option<String>, console_timestamps: bool) {
        let logger = Logger {
            min_level,
            log_file,
            console_timestamps,
        };
        // A poisoned lock only means another thread panicked mid-log.
        let mut slot = LOGGER.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *slot = Some(logger);
    }

    fn log(&self, level: LogLevel, stage: Stage, site_id: Option<&str>, message: &str) {
        if level < self.min_level {
            return;
        }

        let site_part = site_id.map(|s| format!(" [{}]", s)).unwrap_or_default();
        let log_entry = format_entry(level, stage, site_id, message);

        if self.console_timestamps {
            match level {
                LogLevel::Error | LogLevel::Warning => eprintln!("{}", log_entry),
                LogLevel::Info | LogLevel::Debug => println!("{}", log_entry),
            }
        } else {
            match level {
                LogLevel::Error => eprintln!("   ✗ {}{}: {}", stage, site_part, message),
                LogLevel::Warning => eprintln!("   ⚠ {}{}: {}", stage, site_part, message),
                LogLevel::Info => println!("   {}{}: {}", stage, site_part, message),
                LogLevel::Debug => println!("   [DEBUG] {}{}: {}", stage, site_part, message),
            }
        }

        if let Some(ref path) = self.log_file {
            if let Err(e) = Self::append_to_file(path, &log_entry) {
                eprintln!("Failed to write to log file {}: {}", path, e);
            }
        }
    }

    fn append_to_file(path: &str, entry: &str) -> std::io::Result<()> {
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(file, "{}", entry)?;
        Ok(())
    }
}

/// One log line: `<utc time> <LEVEL> <STAGE> [site]: message`.
pub fn format_entry(level: LogLevel, stage: Stage, site_id: Option<&str>, message: &str) -> String {
    let timestamp = Utc::now().format("%Y-%m-%d %H:%M:%S UTC");
    let site_part = site_id.map(|s| format!(" [{}]", s)).unwrap_or_default();
    format!("{} {} {}{}: {}", timestamp, level, stage, site_part, message)
}

// ---------------------------------------------------------------------------
// Public Logging Functions
// ---------------------------------------------------------------------------

/// Initialize the global logger
pub fn init_logger(min_level: LogLevel, log_file: Option<&str>, console_timestamps: bool) {
    Logger::init(min_level, log_file.map(String::from), console_timestamps);
}

fn emit(level: LogLevel, stage: Stage, site_id: Option<&str>, message: &str) {
    if let Ok(guard) = LOGGER.lock() {
        if let Some(logger) = guard.as_ref() {
            logger.log(level, stage, site_id, message);
        }
    }
}

/// Log a general informational message
pub fn info(stage: Stage, site_id: Option<&str>, message: &str) {
    emit(LogLevel::Info, stage, site_id, message);
}

/// Log a warning message
pub fn warn(stage: Stage, site_id: Option<&str>, message: &str) {
    emit(LogLevel::Warning, stage, site_id, message);
}

/// Log an error message
pub fn error(stage: Stage, site_id: Option<&str>, message: &str) {
    emit(LogLevel::Error, stage, site_id, message);
}

/// Log a debug message
pub fn debug(stage: Stage, site_id: Option<&str>, message: &str) {
    emit(LogLevel::Debug, stage, site_id, message);
}

// ---------------------------------------------------------------------------
// Failure Classification Helpers
// ---------------------------------------------------------------------------

/// Classify a site failure by its error kind
pub fn classify_failure(err: &PipelineError) -> FailureType {
    match err {
        // Short seasons and instrument outages
        PipelineError::InsufficientCalibrationData { .. } => FailureType::Expected,
        // Either a data gap or a wrong period/tolerance in sites.toml
        PipelineError::NoOverlap(_) => FailureType::Unknown,
        PipelineError::InvalidWindow(_)
        | PipelineError::MalformedInput(_)
        | PipelineError::Io { .. } => FailureType::Unexpected,
    }
}

/// Log a failed site run with automatic classification
pub fn log_site_failure(site_id: &str, stage: Stage, err: &PipelineError) {
    let failure_type = classify_failure(err);
    let message = format!("validation failed [{}]: {}", failure_type, err);

    match failure_type {
        FailureType::Expected => warn(stage, Some(site_id), &message),
        FailureType::Unexpected => error(stage, Some(site_id), &message),
        FailureType::Unknown => warn(stage, Some(site_id), &message),
    }
}

// ---------------------------------------------------------------------------
// Run Summary Logging
// ---------------------------------------------------------------------------

/// Log a summary of a batch run over several sites
pub fn log_run_summary(total: usize, successful: usize, failed: usize) {
    let message = format!(
        "Validation complete: {}/{} sites successful, {} failed",
        successful, total, failed
    );

    if failed == 0 {
        info(Stage::System, None, &message);
    } else if successful == 0 {
        error(Stage::System, None, &message);
    } else {
        warn(Stage::System, None, &message);
    }
}
