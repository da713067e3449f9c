//! Read-only insight into the daemon's own debug log.
//!
//! The daemon owns its data directory; these helpers only inspect it so the
//! host can render log status and a tail without attaching to the process.

use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use crate::config::parse_value;

static DEBUG_LOG_FILE_NAME: &str = "debug.log";

/// Whether the daemon's debug log can be read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebugLogStatus {
    /// Logging to file is disabled in the daemon configuration.
    Disabled,
    /// The configured log file does not exist yet.
    Missing,
    /// The log file exists and can be tailed.
    Present,
}

/// Resolved debug log location and availability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebugLogInsight {
    /// Availability of the log.
    pub status: DebugLogStatus,

    /// Resolved log file path, `None` when logging is disabled.
    pub file: Option<PathBuf>,
}

/// Resolves the daemon debug log location from its configuration file.
///
/// `nodebuglogfile=1` disables file logging entirely; `debuglogfile=` may
/// point at an absolute path or one relative to the data directory, and
/// defaults to `debug.log` inside the data directory.
#[must_use]
pub fn debug_log_insight(config_file: &Path, data_dir: &Path) -> DebugLogInsight {
    let contents = std::fs::read_to_string(config_file).unwrap_or_default();

    let disabled = parse_value(&contents, "nodebuglogfile")
        .is_some_and(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true"));
    if disabled {
        return DebugLogInsight {
            status: DebugLogStatus::Disabled,
            file: None,
        };
    }

    let file = match parse_value(&contents, "debuglogfile") {
        None => data_dir.join(DEBUG_LOG_FILE_NAME),
        Some(value) if value.is_empty() => data_dir.join(DEBUG_LOG_FILE_NAME),
        Some(value) => {
            let path = PathBuf::from(value);
            if path.is_absolute() {
                path
            } else {
                data_dir.join(path)
            }
        }
    };

    let status = if file.exists() {
        DebugLogStatus::Present
    } else {
        DebugLogStatus::Missing
    };

    DebugLogInsight {
        status,
        file: Some(file),
    }
}

/// Returns the last `max_lines` lines of the daemon debug log.
///
/// Returns an empty vector when logging is disabled, the log is missing, or
/// it cannot be read.
#[must_use]
pub fn tail_debug_log(config_file: &Path, data_dir: &Path, max_lines: usize) -> Vec<String> {
    if max_lines == 0 {
        return Vec::new();
    }

    let insight = debug_log_insight(config_file, data_dir);
    let Some(file) = insight.file else {
        return Vec::new();
    };
    if insight.status != DebugLogStatus::Present {
        return Vec::new();
    }

    let Ok(reader) = File::open(&file).map(BufReader::new) else {
        return Vec::new();
    };

    let mut buffer = VecDeque::with_capacity(max_lines);
    for line in reader.lines() {
        let Ok(line) = line else {
            return Vec::new();
        };
        if buffer.len() == max_lines {
            buffer.pop_front();
        }
        buffer.push_back(line);
    }

    buffer.into_iter().collect()
}
