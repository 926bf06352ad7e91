//! Process-wide verbosity of codec diagnostics.
//!
//! The library logs through the `log` facade and never installs a logger;
//! binaries pick one (the CLI uses `env_logger`). The level only filters
//! diagnostics and has no effect on results.

use std::fmt;
use std::str::FromStr;

use log::LevelFilter;
use serde::{Deserialize, Serialize};

use crate::error::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
    /// No diagnostics at all.
    Mute,
}

impl LogLevel {
    pub fn filter(self) -> LevelFilter {
        match self {
            Self::Debug => LevelFilter::Debug,
            Self::Info => LevelFilter::Info,
            Self::Warn => LevelFilter::Warn,
            Self::Error => LevelFilter::Error,
            Self::Mute => LevelFilter::Off,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
            Self::Mute => "mute",
        })
    }
}

impl FromStr for LogLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s.to_ascii_lowercase().as_str() {
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" | "warning" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            "mute" | "off" => Ok(Self::Mute),
            _ => Err(Error::precondition(format!("invalid log level: {s}"))),
        }
    }
}

/// Set the verbosity for the whole process.
pub fn set_log_level(level: LogLevel) {
    log::set_max_level(level.filter());
}
