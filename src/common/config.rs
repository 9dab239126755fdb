//! Tracker configuration.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::common::collections::HashSet;
use crate::sys::app::pid_t;

pub const DEFAULT_PREVIEW_CACHE_DURATION: Duration = Duration::from_secs(30);
pub const DEFAULT_PREVIEW_CACHE_CAPACITY: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

/// Callback invoked for every log line when installed:
/// `(level, message, details)`.
pub type LogHandler = Arc<dyn Fn(LogLevel, &str, Option<&str>) + Send + Sync>;

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// When set, discovery never consults the capture surface list and no
    /// previews are taken. The accessibility pass still runs.
    pub headless: bool,
    /// How long a captured preview counts as fresh.
    #[serde(with = "duration_secs")]
    pub preview_cache_duration: Duration,
    /// Upper bound on retained previews; the least recently used entry is
    /// evicted past this.
    pub preview_cache_capacity: usize,
    /// Processes the repository refuses to cache.
    pub ignored_pids: HashSet<pid_t>,
    /// Lowers the log filter to debug for this crate.
    pub debug_logging: bool,
    #[serde(skip)]
    pub log_handler: Option<LogHandler>,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        TrackerConfig {
            headless: false,
            preview_cache_duration: DEFAULT_PREVIEW_CACHE_DURATION,
            preview_cache_capacity: DEFAULT_PREVIEW_CACHE_CAPACITY,
            ignored_pids: HashSet::new(),
            debug_logging: false,
            log_handler: None,
        }
    }
}

impl fmt::Debug for TrackerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackerConfig")
            .field("headless", &self.headless)
            .field("preview_cache_duration", &self.preview_cache_duration)
            .field("preview_cache_capacity", &self.preview_cache_capacity)
            .field("ignored_pids", &self.ignored_pids)
            .field("debug_logging", &self.debug_logging)
            .field("log_handler", &self.log_handler.as_ref().map(|_| "..."))
            .finish()
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Ok(Duration::from_secs_f64(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = TrackerConfig::default();
        assert!(!config.headless);
        assert_eq!(config.preview_cache_duration, Duration::from_secs(30));
        assert_eq!(config.preview_cache_capacity, 100);
        assert!(config.ignored_pids.is_empty());
    }
}
