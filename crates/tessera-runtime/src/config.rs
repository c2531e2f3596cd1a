//! Runtime configuration
//!
//! Durations are written as humantime strings (`"1ms"`, `"250us"`) in JSON
//! and in environment variables.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tessera_core::{TesseraError, TesseraResult};
use tessera_time::SchedulerConfig;

/// Log filter override, e.g. `debug` or `tessera_state=trace`
pub const ENV_LOG: &str = "TESSERA_LOG";
/// `1`/`true` switches to JSON log lines
pub const ENV_LOG_JSON: &str = "TESSERA_LOG_JSON";
/// Driver tick interval, humantime format
pub const ENV_TICK: &str = "TESSERA_TICK";

/// Logging configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Filter used when `RUST_LOG` is unset
    pub level: String,
    pub json: bool,
    pub ansi: bool,
    /// Include the event target (module path)
    pub target: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            level: "info".to_string(),
            json: false,
            ansi: true,
            target: true,
        }
    }
}

/// Runtime configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    #[serde(with = "scheduler_serde")]
    pub scheduler: SchedulerConfig,
    pub log: LogConfig,
    /// How often the driver runs due scheduler work
    #[serde(with = "duration_serde")]
    pub tick_interval: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            scheduler: SchedulerConfig::default(),
            log: LogConfig::default(),
            tick_interval: Duration::from_millis(1),
        }
    }
}

impl RuntimeConfig {
    /// Zero delays and verbose logs
    pub fn testing() -> Self {
        RuntimeConfig {
            scheduler: SchedulerConfig::immediate(),
            log: LogConfig {
                level: "debug".to_string(),
                ansi: false,
                ..LogConfig::default()
            },
            tick_interval: Duration::from_millis(1),
        }
    }

    /// Longer debounce window for bursty writers
    pub fn batched() -> Self {
        RuntimeConfig {
            scheduler: SchedulerConfig {
                dispatch_delay: Duration::from_millis(16),
                notify_delay: Duration::from_millis(16),
                ..SchedulerConfig::default()
            },
            tick_interval: Duration::from_millis(4),
            ..RuntimeConfig::default()
        }
    }

    pub fn from_json(json: &str) -> TesseraResult<Self> {
        serde_json::from_str(json).map_err(|e| TesseraError::Config(e.to_string()))
    }

    pub fn to_json(&self) -> TesseraResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Defaults overridden by `TESSERA_*` environment variables
    pub fn from_env() -> TesseraResult<Self> {
        RuntimeConfig::default().with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from `lookup`, keyed by the `ENV_*` names
    pub fn with_overrides<F>(mut self, lookup: F) -> TesseraResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(level) = lookup(ENV_LOG).filter(|v| !v.trim().is_empty()) {
            self.log.level = level;
        }
        if let Some(json) = lookup(ENV_LOG_JSON) {
            self.log.json = parse_flag(ENV_LOG_JSON, &json)?;
        }
        if let Some(tick) = lookup(ENV_TICK) {
            self.tick_interval = humantime::parse_duration(tick.trim())
                .map_err(|e| TesseraError::Config(format!("{ENV_TICK}: {e}")))?;
        }
        Ok(self)
    }
}

fn parse_flag(name: &str, value: &str) -> TesseraResult<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => Err(TesseraError::Config(format!("{name}: not a flag: {other}"))),
    }
}

mod duration_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}

mod scheduler_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use tessera_time::SchedulerConfig;

    #[derive(Serialize, Deserialize)]
    #[serde(default)]
    struct Section {
        #[serde(with = "super::duration_serde")]
        dispatch_delay: Duration,
        #[serde(with = "super::duration_serde")]
        notify_delay: Duration,
        max_rounds: usize,
    }

    impl Default for Section {
        fn default() -> Self {
            Section::from(&SchedulerConfig::default())
        }
    }

    impl From<&SchedulerConfig> for Section {
        fn from(config: &SchedulerConfig) -> Self {
            Section {
                dispatch_delay: config.dispatch_delay,
                notify_delay: config.notify_delay,
                max_rounds: config.max_rounds,
            }
        }
    }

    pub fn serialize<S: Serializer>(
        value: &SchedulerConfig,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        Section::from(value).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<SchedulerConfig, D::Error> {
        let section = Section::deserialize(deserializer)?;
        Ok(SchedulerConfig {
            dispatch_delay: section.dispatch_delay,
            notify_delay: section.notify_delay,
            max_rounds: section.max_rounds,
        })
    }
}
