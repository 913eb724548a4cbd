//! Configuration schema definitions.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use heed_framework::command::{DEFAULT_JOURNAL_BYTES, DEFAULT_PREFIX};
use heed_framework::{PermissionTable, ReplyTexts};

use super::error::{ConfigError, ConfigResult};

/// Who holds which permission level.
///
/// ```toml
/// [permissions]
/// super_administrator = "10001"
/// administrators = ["10002"]
///
/// [permissions.group_administrators]
/// "10003" = ["g1", "g2"]
/// ```
pub type PermissionConfig = PermissionTable;

/// Texts for the replies the engine writes on its own.
pub type ReplyConfig = ReplyTexts;

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct HeedConfig {
    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Command routing settings.
    #[serde(default)]
    pub command: CommandConfig,

    /// Permission holders.
    #[serde(default)]
    pub permissions: PermissionConfig,

    /// Continuous dialogue settings.
    #[serde(default)]
    pub dialogue: DialogueConfig,

    /// Canned reply texts.
    #[serde(default)]
    pub replies: ReplyConfig,

    /// Background task settings.
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

impl HeedConfig {
    /// Checks values that deserialize fine but cannot work.
    pub fn validate(&self) -> ConfigResult<()> {
        self.command.validate()?;
        self.dialogue.validate()?;
        self.scheduler.validate()?;
        Ok(())
    }
}

// =============================================================================
// Logging
// =============================================================================

/// Log verbosity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Returns the level as used in filter directives.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }

    /// Converts to the `tracing` level.
    pub fn to_tracing_level(self) -> tracing::Level {
        match self {
            Self::Trace => tracing::Level::TRACE,
            Self::Debug => tracing::Level::DEBUG,
            Self::Info => tracing::Level::INFO,
            Self::Warn => tracing::Level::WARN,
            Self::Error => tracing::Level::ERROR,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Log line format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Single line, abbreviated.
    #[default]
    Compact,
    /// Single line with all span fields.
    Full,
    /// Multi-line, for development.
    Pretty,
    /// Newline-delimited JSON. Requires the `json-log` feature.
    Json,
}

/// Where log lines go.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    #[default]
    Stdout,
    Stderr,
    /// The file named by [`LoggingConfig::file_path`].
    File,
}

/// Which span lifecycle events are logged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpanEventConfig {
    pub new: bool,
    pub enter: bool,
    pub exit: bool,
    pub close: bool,
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Base level. `RUST_LOG` takes precedence when set.
    #[serde(default)]
    pub level: LogLevel,

    #[serde(default)]
    pub format: LogFormat,

    #[serde(default)]
    pub output: LogOutput,

    #[serde(default)]
    pub span_events: SpanEventConfig,

    /// Include thread ids.
    #[serde(default)]
    pub thread_ids: bool,

    /// Include source file and line.
    #[serde(default)]
    pub file_location: bool,

    /// Log file for [`LogOutput::File`].
    #[serde(default = "default_log_file")]
    pub file_path: Option<PathBuf>,

    /// Per-module levels, e.g. `heed_framework::dialogue = "trace"`.
    #[serde(default)]
    pub filters: HashMap<String, LogLevel>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::default(),
            format: LogFormat::default(),
            output: LogOutput::default(),
            span_events: SpanEventConfig::default(),
            thread_ids: false,
            file_location: false,
            file_path: default_log_file(),
            filters: HashMap::new(),
        }
    }
}

fn default_log_file() -> Option<PathBuf> {
    Some(PathBuf::from("heed.log"))
}

// =============================================================================
// Engine
// =============================================================================

/// Command routing configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandConfig {
    /// Text that marks a message as a command. Empty disables command routing.
    #[serde(default = "default_prefix")]
    pub prefix: String,

    /// Size of the in-memory command history, in bytes.
    #[serde(default = "default_history_bytes")]
    pub history_bytes: usize,
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            prefix: default_prefix(),
            history_bytes: default_history_bytes(),
        }
    }
}

impl CommandConfig {
    fn validate(&self) -> ConfigResult<()> {
        if self.prefix.chars().any(char::is_whitespace) {
            return Err(ConfigError::invalid(format!(
                "Command prefix must not contain whitespace: {:?}",
                self.prefix
            )));
        }
        if self.history_bytes == 0 {
            return Err(ConfigError::invalid(
                "Command history size must be greater than 0",
            ));
        }
        Ok(())
    }
}

fn default_prefix() -> String {
    DEFAULT_PREFIX.to_string()
}

fn default_history_bytes() -> usize {
    DEFAULT_JOURNAL_BYTES
}

/// Continuous dialogue configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DialogueConfig {
    /// How long a handler waits for the next message by default.
    #[serde(default = "default_timeout_secs")]
    pub default_timeout_secs: u64,
}

impl Default for DialogueConfig {
    fn default() -> Self {
        Self {
            default_timeout_secs: default_timeout_secs(),
        }
    }
}

impl DialogueConfig {
    /// The default wait as a [`Duration`].
    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout_secs)
    }

    fn validate(&self) -> ConfigResult<()> {
        if self.default_timeout_secs == 0 {
            return Err(ConfigError::invalid(
                "Dialogue timeout must be greater than 0",
            ));
        }
        Ok(())
    }
}

fn default_timeout_secs() -> u64 {
    60
}

/// Background task configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Whether background tasks run at all.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Minutes between two rounds of background tasks.
    #[serde(default = "default_period_minutes")]
    pub period_minutes: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            period_minutes: default_period_minutes(),
        }
    }
}

impl SchedulerConfig {
    /// The background period as a [`Duration`].
    pub fn period(&self) -> Duration {
        Duration::from_secs(self.period_minutes * 60)
    }

    fn validate(&self) -> ConfigResult<()> {
        if self.period_minutes == 0 {
            return Err(ConfigError::invalid(
                "Scheduler period must be greater than 0",
            ));
        }
        Ok(())
    }
}

fn default_true() -> bool {
    true
}

fn default_period_minutes() -> u64 {
    3
}
