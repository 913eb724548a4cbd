//! Configuration for the heed runtime.
//!
//! Loading is layered with figment; see [`loader`] for the order of sources.

pub mod error;
pub mod loader;
pub mod schema;

pub use error::{ConfigError, ConfigResult};
pub use loader::{ConfigLoader, ENV_PREFIX, load_config, load_config_from_file};
pub use schema::{
    CommandConfig, DialogueConfig, HeedConfig, LogFormat, LogLevel, LogOutput, LoggingConfig,
    PermissionConfig, ReplyConfig, SchedulerConfig, SpanEventConfig,
};
