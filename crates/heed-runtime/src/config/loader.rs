//! Layered configuration loading with figment.
//!
//! Later sources override earlier ones:
//!
//! 1. [`HeedConfig::default`], or the base given to [`ConfigLoader::merge`]
//! 2. One configuration file: the one given to [`ConfigLoader::file`], or
//!    else the first `heed.toml` / `heed.yaml` / `heed.yml` found in the
//!    current directory and then in `<user config dir>/heed`
//! 3. `HEED_*` environment variables, with `__` between sections:
//!    `HEED_COMMAND__PREFIX=!` sets `command.prefix`
//!
//! Which file formats are read depends on the `toml-config` *(default)* and
//! `yaml-config` features.
//!
//! ```rust,ignore
//! use heed_runtime::config::ConfigLoader;
//!
//! let config = ConfigLoader::new().file("deploy/heed.toml").load()?;
//! ```

use std::path::{Path, PathBuf};

use figment::Figment;
#[cfg(any(feature = "toml-config", feature = "yaml-config"))]
use figment::providers::Format;
#[cfg(feature = "toml-config")]
use figment::providers::Toml;
#[cfg(feature = "yaml-config")]
use figment::providers::Yaml;
use figment::providers::{Env, Serialized};
use tracing::{debug, info};

use super::error::{ConfigError, ConfigResult};
use super::schema::HeedConfig;

/// Prefix of the environment variables the loader reads.
pub const ENV_PREFIX: &str = "HEED_";

/// File names looked for in each directory, in order.
const FILE_NAMES: &[&str] = &[
    #[cfg(feature = "toml-config")]
    "heed.toml",
    #[cfg(feature = "yaml-config")]
    "heed.yaml",
    #[cfg(feature = "yaml-config")]
    "heed.yml",
];

/// Loads a [`HeedConfig`] from defaults, a file and the environment.
#[derive(Debug, Default)]
pub struct ConfigLoader {
    base: HeedConfig,
    file: Option<PathBuf>,
    skip_env: bool,
}

impl ConfigLoader {
    /// Creates a loader that looks for a file and reads the environment.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads this file instead of looking for one. It must exist.
    pub fn file(mut self, path: impl AsRef<Path>) -> Self {
        self.file = Some(path.as_ref().to_path_buf());
        self
    }

    /// Ignores `HEED_*` environment variables.
    pub fn without_env(mut self) -> Self {
        self.skip_env = true;
        self
    }

    /// Uses `config` instead of the built-in defaults. The file and the
    /// environment still override it.
    pub fn merge(mut self, config: HeedConfig) -> Self {
        self.base = config;
        self
    }

    /// Loads and validates the configuration.
    pub fn load(self) -> ConfigResult<HeedConfig> {
        let source = self.config_file()?;
        let mut figment = Figment::from(Serialized::defaults(&self.base));

        match &source {
            Some(path) => {
                info!(path = %path.display(), "Loading configuration file");
                figment = merge_file(figment, path)?;
            }
            None => debug!("No configuration file found"),
        }
        if !self.skip_env {
            figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));
        }

        let config: HeedConfig = figment.extract()?;
        config.validate()?;

        debug!(
            file = ?source,
            log_level = %config.logging.level,
            command_prefix = %config.command.prefix,
            "Configuration loaded"
        );
        Ok(config)
    }

    fn config_file(&self) -> ConfigResult<Option<PathBuf>> {
        match &self.file {
            Some(path) if path.is_file() => Ok(Some(path.clone())),
            Some(path) => Err(ConfigError::Missing { path: path.clone() }),
            None => Ok(discover()),
        }
    }
}

fn search_dirs() -> Vec<PathBuf> {
    std::env::current_dir()
        .ok()
        .into_iter()
        .chain(dirs::config_dir().map(|dir| dir.join("heed")))
        .collect()
}

fn discover() -> Option<PathBuf> {
    search_dirs()
        .into_iter()
        .flat_map(|dir| FILE_NAMES.iter().map(move |name| dir.join(name)))
        .find(|path| path.is_file())
}

fn merge_file(figment: Figment, path: &Path) -> ConfigResult<Figment> {
    match path.extension().and_then(|ext| ext.to_str()) {
        #[cfg(feature = "toml-config")]
        Some("toml") => Ok(figment.merge(Toml::file(path))),
        #[cfg(feature = "yaml-config")]
        Some("yaml" | "yml") => Ok(figment.merge(Yaml::file(path))),
        _ => Err(ConfigError::UnsupportedFormat {
            path: path.to_path_buf(),
        }),
    }
}

/// Loads configuration the way [`HeedRuntime::new`](crate::HeedRuntime::new)
/// does: a discovered file plus `HEED_*` variables.
pub fn load_config() -> ConfigResult<HeedConfig> {
    ConfigLoader::new().load()
}

/// Loads configuration from `path`, with `HEED_*` variables on top.
pub fn load_config_from_file(path: impl AsRef<Path>) -> ConfigResult<HeedConfig> {
    ConfigLoader::new().file(path).load()
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    use crate::config::LogLevel;

    #[test]
    fn test_defaults_without_sources() {
        Jail::expect_with(|_jail| {
            let config = ConfigLoader::new()
                .without_env()
                .load()
                .map_err(|e| e.to_string())?;

            assert_eq!(config.logging.level, LogLevel::Info);
            assert_eq!(config.command.prefix, "#");
            Ok(())
        });
    }

    #[test]
    fn test_env_overrides_defaults() {
        Jail::expect_with(|jail| {
            jail.set_env("HEED_COMMAND__PREFIX", "!");
            jail.set_env("HEED_DIALOGUE__DEFAULT_TIMEOUT_SECS", "5");
            jail.set_env("HEED_LOGGING__LEVEL", "debug");
            jail.set_env("HEED_SCHEDULER__ENABLED", "false");

            let config = load_config().map_err(|e| e.to_string())?;

            assert_eq!(config.command.prefix, "!");
            assert_eq!(config.dialogue.default_timeout_secs, 5);
            assert_eq!(config.logging.level, LogLevel::Debug);
            assert!(!config.scheduler.enabled);
            Ok(())
        });
    }

    #[test]
    fn test_env_can_be_ignored() {
        Jail::expect_with(|jail| {
            jail.set_env("HEED_COMMAND__PREFIX", "!");

            let config = ConfigLoader::new()
                .without_env()
                .load()
                .map_err(|e| e.to_string())?;
            assert_eq!(config.command.prefix, "#");
            Ok(())
        });
    }

    #[cfg(feature = "toml-config")]
    #[test]
    fn test_merged_base_sits_under_file_and_env() {
        Jail::expect_with(|jail| {
            jail.create_file("heed.toml", "[command]\nprefix = \"?\"\n")?;
            jail.set_env("HEED_COMMAND__HISTORY_BYTES", "2048");

            let mut base = HeedConfig::default();
            base.command.prefix = "/".into();
            base.command.history_bytes = 16;
            base.dialogue.default_timeout_secs = 7;

            let config = ConfigLoader::new()
                .merge(base)
                .load()
                .map_err(|e| e.to_string())?;

            assert_eq!(config.command.prefix, "?");
            assert_eq!(config.command.history_bytes, 2048);
            assert_eq!(config.dialogue.default_timeout_secs, 7);
            Ok(())
        });
    }

    #[test]
    fn test_invalid_values_rejected() {
        Jail::expect_with(|jail| {
            jail.set_env("HEED_COMMAND__HISTORY_BYTES", "0");

            let result = load_config();
            assert!(matches!(result, Err(ConfigError::Invalid { .. })));
            Ok(())
        });
    }

    #[test]
    fn test_missing_file() {
        let result = load_config_from_file("/nonexistent/heed.toml");
        assert!(matches!(result, Err(ConfigError::Missing { .. })));
    }

    #[test]
    fn test_unsupported_extension() {
        Jail::expect_with(|jail| {
            jail.create_file("heed.ini", "prefix = !")?;

            let result = ConfigLoader::new().file("heed.ini").without_env().load();
            assert!(matches!(result, Err(ConfigError::UnsupportedFormat { .. })));
            Ok(())
        });
    }

    #[cfg(feature = "toml-config")]
    #[test]
    fn test_discovers_toml_in_current_dir() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "heed.toml",
                r#"
                [command]
                prefix = "!"

                [logging]
                level = "warn"
                format = "full"

                [permissions]
                super_administrator = "1"
                administrators = ["2"]

                [permissions.group_administrators]
                "3" = ["g1"]

                [replies]
                denial = "Nope: "

                [scheduler]
                period_minutes = 10
                "#,
            )?;

            let config = ConfigLoader::new()
                .without_env()
                .load()
                .map_err(|e| e.to_string())?;

            assert_eq!(config.command.prefix, "!");
            assert_eq!(config.logging.level, LogLevel::Warn);
            assert_eq!(config.permissions.super_administrator.as_deref(), Some("1"));
            assert_eq!(config.permissions.administrators, vec!["2".to_string()]);
            assert_eq!(
                config.permissions.group_administrators.get("3"),
                Some(&vec!["g1".to_string()])
            );
            assert_eq!(config.replies.denial, "Nope: ");
            assert_eq!(
                config.replies.apology,
                heed_framework::ReplyTexts::default().apology
            );
            assert_eq!(config.scheduler.period_minutes, 10);
            Ok(())
        });
    }

    #[cfg(feature = "toml-config")]
    #[test]
    fn test_broken_file_is_an_extract_error() {
        Jail::expect_with(|jail| {
            jail.create_file("heed.toml", "[command\nprefix = ")?;

            let result = ConfigLoader::new().without_env().load();
            assert!(matches!(result, Err(ConfigError::Extract(_))));
            Ok(())
        });
    }

    #[cfg(feature = "yaml-config")]
    #[test]
    fn test_discovers_yaml() {
        Jail::expect_with(|jail| {
            jail.create_file("heed.yml", "command:\n  prefix: \"~\"\n")?;

            let config = ConfigLoader::new()
                .without_env()
                .load()
                .map_err(|e| e.to_string())?;
            assert_eq!(config.command.prefix, "~");
            Ok(())
        });
    }
}
