//! Logging setup for heed.
//!
//! [`init_from_config`] installs a global `tracing-subscriber` stack built
//! from [`LoggingConfig`]. The filter starts from `RUST_LOG` when it is set,
//! otherwise from the configured level, with the per-module levels added on
//! top. Span events can be switched on to watch each `dispatch` and
//! `pipeline` span open and close.
//!
//! Problems found while reading the configuration (an unparsable module
//! filter, an unavailable format, an unusable log file) never stop startup.
//! They are reported as warnings through the subscriber once it is
//! installed.
//!
//! ```rust,ignore
//! use heed_runtime::config::load_config;
//! use heed_runtime::logging;
//!
//! let config = load_config()?;
//! logging::init_from_config(&config.logging);
//! ```

use std::ffi::OsStr;
use std::path::Path;

use tracing::{debug, warn};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::filter::Directive;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt};

use crate::config::{LogFormat, LogOutput, LoggingConfig, SpanEventConfig};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Installs the global subscriber described by `config`.
///
/// Keeps an already installed subscriber and returns false in that case.
pub fn init_from_config(config: &LoggingConfig) -> bool {
    match try_init_from_config(config) {
        Ok(()) => true,
        Err(_) => {
            debug!("Global subscriber already installed, keeping it");
            false
        }
    }
}

/// Like [`init_from_config`], but reports a subscriber that is already
/// installed as an error.
pub fn try_init_from_config(config: &LoggingConfig) -> Result<(), TryInitError> {
    let mut setup = Setup::from_config(config);
    let warnings = std::mem::take(&mut setup.warnings);

    tracing_subscriber::registry()
        .with(setup.layer)
        .with(setup.filter)
        .try_init()?;

    for message in warnings {
        warn!("{message}");
    }
    Ok(())
}

/// Everything needed to install the subscriber, plus what went wrong while
/// working it out.
struct Setup {
    filter: EnvFilter,
    layer: BoxedLayer,
    warnings: Vec<String>,
}

impl Setup {
    fn from_config(config: &LoggingConfig) -> Self {
        let mut warnings = Vec::new();
        let filter = build_filter(config, &mut warnings);
        let writer = build_writer(config, &mut warnings);
        let layer = build_layer(config, writer, &mut warnings);
        Self {
            filter,
            layer,
            warnings,
        }
    }
}

fn span_events(config: &SpanEventConfig) -> FmtSpan {
    let mut span = FmtSpan::NONE;
    for (enabled, flag) in [
        (config.new, FmtSpan::NEW),
        (config.enter, FmtSpan::ENTER),
        (config.exit, FmtSpan::EXIT),
        (config.close, FmtSpan::CLOSE),
    ] {
        if enabled {
            span |= flag;
        }
    }
    span
}

/// Sorted so the resulting filter does not depend on map order.
fn module_directives(config: &LoggingConfig) -> Vec<String> {
    let mut modules: Vec<_> = config.filters.iter().collect();
    modules.sort_by(|a, b| a.0.cmp(b.0));
    modules
        .into_iter()
        .map(|(module, level)| format!("{module}={level}"))
        .collect()
}

fn build_filter(config: &LoggingConfig, warnings: &mut Vec<String>) -> EnvFilter {
    let mut filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_str()));

    for directive in module_directives(config) {
        match directive.parse::<Directive>() {
            Ok(parsed) => filter = filter.add_directive(parsed),
            Err(e) => warnings.push(format!("Ignoring invalid log filter {directive:?}: {e}")),
        }
    }
    filter
}

fn build_writer(config: &LoggingConfig, warnings: &mut Vec<String>) -> BoxMakeWriter {
    match config.output {
        LogOutput::Stdout => BoxMakeWriter::new(std::io::stdout),
        LogOutput::Stderr => BoxMakeWriter::new(std::io::stderr),
        LogOutput::File => {
            let Some(path) = config.file_path.as_deref() else {
                warnings.push("Log output is `file` but no file_path is set, logging to stdout".into());
                return BoxMakeWriter::new(std::io::stdout);
            };
            match open_log_file(path) {
                Ok(appender) => BoxMakeWriter::new(appender),
                Err(e) => {
                    warnings.push(format!(
                        "Cannot open log file {}: {e}, logging to stdout",
                        path.display()
                    ));
                    BoxMakeWriter::new(std::io::stdout)
                }
            }
        }
    }
}

fn open_log_file(
    path: &Path,
) -> Result<RollingFileAppender, tracing_appender::rolling::InitError> {
    let directory = path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let name = path
        .file_name()
        .unwrap_or_else(|| OsStr::new("heed.log"))
        .to_string_lossy();

    RollingFileAppender::builder()
        .rotation(Rotation::NEVER)
        .filename_prefix(name)
        .build(directory)
}

fn build_layer(
    config: &LoggingConfig,
    writer: BoxMakeWriter,
    warnings: &mut Vec<String>,
) -> BoxedLayer {
    let layer = fmt::layer()
        .with_writer(writer)
        .with_span_events(span_events(&config.span_events))
        .with_thread_ids(config.thread_ids)
        .with_file(config.file_location)
        .with_line_number(config.file_location);

    match config.format {
        LogFormat::Compact => layer.compact().boxed(),
        LogFormat::Full => layer.boxed(),
        LogFormat::Pretty => layer.pretty().boxed(),
        #[cfg(feature = "json-log")]
        LogFormat::Json => layer.json().boxed(),
        #[cfg(not(feature = "json-log"))]
        LogFormat::Json => {
            warnings.push("JSON logging needs the `json-log` feature, using the full format".into());
            layer.boxed()
        }
    }
}
