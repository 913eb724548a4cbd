//! heed Runtime - configuration, logging and the event loop.
//!
//! This crate provides:
//! - Layered configuration with figment ([`config`])
//! - Logging setup on `tracing-subscriber` ([`logging`])
//! - [`HeedRuntime`], which wires configuration into a
//!   [`Dispatcher`](heed_framework::Dispatcher) and runs the inbound loop
//! - A [`Scheduler`] for background tasks and periodic jobs ([`scheduler`])
//!
//! ```ignore
//! use heed_runtime::HeedRuntime;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let runtime = HeedRuntime::new();
//!     runtime.add_handler(my_handler).await?;
//!
//!     // Hand the sender to your transport.
//!     let events = runtime.sender();
//!
//!     // Run until Ctrl+C
//!     runtime.run().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod logging;
pub mod runtime;
pub mod scheduler;

// Re-exports
pub use config::{
    ConfigError, ConfigLoader, ConfigResult, HeedConfig, LoggingConfig, load_config,
    load_config_from_file,
};
pub use error::{RuntimeError, RuntimeResult};
pub use runtime::{HeedRuntime, INBOUND_CAPACITY, RuntimeBuilder};
pub use scheduler::{PeriodicJob, Scheduler};

// Re-export tracing for use by other crates
pub use tracing;
pub use tracing_subscriber;

/// Prelude module for convenient imports.
///
/// This provides the commonly used logging macros.
pub mod prelude {
    pub use tracing::{Level, debug, error, info, instrument, span, trace, warn};
}
