//! # heed
//!
//! An interest-driven chat-bot framework.
//!
//! ## Overview
//!
//! Handlers say what they care about with an [`Interest`](framework::Interest):
//! conditions over the message text, the sender and the group, each bound to
//! a named action. The engine matches every inbound event, resolves the bound
//! action against an [`ActionTable`](framework::ActionTable), checks
//! permissions and runs it, then delivers whatever it returns.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐     ┌────────────┐     ┌───────────────────────────────────────┐
//! │ Transport │────▶│ Dispatcher │────▶│ Context: pre-interceptors             │
//! │  (Bot)    │     │            │     │          handlers by priority         │──▶ Bot::send
//! └───────────┘     └────────────┘     │          post-interceptors            │
//!                         │            └───────────────────────────────────────┘
//!                         └──▶ pending dialogue waits take the event first
//! ```
//!
//! - **Runtime**: configuration, logging, the inbound loop and the scheduler
//! - **Dispatcher**: command routing, dialogue precedence, one context per event
//! - **Registry**: the task that owns the handler and interceptor lists
//! - **Handlers**: interest-driven handlers, command parsers, or your own
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use heed::prelude::*;
//!
//! async fn greet(args: DispatchArgs) -> String {
//!     format!("hello, {}", args.event.sender_id().unwrap_or("stranger"))
//! }
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let runtime = HeedRuntime::new();
//!
//!     let interest = Interest::builder()
//!         .on_callback(MatchMode::Equals, "hi", "greet")
//!         .build()?;
//!     let actions = ActionTable::new("greeter").action("greet", greet);
//!     runtime
//!         .add_handler(InterestHandler::new("greeter", interest, actions))
//!         .await?;
//!
//!     let events = runtime.sender();
//!     tokio::spawn(my_transport(events));
//!
//!     runtime.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - `toml-config`: TOML configuration files (default)
//! - `yaml-config`: YAML configuration files
//! - `json-log`: JSON log output

pub use heed_core as core;
pub use heed_framework as framework;
pub use heed_runtime as runtime;

pub use async_trait::async_trait;

/// Prelude module for convenient imports.
///
/// ```rust,ignore
/// use heed::prelude::*;
/// ```
pub mod prelude {
    // Runtime - main entry point
    pub use heed_runtime::{HeedConfig, HeedRuntime, PeriodicJob, Scheduler};

    // Interests and actions
    pub use heed_framework::{
        Action, ActionTable, DispatchArgs, Extra, Interest, InterestFilter, MatchMode,
    };

    // Handlers and pipeline
    pub use heed_framework::{
        CommandParser, Context, Handler, Inbound, Interceptor, InterestHandler, PermissionLevel,
    };

    // Errors
    pub use heed_framework::{DispatchError, DispatchResult};

    // Core types
    pub use heed_core::{Bot, BoxedBot, BoxedEvent, Event, GroupMessage, Message, Segment};

    pub use async_trait::async_trait;
}
