//! # heed Framework
//!
//! The dispatch engine of the heed chat-bot framework.
//!
//! This layer provides:
//! - [`Interest`]: declarative conditions over an event's text, sender and
//!   group, composable by nesting, with actions bound per condition
//! - [`ActionTable`] and [`Invoker`]: named async callbacks and the rules for
//!   binding a match to one of them
//! - [`Context`]: the per-event pipeline of interceptors and handlers
//! - [`Registry`]: the task that owns the handler and interceptor lists
//! - [`ContinuousDialogue`]: waiting inside a handler for the next message
//! - [`Dispatcher`]: command routing and the entry point for inbound events
//!
//! Transports live outside this crate. They implement
//! [`Bot`](heed_core::Bot) and feed events to a [`Dispatcher`].

pub mod action;
pub mod command;
pub mod context;
pub mod dialogue;
pub mod dispatcher;
pub mod error;
pub mod handler;
pub mod interceptor;
pub mod interest;
pub mod permission;
pub mod registry;
pub mod reply;
pub mod template;

#[cfg(test)]
pub(crate) mod test_support;

pub use action::{
    ActionCall, ActionEntry, ActionFn, ActionTable, DispatchArgs, Extra, ExtraArg, FromDispatch,
    IntoReplies, Invoker, ParamKind,
};
pub use command::{
    CommandHandler, CommandJournal, CommandParser, StrippedEvent, split_arguments,
};
pub use context::{Context, ContextStatus, Services};
pub use dialogue::{ContinuousDialogue, DEFAULT_DIALOGUE_TIMEOUT, NextEvent};
pub use dispatcher::{DispatchOutcome, Dispatcher, Inbound};
pub use error::{BoxError, DispatchError, DispatchResult, InterestError};
pub use handler::{BoxedHandler, Handler, InterestHandler};
pub use interceptor::{BoxedInterceptor, Interceptor};
pub use interest::{
    Action, Interest, InterestBuilder, InterestFilter, MAX_DEPTH, MatchMode, Matched, Resolution,
};
pub use permission::{ConfigPermissionManager, PermissionLevel, PermissionManager, PermissionTable};
pub use registry::{Registry, RegistrySnapshot};
pub use reply::ReplyTexts;
pub use template::{TagRenderer, TemplateRenderer};
