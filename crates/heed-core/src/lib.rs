//! # heed Core
//!
//! The foundation types of the heed chat-bot framework.
//!
//! ## Architecture Layers
//!
//! ### Foundation Layer
//!
//! Core abstractions and type system:
//! - **Event System**: Type-erased events with runtime downcasting ([`Event`], [`BoxedEvent`])
//! - **Message Model**: Segments and messages shared by events and replies ([`Message`], [`Segment`])
//! - **Errors**: Delivery failures ([`DeliveryError`])
//!
//! ### Integration Layer
//!
//! External system interfaces:
//! - **Bot**: The transport collaborator that delivers replies ([`Bot`])
//!
//! The dispatch engine itself lives in `heed-framework`.

pub mod foundation;
pub mod integration;

pub use foundation::{
    BoxedEvent, DeliveryError, DeliveryResult, Event, GroupMessage, Message, Segment,
};
pub use integration::{Bot, BoxedBot};

/// Prelude for common imports.
pub mod prelude {
    pub use super::foundation::*;
    pub use super::integration::*;
}
