//! Foundation layer - Core abstractions and type system.
//!
//! This module contains the fundamental building blocks of the heed framework:
//! - Event system for type-erased event passing
//! - Message model shared by inbound events and outbound replies
//! - Delivery errors reported by bots

pub mod error;
pub mod event;
pub mod message;

pub use error::{DeliveryError, DeliveryResult};
pub use event::{BoxedEvent, Event, GroupMessage};
pub use message::{Message, Segment};
