//! Event system for the heed framework.
//!
//! This module provides the core event infrastructure:
//!
//! - [`Event`] - Base trait for all events
//! - [`BoxedEvent`] - Type-erased, cheaply cloneable event handle
//! - [`GroupMessage`] - The group chat message event produced by adapters
//!
//! The dispatch engine only ever looks at three things on an event: its plain
//! text, its sender and its group. Everything else stays with the adapter that
//! produced it and can be recovered by downcasting.

use std::any::Any;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::message::Message;

// ============================================================================
// Core Event Trait
// ============================================================================

/// The base trait for all events in the heed framework.
///
/// Events are type-erased using `dyn Event` and can be downcast to concrete
/// types using `as_any()`.
pub trait Event: Any + Send + Sync {
    /// Returns the human-readable name of this event type.
    fn event_name(&self) -> &'static str;

    /// Returns the platform/adapter name (e.g., "onebot", "mirai").
    fn platform(&self) -> &'static str {
        "unknown"
    }

    /// Returns a reference to self as `Any` for downcasting.
    fn as_any(&self) -> &dyn Any;

    /// Returns the text-bearing message of this event, if it has one.
    fn message(&self) -> Option<&Message> {
        None
    }

    /// Returns the trimmed plain text of this event.
    ///
    /// `None` means the event carries no text-bearing content at all. A
    /// message made only of images yields `Some("")`.
    fn plain_text(&self) -> Option<String> {
        self.message().map(Message::plain_text)
    }

    /// Returns the identifier of the user who caused this event.
    fn sender_id(&self) -> Option<&str> {
        None
    }

    /// Returns the identifier of the group this event happened in.
    fn group_id(&self) -> Option<&str> {
        None
    }

    /// Returns the platform message id, used for quoting.
    fn message_id(&self) -> Option<i64> {
        None
    }
}

// ============================================================================
// Group Message
// ============================================================================

/// A message posted in a group chat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupMessage {
    /// Platform message id.
    pub message_id: i64,
    /// The group the message was posted in.
    pub group_id: String,
    /// The user who posted it.
    pub sender_id: String,
    /// Display name of the sender, if the platform provides one.
    #[serde(default)]
    pub sender_name: String,
    /// The message content.
    pub message: Message,
}

impl GroupMessage {
    /// Creates a group message with a zero message id and no sender name.
    pub fn new(
        group_id: impl Into<String>,
        sender_id: impl Into<String>,
        message: impl Into<Message>,
    ) -> Self {
        Self {
            message_id: 0,
            group_id: group_id.into(),
            sender_id: sender_id.into(),
            sender_name: String::new(),
            message: message.into(),
        }
    }

    /// Sets the platform message id.
    pub fn with_message_id(mut self, message_id: i64) -> Self {
        self.message_id = message_id;
        self
    }

    /// Sets the sender display name.
    pub fn with_sender_name(mut self, name: impl Into<String>) -> Self {
        self.sender_name = name.into();
        self
    }
}

impl Event for GroupMessage {
    fn event_name(&self) -> &'static str {
        "message.group"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn message(&self) -> Option<&Message> {
        Some(&self.message)
    }

    fn sender_id(&self) -> Option<&str> {
        Some(&self.sender_id)
    }

    fn group_id(&self) -> Option<&str> {
        Some(&self.group_id)
    }

    fn message_id(&self) -> Option<i64> {
        Some(self.message_id)
    }
}

// ============================================================================
// Boxed Event
// ============================================================================

/// A type-erased container for events that supports runtime downcasting.
///
/// `BoxedEvent` wraps any type implementing [`Event`] in an `Arc`, allowing
/// it to be passed through the dispatcher without knowing its concrete type.
///
/// # Deref to Event Trait
///
/// `BoxedEvent` implements `Deref<Target = dyn Event>`, so trait methods can be
/// called directly:
///
/// ```rust
/// use heed_core::{BoxedEvent, GroupMessage};
///
/// let event = BoxedEvent::new(GroupMessage::new("1", "2", "hello"));
/// assert_eq!(event.plain_text().as_deref(), Some("hello"));
/// assert_eq!(event.sender_id(), Some("2"));
/// ```
#[derive(Clone)]
pub struct BoxedEvent {
    inner: Arc<dyn Event>,
}

impl BoxedEvent {
    /// Creates a new `BoxedEvent` from any type implementing `Event`.
    pub fn new<E: Event + 'static>(event: E) -> Self {
        Self {
            inner: Arc::new(event),
        }
    }

    /// Wraps an already shared event.
    pub fn from_arc(inner: Arc<dyn Event>) -> Self {
        Self { inner }
    }

    /// Returns the inner `Arc<dyn Event>`.
    pub fn inner(&self) -> &Arc<dyn Event> {
        &self.inner
    }

    /// Attempts to downcast to a concrete event type.
    pub fn downcast_ref<E: Event + 'static>(&self) -> Option<&E> {
        self.inner.as_any().downcast_ref()
    }

    /// Returns true if both handles point at the same event instance.
    pub fn ptr_eq(&self, other: &BoxedEvent) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl std::ops::Deref for BoxedEvent {
    type Target = dyn Event;

    fn deref(&self) -> &Self::Target {
        self.inner.as_ref()
    }
}

impl std::fmt::Debug for BoxedEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxedEvent")
            .field("event_name", &self.event_name())
            .field("platform", &self.platform())
            .field("sender", &self.sender_id())
            .field("group", &self.group_id())
            .finish()
    }
}
