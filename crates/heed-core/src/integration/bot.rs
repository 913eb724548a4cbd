//! Bot trait.
//!
//! A `Bot` is the transport side of the framework: the adapter that received
//! an event also knows how to answer it.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::trace;

use crate::foundation::error::DeliveryResult;
use crate::foundation::event::Event;
use crate::foundation::message::Message;

/// The core Bot trait.
///
/// Implementations wrap a connection to a chat platform. The engine never
/// talks to the wire itself; it hands rendered replies to [`Bot::send`]
/// together with the event being answered, and the bot decides where they go
/// (usually the group the event came from).
///
/// # Example
///
/// ```rust,ignore
/// struct ConsoleBot;
///
/// #[async_trait]
/// impl Bot for ConsoleBot {
///     fn id(&self) -> &str { "console" }
///     fn adapter_name(&self) -> &str { "console" }
///
///     async fn send(&self, event: &dyn Event, message: Message) -> DeliveryResult<i64> {
///         println!("[{:?}] {}", event.group_id(), message);
///         Ok(0)
///     }
/// }
/// ```
#[async_trait]
pub trait Bot: Send + Sync {
    /// Returns the bot's unique identifier.
    fn id(&self) -> &str;

    /// Returns the adapter name (e.g. "onebot").
    fn adapter_name(&self) -> &str;

    /// Sends one message as a reply to `event`.
    ///
    /// Returns the platform message id of the sent message.
    async fn send(&self, event: &dyn Event, message: Message) -> DeliveryResult<i64>;

    /// Sends several replies to `event`, in order.
    ///
    /// Empty messages are skipped. The first failure aborts the batch.
    async fn send_all(&self, event: &dyn Event, messages: Vec<Message>) -> DeliveryResult<()> {
        for message in messages {
            if message.is_empty() {
                continue;
            }
            let id = self.send(event, message).await?;
            trace!(bot = %self.id(), message_id = id, "Reply sent");
        }
        Ok(())
    }
}

/// A type alias for a boxed bot.
pub type BoxedBot = Arc<dyn Bot>;
