//! Command handling.
//!
//! Messages starting with the command prefix (`#` by default) are routed to
//! command handlers instead of the normal pipeline. Before that, the prefix is
//! stripped: a command handler sees `#roll 2d6` as `roll 2d6`.
//!
//! A [`CommandParser`] does the actual work. Wrapping it in a
//! [`CommandHandler`] turns parse, permission and other failures into replies
//! and records every outcome in a [`CommandJournal`].

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, error};

use heed_core::{BoxedEvent, Event, Message, Segment};

use crate::context::Context;
use crate::error::{DispatchError, DispatchResult};
use crate::handler::Handler;
use crate::reply::ReplyTexts;

/// Default command prefix.
pub const DEFAULT_PREFIX: &str = "#";

/// Default journal capacity in bytes.
pub const DEFAULT_JOURNAL_BYTES: usize = 1024;

// =============================================================================
// StrippedEvent
// =============================================================================

/// An event whose message has had the command prefix removed.
///
/// Everything except the message delegates to the original event.
pub struct StrippedEvent {
    original: BoxedEvent,
    prefix: String,
    message: Message,
}

impl StrippedEvent {
    /// Strips `prefix` from `event` if its plain text starts with it.
    ///
    /// The prefix is removed from the first text segment. An empty prefix
    /// never matches.
    pub fn strip(event: &BoxedEvent, prefix: &str) -> Option<Self> {
        if prefix.is_empty() {
            return None;
        }
        let message = event.message()?;
        if !message.plain_text().starts_with(prefix) {
            return None;
        }

        let mut stripped = false;
        let message = message
            .iter()
            .map(|segment| match segment {
                Segment::Text { text } if !stripped && text.contains(prefix) => {
                    stripped = true;
                    Segment::text(text.replacen(prefix, "", 1))
                }
                other => other.clone(),
            })
            .collect();

        Some(Self {
            original: event.clone(),
            prefix: prefix.to_string(),
            message,
        })
    }

    /// Returns the event before stripping.
    pub fn original(&self) -> &BoxedEvent {
        &self.original
    }

    /// Returns the prefix that was stripped.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }
}

impl Event for StrippedEvent {
    fn event_name(&self) -> &'static str {
        self.original.event_name()
    }

    fn platform(&self) -> &'static str {
        self.original.platform()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn message(&self) -> Option<&Message> {
        Some(&self.message)
    }

    fn sender_id(&self) -> Option<&str> {
        self.original.sender_id()
    }

    fn group_id(&self) -> Option<&str> {
        self.original.group_id()
    }

    fn message_id(&self) -> Option<i64> {
        self.original.message_id()
    }
}

impl fmt::Debug for StrippedEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StrippedEvent")
            .field("original", &self.original)
            .field("prefix", &self.prefix)
            .field("message", &self.message)
            .finish()
    }
}

// =============================================================================
// Argument splitting
// =============================================================================

/// Splits command text into arguments.
///
/// Whitespace separates arguments. Single and double quotes group words, and
/// a backslash inside double quotes escapes the next character.
pub fn split_arguments(input: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for ch in input.chars() {
        if escaped {
            current.push(ch);
            escaped = false;
            continue;
        }
        match (quote, ch) {
            (Some('"'), '\\') => escaped = true,
            (Some(open), c) if c == open => quote = None,
            (None, '"' | '\'') => quote = Some(ch),
            (None, c) if c.is_whitespace() => {
                if !current.is_empty() {
                    args.push(std::mem::take(&mut current));
                }
            }
            _ => current.push(ch),
        }
    }
    if !current.is_empty() {
        args.push(current);
    }
    args
}

// =============================================================================
// Journal
// =============================================================================

/// Bounded in-memory history of command outcomes.
///
/// Once the history exceeds its capacity the oldest bytes are dropped.
#[derive(Debug)]
pub struct CommandJournal {
    capacity: usize,
    buffer: Mutex<String>,
}

impl Default for CommandJournal {
    fn default() -> Self {
        Self::new(DEFAULT_JOURNAL_BYTES)
    }
}

impl CommandJournal {
    /// Creates a journal holding at most `capacity` bytes.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            buffer: Mutex::new(String::new()),
        }
    }

    /// Returns the capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Records a successful command.
    pub fn success(&self, event: &dyn Event) {
        self.append(format!("[SUCCESS] {}\n", describe(event)));
    }

    /// Records a failed command and logs it.
    pub fn failure(&self, event: &dyn Event, reason: &DispatchError) {
        error!(
            event_name = %event.event_name(),
            sender = ?event.sender_id(),
            group = ?event.group_id(),
            text = ?event.plain_text(),
            error = %reason,
            "Command failed"
        );
        self.append(format!("[FAILURE] {} => {reason}\n", describe(event)));
    }

    /// Returns the current history.
    pub fn snapshot(&self) -> String {
        self.buffer.lock().clone()
    }

    /// Clears the history.
    pub fn flush(&self) {
        self.buffer.lock().clear();
    }

    fn append(&self, line: String) {
        let mut buffer = self.buffer.lock();
        buffer.push_str(&line);
        if buffer.len() > self.capacity {
            let mut cut = buffer.len() - self.capacity;
            while !buffer.is_char_boundary(cut) {
                cut += 1;
            }
            buffer.drain(..cut);
        }
    }
}

fn describe(event: &dyn Event) -> String {
    format!(
        "{} group={} sender={} text={:?}",
        event.event_name(),
        event.group_id().unwrap_or("-"),
        event.sender_id().unwrap_or("-"),
        event.plain_text().unwrap_or_default(),
    )
}

// =============================================================================
// Parser and handler
// =============================================================================

/// Something that understands a family of commands.
///
/// The event in the context has the prefix stripped already.
#[async_trait]
pub trait CommandParser: Send + Sync + 'static {
    /// Unique name.
    fn name(&self) -> &str;

    /// Higher runs first.
    fn priority(&self) -> i32 {
        1
    }

    /// Returns true to claim the command.
    fn should_handle(&self, ctx: &Context) -> bool;

    /// Executes the command.
    ///
    /// Return [`DispatchError::CommandParse`] for malformed input and
    /// [`DispatchError::InsufficientPermission`] to deny the sender.
    async fn parse_command(&self, ctx: Arc<Context>) -> DispatchResult<Vec<Message>>;
}

/// Adapts a [`CommandParser`] into a command [`Handler`].
pub struct CommandHandler<P> {
    parser: P,
    journal: Arc<CommandJournal>,
}

impl<P: CommandParser> CommandHandler<P> {
    /// Wraps `parser` with a private journal of the default size.
    pub fn new(parser: P) -> Self {
        Self {
            parser,
            journal: Arc::new(CommandJournal::default()),
        }
    }

    /// Records outcomes in `journal` instead.
    pub fn with_journal(mut self, journal: Arc<CommandJournal>) -> Self {
        self.journal = journal;
        self
    }

    /// Returns the journal.
    pub fn journal(&self) -> &Arc<CommandJournal> {
        &self.journal
    }
}

#[async_trait]
impl<P: CommandParser> Handler for CommandHandler<P> {
    fn name(&self) -> &str {
        self.parser.name()
    }

    fn priority(&self) -> i32 {
        self.parser.priority()
    }

    fn is_command(&self) -> bool {
        true
    }

    fn should_handle(&self, ctx: &Context) -> bool {
        self.parser.should_handle(ctx)
    }

    async fn handle(&self, ctx: Arc<Context>) -> DispatchResult<Vec<Message>> {
        let event = ctx.event().clone();
        let err = match self.parser.parse_command(ctx.clone()).await {
            Ok(replies) => {
                self.journal.success(&*event);
                return Ok(replies);
            }
            Err(err) if err.is_silent() => {
                debug!(command = %self.parser.name(), reason = %err, "Command produced nothing");
                return Ok(Vec::new());
            }
            Err(err) => err,
        };

        self.journal.failure(&*event, &err);
        let texts = ctx.texts();
        let text = match &err {
            DispatchError::CommandParse { .. } => &texts.parse_error,
            DispatchError::InsufficientPermission { .. } => &texts.denial,
            _ => &texts.apology,
        };
        Ok(vec![ReplyTexts::quoted(&*event, text, &err)])
    }
}

impl<P> fmt::Debug for CommandHandler<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandHandler")
            .field("journal", &self.journal)
            .finish_non_exhaustive()
    }
}
