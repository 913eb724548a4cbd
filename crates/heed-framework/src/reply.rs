//! Canned replies sent when dispatch fails in a user-visible way.

use serde::{Deserialize, Serialize};

use heed_core::{Event, Message, Segment};

/// Texts used for the replies the engine writes on its own.
///
/// Each text is followed by the failure detail where there is one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplyTexts {
    /// A callback failed or could not be resolved.
    pub apology: String,
    /// The sender lacks a required permission.
    pub denial: String,
    /// A command could not be parsed.
    pub parse_error: String,
    /// No command handler claimed a command.
    pub unrecognized_command: String,
}

impl Default for ReplyTexts {
    fn default() -> Self {
        Self {
            apology: "Something unexpected went wrong: ".into(),
            denial: "Sorry, you do not have permission: ".into(),
            parse_error: "Could not parse the command: ".into(),
            unrecognized_command: "Unrecognized command ".into(),
        }
    }
}

impl ReplyTexts {
    /// Builds `text` + `detail` as a reply quoting `event`.
    pub fn quoted(event: &dyn Event, text: &str, detail: impl std::fmt::Display) -> Message {
        let mut message = Message::new();
        if let Some(message_id) = event.message_id() {
            message.push(Segment::Reply { message_id });
        }
        message.text(format!("{text}{detail}"))
    }
}
