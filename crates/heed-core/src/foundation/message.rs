//! Message model for the heed framework.
//!
//! A [`Message`] is an ordered list of [`Segment`]s. Inbound events carry one
//! and handlers reply with zero or more of them.
//!
//! # Example
//!
//! ```rust
//! use heed_core::{Message, Segment};
//!
//! let msg = Message::new()
//!     .at("10001")
//!     .text(" good morning")
//!     .image("https://example.com/sun.png");
//!
//! assert_eq!(msg.plain_text(), "good morning");
//! assert_eq!(msg.len(), 3);
//! assert!(matches!(msg.iter().next(), Some(Segment::At { .. })));
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

// ============================================================================
// Segment
// ============================================================================

/// A single unit of message content.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Segment {
    /// Plain text.
    Text { text: String },
    /// A mention of a single user.
    At { target: String },
    /// A mention of everyone in the group.
    AtAll,
    /// An image, referenced by URL or file path.
    Image { url: String },
    /// A platform face/emoji.
    Face { id: i32 },
    /// A quote of an earlier message.
    Reply { message_id: i64 },
}

impl Segment {
    /// Creates a text segment.
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Returns the type identifier of this segment (e.g. "text", "image", "at").
    pub fn segment_type(&self) -> &'static str {
        match self {
            Self::Text { .. } => "text",
            Self::At { .. } => "at",
            Self::AtAll => "at_all",
            Self::Image { .. } => "image",
            Self::Face { .. } => "face",
            Self::Reply { .. } => "reply",
        }
    }

    /// Returns true if this is a plain text segment.
    pub fn is_text(&self) -> bool {
        matches!(self, Self::Text { .. })
    }

    /// Returns the text content if this is a text segment.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
            _ => None,
        }
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text { text } => f.write_str(text),
            Self::At { target } => write!(f, "[at:{target}]"),
            Self::AtAll => f.write_str("[at:all]"),
            Self::Image { url } => write!(f, "[image:{url}]"),
            Self::Face { id } => write!(f, "[face:{id}]"),
            Self::Reply { message_id } => write!(f, "[reply:{message_id}]"),
        }
    }
}

// ============================================================================
// Message
// ============================================================================

/// An ordered sequence of [`Segment`]s.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Message {
    segments: Vec<Segment>,
}

impl Message {
    /// Creates an empty message.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a segment.
    pub fn push(&mut self, segment: Segment) {
        self.segments.push(segment);
    }

    /// Appends a segment, builder style.
    pub fn segment(mut self, segment: Segment) -> Self {
        self.segments.push(segment);
        self
    }

    /// Appends a text segment.
    pub fn text(self, text: impl Into<String>) -> Self {
        self.segment(Segment::text(text))
    }

    /// Appends a mention.
    pub fn at(self, target: impl Into<String>) -> Self {
        self.segment(Segment::At {
            target: target.into(),
        })
    }

    /// Appends an image.
    pub fn image(self, url: impl Into<String>) -> Self {
        self.segment(Segment::Image { url: url.into() })
    }

    /// Returns an iterator over the segments.
    pub fn iter(&self) -> impl Iterator<Item = &Segment> {
        self.segments.iter()
    }

    /// Returns the segments as a slice.
    pub fn as_slice(&self) -> &[Segment] {
        &self.segments
    }

    /// Returns the number of segments.
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// Returns true if the message has no segments.
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Concatenates the text segments and trims surrounding whitespace.
    ///
    /// Mentions, images and every other non-text segment are ignored.
    pub fn plain_text(&self) -> String {
        self.segments
            .iter()
            .filter_map(Segment::as_text)
            .collect::<String>()
            .trim()
            .to_string()
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for segment in &self.segments {
            write!(f, "{segment}")?;
        }
        Ok(())
    }
}

impl From<&str> for Message {
    fn from(text: &str) -> Self {
        Self::new().text(text)
    }
}

impl From<String> for Message {
    fn from(text: String) -> Self {
        Self::new().text(text)
    }
}

impl From<Vec<Segment>> for Message {
    fn from(segments: Vec<Segment>) -> Self {
        Self { segments }
    }
}

impl FromIterator<Segment> for Message {
    fn from_iter<I: IntoIterator<Item = Segment>>(iter: I) -> Self {
        Self {
            segments: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for Message {
    type Item = Segment;
    type IntoIter = std::vec::IntoIter<Segment>;

    fn into_iter(self) -> Self::IntoIter {
        self.segments.into_iter()
    }
}
