//! Reply templates for static output actions.
//!
//! A template is text with inline tags. The default [`TagRenderer`] knows:
//!
//! | Tag             | Segment                              |
//! |-----------------|--------------------------------------|
//! | `[at:sender]`   | mention of the event's sender        |
//! | `[at:all]`      | mention of everyone                  |
//! | `[at:<id>]`     | mention of `<id>`                    |
//! | `[image:<url>]` | image                                |
//! | `[face:<id>]`   | platform face                        |
//! | `[reply]`       | quote of the event's message         |
//!
//! Anything else is kept as text.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use heed_core::{Event, Message, Segment};

use crate::error::{DispatchError, DispatchResult};

static TAG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\[(at|image|face|reply)(?::([^\]]*))?\]").expect("tag pattern is valid")
});

/// Turns an output action's template into a reply.
///
/// Implementations may do I/O, for instance to fetch remote text or images.
#[async_trait]
pub trait TemplateRenderer: Send + Sync {
    /// Renders `template` as a reply to `event`.
    async fn render(&self, template: &str, event: &dyn Event) -> DispatchResult<Message>;
}

/// The built-in tag-based renderer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TagRenderer;

impl TagRenderer {
    /// Renders synchronously; the async trait method delegates here.
    pub fn render_now(&self, template: &str, event: &dyn Event) -> DispatchResult<Message> {
        let mut message = Message::new();
        let mut last = 0;

        for caps in TAG.captures_iter(template) {
            let Some(whole) = caps.get(0) else { continue };
            push_text(&mut message, &template[last..whole.start()]);
            if let Some(segment) = Self::tag(&caps, event)? {
                message.push(segment);
            }
            last = whole.end();
        }
        push_text(&mut message, &template[last..]);

        Ok(message)
    }

    fn tag(caps: &Captures<'_>, event: &dyn Event) -> DispatchResult<Option<Segment>> {
        let arg = caps.get(2).map_or("", |m| m.as_str());
        let segment = match &caps[1] {
            "at" => match arg {
                "all" => Segment::AtAll,
                "sender" => Segment::At {
                    target: event
                        .sender_id()
                        .ok_or_else(|| template_error("[at:sender] used on an event without sender"))?
                        .to_string(),
                },
                "" => return Err(template_error("[at] needs a target")),
                id => Segment::At { target: id.into() },
            },
            "image" if !arg.is_empty() => Segment::Image { url: arg.into() },
            "image" => return Err(template_error("[image] needs a url")),
            "face" => Segment::Face {
                id: arg
                    .parse()
                    .map_err(|_| template_error(format!("invalid face id '{arg}'")))?,
            },
            "reply" => match event.message_id() {
                Some(message_id) => Segment::Reply { message_id },
                None => return Ok(None),
            },
            other => return Err(template_error(format!("unknown tag '{other}'"))),
        };
        Ok(Some(segment))
    }
}

#[async_trait]
impl TemplateRenderer for TagRenderer {
    async fn render(&self, template: &str, event: &dyn Event) -> DispatchResult<Message> {
        self.render_now(template, event)
    }
}

fn push_text(message: &mut Message, text: &str) {
    if !text.is_empty() {
        message.push(Segment::text(text));
    }
}

fn template_error(reason: impl Into<String>) -> DispatchError {
    DispatchError::Template {
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use heed_core::GroupMessage;

    #[test]
    fn test_plain_text_passes_through() {
        let event = GroupMessage::new("g", "u", "x");
        let msg = TagRenderer.render_now("hello there", &event).unwrap();
        assert_eq!(msg, Message::new().text("hello there"));
    }

    #[test]
    fn test_tags() {
        let event = GroupMessage::new("g", "u42", "x").with_message_id(9);
        let msg = TagRenderer
            .render_now("[reply][at:sender] look [image:http://x/y.png][face:14]", &event)
            .unwrap();

        assert_eq!(
            msg.as_slice(),
            &[
                Segment::Reply { message_id: 9 },
                Segment::At {
                    target: "u42".into()
                },
                Segment::text(" look "),
                Segment::Image {
                    url: "http://x/y.png".into()
                },
                Segment::Face { id: 14 },
            ]
        );
    }

    #[test]
    fn test_unknown_brackets_are_text() {
        let event = GroupMessage::new("g", "u", "x");
        let msg = TagRenderer.render_now("[note] [at:all]", &event).unwrap();
        assert_eq!(
            msg.as_slice(),
            &[Segment::text("[note] "), Segment::AtAll]
        );
    }

    #[test]
    fn test_bad_face_id() {
        let event = GroupMessage::new("g", "u", "x");
        let err = TagRenderer.render_now("[face:smile]", &event).unwrap_err();
        assert!(matches!(err, DispatchError::Template { .. }));
    }
}
