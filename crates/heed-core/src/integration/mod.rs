//! Integration layer - External system interfaces.
//!
//! The only interface the engine needs from the outside world is a [`Bot`]
//! that can deliver replies.

pub mod bot;

pub use bot::{Bot, BoxedBot};
