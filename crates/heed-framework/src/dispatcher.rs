//! Event dispatcher.
//!
//! The dispatcher is the entry point for inbound events:
//!
//! 1. a leading command prefix is stripped;
//! 2. the event is offered to pending dialogue waits, which take precedence;
//! 3. a [`Context`] is built from the latest registry snapshot, with command
//!    handlers for commands and normal handlers otherwise, and executed;
//! 4. a command nobody handled gets the unrecognized-command reply.
//!
//! [`Dispatcher`] is also a [`tower::Service`] over [`Inbound`], so transports
//! can drive it with the usual tower utilities.

use std::fmt;
use std::sync::Arc;
use std::task::{Context as TaskContext, Poll};

use futures::future::BoxFuture;
use tower::Service;
use tracing::{Instrument, Level, debug, error, span};

use heed_core::{BoxedBot, BoxedEvent};

use crate::command::{DEFAULT_PREFIX, StrippedEvent};
use crate::context::{Context, Services};
use crate::dialogue::ContinuousDialogue;
use crate::error::DispatchError;
use crate::registry::Registry;
use crate::reply::ReplyTexts;

/// One inbound event together with the bot that received it.
#[derive(Clone)]
pub struct Inbound {
    /// The event.
    pub event: BoxedEvent,
    /// The bot that received it and will deliver replies.
    pub bot: BoxedBot,
}

impl Inbound {
    /// Pairs an event with its bot.
    pub fn new(event: BoxedEvent, bot: BoxedBot) -> Self {
        Self { event, bot }
    }
}

impl fmt::Debug for Inbound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Inbound")
            .field("event", &self.event)
            .field("bot", &self.bot.id())
            .finish()
    }
}

/// What happened to an inbound event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// A pending dialogue wait consumed the event.
    Dialogue,
    /// The pipeline ran; this many handlers were invoked.
    Handled(usize),
    /// A command reached no command handler.
    UnknownCommand,
}

/// Routes inbound events through dialogue waits and handler pipelines.
#[derive(Clone)]
pub struct Dispatcher {
    registry: Registry,
    services: Services,
    prefix: Arc<str>,
}

impl Dispatcher {
    /// Creates a dispatcher using the default command prefix.
    pub fn new(registry: Registry, services: Services) -> Self {
        Self {
            registry,
            services,
            prefix: Arc::from(DEFAULT_PREFIX),
        }
    }

    /// Sets the command prefix. An empty prefix disables command routing.
    pub fn with_prefix(mut self, prefix: impl AsRef<str>) -> Self {
        self.prefix = Arc::from(prefix.as_ref());
        self
    }

    /// Returns the registry handle.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Returns the shared services.
    pub fn services(&self) -> &Services {
        &self.services
    }

    /// Returns the dialogue service.
    pub fn dialogue(&self) -> &Arc<ContinuousDialogue> {
        &self.services.dialogue
    }

    /// Returns the command prefix.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Dispatches one event.
    pub async fn dispatch(&self, event: BoxedEvent, bot: BoxedBot) -> DispatchOutcome {
        let span = span!(
            Level::DEBUG,
            "dispatch",
            event_name = %event.event_name(),
            sender = ?event.sender_id(),
            group = ?event.group_id(),
        );
        self.route(event, bot).instrument(span).await
    }

    async fn route(&self, event: BoxedEvent, bot: BoxedBot) -> DispatchOutcome {
        let (routed, is_command) = match StrippedEvent::strip(&event, &self.prefix) {
            Some(stripped) => (BoxedEvent::new(stripped), true),
            None => (event.clone(), false),
        };

        if self.services.dialogue.check(&routed) {
            debug!("Event consumed by dialogue wait");
            return DispatchOutcome::Dialogue;
        }

        let snapshot = self.registry.snapshot();
        let handlers = if is_command {
            snapshot.command_handlers()
        } else {
            snapshot.normal_handlers()
        };
        debug!(
            command = is_command,
            candidates = handlers.len(),
            registry_version = snapshot.version(),
            "Routing event"
        );

        let ctx = Arc::new(
            Context::new(routed, bot.clone(), self.services.clone())
                .with_handlers(handlers)
                .with_interceptors(
                    snapshot.pre_interceptors().to_vec(),
                    snapshot.post_interceptors().to_vec(),
                ),
        );
        let handled = ctx.execute().await;

        if is_command && handled == 0 {
            let original = event.plain_text().unwrap_or_default();
            debug!(text = %original, "Unrecognized command");
            let reply =
                ReplyTexts::quoted(&*event, &self.services.texts.unrecognized_command, &original);
            if let Err(e) = bot.send(&*event, reply).await {
                error!(bot = %bot.id(), error = %e, "Failed to deliver unrecognized command reply");
            }
            return DispatchOutcome::UnknownCommand;
        }

        DispatchOutcome::Handled(handled)
    }
}

impl Service<Inbound> for Dispatcher {
    type Response = DispatchOutcome;
    type Error = DispatchError;
    type Future = BoxFuture<'static, Result<DispatchOutcome, DispatchError>>;

    fn poll_ready(&mut self, _cx: &mut TaskContext<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, inbound: Inbound) -> Self::Future {
        let dispatcher = self.clone();
        Box::pin(async move { Ok(dispatcher.dispatch(inbound.event, inbound.bot).await) })
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("registry", &self.registry)
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}
