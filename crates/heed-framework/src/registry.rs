//! The handler and interceptor registry.
//!
//! A single task owns the lists. Every mutation is a message to that task,
//! which applies it, re-sorts, and publishes a fresh immutable
//! [`RegistrySnapshot`]. Dispatch only ever reads the latest snapshot, so
//! registering a handler never races with an event being routed.

use std::cmp::Reverse;
use std::fmt;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info};

use crate::error::{DispatchError, DispatchResult};
use crate::handler::{BoxedHandler, Handler};
use crate::interceptor::{BoxedInterceptor, Interceptor};

const COMMAND_BUFFER: usize = 64;

// =============================================================================
// Snapshot
// =============================================================================

/// An immutable view of the registry at one point in time.
#[derive(Clone, Default)]
pub struct RegistrySnapshot {
    version: u64,
    handlers: Vec<BoxedHandler>,
    pre_interceptors: Vec<BoxedInterceptor>,
    post_interceptors: Vec<BoxedInterceptor>,
}

impl RegistrySnapshot {
    /// Increases by one with every applied change.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// All handlers: command handlers first, then by descending priority.
    pub fn handlers(&self) -> &[BoxedHandler] {
        &self.handlers
    }

    /// Command handlers, in evaluation order.
    pub fn command_handlers(&self) -> Vec<BoxedHandler> {
        self.handlers
            .iter()
            .filter(|h| h.is_command())
            .cloned()
            .collect()
    }

    /// Non-command handlers, in evaluation order.
    pub fn normal_handlers(&self) -> Vec<BoxedHandler> {
        self.handlers
            .iter()
            .filter(|h| !h.is_command())
            .cloned()
            .collect()
    }

    /// Interceptors by descending pre-order.
    pub fn pre_interceptors(&self) -> &[BoxedInterceptor] {
        &self.pre_interceptors
    }

    /// Interceptors by descending post-order.
    pub fn post_interceptors(&self) -> &[BoxedInterceptor] {
        &self.post_interceptors
    }
}

impl fmt::Debug for RegistrySnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistrySnapshot")
            .field("version", &self.version)
            .field(
                "handlers",
                &self.handlers.iter().map(|h| h.name()).collect::<Vec<_>>(),
            )
            .field(
                "interceptors",
                &self
                    .pre_interceptors
                    .iter()
                    .map(|i| i.name())
                    .collect::<Vec<_>>(),
            )
            .finish()
    }
}

// =============================================================================
// Actor
// =============================================================================

enum Command {
    AddHandler(BoxedHandler, oneshot::Sender<bool>),
    RemoveHandler(String, oneshot::Sender<bool>),
    AddInterceptor(BoxedInterceptor, oneshot::Sender<bool>),
    RemoveInterceptor(String, oneshot::Sender<bool>),
}

#[derive(Default)]
struct RegistryState {
    handlers: Vec<BoxedHandler>,
    interceptors: Vec<BoxedInterceptor>,
}

impl RegistryState {
    fn apply(&mut self, command: Command) -> (bool, oneshot::Sender<bool>) {
        match command {
            Command::AddHandler(handler, ack) => {
                if self.handlers.iter().any(|h| h.name() == handler.name()) {
                    debug!(handler = %handler.name(), "Handler already registered");
                    return (false, ack);
                }
                info!(
                    handler = %handler.name(),
                    priority = handler.priority(),
                    command = handler.is_command(),
                    "Handler registered"
                );
                self.handlers.push(handler);
                (true, ack)
            }
            Command::RemoveHandler(name, ack) => {
                let before = self.handlers.len();
                self.handlers.retain(|h| h.name() != name);
                let removed = self.handlers.len() != before;
                if removed {
                    info!(handler = %name, "Handler removed");
                }
                (removed, ack)
            }
            Command::AddInterceptor(interceptor, ack) => {
                if self.interceptors.iter().any(|i| i.name() == interceptor.name()) {
                    debug!(interceptor = %interceptor.name(), "Interceptor already registered");
                    return (false, ack);
                }
                info!(
                    interceptor = %interceptor.name(),
                    pre_order = interceptor.pre_order(),
                    post_order = interceptor.post_order(),
                    "Interceptor registered"
                );
                self.interceptors.push(interceptor);
                (true, ack)
            }
            Command::RemoveInterceptor(name, ack) => {
                let before = self.interceptors.len();
                self.interceptors.retain(|i| i.name() != name);
                let removed = self.interceptors.len() != before;
                if removed {
                    info!(interceptor = %name, "Interceptor removed");
                }
                (removed, ack)
            }
        }
    }

    fn snapshot(&self, version: u64) -> RegistrySnapshot {
        let mut handlers = self.handlers.clone();
        handlers.sort_by_key(|h| (Reverse(h.is_command()), Reverse(h.priority())));

        let mut pre_interceptors = self.interceptors.clone();
        pre_interceptors.sort_by_key(|i| Reverse(i.pre_order()));

        let mut post_interceptors = self.interceptors.clone();
        post_interceptors.sort_by_key(|i| Reverse(i.post_order()));

        RegistrySnapshot {
            version,
            handlers,
            pre_interceptors,
            post_interceptors,
        }
    }
}

async fn run(
    mut commands: mpsc::Receiver<Command>,
    publish: watch::Sender<Arc<RegistrySnapshot>>,
) {
    let mut state = RegistryState::default();
    let mut version = 0;

    while let Some(command) = commands.recv().await {
        let (changed, ack) = state.apply(command);
        if changed {
            version += 1;
            publish.send_replace(Arc::new(state.snapshot(version)));
        }
        let _ = ack.send(changed);
    }

    debug!("Registry task stopped");
}

// =============================================================================
// Handle
// =============================================================================

/// Handle to the registry task. Cheap to clone.
///
/// The task stops once every handle is dropped.
#[derive(Clone)]
pub struct Registry {
    commands: mpsc::Sender<Command>,
    snapshot: watch::Receiver<Arc<RegistrySnapshot>>,
}

impl Registry {
    /// Spawns the registry task on the current tokio runtime.
    pub fn spawn() -> Self {
        let (commands, receiver) = mpsc::channel(COMMAND_BUFFER);
        let (publish, snapshot) = watch::channel(Arc::new(RegistrySnapshot::default()));
        tokio::spawn(run(receiver, publish));
        Self { commands, snapshot }
    }

    /// Returns the latest snapshot.
    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        self.snapshot.borrow().clone()
    }

    /// Returns a receiver that observes every published snapshot.
    pub fn subscribe(&self) -> watch::Receiver<Arc<RegistrySnapshot>> {
        self.snapshot.clone()
    }

    /// Registers a handler. Returns false if one with the same name exists.
    ///
    /// The change is visible in [`snapshot`](Self::snapshot) once this returns.
    pub async fn add_handler<H: Handler>(&self, handler: H) -> DispatchResult<bool> {
        self.add_boxed_handler(Arc::new(handler)).await
    }

    /// Registers an already shared handler.
    pub async fn add_boxed_handler(&self, handler: BoxedHandler) -> DispatchResult<bool> {
        self.request(|ack| Command::AddHandler(handler, ack)).await
    }

    /// Removes the handler named `name`.
    pub async fn remove_handler(&self, name: impl Into<String>) -> DispatchResult<bool> {
        let name = name.into();
        self.request(|ack| Command::RemoveHandler(name, ack)).await
    }

    /// Registers an interceptor for both phases.
    pub async fn add_interceptor<I: Interceptor>(&self, interceptor: I) -> DispatchResult<bool> {
        self.add_boxed_interceptor(Arc::new(interceptor)).await
    }

    /// Registers an already shared interceptor.
    pub async fn add_boxed_interceptor(
        &self,
        interceptor: BoxedInterceptor,
    ) -> DispatchResult<bool> {
        self.request(|ack| Command::AddInterceptor(interceptor, ack))
            .await
    }

    /// Removes the interceptor named `name`.
    pub async fn remove_interceptor(&self, name: impl Into<String>) -> DispatchResult<bool> {
        let name = name.into();
        self.request(|ack| Command::RemoveInterceptor(name, ack)).await
    }

    async fn request(
        &self,
        command: impl FnOnce(oneshot::Sender<bool>) -> Command,
    ) -> DispatchResult<bool> {
        let (ack, done) = oneshot::channel();
        self.commands
            .send(command(ack))
            .await
            .map_err(|_| DispatchError::RegistryClosed)?;
        done.await.map_err(|_| DispatchError::RegistryClosed)
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("snapshot", &*self.snapshot.borrow())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use async_trait::async_trait;
    use parking_lot::Mutex;

    use crate::context::{Context, Services};
    use crate::test_support::{RecordingBot, ScriptedHandler, group_event};

    struct Ordered(&'static str, i32, i32);

    #[async_trait]
    impl Interceptor for Ordered {
        fn name(&self) -> &str {
            self.0
        }

        fn pre_order(&self) -> i32 {
            self.1
        }

        fn post_order(&self) -> i32 {
            self.2
        }
    }

    fn names(handlers: &[BoxedHandler]) -> Vec<&str> {
        handlers.iter().map(|h| h.name()).collect()
    }

    #[tokio::test]
    async fn test_evaluation_follows_priority() {
        let registry = Registry::spawn();
        let journal = Arc::new(Mutex::new(Vec::new()));
        for (name, priority) in [("p5", 5), ("p1", 1), ("p10", 10)] {
            let handler = ScriptedHandler::new(name)
                .priority(priority)
                .uninterested()
                .journal(&journal);
            assert!(registry.add_boxed_handler(handler).await.unwrap());
        }

        let snapshot = registry.snapshot();
        assert_eq!(names(snapshot.handlers()), vec!["p10", "p5", "p1"]);

        let ctx = Arc::new(
            Context::new(group_event("u", "x"), RecordingBot::new(), Services::default())
                .with_handlers(snapshot.normal_handlers()),
        );
        assert_eq!(ctx.execute().await, 0);
        assert_eq!(*journal.lock(), vec!["p10", "p5", "p1"]);
    }

    #[tokio::test]
    async fn test_command_handlers_sort_first() {
        let registry = Registry::spawn();
        registry
            .add_boxed_handler(ScriptedHandler::new("chat").priority(100))
            .await
            .unwrap();
        registry
            .add_boxed_handler(ScriptedHandler::new("cmd").priority(0).command())
            .await
            .unwrap();

        let snapshot = registry.snapshot();
        assert_eq!(names(snapshot.handlers()), vec!["cmd", "chat"]);
        assert_eq!(names(&snapshot.command_handlers()), vec!["cmd"]);
        assert_eq!(names(&snapshot.normal_handlers()), vec!["chat"]);
    }

    #[tokio::test]
    async fn test_equal_priorities_keep_registration_order() {
        let registry = Registry::spawn();
        for name in ["a", "b", "c"] {
            registry
                .add_boxed_handler(ScriptedHandler::new(name))
                .await
                .unwrap();
        }
        assert_eq!(names(registry.snapshot().handlers()), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_add_and_remove() {
        let registry = Registry::spawn();
        assert!(registry.add_boxed_handler(ScriptedHandler::new("a")).await.unwrap());
        assert!(!registry.add_boxed_handler(ScriptedHandler::new("a")).await.unwrap());
        let before = registry.snapshot();

        assert!(registry.remove_handler("a").await.unwrap());
        assert!(!registry.remove_handler("a").await.unwrap());

        assert_eq!(before.handlers().len(), 1);
        assert!(registry.snapshot().handlers().is_empty());
        assert_eq!(registry.snapshot().version(), 2);
    }

    #[tokio::test]
    async fn test_interceptor_orders_are_independent() {
        let registry = Registry::spawn();
        for interceptor in [Ordered("a", 1, 9), Ordered("b", 9, 1), Ordered("c", 5, 5)] {
            registry
                .add_interceptor(interceptor)
                .await
                .unwrap();
        }

        let snapshot = registry.snapshot();
        let pre: Vec<_> = snapshot.pre_interceptors().iter().map(|i| i.name()).collect();
        let post: Vec<_> = snapshot.post_interceptors().iter().map(|i| i.name()).collect();
        assert_eq!(pre, vec!["b", "c", "a"]);
        assert_eq!(post, vec!["a", "c", "b"]);

        assert!(registry.remove_interceptor("c").await.unwrap());
        assert_eq!(registry.snapshot().pre_interceptors().len(), 2);
    }

    #[tokio::test]
    async fn test_subscribers_see_changes() {
        let registry = Registry::spawn();
        let mut updates = registry.subscribe();

        registry
            .add_boxed_handler(ScriptedHandler::new("a"))
            .await
            .unwrap();
        updates.changed().await.unwrap();
        assert_eq!(updates.borrow().version(), 1);
    }
}
