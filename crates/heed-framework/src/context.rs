//! The per-event execution pipeline.
//!
//! One [`Context`] is created for every inbound event that reaches handler
//! routing. It owns a private copy of the handler and interceptor lists taken
//! from the registry snapshot, so handlers may add or remove peers while the
//! pipeline runs without affecting any other event.
//!
//! Running a context goes through three phases:
//!
//! 1. pre-interceptors, any of which may block the event;
//! 2. the handler loop, which stops after the first claimed handler that did
//!    not call [`Context::continue_pipeline`];
//! 3. post-interceptors over the collected replies, then delivery.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{Instrument, Level, debug, error, span, trace};

use heed_core::{BoxedBot, BoxedEvent, DeliveryResult, Message};

use crate::action::Invoker;
use crate::dialogue::{ContinuousDialogue, DEFAULT_DIALOGUE_TIMEOUT, NextEvent};
use crate::error::DispatchResult;
use crate::handler::BoxedHandler;
use crate::interceptor::BoxedInterceptor;
use crate::interest::Interest;
use crate::permission::ConfigPermissionManager;
use crate::reply::ReplyTexts;
use crate::template::TagRenderer;

// =============================================================================
// Services
// =============================================================================

/// Collaborators shared by every context the dispatcher creates.
#[derive(Clone)]
pub struct Services {
    /// Resolves and runs actions.
    pub invoker: Invoker,
    /// Pending dialogue waits.
    pub dialogue: Arc<ContinuousDialogue>,
    /// Bound applied by [`Context::wait_for_next`].
    pub dialogue_timeout: Duration,
    /// Canned reply texts.
    pub texts: Arc<ReplyTexts>,
}

impl Default for Services {
    /// Nobody holds any permission and templates use [`TagRenderer`].
    fn default() -> Self {
        Self {
            invoker: Invoker::new(
                Arc::new(ConfigPermissionManager::default()),
                Arc::new(TagRenderer),
            ),
            dialogue: Arc::new(ContinuousDialogue::new()),
            dialogue_timeout: DEFAULT_DIALOGUE_TIMEOUT,
            texts: Arc::new(ReplyTexts::default()),
        }
    }
}

impl fmt::Debug for Services {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Services")
            .field("pending_waits", &self.dialogue.pending())
            .field("dialogue_timeout", &self.dialogue_timeout)
            .field("texts", &self.texts)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Context
// =============================================================================

/// Lifecycle of a [`Context`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextStatus {
    /// Created, not yet executed.
    NotStarted,
    /// Executing.
    Running,
    /// Done. Executing again does nothing.
    Terminated,
}

/// Handler list plus the index of the next candidate.
///
/// While a handler runs, `cursor` already points past it.
#[derive(Default)]
struct Chain {
    handlers: Vec<BoxedHandler>,
    cursor: usize,
}

impl Chain {
    fn position(&self, name: &str) -> Option<usize> {
        self.handlers.iter().position(|h| h.name() == name)
    }
}

/// Pipeline state for one event.
pub struct Context {
    event: BoxedEvent,
    bot: BoxedBot,
    services: Services,
    chain: Mutex<Chain>,
    pre_interceptors: Mutex<Vec<BoxedInterceptor>>,
    post_interceptors: Mutex<Vec<BoxedInterceptor>>,
    proceed: AtomicBool,
    status: Mutex<ContextStatus>,
    values: Mutex<HashMap<String, Arc<dyn Any + Send + Sync>>>,
}

impl Context {
    /// Creates a context with no handlers and no interceptors.
    pub fn new(event: BoxedEvent, bot: BoxedBot, services: Services) -> Self {
        Self {
            event,
            bot,
            services,
            chain: Mutex::new(Chain::default()),
            pre_interceptors: Mutex::new(Vec::new()),
            post_interceptors: Mutex::new(Vec::new()),
            proceed: AtomicBool::new(false),
            status: Mutex::new(ContextStatus::NotStarted),
            values: Mutex::new(HashMap::new()),
        }
    }

    /// Sets the handler list, already in evaluation order.
    pub fn with_handlers(self, handlers: Vec<BoxedHandler>) -> Self {
        self.chain.lock().handlers = handlers;
        self
    }

    /// Sets the interceptor lists, each already in execution order.
    pub fn with_interceptors(
        self,
        pre: Vec<BoxedInterceptor>,
        post: Vec<BoxedInterceptor>,
    ) -> Self {
        *self.pre_interceptors.lock() = pre;
        *self.post_interceptors.lock() = post;
        self
    }

    // -------------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------------

    /// Returns the event.
    pub fn event(&self) -> &BoxedEvent {
        &self.event
    }

    /// Returns the bot that received the event.
    pub fn bot(&self) -> &BoxedBot {
        &self.bot
    }

    /// Returns the shared services.
    pub fn services(&self) -> &Services {
        &self.services
    }

    /// Returns the action invoker.
    pub fn invoker(&self) -> &Invoker {
        &self.services.invoker
    }

    /// Returns the dialogue service.
    pub fn dialogue(&self) -> &Arc<ContinuousDialogue> {
        &self.services.dialogue
    }

    /// Returns the canned reply texts.
    pub fn texts(&self) -> &ReplyTexts {
        &self.services.texts
    }

    /// Returns the lifecycle state.
    pub fn status(&self) -> ContextStatus {
        *self.status.lock()
    }

    /// Asks the pipeline to keep evaluating handlers after the current one.
    pub fn continue_pipeline(&self) {
        self.proceed.store(true, Ordering::SeqCst);
    }

    /// Stores a value for later handlers of this event.
    pub fn insert<T: Any + Send + Sync>(&self, key: impl Into<String>, value: T) {
        self.values.lock().insert(key.into(), Arc::new(value));
    }

    /// Returns a stored value if it exists and is a `T`.
    pub fn get<T: Any + Send + Sync>(&self, key: &str) -> Option<Arc<T>> {
        let value = self.values.lock().get(key)?.clone();
        value.downcast().ok()
    }

    // -------------------------------------------------------------------------
    // Conveniences for handlers
    // -------------------------------------------------------------------------

    /// Sends a message right away, outside the collected replies.
    pub async fn send(&self, message: impl Into<Message>) -> DeliveryResult<i64> {
        self.bot.send(&*self.event, message.into()).await
    }

    /// Waits for the next event from the same sender in the same group that
    /// also satisfies `interest`.
    ///
    /// Gives up with [`DispatchError::TimedOut`](crate::DispatchError::TimedOut)
    /// after [`Services::dialogue_timeout`].
    pub async fn wait_for_next(&self, interest: Option<Interest>) -> DispatchResult<BoxedEvent> {
        self.wait_for_next_timeout(interest, self.services.dialogue_timeout)
            .await
    }

    /// Like [`wait_for_next`](Self::wait_for_next), with no time limit. The
    /// wait still ends when the dialogue is closed.
    pub fn wait_for_next_unbounded(&self, interest: Option<Interest>) -> DispatchResult<NextEvent> {
        self.services
            .dialogue
            .wait_for_next(Some(&*self.event), interest)
    }

    /// Like [`wait_for_next`](Self::wait_for_next), bounded by `timeout`.
    pub async fn wait_for_next_timeout(
        &self,
        interest: Option<Interest>,
        timeout: Duration,
    ) -> DispatchResult<BoxedEvent> {
        self.services
            .dialogue
            .wait_for_next_timeout(Some(&*self.event), interest, timeout)
            .await
    }

    // -------------------------------------------------------------------------
    // Mid-pipeline mutation
    // -------------------------------------------------------------------------

    /// Returns a copy of the current handler list.
    pub fn handlers(&self) -> Vec<BoxedHandler> {
        self.chain.lock().handlers.clone()
    }

    /// Appends a handler. Returns false if one with the same name is present.
    pub fn add_handler(&self, handler: BoxedHandler) -> bool {
        let mut chain = self.chain.lock();
        if chain.position(handler.name()).is_some() {
            return false;
        }
        chain.handlers.push(handler);
        true
    }

    /// Inserts a handler so it becomes the next candidate.
    pub fn add_handler_next(&self, handler: BoxedHandler) -> bool {
        let mut chain = self.chain.lock();
        if chain.position(handler.name()).is_some() {
            return false;
        }
        let at = chain.cursor;
        chain.handlers.insert(at, handler);
        true
    }

    /// Inserts a handler just before the current one. It is not evaluated
    /// again in this run.
    pub fn add_handler_prev(&self, handler: BoxedHandler) -> bool {
        let mut chain = self.chain.lock();
        if chain.position(handler.name()).is_some() {
            return false;
        }
        let at = chain.cursor.saturating_sub(1);
        chain.handlers.insert(at, handler);
        chain.cursor += 1;
        true
    }

    /// Removes the handler named `name`. Returns false if there is none.
    pub fn remove_handler(&self, name: &str) -> bool {
        let mut chain = self.chain.lock();
        let Some(at) = chain.position(name) else {
            return false;
        };
        chain.handlers.remove(at);
        if at < chain.cursor {
            chain.cursor -= 1;
        }
        true
    }

    /// Adds an interceptor to both phases, keeping each sorted.
    pub fn add_interceptor(&self, interceptor: BoxedInterceptor) {
        {
            let mut pre = self.pre_interceptors.lock();
            let at = pre.partition_point(|i| i.pre_order() >= interceptor.pre_order());
            pre.insert(at, interceptor.clone());
        }
        let mut post = self.post_interceptors.lock();
        let at = post.partition_point(|i| i.post_order() >= interceptor.post_order());
        post.insert(at, interceptor);
    }

    /// Removes the interceptor named `name` from both phases.
    pub fn remove_interceptor(&self, name: &str) -> bool {
        let mut removed = false;
        for list in [&self.pre_interceptors, &self.post_interceptors] {
            let mut list = list.lock();
            let before = list.len();
            list.retain(|i| i.name() != name);
            removed |= list.len() != before;
        }
        removed
    }

    // -------------------------------------------------------------------------
    // Execution
    // -------------------------------------------------------------------------

    /// Runs the pipeline and returns how many handlers were invoked.
    ///
    /// A context runs once. Later calls return 0 without doing anything.
    pub async fn execute(self: &Arc<Self>) -> usize {
        let span = span!(
            Level::DEBUG,
            "pipeline",
            event_name = %self.event.event_name(),
            sender = ?self.event.sender_id(),
        );
        self.run().instrument(span).await
    }

    async fn run(self: &Arc<Self>) -> usize {
        {
            let mut status = self.status.lock();
            if *status != ContextStatus::NotStarted {
                debug!("Context already executed");
                return 0;
            }
            *status = ContextStatus::Running;
        }

        if self.chain.lock().handlers.is_empty() {
            trace!("No handlers to run");
            self.terminate();
            return 0;
        }

        let pre = self.pre_interceptors.lock().clone();
        for interceptor in pre {
            if interceptor.intercept_before(self).await {
                debug!(interceptor = %interceptor.name(), "Event blocked before handlers");
                self.terminate();
                return 0;
            }
        }

        let mut handled = 0;
        let mut replies: Option<Vec<Message>> = None;

        while let Some(handler) = self.advance() {
            self.proceed.store(false, Ordering::SeqCst);
            if !handler.should_handle(self) {
                continue;
            }

            trace!(handler = %handler.name(), "Handler claimed event");
            match handler.handle(self.clone()).await {
                Ok(produced) => replies.get_or_insert_with(Vec::new).extend(produced),
                Err(e) => {
                    error!(
                        handler = %handler.name(),
                        event_name = %self.event.event_name(),
                        sender = ?self.event.sender_id(),
                        group = ?self.event.group_id(),
                        text = ?self.event.plain_text(),
                        error = %e,
                        "Handler failed"
                    );
                }
            }
            handled += 1;

            if !self.proceed.load(Ordering::SeqCst) {
                break;
            }
        }

        let post = self.post_interceptors.lock().clone();
        for interceptor in post {
            replies = interceptor.intercept_after(self, replies).await;
        }

        if let Some(replies) = replies.filter(|r| !r.is_empty()) {
            let count = replies.len();
            if let Err(e) = self.bot.send_all(&*self.event, replies).await {
                error!(bot = %self.bot.id(), error = %e, "Failed to deliver replies");
            } else {
                debug!(count, "Replies delivered");
            }
        }

        self.terminate();
        handled
    }

    fn advance(&self) -> Option<BoxedHandler> {
        let mut chain = self.chain.lock();
        let handler = chain.handlers.get(chain.cursor)?.clone();
        chain.cursor += 1;
        Some(handler)
    }

    fn terminate(&self) {
        *self.status.lock() = ContextStatus::Terminated;
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let chain = self.chain.lock();
        f.debug_struct("Context")
            .field("event", &self.event)
            .field("bot", &self.bot.id())
            .field(
                "handlers",
                &chain.handlers.iter().map(|h| h.name()).collect::<Vec<_>>(),
            )
            .field("cursor", &chain.cursor)
            .field("status", &*self.status.lock())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::interceptor::Interceptor;
    use crate::test_support::{RecordingBot, ScriptedHandler, group_event};
    use async_trait::async_trait;
    use heed_core::DeliveryError;

    fn context(bot: &Arc<RecordingBot>, handlers: Vec<BoxedHandler>) -> Arc<Context> {
        Arc::new(
            Context::new(group_event("u", "hello"), bot.clone(), Services::default())
                .with_handlers(handlers),
        )
    }

    struct Blocker;

    #[async_trait]
    impl Interceptor for Blocker {
        fn name(&self) -> &str {
            "blocker"
        }

        async fn intercept_before(&self, _ctx: &Context) -> bool {
            true
        }
    }

    struct Veto;

    #[async_trait]
    impl Interceptor for Veto {
        fn name(&self) -> &str {
            "veto"
        }

        async fn intercept_after(
            &self,
            _ctx: &Context,
            _replies: Option<Vec<Message>>,
        ) -> Option<Vec<Message>> {
            None
        }
    }

    /// Appends a marker so tests can see which replies passed through.
    struct Stamp(&'static str, i32);

    #[async_trait]
    impl Interceptor for Stamp {
        fn name(&self) -> &str {
            self.0
        }

        fn post_order(&self) -> i32 {
            self.1
        }

        async fn intercept_after(
            &self,
            _ctx: &Context,
            replies: Option<Vec<Message>>,
        ) -> Option<Vec<Message>> {
            let mut replies = replies?;
            replies.push(Message::from(self.0));
            Some(replies)
        }
    }

    #[tokio::test]
    async fn test_stops_after_first_claim() {
        let bot = RecordingBot::new();
        let first = ScriptedHandler::new("first").replying("one");
        let second = ScriptedHandler::new("second").replying("two");
        let ctx = context(&bot, vec![first.clone(), second.clone()]);

        assert_eq!(ctx.execute().await, 1);
        assert_eq!(first.calls(), 1);
        assert_eq!(second.calls(), 0);
        assert_eq!(bot.sent_texts(), vec!["one"]);
        assert_eq!(ctx.status(), ContextStatus::Terminated);
    }

    #[tokio::test]
    async fn test_continuation_runs_both_and_merges_replies() {
        let bot = RecordingBot::new();
        let first = ScriptedHandler::new("first").replying("one").continuing();
        let second = ScriptedHandler::new("second").replying("two");
        let ctx = Arc::new(
            Context::new(group_event("u", "hello"), bot.clone(), Services::default())
                .with_handlers(vec![first.clone(), second.clone()])
                .with_interceptors(vec![], vec![Arc::new(Stamp("seen", 1))]),
        );

        assert_eq!(ctx.execute().await, 2);
        assert_eq!(bot.sent_texts(), vec!["one", "two", "seen"]);
    }

    #[tokio::test]
    async fn test_uninterested_handlers_are_skipped() {
        let bot = RecordingBot::new();
        let shy = ScriptedHandler::new("shy").uninterested();
        let eager = ScriptedHandler::new("eager").replying("hi");
        let ctx = context(&bot, vec![shy.clone(), eager.clone()]);

        assert_eq!(ctx.execute().await, 1);
        assert_eq!(shy.considered(), 1);
        assert_eq!(shy.calls(), 0);
        assert_eq!(eager.calls(), 1);
    }

    #[tokio::test]
    async fn test_pre_interceptor_blocks() {
        let bot = RecordingBot::new();
        let handler = ScriptedHandler::new("h").replying("x");
        let ctx = Arc::new(
            Context::new(group_event("u", "hello"), bot.clone(), Services::default())
                .with_handlers(vec![handler.clone()])
                .with_interceptors(vec![Arc::new(Blocker)], vec![]),
        );

        assert_eq!(ctx.execute().await, 0);
        assert_eq!(handler.considered(), 0);
        assert!(bot.sent().is_empty());
    }

    #[tokio::test]
    async fn test_post_interceptor_veto() {
        let bot = RecordingBot::new();
        let handler = ScriptedHandler::new("h").replying("x");
        let ctx = Arc::new(
            Context::new(group_event("u", "hello"), bot.clone(), Services::default())
                .with_handlers(vec![handler.clone()])
                .with_interceptors(vec![], vec![Arc::new(Veto)]),
        );

        assert_eq!(ctx.execute().await, 1);
        assert!(bot.sent().is_empty());
    }

    #[tokio::test]
    async fn test_post_interceptors_run_in_descending_order() {
        let bot = RecordingBot::new();
        let handler = ScriptedHandler::new("h").replying("x");
        let ctx = context(&bot, vec![handler]);
        ctx.add_interceptor(Arc::new(Stamp("low", 1)));
        ctx.add_interceptor(Arc::new(Stamp("high", 9)));
        ctx.add_interceptor(Arc::new(Stamp("mid", 5)));

        ctx.execute().await;
        assert_eq!(bot.sent_texts(), vec!["x", "high", "mid", "low"]);
    }

    #[tokio::test]
    async fn test_runs_only_once() {
        let bot = RecordingBot::new();
        let handler = ScriptedHandler::new("h").replying("x");
        let ctx = context(&bot, vec![handler.clone()]);

        assert_eq!(ctx.execute().await, 1);
        assert_eq!(ctx.execute().await, 0);
        assert_eq!(handler.calls(), 1);
        assert_eq!(bot.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_empty_pipeline() {
        let bot = RecordingBot::new();
        let ctx = context(&bot, vec![]);

        assert_eq!(ctx.execute().await, 0);
        assert_eq!(ctx.status(), ContextStatus::Terminated);
    }

    #[tokio::test]
    async fn test_failing_handler_still_counts() {
        let bot = RecordingBot::new();
        let broken = ScriptedHandler::new("broken").failing("kaput").continuing();
        let after = ScriptedHandler::new("after").replying("fine");
        let ctx = context(&bot, vec![broken.clone(), after.clone()]);

        assert_eq!(ctx.execute().await, 2);
        assert_eq!(bot.sent_texts(), vec!["fine"]);
    }

    #[tokio::test]
    async fn test_delivery_failure_is_swallowed() {
        let bot = RecordingBot::failing(DeliveryError::NotConnected);
        let handler = ScriptedHandler::new("h").replying("x");
        let ctx = context(&bot, vec![handler]);

        assert_eq!(ctx.execute().await, 1);
        assert_eq!(ctx.status(), ContextStatus::Terminated);
    }

    #[tokio::test]
    async fn test_handler_inserted_next_runs() {
        let bot = RecordingBot::new();
        let late = ScriptedHandler::new("late").replying("late");
        let inserter = ScriptedHandler::new("inserter")
            .replying("first")
            .continuing()
            .on_handle({
                let late = late.clone();
                move |ctx: &Context| {
                    assert!(ctx.add_handler_next(late.clone()));
                }
            });
        let tail = ScriptedHandler::new("tail").replying("tail");
        let ctx = context(&bot, vec![inserter, tail.clone()]);

        assert_eq!(ctx.execute().await, 2);
        assert_eq!(bot.sent_texts(), vec!["first", "late"]);
        assert_eq!(tail.calls(), 0);
    }

    #[tokio::test]
    async fn test_handler_inserted_prev_does_not_run() {
        let bot = RecordingBot::new();
        let early = ScriptedHandler::new("early").replying("early");
        let inserter = ScriptedHandler::new("inserter")
            .replying("first")
            .continuing()
            .on_handle({
                let early = early.clone();
                move |ctx: &Context| {
                    assert!(ctx.add_handler_prev(early.clone()));
                }
            });
        let tail = ScriptedHandler::new("tail").replying("tail");
        let ctx = context(&bot, vec![inserter, tail.clone()]);

        assert_eq!(ctx.execute().await, 2);
        assert_eq!(early.calls(), 0);
        assert_eq!(bot.sent_texts(), vec!["first", "tail"]);
        let names: Vec<_> = ctx.handlers().iter().map(|h| h.name().to_string()).collect();
        assert_eq!(names, vec!["early", "inserter", "tail"]);
    }

    #[tokio::test]
    async fn test_handler_removed_ahead_and_behind() {
        let bot = RecordingBot::new();
        let head = ScriptedHandler::new("head").uninterested();
        let remover = ScriptedHandler::new("remover")
            .continuing()
            .on_handle(|ctx: &Context| {
                assert!(ctx.remove_handler("head"));
                assert!(ctx.remove_handler("skipped"));
                assert!(!ctx.remove_handler("ghost"));
            });
        let skipped = ScriptedHandler::new("skipped").replying("skipped");
        let last = ScriptedHandler::new("last").replying("last");
        let ctx = context(&bot, vec![head, remover, skipped.clone(), last.clone()]);

        assert_eq!(ctx.execute().await, 2);
        assert_eq!(skipped.calls(), 0);
        assert_eq!(last.calls(), 1);
        assert_eq!(bot.sent_texts(), vec!["last"]);
    }

    #[test]
    fn test_duplicate_names_are_rejected() {
        let bot = RecordingBot::new();
        let ctx = context(&bot, vec![ScriptedHandler::new("a")]);

        assert!(!ctx.add_handler(ScriptedHandler::new("a")));
        assert!(ctx.add_handler(ScriptedHandler::new("b")));
        assert_eq!(ctx.handlers().len(), 2);
    }

    #[test]
    fn test_values() {
        let bot = RecordingBot::new();
        let ctx = context(&bot, vec![]);
        ctx.insert("count", 3u32);

        assert_eq!(ctx.get::<u32>("count").as_deref(), Some(&3));
        assert!(ctx.get::<String>("count").is_none());
        assert!(ctx.get::<u32>("missing").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_next_uses_configured_timeout() {
        let bot = RecordingBot::new();
        let services = Services {
            dialogue_timeout: Duration::from_secs(7),
            ..Services::default()
        };
        let ctx = Context::new(group_event("u", "hello"), bot.clone(), services);

        let started = tokio::time::Instant::now();
        let err = ctx.wait_for_next(None).await.unwrap_err();
        assert!(matches!(
            err,
            crate::DispatchError::TimedOut { after } if after == Duration::from_secs(7)
        ));
        assert!(started.elapsed() >= Duration::from_secs(7));
        assert_eq!(ctx.dialogue().pending(), 0);
    }

    #[tokio::test]
    async fn test_wait_for_next_resolves_before_timeout() {
        let bot = RecordingBot::new();
        let ctx = Arc::new(Context::new(
            group_event("u", "hello"),
            bot.clone(),
            Services::default(),
        ));
        let dialogue = ctx.dialogue().clone();

        let waiter = {
            let ctx = ctx.clone();
            tokio::spawn(async move { ctx.wait_for_next(None).await })
        };
        while dialogue.pending() == 0 {
            tokio::task::yield_now().await;
        }
        assert!(dialogue.check(&group_event("u", "answer")));
        let answer = waiter.await.unwrap().unwrap();
        assert_eq!(answer.plain_text().as_deref(), Some("answer"));
    }
}
