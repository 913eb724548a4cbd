//! Handlers: the components the pipeline iterates.
//!
//! Anything implementing [`Handler`] can be registered. Most bots only need
//! [`InterestHandler`], which pairs an [`Interest`] with an [`ActionTable`]:
//!
//! ```rust,ignore
//! let interest = Interest::builder()
//!     .on_callback(MatchMode::Prefix, "roll", "roll")
//!     .on_output(MatchMode::Equals, "ping", "pong")
//!     .build()?;
//! let actions = ActionTable::new("dice").action("roll", roll);
//!
//! registry.add_handler(InterestHandler::new("dice", interest, actions).priority(10)).await?;
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error};

use heed_core::Message;

use crate::action::{ActionTable, ExtraArg};
use crate::context::Context;
use crate::error::{DispatchError, DispatchResult};
use crate::interest::Interest;
use crate::permission::PermissionLevel;
use crate::reply::ReplyTexts;

/// A component that may claim an event and produce replies.
///
/// Handlers are evaluated command handlers first, then by descending
/// [`priority`](Handler::priority). Names identify handlers within a pipeline
/// and must be unique.
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    /// Unique name.
    fn name(&self) -> &str;

    /// Higher runs first.
    fn priority(&self) -> i32 {
        1
    }

    /// Returns true if this handler only sees prefixed commands.
    fn is_command(&self) -> bool {
        false
    }

    /// Returns true to claim the event.
    fn should_handle(&self, ctx: &Context) -> bool;

    /// Handles a claimed event and returns the replies to deliver.
    ///
    /// Call [`Context::continue_pipeline`] to let later handlers run too.
    async fn handle(&self, ctx: Arc<Context>) -> DispatchResult<Vec<Message>>;
}

/// Shared handler.
pub type BoxedHandler = Arc<dyn Handler>;

// =============================================================================
// InterestHandler
// =============================================================================

/// A handler driven by an [`Interest`] and an [`ActionTable`].
///
/// It claims every event the interest accepts and dispatches it to the bound
/// action, passing the pipeline [`Context`] as an extra argument. Failures
/// become user-visible replies: permission failures get the denial text, every
/// other failure gets the apology text. Events that match without an action
/// produce no reply.
#[derive(Debug)]
pub struct InterestHandler {
    name: String,
    priority: i32,
    command: bool,
    permission: Option<PermissionLevel>,
    interest: Interest,
    actions: ActionTable,
}

impl InterestHandler {
    /// Creates a handler with priority 1.
    pub fn new(name: impl Into<String>, interest: Interest, actions: ActionTable) -> Self {
        Self {
            name: name.into(),
            priority: 1,
            command: false,
            permission: None,
            interest,
            actions,
        }
    }

    /// Sets the priority.
    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Marks this as a command handler.
    pub fn command(mut self, command: bool) -> Self {
        self.command = command;
        self
    }

    /// Requires a permission level before anything is dispatched.
    pub fn require(mut self, level: PermissionLevel) -> Self {
        self.permission = Some(level);
        self
    }

    /// Returns the interest.
    pub fn interest(&self) -> &Interest {
        &self.interest
    }

    async fn dispatch(&self, ctx: &Arc<Context>) -> DispatchResult<Vec<Message>> {
        let event = ctx.event();
        if let Some(required) = self.permission {
            let permissions = ctx.invoker().permissions();
            if !permissions.has_permission(required, &**event, Some(ctx.as_ref())) {
                return Err(DispatchError::InsufficientPermission { required });
            }
        }

        ctx.invoker()
            .dispatch(
                &self.interest,
                event,
                &self.actions,
                vec![ExtraArg::new(ctx.clone())],
            )
            .await
    }
}

#[async_trait]
impl Handler for InterestHandler {
    fn name(&self) -> &str {
        &self.name
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn is_command(&self) -> bool {
        self.command
    }

    fn should_handle(&self, ctx: &Context) -> bool {
        self.interest.is_interest(&**ctx.event())
    }

    async fn handle(&self, ctx: Arc<Context>) -> DispatchResult<Vec<Message>> {
        let err = match self.dispatch(&ctx).await {
            Ok(replies) => return Ok(replies),
            Err(err) => err,
        };

        let event = ctx.event();
        if err.is_silent() {
            debug!(handler = %self.name, reason = %err, "Nothing to run");
            return Ok(Vec::new());
        }

        let texts = ctx.texts();
        let reply = match &err {
            DispatchError::InsufficientPermission { .. } => {
                debug!(handler = %self.name, error = %err, "Permission denied");
                ReplyTexts::quoted(&**event, &texts.denial, &err)
            }
            _ => {
                error!(
                    handler = %self.name,
                    event_name = %event.event_name(),
                    sender = ?event.sender_id(),
                    group = ?event.group_id(),
                    text = ?event.plain_text(),
                    error = %err,
                    "Dispatch failed"
                );
                ReplyTexts::quoted(&**event, &texts.apology, &err)
            }
        };
        Ok(vec![reply])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::action::DispatchArgs;
    use crate::context::Services;
    use crate::interest::MatchMode;
    use crate::test_support::{RecordingBot, group_event, services_with_admin};

    fn context(sender: &str, text: &str, services: Services) -> Arc<Context> {
        Arc::new(Context::new(
            group_event(sender, text),
            RecordingBot::new(),
            services,
        ))
    }

    async fn reply_texts(handler: &InterestHandler, ctx: Arc<Context>) -> Vec<String> {
        handler
            .handle(ctx)
            .await
            .unwrap()
            .iter()
            .map(Message::plain_text)
            .collect()
    }

    fn talk_handler() -> InterestHandler {
        let interest = Interest::builder()
            .on_callback(MatchMode::Prefix, "你", "m3")
            .on_callback(MatchMode::Suffix, "我", "m1")
            .build()
            .unwrap();
        let actions = ActionTable::new("talk")
            .action("m1", |args: DispatchArgs| async move {
                format!("m1:{}", args.condition.unwrap_or_default())
            })
            .action("m3", |args: DispatchArgs| async move {
                format!("m3:{}", args.condition.unwrap_or_default())
            });
        InterestHandler::new("talk", interest, actions)
    }

    #[tokio::test]
    async fn test_routes_by_condition() {
        let handler = talk_handler();

        let ctx = context("u", "你好吗", Services::default());
        assert!(handler.should_handle(&ctx));
        assert_eq!(reply_texts(&handler, ctx).await, vec!["m3:你"]);

        let ctx = context("u", "爱我", Services::default());
        assert_eq!(reply_texts(&handler, ctx).await, vec!["m1:我"]);

        let ctx = context("u", "随便说说", Services::default());
        assert!(!handler.should_handle(&ctx));
    }

    #[tokio::test]
    async fn test_callback_receives_context() {
        let interest = Interest::builder()
            .on_callback(MatchMode::Equals, "count", "count")
            .build()
            .unwrap();
        let actions = ActionTable::new("t").action("count", |ctx: Arc<Context>| async move {
            ctx.insert("seen", true);
            "counted"
        });
        let handler = InterestHandler::new("t", interest, actions);
        let ctx = context("u", "count", Services::default());

        assert_eq!(reply_texts(&handler, ctx.clone()).await, vec!["counted"]);
        assert_eq!(ctx.get::<bool>("seen").as_deref(), Some(&true));
    }

    #[tokio::test]
    async fn test_failure_becomes_apology() {
        let interest = Interest::builder()
            .on_callback(MatchMode::Equals, "boom", "boom")
            .build()
            .unwrap();
        let actions = ActionTable::new("t").action("boom", || async { Err::<(), _>("exploded") });
        let handler = InterestHandler::new("t", interest, actions);

        let texts = reply_texts(&handler, context("u", "boom", Services::default())).await;
        assert_eq!(
            texts,
            vec![format!("{}exploded", ReplyTexts::default().apology)]
        );
    }

    #[tokio::test]
    async fn test_required_permission() {
        let interest = Interest::builder()
            .on_output(MatchMode::Equals, "reload", "done")
            .build()
            .unwrap();
        let handler = InterestHandler::new("admin", interest, ActionTable::default())
            .require(PermissionLevel::Administrator);

        let texts = reply_texts(&handler, context("guest", "reload", services_with_admin("root"))).await;
        assert!(texts[0].starts_with(ReplyTexts::default().denial.trim()));

        let texts = reply_texts(&handler, context("root", "reload", services_with_admin("root"))).await;
        assert_eq!(texts, vec!["done"]);
    }

    #[tokio::test]
    async fn test_no_action_is_silent() {
        let interest = Interest::builder()
            .on(MatchMode::Contains, "hm")
            .build()
            .unwrap();
        let handler = InterestHandler::new("quiet", interest, ActionTable::default());

        let texts = reply_texts(&handler, context("u", "hmm", Services::default())).await;
        assert!(texts.is_empty());
    }

    #[tokio::test]
    async fn test_runs_inside_pipeline() {
        let bot = RecordingBot::new();
        let ctx = Arc::new(
            Context::new(group_event("u", "你在吗"), bot.clone(), Services::default())
                .with_handlers(vec![Arc::new(talk_handler())]),
        );

        assert_eq!(ctx.execute().await, 1);
        assert_eq!(bot.sent_texts(), vec!["m3:你"]);
    }
}
