//! Pre and post hooks around the handler loop.

use std::sync::Arc;

use async_trait::async_trait;

use heed_core::Message;

use crate::context::Context;

/// Hooks that run before and after the handlers of a pipeline.
///
/// Pre-hooks run in descending [`pre_order`](Interceptor::pre_order) and may
/// block the event. Post-hooks run in descending
/// [`post_order`](Interceptor::post_order) and may rewrite or veto the
/// collected replies.
#[async_trait]
pub trait Interceptor: Send + Sync + 'static {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Position among pre-hooks. Higher runs first.
    fn pre_order(&self) -> i32 {
        1
    }

    /// Position among post-hooks. Higher runs first.
    fn post_order(&self) -> i32 {
        1
    }

    /// Returns true to drop the event before any handler sees it.
    async fn intercept_before(&self, ctx: &Context) -> bool {
        let _ = ctx;
        false
    }

    /// Rewrites the replies collected by the handlers. `None` delivers nothing.
    async fn intercept_after(
        &self,
        ctx: &Context,
        replies: Option<Vec<Message>>,
    ) -> Option<Vec<Message>> {
        let _ = ctx;
        replies
    }
}

/// Shared interceptor.
pub type BoxedInterceptor = Arc<dyn Interceptor>;
