//! Action tables and the invoker that runs them.
//!
//! Callbacks are plain async functions registered by name in an
//! [`ActionTable`]. Their parameters are filled from the dispatch: the event,
//! the [`DispatchArgs`] describing the match, and whatever extra arguments the
//! caller supplied (usually the pipeline [`Context`]).
//!
//! # Example
//!
//! ```rust,ignore
//! async fn greet(args: DispatchArgs) -> String {
//!     format!("you said {}", args.condition.unwrap_or_default())
//! }
//!
//! async fn kick(event: BoxedEvent, ctx: Arc<Context>) -> DispatchResult<()> {
//!     // ...
//!     Ok(())
//! }
//!
//! let table = ActionTable::new("moderation")
//!     .action("greet", greet)
//!     .guarded_action("kick", PermissionLevel::GroupAdministrator, kick);
//! ```
//!
//! # Binding
//!
//! Several callbacks may share a name. The invoker first looks for one whose
//! parameter list is exactly `(DispatchArgs, extras...)`; failing that it takes
//! the first one whose every parameter can be filled from what is available.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::{debug, trace};

use heed_core::{BoxedEvent, Message};

use crate::context::Context;
use crate::error::{DispatchError, DispatchResult};
use crate::interest::{Action, Interest, MatchMode, Matched};
use crate::permission::{PermissionLevel, PermissionManager};
use crate::template::TemplateRenderer;

// ============================================================================
// DispatchArgs
// ============================================================================

/// Describes one successful match, handed to callbacks that ask for it.
#[derive(Debug, Clone)]
pub struct DispatchArgs {
    /// The event that matched.
    pub event: BoxedEvent,
    /// The literal condition that matched, for literal matches.
    pub condition: Option<String>,
    /// The interest that matched: the nested or whole interest, or for a
    /// literal match the interest that owns the condition.
    pub condition_interest: Option<Interest>,
    /// The mode of the literal condition that matched.
    pub mode: Option<MatchMode>,
    /// Name of the callback being run.
    pub action: String,
    /// Name of the action table the callback was found in.
    pub target: String,
}

// ============================================================================
// Extra arguments and parameter kinds
// ============================================================================

/// A type-erased extra argument passed along with a dispatch.
#[derive(Clone)]
pub struct ExtraArg {
    type_id: TypeId,
    type_name: &'static str,
    value: Arc<dyn Any + Send + Sync>,
}

impl ExtraArg {
    /// Wraps a value.
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
            value: Arc::new(value),
        }
    }

    /// Returns the value if it is a `T`.
    pub fn get<T: Any>(&self) -> Option<&T> {
        self.value.downcast_ref()
    }
}

impl fmt::Debug for ExtraArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ExtraArg").field(&self.type_name).finish()
    }
}

/// What a callback parameter expects to receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    /// The event being dispatched.
    Event,
    /// The [`DispatchArgs`] of the match.
    DispatchArgs,
    /// An extra argument of exactly this type.
    Extra {
        /// Type of the argument.
        type_id: TypeId,
        /// Name of the type, for diagnostics.
        type_name: &'static str,
    },
}

impl ParamKind {
    /// The kind for an extra argument of type `T`.
    pub fn extra<T: Any>() -> Self {
        Self::Extra {
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
        }
    }

    fn type_id(&self) -> TypeId {
        match self {
            Self::Event => TypeId::of::<BoxedEvent>(),
            Self::DispatchArgs => TypeId::of::<DispatchArgs>(),
            Self::Extra { type_id, .. } => *type_id,
        }
    }
}

/// Everything a callback's parameters can be filled from.
#[derive(Debug, Clone)]
pub struct ActionCall {
    event: BoxedEvent,
    args: DispatchArgs,
    extras: Vec<ExtraArg>,
}

impl ActionCall {
    /// Returns the event.
    pub fn event(&self) -> &BoxedEvent {
        &self.event
    }

    /// Returns the dispatch arguments.
    pub fn args(&self) -> &DispatchArgs {
        &self.args
    }

    /// Returns the first extra argument of type `T`.
    pub fn extra<T: Any>(&self) -> Option<&T> {
        let id = TypeId::of::<T>();
        self.extras
            .iter()
            .find(|extra| extra.type_id == id)
            .and_then(ExtraArg::get::<T>)
    }

    /// Returns the pipeline context, if one was passed as an extra argument.
    pub fn context(&self) -> Option<&Arc<Context>> {
        self.extra::<Arc<Context>>()
    }

    fn can_fill(&self, kind: &ParamKind) -> bool {
        match kind {
            ParamKind::Event | ParamKind::DispatchArgs => true,
            ParamKind::Extra { type_id, .. } => {
                self.extras.iter().any(|extra| extra.type_id == *type_id)
            }
        }
    }

    fn assembled_types(&self) -> Vec<TypeId> {
        std::iter::once(TypeId::of::<DispatchArgs>())
            .chain(self.extras.iter().map(|extra| extra.type_id))
            .collect()
    }
}

// ============================================================================
// FromDispatch - parameter extraction
// ============================================================================

/// Types that can be callback parameters.
pub trait FromDispatch: Sized + Send + 'static {
    /// The kind of value this parameter needs.
    fn param() -> ParamKind;

    /// Pulls the value out of a call.
    fn from_dispatch(call: &ActionCall) -> Option<Self>;
}

impl FromDispatch for BoxedEvent {
    fn param() -> ParamKind {
        ParamKind::Event
    }

    fn from_dispatch(call: &ActionCall) -> Option<Self> {
        Some(call.event.clone())
    }
}

impl FromDispatch for DispatchArgs {
    fn param() -> ParamKind {
        ParamKind::DispatchArgs
    }

    fn from_dispatch(call: &ActionCall) -> Option<Self> {
        Some(call.args.clone())
    }
}

impl FromDispatch for Arc<Context> {
    fn param() -> ParamKind {
        ParamKind::extra::<Arc<Context>>()
    }

    fn from_dispatch(call: &ActionCall) -> Option<Self> {
        call.context().cloned()
    }
}

/// Extractor for an extra argument of type `T`.
#[derive(Debug, Clone)]
pub struct Extra<T>(pub T);

impl<T: Any + Clone + Send + Sync> FromDispatch for Extra<T> {
    fn param() -> ParamKind {
        ParamKind::extra::<T>()
    }

    fn from_dispatch(call: &ActionCall) -> Option<Self> {
        call.extra::<T>().cloned().map(Extra)
    }
}

// ============================================================================
// IntoReplies - callback return values
// ============================================================================

/// Callback return values that can become a list of replies.
pub trait IntoReplies: Send {
    /// Converts into replies.
    fn into_replies(self) -> DispatchResult<Vec<Message>>;
}

impl IntoReplies for () {
    fn into_replies(self) -> DispatchResult<Vec<Message>> {
        Ok(Vec::new())
    }
}

impl IntoReplies for Message {
    fn into_replies(self) -> DispatchResult<Vec<Message>> {
        Ok(vec![self])
    }
}

impl IntoReplies for String {
    fn into_replies(self) -> DispatchResult<Vec<Message>> {
        Ok(vec![Message::from(self)])
    }
}

impl IntoReplies for &'static str {
    fn into_replies(self) -> DispatchResult<Vec<Message>> {
        Ok(vec![Message::from(self)])
    }
}

impl IntoReplies for Vec<Message> {
    fn into_replies(self) -> DispatchResult<Vec<Message>> {
        Ok(self)
    }
}

impl<T: IntoReplies> IntoReplies for Option<T> {
    fn into_replies(self) -> DispatchResult<Vec<Message>> {
        self.map_or_else(|| Ok(Vec::new()), IntoReplies::into_replies)
    }
}

impl<T: IntoReplies, E: Into<DispatchError> + Send> IntoReplies for Result<T, E> {
    fn into_replies(self) -> DispatchResult<Vec<Message>> {
        self.map_err(Into::into)?.into_replies()
    }
}

// ============================================================================
// ActionFn - async functions as callbacks
// ============================================================================

/// Type-erased callback stored in an [`ActionTable`].
pub type BoxedAction =
    Arc<dyn Fn(ActionCall) -> BoxFuture<'static, DispatchResult<Vec<Message>>> + Send + Sync>;

/// Async functions usable as callbacks. Implemented for functions of up to
/// eight [`FromDispatch`] parameters.
pub trait ActionFn<T>: Clone + Send + Sync + 'static {
    /// The parameter kinds, in order.
    fn params() -> Vec<ParamKind>;

    /// Extracts the parameters from `call` and runs the function.
    fn invoke(self, call: ActionCall) -> BoxFuture<'static, DispatchResult<Vec<Message>>>;
}

macro_rules! impl_action_fn {
    (
        $($ty:ident),*
    ) => {
        #[allow(non_snake_case, unused_variables)]
        impl<F, Fut, Res, $($ty,)*> ActionFn<($($ty,)*)> for F
        where
            F: FnOnce($($ty,)*) -> Fut + Clone + Send + Sync + 'static,
            Fut: Future<Output = Res> + Send + 'static,
            Res: IntoReplies,
            $( $ty: FromDispatch, )*
        {
            fn params() -> Vec<ParamKind> {
                vec![$($ty::param(),)*]
            }

            fn invoke(self, call: ActionCall) -> BoxFuture<'static, DispatchResult<Vec<Message>>> {
                Box::pin(async move {
                    $(
                        let Some($ty) = $ty::from_dispatch(&call) else {
                            return Err(DispatchError::MethodResolution {
                                action: call.args.action.clone(),
                            });
                        };
                    )*

                    (self)($($ty,)*).await.into_replies()
                })
            }
        }
    };
}

impl_action_fn!();
impl_action_fn!(T1);
impl_action_fn!(T1, T2);
impl_action_fn!(T1, T2, T3);
impl_action_fn!(T1, T2, T3, T4);
impl_action_fn!(T1, T2, T3, T4, T5);
impl_action_fn!(T1, T2, T3, T4, T5, T6);
impl_action_fn!(T1, T2, T3, T4, T5, T6, T7);
impl_action_fn!(T1, T2, T3, T4, T5, T6, T7, T8);

// ============================================================================
// ActionTable
// ============================================================================

/// One registered callback.
#[derive(Clone)]
pub struct ActionEntry {
    params: Vec<ParamKind>,
    permission: Option<PermissionLevel>,
    invoke: BoxedAction,
}

impl ActionEntry {
    /// The declared parameter kinds.
    pub fn params(&self) -> &[ParamKind] {
        &self.params
    }

    /// The permission the callback requires, if any.
    pub fn permission(&self) -> Option<PermissionLevel> {
        self.permission
    }

    fn signature(&self) -> impl Iterator<Item = TypeId> + '_ {
        self.params.iter().map(ParamKind::type_id)
    }
}

impl fmt::Debug for ActionEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionEntry")
            .field("params", &self.params)
            .field("permission", &self.permission)
            .finish_non_exhaustive()
    }
}

/// Named callbacks, built once when a handler is created.
#[derive(Debug, Clone, Default)]
pub struct ActionTable {
    target: String,
    entries: HashMap<String, Vec<ActionEntry>>,
}

impl ActionTable {
    /// Creates an empty table. `target` names it in logs and [`DispatchArgs`].
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            entries: HashMap::new(),
        }
    }

    /// Registers a callback.
    pub fn action<F, T>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: ActionFn<T>,
        T: 'static,
    {
        self.register(name, None, f);
        self
    }

    /// Registers a callback that requires a permission level.
    pub fn guarded_action<F, T>(
        mut self,
        name: impl Into<String>,
        permission: PermissionLevel,
        f: F,
    ) -> Self
    where
        F: ActionFn<T>,
        T: 'static,
    {
        self.register(name, Some(permission), f);
        self
    }

    /// Registers a callback under `name`, next to any existing ones.
    pub fn register<F, T>(
        &mut self,
        name: impl Into<String>,
        permission: Option<PermissionLevel>,
        f: F,
    ) where
        F: ActionFn<T>,
        T: 'static,
    {
        let invoke: BoxedAction =
            Arc::new(move |call: ActionCall| <F as ActionFn<T>>::invoke(f.clone(), call));
        self.entries.entry(name.into()).or_default().push(ActionEntry {
            params: F::params(),
            permission,
            invoke,
        });
    }

    /// Returns the table's name.
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Returns true if a callback is registered under `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Finds the callback `name` that can be bound to `call`.
    pub fn resolve(&self, name: &str, call: &ActionCall) -> DispatchResult<&ActionEntry> {
        let not_found = || DispatchError::MethodResolution {
            action: name.to_string(),
        };
        let candidates = self.entries.get(name).ok_or_else(not_found)?;

        let assembled = call.assembled_types();
        if let Some(exact) = candidates
            .iter()
            .find(|entry| entry.signature().eq(assembled.iter().copied()))
        {
            return Ok(exact);
        }

        candidates
            .iter()
            .find(|entry| entry.params.iter().all(|kind| call.can_fill(kind)))
            .ok_or_else(not_found)
    }
}

// ============================================================================
// Invoker
// ============================================================================

/// Resolves an interest against an event and runs the bound action.
#[derive(Clone)]
pub struct Invoker {
    permissions: Arc<dyn PermissionManager>,
    renderer: Arc<dyn TemplateRenderer>,
}

impl Invoker {
    /// Creates an invoker.
    pub fn new(
        permissions: Arc<dyn PermissionManager>,
        renderer: Arc<dyn TemplateRenderer>,
    ) -> Self {
        Self {
            permissions,
            renderer,
        }
    }

    /// Returns the permission manager.
    pub fn permissions(&self) -> &Arc<dyn PermissionManager> {
        &self.permissions
    }

    /// Returns the template renderer.
    pub fn renderer(&self) -> &Arc<dyn TemplateRenderer> {
        &self.renderer
    }

    /// Matches `event` against `interest` and runs whatever action is bound.
    ///
    /// Output actions are rendered directly. Callback actions are looked up in
    /// `table` and called with `DispatchArgs` followed by `extras`.
    pub async fn dispatch(
        &self,
        interest: &Interest,
        event: &BoxedEvent,
        table: &ActionTable,
        extras: Vec<ExtraArg>,
    ) -> DispatchResult<Vec<Message>> {
        let resolution = interest
            .resolve(&**event)
            .ok_or(DispatchError::NotInterested)?;

        let Some(action) = resolution.action else {
            if interest.is_match_all() && interest.has_condition_actions() {
                return Err(DispatchError::illegal_composition(
                    "all-conditions interest binds actions to single conditions but none to itself",
                ));
            }
            return Err(DispatchError::NoAction);
        };

        let name = match action {
            Action::Output(template) => {
                trace!(target_table = %table.target(), "Rendering output action");
                let reply = self.renderer.render(template, &**event).await?;
                return Ok(vec![reply]);
            }
            Action::Callback(name) => name,
        };

        let (condition, condition_interest) = match resolution.matched {
            Matched::Literal { condition, .. } => {
                (Some(condition.to_string()), Some(interest.clone()))
            }
            Matched::Nested(nested) | Matched::Whole(nested) => (None, Some(nested.clone())),
        };
        let call = ActionCall {
            event: event.clone(),
            args: DispatchArgs {
                event: event.clone(),
                condition,
                condition_interest,
                mode: resolution.mode(),
                action: name.clone(),
                target: table.target().to_string(),
            },
            extras,
        };

        let entry = table.resolve(name, &call)?;
        if let Some(required) = entry.permission {
            let ctx = call.context().map(Arc::as_ref);
            if !self.permissions.has_permission(required, &**event, ctx) {
                debug!(action = %name, %required, "Permission denied");
                return Err(DispatchError::InsufficientPermission { required });
            }
        }

        debug!(action = %name, target_table = %table.target(), "Invoking callback");
        (entry.invoke)(call).await
    }
}

impl fmt::Debug for Invoker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Invoker").finish_non_exhaustive()
    }
}
