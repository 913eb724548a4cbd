//! Continuous dialogue: waiting inside a handler for the user's next message.
//!
//! A handler that asks a question registers a wait with
//! [`ContinuousDialogue::wait_for_next`] and awaits the returned
//! [`NextEvent`]. The dispatcher offers every inbound event to
//! [`ContinuousDialogue::check`] before routing it, so the answer goes to the
//! waiting handler instead of the normal pipeline.
//!
//! ```rust,ignore
//! async fn rename(ctx: Arc<Context>) -> DispatchResult<String> {
//!     ctx.send("What should the new name be?").await?;
//!     let answer = ctx.wait_for_next(None).await?;
//!     Ok(format!("Renamed to {}", answer.plain_text().unwrap_or_default()))
//! }
//! ```

use std::fmt;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context as TaskContext, Poll};
use std::time::Duration;

use futures::FutureExt;
use futures::channel::oneshot;
use futures::future::Shared;
use parking_lot::Mutex;
use tracing::{debug, trace};

use heed_core::{BoxedEvent, Event};

use crate::error::{DispatchError, DispatchResult};
use crate::interest::{Interest, MatchMode};

/// How long [`Context::wait_for_next`](crate::Context::wait_for_next) waits
/// unless configured otherwise.
pub const DEFAULT_DIALOGUE_TIMEOUT: Duration = Duration::from_secs(60);

struct PendingWait {
    id: u64,
    interest: Interest,
    sender: oneshot::Sender<BoxedEvent>,
    receiver: Shared<oneshot::Receiver<BoxedEvent>>,
    observers: usize,
}

/// Table of pending dialogue waits.
///
/// Waits with structurally equal correlation interests share one entry, and
/// an entry is resolved at most once. Once [closed](Self::close), the table
/// refuses new waits.
#[derive(Default)]
pub struct ContinuousDialogue {
    waits: Mutex<Vec<PendingWait>>,
    next_id: AtomicU64,
    closed: AtomicBool,
}

impl ContinuousDialogue {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the interest a wait is correlated on: same sender and same group
    /// as `origin`, and `interest` when given.
    pub fn correlation(
        origin: Option<&dyn Event>,
        interest: Option<Interest>,
    ) -> DispatchResult<Interest> {
        let mut builder = Interest::builder().match_all(true);
        if let Some(origin) = origin {
            if let Some(sender) = origin.sender_id() {
                builder = builder.on(MatchMode::Sender, sender);
            }
            if let Some(group) = origin.group_id() {
                builder = builder.on(MatchMode::Group, group);
            }
        }
        if let Some(interest) = interest {
            builder = builder.on_interest(interest);
        }
        Ok(builder.build()?)
    }

    /// Registers a wait for the next event correlated with `origin`.
    ///
    /// If an equal wait is already pending, the returned future observes that
    /// one instead of registering a second. Fails with
    /// [`DispatchError::DialogueClosed`] after [`close`](Self::close).
    pub fn wait_for_next(
        self: &Arc<Self>,
        origin: Option<&dyn Event>,
        interest: Option<Interest>,
    ) -> DispatchResult<NextEvent> {
        let interest = Self::correlation(origin, interest)?;
        let mut waits = self.waits.lock();
        // Checked under the lock so a wait cannot slip in after `close` drained.
        if self.closed.load(Ordering::Acquire) {
            trace!("Dialogue closed, wait refused");
            return Err(DispatchError::DialogueClosed);
        }

        if let Some(wait) = waits.iter_mut().find(|w| w.interest == interest) {
            wait.observers += 1;
            trace!(wait_id = wait.id, observers = wait.observers, "Joined pending wait");
            return Ok(NextEvent {
                id: wait.id,
                receiver: wait.receiver.clone(),
                dialogue: Arc::downgrade(self),
            });
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = oneshot::channel();
        let receiver = receiver.shared();
        waits.push(PendingWait {
            id,
            interest,
            sender,
            receiver: receiver.clone(),
            observers: 1,
        });
        debug!(wait_id = id, pending = waits.len(), "Registered dialogue wait");

        Ok(NextEvent {
            id,
            receiver,
            dialogue: Arc::downgrade(self),
        })
    }

    /// Like [`wait_for_next`](Self::wait_for_next), but gives up after
    /// `timeout` with [`DispatchError::TimedOut`].
    pub async fn wait_for_next_timeout(
        self: &Arc<Self>,
        origin: Option<&dyn Event>,
        interest: Option<Interest>,
        timeout: Duration,
    ) -> DispatchResult<BoxedEvent> {
        let next = self.wait_for_next(origin, interest)?;
        tokio::time::timeout(timeout, next)
            .await
            .map_err(|_| DispatchError::TimedOut { after: timeout })?
    }

    /// Offers `event` to the pending waits.
    ///
    /// The first wait whose interest accepts the event is removed and resolved
    /// with it. Returns true if that happened, in which case the event must not
    /// be routed any further.
    pub fn check(&self, event: &BoxedEvent) -> bool {
        let wait = {
            let mut waits = self.waits.lock();
            let Some(at) = waits.iter().position(|w| w.interest.is_interest(&**event)) else {
                return false;
            };
            waits.remove(at)
        };

        debug!(wait_id = wait.id, observers = wait.observers, "Dialogue wait resolved");
        if wait.sender.send(event.clone()).is_err() {
            trace!(wait_id = wait.id, "Every observer left before resolution");
        }
        true
    }

    /// Returns how many waits are pending.
    pub fn pending(&self) -> usize {
        self.waits.lock().len()
    }

    /// Drops every pending wait. Their observers get
    /// [`DispatchError::DialogueClosed`].
    pub fn clear(&self) {
        let dropped = std::mem::take(&mut *self.waits.lock());
        if !dropped.is_empty() {
            debug!(count = dropped.len(), "Dropped pending dialogue waits");
        }
    }

    /// Drops every pending wait and refuses new ones from now on.
    pub fn close(&self) {
        let dropped = {
            let mut waits = self.waits.lock();
            self.closed.store(true, Ordering::Release);
            std::mem::take(&mut *waits)
        };
        debug!(dropped = dropped.len(), "Dialogue closed");
    }

    /// Returns true once [`close`](Self::close) has run.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn release(&self, id: u64) {
        let mut waits = self.waits.lock();
        let Some(at) = waits.iter().position(|w| w.id == id) else {
            return;
        };
        waits[at].observers -= 1;
        if waits[at].observers == 0 {
            waits.remove(at);
            trace!(wait_id = id, "Abandoned dialogue wait removed");
        }
    }
}

impl fmt::Debug for ContinuousDialogue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContinuousDialogue")
            .field("pending", &self.pending())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// A pending wait. Resolves to the event that satisfied it.
///
/// Dropping it gives up the wait; the entry is removed once every observer
/// has dropped out.
#[must_use = "futures do nothing unless polled"]
pub struct NextEvent {
    id: u64,
    receiver: Shared<oneshot::Receiver<BoxedEvent>>,
    dialogue: Weak<ContinuousDialogue>,
}

impl NextEvent {
    /// Identifies the pending entry. Deduplicated waits share an id.
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Future for NextEvent {
    type Output = DispatchResult<BoxedEvent>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver)
            .poll(cx)
            .map(|result| result.map_err(|_| DispatchError::DialogueClosed))
    }
}

impl Drop for NextEvent {
    fn drop(&mut self) {
        if let Some(dialogue) = self.dialogue.upgrade() {
            dialogue.release(self.id);
        }
    }
}

impl fmt::Debug for NextEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NextEvent").field("id", &self.id).finish()
    }
}
