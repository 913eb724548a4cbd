//! Test doubles shared by the unit tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use heed_core::{Bot, BoxedEvent, DeliveryError, DeliveryResult, Event, GroupMessage, Message};

use crate::action::Invoker;
use crate::context::{Context, Services};
use crate::error::{DispatchError, DispatchResult};
use crate::handler::Handler;
use crate::permission::{ConfigPermissionManager, PermissionTable};
use crate::template::TagRenderer;

static NEXT_MESSAGE_ID: AtomicI64 = AtomicI64::new(1);

/// A group message event with a fresh message id.
pub(crate) fn group_event(sender: &str, text: &str) -> BoxedEvent {
    BoxedEvent::new(
        GroupMessage::new("g1", sender, text)
            .with_message_id(NEXT_MESSAGE_ID.fetch_add(1, Ordering::Relaxed)),
    )
}

/// Like [`group_event`] in another group.
pub(crate) fn event_in(group: &str, sender: &str, text: &str) -> BoxedEvent {
    BoxedEvent::new(GroupMessage::new(group, sender, text))
}

/// Default services where `admin` is an administrator.
pub(crate) fn services_with_admin(admin: &str) -> Services {
    let table = PermissionTable {
        administrators: vec![admin.to_string()],
        ..Default::default()
    };
    Services {
        invoker: Invoker::new(
            Arc::new(ConfigPermissionManager::new(&table)),
            Arc::new(TagRenderer),
        ),
        ..Services::default()
    }
}

// =============================================================================
// RecordingBot
// =============================================================================

/// A bot that records what it was asked to send.
#[derive(Default)]
pub(crate) struct RecordingBot {
    sent: Mutex<Vec<Message>>,
    failure: Option<DeliveryError>,
}

impl RecordingBot {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A bot whose every send fails with `error`.
    pub(crate) fn failing(error: DeliveryError) -> Arc<Self> {
        Arc::new(Self {
            sent: Mutex::new(Vec::new()),
            failure: Some(error),
        })
    }

    pub(crate) fn sent(&self) -> Vec<Message> {
        self.sent.lock().clone()
    }

    pub(crate) fn sent_texts(&self) -> Vec<String> {
        self.sent.lock().iter().map(Message::plain_text).collect()
    }
}

#[async_trait]
impl Bot for RecordingBot {
    fn id(&self) -> &str {
        "recorder"
    }

    fn adapter_name(&self) -> &str {
        "test"
    }

    async fn send(&self, _event: &dyn Event, message: Message) -> DeliveryResult<i64> {
        if let Some(failure) = &self.failure {
            return Err(failure.clone());
        }
        let mut sent = self.sent.lock();
        sent.push(message);
        Ok(sent.len() as i64)
    }
}

// =============================================================================
// ScriptedHandler
// =============================================================================

type Hook = Arc<dyn Fn(&Context) + Send + Sync>;

struct Script {
    priority: i32,
    command: bool,
    interested: bool,
    continuing: bool,
    replies: Vec<Message>,
    failure: Option<String>,
    hook: Option<Hook>,
    journal: Option<Arc<Mutex<Vec<String>>>>,
}

/// A handler whose behaviour is configured by the test.
pub(crate) struct ScriptedHandler {
    name: String,
    script: Mutex<Script>,
    considered: AtomicUsize,
    calls: AtomicUsize,
}

impl ScriptedHandler {
    /// An interested handler that replies nothing and does not continue.
    pub(crate) fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            script: Mutex::new(Script {
                priority: 1,
                command: false,
                interested: true,
                continuing: false,
                replies: Vec::new(),
                failure: None,
                hook: None,
                journal: None,
            }),
            considered: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        })
    }

    pub(crate) fn priority(self: Arc<Self>, priority: i32) -> Arc<Self> {
        self.script.lock().priority = priority;
        self
    }

    pub(crate) fn command(self: Arc<Self>) -> Arc<Self> {
        self.script.lock().command = true;
        self
    }

    pub(crate) fn uninterested(self: Arc<Self>) -> Arc<Self> {
        self.script.lock().interested = false;
        self
    }

    pub(crate) fn continuing(self: Arc<Self>) -> Arc<Self> {
        self.script.lock().continuing = true;
        self
    }

    pub(crate) fn replying(self: Arc<Self>, text: &str) -> Arc<Self> {
        self.script.lock().replies.push(Message::from(text));
        self
    }

    pub(crate) fn failing(self: Arc<Self>, message: &str) -> Arc<Self> {
        self.script.lock().failure = Some(message.to_string());
        self
    }

    pub(crate) fn on_handle(
        self: Arc<Self>,
        hook: impl Fn(&Context) + Send + Sync + 'static,
    ) -> Arc<Self> {
        self.script.lock().hook = Some(Arc::new(hook));
        self
    }

    /// Records this handler's name in `journal` whenever it is considered.
    pub(crate) fn journal(self: Arc<Self>, journal: &Arc<Mutex<Vec<String>>>) -> Arc<Self> {
        self.script.lock().journal = Some(journal.clone());
        self
    }

    /// How many times `should_handle` was asked.
    pub(crate) fn considered(&self) -> usize {
        self.considered.load(Ordering::SeqCst)
    }

    /// How many times `handle` ran.
    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Handler for ScriptedHandler {
    fn name(&self) -> &str {
        &self.name
    }

    fn priority(&self) -> i32 {
        self.script.lock().priority
    }

    fn is_command(&self) -> bool {
        self.script.lock().command
    }

    fn should_handle(&self, _ctx: &Context) -> bool {
        self.considered.fetch_add(1, Ordering::SeqCst);
        let script = self.script.lock();
        if let Some(journal) = &script.journal {
            journal.lock().push(self.name.clone());
        }
        script.interested
    }

    async fn handle(&self, ctx: Arc<Context>) -> DispatchResult<Vec<Message>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let (hook, continuing, failure, replies) = {
            let script = self.script.lock();
            (
                script.hook.clone(),
                script.continuing,
                script.failure.clone(),
                script.replies.clone(),
            )
        };

        if let Some(hook) = hook {
            hook(&ctx);
        }
        if continuing {
            ctx.continue_pipeline();
        }
        match failure {
            Some(message) => Err(DispatchError::invocation(message)),
            None => Ok(replies),
        }
    }
}
