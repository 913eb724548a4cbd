//! The heed runtime: configuration, logging and the inbound event loop.
//!
//! Transports push [`Inbound`] events into the channel returned by
//! [`HeedRuntime::sender`]. The runtime dispatches each one on its own task
//! until it is told to stop. While it runs, its [`Scheduler`] drives
//! background tasks and periodic jobs.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use heed_runtime::HeedRuntime;
//!
//! let runtime = HeedRuntime::builder()
//!     .config_file("config/heed.toml")
//!     .build()?;
//!
//! runtime.add_handler(greeter).await?;
//! runtime.add_command(admin_commands).await?;
//!
//! let events = runtime.sender();
//! tokio::spawn(my_transport(events));
//!
//! runtime.run().await?;
//! ```

use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::signal;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tower::ServiceExt;
use tracing::{debug, error, info, trace, warn};

use heed_framework::{
    CommandHandler, CommandJournal, CommandParser, ContinuousDialogue, ConfigPermissionManager,
    Dispatcher, Handler, Inbound, Interceptor, Invoker, Registry, Services, TagRenderer,
};

use crate::config::{ConfigLoader, ConfigResult, HeedConfig};
use crate::error::{RuntimeError, RuntimeResult};
use crate::logging;
use crate::scheduler::Scheduler;

/// Capacity of the inbound event channel.
pub const INBOUND_CAPACITY: usize = 1024;

/// The heed runtime.
///
/// Must be created inside a Tokio runtime; the handler registry runs as a
/// task.
pub struct HeedRuntime {
    config: HeedConfig,
    dispatcher: Dispatcher,
    journal: Arc<CommandJournal>,
    scheduler: Scheduler,
    inbound_tx: mpsc::Sender<Inbound>,
    inbound_rx: Mutex<Option<mpsc::Receiver<Inbound>>>,
    shutdown: CancellationToken,
}

impl HeedRuntime {
    /// Creates a runtime from a discovered `heed.toml` and `HEED_*`
    /// variables, falling back to defaults.
    ///
    /// The load error, if any, is logged once logging is up.
    pub fn new() -> Self {
        match ConfigLoader::new().load() {
            Ok(config) => Self::from_config(&config),
            Err(e) => {
                let runtime = Self::from_config(&HeedConfig::default());
                warn!(error = %e, "Failed to load configuration, using defaults");
                runtime
            }
        }
    }

    /// Creates a runtime builder for custom configuration.
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    /// Creates a runtime from configuration and initializes logging.
    pub fn from_config(config: &HeedConfig) -> Self {
        logging::init_from_config(&config.logging);

        let permissions = Arc::new(ConfigPermissionManager::new(&config.permissions));
        let services = Services {
            invoker: Invoker::new(permissions, Arc::new(TagRenderer)),
            dialogue: Arc::new(ContinuousDialogue::new()),
            dialogue_timeout: config.dialogue.default_timeout(),
            texts: Arc::new(config.replies.clone()),
        };
        let dispatcher =
            Dispatcher::new(Registry::spawn(), services).with_prefix(&config.command.prefix);
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CAPACITY);
        let shutdown = CancellationToken::new();

        info!(
            log_level = %config.logging.level,
            log_format = ?config.logging.format,
            command_prefix = %config.command.prefix,
            dialogue_timeout_secs = config.dialogue.default_timeout_secs,
            "Runtime initialized from configuration"
        );

        Self {
            config: config.clone(),
            dispatcher,
            journal: Arc::new(CommandJournal::new(config.command.history_bytes)),
            scheduler: Scheduler::new(&config.scheduler, shutdown.child_token()),
            inbound_tx,
            inbound_rx: Mutex::new(Some(inbound_rx)),
            shutdown,
        }
    }

    /// Returns a reference to the configuration.
    pub fn config(&self) -> &HeedConfig {
        &self.config
    }

    /// Returns the dispatcher.
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Returns the handler registry.
    pub fn registry(&self) -> &Registry {
        self.dispatcher.registry()
    }

    /// Returns the command history shared by handlers added with
    /// [`add_command`](Self::add_command).
    pub fn journal(&self) -> &Arc<CommandJournal> {
        &self.journal
    }

    /// The bound [`Context::wait_for_next`](heed_framework::Context::wait_for_next)
    /// applies.
    pub fn dialogue_timeout(&self) -> Duration {
        self.dispatcher.services().dialogue_timeout
    }

    /// Returns the scheduler for background tasks and periodic jobs.
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Returns a sender for inbound events.
    pub fn sender(&self) -> mpsc::Sender<Inbound> {
        self.inbound_tx.clone()
    }

    /// Returns the token that stops [`run`](Self::run) when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Asks a running loop to stop.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Registers a handler.
    pub async fn add_handler<H: Handler>(&self, handler: H) -> RuntimeResult<bool> {
        Ok(self.registry().add_handler(handler).await?)
    }

    /// Registers a command parser, recording its outcomes in the shared
    /// journal.
    pub async fn add_command<P: CommandParser>(&self, parser: P) -> RuntimeResult<bool> {
        let handler = CommandHandler::new(parser).with_journal(Arc::clone(&self.journal));
        self.add_handler(handler).await
    }

    /// Registers an interceptor.
    pub async fn add_interceptor<I: Interceptor>(&self, interceptor: I) -> RuntimeResult<bool> {
        Ok(self.registry().add_interceptor(interceptor).await?)
    }

    /// Runs until Ctrl+C, SIGTERM or [`shutdown`](Self::shutdown).
    pub async fn run(&self) -> RuntimeResult<()> {
        info!("heed runtime is now running. Press Ctrl+C to stop.");
        self.serve(async { wait_for_signal().await.map_err(RuntimeError::from) })
            .await
    }

    /// Runs until `shutdown` completes or [`shutdown`](Self::shutdown) is
    /// called.
    pub async fn run_until<F>(&self, shutdown: F) -> RuntimeResult<()>
    where
        F: Future<Output = ()>,
    {
        self.serve(async {
            shutdown.await;
            Ok(())
        })
        .await
    }

    async fn serve<F>(&self, stop: F) -> RuntimeResult<()>
    where
        F: Future<Output = RuntimeResult<()>>,
    {
        let mut inbound = self
            .inbound_rx
            .lock()
            .await
            .take()
            .ok_or(RuntimeError::AlreadyRunning)?;

        let tracker = TaskTracker::new();
        tokio::pin!(stop);

        info!(prefix = %self.dispatcher.prefix(), "Runtime started");
        self.scheduler.start();

        let result = loop {
            tokio::select! {
                res = &mut stop => break res,
                _ = self.shutdown.cancelled() => {
                    info!("Shutdown requested");
                    break Ok(());
                }
                Some(event) = inbound.recv() => self.spawn_dispatch(&tracker, event),
            }
        };

        // Wake handlers blocked on a dialogue, and refuse waits registered
        // later, so in-flight tasks can finish.
        self.shutdown.cancel();
        let pending = self.dispatcher.dialogue().pending();
        self.dispatcher.dialogue().close();

        tracker.close();
        debug!(in_flight = tracker.len(), pending_waits = pending, "Draining");
        tokio::join!(tracker.wait(), self.scheduler.shutdown());

        info!("Runtime stopped");
        result
    }

    fn spawn_dispatch(&self, tracker: &TaskTracker, inbound: Inbound) {
        let dispatcher = self.dispatcher.clone();
        tracker.spawn(async move {
            match dispatcher.oneshot(inbound).await {
                Ok(outcome) => trace!(?outcome, "Event dispatched"),
                Err(e) => error!(error = %e, "Dispatch failed"),
            }
        });
    }
}

impl Default for HeedRuntime {
    fn default() -> Self {
        Self::new()
    }
}

/// Waits for Ctrl+C or SIGTERM.
async fn wait_for_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;

        tokio::select! {
            res = signal::ctrl_c() => {
                res?;
                info!("Received Ctrl+C, shutting down");
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down");
            }
        }
    }

    #[cfg(not(unix))]
    {
        signal::ctrl_c().await?;
        info!("Received Ctrl+C, shutting down");
    }

    Ok(())
}

// =============================================================================
// RuntimeBuilder
// =============================================================================

/// Builds a `HeedRuntime` from a [`ConfigLoader`].
///
/// ```rust,ignore
/// let runtime = HeedRuntime::builder()
///     .config_file("deploy/heed.toml")
///     .build()?;
/// ```
#[derive(Debug, Default)]
pub struct RuntimeBuilder {
    config_loader: ConfigLoader,
}

impl RuntimeBuilder {
    /// Creates a builder that discovers its configuration file.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads this configuration file instead of looking for one.
    pub fn config_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.file(path);
        self
    }

    /// Ignores `HEED_*` environment variables.
    pub fn without_env(mut self) -> Self {
        self.config_loader = self.config_loader.without_env();
        self
    }

    /// Sets the base configuration under files and environment.
    pub fn merge(mut self, config: HeedConfig) -> Self {
        self.config_loader = self.config_loader.merge(config);
        self
    }

    /// Loads configuration and builds the runtime.
    pub fn build(self) -> ConfigResult<HeedRuntime> {
        let config = self.config_loader.load()?;
        Ok(HeedRuntime::from_config(&config))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use async_trait::async_trait;
    use heed_core::{
        Bot, BoxedBot, BoxedEvent, DeliveryResult, Event, GroupMessage, Message,
    };
    use heed_framework::{Context, DispatchError, DispatchResult};
    use tokio::sync::Notify;

    use crate::config::LogLevel;

    struct RecordingBot {
        sent: std::sync::Mutex<Vec<String>>,
        notify: Notify,
    }

    impl RecordingBot {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                sent: std::sync::Mutex::new(Vec::new()),
                notify: Notify::new(),
            })
        }

        fn sent(&self) -> Vec<String> {
            self.sent.lock().unwrap().clone()
        }

        async fn wait_for(&self, count: usize) {
            tokio::time::timeout(Duration::from_secs(5), async {
                loop {
                    let notified = self.notify.notified();
                    if self.sent.lock().unwrap().len() >= count {
                        return;
                    }
                    notified.await;
                }
            })
            .await
            .expect("replies were not delivered");
        }
    }

    #[async_trait]
    impl Bot for RecordingBot {
        fn id(&self) -> &str {
            "recording"
        }

        fn adapter_name(&self) -> &str {
            "test"
        }

        async fn send(&self, _event: &dyn Event, message: Message) -> DeliveryResult<i64> {
            self.sent.lock().unwrap().push(message.plain_text());
            self.notify.notify_waiters();
            Ok(0)
        }
    }

    struct Ping;

    #[async_trait]
    impl Handler for Ping {
        fn name(&self) -> &str {
            "ping"
        }

        fn should_handle(&self, ctx: &Context) -> bool {
            ctx.event().plain_text().as_deref() == Some("ping")
        }

        async fn handle(&self, _ctx: Arc<Context>) -> DispatchResult<Vec<Message>> {
            Ok(vec![Message::from("pong")])
        }
    }

    struct Deploy;

    #[async_trait]
    impl CommandParser for Deploy {
        fn name(&self) -> &str {
            "deploy"
        }

        fn should_handle(&self, ctx: &Context) -> bool {
            ctx.event()
                .plain_text()
                .is_some_and(|t| t.starts_with("deploy"))
        }

        async fn parse_command(&self, ctx: Arc<Context>) -> DispatchResult<Vec<Message>> {
            match ctx.event().plain_text().as_deref() {
                Some("deploy now") => Ok(vec![Message::from("deploying")]),
                _ => Err(DispatchError::command_parse("expected `deploy now`")),
            }
        }
    }

    fn quiet_config() -> HeedConfig {
        let mut config = HeedConfig::default();
        config.logging.level = LogLevel::Error;
        config.command.prefix = "!".into();
        config.command.history_bytes = 4096;
        config.dialogue.default_timeout_secs = 3;
        config
    }

    fn inbound(text: &str, bot: &Arc<RecordingBot>) -> Inbound {
        let bot: BoxedBot = bot.clone();
        Inbound::new(BoxedEvent::new(GroupMessage::new("g1", "u1", text)), bot)
    }

    fn start(runtime: &Arc<HeedRuntime>) -> tokio::task::JoinHandle<RuntimeResult<()>> {
        let runtime = Arc::clone(runtime);
        tokio::spawn(async move { runtime.run_until(std::future::pending()).await })
    }

    #[tokio::test]
    async fn test_from_config_applies_settings() {
        let runtime = HeedRuntime::from_config(&quiet_config());

        assert_eq!(runtime.dispatcher().prefix(), "!");
        assert_eq!(runtime.journal().capacity(), 4096);
        assert_eq!(runtime.dialogue_timeout(), Duration::from_secs(3));
        assert_eq!(
            runtime.dispatcher().services().dialogue_timeout,
            Duration::from_secs(3)
        );
        assert_eq!(
            runtime.dispatcher().services().texts.denial,
            runtime.config().replies.denial
        );
    }

    #[tokio::test]
    async fn test_events_flow_through_loop() {
        let runtime = Arc::new(HeedRuntime::from_config(&quiet_config()));
        assert!(runtime.add_handler(Ping).await.unwrap());
        let bot = RecordingBot::new();
        let task = start(&runtime);

        let events = runtime.sender();
        events.send(inbound("ping", &bot)).await.unwrap();
        events.send(inbound("!nothing", &bot)).await.unwrap();
        bot.wait_for(2).await;

        let sent = bot.sent();
        assert!(sent.contains(&"pong".to_string()));
        assert!(sent.iter().any(|s| s.starts_with("Unrecognized command")));

        runtime.shutdown();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_commands_use_shared_journal() {
        let runtime = Arc::new(HeedRuntime::from_config(&quiet_config()));
        assert!(runtime.add_command(Deploy).await.unwrap());
        assert!(!runtime.add_command(Deploy).await.unwrap());
        let bot = RecordingBot::new();
        let task = start(&runtime);

        runtime.sender().send(inbound("!deploy now", &bot)).await.unwrap();
        bot.wait_for(1).await;
        runtime.sender().send(inbound("!deploy later", &bot)).await.unwrap();
        bot.wait_for(2).await;

        let history = runtime.journal().snapshot();
        assert!(history.contains("[SUCCESS]"));
        assert!(history.contains("[FAILURE]"));
        assert!(bot.sent()[1].starts_with(&runtime.config().replies.parse_error));

        runtime.shutdown();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_releases_dialogue_waits() {
        let runtime = Arc::new(HeedRuntime::from_config(&quiet_config()));
        let dialogue = Arc::clone(runtime.dispatcher().dialogue());
        let origin = GroupMessage::new("g1", "u1", "start");
        let wait = dialogue.wait_for_next(Some(&origin as &dyn Event), None).unwrap();
        assert_eq!(dialogue.pending(), 1);

        runtime
            .run_until(async { tokio::task::yield_now().await })
            .await
            .unwrap();

        assert_eq!(dialogue.pending(), 0);
        assert!(matches!(wait.await, Err(DispatchError::DialogueClosed)));
        assert!(dialogue.is_closed());
    }

    /// Starts waiting only after the runtime has begun shutting down.
    struct LateWaiter {
        closed: std::sync::Mutex<Option<bool>>,
    }

    #[async_trait]
    impl Handler for LateWaiter {
        fn name(&self) -> &str {
            "late-waiter"
        }

        fn should_handle(&self, ctx: &Context) -> bool {
            ctx.event().plain_text().as_deref() == Some("guess")
        }

        async fn handle(&self, ctx: Arc<Context>) -> DispatchResult<Vec<Message>> {
            tokio::time::sleep(Duration::from_millis(100)).await;
            let answer = match ctx.wait_for_next_unbounded(None) {
                Ok(next) => next.await,
                Err(e) => Err(e),
            };
            *self.closed.lock().unwrap() =
                Some(matches!(answer, Err(DispatchError::DialogueClosed)));
            answer.map(|_| Vec::new())
        }
    }

    #[tokio::test]
    async fn test_wait_after_shutdown_does_not_hang_drain() {
        let runtime = Arc::new(HeedRuntime::from_config(&quiet_config()));
        let waiter = Arc::new(LateWaiter {
            closed: std::sync::Mutex::new(None),
        });
        runtime
            .registry()
            .add_boxed_handler(waiter.clone())
            .await
            .unwrap();
        let bot = RecordingBot::new();
        let task = start(&runtime);

        runtime.sender().send(inbound("guess", &bot)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        runtime.shutdown();

        tokio::time::timeout(Duration::from_secs(3), task)
            .await
            .expect("drain hung on a late dialogue wait")
            .unwrap()
            .unwrap();
        assert_eq!(*waiter.closed.lock().unwrap(), Some(true));
    }

    #[tokio::test]
    async fn test_scheduler_runs_with_the_loop() {
        let runtime = Arc::new(HeedRuntime::from_config(&quiet_config()));
        let ran = Arc::new(Notify::new());
        let signal = Arc::clone(&ran);
        runtime
            .scheduler()
            .add_background_task(Some("heartbeat"), move || {
                let signal = Arc::clone(&signal);
                async move { signal.notify_one() }
            });
        let task = start(&runtime);

        tokio::time::timeout(Duration::from_secs(5), ran.notified())
            .await
            .expect("background task did not run");
        assert!(!runtime.scheduler().is_stopped());

        runtime.shutdown();
        task.await.unwrap().unwrap();
        assert!(runtime.scheduler().is_stopped());
    }

    #[tokio::test]
    async fn test_second_run_is_rejected() {
        let runtime = HeedRuntime::from_config(&quiet_config());
        runtime.run_until(async {}).await.unwrap();

        let again = runtime.run_until(async {}).await;
        assert!(matches!(again, Err(RuntimeError::AlreadyRunning)));
    }

    #[tokio::test]
    async fn test_builder_rejects_missing_file() {
        let result = HeedRuntime::builder()
            .config_file("/nonexistent/heed.toml")
            .without_env()
            .build();
        assert!(matches!(result, Err(crate::ConfigError::Missing { .. })));
    }

    #[tokio::test]
    async fn test_builder_merge_sets_base() {
        let runtime = HeedRuntime::builder()
            .merge(quiet_config())
            .without_env()
            .build()
            .unwrap();
        assert_eq!(runtime.dispatcher().prefix(), "!");
        assert_eq!(runtime.dialogue_timeout(), Duration::from_secs(3));
    }
}
