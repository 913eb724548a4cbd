//! Background tasks and periodic jobs.
//!
//! Two kinds of scheduled work share one [`Scheduler`]:
//!
//! - background tasks: keyed closures that all run together once per
//!   configured period while the runtime is up;
//! - periodic jobs: messages sent to groups on their own interval, optionally
//!   a limited number of times.
//!
//! Everything stops when the scheduler's token is cancelled, which
//! [`HeedRuntime`](crate::HeedRuntime) does on shutdown.
//!
//! ```rust,ignore
//! let scheduler = runtime.scheduler();
//! scheduler.add_background_task(Some("reload-rules"), || async { reload().await });
//!
//! let job = PeriodicJob::new(bot, Duration::from_secs(3600))
//!     .key("hourly-reminder")
//!     .times(24)
//!     .message("Drink some water")
//!     .group("10001");
//! scheduler.submit_job(job)?;
//! ```

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, trace, warn};

use heed_core::{BoxedBot, GroupMessage, Message};

use crate::config::SchedulerConfig;
use crate::error::{RuntimeError, RuntimeResult};

type TaskFuture = Pin<Box<dyn Future<Output = ()> + Send>>;
type BackgroundTask = Arc<dyn Fn() -> TaskFuture + Send + Sync>;

struct JobEntry {
    id: u64,
    token: CancellationToken,
}

/// Runs background tasks and periodic jobs until stopped.
pub struct Scheduler {
    enabled: bool,
    period: Duration,
    tasks: Arc<Mutex<BTreeMap<String, BackgroundTask>>>,
    jobs: Arc<Mutex<HashMap<String, JobEntry>>>,
    tracker: TaskTracker,
    token: CancellationToken,
    started: AtomicBool,
    next_id: AtomicU64,
}

impl Scheduler {
    /// Creates a scheduler that stops when `token` is cancelled.
    pub fn new(config: &SchedulerConfig, token: CancellationToken) -> Self {
        Self {
            enabled: config.enabled,
            period: config.period(),
            tasks: Arc::default(),
            jobs: Arc::default(),
            tracker: TaskTracker::new(),
            token,
            started: AtomicBool::new(false),
            next_id: AtomicU64::new(1),
        }
    }

    // -------------------------------------------------------------------------
    // Background tasks
    // -------------------------------------------------------------------------

    /// Adds a background task and returns its key.
    ///
    /// Without a key one is generated. A task already stored under the key is
    /// replaced.
    pub fn add_background_task<F, Fut>(&self, key: Option<&str>, task: F) -> String
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let task: BackgroundTask = Arc::new(move || -> TaskFuture { Box::pin(task()) });
        let mut tasks = self.tasks.lock();
        let key = match key {
            Some(key) => key.to_string(),
            None => self.fresh_key("task", |k| tasks.contains_key(k)),
        };
        if tasks.insert(key.clone(), task).is_some() {
            debug!(task = %key, "Background task replaced");
        } else {
            debug!(task = %key, total = tasks.len(), "Background task added");
        }
        key
    }

    /// Removes a background task. Returns false if there was none.
    pub fn remove_background_task(&self, key: &str) -> bool {
        let removed = self.tasks.lock().remove(key).is_some();
        if removed {
            debug!(task = %key, "Background task removed");
        }
        removed
    }

    /// Returns true if a background task is stored under `key`.
    pub fn has_background_task(&self, key: &str) -> bool {
        self.tasks.lock().contains_key(key)
    }

    /// Starts running background tasks once per period, the first round
    /// right away.
    ///
    /// Does nothing when background tasks are disabled or already started.
    pub fn start(&self) {
        if !self.enabled {
            info!("Background tasks are disabled");
            return;
        }
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }

        let tasks = Arc::clone(&self.tasks);
        let token = self.token.clone();
        let period = self.period;
        info!(period_secs = period.as_secs(), "Background tasks started");

        self.tracker.spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                let round: Vec<(String, BackgroundTask)> = tasks
                    .lock()
                    .iter()
                    .map(|(key, task)| (key.clone(), Arc::clone(task)))
                    .collect();
                debug!(count = round.len(), "Running background tasks");

                let run = async {
                    for (key, task) in round {
                        trace!(task = %key, "Background task running");
                        task().await;
                    }
                };
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = run => {}
                }
            }
            debug!("Background tasks stopped");
        });
    }

    // -------------------------------------------------------------------------
    // Periodic jobs
    // -------------------------------------------------------------------------

    /// Starts a periodic job and returns its key.
    ///
    /// The first run happens right away. Fails if the job is invalid, if its
    /// key is taken by a running job, or if the scheduler has stopped.
    pub fn submit_job(&self, job: PeriodicJob) -> RuntimeResult<String> {
        job.validate()?;
        if self.token.is_cancelled() {
            return Err(RuntimeError::SchedulerStopped);
        }

        let mut jobs = self.jobs.lock();
        let key = match &job.key {
            Some(key) if jobs.contains_key(key) => {
                return Err(RuntimeError::DuplicateJob { key: key.clone() });
            }
            Some(key) => key.clone(),
            None => self.fresh_key("job", |k| jobs.contains_key(k)),
        };
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let token = self.token.child_token();
        jobs.insert(
            key.clone(),
            JobEntry {
                id,
                token: token.clone(),
            },
        );
        drop(jobs);

        info!(
            job = %key,
            every_secs = job.every.as_secs(),
            limit = ?job.count,
            groups = job.groups.len(),
            "Job submitted"
        );

        let registry = Arc::clone(&self.jobs);
        let job_key = key.clone();
        self.tracker.spawn(async move {
            job.run(&job_key, token).await;
            let mut jobs = registry.lock();
            if jobs.get(&job_key).is_some_and(|entry| entry.id == id) {
                jobs.remove(&job_key);
            }
        });
        Ok(key)
    }

    /// Stops a periodic job. Returns false if no job runs under `key`.
    pub fn interrupt_job(&self, key: &str) -> bool {
        let Some(entry) = self.jobs.lock().remove(key) else {
            return false;
        };
        entry.token.cancel();
        info!(job = %key, "Job interrupted");
        true
    }

    /// Returns true if a periodic job runs under `key`.
    pub fn has_job(&self, key: &str) -> bool {
        self.jobs.lock().contains_key(key)
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    /// Returns true once the scheduler has been told to stop.
    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Stops everything and waits for running tasks and jobs to return.
    pub async fn shutdown(&self) {
        self.token.cancel();
        self.tracker.close();
        debug!(in_flight = self.tracker.len(), "Draining scheduler");
        self.tracker.wait().await;
        self.jobs.lock().clear();
    }

    fn fresh_key(&self, kind: &str, taken: impl Fn(&str) -> bool) -> String {
        loop {
            let key = format!("{kind}-{}", self.next_id.fetch_add(1, Ordering::Relaxed));
            if !taken(&key) {
                return key;
            }
        }
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("enabled", &self.enabled)
            .field("period", &self.period)
            .field("tasks", &self.tasks.lock().len())
            .field("jobs", &self.jobs.lock().len())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

// =============================================================================
// PeriodicJob
// =============================================================================

/// Messages a bot sends to groups on a fixed interval.
///
/// Each run sends the next message, cycling through the list, to every group.
/// A group is addressed by handing the bot a group event from the bot itself.
pub struct PeriodicJob {
    bot: BoxedBot,
    every: Duration,
    key: Option<String>,
    count: Option<u32>,
    messages: Vec<Message>,
    groups: Vec<String>,
}

impl PeriodicJob {
    /// Creates a job that runs every `every`, forever unless limited with
    /// [`times`](Self::times).
    pub fn new(bot: BoxedBot, every: Duration) -> Self {
        Self {
            bot,
            every,
            key: None,
            count: None,
            messages: Vec::new(),
            groups: Vec::new(),
        }
    }

    /// Sets the key the job can be interrupted by.
    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Stops the job after `count` runs.
    pub fn times(mut self, count: u32) -> Self {
        self.count = Some(count);
        self
    }

    /// Adds a message to the rotation.
    pub fn message(mut self, message: impl Into<Message>) -> Self {
        self.messages.push(message.into());
        self
    }

    /// Adds a group to send to.
    pub fn group(mut self, group: impl Into<String>) -> Self {
        self.groups.push(group.into());
        self
    }

    fn validate(&self) -> RuntimeResult<()> {
        if self.every.is_zero() {
            return Err(RuntimeError::invalid_job("interval must be greater than 0"));
        }
        if self.count == Some(0) {
            return Err(RuntimeError::invalid_job("run count must be greater than 0"));
        }
        if self.messages.is_empty() {
            return Err(RuntimeError::invalid_job("no messages to send"));
        }
        if self.groups.is_empty() {
            return Err(RuntimeError::invalid_job("no groups to send to"));
        }
        Ok(())
    }

    async fn run(self, key: &str, token: CancellationToken) {
        let mut ticker = interval(self.every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut runs: usize = 0;

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    debug!(job = %key, runs, "Job stopped");
                    return;
                }
                _ = ticker.tick() => {}
            }

            let message = &self.messages[runs % self.messages.len()];
            for group in &self.groups {
                let target = GroupMessage::new(group.as_str(), self.bot.id(), "");
                if let Err(e) = self.bot.send(&target, message.clone()).await {
                    warn!(job = %key, group = %group, error = %e, "Job delivery failed");
                }
            }
            runs += 1;

            if self.count.is_some_and(|limit| runs >= limit as usize) {
                info!(job = %key, runs, "Job reached its run limit");
                return;
            }
            trace!(job = %key, runs, "Job ran");
        }
    }
}

impl fmt::Debug for PeriodicJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeriodicJob")
            .field("bot", &self.bot.id())
            .field("every", &self.every)
            .field("key", &self.key)
            .field("count", &self.count)
            .field("messages", &self.messages.len())
            .field("groups", &self.groups)
            .finish()
    }
}
