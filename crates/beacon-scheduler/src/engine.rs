use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use beacon_core::{config::SchedulerConfig, trace::TraceSource};
use beacon_lock::LockService;
use futures_util::FutureExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

use crate::{
    clock::{Clock, SystemClock},
    error::{Result, SchedulerError},
    handler::Handler,
    job::{Job, JobBuilder, Unscheduled},
    panic::{install_hook, panic_message},
    types::JobStatsSnapshot,
};

/// Collaborators and timing shared by the tick loop, interval timers and
/// every dispatch.
pub(crate) struct Shared {
    pub(crate) lock: Arc<dyn LockService>,
    pub(crate) trace: Arc<dyn TraceSource>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) tick: Duration,
    pub(crate) lock_ttl: Duration,
    pub(crate) renew_every: Duration,
    pub(crate) shutdown: watch::Receiver<bool>,
}

/// Job registry. Jobs are added before [`start`](Scheduler::start); starting
/// consumes the registry, so the job set is fixed from then on.
pub struct Scheduler {
    jobs: Vec<Arc<Job>>,
    lock: Arc<dyn LockService>,
    trace: Arc<dyn TraceSource>,
    clock: Arc<dyn Clock>,
    config: SchedulerConfig,
}

impl Scheduler {
    /// Create an empty registry. No tasks are spawned until `start`.
    ///
    /// Rejects a zero tick, a zero lock TTL, and a renew interval that is
    /// zero or not below the TTL.
    pub fn new(
        config: SchedulerConfig,
        lock: Arc<dyn LockService>,
        trace: Arc<dyn TraceSource>,
    ) -> Result<Self> {
        check_config(&config)?;
        let clock: Arc<dyn Clock> = Arc::new(SystemClock::new(config.timezone));
        Ok(Self {
            jobs: Vec::new(),
            lock,
            trace,
            clock,
            config,
        })
    }

    /// Replace the wall clock used for daily matching.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Begin configuring a job. Nothing is registered until the returned
    /// builder's `register()` succeeds.
    pub fn add_job(
        &mut self,
        name: impl Into<String>,
        handler: impl Handler,
    ) -> JobBuilder<'_, Unscheduled> {
        JobBuilder::new(self, name.into(), Arc::new(handler))
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Registered job names in registration order.
    pub fn job_names(&self) -> Vec<&str> {
        self.jobs.iter().map(|j| j.name()).collect()
    }

    pub(crate) fn contains(&self, name: &str) -> bool {
        self.jobs.iter().any(|j| j.name() == name)
    }

    pub(crate) fn lock_prefix(&self) -> &str {
        &self.config.lock_prefix
    }

    pub(crate) fn push(&mut self, job: Job) {
        self.jobs.push(Arc::new(job));
    }

    #[cfg(test)]
    pub(crate) fn jobs_for_test(&self) -> &[Arc<Job>] {
        &self.jobs
    }

    /// Spawn the master tick loop and return a handle to the running scheduler.
    ///
    /// The loop pulses every `tick_interval_ms` and offers each job, in
    /// registration order, the chance to dispatch. A panic escaping the loop
    /// is logged and the loop restarted. Dropping the handle leaves the
    /// scheduler running; call [`SchedulerHandle::shutdown`] to stop it.
    pub fn start(self) -> SchedulerHandle {
        install_hook();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let shared = Arc::new(Shared {
            lock: self.lock,
            trace: self.trace,
            clock: self.clock,
            tick: Duration::from_millis(self.config.tick_interval_ms),
            lock_ttl: Duration::from_secs(self.config.lock_ttl_secs),
            renew_every: Duration::from_secs(self.config.lock_renew_interval_secs),
            shutdown: shutdown_rx,
        });
        let jobs: Arc<[Arc<Job>]> = self.jobs.into();

        info!(
            jobs = jobs.len(),
            tick_ms = shared.tick.as_millis() as u64,
            node = %self.config.node_id,
            "scheduler started"
        );
        let task = tokio::spawn(supervise_ticks(Arc::clone(&jobs), shared));

        SchedulerHandle {
            jobs,
            shutdown: shutdown_tx,
            task,
        }
    }
}

fn check_config(config: &SchedulerConfig) -> Result<()> {
    if config.tick_interval_ms == 0 {
        return Err(SchedulerError::InvalidConfig(
            "tick_interval_ms must be > 0".into(),
        ));
    }
    if config.lock_ttl_secs == 0 {
        return Err(SchedulerError::InvalidConfig(
            "lock_ttl_secs must be > 0".into(),
        ));
    }
    if config.lock_renew_interval_secs == 0
        || config.lock_renew_interval_secs >= config.lock_ttl_secs
    {
        return Err(SchedulerError::InvalidConfig(format!(
            "lock_renew_interval_secs ({}) must be > 0 and below lock_ttl_secs ({})",
            config.lock_renew_interval_secs, config.lock_ttl_secs
        )));
    }
    Ok(())
}

/// Handle to a running scheduler.
pub struct SchedulerHandle {
    jobs: Arc<[Arc<Job>]>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Stop the tick loop and every interval timer. Dispatches already in
    /// flight run to completion.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    /// Wait for the tick loop to exit (after `shutdown`).
    pub async fn join(self) {
        if let Err(e) = self.task.await {
            error!(error = %e, "scheduler tick task failed");
        }
    }

    pub fn stats(&self, name: &str) -> Option<JobStatsSnapshot> {
        self.job(name).map(|j| j.stats().snapshot())
    }

    pub fn job(&self, name: &str) -> Option<&Job> {
        self.jobs.iter().find(|j| j.name() == name).map(|j| j.as_ref())
    }

    pub fn job_names(&self) -> Vec<&str> {
        self.jobs.iter().map(|j| j.name()).collect()
    }
}

/// Resolves once `true` is broadcast. If the sender is gone no signal can
/// ever arrive, so it never resolves.
pub(crate) async fn wait_for_shutdown(mut rx: watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

async fn supervise_ticks(jobs: Arc<[Arc<Job>]>, shared: Arc<Shared>) {
    loop {
        match AssertUnwindSafe(tick_loop(&jobs, &shared))
            .catch_unwind()
            .await
        {
            Ok(()) => {
                info!("scheduler stopped");
                return;
            }
            Err(payload) => {
                error!(
                    panic = %panic_message(payload.as_ref()),
                    "scheduler tick loop panicked, restarting"
                );
            }
        }
    }
}

async fn tick_loop(jobs: &[Arc<Job>], shared: &Arc<Shared>) {
    let mut ticker = tokio::time::interval(shared.tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let stop = wait_for_shutdown(shared.shutdown.clone());
    tokio::pin!(stop);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let now = shared.clock.now();
                for job in jobs {
                    job.run(shared, now);
                }
            }
            _ = &mut stop => return,
        }
    }
}
