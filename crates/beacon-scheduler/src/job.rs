use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use beacon_lock::server_lock_key;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, info_span, Instrument};

use crate::{
    dispatch::dispatch,
    engine::{wait_for_shutdown, Scheduler, Shared},
    error::{Result, SchedulerError},
    handler::Handler,
    schedule,
    types::{Jitter, JobStats, Policy, Schedule},
};

/// A registered job: immutable configuration plus the small amount of
/// runtime state the dispatch path needs.
pub struct Job {
    name: String,
    handler: Arc<dyn Handler>,
    schedule: Schedule,
    policy: Policy,
    lock_key: String,
    /// Set while a dispatch runs with overlap disabled.
    pub(crate) in_flight: AtomicBool,
    /// Set once the private interval timer has been spawned.
    armed: AtomicBool,
    /// Last `(date, time)` a daily entry fired for.
    last_daily: Mutex<Option<(NaiveDate, NaiveTime)>>,
    pub(crate) stats: JobStats,
}

impl Job {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    pub fn policy(&self) -> Policy {
        self.policy
    }

    /// Key of this job's server lock in the shared store.
    pub fn lock_key(&self) -> &str {
        &self.lock_key
    }

    pub fn stats(&self) -> &JobStats {
        &self.stats
    }

    pub(crate) fn handler(&self) -> Arc<dyn Handler> {
        Arc::clone(&self.handler)
    }

    /// Called once per master tick: dispatch if due.
    pub(crate) fn run(self: &Arc<Self>, shared: &Arc<Shared>, now: NaiveDateTime) {
        match &self.schedule {
            Schedule::Immediate => dispatch(self, shared),
            Schedule::DailyAt(times) => {
                if let Some(hit) = schedule::daily_match(times, now) {
                    if self.claim_daily(now.date(), hit) {
                        dispatch(self, shared);
                    }
                }
            }
            Schedule::Every(period) => {
                if self
                    .armed
                    .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    self.arm(shared, *period);
                }
            }
        }
    }

    /// True the first time a given daily entry is seen on a given date.
    fn claim_daily(&self, date: NaiveDate, time: NaiveTime) -> bool {
        let mut last = self.last_daily.lock().expect("daily marker poisoned");
        if *last == Some((date, time)) {
            debug!(job = %self.name, "daily entry already fired this second");
            return false;
        }
        *last = Some((date, time));
        true
    }

    /// Spawn the private timer driving an interval schedule.
    fn arm(self: &Arc<Self>, shared: &Arc<Shared>, period: Duration) {
        let job = Arc::clone(self);
        let shared = Arc::clone(shared);
        let span = info_span!("ticker", job = %self.name);
        info!(job = %self.name, period_secs = period.as_secs(), "interval timer armed");

        tokio::spawn(
            async move {
                let mut ticker = interval_at(Instant::now() + period, period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                let stop = wait_for_shutdown(shared.shutdown.clone());
                tokio::pin!(stop);
                loop {
                    tokio::select! {
                        _ = ticker.tick() => dispatch(&job, &shared),
                        _ = &mut stop => {
                            debug!("interval timer stopped");
                            break;
                        }
                    }
                }
            }
            .instrument(span),
        );
    }
}

/// Builder state before a schedule is chosen.
pub struct Unscheduled;

/// Builder state once a schedule is chosen; holds the schedule or the reason
/// it is invalid.
pub struct Scheduled(std::result::Result<Schedule, String>);

/// Fluent job configuration returned by [`Scheduler::add_job`].
///
/// Exactly one schedule setter can be called: they only exist on
/// `JobBuilder<Unscheduled>`. Policy setters work in either state, and
/// [`register`](JobBuilder::register) validates everything before the job
/// joins the registry.
#[must_use = "a job is only scheduled once `register()` is called"]
pub struct JobBuilder<'a, S> {
    scheduler: &'a mut Scheduler,
    name: String,
    handler: Arc<dyn Handler>,
    policy: Policy,
    delay: Option<(u64, u64)>,
    state: S,
}

impl<'a> JobBuilder<'a, Unscheduled> {
    pub(crate) fn new(scheduler: &'a mut Scheduler, name: String, handler: Arc<dyn Handler>) -> Self {
        Self {
            scheduler,
            name,
            handler,
            policy: Policy::default(),
            delay: None,
            state: Unscheduled,
        }
    }

    /// Due on every master tick. Also disables overlap, so the job behaves
    /// like a singleton restarted as soon as it reports Done.
    pub fn immediate(mut self) -> JobBuilder<'a, Scheduled> {
        self.policy.allow_overlap = false;
        self.scheduled(Ok(Schedule::Immediate))
    }

    /// Due at each `HH:MM:SS` wall-clock time, every day.
    pub fn daily_at<I, T>(self, times: I) -> JobBuilder<'a, Scheduled>
    where
        I: IntoIterator<Item = T>,
        T: AsRef<str>,
    {
        let parsed = schedule::daily_at(times);
        self.scheduled(parsed)
    }

    pub fn every_seconds(self, n: u64) -> JobBuilder<'a, Scheduled> {
        self.every(Duration::from_secs(n))
    }

    pub fn every_minutes(self, n: u64) -> JobBuilder<'a, Scheduled> {
        self.every(Duration::from_secs(n.saturating_mul(60)))
    }

    pub fn every_hours(self, n: u64) -> JobBuilder<'a, Scheduled> {
        self.every(Duration::from_secs(n.saturating_mul(3600)))
    }

    pub fn every(self, period: Duration) -> JobBuilder<'a, Scheduled> {
        let parsed = schedule::every(period);
        self.scheduled(parsed)
    }

    fn scheduled(self, schedule: std::result::Result<Schedule, String>) -> JobBuilder<'a, Scheduled> {
        JobBuilder {
            scheduler: self.scheduler,
            name: self.name,
            handler: self.handler,
            policy: self.policy,
            delay: self.delay,
            state: Scheduled(schedule),
        }
    }
}

impl<S> JobBuilder<'_, S> {
    /// Skip a dispatch while the previous one has not reported Done.
    pub fn without_overlapping(mut self) -> Self {
        self.policy.allow_overlap = false;
        self
    }

    /// Only the node holding the server lock runs a given dispatch.
    pub fn on_one_server(mut self) -> Self {
        self.policy.single_instance = true;
        self
    }

    /// Sleep a uniform random `[min, max]` seconds before running the handler.
    /// `max < min` and `max` beyond [`Jitter::MAX`] are rejected by
    /// [`register`](JobBuilder::register).
    pub fn random_delay(mut self, min_secs: u64, max_secs: u64) -> Self {
        self.delay = Some((min_secs, max_secs));
        self
    }
}

impl JobBuilder<'_, Scheduled> {
    /// Validate the configuration and append the job to the registry.
    pub fn register(self) -> Result<()> {
        let JobBuilder {
            scheduler,
            name,
            handler,
            mut policy,
            delay,
            state: Scheduled(schedule),
        } = self;

        if name.trim().is_empty() {
            return Err(SchedulerError::EmptyJobName);
        }
        if scheduler.contains(&name) {
            return Err(SchedulerError::DuplicateJob { name });
        }
        let schedule = schedule.map_err(|reason| SchedulerError::InvalidSchedule {
            job: name.clone(),
            reason,
        })?;
        if let Some((min_secs, max_secs)) = delay {
            let jitter = Jitter::new(Duration::from_secs(min_secs), Duration::from_secs(max_secs))
                .ok_or_else(|| SchedulerError::InvalidJitter {
                    job: name.clone(),
                    min_secs,
                    max_secs,
                })?;
            policy.jitter = Some(jitter);
        }

        let lock_key = server_lock_key(scheduler.lock_prefix(), &name);
        info!(
            job = %name,
            schedule = %schedule.describe(),
            overlap = policy.allow_overlap,
            one_server = policy.single_instance,
            "job registered"
        );
        scheduler.push(Job {
            name,
            handler,
            schedule,
            policy,
            lock_key,
            in_flight: AtomicBool::new(false),
            armed: AtomicBool::new(false),
            last_daily: Mutex::new(None),
            stats: JobStats::default(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_core::{SchedulerConfig, TraceIdGenerator};
    use beacon_lock::MemoryLockService;

    use crate::handler::handler_fn;

    fn scheduler() -> Scheduler {
        let config = SchedulerConfig {
            lock_prefix: "test:".into(),
            ..SchedulerConfig::default()
        };
        Scheduler::new(
            config,
            Arc::new(MemoryLockService::new("node-a")),
            Arc::new(TraceIdGenerator::with_host("node-a")),
        )
        .unwrap()
    }

    fn noop() -> impl Handler {
        handler_fn(|_ctx| async { Ok::<_, anyhow::Error>(()) })
    }

    #[test]
    fn defaults_allow_overlap_on_every_node() {
        let mut s = scheduler();
        s.add_job("Report", noop()).every_hours(1).register().unwrap();
        let job = &s.jobs_for_test()[0];
        assert_eq!(job.policy(), Policy::default());
        assert_eq!(job.schedule(), &Schedule::Every(Duration::from_secs(3600)));
        assert_eq!(job.lock_key(), "test:schedule:jobLock:Report:Server");
    }

    #[test]
    fn immediate_disables_overlap() {
        let mut s = scheduler();
        s.add_job("Watcher", noop()).immediate().register().unwrap();
        assert!(!s.jobs_for_test()[0].policy().allow_overlap);
    }

    #[test]
    fn policies_apply_before_or_after_schedule() {
        let mut s = scheduler();
        s.add_job("A", noop())
            .on_one_server()
            .every_minutes(5)
            .without_overlapping()
            .random_delay(2, 5)
            .register()
            .unwrap();
        let p = s.jobs_for_test()[0].policy();
        assert!(p.single_instance);
        assert!(!p.allow_overlap);
        let jitter = p.jitter.unwrap();
        assert_eq!(jitter.min(), Duration::from_secs(2));
        assert_eq!(jitter.max(), Duration::from_secs(5));
    }

    #[test]
    fn inverted_delay_fails_registration() {
        let mut s = scheduler();
        let err = s
            .add_job("Ping", noop())
            .every_seconds(10)
            .random_delay(5, 2)
            .register()
            .unwrap_err();
        assert!(matches!(
            err,
            SchedulerError::InvalidJitter { min_secs: 5, max_secs: 2, .. }
        ));
        assert!(s.is_empty());
    }

    #[test]
    fn unbounded_delay_fails_registration() {
        let mut s = scheduler();
        let err = s
            .add_job("Ping", noop())
            .every_seconds(10)
            .random_delay(0, u64::MAX)
            .register()
            .unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidJitter { max_secs: u64::MAX, .. }));
    }

    #[test]
    fn bad_daily_time_fails_registration() {
        let mut s = scheduler();
        let err = s
            .add_job("Report", noop())
            .daily_at(["07:30:00", "25:00:00"])
            .register()
            .unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidSchedule { .. }));
    }

    #[test]
    fn zero_interval_fails_registration() {
        let mut s = scheduler();
        assert!(s.add_job("Z", noop()).every_seconds(0).register().is_err());
    }

    #[test]
    fn saturated_interval_fails_registration() {
        let mut s = scheduler();
        let err = s
            .add_job("Forever", noop())
            .every_hours(u64::MAX / 1000)
            .register()
            .unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidSchedule { ref reason, .. } if reason.contains("maximum")));
        assert!(s.is_empty());
    }

    #[test]
    fn names_must_be_unique_and_non_empty() {
        let mut s = scheduler();
        s.add_job("Cleanup", noop()).every_minutes(1).register().unwrap();
        let dup = s.add_job("Cleanup", noop()).every_minutes(2).register();
        assert!(matches!(dup, Err(SchedulerError::DuplicateJob { .. })));
        let empty = s.add_job("  ", noop()).immediate().register();
        assert!(matches!(empty, Err(SchedulerError::EmptyJobName)));
        assert_eq!(s.job_names(), vec!["Cleanup"]);
    }

    #[test]
    fn registration_order_is_kept() {
        let mut s = scheduler();
        for name in ["c", "a", "b"] {
            s.add_job(name, noop()).immediate().register().unwrap();
        }
        assert_eq!(s.job_names(), vec!["c", "a", "b"]);
    }

    #[test]
    fn daily_entry_claims_once_per_date() {
        let mut s = scheduler();
        s.add_job("Report", noop())
            .daily_at(["12:00:00"])
            .register()
            .unwrap();
        let job = &s.jobs_for_test()[0];
        let noon = NaiveTime::from_hms_opt(12, 0, 0).unwrap();
        let d1 = NaiveDate::from_ymd_opt(2026, 5, 1).unwrap();
        let d2 = d1.succ_opt().unwrap();

        assert!(job.claim_daily(d1, noon));
        assert!(!job.claim_daily(d1, noon));
        assert!(job.claim_daily(d2, noon));
    }
}
