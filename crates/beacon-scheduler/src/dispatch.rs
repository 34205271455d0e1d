//! One execution of a job's handler.
//!
//! ```text
//! dispatch ─► overlap gate ─► server lock ─► "starts" ─► jitter ─► exec
//!                 │ busy          │ held elsewhere          │
//!                 ▼               ▼                          ▼
//!               skip            skip         supervisor: errors… Done
//!                                              └─► release lock, clear in-flight
//! ```
//!
//! The in-flight flag and the lease are owned by RAII values, so a panic at
//! any point unwinds them: the flag clears and the renewal task releases the
//! key. The whole dispatch runs under a `catch_unwind` boundary that logs the
//! panic with its backtrace.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use futures_util::FutureExt;
use tokio::sync::mpsc;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::{
    engine::Shared,
    handler::{HandlerEvent, Reporter, RunContext},
    job::Job,
    lease::Lease,
    panic::{panic_message, take_backtrace},
    types::JobStats,
};

/// Clears the job's in-flight flag when dropped.
struct InFlightGuard {
    job: Arc<Job>,
}

impl InFlightGuard {
    fn try_enter(job: &Arc<Job>) -> Option<Self> {
        job.in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self {
                job: Arc::clone(job),
            })
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.job.in_flight.store(false, Ordering::Release);
    }
}

/// Spawn an isolated execution of `job` with a fresh trace id.
pub(crate) fn dispatch(job: &Arc<Job>, shared: &Arc<Shared>) {
    JobStats::bump(&job.stats.dispatched);

    let trace_id = shared.trace.new_id();
    let span = info_span!("job", job = %job.name(), trace_id = %trace_id);
    let ctx = RunContext {
        job: job.name().to_string(),
        trace_id,
        span: span.clone(),
    };

    let job = Arc::clone(job);
    let shared = Arc::clone(shared);
    tokio::spawn(
        async move {
            let outcome = AssertUnwindSafe(handle(Arc::clone(&job), shared, ctx))
                .catch_unwind()
                .await;
            if let Err(payload) = outcome {
                JobStats::bump(&job.stats.panics);
                let backtrace = take_backtrace()
                    .map(|bt| bt.to_string())
                    .unwrap_or_else(|| "<no backtrace captured>".to_string());
                error!(
                    panic = %panic_message(payload.as_ref()),
                    backtrace = %backtrace,
                    "job {} panicked",
                    job.name()
                );
            }
        }
        .instrument(span),
    );
}

async fn handle(job: Arc<Job>, shared: Arc<Shared>, ctx: RunContext) {
    let policy = job.policy();

    let in_flight = if policy.allow_overlap {
        None
    } else {
        match InFlightGuard::try_enter(&job) {
            Some(guard) => Some(guard),
            None => {
                JobStats::bump(&job.stats.skipped_overlap);
                debug!("previous dispatch still in flight, skipping");
                return;
            }
        }
    };

    let lease = if policy.single_instance {
        match Lease::acquire(
            Arc::clone(&shared.lock),
            job.lock_key(),
            shared.lock_ttl,
            shared.renew_every,
        )
        .await
        {
            Ok(Some(lease)) => Some(lease),
            Ok(None) => {
                JobStats::bump(&job.stats.skipped_lock);
                debug!(key = %job.lock_key(), "server lock held elsewhere, skipping");
                return;
            }
            Err(e) => {
                // best effort: a dead lock service must not stop the job
                JobStats::bump(&job.stats.lock_faults);
                warn!(key = %job.lock_key(), error = %e, "lock service fault, running without server lock");
                None
            }
        }
    } else {
        None
    };

    let delay = policy.jitter.map(|j| j.sample());
    JobStats::bump(&job.stats.started);
    info!(
        delay_ms = delay.map(|d| d.as_millis() as u64).unwrap_or(0),
        "job {} starts",
        job.name()
    );
    if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
    }

    let (reporter, events) = Reporter::channel();
    tokio::spawn(
        supervise(Arc::clone(&job), events, in_flight, lease).instrument(tracing::Span::current()),
    );

    job.handler().exec(ctx, reporter).await;
}

/// Drain the handler's event stream until Done (or until it closes), then
/// release the server lock and the in-flight flag.
async fn supervise(
    job: Arc<Job>,
    mut events: mpsc::UnboundedReceiver<HandlerEvent>,
    in_flight: Option<InFlightGuard>,
    lease: Option<Lease>,
) {
    loop {
        match events.recv().await {
            Some(HandlerEvent::Progress(msg)) => debug!(progress = %msg, "job progress"),
            Some(HandlerEvent::Error(e)) => {
                JobStats::bump(&job.stats.errors);
                error!(error = %format!("{e:#}"), "job {} reported an error", job.name());
            }
            Some(HandlerEvent::Done) => break,
            None => {
                debug!("handler finished without signalling done");
                break;
            }
        }
    }

    if let Some(lease) = lease {
        lease.release().await;
    }
    drop(in_flight);
    JobStats::bump(&job.stats.completed);
    info!("job {} done", job.name());
}
