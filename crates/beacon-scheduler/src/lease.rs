use std::sync::Arc;
use std::time::Duration;

use beacon_lock::{LockError, LockService};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, warn, Instrument};

/// A held server lock plus the task keeping it alive.
///
/// The renewal task refreshes the TTL every `renew_every` until the lease is
/// released or dropped, then deletes the key. Dropping a `Lease` (e.g. while a
/// panic unwinds) closes the stop channel, so the key is released either way.
pub(crate) struct Lease {
    key: String,
    stop: Option<oneshot::Sender<()>>,
    renewer: Option<JoinHandle<()>>,
}

impl Lease {
    /// Try to take `key`. `Ok(None)` means another holder has it.
    pub(crate) async fn acquire(
        lock: Arc<dyn LockService>,
        key: &str,
        ttl: Duration,
        renew_every: Duration,
    ) -> Result<Option<Lease>, LockError> {
        if !lock.try_acquire(key, ttl).await? {
            return Ok(None);
        }
        debug!(key, "server lock acquired");

        let (stop_tx, stop_rx) = oneshot::channel();
        let renewer = tokio::spawn(
            renew_until_stopped(lock, key.to_string(), ttl, renew_every, stop_rx)
                .instrument(tracing::Span::current()),
        );
        Ok(Some(Lease {
            key: key.to_string(),
            stop: Some(stop_tx),
            renewer: Some(renewer),
        }))
    }

    /// Stop renewing and wait until the key has been released.
    pub(crate) async fn release(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(renewer) = self.renewer.take() {
            if let Err(e) = renewer.await {
                warn!(key = %self.key, error = %e, "lock renewal task failed");
            }
        }
    }
}

/// What the renewal loop has seen so far, so each state change is logged once
/// rather than on every tick.
#[derive(Debug, Default)]
struct RenewState {
    lost: bool,
    faulted: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RenewChange {
    Lost,
    Regained,
    Faulted,
    Recovered,
}

impl RenewState {
    fn observe(&mut self, outcome: &Result<bool, LockError>) -> Option<RenewChange> {
        match outcome {
            Err(_) if self.faulted => None,
            Err(_) => {
                self.faulted = true;
                Some(RenewChange::Faulted)
            }
            Ok(held) => {
                let was_faulted = std::mem::take(&mut self.faulted);
                let was_lost = std::mem::replace(&mut self.lost, !held);
                match (*held, was_lost) {
                    (false, false) => Some(RenewChange::Lost),
                    (true, true) => Some(RenewChange::Regained),
                    _ if was_faulted => Some(RenewChange::Recovered),
                    _ => None,
                }
            }
        }
    }
}

async fn renew_until_stopped(
    lock: Arc<dyn LockService>,
    key: String,
    ttl: Duration,
    renew_every: Duration,
    mut stop: oneshot::Receiver<()>,
) {
    let mut ticker = interval_at(Instant::now() + renew_every, renew_every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut state = RenewState::default();

    loop {
        tokio::select! {
            // Fires on an explicit stop and when the sender is dropped.
            _ = &mut stop => break,
            _ = ticker.tick() => {
                let outcome = lock.renew(&key, ttl).await;
                match (state.observe(&outcome), &outcome) {
                    (Some(RenewChange::Lost), _) => {
                        warn!(%key, "server lock lost; another node may run this job")
                    }
                    (Some(RenewChange::Regained), _) => debug!(%key, "server lock regained"),
                    (Some(RenewChange::Faulted), Err(e)) => {
                        warn!(%key, error = %e, "server lock renewal failing, retrying every tick")
                    }
                    (Some(RenewChange::Recovered), _) => {
                        debug!(%key, "server lock renewal recovered")
                    }
                    _ => {}
                }
            }
        }
    }

    match lock.release(&key).await {
        Ok(()) => debug!(%key, "server lock released"),
        Err(e) => warn!(%key, error = %e, "server lock release failed; it will expire on its own"),
    }
}
