//! Per-dispatch trace identifiers.
//!
//! An identifier looks like `web-01-m5x3k2a1-5yc1s`: the cached hostname, the
//! base-36 millisecond timestamp captured when the generator was (re)seeded,
//! and a base-36 sequence number. The sequence starts at [`INITIAL_SEQUENCE`]
//! so freshly seeded identifiers keep a stable width.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::debug;

/// First sequence value after every (re)seed.
pub const INITIAL_SEQUENCE: u64 = 10_000_000;

/// Anything that can mint a fresh opaque identifier per execution.
pub trait TraceSource: Send + Sync {
    fn new_id(&self) -> String;
}

/// Process-wide generator: hostname + seed timestamp + atomic sequence.
pub struct TraceIdGenerator {
    host: String,
    stamp: RwLock<String>,
    seq: AtomicU64,
    reseed: Mutex<()>,
}

impl TraceIdGenerator {
    pub fn new() -> Self {
        Self::with_host(&crate::config::hostname())
    }

    pub fn with_host(host: &str) -> Self {
        Self::with_start(host, INITIAL_SEQUENCE)
    }

    fn with_start(host: &str, start: u64) -> Self {
        Self {
            host: host.to_string(),
            stamp: RwLock::new(to_base36(now_millis())),
            seq: AtomicU64::new(start),
            reseed: Mutex::new(()),
        }
    }

    pub fn next_id(&self) -> String {
        loop {
            // checked_add turns the wraparound into an Err instead of a silent 0.
            match self
                .seq
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_add(1))
            {
                Ok(n) => {
                    let stamp = self.stamp.read().expect("trace stamp poisoned");
                    return format!("{}-{}-{}", self.host, stamp, to_base36(n));
                }
                Err(_) => self.reseed(),
            }
        }
    }

    /// Re-capture the timestamp and reset the sequence. Only the first caller
    /// to observe the exhausted counter does the work.
    fn reseed(&self) {
        let _guard = self.reseed.lock().expect("trace reseed lock poisoned");
        if self.seq.load(Ordering::Acquire) != u64::MAX {
            return;
        }

        let mut stamp = self.stamp.write().expect("trace stamp poisoned");
        let mut next = to_base36(now_millis());
        if next == *stamp {
            // same millisecond as the previous seed; the stamp must still move
            next.push('0');
        }
        debug!(old = %stamp, new = %next, "trace sequence exhausted, reseeding");
        *stamp = next;
        self.seq.store(INITIAL_SEQUENCE, Ordering::Release);
    }
}

impl Default for TraceIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl TraceSource for TraceIdGenerator {
    fn new_id(&self) -> String {
        self.next_id()
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Lowercase base-36 rendering of `n`.
pub fn to_base36(mut n: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if n == 0 {
        return "0".to_string();
    }
    let mut buf = Vec::with_capacity(13);
    while n > 0 {
        buf.push(DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    buf.reverse();
    String::from_utf8(buf).unwrap_or_default()
}
