use std::sync::atomic::{AtomicI64, Ordering};

use chrono::Utc;

/// Wall-clock resolution used to seed a fresh sequencer. Exchanges that cap the
/// nonce width (e.g. to 32 bits) need a coarser seed than nanoseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NonceSeed {
    #[default]
    UnixNanos,
    UnixMillis,
    UnixSeconds,
}

impl NonceSeed {
    fn now(self) -> i64 {
        let now = Utc::now();
        match self {
            NonceSeed::UnixNanos => now
                .timestamp_nanos_opt()
                .unwrap_or_else(|| now.timestamp_micros().saturating_mul(1_000)),
            NonceSeed::UnixMillis => now.timestamp_millis(),
            NonceSeed::UnixSeconds => now.timestamp(),
        }
    }
}

/// Strictly increasing nonce generator for one credential.
///
/// The first call seeds from the wall clock so a restarted process does not
/// reuse nonces the exchange has already seen; later calls increment.
#[derive(Debug, Default)]
pub struct NonceSequencer {
    value: AtomicI64,
    seed: NonceSeed,
}

impl NonceSequencer {
    pub fn new(seed: NonceSeed) -> Self {
        Self {
            value: AtomicI64::new(0),
            seed,
        }
    }

    /// Safe to call concurrently; every caller observes a distinct value and
    /// values are handed out in increasing order.
    pub fn next(&self) -> i64 {
        let mut current = self.value.load(Ordering::Acquire);
        loop {
            let candidate = if current == 0 {
                self.seed.now().max(1)
            } else {
                current + 1
            };
            match self.value.compare_exchange_weak(
                current,
                candidate,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return candidate,
                Err(observed) => current = observed,
            }
        }
    }

    /// Last value handed out, or 0 before first use.
    pub fn current(&self) -> i64 {
        self.value.load(Ordering::Acquire)
    }
}
