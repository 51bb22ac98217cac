/**
 * Send key generation.
 *
 * Every in-flight send is indexed by a `SendKey` derived from the wall
 * clock (microseconds since the Unix epoch). Two sends issued within the
 * same microsecond, or a clock that steps backwards, would yield the same
 * reading, so the generator never hands out a value that is not strictly
 * greater than the previous one:
 *
 * ```text
 *   key = max(now_micros, last_key + 1)
 * ```
 *
 * Keys therefore remain close to the submission time (handy when reading
 * logs) while staying unique for the lifetime of the generator.
 */
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::protocol::types::SendKey;

// ---------------------------------------------------------------------------
// KeyGenerator
// ---------------------------------------------------------------------------

/**
 * Lock-free source of strictly increasing, timestamp-derived send keys.
 *
 * One generator lives inside each `Publisher`; it can be shared freely
 * between threads.
 */
#[derive(Debug, Default)]
pub struct KeyGenerator {
    /// Last key handed out, or 0 before the first call.
    last: AtomicI64,
}

impl KeyGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /**
     * Returns the next key.
     *
     * Reads the clock once, then publishes `max(now, last + 1)` with a
     * compare-and-swap loop so concurrent callers always observe distinct
     * values.
     */
    pub fn next_key(&self) -> SendKey {
        let now = now_micros();
        let mut last = self.last.load(Ordering::Relaxed);

        loop {
            let candidate = now.max(last.saturating_add(1));
            match self
                .last
                .compare_exchange_weak(last, candidate, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => return SendKey::new(candidate),
                Err(observed) => last = observed,
            }
        }
    }
}

/**
 * Current wall-clock time in microseconds since the Unix epoch.
 *
 * A clock set before 1970 reads as 0; the generator still produces unique
 * keys in that case, they just stop tracking real time.
 */
fn now_micros() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| i64::try_from(elapsed.as_micros()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}
