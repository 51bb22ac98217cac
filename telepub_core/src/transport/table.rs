/**
 * Pending-send table and completion handler.
 *
 * The table is the single source of truth for "what is still outstanding":
 * a key is present if and only if its send was accepted by the transport
 * and has not completed yet.
 *
 * ```text
 *  Publisher::send ──insert──►┌──────────────────┐◄──take/remove── Completion
 *                             │ Mutex<PendingTable>│                (any thread)
 *  Driver (drain) ──wait────► └────────┬─────────┘
 *                                      │ notify_all on every removal
 *                                   Condvar
 * ```
 *
 * A completion is handled in three steps, always in this order:
 * 1. release the message (drop it),
 * 2. run the fallback if the send failed,
 * 3. finally remove the entry and wake waiters.
 *
 * Step 1 and 2 work on values taken out of the record under the lock, so a
 * duplicate completion for the same key finds nothing left to release or
 * call and is ignored.
 *
 * Completions that arrive on the driver thread come from inside
 * `drive_once`, with the transport lock held. Their fallbacks are parked in
 * a deferred list and run by the driver once it has released the lock, so
 * a fallback is free to send through the same publisher.
 */
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Condvar, Mutex, MutexGuard, OnceLock, PoisonError};
use std::thread::{self, ThreadId};
use std::time::Duration;

use crate::error::PublishError;
use crate::logging::Logger;
use crate::protocol::types::{Confirmation, SendKey};
use crate::transport::CompletionSink;

/// Action run when a send fails.
pub type Fallback = Box<dyn FnOnce() + Send>;

// ---------------------------------------------------------------------------
// SendRecord
// ---------------------------------------------------------------------------

/**
 * Bookkeeping for one outstanding send.
 *
 * Owns the transport message until the completion handler releases it.
 */
pub struct SendRecord<M> {
    key: SendKey,
    message: Option<M>,
    fallback: Option<Fallback>,

    /// Set once a completion has claimed the record.
    completing: bool,
}

impl<M> SendRecord<M> {
    pub fn new(key: SendKey, message: M, fallback: Fallback) -> Self {
        Self {
            key,
            message: Some(message),
            fallback: Some(fallback),
            completing: false,
        }
    }
}

// ---------------------------------------------------------------------------
// PendingTable
// ---------------------------------------------------------------------------

/**
 * Map from send key to record. Callers hold the table mutex for every
 * operation; nothing here blocks on I/O.
 */
pub struct PendingTable<M> {
    records: HashMap<SendKey, SendRecord<M>>,
}

impl<M> Default for PendingTable<M> {
    fn default() -> Self {
        Self {
            records: HashMap::new(),
        }
    }
}

impl<M> PendingTable<M> {
    pub fn new() -> Self {
        Self::default()
    }

    /**
     * Registers a record under its key.
     *
     * Never overwrites: if the key is already pending the new record is
     * dropped and `KeyCollision` is returned.
     */
    pub fn insert(&mut self, record: SendRecord<M>) -> Result<(), PublishError> {
        match self.records.entry(record.key) {
            Entry::Occupied(occupied) => Err(PublishError::KeyCollision(*occupied.key())),
            Entry::Vacant(vacant) => {
                vacant.insert(record);
                Ok(())
            }
        }
    }

    pub fn remove(&mut self, key: SendKey) -> Option<SendRecord<M>> {
        self.records.remove(&key)
    }

    pub fn contains(&self, key: SendKey) -> bool {
        self.records.contains_key(&key)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /**
     * Claims a record for completion and takes out its message and
     * fallback. Returns `None` for unknown keys and for records that an
     * earlier completion already claimed.
     */
    fn claim(&mut self, key: SendKey) -> Option<(Option<M>, Option<Fallback>)> {
        let record = self.records.get_mut(&key)?;
        if record.completing {
            return None;
        }
        record.completing = true;
        Some((record.message.take(), record.fallback.take()))
    }
}

// ---------------------------------------------------------------------------
// Shared: table + condvar, the completion sink
// ---------------------------------------------------------------------------

/**
 * State shared between the publisher, the background driver, and every
 * outstanding `Completion`.
 */
pub(crate) struct Shared<M> {
    table: Mutex<PendingTable<M>>,

    /// Signalled after every removal.
    retired: Condvar,

    /// Thread of the background driver, set once it starts.
    driver: OnceLock<ThreadId>,

    /// Failed sends claimed on the driver thread, waiting for their fallback.
    deferred: Mutex<Vec<(SendKey, Fallback)>>,

    logger: Logger,
}

impl<M: Send + 'static> Shared<M> {
    pub(crate) fn new(logger: Logger) -> Self {
        Self {
            table: Mutex::new(PendingTable::new()),
            retired: Condvar::new(),
            driver: OnceLock::new(),
            deferred: Mutex::new(Vec::new()),
            logger,
        }
    }

    /// Marks the calling thread as the driver thread.
    pub(crate) fn bind_driver(&self) {
        if self.driver.set(thread::current().id()).is_err() {
            self.logger.debug("driver thread already bound");
        }
    }

    fn on_driver_thread(&self) -> bool {
        self.driver.get() == Some(&thread::current().id())
    }

    /**
     * Runs the fallbacks parked by completions on the driver thread, then
     * retires their records. Must be called without the transport lock.
     */
    pub(crate) fn run_deferred(&self) {
        let deferred = std::mem::take(
            &mut *self
                .deferred
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );

        for (key, fallback) in deferred {
            run_fallback(&self.logger, key, fallback);
            self.finish(key);
        }
    }

    /**
     * Locks the table. A fallback panic is caught before it can poison the
     * mutex, so a poisoned lock still holds a consistent table and is
     * recovered rather than propagated.
     */
    pub(crate) fn lock_table(&self) -> MutexGuard<'_, PendingTable<M>> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn pending(&self) -> usize {
        self.lock_table().len()
    }

    /// Blocks until the table is empty. No polling: woken by removals only.
    pub(crate) fn wait_until_empty(&self) {
        let guard = self.lock_table();
        let _guard = self
            .retired
            .wait_while(guard, |table| !table.is_empty())
            .unwrap_or_else(PoisonError::into_inner);
    }

    /// Like `wait_until_empty`, but gives up after `timeout`.
    pub(crate) fn wait_until_empty_timeout(&self, timeout: Duration) -> bool {
        let guard = self.lock_table();
        let (_guard, result) = self
            .retired
            .wait_timeout_while(guard, timeout, |table| !table.is_empty())
            .unwrap_or_else(PoisonError::into_inner);
        !result.timed_out()
    }

    /// The record's `finally` step: remove the entry and wake waiters.
    fn finish(&self, key: SendKey) {
        let remaining = {
            let mut table = self.lock_table();
            table.remove(key);
            table.len()
        };
        self.retired.notify_all();
        self.logger
            .trace(&format!("send {key} retired, {remaining} pending"));
    }
}

impl<M: Send + 'static> CompletionSink for Shared<M> {
    fn complete(&self, key: SendKey, confirmation: Confirmation) {
        let claimed = self.lock_table().claim(key);
        let Some((message, fallback)) = claimed else {
            self.logger
                .trace(&format!("ignoring completion ({confirmation}) for unknown send {key}"));
            return;
        };

        drop(message);

        match fallback {
            Some(fallback) if !confirmation.is_ok() => {
                if self.on_driver_thread() {
                    self.logger
                        .trace(&format!("send {key} failed ({confirmation}), fallback deferred"));
                    self.deferred
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .push((key, fallback));
                    return;
                }

                self.logger
                    .trace(&format!("send {key} failed ({confirmation}), calling fallback"));
                run_fallback(&self.logger, key, fallback);
            }
            _ => {}
        }

        self.finish(key);
    }
}

/**
 * Runs a fallback, containing any panic so the caller's cleanup still
 * happens.
 */
pub(crate) fn run_fallback(logger: &Logger, key: SendKey, fallback: Fallback) {
    if panic::catch_unwind(AssertUnwindSafe(fallback)).is_err() {
        logger.error(&format!("fallback for send {key} panicked"));
    }
}
