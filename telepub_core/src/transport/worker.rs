/**
 * Background driver thread that keeps the transport's queue moving and
 * drains outstanding sends on shutdown.
 *
 * State machine:
 *
 * ```text
 *   ┌─────────┐  stop signal  ┌──────────┐  table empty  ┌─────────┐
 *   │ Running │ ────────────► │ Draining │ ────────────► │ Stopped │
 *   └─────────┘               └──────────┘               └─────────┘
 *   tick: drive if busy       N = 2 × pending drive      thread exits,
 *                             steps, then wait on the    transport may
 *                             table condvar               be closed
 * ```
 *
 * The bounded drain only gives in-flight sends a chance to resolve through
 * normal network I/O. What guarantees completion is the unbounded wait
 * that follows it: the driver does not stop until every send has been
 * retired by its completion.
 *
 * The stop signal is a channel rather than a flag so that a stop request
 * interrupts the sleep between ticks.
 *
 * Fallbacks of sends that fail inside `drive_once` run after the transport
 * lock is released, at the end of each tick or drain step.
 */
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError};

use super::table::Shared;
use super::Transport;
use crate::logging::Logger;

// ---------------------------------------------------------------------------
// DriverState
// ---------------------------------------------------------------------------

/// Lifecycle phase of the background driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    /// Driving the transport on every tick while it reports work.
    Running,

    /// Stop requested; resolving outstanding sends.
    Draining,

    /// Thread has exited. Terminal.
    Stopped,
}

impl DriverState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => DriverState::Running,
            1 => DriverState::Draining,
            _ => DriverState::Stopped,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            DriverState::Running => 0,
            DriverState::Draining => 1,
            DriverState::Stopped => 2,
        }
    }
}

/// Atomic cell holding a `DriverState`, readable from any thread.
#[derive(Debug)]
pub(crate) struct StateCell(AtomicU8);

impl StateCell {
    pub(crate) fn new(state: DriverState) -> Self {
        Self(AtomicU8::new(state.as_u8()))
    }

    pub(crate) fn get(&self) -> DriverState {
        DriverState::from_u8(self.0.load(Ordering::Acquire))
    }

    fn set(&self, state: DriverState) {
        self.0.store(state.as_u8(), Ordering::Release);
    }
}

/**
 * Locks the transport, recovering from poisoning. A panic while the lock
 * was held leaves the transport in whatever state the implementation left
 * it; there is nothing better to do than keep using it.
 */
pub(crate) fn lock_transport<T>(transport: &Mutex<T>) -> MutexGuard<'_, T> {
    transport.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

/**
 * Everything the driver thread needs. Built by the publisher and moved into
 * the thread by `spawn`.
 */
pub(crate) struct Driver<T: Transport> {
    pub(crate) transport: Arc<Mutex<T>>,
    pub(crate) shared: Arc<Shared<T::Message>>,
    pub(crate) state: Arc<StateCell>,
    pub(crate) stop: Receiver<()>,
    pub(crate) tick_interval: Duration,
    pub(crate) drain_ticks_per_pending: usize,
    pub(crate) logger: Logger,
}

impl<T: Transport> Driver<T> {
    /**
     * Spawns the driver thread.
     *
     * A panic inside the loop (e.g. from a transport implementation) is
     * caught and logged; the state still ends at `Stopped` so the owner
     * can tear down.
     */
    pub(crate) fn spawn(self) -> std::io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("telepub-driver".into())
            .spawn(move || {
                let result = panic::catch_unwind(AssertUnwindSafe(|| self.run()));
                if result.is_err() {
                    self.logger
                        .error("driver thread panicked, outstanding sends are abandoned");
                }
                self.state.set(DriverState::Stopped);
            })
    }

    fn run(&self) {
        self.state.set(DriverState::Running);
        self.shared.bind_driver();

        loop {
            self.tick();

            match self.stop.recv_timeout(self.tick_interval) {
                Err(RecvTimeoutError::Timeout) => continue,
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        self.drain();
    }

    /**
     * One `Running` tick: drive the transport if it has queued sends.
     * A failed status query counts as idle.
     */
    fn tick(&self) {
        {
            let mut transport = lock_transport(&self.transport);

            match transport.is_send_busy() {
                Ok(true) => {
                    self.logger.trace("transport busy, driving");
                    transport.drive_once();
                }
                Ok(false) => {}
                Err(err) => {
                    self.logger
                        .debug(&format!("send status unavailable, treating as idle: {err}"));
                }
            }
        }

        self.shared.run_deferred();
    }

    fn drain(&self) {
        self.state.set(DriverState::Draining);

        let pending = self.shared.pending();
        let ticks = pending.saturating_mul(self.drain_ticks_per_pending);
        self.logger.debug(&format!(
            "draining {pending} pending sends over at most {ticks} ticks"
        ));

        for _ in 0..ticks {
            if self.shared.pending() == 0 {
                break;
            }
            lock_transport(&self.transport).drive_once();
            self.shared.run_deferred();
            thread::sleep(self.tick_interval);
        }

        /* Whatever is still in flight resolves through completions only. */
        self.shared.wait_until_empty();
        self.logger.debug("driver stopped");
    }
}
