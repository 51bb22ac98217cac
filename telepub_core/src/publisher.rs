/**
 * The publisher: central orchestrator that owns the transport, the
 * pending-send table, and the background driver.
 *
 * Lifecycle:
 * 1. `Publisher::open(connection, options)` opens and configures the
 *    transport, then starts the driver thread.
 * 2. `send()` / `publish()` build a message, queue it on the transport and
 *    register it in the pending table. They return as soon as the message
 *    is queued; the outcome arrives later through the completion handler.
 * 3. `shutdown()` (or dropping the publisher) stops the driver, waits until
 *    every outstanding send has completed, then closes the transport.
 *
 * A publisher is `Send + Sync`; share it behind an `Arc` to send from
 * several threads.
 */
use std::fmt;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::Sender;

use crate::error::{PublishError, Result};
use crate::logging::{LogSink, Logger};
use crate::protocol::constants::{DEFAULT_DRAIN_TICKS_PER_PENDING, DEFAULT_TICK_INTERVAL};
use crate::protocol::key::KeyGenerator;
use crate::protocol::types::{Metadata, Payload, SendKey};
use crate::transport::table::{run_fallback, Fallback, SendRecord, Shared};
use crate::transport::worker::{lock_transport, Driver, DriverState, StateCell};
use crate::transport::{Completion, CompletionSink, Transport, TransportOptions};

/// Publisher-wide fallback, called with the payload of a failed `publish`.
pub type PayloadFallback = Arc<dyn Fn(&Payload) + Send + Sync>;

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/**
 * Configuration for a `Publisher`.
 *
 * # Example
 * ```ignore
 * use std::sync::Arc;
 *
 * let publisher = Publisher::<HttpTransport>::open("https://collector.local/events", Options {
 *     fallback: Some(Arc::new(|payload| {
 *         eprintln!("lost {} bytes", payload.len());
 *     })),
 *     ..Default::default()
 * })?;
 * ```
 */
pub struct Options {
    /// Interval between driver ticks, and between drive steps while draining.
    pub tick_interval: Duration,

    /// Drive steps performed per pending send when draining on shutdown.
    /// A heuristic: the wait that follows the drain is what guarantees
    /// completion. Must be at least 1, since a transport that only makes
    /// progress in `drive_once` would otherwise never finish the drain.
    pub drain_ticks_per_pending: usize,

    /// Options forwarded to `Transport::configure`.
    pub transport: TransportOptions,

    /// Called with the original payload when a send made through
    /// `publish()` fails.
    pub fallback: Option<PayloadFallback>,

    /// Destination for publisher and transport logs. Defaults to the `log`
    /// facade.
    pub logger: Option<LogSink>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            tick_interval: DEFAULT_TICK_INTERVAL,
            drain_ticks_per_pending: DEFAULT_DRAIN_TICKS_PER_PENDING,
            transport: TransportOptions::default(),
            fallback: None,
            logger: None,
        }
    }
}

impl fmt::Debug for Options {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Options")
            .field("tick_interval", &self.tick_interval)
            .field("drain_ticks_per_pending", &self.drain_ticks_per_pending)
            .field("transport", &self.transport)
            .field("fallback", &self.fallback.is_some())
            .field("logger", &self.logger.is_some())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Publisher
// ---------------------------------------------------------------------------

/**
 * Fire-and-forget publisher over a `Transport`.
 *
 * Every send accepted by `send()` resolves exactly once: silently on
 * success, or by running its fallback exactly once on failure.
 */
pub struct Publisher<T: Transport> {
    /// The transport handle. Its mutex serializes every transport call;
    /// lock order is always transport, then table.
    transport: Arc<Mutex<T>>,

    /// Pending table, condvar and completion handler.
    shared: Arc<Shared<T::Message>>,

    keys: KeyGenerator,
    state: Arc<StateCell>,

    /// Dropping or signalling this stops the driver.
    stop: Option<Sender<()>>,
    driver: Option<JoinHandle<()>>,

    fallback: Option<PayloadFallback>,
    logger: Logger,
}

impl<T: Transport> Publisher<T> {
    /**
     * Opens a transport from `connection` and starts a publisher on it.
     *
     * # Errors
     * `TransportInit` if the transport cannot be opened or configured,
     * `DriverSpawn` if the driver thread cannot be started.
     */
    pub fn open(connection: &str, options: Options) -> Result<Self> {
        let transport = T::open(connection).map_err(PublishError::TransportInit)?;
        Self::with_transport(transport, options)
    }

    /**
     * Starts a publisher on an already opened transport.
     *
     * The transport is configured with `options.transport` first; on any
     * startup failure it is closed before the error is returned.
     */
    pub fn with_transport(mut transport: T, options: Options) -> Result<Self> {
        if options.drain_ticks_per_pending == 0 {
            transport.close();
            return Err(PublishError::InvalidOption {
                name: "drain_ticks_per_pending",
                reason: "must be at least 1".into(),
            });
        }

        let logger = Logger::new(options.logger);
        transport.set_logger(logger.clone());

        if let Err(err) = transport.configure(&options.transport) {
            transport.close();
            return Err(PublishError::TransportInit(err));
        }

        let transport = Arc::new(Mutex::new(transport));
        let shared = Arc::new(Shared::new(logger.clone()));
        let state = Arc::new(StateCell::new(DriverState::Running));
        let (stop, stop_signal) = crossbeam_channel::bounded(1);

        let driver = Driver {
            transport: Arc::clone(&transport),
            shared: Arc::clone(&shared),
            state: Arc::clone(&state),
            stop: stop_signal,
            tick_interval: options.tick_interval,
            drain_ticks_per_pending: options.drain_ticks_per_pending,
            logger: logger.clone(),
        };

        let driver = match driver.spawn() {
            Ok(handle) => handle,
            Err(err) => {
                lock_transport(&transport).close();
                return Err(PublishError::DriverSpawn(err));
            }
        };

        logger.trace("publisher started");

        Ok(Self {
            transport,
            shared,
            keys: KeyGenerator::new(),
            state,
            stop: Some(stop),
            driver: Some(driver),
            fallback: options.fallback,
            logger,
        })
    }

    /**
     * Queues `payload` with `metadata` attached.
     *
     * Returns once the transport has accepted the message. If the send
     * later fails, `on_failure` runs exactly once, either on the driver
     * thread after it has released the transport or on whichever thread
     * the transport reports the failure from. It may send again through
     * this publisher, e.g. to retry.
     *
     * # Errors
     * - `MessageConstruction`: empty payload or the transport could not
     *   build a message. Nothing was queued and `on_failure` is not called.
     * - `Submission`: the transport refused the message. `on_failure` has
     *   already been called, synchronously, on this thread.
     */
    pub fn send<P, F>(&self, metadata: &Metadata, payload: P, on_failure: F) -> Result<SendKey>
    where
        P: Into<Payload>,
        F: FnOnce() + Send + 'static,
    {
        let payload = payload.into();
        self.submit(metadata, &payload, Box::new(on_failure))
    }

    /**
     * Like `send`, using the publisher-wide `Options::fallback`, which
     * receives the original payload if the send fails.
     */
    pub fn publish<P>(&self, metadata: &Metadata, payload: P) -> Result<SendKey>
    where
        P: Into<Payload>,
    {
        let payload = Arc::new(payload.into());

        let fallback: Fallback = match &self.fallback {
            Some(handler) => {
                let handler = Arc::clone(handler);
                let failed = Arc::clone(&payload);
                let logger = self.logger.clone();
                Box::new(move || {
                    logger.error("send failed, calling publisher fallback");
                    handler(&*failed);
                })
            }
            None => Box::new(|| {}),
        };

        self.submit(metadata, &payload, fallback)
    }

    /**
     * The send path shared by `send` and `publish`.
     *
     * The table lock is held across `send_async` and the registration that
     * follows it, so no completion can observe the table before the record
     * is in it.
     */
    fn submit(&self, metadata: &Metadata, payload: &Payload, fallback: Fallback) -> Result<SendKey> {
        if payload.is_empty() {
            return Err(PublishError::MessageConstruction {
                reason: "payload is empty".into(),
            });
        }

        let mut transport = lock_transport(&self.transport);

        let mut message =
            transport
                .create_message(payload)
                .map_err(|err| PublishError::MessageConstruction {
                    reason: err.to_string(),
                })?;

        for (key, value) in metadata {
            transport.attach_property(&mut message, key, value);
        }

        let key = self.keys.next_key();
        let sink: Arc<dyn CompletionSink> = self.shared.clone();

        let mut table = self.shared.lock_table();
        if table.contains(key) {
            return Err(PublishError::KeyCollision(key));
        }

        match transport.send_async(&message, Completion::new(key, sink)) {
            Ok(()) => {
                table.insert(SendRecord::new(key, message, fallback))?;
                let pending = table.len();
                drop(table);

                self.logger
                    .trace(&format!("send {key} queued, {pending} pending"));
                Ok(key)
            }
            Err(source) => {
                drop(table);
                drop(transport);

                /* Never registered, so nothing else will release it. */
                drop(message);

                self.logger
                    .error(&format!("transport rejected send {key}: {source}"));
                run_fallback(&self.logger, key, fallback);
                Err(PublishError::Submission { key, source })
            }
        }
    }

    /// Number of sends queued but not yet completed.
    pub fn pending_count(&self) -> usize {
        self.shared.pending()
    }

    pub fn driver_state(&self) -> DriverState {
        self.state.get()
    }

    /**
     * Blocks until every outstanding send has completed or `timeout`
     * elapses. The driver keeps running either way.
     *
     * Returns `true` if the table drained in time.
     */
    pub fn flush(&self, timeout: Duration) -> bool {
        self.shared.wait_until_empty_timeout(timeout)
    }

    /**
     * Stops the driver, waits for all outstanding sends to complete, and
     * closes the transport. Blocks for as long as the drain takes.
     *
     * Idempotent; also runs on drop. Sends issued afterwards go to a closed
     * transport and fail with `Submission`.
     */
    pub fn shutdown(&mut self) {
        let Some(driver) = self.driver.take() else {
            return;
        };

        if let Some(stop) = self.stop.take() {
            /* Only fails if the driver already exited. */
            let _ = stop.send(());
        }

        self.logger.debug(&format!(
            "shutting down with {} pending sends",
            self.pending_count()
        ));

        if driver.join().is_err() {
            self.logger.error("driver thread terminated abnormally");
        }

        lock_transport(&self.transport).close();
        self.logger.trace("transport closed");
    }
}

impl<T: Transport> Drop for Publisher<T> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl<T: Transport> fmt::Debug for Publisher<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Publisher")
            .field("pending", &self.pending_count())
            .field("driver_state", &self.driver_state())
            .finish()
    }
}
