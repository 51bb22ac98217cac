/**
 * Transport layer: the collaborator seam and the in-flight bookkeeping.
 *
 * Everything related to *how* sends travel and how they are tracked:
 * - `Transport`: the low-level client interface a concrete transport
 *   implements (create/attach/send_async/drive_once/is_send_busy)
 * - `TransportOptions`: tuning handed to `Transport::configure`
 * - `Completion`: the handle a transport fires once a send resolves
 * - `table`: pending-send table and completion handler
 * - `worker`: background driver thread and shutdown drain
 */
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::TransportError;
use crate::logging::Logger;
use crate::protocol::constants::{
    DEFAULT_KEEP_ALIVE_SECS, DEFAULT_MESSAGE_TIMEOUT_MS, DEFAULT_MINIMUM_POLLING_SECS,
    DEFAULT_TIMEOUT_MS,
};
use crate::protocol::types::{Confirmation, Payload, SendKey};

pub mod table;
pub mod worker;

pub use table::{PendingTable, SendRecord};
pub use worker::DriverState;

// ---------------------------------------------------------------------------
// Transport: the low-level client interface
// ---------------------------------------------------------------------------

/**
 * A low-level, single-threaded message transport.
 *
 * The publisher owns exactly one transport and serializes every call to it
 * behind a mutex, so implementations take `&mut self` and need no internal
 * locking. The model is "queue then drive": `send_async` only queues a
 * message, and network work happens in `drive_once`, which the background
 * driver calls while `is_send_busy` reports pending work.
 *
 * # Completion contract
 * - Every `send_async` that returns `Ok` must eventually be followed by
 *   exactly one `Completion::complete` call (extra calls are ignored by the
 *   publisher, but they are still a bug).
 * - A `send_async` that returns `Err` must never complete.
 * - `complete` may be called from any thread, including from inside
 *   `drive_once`, but never from inside `send_async` itself. Another
 *   thread may complete while `send_async` is still running; that
 *   completion waits until the send is registered.
 */
pub trait Transport: Send + 'static {
    /// Transport-specific message handle. Dropping it releases the message.
    type Message: Send + 'static;

    /// Opens a transport from a connection string.
    fn open(connection: &str) -> Result<Self, TransportError>
    where
        Self: Sized;

    /**
     * Hands over the publisher's logger so transport diagnostics reach the
     * same sink. Called once, before `configure`.
     */
    fn set_logger(&mut self, _logger: Logger) {}

    /// Applies tuning options. Called once, before any message is sent.
    fn configure(&mut self, options: &TransportOptions) -> Result<(), TransportError>;

    /// Builds a message from a payload.
    fn create_message(&mut self, payload: &Payload) -> Result<Self::Message, TransportError>;

    /// Attaches one metadata property to a message. Best effort.
    fn attach_property(&mut self, message: &mut Self::Message, key: &str, value: &str);

    /**
     * Queues a message for delivery.
     *
     * The transport copies whatever it needs out of `message`; the
     * publisher keeps ownership and releases it after `completion` fires.
     */
    fn send_async(
        &mut self,
        message: &Self::Message,
        completion: Completion,
    ) -> Result<(), TransportError>;

    /// Performs one bounded unit of pending network work.
    fn drive_once(&mut self);

    /// Whether queued sends are waiting for `drive_once`. Advisory.
    fn is_send_busy(&mut self) -> Result<bool, TransportError>;

    /// Releases the transport. Called once, after the driver has stopped.
    fn close(&mut self);
}

// ---------------------------------------------------------------------------
// TransportOptions
// ---------------------------------------------------------------------------

/**
 * Tuning options forwarded to `Transport::configure`.
 *
 * Transports apply the options that make sense for them and ignore the
 * rest. Can be loaded from JSON; missing fields take their defaults:
 *
 * ```json
 * { "timeout_ms": 10000, "batching": false }
 * ```
 */
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportOptions {
    /// Network timeout for a single request, in milliseconds.
    pub timeout_ms: u64,

    /// How long a queued message may wait before failing, in milliseconds.
    /// 0 disables expiry.
    pub message_timeout_ms: u64,

    /// Whether several queued messages may travel in one request.
    pub batching: bool,

    /// Minimum interval between polls of the remote end, in seconds.
    pub minimum_polling_secs: u64,

    /// Keep-alive interval for connection-oriented transports, in seconds.
    pub keep_alive_secs: u64,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_TIMEOUT_MS,
            message_timeout_ms: DEFAULT_MESSAGE_TIMEOUT_MS,
            batching: true,
            minimum_polling_secs: DEFAULT_MINIMUM_POLLING_SECS,
            keep_alive_secs: DEFAULT_KEEP_ALIVE_SECS,
        }
    }
}

impl TransportOptions {
    /// Parses options from a JSON document.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn message_timeout(&self) -> Duration {
        Duration::from_millis(self.message_timeout_ms)
    }
}

// ---------------------------------------------------------------------------
// Completion: the handle a transport fires when a send resolves
// ---------------------------------------------------------------------------

/**
 * Receiver of completion events. Implemented by the publisher's shared
 * state; transports only ever see it through `Completion`.
 */
pub trait CompletionSink: Send + Sync {
    fn complete(&self, key: SendKey, confirmation: Confirmation);
}

/**
 * Correlation handle passed to `Transport::send_async`.
 *
 * Carries only the send key; the record itself stays in the publisher's
 * pending table. Cloneable so transports can keep it in their own queues,
 * and safe to fire from any thread.
 */
#[derive(Clone)]
pub struct Completion {
    key: SendKey,
    sink: Arc<dyn CompletionSink>,
}

impl Completion {
    pub fn new(key: SendKey, sink: Arc<dyn CompletionSink>) -> Self {
        Self { key, sink }
    }

    pub fn key(&self) -> SendKey {
        self.key
    }

    /// Reports the final outcome of the send.
    pub fn complete(&self, confirmation: Confirmation) {
        self.sink.complete(self.key, confirmation);
    }
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion").field("key", &self.key).finish()
    }
}
