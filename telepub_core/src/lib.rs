/*!
 * telepub core: the publisher engine.
 *
 * This crate provides the pending-send table, the send orchestrator, the
 * completion handler, and the background driver thread, all generic over a
 * `Transport`. End users should depend on the `telepub` facade crate,
 * which re-exports everything and ships the HTTP transport.
 *
 * # Module structure
 *
 * - `protocol/`: what a send is (payload, metadata, keys, outcomes)
 * - `transport/`: how sends travel (transport trait, pending table,
 *   background driver)
 * - `publisher`: open, send, flush, shutdown
 * - `logging`: log sink capability
 * - `error`: error types
 */

pub mod error;
pub mod logging;
pub mod protocol;
pub mod publisher;
pub mod transport;

#[cfg(test)]
mod testing;

// ---------------------------------------------------------------------------
// Re-exports
// ---------------------------------------------------------------------------

pub use error::{PublishError, Result, TransportError};
pub use logging::{stderr_sink, LogLevel, LogSink, Logger};
pub use protocol::constants::PUBLISHER_VERSION;
pub use protocol::types::{Confirmation, Metadata, Payload, SendKey};
pub use publisher::{Options, PayloadFallback, Publisher};
pub use transport::{Completion, CompletionSink, DriverState, Transport, TransportOptions};
