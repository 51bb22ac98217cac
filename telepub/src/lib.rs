/**
 * telepub: fire-and-forget telemetry publishing.
 *
 * This is the main crate users should depend on. It re-exports the core
 * publisher API and wires it to the HTTP transport through a single
 * `connect` call.
 *
 * # Quick start
 *
 * ```ignore
 * fn main() -> telepub::Result<()> {
 *     let publisher = telepub::connect("https://collector.example.com/events")?;
 *
 *     let mut metadata = telepub::Metadata::new();
 *     metadata.insert("sex".into(), "male".into());
 *
 *     publisher.send(&metadata, r#"{"name":"test","age":20}"#, || {
 *         eprintln!("telemetry was not delivered");
 *     })?;
 *
 *     // publisher is dropped here → pending sends are drained first
 *     Ok(())
 * }
 * ```
 *
 * # With options
 *
 * ```ignore
 * use std::sync::Arc;
 *
 * let publisher = telepub::connect(telepub::Config {
 *     connection: "https://collector.example.com/events".into(),
 *     options: telepub::Options {
 *         fallback: Some(Arc::new(|payload| eprintln!("dropped {} bytes", payload.len()))),
 *         ..Default::default()
 *     },
 * })?;
 * ```
 */

// ---------------------------------------------------------------------------
// Re-exports: the public surface area
// ---------------------------------------------------------------------------

pub use telepub_core::{
    stderr_sink, Completion, CompletionSink, Confirmation, DriverState, LogLevel, LogSink,
    Logger, Metadata, Options, Payload, PayloadFallback, PublishError, Publisher, Result,
    SendKey, Transport, TransportError, TransportOptions, PUBLISHER_VERSION,
};
pub use telepub_http::{HttpMessage, HttpTransport};

/// Publisher that delivers over HTTP.
pub type HttpPublisher = Publisher<HttpTransport>;

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/**
 * Where to publish and how.
 *
 * Implements `From<&str>` and `From<String>` so `connect` accepts a bare
 * endpoint URL with default `Options`.
 */
#[derive(Debug, Default)]
pub struct Config {
    /// Endpoint URL, e.g. `https://collector.example.com/events`.
    pub connection: String,
    pub options: Options,
}

impl From<&str> for Config {
    fn from(connection: &str) -> Self {
        Self {
            connection: connection.to_string(),
            ..Default::default()
        }
    }
}

impl From<String> for Config {
    fn from(connection: String) -> Self {
        Self {
            connection,
            ..Default::default()
        }
    }
}

// ---------------------------------------------------------------------------
// connect
// ---------------------------------------------------------------------------

/**
 * Opens an HTTP publisher and starts its background driver.
 *
 * ```ignore
 * // Simple: just an endpoint
 * let publisher = telepub::connect("https://collector.example.com/events")?;
 *
 * // Full control
 * let publisher = telepub::connect(telepub::Config {
 *     connection: endpoint,
 *     options: telepub::Options { drain_ticks_per_pending: 4, ..Default::default() },
 * })?;
 * ```
 *
 * # Errors
 * `PublishError::TransportInit` if the endpoint is malformed or the
 * transport rejects the options, `PublishError::DriverSpawn` if the
 * driver thread cannot start.
 */
pub fn connect(config: impl Into<Config>) -> Result<HttpPublisher> {
    let config = config.into();
    HttpPublisher::open(&config.connection, config.options)
}
