/**
 * Publisher-wide constants and defaults.
 */
use std::time::Duration;

/// Library identifier, usable by transports as a user agent.
pub const PUBLISHER_VERSION: &str = concat!("telepub/", env!("CARGO_PKG_VERSION"));

/// How often the background driver checks the transport for pending work.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Drive steps performed per pending send when draining on shutdown.
pub const DEFAULT_DRAIN_TICKS_PER_PENDING: usize = 2;

/// Per-request network timeout applied by transports.
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// How long a message may wait in a transport queue before it fails.
pub const DEFAULT_MESSAGE_TIMEOUT_MS: u64 = 30_000;

/// Minimum polling interval for transports that poll the remote end.
pub const DEFAULT_MINIMUM_POLLING_SECS: u64 = 9;

/// Keep-alive interval for connection-oriented transports.
pub const DEFAULT_KEEP_ALIVE_SECS: u64 = 240;
