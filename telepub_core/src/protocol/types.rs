/**
 * Core value types shared by the publisher and every transport.
 *
 * - `Payload`: what the caller hands to `send()` (bytes or text).
 * - `Metadata`: key/value properties attached to each message.
 * - `SendKey`: identifier of one in-flight send.
 * - `Confirmation`: the outcome a transport reports for a send.
 */
use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Metadata
// ---------------------------------------------------------------------------

/**
 * Key/value properties attached to a message.
 *
 * Ordered so that transports emit properties deterministically.
 * An empty map is always valid.
 */
pub type Metadata = BTreeMap<String, String>;

// ---------------------------------------------------------------------------
// Payload
// ---------------------------------------------------------------------------

/**
 * The body of a telemetry message.
 *
 * Transports may build different message kinds from the two variants
 * (e.g. a text content type for `Text`), but both carry opaque data as far
 * as the publisher is concerned.
 */
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Payload {
    /// Arbitrary binary data.
    Bytes(Vec<u8>),

    /// UTF-8 text, typically a JSON document.
    Text(String),
}

impl Payload {
    /// Raw bytes of the payload regardless of variant.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Payload::Bytes(bytes) => bytes,
            Payload::Text(text) => text.as_bytes(),
        }
    }

    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.as_bytes().is_empty()
    }

    pub fn is_text(&self) -> bool {
        matches!(self, Payload::Text(_))
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Payload::Bytes(bytes)
    }
}

impl From<&[u8]> for Payload {
    fn from(bytes: &[u8]) -> Self {
        Payload::Bytes(bytes.to_vec())
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Payload::Text(text)
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Payload::Text(text.to_string())
    }
}

// ---------------------------------------------------------------------------
// SendKey
// ---------------------------------------------------------------------------

/**
 * Identifier of one outstanding send.
 *
 * The value is a microsecond count since the Unix epoch taken when the send
 * was submitted (see `protocol::key`). It is the only correlation token a
 * transport ever sees for a send.
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SendKey(i64);

impl SendKey {
    pub const fn new(micros: i64) -> Self {
        Self(micros)
    }

    pub const fn as_micros(self) -> i64 {
        self.0
    }
}

impl fmt::Display for SendKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Confirmation
// ---------------------------------------------------------------------------

/**
 * Final outcome of a send as reported by the transport.
 *
 * Everything other than `Ok` counts as a failure and triggers the send's
 * fallback.
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirmation {
    /// The message was accepted by the remote end.
    Ok,

    /// The transport gave up on the message (network or protocol error).
    Error,

    /// The message sat in the transport queue longer than its timeout.
    MessageTimeout,

    /// The transport was closed while the message was still queued.
    Destroyed,
}

impl Confirmation {
    pub fn is_ok(self) -> bool {
        self == Confirmation::Ok
    }
}

impl fmt::Display for Confirmation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Confirmation::Ok => "ok",
            Confirmation::Error => "error",
            Confirmation::MessageTimeout => "message timeout",
            Confirmation::Destroyed => "destroyed",
        };
        f.write_str(name)
    }
}
