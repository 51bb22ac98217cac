/*!
 * HTTP transport for the telepub publisher.
 *
 * Posts queued messages with a blocking `ureq` agent from the driver thread.
 * The transport follows the "queue then drive" model the publisher
 * expects:
 *
 * ```text
 *  send_async ──► queue (VecDeque) ──drive_once──► POST endpoint ──► Completion
 *                      │
 *                      └── older than message_timeout ──► MessageTimeout
 * ```
 *
 * - **Blocking HTTP**: `drive_once` runs on the publisher's driver
 *   thread, so blocking I/O is fine there.
 * - **Single attempt**: a failed POST completes the send with `Error`;
 *   retrying is the fallback's business.
 * - **Batching**: when enabled, one `drive_once` posts every queued
 *   message (up to `MAX_BATCH_BYTES` of bodies) as a JSON array; otherwise
 *   it posts the oldest message with its metadata as `x-app-*` headers.
 */
use std::collections::VecDeque;
use std::time::{Duration, Instant};

use base64::Engine as _;
use serde::Serialize;
use telepub_core::{
    Completion, Confirmation, Logger, Metadata, Payload, Transport, TransportError,
    TransportOptions, PUBLISHER_VERSION,
};
use ureq::Agent;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Prefix of the header carrying each metadata entry of a single message.
pub const PROPERTY_HEADER_PREFIX: &str = "x-app-";

/// Upper bound on the summed body size of one batch request.
pub const MAX_BATCH_BYTES: usize = 256 * 1024;

const CONTENT_TYPE_TEXT: &str = "text/plain; charset=utf-8";
const CONTENT_TYPE_BYTES: &str = "application/octet-stream";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

// ---------------------------------------------------------------------------
// HttpMessage
// ---------------------------------------------------------------------------

/// A message as the HTTP transport sends it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpMessage {
    body: Vec<u8>,
    content_type: &'static str,
    properties: Metadata,
}

impl HttpMessage {
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn content_type(&self) -> &'static str {
        self.content_type
    }

    pub fn properties(&self) -> &Metadata {
        &self.properties
    }
}

/// One element of a batch request body.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BatchEntry<'a> {
    body: String,
    base64_encoded: bool,
    properties: &'a Metadata,
}

fn encode_batch<'a>(messages: impl IntoIterator<Item = &'a HttpMessage>) -> Vec<BatchEntry<'a>> {
    messages
        .into_iter()
        .map(|message| BatchEntry {
            body: base64::engine::general_purpose::STANDARD.encode(&message.body),
            base64_encoded: true,
            properties: &message.properties,
        })
        .collect()
}

// ---------------------------------------------------------------------------
// HttpTransport
// ---------------------------------------------------------------------------

/// A queued send waiting for `drive_once`.
struct Queued {
    message: HttpMessage,
    completion: Completion,
    enqueued_at: Instant,
}

/**
 * `Transport` that POSTs messages to a single HTTP endpoint.
 *
 * The connection string is the endpoint URL, e.g.
 * `https://collector.example.com/events`.
 */
pub struct HttpTransport {
    endpoint: String,
    agent: Agent,
    batching: bool,

    /// `None` means queued messages never expire.
    message_timeout: Option<Duration>,

    queue: VecDeque<Queued>,
    closed: bool,

    /// The publisher's logger once handed over, the `log` facade before.
    logger: Logger,
}

impl HttpTransport {
    /// Number of messages waiting for `drive_once`.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /**
     * Completes every message that has waited longer than the message
     * timeout. The queue is in submission order, so stale entries are all
     * at the front.
     */
    fn expire_stale(&mut self) {
        let Some(timeout) = self.message_timeout else {
            return;
        };
        let now = Instant::now();

        while let Some(front) = self.queue.front() {
            if now.duration_since(front.enqueued_at) < timeout {
                break;
            }
            if let Some(stale) = self.queue.pop_front() {
                self.logger.debug(&format!(
                    "message {} timed out after {timeout:?} in queue",
                    stale.completion.key()
                ));
                stale.completion.complete(Confirmation::MessageTimeout);
            }
        }
    }

    /// Takes the oldest messages whose bodies fit in one batch (at least one).
    fn take_batch(&mut self) -> Vec<Queued> {
        let mut batch = Vec::new();
        let mut size = 0;

        while let Some(front) = self.queue.front() {
            let next = size + front.message.body.len();
            if !batch.is_empty() && next > MAX_BATCH_BYTES {
                break;
            }
            size = next;
            if let Some(queued) = self.queue.pop_front() {
                batch.push(queued);
            }
        }

        batch
    }

    /// Maps a POST result to a send outcome: only 2xx counts as delivered.
    fn confirm(&self, result: Result<ureq::http::Response<ureq::Body>, ureq::Error>) -> Confirmation {
        match result {
            Ok(response) if response.status().is_success() => Confirmation::Ok,
            Ok(response) => {
                let status = response.status().as_u16();
                let body = response
                    .into_body()
                    .read_to_string()
                    .unwrap_or_else(|_| "<unreadable body>".into());
                self.logger
                    .error(&format!("endpoint responded with HTTP {status}: {body}"));
                Confirmation::Error
            }
            Err(err) => {
                self.logger.error(&format!("failed to post message: {err}"));
                Confirmation::Error
            }
        }
    }

    fn post_single(&self, queued: Queued) {
        let message = &queued.message;
        let mut request = self
            .agent
            .post(&self.endpoint)
            .header("content-type", message.content_type)
            .header("user-agent", PUBLISHER_VERSION);

        for (key, value) in &message.properties {
            request = request.header(format!("{PROPERTY_HEADER_PREFIX}{key}"), value.as_str());
        }

        let confirmation = self.confirm(request.send(message.body.as_slice()));
        queued.completion.complete(confirmation);
    }

    fn post_batch(&self, batch: Vec<Queued>) {
        let entries = encode_batch(batch.iter().map(|queued| &queued.message));
        let result = self
            .agent
            .post(&self.endpoint)
            .header("user-agent", PUBLISHER_VERSION)
            .send_json(&entries);

        let confirmation = self.confirm(result);
        self.logger
            .trace(&format!("batch of {} messages: {confirmation}", batch.len()));
        for queued in &batch {
            queued.completion.complete(confirmation);
        }
    }
}

impl Transport for HttpTransport {
    type Message = HttpMessage;

    /**
     * Validates the endpoint and builds an agent with default timeouts.
     * No connection is made until the first `drive_once`.
     */
    fn open(connection: &str) -> Result<Self, TransportError> {
        let endpoint = connection.trim();
        let host = endpoint
            .strip_prefix("https://")
            .or_else(|| endpoint.strip_prefix("http://"))
            .ok_or_else(|| {
                TransportError::InvalidConnection(format!(
                    "expected an http(s) endpoint, got {endpoint:?}"
                ))
            })?;
        if host.is_empty() || host.starts_with('/') {
            return Err(TransportError::InvalidConnection(format!(
                "endpoint {endpoint:?} has no host"
            )));
        }

        let defaults = TransportOptions::default();
        Ok(Self {
            endpoint: endpoint.to_string(),
            agent: build_agent(defaults.timeout()),
            batching: defaults.batching,
            message_timeout: non_zero(defaults.message_timeout()),
            queue: VecDeque::new(),
            closed: false,
            logger: Logger::default(),
        })
    }

    fn set_logger(&mut self, logger: Logger) {
        self.logger = logger;
    }

    /**
     * Applies `timeout_ms` (per request), `message_timeout_ms` (0 disables
     * expiry) and `batching`. Polling and keep-alive options do not apply
     * to plain HTTP posts and are ignored.
     */
    fn configure(&mut self, options: &TransportOptions) -> Result<(), TransportError> {
        if options.timeout_ms == 0 {
            return Err(TransportError::InvalidOption {
                name: "timeout_ms",
                reason: "must be greater than zero".into(),
            });
        }

        self.agent = build_agent(options.timeout());
        self.batching = options.batching;
        self.message_timeout = non_zero(options.message_timeout());

        self.logger.info(&format!(
            "posting to {} with {} batching, request timeout {:?}",
            self.endpoint,
            if self.batching { "json" } else { "no" },
            options.timeout()
        ));
        Ok(())
    }

    fn create_message(&mut self, payload: &Payload) -> Result<HttpMessage, TransportError> {
        if payload.is_empty() {
            return Err(TransportError::InvalidMessage("payload is empty".into()));
        }

        let content_type = if payload.is_text() {
            CONTENT_TYPE_TEXT
        } else {
            CONTENT_TYPE_BYTES
        };

        Ok(HttpMessage {
            body: payload.as_bytes().to_vec(),
            content_type,
            properties: Metadata::new(),
        })
    }

    fn attach_property(&mut self, message: &mut HttpMessage, key: &str, value: &str) {
        message
            .properties
            .insert(key.to_string(), value.to_string());
    }

    fn send_async(
        &mut self,
        message: &HttpMessage,
        completion: Completion,
    ) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }

        self.queue.push_back(Queued {
            message: message.clone(),
            completion,
            enqueued_at: Instant::now(),
        });
        Ok(())
    }

    fn drive_once(&mut self) {
        self.expire_stale();
        if self.queue.is_empty() {
            return;
        }

        if self.batching {
            let batch = self.take_batch();
            self.post_batch(batch);
        } else if let Some(queued) = self.queue.pop_front() {
            self.post_single(queued);
        }
    }

    fn is_send_busy(&mut self) -> Result<bool, TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        Ok(!self.queue.is_empty())
    }

    /// Completes anything still queued with `Destroyed`.
    fn close(&mut self) {
        self.closed = true;
        for queued in self.queue.drain(..) {
            queued.completion.complete(Confirmation::Destroyed);
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn build_agent(timeout: Duration) -> Agent {
    Agent::config_builder()
        .timeout_connect(Some(CONNECT_TIMEOUT.min(timeout)))
        .timeout_global(Some(timeout))
        .http_status_as_error(false)
        .build()
        .into()
}

fn non_zero(duration: Duration) -> Option<Duration> {
    (!duration.is_zero()).then_some(duration)
}


#[cfg(test)]
mod tests {
    use super::*;

    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::sync::{Arc, Mutex};
    use std::thread::{self, JoinHandle};

    use telepub_core::{CompletionSink, LogLevel, SendKey};

    /// Records every completion it receives.
    #[derive(Default)]
    struct Recorder {
        outcomes: Mutex<Vec<(SendKey, Confirmation)>>,
    }

    impl CompletionSink for Recorder {
        fn complete(&self, key: SendKey, confirmation: Confirmation) {
            self.outcomes.lock().unwrap().push((key, confirmation));
        }
    }

    impl Recorder {
        fn outcomes(&self) -> Vec<(SendKey, Confirmation)> {
            self.outcomes.lock().unwrap().clone()
        }
    }

    fn completion(recorder: &Arc<Recorder>, key: i64) -> Completion {
        let sink: Arc<dyn CompletionSink> = recorder.clone();
        Completion::new(SendKey::new(key), sink)
    }

    fn message(transport: &mut HttpTransport, payload: &str) -> HttpMessage {
        let mut message = transport.create_message(&payload.into()).unwrap();
        transport.attach_property(&mut message, "sex", "male");
        transport.attach_property(&mut message, "true_age", "40");
        message
    }

    fn configured(endpoint: &str, options: TransportOptions) -> HttpTransport {
        let mut transport = HttpTransport::open(endpoint).unwrap();
        transport.configure(&options).unwrap();
        transport
    }

    /// An endpoint on which nothing listens.
    fn closed_endpoint() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        format!("http://127.0.0.1:{port}/events")
    }

    /**
     * Accepts one request, answers `204 No Content`, and hands back the raw
     * request (head and body).
     */
    fn serve_once() -> (String, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let endpoint = format!("http://{}/events", listener.local_addr().unwrap());

        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut raw = Vec::new();
            let mut chunk = [0u8; 4096];

            loop {
                let read = stream.read(&mut chunk).unwrap();
                if read == 0 {
                    break;
                }
                raw.extend_from_slice(&chunk[..read]);

                let text = String::from_utf8_lossy(&raw).to_string();
                if let Some(head_end) = text.find("\r\n\r\n") {
                    let length = text[..head_end]
                        .lines()
                        .find_map(|line| {
                            let (name, value) = line.split_once(':')?;
                            name.eq_ignore_ascii_case("content-length")
                                .then(|| value.trim().parse::<usize>().ok())?
                        })
                        .unwrap_or(0);
                    if raw.len() >= head_end + 4 + length {
                        break;
                    }
                }
            }

            stream
                .write_all(b"HTTP/1.1 204 No Content\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
                .unwrap();
            String::from_utf8_lossy(&raw).to_string()
        });

        (endpoint, handle)
    }

    #[test]
    fn test_open_validates_endpoint() {
        assert!(HttpTransport::open("https://collector.example.com/events").is_ok());
        assert!(HttpTransport::open("http://127.0.0.1:8080").is_ok());
        assert!(matches!(
            HttpTransport::open("HostName=hub;DeviceId=d"),
            Err(TransportError::InvalidConnection(_))
        ));
        assert!(HttpTransport::open("https://").is_err());
        assert!(HttpTransport::open("").is_err());
    }

    #[test]
    fn test_configure_rejects_zero_timeout() {
        let mut transport = HttpTransport::open("http://127.0.0.1:1").unwrap();
        let options = TransportOptions {
            timeout_ms: 0,
            ..Default::default()
        };
        assert!(matches!(
            transport.configure(&options),
            Err(TransportError::InvalidOption { name: "timeout_ms", .. })
        ));
    }

    #[test]
    fn test_message_carries_payload_and_properties() {
        let mut transport = HttpTransport::open("http://127.0.0.1:1").unwrap();

        let text = message(&mut transport, r#"{"name":"test","age":20}"#);
        assert_eq!(text.content_type(), CONTENT_TYPE_TEXT);
        assert_eq!(text.properties()["true_age"], "40");

        let bytes = transport.create_message(&vec![0u8, 1].into()).unwrap();
        assert_eq!(bytes.content_type(), CONTENT_TYPE_BYTES);
        assert_eq!(bytes.body(), &[0, 1]);

        assert!(matches!(
            transport.create_message(&"".into()),
            Err(TransportError::InvalidMessage(_))
        ));
    }

    #[test]
    fn test_batch_encoding() {
        let mut transport = HttpTransport::open("http://127.0.0.1:1").unwrap();
        let first = message(&mut transport, "hello");
        let second = transport.create_message(&vec![0xffu8].into()).unwrap();

        let encoded = serde_json::to_value(encode_batch([&first, &second])).unwrap();

        assert_eq!(
            encoded,
            serde_json::json!([
                {
                    "body": "aGVsbG8=",
                    "base64Encoded": true,
                    "properties": {"sex": "male", "true_age": "40"}
                },
                {"body": "/w==", "base64Encoded": true, "properties": {}}
            ])
        );
    }

    #[test]
    fn test_batch_respects_size_limit() {
        let mut transport = HttpTransport::open("http://127.0.0.1:1").unwrap();
        let recorder = Arc::new(Recorder::default());
        let large = transport
            .create_message(&vec![7u8; MAX_BATCH_BYTES - 10].into())
            .unwrap();
        let small = transport.create_message(&vec![7u8; 20].into()).unwrap();

        transport.send_async(&large, completion(&recorder, 1)).unwrap();
        transport.send_async(&small, completion(&recorder, 2)).unwrap();

        assert_eq!(transport.take_batch().len(), 1);
        assert_eq!(transport.queued(), 1);
    }

    #[test]
    fn test_stale_messages_time_out_without_network() {
        let options = TransportOptions {
            message_timeout_ms: 1,
            ..Default::default()
        };
        let mut transport = configured(&closed_endpoint(), options);
        let recorder = Arc::new(Recorder::default());

        let msg = message(&mut transport, "late");
        transport.send_async(&msg, completion(&recorder, 1)).unwrap();
        assert!(transport.is_send_busy().unwrap());

        thread::sleep(Duration::from_millis(10));
        transport.drive_once();

        assert_eq!(recorder.outcomes(), vec![(SendKey::new(1), Confirmation::MessageTimeout)]);
        assert!(!transport.is_send_busy().unwrap());
    }

    #[test]
    fn test_refused_connection_completes_with_error() {
        let options = TransportOptions {
            batching: false,
            timeout_ms: 2_000,
            ..Default::default()
        };
        let mut transport = configured(&closed_endpoint(), options);
        let recorder = Arc::new(Recorder::default());

        let msg = message(&mut transport, "nobody home");
        transport.send_async(&msg, completion(&recorder, 1)).unwrap();
        transport.drive_once();

        assert_eq!(recorder.outcomes(), vec![(SendKey::new(1), Confirmation::Error)]);
    }

    #[test]
    fn test_single_post_sends_properties_as_headers() {
        let (endpoint, server) = serve_once();
        let options = TransportOptions {
            batching: false,
            ..Default::default()
        };
        let mut transport = configured(&endpoint, options);
        let recorder = Arc::new(Recorder::default());

        let msg = message(&mut transport, r#"{"name":"test","age":20}"#);
        transport.send_async(&msg, completion(&recorder, 1)).unwrap();
        transport.drive_once();

        let request = server.join().unwrap().to_ascii_lowercase();
        assert!(request.starts_with("post /events"));
        assert!(request.contains("x-app-sex: male"));
        assert!(request.contains("x-app-true_age: 40"));
        assert!(request.ends_with(r#"{"name":"test","age":20}"#));
        assert_eq!(recorder.outcomes(), vec![(SendKey::new(1), Confirmation::Ok)]);
    }

    #[test]
    fn test_batch_post_completes_every_message() {
        let (endpoint, server) = serve_once();
        let mut transport = configured(&endpoint, TransportOptions::default());
        let recorder = Arc::new(Recorder::default());

        for key in 1..=3 {
            let msg = message(&mut transport, "tick");
            transport.send_async(&msg, completion(&recorder, key)).unwrap();
        }
        transport.drive_once();

        let request = server.join().unwrap();
        let body = &request[request.find("\r\n\r\n").unwrap() + 4..];
        let entries: serde_json::Value = serde_json::from_str(body).unwrap();
        assert_eq!(entries.as_array().unwrap().len(), 3);

        let outcomes = recorder.outcomes();
        assert_eq!(outcomes.len(), 3);
        assert!(outcomes.iter().all(|(_, outcome)| *outcome == Confirmation::Ok));
        assert_eq!(transport.queued(), 0);
    }

    /**
     * Post failures reach the logger handed over by the publisher, not just
     * the `log` facade.
     */
    #[test]
    fn test_post_failure_reaches_custom_sink() {
        let lines = Arc::new(Mutex::new(Vec::new()));
        let captured = Arc::clone(&lines);

        let mut transport = HttpTransport::open(&closed_endpoint()).unwrap();
        transport.set_logger(Logger::new(Some(Arc::new(
            move |level: LogLevel, message: &str| {
                captured.lock().unwrap().push((level, message.to_string()));
            },
        ))));
        transport
            .configure(&TransportOptions {
                batching: false,
                timeout_ms: 2_000,
                ..Default::default()
            })
            .unwrap();
        let recorder = Arc::new(Recorder::default());

        let msg = message(&mut transport, "nobody home");
        transport.send_async(&msg, completion(&recorder, 1)).unwrap();
        transport.drive_once();

        let lines = lines.lock().unwrap();
        assert!(lines
            .iter()
            .any(|(level, line)| *level == LogLevel::Info && line.starts_with("posting to")));
        assert!(lines
            .iter()
            .any(|(level, line)| *level == LogLevel::Error && line.starts_with("failed to post")));
        assert_eq!(recorder.outcomes(), vec![(SendKey::new(1), Confirmation::Error)]);
    }

    #[test]
    fn test_close_destroys_queued_messages() {
        let mut transport = HttpTransport::open("http://127.0.0.1:1").unwrap();
        let recorder = Arc::new(Recorder::default());

        let msg = message(&mut transport, "never sent");
        transport.send_async(&msg, completion(&recorder, 4)).unwrap();
        transport.close();

        assert_eq!(recorder.outcomes(), vec![(SendKey::new(4), Confirmation::Destroyed)]);
        assert!(matches!(transport.is_send_busy(), Err(TransportError::Closed)));
        assert!(matches!(
            transport.send_async(&msg, completion(&recorder, 5)),
            Err(TransportError::Closed)
        ));
    }
}
