/*!
 * In-memory transport used by the unit tests.
 *
 * `FakeTransport` queues completions instead of talking to a network; the
 * test keeps a `FakeHandle` to inspect what was sent and to decide when and
 * how each send completes.
 */
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use crate::error::TransportError;
use crate::logging::Logger;
use crate::protocol::types::{Confirmation, Metadata, Payload};
use crate::transport::{Completion, Transport, TransportOptions};

/// Message that counts its own release.
pub(crate) struct FakeMessage {
    body: Vec<u8>,
    properties: Metadata,
    released: Arc<AtomicUsize>,
}

impl Drop for FakeMessage {
    fn drop(&mut self) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub(crate) struct FakeState {
    /// Completions of accepted sends, oldest first.
    pub(crate) queued: VecDeque<Completion>,
    /// Body and properties of every accepted send.
    pub(crate) sent: Vec<(Vec<u8>, Metadata)>,
    pub(crate) configured: Option<TransportOptions>,
    pub(crate) reject_sends: bool,
    pub(crate) reject_configure: bool,
    pub(crate) status_error: bool,
    /// When set, every `drive_once` completes the oldest queued send.
    pub(crate) auto_complete: Option<Confirmation>,
    /// When set, `send_async` spawns a thread that completes the send at
    /// once, racing the publisher's registration.
    pub(crate) complete_from_thread: Option<Confirmation>,
    pub(crate) logger: Option<Logger>,
    pub(crate) drives: usize,
    pub(crate) closed: bool,
}

#[derive(Clone, Default)]
pub(crate) struct FakeHandle {
    state: Arc<Mutex<FakeState>>,
    released: Arc<AtomicUsize>,
}

impl FakeHandle {
    pub(crate) fn transport(&self) -> FakeTransport {
        FakeTransport {
            handle: self.clone(),
        }
    }

    pub(crate) fn with<R>(&self, f: impl FnOnce(&mut FakeState) -> R) -> R {
        f(&mut self.state.lock().unwrap())
    }

    /// Number of messages dropped so far.
    pub(crate) fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    /// Completes the oldest queued send. Returns `false` if none is queued.
    pub(crate) fn complete_next(&self, confirmation: Confirmation) -> bool {
        match self.with(|state| state.queued.pop_front()) {
            Some(completion) => {
                completion.complete(confirmation);
                true
            }
            None => false,
        }
    }

    pub(crate) fn take_completions(&self) -> Vec<Completion> {
        self.with(|state| state.queued.drain(..).collect())
    }
}

pub(crate) struct FakeTransport {
    handle: FakeHandle,
}

impl Transport for FakeTransport {
    type Message = FakeMessage;

    fn open(connection: &str) -> Result<Self, TransportError> {
        if connection.is_empty() {
            return Err(TransportError::InvalidConnection("empty".into()));
        }
        Ok(FakeHandle::default().transport())
    }

    fn set_logger(&mut self, logger: Logger) {
        self.handle.with(|state| state.logger = Some(logger));
    }

    fn configure(&mut self, options: &TransportOptions) -> Result<(), TransportError> {
        self.handle.with(|state| {
            if state.reject_configure {
                return Err(TransportError::InvalidOption {
                    name: "timeout_ms",
                    reason: "rejected by test".into(),
                });
            }
            state.configured = Some(options.clone());
            Ok(())
        })
    }

    fn create_message(&mut self, payload: &Payload) -> Result<FakeMessage, TransportError> {
        Ok(FakeMessage {
            body: payload.as_bytes().to_vec(),
            properties: Metadata::new(),
            released: Arc::clone(&self.handle.released),
        })
    }

    fn attach_property(&mut self, message: &mut FakeMessage, key: &str, value: &str) {
        message.properties.insert(key.to_string(), value.to_string());
    }

    fn send_async(
        &mut self,
        message: &FakeMessage,
        completion: Completion,
    ) -> Result<(), TransportError> {
        self.handle.with(|state| {
            if state.reject_sends || state.closed {
                return Err(TransportError::Rejected("rejected by test".into()));
            }
            state
                .sent
                .push((message.body.clone(), message.properties.clone()));
            match state.complete_from_thread {
                Some(confirmation) => {
                    thread::spawn(move || completion.complete(confirmation));
                }
                None => state.queued.push_back(completion),
            }
            Ok(())
        })
    }

    fn drive_once(&mut self) {
        let next = self.handle.with(|state| {
            state.drives += 1;
            let confirmation = state.auto_complete?;
            state
                .queued
                .pop_front()
                .map(|completion| (completion, confirmation))
        });
        if let Some((completion, confirmation)) = next {
            completion.complete(confirmation);
        }
    }

    fn is_send_busy(&mut self) -> Result<bool, TransportError> {
        self.handle.with(|state| {
            if state.status_error {
                return Err(TransportError::Closed);
            }
            Ok(!state.queued.is_empty())
        })
    }

    fn close(&mut self) {
        self.handle.with(|state| state.closed = true);
    }
}
