//! Entry constructor.
//!
//! Turns the interception engine's asymmetric callback sequence
//!
//! ```text
//! request_start → request_data* → request_end → response_start → response_data* → response_end
//! ```
//!
//! into exactly one [`TrafficEntry`] per completed exchange. Each in-flight
//! exchange is an explicit accumulator keyed by [`ExchangeId`]. Nothing is
//! buffered while the recording gate is off, and exchanges that never reach
//! `response_end` (errors, closed connections) are dropped via [`EntryConstructor::abort`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use http::{HeaderMap, Method, StatusCode, Uri};
use parking_lot::Mutex;

use crate::gate::RecordingGate;
use crate::model::{Header, TrafficEntry, TrafficRequest, TrafficResponse};
use crate::normalize::{
    build_body, content_type, header_value, normalize_headers, reconstruct_url, BodyBuffer,
    DEFAULT_MAX_BODY_BYTES,
};

/// Identity of one in-flight request/response exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExchangeId(u64);

impl std::fmt::Display for ExchangeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Request line and headers as delivered by the interception engine.
#[derive(Debug, Clone)]
pub struct RequestHead {
    pub method: Method,
    /// Usually origin-form (path only); absolute-form is accepted.
    pub uri: Uri,
    pub headers: HeaderMap,
    /// Whether the client connection was TLS.
    pub tls: bool,
}

/// Status line and headers of the upstream response.
#[derive(Debug, Clone)]
pub struct ResponseHead {
    pub status: StatusCode,
    pub headers: HeaderMap,
}

struct PartialRequest {
    method: String,
    url: String,
    headers: Vec<Header>,
}

enum Exchange {
    /// Receiving request body chunks.
    Request {
        request: PartialRequest,
        body: BodyBuffer,
    },
    /// Request complete, waiting for the response head.
    AwaitingResponse { request: TrafficRequest },
    /// Receiving response body chunks.
    Response {
        request: TrafficRequest,
        status: u16,
        status_text: Option<String>,
        headers: Vec<Header>,
        body: BodyBuffer,
    },
}

impl Exchange {
    fn state_name(&self) -> &'static str {
        match self {
            Exchange::Request { .. } => "request",
            Exchange::AwaitingResponse { .. } => "awaiting-response",
            Exchange::Response { .. } => "response",
        }
    }
}

fn finish_request(request: PartialRequest, body: &BodyBuffer) -> TrafficRequest {
    let mime_type = content_type(&request.headers);
    TrafficRequest {
        method: request.method,
        url: request.url,
        body: build_body(mime_type, body.as_bytes()),
        headers: request.headers,
        description: None,
    }
}

/// Assembles traffic entries from streamed interception callbacks.
pub struct EntryConstructor {
    gate: Arc<RecordingGate>,
    pending: Mutex<HashMap<ExchangeId, Exchange>>,
    next_id: AtomicU64,
    last_timestamp: AtomicI64,
    max_body_bytes: usize,
}

impl std::fmt::Debug for EntryConstructor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntryConstructor")
            .field("recording", &self.gate.is_recording())
            .field("in_flight", &self.in_flight())
            .field("max_body_bytes", &self.max_body_bytes)
            .finish()
    }
}

impl EntryConstructor {
    /// Creates a constructor guarded by `gate`.
    pub fn new(gate: Arc<RecordingGate>) -> Self {
        Self::with_max_body_bytes(gate, DEFAULT_MAX_BODY_BYTES)
    }

    /// Creates a constructor with a custom per-body byte cap.
    pub fn with_max_body_bytes(gate: Arc<RecordingGate>, max_body_bytes: usize) -> Self {
        Self {
            gate,
            pending: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            last_timestamp: AtomicI64::new(0),
            max_body_bytes,
        }
    }

    /// Number of exchanges started but not yet completed or aborted.
    pub fn in_flight(&self) -> usize {
        self.pending.lock().len()
    }

    /// Begins an exchange. Returns `None` without buffering anything when not recording.
    pub fn request_start(&self, head: RequestHead) -> Option<ExchangeId> {
        if !self.gate.is_recording() {
            return None;
        }

        let id = ExchangeId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let headers = normalize_headers(&head.headers);
        let url = reconstruct_url(head.tls, header_value(&headers, "host"), &head.uri);

        tracing::debug!("Exchange {} started: {} {}", id, head.method, url);

        let exchange = Exchange::Request {
            request: PartialRequest {
                method: head.method.as_str().to_string(),
                url,
                headers,
            },
            body: BodyBuffer::new(self.max_body_bytes),
        };
        self.pending.lock().insert(id, exchange);
        Some(id)
    }

    /// Appends a request body chunk.
    pub fn request_data(&self, id: ExchangeId, chunk: &[u8]) {
        let mut pending = self.pending.lock();
        match pending.get_mut(&id) {
            Some(Exchange::Request { body, .. }) => body.push(chunk),
            Some(other) => {
                tracing::debug!("Exchange {}: request data in {} state", id, other.state_name())
            }
            None => tracing::debug!("Exchange {}: request data for unknown exchange", id),
        }
    }

    /// Marks the request complete and builds its canonical form.
    pub fn request_end(&self, id: ExchangeId) {
        let mut pending = self.pending.lock();
        let Some(exchange) = pending.remove(&id) else {
            tracing::debug!("Exchange {}: request end for unknown exchange", id);
            return;
        };

        let next = match exchange {
            Exchange::Request { request, body } => Exchange::AwaitingResponse {
                request: finish_request(request, &body),
            },
            other => other,
        };
        pending.insert(id, next);
    }

    /// Records the response status and headers.
    ///
    /// An exchange still receiving its request body is completed implicitly.
    pub fn response_start(&self, id: ExchangeId, head: ResponseHead) {
        let mut pending = self.pending.lock();
        let Some(exchange) = pending.remove(&id) else {
            tracing::debug!("Exchange {}: response start for unknown exchange", id);
            return;
        };

        let request = match exchange {
            Exchange::Request { request, body } => finish_request(request, &body),
            Exchange::AwaitingResponse { request } => request,
            Exchange::Response { .. } => {
                tracing::debug!("Exchange {}: duplicate response start ignored", id);
                pending.insert(id, exchange);
                return;
            }
        };

        pending.insert(
            id,
            Exchange::Response {
                request,
                status: head.status.as_u16(),
                status_text: head.status.canonical_reason().map(str::to_string),
                headers: normalize_headers(&head.headers),
                body: BodyBuffer::new(self.max_body_bytes),
            },
        );
    }

    /// Appends a response body chunk.
    pub fn response_data(&self, id: ExchangeId, chunk: &[u8]) {
        let mut pending = self.pending.lock();
        match pending.get_mut(&id) {
            Some(Exchange::Response { body, .. }) => body.push(chunk),
            Some(other) => {
                tracing::debug!("Exchange {}: response data in {} state", id, other.state_name())
            }
            None => tracing::debug!("Exchange {}: response data for unknown exchange", id),
        }
    }

    /// Completes the exchange, returning the finished entry.
    ///
    /// Returns `None` if the exchange is unknown or never received a response head.
    pub fn response_end(&self, id: ExchangeId) -> Option<TrafficEntry> {
        let exchange = self.pending.lock().remove(&id)?;

        let (request, status, status_text, headers, body) = match exchange {
            Exchange::Response {
                request,
                status,
                status_text,
                headers,
                body,
            } => (request, status, status_text, headers, body),
            other => {
                tracing::debug!(
                    "Exchange {}: response end in {} state, discarding",
                    id,
                    other.state_name()
                );
                return None;
            }
        };

        let response = TrafficResponse {
            status,
            status_text,
            body: build_body(content_type(&headers), body.as_bytes()),
            headers,
        };

        let entry = TrafficEntry::new(self.next_timestamp(), request, response);
        tracing::debug!(
            "Exchange {} complete: {} {} -> {}",
            id,
            entry.request.method,
            entry.request.url,
            entry.response.status
        );
        Some(entry)
    }

    /// Discards a partial exchange (upstream error or closed connection).
    pub fn abort(&self, id: ExchangeId) {
        if let Some(exchange) = self.pending.lock().remove(&id) {
            tracing::debug!("Exchange {} aborted in {} state", id, exchange.state_name());
        }
    }

    /// Current wall-clock millis, never earlier than the previous completion.
    fn next_timestamp(&self) -> i64 {
        let now = chrono::Utc::now().timestamp_millis();
        let previous = self.last_timestamp.fetch_max(now, Ordering::SeqCst);
        previous.max(now)
    }
}
