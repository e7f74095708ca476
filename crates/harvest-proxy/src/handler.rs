//! Capture handler for intercepted exchanges.
//!
//! hudsucker clones the handler for every request, so the exchange started in
//! `handle_request` is carried to `handle_response` in the clone's own field.
//! Bodies are read frame by frame into the entry constructor and then
//! forwarded unchanged.

use std::pin::pin;
use std::sync::Arc;

use harvest_core::{ExchangeId, RequestHead, ResponseHead, Session};
use http_body_util::{BodyExt, Full};
use hudsucker::{
    hyper::{Method, Request, Response, StatusCode},
    Body, HttpContext, HttpHandler, RequestOrResponse, WebSocketHandler,
};
use hyper::body::Bytes;
use hyper::http::uri::Scheme;

fn bytes_to_body(bytes: Bytes) -> Body {
    Body::from(Full::new(bytes))
}

/// Reads a body to the end, reporting each data frame to `on_chunk`.
async fn drain_body<B>(body: B, mut on_chunk: impl FnMut(&[u8])) -> Result<Bytes, B::Error>
where
    B: hyper::body::Body<Data = Bytes>,
{
    let mut body = pin!(body);
    let mut collected = Vec::new();

    while let Some(frame) = body.frame().await {
        if let Ok(data) = frame?.into_data() {
            on_chunk(&data);
            collected.extend_from_slice(&data);
        }
    }

    Ok(Bytes::from(collected))
}

/// An exchange that is aborted unless explicitly completed.
#[derive(Debug)]
struct ExchangeGuard {
    session: Arc<Session>,
    id: ExchangeId,
    completed: bool,
}

impl ExchangeGuard {
    fn new(session: Arc<Session>, id: ExchangeId) -> Self {
        Self {
            session,
            id,
            completed: false,
        }
    }

    fn complete(mut self) {
        self.completed = true;
        self.session.complete_exchange(self.id);
    }
}

impl Drop for ExchangeGuard {
    fn drop(&mut self) {
        if !self.completed {
            self.session.constructor().abort(self.id);
        }
    }
}

/// HTTP handler that records exchanges into a [`Session`].
#[derive(Debug)]
pub struct CaptureHandler {
    session: Arc<Session>,
    exchange: Option<ExchangeGuard>,
}

impl Clone for CaptureHandler {
    fn clone(&self) -> Self {
        Self {
            session: self.session.clone(),
            exchange: None,
        }
    }
}

impl CaptureHandler {
    /// Creates a handler feeding `session`.
    pub fn new(session: Arc<Session>) -> Self {
        Self {
            session,
            exchange: None,
        }
    }

    /// Starts an exchange and buffers the request body.
    ///
    /// Passes the request through untouched when not recording. A request
    /// whose body cannot be read is answered with 502 instead of forwarded.
    pub async fn capture_request<B>(&mut self, req: Request<B>) -> RequestOrResponse
    where
        B: hyper::body::Body<Data = Bytes> + Into<Body>,
        B::Error: std::fmt::Display,
    {
        if req.method() == Method::CONNECT {
            return RequestOrResponse::Request(req.map(Into::into));
        }

        let head = RequestHead {
            method: req.method().clone(),
            uri: req.uri().clone(),
            headers: req.headers().clone(),
            tls: req.uri().scheme() == Some(&Scheme::HTTPS),
        };
        let Some(id) = self.session.constructor().request_start(head) else {
            return RequestOrResponse::Request(req.map(Into::into));
        };
        let guard = ExchangeGuard::new(self.session.clone(), id);

        let (parts, body) = req.into_parts();
        let constructor = self.session.constructor();
        let bytes = match drain_body(body, |chunk| constructor.request_data(id, chunk)).await {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!("Exchange {}: failed to read request body: {}", id, e);
                let mut res = Response::new(Body::empty());
                *res.status_mut() = StatusCode::BAD_GATEWAY;
                return RequestOrResponse::Response(res);
            }
        };

        constructor.request_end(id);
        self.exchange = Some(guard);
        RequestOrResponse::Request(Request::from_parts(parts, bytes_to_body(bytes)))
    }

    /// Buffers the response body and completes the pending exchange, if any.
    pub async fn capture_response(&mut self, res: Response<Body>) -> Response<Body> {
        let Some(guard) = self.exchange.take() else {
            return res;
        };
        let id = guard.id;
        let constructor = self.session.constructor();

        constructor.response_start(
            id,
            ResponseHead {
                status: res.status(),
                headers: res.headers().clone(),
            },
        );

        let (parts, body) = res.into_parts();
        let bytes = match drain_body(body, |chunk| constructor.response_data(id, chunk)).await {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!("Exchange {}: failed to read response body: {}", id, e);
                return Response::from_parts(parts, Body::empty());
            }
        };

        guard.complete();
        Response::from_parts(parts, bytes_to_body(bytes))
    }
}

impl HttpHandler for CaptureHandler {
    async fn handle_request(
        &mut self,
        _ctx: &HttpContext,
        req: Request<Body>,
    ) -> RequestOrResponse {
        self.capture_request(req).await
    }

    async fn handle_response(&mut self, _ctx: &HttpContext, res: Response<Body>) -> Response<Body> {
        self.capture_response(res).await
    }
}

// Upgraded connections are relayed without capture.
impl WebSocketHandler for CaptureHandler {}

#[cfg(test)]
mod tests {
    use super::*;
    use harvest_core::{SessionConfig, SessionEvent};
    use hyper::body::Frame;
    use std::pin::Pin;
    use std::task::{Context, Poll};

    /// A client body that breaks before any data arrives.
    struct BrokenBody;

    impl hyper::body::Body for BrokenBody {
        type Data = Bytes;
        type Error = std::io::Error;

        fn poll_frame(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
        ) -> Poll<Option<Result<Frame<Bytes>, Self::Error>>> {
            Poll::Ready(Some(Err(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "client went away",
            ))))
        }
    }

    impl From<BrokenBody> for Body {
        fn from(_: BrokenBody) -> Self {
            Body::empty()
        }
    }

    fn session() -> Arc<Session> {
        Arc::new(Session::new(
            SessionConfig::default().with_downloads_dir(std::env::temp_dir()),
        ))
    }

    fn request(method: Method, uri: &str, body: &'static str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("host", "api.x.com")
            .body(bytes_to_body(Bytes::from_static(body.as_bytes())))
            .unwrap()
    }

    fn response(status: StatusCode, body: &'static str) -> Response<Body> {
        Response::builder()
            .status(status)
            .header("content-type", "application/json")
            .body(bytes_to_body(Bytes::from_static(body.as_bytes())))
            .unwrap()
    }

    async fn body_text(res: Response<Body>) -> String {
        let bytes = res.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn records_full_exchange_and_forwards_bodies() {
        let session = session();
        session.set_recording(true);
        let mut rx = session.subscribe();
        let mut handler = CaptureHandler::new(session.clone()).clone();

        let forwarded = handler
            .capture_request(request(Method::POST, "https://api.x.com/users", r#"{"n":"a"}"#))
            .await;
        let RequestOrResponse::Request(forwarded) = forwarded else {
            panic!("request should be forwarded");
        };
        let sent = forwarded.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&sent[..], br#"{"n":"a"}"#);

        let res = handler
            .capture_response(response(StatusCode::CREATED, r#"{"id":7}"#))
            .await;
        assert_eq!(body_text(res).await, r#"{"id":7}"#);

        let entries = session.entries();
        assert_eq!(entries.len(), 1);
        let entry = &entries[0];
        assert_eq!(entry.request.method, "POST");
        assert_eq!(entry.request.url, "https://api.x.com/users");
        assert_eq!(
            entry.request.body.as_ref().and_then(|b| b.text.as_deref()),
            Some(r#"{"n":"a"}"#)
        );
        assert_eq!(entry.response.status, 201);
        assert_eq!(
            entry.response.body.as_ref().and_then(|b| b.mime_type.as_deref()),
            Some("application/json")
        );

        assert!(matches!(rx.try_recv(), Ok(SessionEvent::EntryCaptured { .. })));
        assert_eq!(session.constructor().in_flight(), 0);
    }

    #[tokio::test]
    async fn passes_through_when_not_recording() {
        let session = session();
        let mut handler = CaptureHandler::new(session.clone());

        handler
            .capture_request(request(Method::GET, "http://api.x.com/a", ""))
            .await;
        let res = handler.capture_response(response(StatusCode::OK, "ok")).await;

        assert_eq!(body_text(res).await, "ok");
        assert!(session.is_empty());
        assert_eq!(session.constructor().in_flight(), 0);
    }

    #[tokio::test]
    async fn connect_requests_are_not_recorded() {
        let session = session();
        session.set_recording(true);
        let mut handler = CaptureHandler::new(session.clone());

        let req = Request::builder()
            .method(Method::CONNECT)
            .uri("api.x.com:443")
            .body(Body::empty())
            .unwrap();
        handler.capture_request(req).await;

        assert_eq!(session.constructor().in_flight(), 0);
    }

    #[tokio::test]
    async fn unreadable_request_body_is_answered_with_bad_gateway() {
        let session = session();
        session.set_recording(true);
        let mut handler = CaptureHandler::new(session.clone());

        let req = Request::builder()
            .method(Method::POST)
            .uri("https://api.x.com/upload")
            .header("host", "api.x.com")
            .header("content-length", "512")
            .body(BrokenBody)
            .unwrap();
        let RequestOrResponse::Response(res) = handler.capture_request(req).await else {
            panic!("request with a broken body should not be forwarded");
        };

        assert_eq!(res.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(session.constructor().in_flight(), 0);
        assert!(session.is_empty());
    }

    #[tokio::test]
    async fn dropped_handler_aborts_pending_exchange() {
        let session = session();
        session.set_recording(true);
        let mut handler = CaptureHandler::new(session.clone());

        handler
            .capture_request(request(Method::GET, "https://api.x.com/slow", ""))
            .await;
        assert_eq!(session.constructor().in_flight(), 1);

        drop(handler);
        assert_eq!(session.constructor().in_flight(), 0);
        assert!(session.is_empty());
    }
}
