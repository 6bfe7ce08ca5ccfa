//! Scripted mock provider server.
//!
//! [`MockProvider`] binds an ephemeral local port and serves a queue of
//! canned responses, one per incoming request, regardless of path. Tests
//! point a client at [`MockProvider::base_url`], script the exchange,
//! and afterwards assert on [`MockProvider::hits`] and the recorded
//! requests. Streaming responses are delivered in explicit chunks with
//! a small pacing delay, so chunk-boundary handling is exercised the
//! way a real socket would.

use std::collections::VecDeque;
use std::convert::Infallible;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::extract::{Request, State};
use axum::http::{Response, StatusCode};
use axum::response::IntoResponse;
use futures::StreamExt;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::debug;

/// One canned response in a [`MockProvider`] script.
#[derive(Debug, Clone)]
pub struct MockResponse {
    status: u16,
    headers: Vec<(String, String)>,
    body: MockBody,
}

#[derive(Debug, Clone)]
enum MockBody {
    Full(String),
    Chunked {
        chunks: Vec<Vec<u8>>,
        delay: Duration,
    },
}

impl MockResponse {
    /// A plain 200 with the given body.
    pub fn ok(body: &str) -> Self {
        Self::with_status(200, body)
    }

    pub fn with_status(status: u16, body: &str) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: MockBody::Full(body.to_string()),
        }
    }

    /// A 200 whose body arrives in the given chunks, in order, with a
    /// short pause between them. Chunks may split frames, or even UTF-8
    /// sequences, at any byte.
    pub fn streaming(chunks: Vec<Vec<u8>>) -> Self {
        Self {
            status: 200,
            headers: Vec::new(),
            body: MockBody::Chunked {
                chunks,
                delay: Duration::from_millis(5),
            },
        }
    }

    /// Convenience form of [`Self::streaming`] for string chunks.
    pub fn streaming_str(chunks: &[&str]) -> Self {
        Self::streaming(chunks.iter().map(|c| c.as_bytes().to_vec()).collect())
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    /// Override the pause between streamed chunks. A pause longer than
    /// the client's idle read timeout simulates a stalled provider.
    pub fn chunk_delay(mut self, delay: Duration) -> Self {
        if let MockBody::Chunked { delay: d, .. } = &mut self.body {
            *d = delay;
        }
        self
    }

    fn into_response(self) -> Response<Body> {
        let mut builder = Response::builder().status(self.status);
        for (name, value) in &self.headers {
            builder = builder.header(name, value);
        }
        let body = match self.body {
            MockBody::Full(text) => Body::from(text),
            MockBody::Chunked { chunks, delay } => {
                let stream = futures::stream::iter(chunks).then(move |chunk| async move {
                    tokio::time::sleep(delay).await;
                    Ok::<_, Infallible>(Bytes::from(chunk))
                });
                Body::from_stream(stream)
            }
        };
        builder.body(body).expect("mock response build")
    }
}

/// A request the mock server saw, for post-hoc assertions.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub body: String,
}

struct MockState {
    script: Mutex<VecDeque<MockResponse>>,
    hits: AtomicUsize,
    requests: Mutex<Vec<RecordedRequest>>,
}

/// A local HTTP server that plays back a response script.
pub struct MockProvider {
    base_url: String,
    state: Arc<MockState>,
    handle: JoinHandle<()>,
}

impl MockProvider {
    /// Bind an ephemeral port and serve the given script. Responses are
    /// consumed front to back, one per request; requests beyond the
    /// script get a 500 so a runaway retry loop fails loudly.
    pub async fn start(script: Vec<MockResponse>) -> Self {
        let state = Arc::new(MockState {
            script: Mutex::new(script.into()),
            hits: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        });

        let app = axum::Router::new()
            .fallback(handle_any)
            .with_state(Arc::clone(&state));

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock provider");
        let addr = listener.local_addr().expect("mock provider addr");
        debug!(%addr, "mock provider listening");

        let handle = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Self {
            base_url: format!("http://{addr}"),
            state,
            handle,
        }
    }

    /// Single-response convenience form of [`Self::start`].
    pub async fn single(response: MockResponse) -> Self {
        Self::start(vec![response]).await
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Total requests served so far.
    pub fn hits(&self) -> usize {
        self.state.hits.load(Ordering::SeqCst)
    }

    /// Everything the server has seen, in arrival order.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.requests.lock().expect("requests lock").clone()
    }
}

impl Drop for MockProvider {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn handle_any(State(state): State<Arc<MockState>>, req: Request) -> Response<Body> {
    let (parts, body) = req.into_parts();
    let bytes = axum::body::to_bytes(body, usize::MAX)
        .await
        .unwrap_or_default();

    state.hits.fetch_add(1, Ordering::SeqCst);
    state
        .requests
        .lock()
        .expect("requests lock")
        .push(RecordedRequest {
            method: parts.method.to_string(),
            path: parts.uri.path().to_string(),
            body: String::from_utf8_lossy(&bytes).into_owned(),
        });

    let scripted = state.script.lock().expect("script lock").pop_front();
    match scripted {
        Some(response) => response.into_response(),
        None => (StatusCode::INTERNAL_SERVER_ERROR, "mock script exhausted").into_response(),
    }
}
