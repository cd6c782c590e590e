use bytes::Bytes;
use dashmap::DashMap;
use http::header::{CONTENT_TYPE, HeaderValue};
use http::{HeaderMap, Method, StatusCode};
use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use url::Url;

use crate::{
    CallFuture, Channel, ChannelFactory, Endpoint, ErrorKind, Release, Request, Response, Result,
};

/// A GET-style endpoint of the test service
pub(crate) fn endpoint(method: Method) -> Endpoint {
    Endpoint::new("test-service", "testEndpoint", "1.0.0", method, "/items")
}

/// `n` distinct base URIs
pub(crate) fn uris(n: usize) -> Vec<Url> {
    (0..n)
        .map(|i| Url::parse(&format!("https://host-{i}.example/api")).unwrap())
        .collect()
}

/// What a [`StubChannel`] does with a call
#[derive(Debug, Clone)]
pub(crate) enum Reply {
    Status(StatusCode),
    Headers(StatusCode, HeaderMap),
    Json(StatusCode, &'static str),
    /// JSON headers followed by a body that never ends
    Stalled(StatusCode),
    Connection,
    Timeout,
    Pending,
}

#[derive(Debug, Default)]
struct Counters {
    calls: AtomicUsize,
    cancels: AtomicUsize,
    closed: AtomicUsize,
    dropped: AtomicUsize,
}

/// A scripted transport. Queued replies are used first, then the default.
#[derive(Debug)]
pub(crate) struct StubChannel {
    uri: Option<Url>,
    default: Mutex<Reply>,
    queue: Mutex<VecDeque<Reply>>,
    counters: Arc<Counters>,
    hits: Arc<Mutex<Vec<Url>>>,
}

impl StubChannel {
    pub(crate) fn new(status: StatusCode) -> Self {
        Self {
            uri: None,
            default: Mutex::new(Reply::Status(status)),
            queue: Mutex::new(VecDeque::new()),
            counters: Arc::default(),
            hits: Arc::default(),
        }
    }

    /// Change the reply to all later calls
    pub(crate) fn set(&self, reply: Reply) {
        *self.default.lock().unwrap() = reply;
    }

    /// Use `reply` for one call
    pub(crate) fn push(&self, reply: Reply) {
        self.queue.lock().unwrap().push_back(reply);
    }

    pub(crate) fn calls(&self) -> usize {
        self.counters.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn cancels(&self) -> usize {
        self.counters.cancels.load(Ordering::SeqCst)
    }

    pub(crate) fn closed(&self) -> usize {
        self.counters.closed.load(Ordering::SeqCst)
    }

    pub(crate) fn dropped(&self) -> usize {
        self.counters.dropped.load(Ordering::SeqCst)
    }

    fn response(&self, status: StatusCode, headers: HeaderMap, body: Bytes) -> Response {
        self.track(Response::from_bytes(status, headers, body))
    }

    /// Count how `response` gets released
    fn track(&self, mut response: Response) -> Response {
        let counters = Arc::clone(&self.counters);
        response.on_release(move |how| {
            let counter = match how {
                Release::Closed => &counters.closed,
                Release::Dropped => &counters.dropped,
            };
            counter.fetch_add(1, Ordering::SeqCst);
        });
        response
    }
}

impl Channel for StubChannel {
    fn execute(&self, _endpoint: &Endpoint, _request: Request) -> CallFuture<Response> {
        self.counters.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(uri) = &self.uri {
            self.hits.lock().unwrap().push(uri.clone());
        }
        let reply = self
            .queue
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.default.lock().unwrap().clone());

        let call = match reply {
            Reply::Status(status) => {
                CallFuture::ready(Ok(self.response(status, HeaderMap::new(), Bytes::new())))
            }
            Reply::Headers(status, headers) => {
                CallFuture::ready(Ok(self.response(status, headers, Bytes::new())))
            }
            Reply::Json(status, body) => {
                let body = Bytes::from_static(body.as_bytes());
                CallFuture::ready(Ok(self.response(status, json_headers(), body)))
            }
            Reply::Stalled(status) => {
                let response = Response::new(status, json_headers(), futures::stream::pending());
                CallFuture::ready(Ok(self.track(response)))
            }
            Reply::Connection => CallFuture::failed(ErrorKind::Connection(Box::new(
                io::Error::from(io::ErrorKind::ConnectionRefused),
            ))),
            Reply::Timeout => CallFuture::failed(ErrorKind::Timeout(Box::new(io::Error::from(
                io::ErrorKind::TimedOut,
            )))),
            Reply::Pending => CallFuture::new(futures::future::pending()),
        };
        let counters = Arc::clone(&self.counters);
        call.on_cancel(move || {
            counters.cancels.fetch_add(1, Ordering::SeqCst);
        })
    }
}

fn json_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers
}

/// Hands out one [`StubChannel`] per URI and logs which URI each call hit
#[derive(Debug)]
pub(crate) struct StubFactory {
    default: StatusCode,
    stubs: DashMap<Url, Arc<StubChannel>>,
    hits: Arc<Mutex<Vec<Url>>>,
    created: AtomicUsize,
}

impl StubFactory {
    pub(crate) fn new(default: StatusCode) -> Self {
        Self {
            default,
            stubs: DashMap::new(),
            hits: Arc::default(),
            created: AtomicUsize::new(0),
        }
    }

    /// The stub serving `uri`
    pub(crate) fn stub(&self, uri: &Url) -> Arc<StubChannel> {
        let entry = self.stubs.entry(uri.clone()).or_insert_with(|| {
            let mut stub = StubChannel::new(self.default);
            stub.uri = Some(uri.clone());
            stub.hits = Arc::clone(&self.hits);
            Arc::new(stub)
        });
        Arc::clone(&entry)
    }

    /// URIs hit so far, in call order
    pub(crate) fn hits(&self) -> Vec<Url> {
        self.hits.lock().unwrap().clone()
    }

    /// Number of channels created through [`ChannelFactory::create`]
    pub(crate) fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

impl ChannelFactory for StubFactory {
    fn create(&self, uri: &Url) -> Result<Arc<dyn Channel>> {
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(self.stub(uri))
    }
}
