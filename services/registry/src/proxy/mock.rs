//! A remote registry which answers from canned responses.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use futures::FutureExt as _;
use futures::future::BoxFuture;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri};
use parking_lot::Mutex;

use super::RemoteClient;
use super::client::{Request, Response};

/// A canned response.
#[derive(Debug, Clone)]
pub struct MockResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
}

impl MockResponse {
    /// An empty response with `status`.
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    /// Add a header.
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    /// Set the body.
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }
}

/// A request received by a [`MockRemote`].
#[derive(Debug, Clone)]
pub struct MockRequest {
    /// Request method.
    pub method: Method,
    /// Full request URI.
    pub uri: Uri,
    /// Request headers.
    pub headers: HeaderMap,
}

#[derive(Debug, Default)]
struct State {
    responses: HashMap<(Method, String), MockResponse>,
    requests: Vec<MockRequest>,
    unreachable: bool,
    stalled: bool,
}

/// A remote registry served from memory.
///
/// Responses are matched on method, path and query. Anything else gets an
/// empty `404 Not Found`. Clones share their responses and request log.
#[derive(Debug, Clone, Default)]
pub struct MockRemote {
    state: Arc<Mutex<State>>,
}

impl MockRemote {
    /// A remote with no content.
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `method` requests for `path_and_query` with `response`.
    pub fn add(&self, method: Method, path_and_query: &str, response: MockResponse) {
        self.state
            .lock()
            .responses
            .insert((method, path_and_query.to_owned()), response);
    }

    /// Fail every following request as if the remote could not be reached.
    pub fn unreachable(&self) {
        self.state.lock().unreachable = true;
    }

    /// Never answer following requests.
    pub fn stall(&self) {
        self.state.lock().stalled = true;
    }

    /// Requests received so far, in order.
    pub fn requests(&self) -> Vec<MockRequest> {
        self.state.lock().requests.clone()
    }

    /// A client talking to this remote at `http://registry.test`.
    pub fn client(&self) -> RemoteClient {
        RemoteClient::with_service(Uri::from_static("http://registry.test"), self.clone())
    }
}

impl tower::Service<Request> for MockRemote {
    type Response = Response;
    type Error = hyperdriver::client::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(
        &mut self,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request) -> Self::Future {
        let mut state = self.state.lock();
        state.requests.push(MockRequest {
            method: req.method().clone(),
            uri: req.uri().clone(),
            headers: req.headers().clone(),
        });

        if state.unreachable {
            return futures::future::ready(Err(hyperdriver::client::Error::RequestTimeout)).boxed();
        }
        if state.stalled {
            return futures::future::pending().boxed();
        }

        let path = req
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        let canned = state
            .responses
            .get(&(req.method().clone(), path.to_owned()))
            .cloned()
            .unwrap_or_else(|| MockResponse::new(StatusCode::NOT_FOUND));

        let mut response = http::Response::new(hyperdriver::Body::from(canned.body));
        *response.status_mut() = canned.status;
        *response.headers_mut() = canned.headers;
        futures::future::ready(Ok(response)).boxed()
    }
}
