//! HTTP access to a remote registry.

use std::io;
use std::time::Duration;

use bytes::Bytes;
use futures::{StreamExt as _, TryStreamExt as _};
use http::header::ACCEPT;
use http::{Method, StatusCode, Uri};
use http_body_util::BodyExt as _;
use hyperdriver::Body;
use hyperdriver::service::SharedService;
use serde::de::DeserializeOwned;
use tokio_util::io::StreamReader;
use tower::ServiceExt as _;
use tower_http::follow_redirect::FollowRedirectLayer;
use tower_http::follow_redirect::policy::Limited;

use super::timeout::TimeoutLayer;
use crate::blob::BlobReader;
use crate::error::{RegistryError, RegistryResult};

const MAX_REDIRECTS: usize = 5;

/// A request to a remote registry.
pub(crate) type Request = http::Request<Body>;

/// A response from a remote registry.
pub(crate) type Response = http::Response<Body>;

type Transport = SharedService<Request, Response, hyperdriver::client::Error>;

/// A client for the registry HTTP API of one remote registry.
///
/// Redirects are followed, so blob downloads served from another host work.
#[derive(Debug, Clone)]
pub struct RemoteClient {
    base: Uri,
    transport: Transport,
    inner: Transport,
}

/// Wrap `transport` in the layers every remote call goes through.
fn stack(transport: Transport, timeout: Option<Duration>) -> Transport {
    tower::ServiceBuilder::new()
        .layer(SharedService::layer())
        .option_layer(timeout.map(TimeoutLayer::new))
        .layer(FollowRedirectLayer::with_policy(Limited::new(MAX_REDIRECTS)))
        .service(transport)
}

impl RemoteClient {
    /// A client for the registry at `base`, over TCP with TLS.
    pub fn new(base: Uri) -> Self {
        let transport = hyperdriver::Client::build_tcp_http()
            .with_default_tls()
            .build_service();

        Self::from_transport(base, transport)
    }

    /// A client for the registry at `base` which sends requests to `inner`.
    pub fn with_service<S>(base: Uri, inner: S) -> Self
    where
        S: tower::Service<Request, Response = Response, Error = hyperdriver::client::Error>
            + Clone
            + Send
            + Sync
            + 'static,
        S::Future: Send + 'static,
    {
        let transport = tower::ServiceBuilder::new()
            .layer(SharedService::layer())
            .service(inner);

        Self::from_transport(base, transport)
    }

    fn from_transport(base: Uri, transport: Transport) -> Self {
        Self {
            base,
            inner: stack(transport.clone(), None),
            transport,
        }
    }

    /// Give up on requests which take longer than `timeout`, redirects included.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.inner = stack(self.transport.clone(), Some(timeout));
        self
    }

    /// Base URI of the remote registry.
    pub fn base(&self) -> &Uri {
        &self.base
    }

    fn resolve(&self, path_and_query: &str) -> RegistryResult<Uri> {
        let prefix = self.base.path().trim_end_matches('/');
        let mut parts = self.base.clone().into_parts();
        parts.path_and_query = Some(
            format!("{prefix}{path_and_query}")
                .parse()
                .map_err(|err: http::uri::InvalidUri| RegistryError::InvalidConfig(err.to_string()))?,
        );
        Uri::from_parts(parts).map_err(|err| RegistryError::InvalidConfig(err.to_string()))
    }

    /// Send a request without a body.
    ///
    /// A redirect which could not be followed is an invalid response.
    #[tracing::instrument(skip(self), fields(base = %self.base))]
    pub(crate) async fn send(
        &self,
        method: Method,
        path_and_query: &str,
        accept: Option<&str>,
    ) -> RegistryResult<Response> {
        let uri = self.resolve(path_and_query)?;

        let mut request = http::Request::builder().method(method).uri(uri.clone());
        if let Some(accept) = accept {
            request = request.header(ACCEPT, accept);
        }
        let request = request
            .body(Body::empty())
            .map_err(|err| RegistryError::InvalidConfig(err.to_string()))?;

        let response = self
            .inner
            .clone()
            .oneshot(request)
            .await
            .map_err(|err| RegistryError::RemoteUnavailable(err.into()))?;

        if response.status().is_redirection() {
            return Err(RegistryError::InvalidRemoteResponse(format!(
                "redirect from {uri} not followed (status {})",
                response.status()
            )));
        }
        tracing::trace!(%uri, status = %response.status(), "Response");
        Ok(response)
    }

    /// Stream the body of a `GET` of `path`.
    pub(crate) async fn stream(&self, path: &str) -> RegistryResult<BlobReader> {
        let response = self.send(Method::GET, path, None).await?;
        if response.status() != StatusCode::OK {
            return Err(RegistryError::UnexpectedRemoteStatus {
                status: response.status(),
            });
        }

        let stream = response
            .into_body()
            .into_data_stream()
            .map_err(io::Error::other)
            .boxed();
        Ok(Box::new(StreamReader::new(stream)))
    }
}

/// Collect a response body.
pub(crate) async fn bytes(response: Response) -> RegistryResult<Bytes> {
    let collected = response
        .into_body()
        .collect()
        .await
        .map_err(|err| RegistryError::RemoteUnavailable(err.into()))?;
    Ok(collected.to_bytes())
}

/// Collect and decode a JSON response body.
pub(crate) async fn json<T: DeserializeOwned>(response: Response) -> RegistryResult<T> {
    let body = bytes(response).await?;
    serde_json::from_slice(&body)
        .map_err(|err| RegistryError::InvalidRemoteResponse(err.to_string()))
}

#[cfg(test)]
mod tests {
    use http::HeaderValue;
    use http::header::LOCATION;
    use tokio::io::AsyncReadExt as _;

    use super::*;
    use crate::proxy::mock::{MockRemote, MockResponse};

    #[test]
    fn resolve_keeps_base_path() {
        let client = MockRemote::new().client();
        assert_eq!(
            client.resolve("/v2/").unwrap(),
            Uri::from_static("http://registry.test/v2/")
        );

        let client = RemoteClient::with_service(
            Uri::from_static("https://example.com/mirror/"),
            MockRemote::new(),
        );
        assert_eq!(
            client.resolve("/v2/_catalog?n=1").unwrap(),
            Uri::from_static("https://example.com/mirror/v2/_catalog?n=1")
        );
    }

    #[tokio::test]
    async fn follows_redirects() {
        let remote = MockRemote::new();
        remote.add(
            Method::GET,
            "/v2/foo/blobs/abc",
            MockResponse::new(StatusCode::TEMPORARY_REDIRECT)
                .header(LOCATION, HeaderValue::from_static("/storage/abc")),
        );
        remote.add(
            Method::GET,
            "/storage/abc",
            MockResponse::new(StatusCode::OK).body("content"),
        );

        let client = remote.client();
        let mut reader = client.stream("/v2/foo/blobs/abc").await.unwrap();
        let mut content = String::new();
        reader.read_to_string(&mut content).await.unwrap();
        assert_eq!(content, "content");

        let requests = remote.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].uri, "http://registry.test/storage/abc");
    }

    #[tokio::test]
    async fn redirect_loop() {
        let remote = MockRemote::new();
        remote.add(
            Method::GET,
            "/loop",
            MockResponse::new(StatusCode::FOUND)
                .header(LOCATION, HeaderValue::from_static("http://registry.test/loop")),
        );

        let err = remote
            .client()
            .send(Method::GET, "/loop", None)
            .await
            .err()
            .expect("request should fail");
        assert!(matches!(err, RegistryError::InvalidRemoteResponse(_)));
        assert_eq!(remote.requests().len(), MAX_REDIRECTS + 1);
    }

    #[tokio::test]
    async fn redirect_without_location() {
        let remote = MockRemote::new();
        remote.add(Method::GET, "/moved", MockResponse::new(StatusCode::FOUND));

        let err = remote
            .client()
            .send(Method::GET, "/moved", None)
            .await
            .err()
            .expect("request should fail");
        assert!(matches!(err, RegistryError::InvalidRemoteResponse(_)));
    }

    #[tokio::test]
    async fn unreachable_remote() {
        let remote = MockRemote::new();
        remote.unreachable();

        let err = remote
            .client()
            .send(Method::HEAD, "/v2/", None)
            .await
            .err()
            .expect("request should fail");
        assert!(err.is_remote());
        assert!(matches!(err, RegistryError::RemoteUnavailable(_)));
    }

    #[tokio::test]
    async fn slow_remote_times_out() {
        let remote = MockRemote::new();
        remote.stall();

        let err = remote
            .client()
            .with_timeout(Duration::from_millis(20))
            .send(Method::GET, "/v2/", None)
            .await
            .err()
            .expect("request should time out");
        assert!(matches!(err, RegistryError::RemoteUnavailable(_)));
        assert_eq!(remote.requests().len(), 1);
    }

    #[tokio::test]
    async fn timeout_keeps_redirects() {
        let remote = MockRemote::new();
        remote.add(
            Method::HEAD,
            "/v2/foo/blobs/abc",
            MockResponse::new(StatusCode::SEE_OTHER)
                .header(LOCATION, HeaderValue::from_static("http://cdn.test/abc")),
        );

        let response = remote
            .client()
            .with_timeout(Duration::from_secs(5))
            .send(Method::HEAD, "/v2/foo/blobs/abc", None)
            .await
            .unwrap();
        // Nothing is served at the target.
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let requests = remote.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].method, Method::HEAD);
        assert_eq!(requests[1].uri, "http://cdn.test/abc");
    }

    #[tokio::test]
    async fn sends_accept_header() {
        let remote = MockRemote::new();
        remote
            .client()
            .send(Method::GET, "/v2/", Some("application/json"))
            .await
            .unwrap();

        let requests = remote.requests();
        assert_eq!(requests[0].method, Method::GET);
        assert_eq!(
            requests[0].headers.get(ACCEPT).unwrap(),
            "application/json"
        );
    }

    #[tokio::test]
    async fn stream_requires_ok() {
        let remote = MockRemote::new();
        let err = match remote.client().stream("/v2/missing").await {
            Ok(_) => panic!("expected an error"),
            Err(err) => err,
        };
        assert!(matches!(
            err,
            RegistryError::UnexpectedRemoteStatus {
                status: StatusCode::NOT_FOUND
            }
        ));
    }
}
