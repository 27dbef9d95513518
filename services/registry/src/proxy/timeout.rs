//! A deadline on each call to a remote registry.

use std::time::Duration;

/// A layer which fails calls that take longer than a fixed duration.
#[derive(Debug, Clone, Copy)]
pub struct TimeoutLayer {
    timeout: Duration,
}

impl TimeoutLayer {
    /// Give up on calls after `timeout`.
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl<S> tower::Layer<S> for TimeoutLayer {
    type Service = TimeoutService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        TimeoutService {
            service: inner,
            timeout: self.timeout,
        }
    }
}

/// A [tower::Service] which answers [`hyperdriver::client::Error::RequestTimeout`]
/// when the inner service is too slow.
#[derive(Debug, Clone)]
pub struct TimeoutService<S> {
    service: S,
    timeout: Duration,
}

impl<S, R> tower::Service<R> for TimeoutService<S>
where
    S: tower::Service<R, Error = hyperdriver::client::Error>,
{
    type Response = S::Response;
    type Error = hyperdriver::client::Error;
    type Future = self::future::TimeoutFuture<S::Future, S::Response>;

    fn poll_ready(
        &mut self,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        self.service.poll_ready(cx)
    }

    fn call(&mut self, req: R) -> Self::Future {
        self::future::TimeoutFuture::new(self.service.call(req), self.timeout)
    }
}

mod future {
    use std::future::Future;
    use std::marker::PhantomData;
    use std::pin::Pin;
    use std::task::{Context, Poll, ready};
    use std::time::Duration;

    use pin_project::pin_project;
    use tokio::time::Timeout;

    #[pin_project]
    #[derive(Debug)]
    pub struct TimeoutFuture<F, R> {
        #[pin]
        future: Timeout<F>,
        response: PhantomData<fn() -> R>,
    }

    impl<F, R> TimeoutFuture<F, R> {
        pub(super) fn new(future: F, timeout: Duration) -> Self {
            Self {
                future: tokio::time::timeout(timeout, future),
                response: PhantomData,
            }
        }
    }

    impl<F, R> Future for TimeoutFuture<F, R>
    where
        F: Future<Output = Result<R, hyperdriver::client::Error>>,
    {
        type Output = Result<R, hyperdriver::client::Error>;

        fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
            Poll::Ready(match ready!(self.project().future.poll(cx)) {
                Ok(outcome) => outcome,
                Err(_) => Err(hyperdriver::client::Error::RequestTimeout),
            })
        }
    }
}
