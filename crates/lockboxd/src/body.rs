//! Request body watcher.
//!
//! tonic's request decoder turns a client reset (`RST_STREAM CANCEL`) into a
//! plain end of stream, so a handler cannot tell a finished client-streaming
//! upload from an abandoned one. [`BodyWatchLayer`] wraps every request body,
//! notes any body error in a [`BodyHealth`] flag, and puts that flag in the
//! request extensions where handlers can check it after the stream ends.

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{ready, Context, Poll};

use bytes::Bytes;
use http::Request;
use http_body::{Frame, SizeHint};
use pin_project_lite::pin_project;
use tonic::body::Body;
use tonic::Status;
use tower::{Layer, Service};
use tracing::debug;

/// Set once the request body has failed.
#[derive(Debug, Clone, Default)]
pub struct BodyHealth(Arc<AtomicBool>);

impl BodyHealth {
    pub fn mark_broken(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Whether the body ended in an error rather than a clean half-close.
    pub fn is_broken(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BodyWatchLayer;

impl<S> Layer<S> for BodyWatchLayer {
    type Service = BodyWatch<S>;

    fn layer(&self, inner: S) -> Self::Service {
        BodyWatch { inner }
    }
}

/// Service wrapper for [`BodyWatchLayer`].
#[derive(Debug, Clone)]
pub struct BodyWatch<S> {
    inner: S,
}

impl<S> Service<Request<Body>> for BodyWatch<S>
where
    S: Service<Request<Body>>,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = S::Future;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let health = BodyHealth::default();
        let (mut parts, body) = req.into_parts();
        parts.extensions.insert(health.clone());

        let body = Body::new(WatchedBody {
            inner: body,
            health,
        });
        self.inner.call(Request::from_parts(parts, body))
    }
}

pin_project! {
    /// A request body that reports its own failure.
    pub struct WatchedBody<B> {
        #[pin]
        inner: B,
        health: BodyHealth,
    }
}

impl<B> WatchedBody<B> {
    pub fn new(inner: B, health: BodyHealth) -> Self {
        Self { inner, health }
    }
}

impl<B> http_body::Body for WatchedBody<B>
where
    B: http_body::Body<Data = Bytes, Error = Status>,
{
    type Data = Bytes;
    type Error = Status;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Bytes>, Status>>> {
        let this = self.project();
        let frame = ready!(this.inner.poll_frame(cx));
        if let Some(Err(status)) = &frame {
            debug!(code = ?status.code(), message = status.message(), "request body failed");
            this.health.mark_broken();
        }
        Poll::Ready(frame)
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body::Body as _;
    use std::convert::Infallible;
    use std::future::poll_fn;

    /// Yields one data frame, then either ends or fails.
    struct Scripted {
        data: Option<Bytes>,
        fail: Option<Status>,
    }

    impl http_body::Body for Scripted {
        type Data = Bytes;
        type Error = Status;

        fn poll_frame(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
        ) -> Poll<Option<Result<Frame<Bytes>, Status>>> {
            if let Some(data) = self.data.take() {
                return Poll::Ready(Some(Ok(Frame::data(data))));
            }
            Poll::Ready(self.fail.take().map(Err))
        }
    }

    async fn drain<B>(body: B) -> Vec<Result<Frame<Bytes>, Status>>
    where
        B: http_body::Body<Data = Bytes, Error = Status>,
    {
        let mut body = std::pin::pin!(body);
        let mut frames = Vec::new();
        while let Some(frame) = poll_fn(|cx| body.as_mut().poll_frame(cx)).await {
            frames.push(frame);
        }
        frames
    }

    #[tokio::test]
    async fn test_clean_end_leaves_health_intact() {
        let health = BodyHealth::default();
        let body = WatchedBody::new(
            Scripted {
                data: Some(Bytes::from_static(b"ab")),
                fail: None,
            },
            health.clone(),
        );

        let frames = drain(body).await;
        assert_eq!(frames.len(), 1);
        assert!(!health.is_broken());
    }

    #[tokio::test]
    async fn test_reset_marks_broken() {
        let health = BodyHealth::default();
        let body = WatchedBody::new(
            Scripted {
                data: Some(Bytes::from_static(b"ab")),
                fail: Some(Status::cancelled("stream reset")),
            },
            health.clone(),
        );

        let frames = drain(body).await;
        assert_eq!(frames.len(), 2);
        assert!(frames[1].is_err());
        assert!(health.is_broken());
    }

    #[tokio::test]
    async fn test_layer_exposes_health_in_extensions() {
        let inner = tower::service_fn(|req: Request<Body>| async move {
            Ok::<_, Infallible>(req.extensions().get::<BodyHealth>().is_some())
        });
        let mut svc = BodyWatchLayer.layer(inner);

        let seen = svc.call(Request::new(Body::empty())).await.unwrap();
        assert!(seen);
    }
}
