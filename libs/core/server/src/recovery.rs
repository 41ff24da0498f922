use std::any::Any;
use std::backtrace::Backtrace;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::FutureExt;
use tonic::body::Body;
use tower::{Layer, Service};
use tracing::error;

/// Panic isolation for the gRPC stack.
///
/// Wraps the whole HTTP/2 service, so one layer covers unary and streaming
/// calls alike. A panic raised by a handler (synchronously or at any await
/// point) is caught, logged with the failing method's fully-qualified path
/// and a captured backtrace, and answered with a trailers-only `Internal`
/// status. The process and every other in-flight call keep running.
#[derive(Clone, Copy, Debug, Default)]
pub struct RecoveryLayer;

impl RecoveryLayer {
    pub fn new() -> Self {
        Self
    }
}

impl<S> Layer<S> for RecoveryLayer {
    type Service = Recovery<S>;

    fn layer(&self, inner: S) -> Self::Service {
        Recovery { inner }
    }
}

#[derive(Clone, Debug)]
pub struct Recovery<S> {
    inner: S,
}

impl<S, ReqBody> Service<http::Request<ReqBody>> for Recovery<S>
where
    S: Service<http::Request<ReqBody>, Response = http::Response<Body>>,
    S::Future: Send + 'static,
    S::Error: Send + 'static,
{
    type Response = http::Response<Body>;
    type Error = S::Error;
    type Future =
        Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send + 'static>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: http::Request<ReqBody>) -> Self::Future {
        let method = request.uri().path().to_owned();

        // A handler can panic while constructing its future, before the
        // first poll.
        let future = match std::panic::catch_unwind(AssertUnwindSafe(|| self.inner.call(request))) {
            Ok(future) => future,
            Err(panic) => {
                let response = recovered(&method, panic);
                return Box::pin(async move { Ok(response) });
            }
        };

        Box::pin(async move {
            match AssertUnwindSafe(future).catch_unwind().await {
                Ok(result) => result,
                Err(panic) => Ok(recovered(&method, panic)),
            }
        })
    }
}

/// Log the recovered panic and produce the trailers-only Internal response.
fn recovered(method: &str, panic: Box<dyn Any + Send>) -> http::Response<Body> {
    let message = panic_message(panic.as_ref());
    let backtrace = Backtrace::force_capture();
    error!(
        method,
        panic = %message,
        backtrace = %backtrace,
        "recovered panic in grpc handler"
    );

    let mut response = http::Response::new(Body::default());
    let headers = response.headers_mut();
    headers.insert(
        tonic::Status::GRPC_STATUS,
        (tonic::Code::Internal as i32).into(),
    );
    headers.insert(
        http::HeaderName::from_static("grpc-message"),
        http::HeaderValue::from_static("internal error"),
    );
    headers.insert(
        http::header::CONTENT_TYPE,
        tonic::metadata::GRPC_CONTENT_TYPE,
    );
    response
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::Infallible;
    use tower::ServiceExt;

    async fn demo_handler(
        request: http::Request<Body>,
    ) -> Result<http::Response<Body>, Infallible> {
        if request.uri().path().ends_with("Boom") {
            panic!("handler exploded");
        }
        Ok(http::Response::new(Body::default()))
    }


    fn request(path: &str) -> http::Request<Body> {
        http::Request::builder()
            .uri(path)
            .body(Body::default())
            .unwrap()
    }

    #[tokio::test]
    async fn test_panicking_call_becomes_internal_status() {
        let mut service = RecoveryLayer::new().layer(tower::service_fn(demo_handler));

        let response = service
            .ready()
            .await
            .unwrap()
            .call(request("/shop.v1.Checkout/Boom"))
            .await
            .unwrap();

        assert_eq!(response.status(), 200);
        let status = response
            .headers()
            .get("grpc-status")
            .unwrap()
            .to_str()
            .unwrap();
        assert_eq!(status, (tonic::Code::Internal as i32).to_string());
    }

    #[tokio::test]
    async fn test_healthy_call_is_untouched() {
        let mut service = RecoveryLayer::new().layer(tower::service_fn(demo_handler));

        let response = service
            .ready()
            .await
            .unwrap()
            .call(request("/shop.v1.Checkout/Purchase"))
            .await
            .unwrap();

        assert_eq!(response.status(), 200);
        assert!(response.headers().get("grpc-status").is_none());
    }

    #[tokio::test]
    async fn test_concurrent_call_survives_a_panicking_neighbor() {
        let service = RecoveryLayer::new().layer(tower::service_fn(demo_handler));
        let mut panicking = service.clone();
        let mut healthy = service;

        let (broken, fine) = tokio::join!(
            async {
                panicking
                    .ready()
                    .await
                    .unwrap()
                    .call(request("/shop.v1.Checkout/Boom"))
                    .await
                    .unwrap()
            },
            async {
                healthy
                    .ready()
                    .await
                    .unwrap()
                    .call(request("/shop.v1.Checkout/Purchase"))
                    .await
                    .unwrap()
            },
        );

        assert!(broken.headers().get("grpc-status").is_some());
        assert!(fine.headers().get("grpc-status").is_none());
    }
}
