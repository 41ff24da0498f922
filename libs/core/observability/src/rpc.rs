//! Tower layer for automatic gRPC request metrics and span tagging.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;

use metrics::{counter, histogram};
use tower::{Layer, Service};
use tracing::Instrument;

/// Records per-RPC metrics and opens a request-scoped span.
///
/// Applied to a gRPC server stack, this is the stats side of telemetry:
/// - `grpc_requests_total` - Counter with method label
/// - `grpc_request_duration_seconds` - Histogram with method label
///
/// Each call also runs inside a span carrying the fully-qualified method
/// path and a generated request id for cross-service correlation.
#[derive(Clone, Copy, Debug, Default)]
pub struct RpcMetricsLayer;

impl RpcMetricsLayer {
    pub fn new() -> Self {
        Self
    }
}

impl<S> Layer<S> for RpcMetricsLayer {
    type Service = RpcMetrics<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RpcMetrics { inner }
    }
}

#[derive(Clone, Debug)]
pub struct RpcMetrics<S> {
    inner: S,
}

impl<S, ReqBody, ResBody> Service<http::Request<ReqBody>> for RpcMetrics<S>
where
    S: Service<http::Request<ReqBody>, Response = http::Response<ResBody>>,
    S::Future: Send + 'static,
    S::Error: Send + 'static,
    ResBody: 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future =
        Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send + 'static>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: http::Request<ReqBody>) -> Self::Future {
        let method = request.uri().path().to_owned();
        let request_id = uuid::Uuid::new_v4();
        let span = tracing::info_span!(
            "grpc_request",
            method = %method,
            request_id = %request_id
        );
        let start = Instant::now();
        let future = self.inner.call(request);

        Box::pin(async move {
            let result = future.instrument(span).await;
            let duration = start.elapsed();

            counter!("grpc_requests_total", "method" => method.clone()).increment(1);
            histogram!("grpc_request_duration_seconds", "method" => method)
                .record(duration.as_secs_f64());

            result
        })
    }
}
