use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::routing::{get, MethodRouter};
use axum::Router;
use core_config::ServerConfig;
use tokio::sync::{broadcast, watch};
use tokio::task::AbortHandle;
use tower_http::compression::CompressionLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::{error, info, warn, Level};

use crate::base::Base;
use crate::error::ServerError;
use crate::http_health::{health_handler, HealthState};
use crate::shutdown::ShutdownCoordinator;
use crate::{lock, Server, ServerKind, SHUTDOWN_TIMEOUT};

/// Deadline for producing a full response.
const WRITE_TIMEOUT: Duration = Duration::from_secs(30);

/// A path pattern together with the handler serving it.
pub struct HttpRoute {
    pub path: String,
    pub handler: MethodRouter,
}

impl HttpRoute {
    pub fn new(path: impl Into<String>, handler: MethodRouter) -> Self {
        Self {
            path: path.into(),
            handler,
        }
    }
}

/// HTTP server over a listener bound at construction.
///
/// The router always carries `GET /health` (and `GET /metrics` when
/// telemetry is enabled); application routes are added through
/// [`HttpServer::register_routes`] before serving starts.
pub struct HttpServer {
    base: Base,
    local_addr: SocketAddr,
    health: HealthState,
    router: Mutex<Router>,
    graceful_tx: broadcast::Sender<()>,
    done_tx: Mutex<Option<watch::Sender<bool>>>,
    done_rx: watch::Receiver<bool>,
    abort: Mutex<Option<AbortHandle>>,
    serve_error: Arc<Mutex<Option<io::Error>>>,
    started: AtomicBool,
    closed: AtomicBool,
}

impl HttpServer {
    /// Validate the config, bind the listener, and prepare the default
    /// router.
    pub async fn new(config: Arc<ServerConfig>) -> Result<Self, ServerError> {
        let base = Base::new(config)?;
        let local_addr = base.bind().await?;
        let health = HealthState::new(base.config.version.as_str());
        let router = compose_router(&base, &health, &[]);

        let (graceful_tx, _) = broadcast::channel(1);
        let (done_tx, done_rx) = watch::channel(false);

        info!(addr = %local_addr, "http server initialized");

        Ok(Self {
            base,
            local_addr,
            health,
            router: Mutex::new(router),
            graceful_tx,
            done_tx: Mutex::new(Some(done_tx)),
            done_rx,
            abort: Mutex::new(None),
            serve_error: Arc::new(Mutex::new(None)),
            started: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        })
    }

    /// The address the listener actually bound.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Liveness state backing `GET /health`; register dependency checks
    /// here.
    pub fn health(&self) -> &HealthState {
        &self.health
    }

    /// Replace the active handler with a composed router over the given
    /// routes.
    ///
    /// The built-in health (and metrics) routes are always re-added. Must
    /// be called before [`Server::listen_and_serve`]; the serve loop snapshots
    /// the router when it starts.
    pub fn register_routes(&self, routes: impl IntoIterator<Item = HttpRoute>) {
        let routes: Vec<HttpRoute> = routes.into_iter().collect();
        let composed = compose_router(&self.base, &self.health, &routes);
        *lock(&self.router) = composed;
        info!(routes = routes.len(), "http routes registered");
    }

    async fn serve(&self, ctx: &ShutdownCoordinator) -> Result<(), ServerError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ServerError::Closed);
        }
        let listener = self.base.take_listener().ok_or(ServerError::AlreadyServing)?;
        let done_tx = lock(&self.done_tx)
            .take()
            .ok_or(ServerError::AlreadyServing)?;
        self.started.store(true, Ordering::SeqCst);

        let app = lock(&self.router).clone();
        let mut graceful = self.graceful_tx.subscribe();
        let serve_error = Arc::clone(&self.serve_error);

        let handle = tokio::spawn(async move {
            let result = axum::serve(listener, app.into_make_service())
                .with_graceful_shutdown(async move {
                    let _ = graceful.recv().await;
                })
                .await;
            if let Err(err) = result {
                error!(error = %err, "http server terminated with an error");
                *lock(&serve_error) = Some(err);
            }
            let _ = done_tx.send(true);
        });
        *lock(&self.abort) = Some(handle.abort_handle());

        let mut done = self.done_rx.clone();
        tokio::select! {
            _ = ctx.cancelled() => {
                info!("shutdown requested, http serve wait unblocked");
            }
            _ = done.wait_for(|finished| *finished) => {}
        }

        match lock(&self.serve_error).take() {
            Some(err) => Err(ServerError::Serve(err)),
            None => Ok(()),
        }
    }

    async fn shutdown(&self) -> Result<(), ServerError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            warn!("http server close called twice");
            return Err(ServerError::Closed);
        }

        if self.started.load(Ordering::SeqCst) {
            let _ = self.graceful_tx.send(());
            let mut done = self.done_rx.clone();
            let drained =
                tokio::time::timeout(SHUTDOWN_TIMEOUT, done.wait_for(|finished| *finished)).await;
            if drained.is_err() {
                warn!(
                    timeout = ?SHUTDOWN_TIMEOUT,
                    "graceful shutdown timed out, forcing http server to stop"
                );
                if let Some(abort) = lock(&self.abort).take() {
                    abort.abort();
                }
            }
        }

        // Release the listener if serving never consumed it.
        drop(self.base.take_listener());
        self.base.close_telemetry();
        info!("http server closed");

        Ok(())
    }
}

#[async_trait]
impl Server for HttpServer {
    fn kind(&self) -> ServerKind {
        ServerKind::Http
    }

    async fn listen_and_serve(&self, ctx: &ShutdownCoordinator) -> Result<(), ServerError> {
        self.serve(ctx).await
    }

    async fn close(&self) -> Result<(), ServerError> {
        self.shutdown().await
    }
}

/// Build the full router: built-in routes, application routes, then the
/// cross-cutting layers. Telemetry layers are added only when enabled and
/// change observability, never response semantics.
fn compose_router(base: &Base, health: &HealthState, routes: &[HttpRoute]) -> Router {
    let mut router = Router::new()
        .route("/health", get(health_handler))
        .with_state(health.clone());

    if base.telemetry_enabled() {
        router = router.route("/metrics", get(observability::metrics_handler));
    }

    for route in routes {
        router = router.route(&route.path, route.handler.clone());
    }

    if base.telemetry_enabled() {
        router = router
            .layer(axum::middleware::from_fn(observability::metrics_middleware))
            .layer(
                TraceLayer::new_for_http()
                    .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                    .on_response(DefaultOnResponse::new().level(Level::INFO)),
            );
    }

    router
        .layer(TimeoutLayer::new(WRITE_TIMEOUT))
        .layer(CompressionLayer::new())
}
