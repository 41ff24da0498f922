use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use core_config::ServerConfig;
use observability::RpcMetricsLayer;
use tokio::sync::{broadcast, watch};
use tokio::task::AbortHandle;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::body::Body;
use tonic::server::NamedService;
use tonic::service::Routes;
use tonic::transport::Server as TransportServer;
use tower::Service;
use tracing::{debug, error, info, warn};

use crate::base::Base;
use crate::error::ServerError;
use crate::grpc_health::{HealthRegistry, HealthStatus};
use crate::recovery::RecoveryLayer;
use crate::shutdown::ShutdownCoordinator;
use crate::{lock, Server, ServerKind, SHUTDOWN_TIMEOUT};

/// gRPC server over a listener bound at construction.
///
/// Comes with the standard `grpc.health.v1.Health` service (overall status
/// SERVING from the start), server reflection, and panic isolation for
/// every registered handler. Application services are added through
/// [`GrpcServer::register_service`] before serving starts.
pub struct GrpcServer {
    base: Base,
    local_addr: SocketAddr,
    health: HealthRegistry,
    routes: Mutex<Option<Routes>>,
    graceful_tx: broadcast::Sender<()>,
    done_tx: Mutex<Option<watch::Sender<bool>>>,
    done_rx: watch::Receiver<bool>,
    abort: Mutex<Option<AbortHandle>>,
    serve_error: Arc<Mutex<Option<tonic::transport::Error>>>,
    started: AtomicBool,
    closed: AtomicBool,
}

impl GrpcServer {
    /// Validate the config, bind the listener, and register the built-in
    /// health and reflection services.
    pub async fn new(config: Arc<ServerConfig>) -> Result<Self, ServerError> {
        let base = Base::new(config)?;
        let local_addr = base.bind().await?;

        let (reporter, health_service) = tonic_health::server::health_reporter();
        let reflection_service = tonic_reflection::server::Builder::configure()
            .register_encoded_file_descriptor_set(tonic_health::pb::FILE_DESCRIPTOR_SET)
            .build_v1()
            .map_err(|err| ServerError::Reflection(err.to_string()))?;

        let routes = Routes::new(health_service).add_service(reflection_service);

        let health = HealthRegistry::new(reporter);
        health.set_status("", HealthStatus::Serving).await;

        let (graceful_tx, _) = broadcast::channel(1);
        let (done_tx, done_rx) = watch::channel(false);

        info!(
            addr = %local_addr,
            telemetry = base.telemetry_enabled(),
            "grpc server initialized, health and reflection registered"
        );

        Ok(Self {
            base,
            local_addr,
            health,
            routes: Mutex::new(Some(routes)),
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

    /// Add a service to the underlying registrar.
    ///
    /// Must be called before [`Server::listen_and_serve`], per the usual
    /// framework convention; registrations after serving started are
    /// dropped with a warning.
    pub fn register_service<S>(&self, service: S)
    where
        S: Service<http::Request<Body>, Response = http::Response<Body>, Error = Infallible>
            + NamedService
            + Clone
            + Send
            + Sync
            + 'static,
        S::Future: Send + 'static,
    {
        let mut routes = lock(&self.routes);
        match routes.take() {
            Some(existing) => {
                *routes = Some(existing.add_service(service));
                info!(service = S::NAME, "grpc service registered");
            }
            None => {
                warn!(
                    service = S::NAME,
                    "cannot register a service after serving started"
                );
            }
        }
    }

    /// Update the health status of one service; the empty name denotes the
    /// whole server. Observable immediately to `Check` and `Watch` clients.
    pub async fn set_health_status(&self, service: &str, status: HealthStatus) {
        self.health.set_status(service, status).await;
    }

    /// Last health status set for a service.
    pub fn health_status(&self, service: &str) -> Option<HealthStatus> {
        self.health.status(service)
    }

    async fn serve(&self, ctx: &ShutdownCoordinator) -> Result<(), ServerError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ServerError::Closed);
        }
        let listener = self.base.take_listener().ok_or(ServerError::AlreadyServing)?;
        let routes = lock(&self.routes)
            .take()
            .ok_or(ServerError::AlreadyServing)?;
        let done_tx = lock(&self.done_tx)
            .take()
            .ok_or(ServerError::AlreadyServing)?;
        self.started.store(true, Ordering::SeqCst);

        let incoming = TcpListenerStream::new(listener);
        let mut graceful = self.graceful_tx.subscribe();
        let shutdown = async move {
            let _ = graceful.recv().await;
        };
        let telemetry = self.base.telemetry_enabled();
        let serve_error = Arc::clone(&self.serve_error);

        let handle = tokio::spawn(async move {
            let result = if telemetry {
                TransportServer::builder()
                    .layer(RecoveryLayer::new())
                    .layer(RpcMetricsLayer::new())
                    .add_routes(routes)
                    .serve_with_incoming_shutdown(incoming, shutdown)
                    .await
            } else {
                TransportServer::builder()
                    .layer(RecoveryLayer::new())
                    .add_routes(routes)
                    .serve_with_incoming_shutdown(incoming, shutdown)
                    .await
            };
            if let Err(err) = result {
                error!(error = %err, "grpc server terminated with an error");
                *lock(&serve_error) = Some(err);
            }
            let _ = done_tx.send(true);
        });
        *lock(&self.abort) = Some(handle.abort_handle());

        let mut done = self.done_rx.clone();
        tokio::select! {
            _ = ctx.cancelled() => {
                info!("shutdown requested, grpc serve wait unblocked");
            }
            _ = done.wait_for(|finished| *finished) => {}
        }

        match lock(&self.serve_error).take() {
            Some(err) => Err(ServerError::Transport(err)),
            None => Ok(()),
        }
    }

    async fn stop(&self) -> Result<(), ServerError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            debug!("grpc server already closed");
            return Ok(());
        }

        // Flip health first so health-aware clients stop routing new
        // traffic before the transport goes away.
        self.health.shutdown().await;

        if self.started.load(Ordering::SeqCst) {
            let _ = self.graceful_tx.send(());
            let mut done = self.done_rx.clone();
            let drained =
                tokio::time::timeout(SHUTDOWN_TIMEOUT, done.wait_for(|finished| *finished)).await;
            if drained.is_err() {
                warn!(
                    timeout = ?SHUTDOWN_TIMEOUT,
                    "graceful stop timed out, aborting in-flight rpcs"
                );
                if let Some(abort) = lock(&self.abort).take() {
                    abort.abort();
                }
            }
        }

        if self.base.take_listener().is_some() {
            debug!("released unused grpc listener");
        }
        self.base.close_telemetry();
        info!("grpc server closed");

        // Forced stop already made the server unreachable; teardown
        // details were logged above.
        Ok(())
    }
}

#[async_trait]
impl Server for GrpcServer {
    fn kind(&self) -> ServerKind {
        ServerKind::Grpc
    }

    async fn listen_and_serve(&self, ctx: &ShutdownCoordinator) -> Result<(), ServerError> {
        self.serve(ctx).await
    }

    async fn close(&self) -> Result<(), ServerError> {
        self.stop().await
    }
}
