//! Server initialization and lifecycle management
//!
//! This module handles all supervisor setup:
//! - Tracing initialization
//! - Configuration loading and validation
//! - HTTP and gRPC server construction
//! - Signal handling and coordinated teardown

use std::sync::Arc;

use core_config::{app_info, Environment, FromEnv, ServerConfig};
use eyre::{Result, WrapErr};
use server_core::{GrpcServer, HttpServer, Server, ShutdownCoordinator};
use tracing::{error, info};

use crate::routes;

/// Run the webshop backend.
///
/// This is the main entry point for process initialization. It:
/// 1. Sets up structured logging (env-aware: JSON for prod, pretty for dev)
/// 2. Loads the validated server configuration from the environment
/// 3. Starts the HTTP server and the gRPC server, each on its own task
/// 4. Waits for SIGINT/SIGTERM or a fatal serve error, then closes both
///    within the shutdown budget
///
/// # Errors
///
/// Returns an error if:
/// - Configuration is invalid (every violation is reported)
/// - Either listener fails to bind
/// - A serve loop terminates with a transport error
pub async fn run() -> Result<()> {
    // Initialize tracing (env-aware: JSON for prod, pretty for dev)
    let environment = Environment::from_env().wrap_err("Failed to resolve runtime environment")?;
    core_config::tracing::init_tracing(&environment);

    let config =
        Arc::new(ServerConfig::from_env().wrap_err("Failed to load server configuration")?);
    info!(
        addr = %config.address(),
        env = %config.env,
        version = %config.version,
        telemetry = config.telemetry,
        "Starting webshop backend"
    );

    let http = Arc::new(
        HttpServer::new(Arc::clone(&config))
            .await
            .wrap_err("Failed to initialize http server")?,
    );
    http.register_routes(routes::routes(app_info!()));

    // The gRPC listener sits one port above the HTTP listener.
    let grpc_config = Arc::new(
        ServerConfig::new(
            config.addr.as_str(),
            config.port.get() + 1,
            config.env,
            config.version.as_str(),
        )
        .wrap_err("Failed to derive grpc server configuration")?
        .with_telemetry(config.telemetry),
    );
    let grpc = Arc::new(
        GrpcServer::new(grpc_config)
            .await
            .wrap_err("Failed to initialize grpc server")?,
    );

    let (coordinator, _rx) = ShutdownCoordinator::new();
    tokio::spawn({
        let coordinator = coordinator.clone();
        async move { coordinator.wait_for_signal().await }
    });

    let servers: Vec<Arc<dyn Server>> = vec![http as Arc<dyn Server>, grpc as Arc<dyn Server>];

    let mut serve_tasks = tokio::task::JoinSet::new();
    for server in &servers {
        let server = Arc::clone(server);
        let ctx = coordinator.clone();
        serve_tasks.spawn(async move {
            let kind = server.kind();
            (kind, server.listen_and_serve(&ctx).await)
        });
    }

    let mut first_failure = None;
    while let Some(joined) = serve_tasks.join_next().await {
        match joined {
            Ok((kind, Ok(()))) => {
                info!(server = %kind, "serve loop finished");
            }
            Ok((kind, Err(err))) => {
                error!(server = %kind, error = %err, "server failed, shutting the process down");
                if first_failure.is_none() {
                    first_failure = Some(eyre::Report::new(err));
                }
            }
            Err(err) => {
                error!(error = %err, "server task aborted unexpectedly");
            }
        }
        // Any serve loop exiting drains the rest.
        coordinator.shutdown();
    }

    for server in &servers {
        if let Err(err) = server.close().await {
            error!(server = %server.kind(), error = %err, "failed to close server");
        }
    }

    info!("Webshop backend stopped");

    match first_failure {
        Some(report) => Err(report.wrap_err("a server terminated abnormally")),
        None => Ok(()),
    }
}
