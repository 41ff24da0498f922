//! Server lifecycle management for the webshop backend.
//!
//! This crate owns the part of the system that has to be right: binding
//! network listeners, serving HTTP and gRPC traffic, and taking both down
//! again without dropping in-flight work on the floor.
//!
//! - [`HttpServer`] and [`GrpcServer`] bind their listener at construction
//!   and serve on a background task; [`Server::listen_and_serve`] suspends
//!   the caller until the shutdown coordinator fires or the serve loop dies.
//! - [`Server::close`] drains gracefully within a fixed 20 second budget and
//!   falls back to a forced stop when the budget is spent. The gRPC variant
//!   flips its [`HealthRegistry`] to NOT_SERVING before the stop attempt so
//!   health-aware load balancers stop routing first.
//! - [`RecoveryLayer`] converts RPC handler panics into `Internal` statuses
//!   instead of letting one bad handler take the process down.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use core_config::{FromEnv, ServerConfig};
//! use server_core::{HttpServer, Server, ShutdownCoordinator};
//!
//! let config = Arc::new(ServerConfig::from_env()?);
//! let server = HttpServer::new(config).await?;
//!
//! let (coordinator, _rx) = ShutdownCoordinator::new();
//! tokio::spawn({
//!     let coordinator = coordinator.clone();
//!     async move { coordinator.wait_for_signal().await }
//! });
//!
//! server.listen_and_serve(&coordinator).await?;
//! server.close().await?;
//! ```

pub mod base;
pub mod error;
pub mod grpc;
pub mod grpc_health;
pub mod http;
pub mod http_health;
pub mod recovery;
pub mod shutdown;

pub use base::Base;
pub use error::ServerError;
pub use grpc::GrpcServer;
pub use grpc_health::{HealthRegistry, HealthStatus};
pub use self::http::{HttpRoute, HttpServer};
pub use http_health::HealthState;
pub use recovery::RecoveryLayer;
pub use shutdown::{shutdown_signal, ShutdownCoordinator};

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;

/// Lock a std mutex, recovering the guard if a panicking holder poisoned it.
pub(crate) fn lock<T>(mutex: &std::sync::Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Budget for a graceful stop before the forced fallback kicks in.
/// Independent of the caller's context so a stuck drain can never hang the
/// process.
pub(crate) const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(20);

/// The flavor of a running server.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ServerKind {
    Http,
    Grpc,
}

impl fmt::Display for ServerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerKind::Http => f.write_str("http"),
            ServerKind::Grpc => f.write_str("grpc"),
        }
    }
}

/// Capability shared by every server flavor, composed by the supervisor.
#[async_trait]
pub trait Server: Send + Sync {
    fn kind(&self) -> ServerKind;

    /// Serve until the coordinator fires or the accept loop dies.
    ///
    /// The accept loop runs on a background task; this method suspends the
    /// calling task and returns the serve-loop error, if any, once the wait
    /// unblocks. It does not tear the server down - call [`Server::close`]
    /// for that.
    async fn listen_and_serve(&self, ctx: &ShutdownCoordinator) -> Result<(), ServerError>;

    /// Drain and stop the server, forcing termination if the graceful stop
    /// exceeds its budget.
    async fn close(&self) -> Result<(), ServerError>;
}
