use std::io;

use core_config::ConfigErrors;
use observability::TelemetryError;
use thiserror::Error;

/// Errors produced while constructing or running a server.
#[derive(Error, Debug)]
pub enum ServerError {
    /// The configuration failed validation. Carries every violation.
    #[error("invalid server configuration: {0}")]
    Config(#[from] ConfigErrors),

    /// Telemetry initialization failed during base construction.
    #[error(transparent)]
    Telemetry(#[from] TelemetryError),

    /// The listener could not be bound. The source error is the network
    /// stack's, unchanged.
    #[error("failed to bind listener on {addr}: {source}")]
    Bind { addr: String, source: io::Error },

    /// The reflection service descriptor set could not be registered.
    #[error("failed to build reflection service: {0}")]
    Reflection(String),

    /// `listen_and_serve` was called twice, or after the listener was
    /// already consumed.
    #[error("server is already listening")]
    AlreadyServing,

    /// The server was closed; further lifecycle calls are refused.
    #[error("server already closed")]
    Closed,

    /// The HTTP accept loop terminated with an error.
    #[error("http serve loop failed: {0}")]
    Serve(#[source] io::Error),

    /// The gRPC transport terminated with an error.
    #[error("grpc transport failed: {0}")]
    Transport(#[source] tonic::transport::Error),
}
