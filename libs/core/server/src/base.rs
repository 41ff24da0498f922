use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use core_config::ServerConfig;
use observability::Telemetry;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::error::ServerError;
use crate::lock;

/// Shared setup for any concrete server flavor.
///
/// Holds the validated config, the telemetry handle (owned, closed once
/// during teardown), and the listener slot. The slot transitions from unset
/// to bound exactly once, during concrete server construction, and is taken
/// by the serve loop.
pub struct Base {
    pub(crate) config: Arc<ServerConfig>,
    pub(crate) telemetry: Option<Telemetry>,
    listener: Mutex<Option<TcpListener>>,
}

impl Base {
    /// Validate the config and prepare the shared context.
    ///
    /// Fails with the joined validation error when the config is invalid;
    /// a telemetry initialization failure propagates unchanged.
    pub fn new(config: Arc<ServerConfig>) -> Result<Self, ServerError> {
        config.validate()?;

        let telemetry = if config.telemetry {
            Some(Telemetry::new("server", config.version.as_str())?)
        } else {
            None
        };

        Ok(Self {
            config,
            telemetry,
            listener: Mutex::new(None),
        })
    }

    /// Bind the TCP listener on the configured address.
    ///
    /// Bind errors carry the network stack's error verbatim.
    pub(crate) async fn bind(&self) -> Result<SocketAddr, ServerError> {
        let addr = self.config.address();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.clone(),
                source,
            })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| ServerError::Bind { addr, source })?;

        *lock(&self.listener) = Some(listener);
        info!(addr = %local_addr, "listener bound");

        Ok(local_addr)
    }

    /// Move the bound listener out, leaving the slot empty.
    pub(crate) fn take_listener(&self) -> Option<TcpListener> {
        lock(&self.listener).take()
    }

    pub(crate) fn telemetry_enabled(&self) -> bool {
        self.telemetry.is_some()
    }

    /// Close the owned telemetry handle. Idempotent via the handle itself.
    pub(crate) fn close_telemetry(&self) {
        if let Some(telemetry) = &self.telemetry {
            if let Err(err) = telemetry.close() {
                warn!(error = %err, "failed to close telemetry");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_config::Environment;

    fn config(port: u16) -> Arc<ServerConfig> {
        Arc::new(
            ServerConfig::new("localhost", port, Environment::Development, "1.0.0")
                .unwrap()
                .with_telemetry(false),
        )
    }

    #[test]
    fn test_new_refuses_invalid_config() {
        let valid = ServerConfig::new("localhost", 8080, Environment::Development, "1.0.0").unwrap();
        let invalid = Arc::new(ServerConfig {
            port: core_config::Port::new(80),
            ..valid
        });
        let result = Base::new(invalid);
        assert!(matches!(result, Err(ServerError::Config(_))));
    }

    #[tokio::test]
    async fn test_bind_takes_listener_once() {
        let base = Base::new(config(18070)).unwrap();
        base.bind().await.unwrap();
        assert!(base.take_listener().is_some());
        assert!(base.take_listener().is_none());
    }

    #[tokio::test]
    async fn test_bind_error_carries_address() {
        let base = Base::new(config(18071)).unwrap();
        let addr = base.bind().await.unwrap();
        // Second bind on the same port fails with the bind error.
        let other = Base::new(config(addr.port())).unwrap();
        let err = other.bind().await.unwrap_err();
        assert!(matches!(err, ServerError::Bind { .. }));
    }
}
