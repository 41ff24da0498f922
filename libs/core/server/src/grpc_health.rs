use std::collections::HashMap;
use std::sync::Mutex;

use tonic_health::server::HealthReporter;
use tracing::{debug, info};

use crate::lock;

/// Serving status of one service, as exposed over the standard
/// `grpc.health.v1.Health` protocol. Unregistered names answer
/// SERVICE_UNKNOWN on the wire without appearing here.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HealthStatus {
    Unknown,
    Serving,
    NotServing,
}

impl From<HealthStatus> for tonic_health::ServingStatus {
    fn from(status: HealthStatus) -> Self {
        match status {
            HealthStatus::Unknown => tonic_health::ServingStatus::Unknown,
            HealthStatus::Serving => tonic_health::ServingStatus::Serving,
            HealthStatus::NotServing => tonic_health::ServingStatus::NotServing,
        }
    }
}

/// Per-service serving-status table behind the health-check protocol.
///
/// Wraps tonic-health's reporter (which feeds `Check` and the streaming
/// `Watch`) and mirrors the last-set status per name, so the owning server
/// can flip every known service during shutdown and inspect statuses
/// without a wire round-trip. Safe for concurrent writers and readers.
pub struct HealthRegistry {
    reporter: HealthReporter,
    statuses: Mutex<HashMap<String, HealthStatus>>,
}

impl HealthRegistry {
    pub(crate) fn new(reporter: HealthReporter) -> Self {
        Self {
            reporter,
            statuses: Mutex::new(HashMap::new()),
        }
    }

    /// Update one service's status. The empty name denotes overall server
    /// health. Visible immediately to `Check` calls and pushed to every
    /// active `Watch` stream for the name.
    pub async fn set_status(&self, service: &str, status: HealthStatus) {
        lock(&self.statuses).insert(service.to_string(), status);
        self.reporter
            .set_service_status(service, status.into())
            .await;
        debug!(service, ?status, "health status updated");
    }

    /// Last status set for a service, if it was ever registered.
    pub fn status(&self, service: &str) -> Option<HealthStatus> {
        lock(&self.statuses).get(service).copied()
    }

    /// Move every known service (the overall entry included) to
    /// NOT_SERVING, waking all watch subscribers.
    ///
    /// Called at the start of server close so health-aware clients stop
    /// routing before the transport goes away. Safe to call when no client
    /// ever connected, and safe to call twice.
    pub async fn shutdown(&self) {
        let names: Vec<String> = {
            let mut statuses = lock(&self.statuses);
            for status in statuses.values_mut() {
                *status = HealthStatus::NotServing;
            }
            statuses
                .entry(String::new())
                .or_insert(HealthStatus::NotServing);
            statuses.keys().cloned().collect()
        };

        for name in &names {
            self.reporter
                .set_service_status(name, tonic_health::ServingStatus::NotServing)
                .await;
        }

        info!(
            services = names.len(),
            "health registry shut down, all services NOT_SERVING"
        );
    }
}
