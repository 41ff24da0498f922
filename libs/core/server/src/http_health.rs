use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use futures::future::join_all;
use serde_json::{json, Value};
use tracing::error;

use crate::lock;

/// How long an aggregate result is reused before the checks run again.
const CACHE_DURATION: Duration = Duration::from_secs(1);
/// Budget for a single dependency check.
const CHECK_TIMEOUT: Duration = Duration::from_secs(10);

/// A boxed future for health checks with a string error
pub type CheckFuture = Pin<Box<dyn Future<Output = Result<(), String>> + Send>>;

type CheckFn = Arc<dyn Fn() -> CheckFuture + Send + Sync>;

/// Aggregated liveness/readiness state behind `GET /health`.
///
/// Dependency checks are registered by name and run concurrently, each
/// bounded by [`CHECK_TIMEOUT`]. The aggregate is cached for
/// [`CACHE_DURATION`] so probe storms cannot amplify into dependency load.
#[derive(Clone)]
pub struct HealthState {
    inner: Arc<HealthInner>,
}

struct HealthInner {
    version: String,
    checks: Mutex<Vec<(String, CheckFn)>>,
    cache: tokio::sync::Mutex<Option<CachedHealth>>,
}

#[derive(Clone)]
struct CachedHealth {
    at: Instant,
    healthy: bool,
    body: Value,
}

impl HealthState {
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(HealthInner {
                version: version.into(),
                checks: Mutex::new(Vec::new()),
                cache: tokio::sync::Mutex::new(None),
            }),
        }
    }

    /// Register a named dependency check.
    ///
    /// # Example
    /// ```ignore
    /// health.register_check("database", move || {
    ///     let db = db.clone();
    ///     async move { db.ping().await.map_err(|e| e.to_string()) }
    /// });
    /// ```
    pub fn register_check<F, Fut>(&self, name: impl Into<String>, check: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), String>> + Send + 'static,
    {
        let boxed: CheckFn = Arc::new(move || Box::pin(check()));
        lock(&self.inner.checks).push((name.into(), boxed));
    }

    /// Run all registered checks (or reuse a fresh cached result) and
    /// produce the response status and body.
    pub async fn evaluate(&self) -> (StatusCode, Value) {
        let mut cache = self.inner.cache.lock().await;
        if let Some(cached) = cache.as_ref() {
            if cached.at.elapsed() < CACHE_DURATION {
                return (status_for(cached.healthy), cached.body.clone());
            }
        }

        let checks = lock(&self.inner.checks).clone();
        let names: Vec<String> = checks.iter().map(|(name, _)| name.clone()).collect();
        let futures: Vec<_> = checks
            .into_iter()
            .map(|(_, check)| {
                let fut = check();
                async move {
                    match tokio::time::timeout(CHECK_TIMEOUT, fut).await {
                        Ok(result) => result,
                        Err(_) => Err(format!("check timed out after {CHECK_TIMEOUT:?}")),
                    }
                }
            })
            .collect();
        let results = join_all(futures).await;

        let mut healthy = true;
        let mut body = json!({
            "version": self.inner.version,
        });
        if let Value::Object(ref mut map) = body {
            for (name, result) in names.into_iter().zip(results) {
                match result {
                    Ok(()) => {
                        map.insert(name, json!("up"));
                    }
                    Err(err) => {
                        error!(check = %name, error = %err, "health check failed");
                        map.insert(name, json!("down"));
                        healthy = false;
                    }
                }
            }
            map.insert(
                "status".to_string(),
                json!(if healthy { "healthy" } else { "unhealthy" }),
            );
        }

        *cache = Some(CachedHealth {
            at: Instant::now(),
            healthy,
            body: body.clone(),
        });

        (status_for(healthy), body)
    }
}

fn status_for(healthy: bool) -> StatusCode {
    if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

/// Health check endpoint handler.
pub async fn health_handler(State(health): State<HealthState>) -> Response {
    let (status, body) = health.evaluate().await;
    (status, Json(body)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_no_checks_is_healthy() {
        let health = HealthState::new("1.0.0");
        let (status, body) = health.evaluate().await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["version"], "1.0.0");
    }

    #[tokio::test]
    async fn test_failing_check_reports_unhealthy() {
        let health = HealthState::new("1.0.0");
        health.register_check("database", || async { Ok(()) });
        health.register_check("cache", || async { Err("connection refused".to_string()) });

        let (status, body) = health.evaluate().await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["status"], "unhealthy");
        assert_eq!(body["database"], "up");
        assert_eq!(body["cache"], "down");
    }

    #[tokio::test]
    async fn test_result_is_cached() {
        let health = HealthState::new("1.0.0");
        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let seen = calls.clone();
        health.register_check("database", move || {
            let seen = seen.clone();
            async move {
                seen.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                Ok(())
            }
        });

        health.evaluate().await;
        health.evaluate().await;
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
