use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::routing::get;
use core_config::{Environment, ServerConfig};
use server_core::{HttpRoute, HttpServer, Server, ServerError, ShutdownCoordinator};

fn config(port: u16) -> Arc<ServerConfig> {
    Arc::new(
        ServerConfig::new("localhost", port, Environment::Development, "1.0.0")
            .unwrap()
            .with_telemetry(false),
    )
}

async fn spawn_server(
    server: &Arc<HttpServer>,
    coordinator: &ShutdownCoordinator,
) -> tokio::task::JoinHandle<Result<(), ServerError>> {
    let handle = tokio::spawn({
        let server = Arc::clone(server);
        let ctx = coordinator.clone();
        async move { server.listen_and_serve(&ctx).await }
    });
    // Give the accept loop a moment to start.
    tokio::time::sleep(Duration::from_millis(100)).await;
    handle
}

#[tokio::test]
async fn test_health_endpoint_answers_while_serving() {
    let server = Arc::new(HttpServer::new(config(18081)).await.unwrap());
    let addr = server.local_addr();
    let (coordinator, _rx) = ShutdownCoordinator::new();
    let serve = spawn_server(&server, &coordinator).await;

    let response = reqwest::get(format!("http://{addr}/health")).await.unwrap();
    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["version"], "1.0.0");

    coordinator.shutdown();
    let result = tokio::time::timeout(Duration::from_secs(5), serve)
        .await
        .expect("serve wait did not unblock")
        .unwrap();
    assert!(result.is_ok());
    server.close().await.unwrap();
}

#[tokio::test]
async fn test_registered_routes_are_served() {
    let server = Arc::new(HttpServer::new(config(18082)).await.unwrap());
    server.register_routes([
        HttpRoute::new("/ping", get(|| async { "pong" })),
        HttpRoute::new("/version", get(|| async { "1.0.0" })),
    ]);
    let addr = server.local_addr();
    let (coordinator, _rx) = ShutdownCoordinator::new();
    let serve = spawn_server(&server, &coordinator).await;

    let body = reqwest::get(format!("http://{addr}/ping"))
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(body, "pong");

    // The built-in health route survives route registration.
    let health = reqwest::get(format!("http://{addr}/health")).await.unwrap();
    assert_eq!(health.status(), 200);

    coordinator.shutdown();
    serve.await.unwrap().unwrap();
    server.close().await.unwrap();
}

#[tokio::test]
async fn test_cancelled_context_unblocks_within_budget() {
    let server = Arc::new(HttpServer::new(config(18083)).await.unwrap());
    let (coordinator, _rx) = ShutdownCoordinator::new();

    tokio::spawn({
        let coordinator = coordinator.clone();
        async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            coordinator.shutdown();
        }
    });

    let start = Instant::now();
    let result = server.listen_and_serve(&coordinator).await;
    assert!(result.is_ok());
    assert!(start.elapsed() < Duration::from_secs(20));

    server.close().await.unwrap();
}

#[tokio::test]
async fn test_close_twice_is_safe() {
    let server = HttpServer::new(config(18084)).await.unwrap();
    assert!(server.close().await.is_ok());
    // The second close must not panic; it reports the closed state.
    assert!(matches!(server.close().await, Err(ServerError::Closed)));
}

#[tokio::test]
async fn test_metrics_route_present_with_telemetry() {
    let config = Arc::new(
        ServerConfig::new("localhost", 18085, Environment::Development, "1.0.0").unwrap(),
    );
    assert!(config.telemetry);
    let server = Arc::new(HttpServer::new(config).await.unwrap());
    let addr = server.local_addr();
    let (coordinator, _rx) = ShutdownCoordinator::new();
    let serve = spawn_server(&server, &coordinator).await;

    let response = reqwest::get(format!("http://{addr}/metrics")).await.unwrap();
    assert_eq!(response.status(), 200);

    coordinator.shutdown();
    serve.await.unwrap().unwrap();
    server.close().await.unwrap();
}

#[tokio::test]
async fn test_failing_dependency_turns_health_unhealthy() {
    let server = Arc::new(HttpServer::new(config(18086)).await.unwrap());
    server
        .health()
        .register_check("database", || async { Err("connection refused".to_string()) });
    let addr = server.local_addr();
    let (coordinator, _rx) = ShutdownCoordinator::new();
    let serve = spawn_server(&server, &coordinator).await;

    let response = reqwest::get(format!("http://{addr}/health")).await.unwrap();
    assert_eq!(response.status(), 503);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["status"], "unhealthy");
    assert_eq!(body["database"], "down");

    coordinator.shutdown();
    serve.await.unwrap().unwrap();
    server.close().await.unwrap();
}

#[tokio::test]
async fn test_bind_conflict_is_a_construction_error() {
    let first = HttpServer::new(config(18087)).await.unwrap();
    let result = HttpServer::new(config(18087)).await;
    assert!(matches!(result, Err(ServerError::Bind { .. })));
    first.close().await.unwrap();
}
