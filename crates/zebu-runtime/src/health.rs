//! Liveness and readiness over HTTP

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use zebu_core::{ZebuError, ZebuResult};

use crate::{EngineHealth, HealthSnapshot};

/// `/healthz` and `/readyz` routes over the engine's health counters
pub fn router(health: Arc<EngineHealth>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .with_state(health)
}

async fn healthz(State(health): State<Arc<EngineHealth>>) -> StatusCode {
    if health.is_alive() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn readyz(State(health): State<Arc<EngineHealth>>) -> (StatusCode, Json<HealthSnapshot>) {
    let snapshot = health.snapshot();
    let status = if snapshot.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(snapshot))
}

/// Serve the health routes on `addr` until `cancel` fires
pub async fn serve(
    addr: SocketAddr,
    health: Arc<EngineHealth>,
    cancel: CancellationToken,
) -> ZebuResult<()> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| ZebuError::Transport(format!("bind health endpoint {addr}: {e}")))?;
    serve_on(listener, health, cancel).await
}

/// Serve the health routes on an already bound listener
pub async fn serve_on(
    listener: TcpListener,
    health: Arc<EngineHealth>,
    cancel: CancellationToken,
) -> ZebuResult<()> {
    if let Ok(addr) = listener.local_addr() {
        tracing::info!(%addr, "health endpoint listening");
    }
    axum::serve(listener, router(health))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
        .map_err(|e| ZebuError::Transport(format!("health endpoint: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_handlers_follow_health() {
        let health = Arc::new(EngineHealth::new());
        assert_eq!(healthz(State(health.clone())).await, StatusCode::SERVICE_UNAVAILABLE);

        let (status, Json(snapshot)) = readyz(State(health.clone())).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(!snapshot.ready);
    }

    #[tokio::test]
    async fn test_running_engine_is_healthy() {
        use crate::{ReplicationConfig, ReplicationEngine};
        use zebu_state::{MemoryRecordStorage, RecordDirectory};
        use zebu_transport::MemoryBroadcast;

        let directory = Arc::new(RecordDirectory::new(Arc::new(MemoryRecordStorage::new())));
        let engine = ReplicationEngine::new(
            directory,
            Arc::new(MemoryBroadcast::new()),
            ReplicationConfig::default(),
        );
        let handle = engine.spawn();
        let health = Arc::clone(handle.engine().health());
        assert_eq!(healthz(State(health.clone())).await, StatusCode::OK);

        health.mark_loaded();
        while !health.is_subscribed() {
            tokio::time::sleep(std::time::Duration::from_millis(1)).await;
        }
        let (status, Json(snapshot)) = readyz(State(health.clone())).await;
        assert_eq!(status, StatusCode::OK);
        assert!(snapshot.subscribed);

        handle.shutdown().await;
        assert_eq!(healthz(State(health)).await, StatusCode::SERVICE_UNAVAILABLE);
    }

    async fn get_status(addr: SocketAddr, path: &str) -> String {
        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        let request = format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n");
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        response.lines().next().unwrap_or_default().to_string()
    }

    #[tokio::test]
    async fn test_serve_until_cancelled() {
        let health = Arc::new(EngineHealth::new());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let cancel = CancellationToken::new();
        let server = tokio::spawn(serve_on(listener, health, cancel.clone()));

        assert!(get_status(addr, "/healthz").await.contains("503"));
        assert!(get_status(addr, "/readyz").await.contains("503"));
        assert!(get_status(addr, "/missing").await.contains("404"));

        cancel.cancel();
        server.await.unwrap().unwrap();
    }
}
