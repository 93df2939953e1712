//! HTTP server lifecycle: bind, serve the API and the built front end,
//! stop on a shutdown signal.
//!
//! bind → spawn background task → return handle with shutdown channel.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::http::{header, HeaderValue};
use axum::Router;
use tokio::sync::oneshot;
use tower_http::services::{ServeDir, ServeFile};
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

use crate::api::router::api_router;
use crate::config::AppConfig;
use crate::core_state::CoreState;

/// Handle to a running server.
pub struct ApiServer {
    pub addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl ApiServer {
    /// Signal graceful shutdown. Safe to call more than once.
    pub fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
            tracing::info!("server shutdown signal sent");
        }
    }

    /// Wait for the server task to finish.
    pub async fn stopped(&mut self) {
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::error!("server task failed: {e}");
            }
        }
    }
}

/// API under `/api`, with the front end (if any) as fallback. Unknown
/// front-end paths get `index.html` so client-side routes resolve.
pub fn app(core: Arc<CoreState>, static_dir: Option<&Path>) -> Router {
    let api = api_router(core).layer(SetResponseHeaderLayer::overriding(
        header::CACHE_CONTROL,
        HeaderValue::from_static("no-store"),
    ));

    let app = match static_dir {
        Some(dir) => {
            let index = ServeFile::new(dir.join("index.html"));
            api.fallback_service(ServeDir::new(dir).not_found_service(index))
        }
        None => api,
    };
    app.layer(TraceLayer::new_for_http())
}

/// Bind `addr` and serve in a background task.
pub async fn start_server(
    core: Arc<CoreState>,
    addr: SocketAddr,
    static_dir: Option<PathBuf>,
) -> Result<ApiServer, String> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| format!("Failed to bind {addr}: {e}"))?;
    let addr = listener
        .local_addr()
        .map_err(|e| format!("Failed to get server address: {e}"))?;

    if let Some(dir) = &static_dir {
        tracing::info!(dir = %dir.display(), "serving front end");
    }
    let app = app(core, static_dir.as_deref());

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let task = tokio::spawn(async move {
        let shutdown_signal = async move {
            let _ = shutdown_rx.await;
            tracing::info!("server received shutdown signal");
        };

        tracing::info!(%addr, "server started");
        let service = app.into_make_service_with_connect_info::<SocketAddr>();
        if let Err(e) = axum::serve(listener, service)
            .with_graceful_shutdown(shutdown_signal)
            .await
        {
            tracing::error!("server error: {e}");
        }
        tracing::info!("server stopped");
    });

    Ok(ApiServer {
        addr,
        shutdown_tx: Some(shutdown_tx),
        task: Some(task),
    })
}

/// Serve until Ctrl-C.
pub async fn serve(core: Arc<CoreState>, config: &AppConfig) -> Result<(), String> {
    let mut server = start_server(core, config.bind, config.static_dir.clone()).await?;
    tracing::info!(addr = %server.addr, "{} listening", crate::config::APP_NAME);

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("cannot listen for Ctrl-C: {e}");
    }
    server.shutdown();
    server.stopped().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    use crate::core_state::testing::state_over;
    use crate::gateway::local::testing::Fixture;

    fn loopback() -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0)
    }

    #[tokio::test]
    async fn serves_api_on_ephemeral_port() {
        let t = state_over(Fixture::new().gw);
        let mut server = start_server(t.state.clone(), loopback(), None)
            .await
            .expect("server should start");
        assert!(server.addr.port() > 0);

        let url = format!("http://{}/api/health", server.addr);
        let resp = reqwest::get(&url).await.unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::OK);
        assert_eq!(
            resp.headers().get("cache-control").unwrap(),
            "no-store"
        );

        let resp = reqwest::get(format!("http://{}/nonexistent", server.addr))
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::NOT_FOUND);

        server.shutdown();
        server.stopped().await;
    }

    #[tokio::test]
    async fn front_end_routes_fall_back_to_index() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("index.html"), "<div id=app></div>").unwrap();

        let t = state_over(Fixture::new().gw);
        let mut server = start_server(t.state.clone(), loopback(), Some(dir.path().to_path_buf()))
            .await
            .expect("server should start");

        let body = reqwest::get(format!("http://{}/admin/clients", server.addr))
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert!(body.contains("id=app"));

        server.shutdown();
        server.stopped().await;
    }

    #[tokio::test]
    async fn shutdown_is_idempotent() {
        let t = state_over(Fixture::new().gw);
        let mut server = start_server(t.state.clone(), loopback(), None)
            .await
            .expect("server should start");
        server.shutdown();
        server.shutdown();
        server.stopped().await;
    }
}
