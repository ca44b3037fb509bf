//! Loopback HTTP/WebSocket surface.
//!
//! ## Endpoints
//!
//! - `GET  /api/drives` - inventory snapshot
//! - `GET  /api/drive/{name}/health` - S.M.A.R.T. prediction
//! - `GET  /api/drive/{id}/wipe-methods` - permitted methods
//! - `POST /api/wipe` - launch a wipe (202, progress over `/ws`)
//! - `POST /api/wipe/pause` - toggle pause for an active wipe
//! - `POST /api/wipe/abort` - abort an active wipe
//! - `POST /api/unmount` - unmount a device and its partitions
//! - `POST /api/certificate/generate` - sign and persist a certificate
//! - `GET  /api/certificates` - list persisted certificates
//! - `WS   /ws` - progress frames for all jobs

mod handlers;
mod websocket;

use axum::{
    Router,
    routing::{get, post},
};
use std::net::SocketAddr;
use tokio::sync::broadcast;

use crate::context::AppContext;

/// Web server for the local UI.
pub struct WebServer {
    bind_addr: SocketAddr,
    ctx: AppContext,
    shutdown_tx: broadcast::Sender<()>,
}

impl WebServer {
    pub fn new(ctx: AppContext, bind_addr: SocketAddr) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            bind_addr,
            ctx,
            shutdown_tx,
        }
    }

    /// Start the web server. Runs until shutdown() is called.
    pub async fn start(&self) -> anyhow::Result<()> {
        let app = Router::new()
            .route("/api/drives", get(handlers::get_drives))
            .route("/api/drive/{name}/health", get(handlers::get_drive_health))
            .route(
                "/api/drive/{id}/wipe-methods",
                get(handlers::get_wipe_methods),
            )
            .route("/api/wipe", post(handlers::start_wipe))
            .route("/api/wipe/pause", post(handlers::pause_wipe))
            .route("/api/wipe/abort", post(handlers::abort_wipe))
            .route("/api/unmount", post(handlers::unmount_device))
            .route(
                "/api/certificate/generate",
                post(handlers::generate_certificate),
            )
            .route("/api/certificates", get(handlers::list_certificates))
            .route("/ws", get(websocket::ws_handler))
            .with_state(self.ctx.clone());

        let listener = tokio::net::TcpListener::bind(self.bind_addr).await?;
        tracing::info!(addr = %self.bind_addr, "dzapd listening");

        let mut shutdown_rx = self.shutdown_tx.subscribe();

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
            })
            .await?;

        Ok(())
    }

    /// Signal the server to shut down gracefully.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}
