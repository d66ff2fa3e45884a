//! HTTP layer.
//!
//! Thin axum handlers over the application context: the HDHomeRun
//! facade for DVR auto-discovery, the merged playlist/guide file
//! endpoints, the proxied stream endpoint, and a small admin API.

pub mod handlers;
pub mod hdhr;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::buffer::StreamManager;
use crate::context::AppContext;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub context: Arc<AppContext>,
    pub streams: Arc<StreamManager>,
}

pub struct WebServer {
    app: Router,
    addr: SocketAddr,
}

impl WebServer {
    pub fn new(context: Arc<AppContext>, streams: Arc<StreamManager>) -> Result<Self> {
        let addr: SocketAddr = format!("0.0.0.0:{}", context.system.port).parse()?;
        let app = Self::create_router(AppState { context, streams });
        Ok(Self { app, addr })
    }

    fn create_router(state: AppState) -> Router {
        Router::new()
            // HDHomeRun emulation
            .route("/discover.json", get(hdhr::discover))
            .route("/lineup.json", get(hdhr::lineup))
            .route("/lineup_status.json", get(hdhr::lineup_status))
            .route("/device.xml", get(hdhr::device_xml))
            // Merged outputs
            .route("/m3u/:file", get(handlers::serve_m3u))
            .route("/xmltv/:file", get(handlers::serve_xmltv))
            // Proxied streams
            .route("/stream/:url_id", get(handlers::stream))
            // Admin API
            .route("/api/status", get(handlers::status))
            .route("/api/log", get(handlers::event_log))
            .route("/api/update", post(handlers::trigger_update))
            .layer(CorsLayer::permissive())
            .with_state(state)
    }

    pub async fn serve(self) -> Result<()> {
        info!("web server listening on {}", self.addr);
        let listener = tokio::net::TcpListener::bind(&self.addr).await?;
        axum::serve(listener, self.app).await?;
        Ok(())
    }

    /// Router for tests: serve on an ephemeral port.
    pub fn router(context: Arc<AppContext>, streams: Arc<StreamManager>) -> Router {
        Self::create_router(AppState { context, streams })
    }
}
