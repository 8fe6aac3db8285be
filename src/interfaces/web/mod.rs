mod error;
mod handlers;
mod router;

use std::convert::Infallible;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
};
use tokio::sync::broadcast;
use tokio_stream::Stream;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::core::orchestrator::JobService;

pub struct ApiServerConfig {
    pub service: JobService,
    pub log_tx: broadcast::Sender<String>,
    pub host: String,
    pub port: u16,
    pub heartbeat: Duration,
    pub cors_origins: Vec<String>,
}

pub struct ApiServer {
    state: AppState,
    host: String,
    port: u16,
}

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) service: JobService,
    pub(crate) log_tx: broadcast::Sender<String>,
    pub(crate) heartbeat: Duration,
    pub(crate) cors_origins: Vec<String>,
}

impl ApiServer {
    pub fn new(config: ApiServerConfig) -> Self {
        Self {
            state: AppState {
                service: config.service,
                log_tx: config.log_tx,
                heartbeat: config.heartbeat,
                cors_origins: config.cors_origins,
            },
            host: config.host,
            port: config.port,
        }
    }

    /// Serve until `shutdown` fires. In-flight requests are allowed to finish;
    /// open SSE streams are dropped.
    pub async fn serve(self, shutdown: CancellationToken) -> Result<()> {
        let addr = format!("{}:{}", self.host, self.port);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .with_context(|| format!("Failed to bind API server to {}", addr))?;
        let app = router::build_api_router(self.state);

        info!("API Server running at http://{addr}");
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
            .context("API Server crashed")?;
        info!("API Server stopped");
        Ok(())
    }
}

// --- SSE Logs (used by router) ---

async fn sse_logs_endpoint(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let receiver = state.log_tx.subscribe();
    let stream = BroadcastStream::new(receiver).map(|msg| match msg {
        Ok(line) => Ok(Event::default().data(line)),
        Err(_) => Ok(Event::default().data("Log stream lagged")),
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}
