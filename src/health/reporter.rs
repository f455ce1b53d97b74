//! Server side of the probe contract.
//!
//! Every service instance runs a reporter listing the names it serves, so
//! the health engine can tell "alive and serving orders" from "something
//! else answered on this port".

use axum::{extract::State, routing::post, Json, Router};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::trace::TraceLayer;

use crate::health::probe::{PingRequest, PingResponse, PING_PATH};

/// Answers pings for a fixed set of service names.
#[derive(Debug, Clone, Default)]
pub struct HealthReporter {
    services: Arc<HashSet<String>>,
}

impl HealthReporter {
    pub fn new<I, S>(services: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            services: Arc::new(services.into_iter().map(Into::into).collect()),
        }
    }

    pub fn ping(&self, request: &PingRequest) -> PingResponse {
        PingResponse {
            ok: self.services.contains(&request.ping_service),
        }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route(PING_PATH, post(ping_handler))
            .with_state(self.clone())
            .layer(TraceLayer::new_for_http())
    }

    /// Serve until a shutdown signal arrives.
    pub async fn serve(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> std::io::Result<()> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, services = self.services.len(), "Health reporter listening");

        axum::serve(listener, self.router())
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
            })
            .await?;

        tracing::info!("Health reporter stopped");
        Ok(())
    }
}

async fn ping_handler(
    State(reporter): State<HealthReporter>,
    Json(request): Json<PingRequest>,
) -> Json<PingResponse> {
    Json(reporter.ping(&request))
}
