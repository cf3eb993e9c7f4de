//! Subscription gateway: exposes relay subscriptions as HTTP event streams.

pub mod error;
pub mod session;
pub mod sse;

use std::sync::Arc;

use axum::Router;
use axum::routing::get;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::broker::admission::Admission;
use crate::config::GatewaySettings;
use crate::presence::PresenceStore;

pub use error::GatewayError;
pub use session::{CloseReason, Session};

/// Process-wide gateway state shared by every request.
pub struct GatewayState {
    pub relay_url: String,
    pub admission: Admission,
    pub settings: GatewaySettings,
    pub presence: Option<Arc<dyn PresenceStore>>,
    pub shutdown: CancellationToken,
}

impl GatewayState {
    pub fn new(relay_url: impl Into<String>, settings: GatewaySettings) -> Self {
        Self {
            relay_url: relay_url.into(),
            admission: Admission::new(settings.max_connections),
            settings,
            presence: None,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_presence(mut self, store: Arc<dyn PresenceStore>) -> Self {
        self.presence = Some(store);
        self
    }

    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }
}

pub fn router(state: Arc<GatewayState>) -> Router {
    Router::new()
        .route(
            "/v1/account/{account_id}/subscription/{subscription_id}/boundary/{boundary_id}/log",
            get(sse::boundary_logs),
        )
        .route(
            "/v1/account/{account_id}/subscription/{subscription_id}/boundary/{boundary_id}/function/{function_id}/log",
            get(sse::function_logs),
        )
        .with_state(state)
}

/// Serves the gateway until `shutdown` fires. Open streams observe the same
/// token and end themselves, so graceful shutdown does not hang on them.
pub async fn serve(listener: TcpListener, state: Arc<GatewayState>) -> std::io::Result<()> {
    let shutdown = state.shutdown.clone();
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}

#[cfg(test)]
mod tests;
