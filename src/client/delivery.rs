//! Wiring done by the invocation proxy before a function runs: mint a
//! delivery token only when someone is actually watching.

use crate::client::emitter::LogEmitter;
use crate::client::shipper::WsShipper;
use crate::config::Settings;
use crate::presence::PresenceCache;
use crate::transport::auth::{AuthError, LogScope, mint_token};

/// Where and how the sandbox ships its logs for one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryTarget {
    pub url: String,
    pub token: String,
}

impl DeliveryTarget {
    pub fn emitter(&self, settings: &Settings) -> LogEmitter<WsShipper> {
        LogEmitter::new(
            WsShipper::new(self.url.clone(), self.token.clone()),
            &settings.emitter,
        )
    }
}

/// Returns `None` without minting anything when no live viewer covers the
/// function (or real-time logging is off).
pub fn prepare_delivery(
    cache: &PresenceCache,
    settings: &Settings,
    scope: &LogScope,
    ingest_url: &str,
) -> Result<Option<DeliveryTarget>, AuthError> {
    if !cache.is_logging_enabled(&scope.subscription_id, &scope.boundary_id, &scope.function_id) {
        return Ok(None);
    }

    let token = mint_token(
        scope,
        &settings.server.token_signing_key,
        std::time::Duration::from_secs(settings.emitter.token_expiry_secs),
    )?;
    Ok(Some(DeliveryTarget {
        url: ingest_url.to_string(),
        token,
    }))
}
