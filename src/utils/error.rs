//! Crate-level error type.
//!
//! Subsystems keep their own narrow error enums (`AuthError`, `StoreError`,
//! `ShipError`, `GatewayError`); this one covers process lifecycle and the
//! plumbing errors that bubble up to the binary.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("server is already started")]
    AlreadyStarted,
    #[error("server is not started")]
    NotStarted,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("presence store error: {0}")]
    Store(#[from] crate::presence::StoreError),
    #[error("delivery token error: {0}")]
    Auth(#[from] crate::transport::AuthError),
}

pub type Result<T> = std::result::Result<T, Error>;
