//! Network edges of the broker.
//!
//! - `ingest`: WebSocket endpoint where sandboxes publish log frames under the
//!   topic their delivery token grants.
//! - `relay`: WebSocket endpoint where subscribers register topic filters and
//!   receive matching frames.
//! - `auth`: delivery-token minting and verification.
//! - `message`: relay control frames.

pub mod auth;
pub mod ingest;
pub mod message;
pub mod relay;

pub use auth::{AuthError, LogScope, bearer_token, mint_token, verify_token};
pub use message::ControlMessage;
