//! # livelog
//!
//! Real-time log fan-out for a multi-tenant function platform. Function
//! sandboxes publish their console output, operators and editors watch it
//! live as an event stream, and nothing is stored along the way.
//!
//! ## Core Modules
//!
//! - `client`: the log emission client that runs beside a function, buffering
//!   entries and shipping them to ingest.
//! - `broker`: topic helpers, admission control, the relay engine and the
//!   `PubSub` process lifecycle.
//! - `transport`: the WebSocket ingest and relay endpoints and delivery
//!   tokens.
//! - `gateway`: the HTTP endpoint turning one relay subscription into a
//!   Server-Sent Events stream.
//! - `presence`: the presence store and the cache producers consult before
//!   bothering to ship logs at all.
//! - `config`: settings loading.
//! - `utils`: error type and logging setup.

pub mod broker;
pub mod client;
pub mod config;
pub mod gateway;
pub mod presence;
pub mod transport;
pub mod utils;

#[cfg(test)]
mod tests;
