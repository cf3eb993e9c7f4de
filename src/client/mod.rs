//! Log emission client, embedded in the function sandbox.
//!
//! Captured log lines are buffered by `LogEmitter` and shipped in batches to
//! the broker's ingest endpoint. Delivery is best-effort: nothing here can
//! fail or stall the function it runs beside.

pub mod delivery;
pub mod emitter;
pub mod shipper;

pub use delivery::{DeliveryTarget, prepare_delivery};
pub use emitter::{Level, LogEmitter, LogEntry};
pub use shipper::{LogShipper, ShipError, WsShipper};
