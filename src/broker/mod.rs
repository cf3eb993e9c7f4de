//! The pub/sub broker: relay engine, topic helpers and the process-level
//! `PubSub` lifecycle that binds the ingest and relay listeners.

pub mod admission;
pub mod connection;
pub mod engine;
pub mod message;
pub mod server;
pub mod topic;

pub use admission::{Admission, AdmissionPermit};
pub use engine::Broker;
pub use server::{BoundAddrs, PubSub};
