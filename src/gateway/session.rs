//! Per-request stream session
//!
//! Every way a stream can end (client gone, write error, relay error or
//! close, max duration, shutdown) calls `Session::close`. The first call wins:
//! it records the reason, hands back the admission slot and fires the `done`
//! signal that makes the stream task tear down the relay socket and end the
//! response. Later calls change nothing.

use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::info;
use uuid::Uuid;

use crate::broker::admission::{Admission, AdmissionPermit};
use crate::broker::topic::Topic;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    ClientDisconnected,
    WriteError,
    RelayError,
    RelayClosed,
    MaxDuration,
    Shutdown,
}

#[derive(Debug)]
pub struct Session {
    pub id: String,
    pub topic: Topic,
    admission: Admission,
    permit: AdmissionPermit,
    done: CancellationToken,
    closed: AtomicBool,
    reason: OnceLock<CloseReason>,
}

impl Session {
    pub fn new(topic: Topic, admission: Admission, permit: AdmissionPermit) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            topic,
            admission,
            permit,
            done: CancellationToken::new(),
            closed: AtomicBool::new(false),
            reason: OnceLock::new(),
        }
    }

    /// Returns true for the one call that actually closed the session.
    pub fn close(&self, reason: CloseReason) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        let _ = self.reason.set(reason);
        self.permit.release();
        self.done.cancel();
        info!(
            session = %self.id,
            topic = %self.topic,
            reason = ?reason,
            active = self.admission.active(),
            "log stream closed"
        );
        true
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn reason(&self) -> Option<CloseReason> {
        self.reason.get().copied()
    }

    pub fn done(&self) -> WaitForCancellationFuture<'_> {
        self.done.cancelled()
    }
}
