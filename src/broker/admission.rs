//! Admission control
//!
//! `Admission` is a per-process ceiling on concurrent connections. A slot is
//! taken with `try_acquire` and handed back exactly once by its
//! `AdmissionPermit`, either through `release` or on drop, whichever comes
//! first. Nothing queues: callers that get `None` must reject.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

#[derive(Debug, Clone)]
pub struct Admission {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    max: usize,
    active: AtomicUsize,
}

impl Admission {
    pub fn new(max: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                max,
                active: AtomicUsize::new(0),
            }),
        }
    }

    pub fn try_acquire(&self) -> Option<AdmissionPermit> {
        let inner = &self.inner;
        inner
            .active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |active| {
                (active < inner.max).then_some(active + 1)
            })
            .ok()?;
        Some(AdmissionPermit {
            admission: self.clone(),
            released: AtomicBool::new(false),
        })
    }

    pub fn active(&self) -> usize {
        self.inner.active.load(Ordering::Acquire)
    }

    pub fn max(&self) -> usize {
        self.inner.max
    }
}

#[derive(Debug)]
pub struct AdmissionPermit {
    admission: Admission,
    released: AtomicBool,
}

impl AdmissionPermit {
    /// Returns the slot. Only the first call has any effect; the return
    /// value tells whether this call was the one that released it.
    pub fn release(&self) -> bool {
        if self.released.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.admission.inner.active.fetch_sub(1, Ordering::AcqRel);
        true
    }
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        self.release();
    }
}
