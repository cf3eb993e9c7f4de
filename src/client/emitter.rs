//! Buffered log emitter
//!
//! `write` only appends to an in-memory buffer. Shipping happens off the
//! caller's path when either the buffer reaches `max_entries` or
//! `flush_interval` passes since the last flush with entries pending. At most
//! one flush runs at a time; a flush requested while another is in flight is
//! folded into it, since the running flush keeps draining until the buffer is
//! empty. Failed batches are dropped.

use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::client::shipper::LogShipper;
use crate::config::EmitterSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Level::Trace => "trace",
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warn => "warn",
            Level::Error => "error",
        };
        f.write_str(s)
    }
}

impl FromStr for Level {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "trace" => Ok(Level::Trace),
            "debug" => Ok(Level::Debug),
            "info" | "log" => Ok(Level::Info),
            "warn" | "warning" => Ok(Level::Warn),
            "error" => Ok(Level::Error),
            other => Err(format!("unknown log level: {other}")),
        }
    }
}

/// One captured log line. `time` is milliseconds since the UNIX epoch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub level: Level,
    pub message: String,
    pub time: i64,
}

struct Inner<S> {
    shipper: S,
    buffer: Mutex<Vec<LogEntry>>,
    flush_lock: tokio::sync::Mutex<()>,
    last_flush: Mutex<Instant>,
    max_entries: usize,
}

impl<S: LogShipper> Inner<S> {
    fn buffer(&self) -> MutexGuard<'_, Vec<LogEntry>> {
        self.buffer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn has_pending(&self) -> bool {
        !self.buffer().is_empty()
    }

    fn last_flush(&self) -> Instant {
        *self.last_flush.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn mark_flushed(&self) {
        *self.last_flush.lock().unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }

    /// Flushes unless a flush is already running, in which case that one
    /// picks up whatever is buffered.
    async fn try_flush(&self) -> usize {
        match self.flush_lock.try_lock() {
            Ok(_guard) => self.drain().await,
            Err(_) => 0,
        }
    }

    /// Waits for any running flush, then drains.
    async fn flush_now(&self) -> usize {
        let _guard = self.flush_lock.lock().await;
        self.drain().await
    }

    // caller holds flush_lock
    async fn drain(&self) -> usize {
        let mut shipped = 0;
        loop {
            let batch = std::mem::take(&mut *self.buffer());
            if batch.is_empty() {
                break;
            }
            self.mark_flushed();
            match self.shipper.ship(&batch).await {
                Ok(()) => shipped += batch.len(),
                Err(e) => debug!(error = %e, dropped = batch.len(), "log batch not delivered"),
            }
        }
        shipped
    }
}

pub struct LogEmitter<S: LogShipper> {
    inner: Arc<Inner<S>>,
    flush_interval: Duration,
    final_flush_timeout: Duration,
    stop: CancellationToken,
    ticker: JoinHandle<()>,
    // runtime captured at construction; `write` may run on foreign threads
    runtime: Handle,
}

impl<S: LogShipper> LogEmitter<S> {
    /// Creates the emitter and starts its idle-flush timer. Must be called
    /// from within a Tokio runtime; the emitter itself can then be written to
    /// from any thread.
    pub fn new(shipper: S, settings: &EmitterSettings) -> Self {
        let runtime = Handle::current();
        let inner = Arc::new(Inner {
            shipper,
            buffer: Mutex::new(Vec::new()),
            flush_lock: tokio::sync::Mutex::new(()),
            last_flush: Mutex::new(Instant::now()),
            max_entries: settings.max_entries.max(1),
        });
        let flush_interval = settings.flush_interval();
        let stop = CancellationToken::new();
        let ticker = runtime.spawn(run_ticker(inner.clone(), flush_interval, stop.clone()));

        Self {
            inner,
            flush_interval,
            final_flush_timeout: settings.final_flush_timeout(),
            stop,
            ticker,
            runtime,
        }
    }

    /// Buffers one entry. Never waits on the network.
    pub fn write(&self, level: Level, message: impl Into<String>) {
        let entry = LogEntry {
            level,
            message: message.into(),
            time: chrono::Utc::now().timestamp_millis(),
        };
        let full = {
            let mut buffer = self.inner.buffer();
            buffer.push(entry);
            buffer.len() >= self.inner.max_entries
        };
        if full {
            let inner = self.inner.clone();
            self.runtime.spawn(async move {
                inner.try_flush().await;
            });
        }
    }

    /// Requests a flush and returns how many entries it shipped; 0 when it
    /// was folded into a flush already in flight.
    pub async fn flush(&self) -> usize {
        self.inner.try_flush().await
    }

    pub fn pending(&self) -> usize {
        self.inner.buffer().len()
    }

    pub fn flush_interval(&self) -> Duration {
        self.flush_interval
    }

    /// Final flush at the end of an invocation. Gives up after the configured
    /// timeout; returns whether everything buffered was handed to the shipper.
    pub async fn finish(self) -> bool {
        self.stop.cancel();
        let inner = self.inner.clone();
        let completed = tokio::time::timeout(self.final_flush_timeout, inner.flush_now())
            .await
            .is_ok();
        if !completed {
            debug!(dropped = self.inner.buffer().len(), "final log flush abandoned");
        }
        completed
    }
}

impl<S: LogShipper> Drop for LogEmitter<S> {
    fn drop(&mut self) {
        self.stop.cancel();
        self.ticker.abort();
    }
}

async fn run_ticker<S: LogShipper>(inner: Arc<Inner<S>>, interval: Duration, stop: CancellationToken) {
    loop {
        let due = inner.last_flush() + interval;
        tokio::select! {
            _ = stop.cancelled() => break,
            _ = tokio::time::sleep_until(due) => {}
        }

        // a size-triggered flush moved the window
        if inner.last_flush() + interval > Instant::now() {
            continue;
        }
        if inner.has_pending() {
            inner.try_flush().await;
        } else {
            inner.mark_flushed();
        }
    }
}
