//! Broker process lifecycle
//!
//! `PubSub` owns the relay engine and the ingest admission counter, and binds
//! both listeners on `start()`. `stop()` cancels every task and drops every
//! relay subscriber without waiting for them to drain. Starting twice, or
//! stopping a broker that is not running, is an error.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span, info, info_span};

use crate::broker::admission::Admission;
use crate::broker::engine::Broker;
use crate::config::Settings;
use crate::transport::ingest::{IngestContext, run_ingest};
use crate::transport::relay::{lock, run_collector, run_relay};
use crate::utils::{Error, Result};

/// Addresses the listeners actually bound, useful when configured with port 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundAddrs {
    pub ingest: SocketAddr,
    pub relay: SocketAddr,
}

#[derive(Debug)]
pub struct PubSub {
    settings: Settings,
    broker: Arc<Mutex<Broker>>,
    ingest_admission: Admission,
    running: Option<Running>,
}

#[derive(Debug)]
struct Running {
    shutdown: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
    addrs: BoundAddrs,
    // operational log sink; every broker task runs inside it
    span: Span,
}

impl PubSub {
    pub fn new(settings: Settings) -> Self {
        let ingest_admission = Admission::new(settings.broker.max_ingest_connections);
        Self {
            settings,
            broker: Arc::new(Mutex::new(Broker::new())),
            ingest_admission,
            running: None,
        }
    }

    pub async fn start(&mut self) -> Result<BoundAddrs> {
        if self.running.is_some() {
            return Err(Error::AlreadyStarted);
        }

        let span = info_span!("pubsub");
        let relay_listener = TcpListener::bind(self.settings.server.relay_addr()).await?;
        let ingest_listener = TcpListener::bind(self.settings.server.ingest_addr()).await?;
        let addrs = BoundAddrs {
            ingest: ingest_listener.local_addr()?,
            relay: relay_listener.local_addr()?,
        };

        let shutdown = CancellationToken::new();
        let high_water_mark = self.settings.broker.relay_high_water_mark.max(1);
        let (collector_tx, collector_rx) = mpsc::channel(high_water_mark);

        let ctx = IngestContext {
            admission: self.ingest_admission.clone(),
            collector: collector_tx,
            signing_key: Arc::from(self.settings.server.token_signing_key.as_str()),
            idle_timeout: self.settings.broker.ingest_idle_timeout(),
            max_connection_time: self.settings.broker.ingest_max_connection_time(),
        };

        let tasks = vec![
            tokio::spawn(
                run_collector(collector_rx, self.broker.clone(), shutdown.clone())
                    .instrument(span.clone()),
            ),
            tokio::spawn(
                run_relay(
                    relay_listener,
                    self.broker.clone(),
                    high_water_mark,
                    shutdown.clone(),
                )
                .instrument(span.clone()),
            ),
            tokio::spawn(run_ingest(ingest_listener, ctx, shutdown.clone()).instrument(span.clone())),
        ];

        span.in_scope(|| {
            info!(ingest = %addrs.ingest, relay = %addrs.relay, "pubsub server started");
        });

        self.running = Some(Running {
            shutdown,
            tasks,
            addrs,
            span,
        });
        Ok(addrs)
    }

    pub async fn stop(&mut self) -> Result<()> {
        let running = self.running.take().ok_or(Error::NotStarted)?;

        running.shutdown.cancel();
        lock(&self.broker).clear();
        for task in running.tasks {
            let _ = task.await;
        }

        running.span.in_scope(|| {
            info!(ingest = %running.addrs.ingest, relay = %running.addrs.relay, "pubsub server stopped");
        });
        Ok(())
    }

    pub fn is_started(&self) -> bool {
        self.running.is_some()
    }

    pub fn addrs(&self) -> Option<BoundAddrs> {
        self.running.as_ref().map(|r| r.addrs)
    }

    pub fn broker(&self) -> Arc<Mutex<Broker>> {
        self.broker.clone()
    }

    pub fn ingest_admission(&self) -> &Admission {
        &self.ingest_admission
    }
}
