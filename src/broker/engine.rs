//! Broker engine
//!
//! In-memory relay state: the set of attached relay subscribers and the topic
//! filters each of them registered. Publishing fans a message out to every
//! subscriber with at least one filter that is a prefix of the message topic,
//! at most once per subscriber.
//!
//! Concurrency notes:
//! - The API is synchronous and meant to sit behind `Arc<Mutex<Broker>>`.
//!   Callers must not hold the lock across network I/O.
//! - Delivery never blocks. Each subscriber has a bounded queue; when it is
//!   full the message is dropped for that subscriber only.

use std::collections::{HashMap, HashSet};

use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::debug;
use tungstenite::protocol::Message as WsMessage;

use crate::broker::message::LogMessage;
use crate::broker::topic::Topic;

pub type SubscriberId = String;

/// A relay subscriber as seen by the engine: where to push frames and which
/// prefixes it asked for.
#[derive(Debug)]
pub struct Subscriber {
    pub id: SubscriberId,
    pub sender: mpsc::Sender<WsMessage>,
    pub filters: HashSet<Topic>,
}

impl Subscriber {
    pub fn new(id: impl Into<SubscriberId>, sender: mpsc::Sender<WsMessage>) -> Self {
        Self {
            id: id.into(),
            sender,
            filters: HashSet::new(),
        }
    }

    pub fn matches(&self, topic: &str) -> bool {
        self.filters.iter().any(|filter| filter.is_prefix_of(topic))
    }
}

#[derive(Debug, Default)]
pub struct Broker {
    pub subscribers: HashMap<SubscriberId, Subscriber>,
}

impl Broker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_subscriber(&mut self, subscriber: Subscriber) {
        self.subscribers.insert(subscriber.id.clone(), subscriber);
    }

    /// Adds a filter to a registered subscriber. Returns whether the filter
    /// was new; unknown subscribers are ignored.
    pub fn subscribe(&mut self, subscriber: &SubscriberId, filter: Topic) -> bool {
        self.subscribers
            .get_mut(subscriber)
            .is_some_and(|s| s.filters.insert(filter))
    }

    pub fn unsubscribe(&mut self, subscriber: &SubscriberId, filter: &Topic) -> bool {
        self.subscribers
            .get_mut(subscriber)
            .is_some_and(|s| s.filters.remove(filter))
    }

    /// Relays one message and returns how many subscribers it was queued for.
    pub fn publish(&self, msg: &LogMessage) -> usize {
        let frame = msg.encode();
        let mut delivered = 0;

        for subscriber in self.subscribers.values() {
            if !subscriber.matches(&msg.topic) {
                continue;
            }
            match subscriber.sender.try_send(WsMessage::Binary(frame.clone())) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    debug!(subscriber = %subscriber.id, topic = %msg.topic, "relay queue full, dropping message");
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(subscriber = %subscriber.id, "relay subscriber gone");
                }
            }
        }

        delivered
    }

    /// Removes the subscriber and every filter it held.
    pub fn cleanup_subscriber(&mut self, subscriber: &SubscriberId) -> bool {
        self.subscribers.remove(subscriber).is_some()
    }

    /// Drops every subscriber, which closes their outbound queues.
    pub fn clear(&mut self) {
        self.subscribers.clear();
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}
