//! Connection bookkeeping shared by ingest publishers and relay subscribers.

use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

use crate::broker::topic::Topic;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Publish,
    Subscribe,
}

/// One accepted transport socket. The id is a UUID used in logs and as the
/// relay's subscriber key.
#[derive(Debug, Clone)]
pub struct Connection {
    pub id: String,
    pub direction: Direction,
    pub topic_filter: Option<Topic>,
    pub created_at: Instant,
    pub last_activity_at: Instant,
}

impl Connection {
    pub fn new(direction: Direction, topic_filter: Option<Topic>) -> Self {
        let now = Instant::now();
        Self {
            id: Uuid::new_v4().to_string(),
            direction,
            topic_filter,
            created_at: now,
            last_activity_at: now,
        }
    }

    pub fn touch(&mut self) {
        self.last_activity_at = Instant::now();
    }

    pub fn idle_for(&self) -> Duration {
        self.last_activity_at.elapsed()
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Instant at which this connection hits whichever of the idle or
    /// lifetime limits comes first.
    pub fn deadline(&self, idle_timeout: Duration, max_lifetime: Duration) -> Instant {
        let idle = self.last_activity_at + idle_timeout;
        let lifetime = self.created_at + max_lifetime;
        idle.min(lifetime)
    }
}
