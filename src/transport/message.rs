use serde::{Deserialize, Serialize};

/// Control frames a relay subscriber sends to attach or detach a topic filter.
#[derive(Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum ControlMessage {
    #[serde(rename = "subscribe")]
    Subscribe { topic: String },
    #[serde(rename = "unsubscribe")]
    Unsubscribe { topic: String },
}

impl ControlMessage {
    pub fn subscribe(topic: impl Into<String>) -> Self {
        Self::Subscribe {
            topic: topic.into(),
        }
    }

    pub fn unsubscribe(topic: impl Into<String>) -> Self {
        Self::Unsubscribe {
            topic: topic.into(),
        }
    }

    pub fn to_json(&self) -> String {
        // Two string fields, serialization cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }
}
