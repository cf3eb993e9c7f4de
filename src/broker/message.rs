//! Relay frames
//!
//! A `LogMessage` travels through the relay as one binary WebSocket frame laid
//! out as `<topic> <payload>`: the topic, a single ASCII space, then the
//! payload bytes untouched. Topics never contain whitespace, so the first
//! space is always the delimiter.

use bytes::{BufMut, Bytes, BytesMut};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogMessage {
    pub topic: String,
    pub payload: Bytes,
}

impl LogMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.topic.len() + 1 + self.payload.len());
        buf.put_slice(self.topic.as_bytes());
        buf.put_u8(b' ');
        buf.put_slice(&self.payload);
        buf.freeze()
    }

    /// Splits a relay frame back into topic and payload. Frames without a
    /// delimiter or with a non UTF-8 topic yield `None`.
    pub fn decode(frame: Bytes) -> Option<Self> {
        let split = frame.iter().position(|b| *b == b' ')?;
        let topic = std::str::from_utf8(&frame[..split]).ok()?.to_string();
        if topic.is_empty() {
            return None;
        }
        let payload = frame.slice(split + 1..);
        Some(Self { topic, payload })
    }
}
