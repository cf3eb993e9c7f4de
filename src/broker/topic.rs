//! Topic paths and presence keys
//!
//! A topic is a colon-delimited path, most specific segment last, with a
//! trailing `:` after every segment:
//! `logs:application:<subscription>:<boundary>:<function>:`. Subscribers match
//! on any prefix of that path. The trailing delimiter keeps `sub-1:` from
//! matching `sub-10:`.
//!
//! Topics are never registered anywhere; they are plain strings that are only
//! ever built through the constructors here so segment order and delimiters
//! stay consistent across ingest, relay and gateway.

use std::fmt;
use thiserror::Error;

const ROOT: &str = "logs:application:";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TopicError {
    #[error("{0} must not be empty")]
    Empty(&'static str),
    #[error("{0} contains a reserved character")]
    ReservedCharacter(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Topic(String);

impl Topic {
    pub fn for_subscription(subscription_id: &str) -> Result<Self, TopicError> {
        let mut path = ROOT.to_string();
        push_segment(&mut path, "subscription id", subscription_id)?;
        Ok(Self(path))
    }

    pub fn for_boundary(subscription_id: &str, boundary_id: &str) -> Result<Self, TopicError> {
        let mut topic = Self::for_subscription(subscription_id)?;
        push_segment(&mut topic.0, "boundary id", boundary_id)?;
        Ok(topic)
    }

    pub fn for_function(
        subscription_id: &str,
        boundary_id: &str,
        function_id: &str,
    ) -> Result<Self, TopicError> {
        let mut topic = Self::for_boundary(subscription_id, boundary_id)?;
        push_segment(&mut topic.0, "function id", function_id)?;
        Ok(topic)
    }

    /// Builds the narrowest topic the ids allow: function-level when a
    /// function id is given, boundary-level otherwise.
    pub fn for_scope(
        subscription_id: &str,
        boundary_id: &str,
        function_id: Option<&str>,
    ) -> Result<Self, TopicError> {
        match function_id {
            Some(function_id) => Self::for_function(subscription_id, boundary_id, function_id),
            None => Self::for_boundary(subscription_id, boundary_id),
        }
    }

    /// Accepts a raw filter as sent by a relay subscriber. Only the root
    /// namespace is enforced; an empty filter would match everything.
    pub fn from_filter(filter: &str) -> Result<Self, TopicError> {
        if filter.is_empty() {
            return Err(TopicError::Empty("topic filter"));
        }
        if filter.chars().any(char::is_whitespace) {
            return Err(TopicError::ReservedCharacter("topic filter"));
        }
        Ok(Self(filter.to_string()))
    }

    pub fn is_prefix_of(&self, topic: &str) -> bool {
        topic.starts_with(self.0.as_str())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn push_segment(path: &mut String, name: &'static str, segment: &str) -> Result<(), TopicError> {
    validate_segment(name, segment)?;
    path.push_str(segment);
    path.push(':');
    Ok(())
}

fn validate_segment(name: &'static str, segment: &str) -> Result<(), TopicError> {
    if segment.is_empty() {
        return Err(TopicError::Empty(name));
    }
    if segment
        .chars()
        .any(|c| c == ':' || c == '/' || c.is_whitespace())
    {
        return Err(TopicError::ReservedCharacter(name));
    }
    Ok(())
}

/// Key of a presence record in the shared store.
///
/// Boundary-wide viewers are keyed `sub/boundary/`, single-function viewers
/// `sub/boundary/function`, so a function key always extends its boundary key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PresenceKey(String);

impl PresenceKey {
    pub fn for_boundary(subscription_id: &str, boundary_id: &str) -> Result<Self, TopicError> {
        validate_segment("subscription id", subscription_id)?;
        validate_segment("boundary id", boundary_id)?;
        Ok(Self(format!("{subscription_id}/{boundary_id}/")))
    }

    pub fn for_function(
        subscription_id: &str,
        boundary_id: &str,
        function_id: &str,
    ) -> Result<Self, TopicError> {
        let Self(mut key) = Self::for_boundary(subscription_id, boundary_id)?;
        validate_segment("function id", function_id)?;
        key.push_str(function_id);
        Ok(Self(key))
    }

    pub fn for_scope(
        subscription_id: &str,
        boundary_id: &str,
        function_id: Option<&str>,
    ) -> Result<Self, TopicError> {
        match function_id {
            Some(function_id) => Self::for_function(subscription_id, boundary_id, function_id),
            None => Self::for_boundary(subscription_id, boundary_id),
        }
    }

    pub fn from_raw(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PresenceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
