//! Message model shared by correlation and fork-join routing.
//!
//! A [`Message`] carries a [`Payload`], a correlation identifier used to
//! derive its [`GroupId`], optional [`GroupCorrelation`] data stamped by
//! fan-out, and a map of context variables.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::Value;

// ---------------------------------------------------------------------------
// GroupId
// ---------------------------------------------------------------------------

/// Opaque correlation key identifying one correlation group.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupId(String);

impl GroupId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for GroupId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for GroupId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

// ---------------------------------------------------------------------------
// GroupCorrelation
// ---------------------------------------------------------------------------

/// Position of a message within a known-size group.
///
/// Fan-out stamps every routed copy with its sequence and the total number of
/// pairs; a collection aggregator reads `group_size` as its expected size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupCorrelation {
    /// Zero-based position within the group.
    pub sequence: usize,
    /// Total number of members the group is expected to hold, if known.
    pub group_size: Option<usize>,
}

// ---------------------------------------------------------------------------
// Payload
// ---------------------------------------------------------------------------

/// Body of a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Payload {
    /// A single runtime value.
    Value(Value),
    /// An ordered collection of messages (aggregation or `CollectList` output).
    Messages(Vec<Message>),
    /// Messages keyed by string (`CollectMap` output).
    MessageMap(BTreeMap<String, Message>),
}

impl Payload {
    /// Text form of a scalar value payload, if it has one.
    #[must_use]
    pub fn to_text(&self) -> Option<String> {
        match self {
            Self::Value(value) => value.to_text(),
            Self::Messages(_) | Self::MessageMap(_) => None,
        }
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

impl From<&str> for Payload {
    fn from(s: &str) -> Self {
        Self::Value(Value::from(s))
    }
}

impl From<String> for Payload {
    fn from(s: String) -> Self {
        Self::Value(Value::String(s))
    }
}

impl From<Vec<Message>> for Payload {
    fn from(messages: Vec<Message>) -> Self {
        Self::Messages(messages)
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// A routed message.
///
/// `correlation_id` defaults to the message's own `id`, so an uncorrelated
/// message forms a group of its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Unique identifier of this message.
    pub id: String,
    /// Correlation identifier used as the default group key.
    pub correlation_id: String,
    /// Position within a fan-out or a known-size group.
    pub group_correlation: Option<GroupCorrelation>,
    /// Message body.
    pub payload: Payload,
    /// Context variables travelling with the message.
    pub variables: BTreeMap<String, Value>,
}

impl Message {
    /// Creates a message with a fresh id, correlated to itself.
    #[must_use]
    pub fn new(payload: impl Into<Payload>) -> Self {
        let id = uuid::Uuid::new_v4().to_string();
        Self {
            correlation_id: id.clone(),
            id,
            group_correlation: None,
            payload: payload.into(),
            variables: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = correlation_id.into();
        self
    }

    #[must_use]
    pub fn with_group_correlation(mut self, group_correlation: GroupCorrelation) -> Self {
        self.group_correlation = Some(group_correlation);
        self
    }

    #[must_use]
    pub fn with_variable(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.variables.insert(name.into(), value.into());
        self
    }

    /// Builds a new message that keeps this message's correlation id and
    /// variables but carries a different payload and a fresh id.
    #[must_use]
    pub fn derive(&self, payload: impl Into<Payload>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            correlation_id: self.correlation_id.clone(),
            group_correlation: None,
            payload: payload.into(),
            variables: self.variables.clone(),
        }
    }

    /// Text form of the payload, if it is a scalar value.
    #[must_use]
    pub fn payload_text(&self) -> Option<String> {
        self.payload.to_text()
    }

    /// Default correlation key: the message's correlation identifier.
    #[must_use]
    pub fn group_id(&self) -> GroupId {
        GroupId::new(self.correlation_id.clone())
    }

    /// Encodes the message as named `MsgPack`.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_msgpack(&self) -> Result<Vec<u8>, rmp_serde::encode::Error> {
        rmp_serde::to_vec_named(self)
    }

    /// Decodes a message previously produced by [`Message::to_msgpack`].
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes are not a valid encoded message.
    pub fn from_msgpack(bytes: &[u8]) -> Result<Self, rmp_serde::decode::Error> {
        rmp_serde::from_slice(bytes)
    }
}

/// Merges variable maps into `target` with last-wins semantics.
///
/// Sources are applied in iteration order, so on key collision the value from
/// the last source that defines the key is kept.
pub fn merge_variables<'a, I>(target: &mut BTreeMap<String, Value>, sources: I)
where
    I: IntoIterator<Item = &'a BTreeMap<String, Value>>,
{
    for source in sources {
        for (name, value) in source {
            target.insert(name.clone(), value.clone());
        }
    }
}
