//! Fan-in: turning the successful results of a fan-out into one payload.
//!
//! Mergers receive results keyed by sequence, so output order never
//! depends on completion timing. Any `Fn(&BTreeMap<usize, Message>,
//! &Message) -> Result<Payload, MergeError>` closure is a merger too.

use std::collections::BTreeMap;

use gather_core::{Message, Payload};

#[derive(Debug, thiserror::Error)]
#[error("merge failed: {reason}")]
pub struct MergeError {
    pub reason: String,
}

impl MergeError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Merges sequence-indexed route results into the outgoing payload.
pub trait ResultMerger: Send + Sync {
    /// # Errors
    ///
    /// Returns [`MergeError`] if the results cannot be combined.
    fn merge(
        &self,
        results: &BTreeMap<usize, Message>,
        original: &Message,
    ) -> Result<Payload, MergeError>;
}

impl<F> ResultMerger for F
where
    F: Fn(&BTreeMap<usize, Message>, &Message) -> Result<Payload, MergeError> + Send + Sync,
{
    fn merge(
        &self,
        results: &BTreeMap<usize, Message>,
        original: &Message,
    ) -> Result<Payload, MergeError> {
        self(results, original)
    }
}

/// Result messages as a list ordered by sequence.
#[derive(Debug, Clone, Copy, Default)]
pub struct CollectList;

impl ResultMerger for CollectList {
    fn merge(
        &self,
        results: &BTreeMap<usize, Message>,
        _original: &Message,
    ) -> Result<Payload, MergeError> {
        Ok(Payload::Messages(results.values().cloned().collect()))
    }
}

/// Result messages keyed by their sequence rendered as a string.
///
/// Keys come from the result map, never from the message itself, so a route
/// that re-stamps its output cannot collide with another result.
#[derive(Debug, Clone, Copy, Default)]
pub struct CollectMap;

impl ResultMerger for CollectMap {
    fn merge(
        &self,
        results: &BTreeMap<usize, Message>,
        _original: &Message,
    ) -> Result<Payload, MergeError> {
        let map = results
            .iter()
            .map(|(sequence, message)| (sequence.to_string(), message.clone()))
            .collect();
        Ok(Payload::MessageMap(map))
    }
}

/// Text payloads joined in sequence order.
#[derive(Debug, Clone, Default)]
pub struct Concat {
    pub separator: String,
}

impl Concat {
    pub fn new(separator: impl Into<String>) -> Self {
        Self {
            separator: separator.into(),
        }
    }
}

impl ResultMerger for Concat {
    fn merge(
        &self,
        results: &BTreeMap<usize, Message>,
        _original: &Message,
    ) -> Result<Payload, MergeError> {
        let parts = results
            .iter()
            .map(|(sequence, message)| {
                message.payload_text().ok_or_else(|| {
                    MergeError::new(format!("result {sequence} has no text payload"))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Payload::from(parts.join(&self.separator)))
    }
}
