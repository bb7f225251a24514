//! Built-in [`CorrelatorPolicy`](super::CorrelatorPolicy) implementations.

pub mod collection;
pub mod threshold;

pub use collection::CollectionPolicy;
pub use threshold::ThresholdPolicy;

use gather_core::{merge_variables, Message, Payload};

use crate::storage::EventGroup;

/// Builds the outgoing message for a merged group.
///
/// The result is correlated to the group id and carries the members'
/// variables merged last-wins in arrival order.
pub(crate) fn merged_message(group: &EventGroup, members: &[Message], payload: Payload) -> Message {
    let mut out = Message::new(payload).with_correlation_id(group.group_id.as_str());
    merge_variables(&mut out.variables, members.iter().map(|m| &m.variables));
    out
}
