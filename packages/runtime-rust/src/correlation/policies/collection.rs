use gather_core::{GroupId, Message, Payload};

use super::merged_message;
use crate::correlation::error::AggregationError;
use crate::correlation::policy::CorrelatorPolicy;
use crate::storage::EventGroup;

/// Completion driven by the fan-out size stamped on incoming messages.
///
/// The first member's `GroupCorrelation::group_size` becomes the group's
/// expected size. Members are collected into a `Payload::Messages` in
/// arrival order. A group opened by a message without a size hint never
/// completes on count and is left to expiry.
#[derive(Debug, Clone, Copy, Default)]
pub struct CollectionPolicy;

impl CorrelatorPolicy for CollectionPolicy {
    fn create_group(&self, first: &Message, group_id: GroupId) -> EventGroup {
        let expected = first.group_correlation.and_then(|gc| gc.group_size);
        EventGroup::new(group_id, expected)
    }

    fn should_aggregate(&self, group: &EventGroup) -> bool {
        group
            .expected_size
            .is_some_and(|expected| group.size() >= expected)
    }

    fn aggregate(
        &self,
        group: &EventGroup,
        members: &[Message],
    ) -> Result<Message, AggregationError> {
        Ok(merged_message(
            group,
            members,
            Payload::Messages(members.to_vec()),
        ))
    }
}
