use gather_core::{GroupId, Message};

use super::merged_message;
use crate::correlation::error::AggregationError;
use crate::correlation::policy::CorrelatorPolicy;
use crate::storage::EventGroup;

/// Fixed-count completion: a group completes when its Nth member arrives.
///
/// Aggregation concatenates the text of every member payload in arrival
/// order, each followed by a single space. The count lives in the group
/// header, so one policy instance serves any number of groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThresholdPolicy {
    threshold: usize,
}

impl ThresholdPolicy {
    /// Creates a policy completing groups at `threshold` members (minimum 1).
    #[must_use]
    pub fn new(threshold: usize) -> Self {
        Self {
            threshold: threshold.max(1),
        }
    }

    #[must_use]
    pub fn threshold(&self) -> usize {
        self.threshold
    }
}

impl CorrelatorPolicy for ThresholdPolicy {
    fn create_group(&self, _first: &Message, group_id: GroupId) -> EventGroup {
        EventGroup::new(group_id, Some(self.threshold))
    }

    fn should_aggregate(&self, group: &EventGroup) -> bool {
        group.size() >= self.threshold
    }

    fn aggregate(
        &self,
        group: &EventGroup,
        members: &[Message],
    ) -> Result<Message, AggregationError> {
        let mut text = String::new();
        for (index, member) in members.iter().enumerate() {
            let part = member.payload_text().ok_or_else(|| {
                AggregationError::member_read(group, index, "payload has no text form")
            })?;
            text.push_str(&part);
            text.push(' ');
        }
        Ok(merged_message(group, members, text.into()))
    }
}
