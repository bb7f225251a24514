//! Error types for correlation and aggregation.

use std::time::Duration;

use gather_core::GroupId;

use crate::storage::{EventGroup, GroupState, StoreAccessError};

/// Root cause of an [`AggregationError`].
#[derive(Debug, thiserror::Error)]
pub enum AggregationCause {
    /// Reading the member snapshot from the store failed.
    #[error(transparent)]
    Store(StoreAccessError),
    /// A member could not be interpreted by the policy.
    #[error("member {index} could not be read: {reason}")]
    MemberRead { index: usize, reason: String },
    /// The policy's merge logic failed.
    #[error(transparent)]
    Policy(anyhow::Error),
}

/// Raised when a complete group cannot be merged into one message.
#[derive(Debug, thiserror::Error)]
#[error("aggregation of group {group_id} ({member_count} members) failed: {cause}")]
pub struct AggregationError {
    pub group_id: GroupId,
    pub member_count: usize,
    #[source]
    pub cause: AggregationCause,
}

impl AggregationError {
    #[must_use]
    pub fn new(group: &EventGroup, cause: AggregationCause) -> Self {
        Self {
            group_id: group.group_id.clone(),
            member_count: group.member_count,
            cause,
        }
    }

    /// A member at `index` could not be read.
    #[must_use]
    pub fn member_read(group: &EventGroup, index: usize, reason: impl Into<String>) -> Self {
        Self::new(
            group,
            AggregationCause::MemberRead {
                index,
                reason: reason.into(),
            },
        )
    }

    /// The member snapshot could not be loaded.
    #[must_use]
    pub fn store(group: &EventGroup, err: StoreAccessError) -> Self {
        Self::new(group, AggregationCause::Store(err))
    }

    /// The policy failed for a reason of its own.
    #[must_use]
    pub fn policy(group: &EventGroup, err: impl Into<anyhow::Error>) -> Self {
        Self::new(group, AggregationCause::Policy(err.into()))
    }
}

/// Errors returned by the correlator.
#[derive(Debug, thiserror::Error)]
pub enum CorrelationError {
    #[error(transparent)]
    Store(#[from] StoreAccessError),
    #[error(transparent)]
    Aggregation(#[from] AggregationError),
    /// Fail-fast expiry of an incomplete group.
    #[error("group {group_id} expired after {}ms with {member_count} members", .age.as_millis())]
    GroupExpired {
        group_id: GroupId,
        member_count: usize,
        age: Duration,
    },
    /// The stored header was left in a state that accepts no members.
    #[error("group {group_id} is {state:?} and accepts no members")]
    GroupNotOpen { group_id: GroupId, state: GroupState },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::StoreOp;

    #[test]
    fn member_read_display() {
        let group = EventGroup::new(GroupId::from("g1"), Some(3));
        let err = AggregationError::member_read(&group, 2, "payload is not text");
        assert_eq!(
            err.to_string(),
            "aggregation of group g1 (0 members) failed: member 2 could not be read: payload is not text"
        );
    }

    #[test]
    fn store_cause_is_transparent() {
        let group = EventGroup::new(GroupId::from("g1"), None);
        let store_err = StoreAccessError::not_found(&group.group_id, StoreOp::Read);
        let err = AggregationError::store(&group, store_err);
        assert!(err
            .to_string()
            .ends_with("group store read failed for group g1: group not found"));
        assert!(matches!(err.cause, AggregationCause::Store(_)));
    }

    #[test]
    fn expired_display() {
        let err = CorrelationError::GroupExpired {
            group_id: GroupId::from("late"),
            member_count: 1,
            age: Duration::from_millis(1500),
        };
        assert_eq!(err.to_string(), "group late expired after 1500ms with 1 members");
    }

    #[test]
    fn not_open_display_names_state() {
        let err = CorrelationError::GroupNotOpen {
            group_id: GroupId::from("g7"),
            state: GroupState::Aggregating,
        };
        assert_eq!(err.to_string(), "group g7 is Aggregating and accepts no members");
    }
}
