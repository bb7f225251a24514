//! Pluggable completion and merge rules.
//!
//! A [`CorrelatorPolicy`] decides how messages map to groups, when a group is
//! complete, and how a complete group becomes one message. [`FnPolicy`] is
//! the closure-backed form for ad-hoc policies.

use gather_core::{GroupId, Message};

use super::error::AggregationError;
use crate::storage::EventGroup;

/// Completion and merge rules for a correlator.
///
/// Used as `Arc<dyn CorrelatorPolicy>`. The correlator serializes every call
/// for one group, so implementations need no per-group locking of their own.
/// Per-group counters belong in the [`EventGroup`], never in `self`.
pub trait CorrelatorPolicy: Send + Sync {
    /// Derives the correlation key. Defaults to the message's correlation id.
    fn group_id(&self, message: &Message) -> GroupId {
        message.group_id()
    }

    /// Builds the header for a group opened by `first`.
    fn create_group(&self, first: &Message, group_id: GroupId) -> EventGroup;

    /// Whether the group is complete. Must not mutate stored members.
    fn should_aggregate(&self, group: &EventGroup) -> bool;

    /// Merges the final member snapshot into one outgoing message.
    ///
    /// Invoked at most once per group, with members in arrival order.
    fn aggregate(&self, group: &EventGroup, members: &[Message])
        -> Result<Message, AggregationError>;
}

type KeyFn = Box<dyn Fn(&Message) -> GroupId + Send + Sync>;
type CreateFn = Box<dyn Fn(&Message, GroupId) -> EventGroup + Send + Sync>;
type DecideFn = Box<dyn Fn(&EventGroup) -> bool + Send + Sync>;
type AggregateFn = Box<dyn Fn(&EventGroup, &[Message]) -> Result<Message, AggregationError> + Send + Sync>;

/// Policy assembled from closures.
///
/// Without `with_key`, groups are keyed by correlation id; without
/// `with_create_group`, new groups carry no expected-size hint.
pub struct FnPolicy {
    key: Option<KeyFn>,
    create: Option<CreateFn>,
    decide: DecideFn,
    merge: AggregateFn,
}

impl FnPolicy {
    pub fn new<D, A>(should_aggregate: D, aggregate: A) -> Self
    where
        D: Fn(&EventGroup) -> bool + Send + Sync + 'static,
        A: Fn(&EventGroup, &[Message]) -> Result<Message, AggregationError> + Send + Sync + 'static,
    {
        Self {
            key: None,
            create: None,
            decide: Box::new(should_aggregate),
            merge: Box::new(aggregate),
        }
    }

    /// Replaces the key function.
    #[must_use]
    pub fn with_key<K>(mut self, key: K) -> Self
    where
        K: Fn(&Message) -> GroupId + Send + Sync + 'static,
    {
        self.key = Some(Box::new(key));
        self
    }

    /// Replaces the group factory.
    #[must_use]
    pub fn with_create_group<C>(mut self, create: C) -> Self
    where
        C: Fn(&Message, GroupId) -> EventGroup + Send + Sync + 'static,
    {
        self.create = Some(Box::new(create));
        self
    }
}

impl CorrelatorPolicy for FnPolicy {
    fn group_id(&self, message: &Message) -> GroupId {
        match &self.key {
            Some(key) => key(message),
            None => message.group_id(),
        }
    }

    fn create_group(&self, first: &Message, group_id: GroupId) -> EventGroup {
        match &self.create {
            Some(create) => create(first, group_id),
            None => EventGroup::new(group_id, None),
        }
    }

    fn should_aggregate(&self, group: &EventGroup) -> bool {
        (self.decide)(group)
    }

    fn aggregate(
        &self,
        group: &EventGroup,
        members: &[Message],
    ) -> Result<Message, AggregationError> {
        (self.merge)(group, members)
    }
}
