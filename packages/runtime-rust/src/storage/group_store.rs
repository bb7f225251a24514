//! Backing store trait for in-flight correlation groups.
//!
//! Defines [`GroupStore`], the pluggable persistence layer the
//! [`Correlator`](crate::correlation::Correlator) keeps group headers and
//! members in, and [`StoreAccessError`], the fault every operation surfaces.

use std::fmt;

use async_trait::async_trait;
use gather_core::{GroupId, Message};

use super::event_group::EventGroup;

/// Store operation that failed, carried by [`StoreAccessError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    Create,
    Load,
    Append,
    Read,
    Update,
    Remove,
}

impl fmt::Display for StoreOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Create => "create",
            Self::Load => "load",
            Self::Append => "append",
            Self::Read => "read",
            Self::Update => "update",
            Self::Remove => "remove",
        };
        f.write_str(name)
    }
}

/// Backing-store fault (network, disk, serialization).
///
/// Never swallowed: a lost member would corrupt the aggregation invariant.
#[derive(Debug, thiserror::Error)]
pub enum StoreAccessError {
    /// A per-group operation failed.
    #[error("group store {op} failed for group {group_id}: {source}")]
    Group {
        group_id: GroupId,
        op: StoreOp,
        #[source]
        source: anyhow::Error,
    },
    /// Listing the stored groups failed.
    #[error("group store listing failed: {0}")]
    List(#[source] anyhow::Error),
}

impl StoreAccessError {
    /// Builds a per-group error.
    pub fn group(group_id: &GroupId, op: StoreOp, source: impl Into<anyhow::Error>) -> Self {
        Self::Group {
            group_id: group_id.clone(),
            op,
            source: source.into(),
        }
    }

    /// Builds the error returned when an operation targets an unknown group.
    #[must_use]
    pub fn not_found(group_id: &GroupId, op: StoreOp) -> Self {
        Self::group(group_id, op, anyhow::anyhow!("group not found"))
    }

    /// The store operation that failed, if it targeted a single group.
    #[must_use]
    pub fn op(&self) -> Option<StoreOp> {
        match self {
            Self::Group { op, .. } => Some(*op),
            Self::List(_) => None,
        }
    }
}

/// Pluggable backing for correlation groups.
///
/// Implementations may be in-memory or externally persisted. Every method
/// is atomic per group; the correlator adds the per-group serialization that
/// spans several calls.
///
/// Used as `Arc<dyn GroupStore>`.
#[async_trait]
pub trait GroupStore: Send + Sync {
    /// Stores `group` unless a group with the same id exists.
    ///
    /// Returns the stored header (the existing one if present).
    async fn create_if_absent(&self, group: EventGroup) -> Result<EventGroup, StoreAccessError>;

    /// Loads a group header, or `None` if the group does not exist.
    async fn load(&self, group_id: &GroupId) -> Result<Option<EventGroup>, StoreAccessError>;

    /// Appends a member and returns the updated header.
    ///
    /// Fails if the group does not exist.
    async fn append(
        &self,
        group_id: &GroupId,
        message: &Message,
    ) -> Result<EventGroup, StoreAccessError>;

    /// Returns a snapshot of the members in insertion order.
    ///
    /// The snapshot stays valid even if the group is removed afterwards.
    async fn read(&self, group_id: &GroupId) -> Result<Vec<Message>, StoreAccessError>;

    /// Overwrites a stored header (used for lifecycle state changes).
    async fn update(&self, group: &EventGroup) -> Result<(), StoreAccessError>;

    /// Removes a group and its members, returning the removed header.
    async fn remove(&self, group_id: &GroupId) -> Result<Option<EventGroup>, StoreAccessError>;

    /// Point-in-time snapshot of every stored header.
    async fn groups(&self) -> Result<Vec<EventGroup>, StoreAccessError>;

    /// Number of stored groups.
    fn len(&self) -> usize;

    /// Whether the store holds no groups.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
