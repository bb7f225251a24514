//! In-memory [`GroupStore`] backed by [`DashMap`].
//!
//! Each group's header and members live in one map entry, so every store
//! operation is atomic per group without external locking. Unrelated groups
//! land on different shards and proceed in parallel.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use gather_core::{GroupId, Message};

use crate::storage::event_group::EventGroup;
use crate::storage::group_store::{GroupStore, StoreAccessError, StoreOp};

/// Header plus members of one stored group.
#[derive(Debug, Clone)]
struct StoredGroup {
    header: EventGroup,
    members: Vec<Message>,
}

/// In-memory group store. The default backing for a correlator.
#[derive(Debug, Default)]
pub struct InMemoryGroupStore {
    groups: DashMap<GroupId, StoredGroup>,
}

impl InMemoryGroupStore {
    /// Creates a new, empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            groups: DashMap::new(),
        }
    }
}

#[async_trait]
impl GroupStore for InMemoryGroupStore {
    async fn create_if_absent(&self, group: EventGroup) -> Result<EventGroup, StoreAccessError> {
        match self.groups.entry(group.group_id.clone()) {
            Entry::Occupied(existing) => Ok(existing.get().header.clone()),
            Entry::Vacant(slot) => {
                let header = group.clone();
                slot.insert(StoredGroup {
                    header: group,
                    members: Vec::new(),
                });
                Ok(header)
            }
        }
    }

    async fn load(&self, group_id: &GroupId) -> Result<Option<EventGroup>, StoreAccessError> {
        Ok(self.groups.get(group_id).map(|g| g.header.clone()))
    }

    async fn append(
        &self,
        group_id: &GroupId,
        message: &Message,
    ) -> Result<EventGroup, StoreAccessError> {
        let mut stored = self
            .groups
            .get_mut(group_id)
            .ok_or_else(|| StoreAccessError::not_found(group_id, StoreOp::Append))?;
        stored.members.push(message.clone());
        stored.header.record_member();
        Ok(stored.header.clone())
    }

    async fn read(&self, group_id: &GroupId) -> Result<Vec<Message>, StoreAccessError> {
        self.groups
            .get(group_id)
            .map(|g| g.members.clone())
            .ok_or_else(|| StoreAccessError::not_found(group_id, StoreOp::Read))
    }

    async fn update(&self, group: &EventGroup) -> Result<(), StoreAccessError> {
        let mut stored = self
            .groups
            .get_mut(&group.group_id)
            .ok_or_else(|| StoreAccessError::not_found(&group.group_id, StoreOp::Update))?;
        stored.header = group.clone();
        Ok(())
    }

    async fn remove(&self, group_id: &GroupId) -> Result<Option<EventGroup>, StoreAccessError> {
        Ok(self.groups.remove(group_id).map(|(_, g)| g.header))
    }

    async fn groups(&self) -> Result<Vec<EventGroup>, StoreAccessError> {
        Ok(self
            .groups
            .iter()
            .map(|entry| entry.value().header.clone())
            .collect())
    }

    fn len(&self) -> usize {
        self.groups.len()
    }
}
