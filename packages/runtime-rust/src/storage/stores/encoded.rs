//! [`GroupStore`] that keeps headers and members as `MsgPack` bytes.
//!
//! Models an externally persisted backend: everything crossing the store
//! boundary is serialized with `rmp-serde`, so reads hand back decoded
//! copies and codec faults surface as [`StoreAccessError`]. Several stores
//! can share one [`EncodedBackend`] under different key prefixes.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use gather_core::{GroupId, Message};

use crate::storage::event_group::EventGroup;
use crate::storage::group_store::{GroupStore, StoreAccessError, StoreOp};

/// Encoded header and members of one group.
#[derive(Debug, Clone, Default)]
pub struct EncodedGroup {
    pub header: Vec<u8>,
    pub members: Vec<Vec<u8>>,
}

/// Shared raw key space, keyed by `"{prefix}.{group_id}"`.
pub type EncodedBackend = Arc<DashMap<String, EncodedGroup>>;

/// Group store over an encoded, shareable backend.
#[derive(Debug, Clone)]
pub struct EncodedGroupStore {
    backend: EncodedBackend,
    prefix: String,
}

impl EncodedGroupStore {
    /// Creates a store with its own private backend.
    #[must_use]
    pub fn new(prefix: impl Into<String>) -> Self {
        Self::shared(Arc::new(DashMap::new()), prefix)
    }

    /// Creates a store over an existing backend, namespaced by `prefix`.
    #[must_use]
    pub fn shared(backend: EncodedBackend, prefix: impl Into<String>) -> Self {
        Self {
            backend,
            prefix: prefix.into(),
        }
    }

    /// Returns the backend handle for sharing with other stores.
    #[must_use]
    pub fn backend(&self) -> EncodedBackend {
        Arc::clone(&self.backend)
    }

    fn key(&self, group_id: &GroupId) -> String {
        format!("{}.{}", self.prefix, group_id)
    }

    fn owns(&self, key: &str) -> bool {
        key.strip_prefix(&self.prefix)
            .is_some_and(|rest| rest.starts_with('.'))
    }
}

fn encode_header(group: &EventGroup, op: StoreOp) -> Result<Vec<u8>, StoreAccessError> {
    rmp_serde::to_vec_named(group).map_err(|e| StoreAccessError::group(&group.group_id, op, e))
}

fn decode_header(
    group_id: &GroupId,
    bytes: &[u8],
    op: StoreOp,
) -> Result<EventGroup, StoreAccessError> {
    rmp_serde::from_slice(bytes).map_err(|e| StoreAccessError::group(group_id, op, e))
}

#[async_trait]
impl GroupStore for EncodedGroupStore {
    async fn create_if_absent(&self, group: EventGroup) -> Result<EventGroup, StoreAccessError> {
        match self.backend.entry(self.key(&group.group_id)) {
            Entry::Occupied(existing) => {
                decode_header(&group.group_id, &existing.get().header, StoreOp::Create)
            }
            Entry::Vacant(slot) => {
                let header = encode_header(&group, StoreOp::Create)?;
                slot.insert(EncodedGroup {
                    header,
                    members: Vec::new(),
                });
                Ok(group)
            }
        }
    }

    async fn load(&self, group_id: &GroupId) -> Result<Option<EventGroup>, StoreAccessError> {
        self.backend
            .get(&self.key(group_id))
            .map(|stored| decode_header(group_id, &stored.header, StoreOp::Load))
            .transpose()
    }

    async fn append(
        &self,
        group_id: &GroupId,
        message: &Message,
    ) -> Result<EventGroup, StoreAccessError> {
        let encoded = message
            .to_msgpack()
            .map_err(|e| StoreAccessError::group(group_id, StoreOp::Append, e))?;

        let mut stored = self
            .backend
            .get_mut(&self.key(group_id))
            .ok_or_else(|| StoreAccessError::not_found(group_id, StoreOp::Append))?;
        let mut header = decode_header(group_id, &stored.header, StoreOp::Append)?;
        header.record_member();
        stored.header = encode_header(&header, StoreOp::Append)?;
        stored.members.push(encoded);
        Ok(header)
    }

    async fn read(&self, group_id: &GroupId) -> Result<Vec<Message>, StoreAccessError> {
        // Copy the raw bytes out first so decoding never holds the shard lock.
        let raw = self
            .backend
            .get(&self.key(group_id))
            .map(|stored| stored.members.clone())
            .ok_or_else(|| StoreAccessError::not_found(group_id, StoreOp::Read))?;

        raw.iter()
            .map(|bytes| {
                Message::from_msgpack(bytes)
                    .map_err(|e| StoreAccessError::group(group_id, StoreOp::Read, e))
            })
            .collect()
    }

    async fn update(&self, group: &EventGroup) -> Result<(), StoreAccessError> {
        let header = encode_header(group, StoreOp::Update)?;
        let mut stored = self
            .backend
            .get_mut(&self.key(&group.group_id))
            .ok_or_else(|| StoreAccessError::not_found(&group.group_id, StoreOp::Update))?;
        stored.header = header;
        Ok(())
    }

    async fn remove(&self, group_id: &GroupId) -> Result<Option<EventGroup>, StoreAccessError> {
        self.backend
            .remove(&self.key(group_id))
            .map(|(_, stored)| decode_header(group_id, &stored.header, StoreOp::Remove))
            .transpose()
    }

    async fn groups(&self) -> Result<Vec<EventGroup>, StoreAccessError> {
        let raw: Vec<Vec<u8>> = self
            .backend
            .iter()
            .filter(|entry| self.owns(entry.key()))
            .map(|entry| entry.value().header.clone())
            .collect();

        raw.iter()
            .map(|bytes| rmp_serde::from_slice(bytes).map_err(|e| StoreAccessError::List(e.into())))
            .collect()
    }

    fn len(&self) -> usize {
        self.backend
            .iter()
            .filter(|entry| self.owns(entry.key()))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn members_round_trip_through_encoding() {
        let store = EncodedGroupStore::new("agg");
        let id = GroupId::from("g");
        store
            .create_if_absent(EventGroup::new(id.clone(), Some(2)))
            .await
            .unwrap();

        let first = Message::new("a").with_variable("k", 1_i64);
        store.append(&id, &first).await.unwrap();
        let header = store.append(&id, &Message::new("b")).await.unwrap();

        assert_eq!(header.member_count, 2);
        let members = store.read(&id).await.unwrap();
        assert_eq!(members[0], first);
        assert_eq!(members[1].payload_text().as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn prefixes_partition_a_shared_backend() {
        let left = EncodedGroupStore::new("left");
        let right = EncodedGroupStore::shared(left.backend(), "right");
        let id = GroupId::from("same-id");

        left.create_if_absent(EventGroup::new(id.clone(), None))
            .await
            .unwrap();
        left.append(&id, &Message::new("from-left")).await.unwrap();
        right
            .create_if_absent(EventGroup::new(id.clone(), None))
            .await
            .unwrap();

        assert_eq!(left.len(), 1);
        assert_eq!(right.len(), 1);
        assert_eq!(left.read(&id).await.unwrap().len(), 1);
        assert!(right.read(&id).await.unwrap().is_empty());

        right.remove(&id).await.unwrap();
        assert_eq!(left.groups().await.unwrap().len(), 1);
        assert!(right.groups().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn corrupt_member_surfaces_read_error() {
        let store = EncodedGroupStore::new("agg");
        let id = GroupId::from("g");
        store
            .create_if_absent(EventGroup::new(id.clone(), None))
            .await
            .unwrap();
        store
            .backend()
            .get_mut("agg.g")
            .unwrap()
            .members
            .push(vec![0xc1]);

        let err = store.read(&id).await.unwrap_err();
        assert_eq!(err.op(), Some(StoreOp::Read));
    }

    #[tokio::test]
    async fn corrupt_header_surfaces_load_error() {
        let store = EncodedGroupStore::new("agg");
        store.backend().insert(
            "agg.broken".to_string(),
            EncodedGroup {
                header: vec![0xc1],
                members: Vec::new(),
            },
        );

        let err = store.load(&GroupId::from("broken")).await.unwrap_err();
        assert_eq!(err.op(), Some(StoreOp::Load));
        assert!(store.groups().await.is_err());
    }
}
