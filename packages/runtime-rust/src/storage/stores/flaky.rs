//! Fault-injecting [`GroupStore`] for tests.
//!
//! Wraps an [`InMemoryGroupStore`] and fails an armed operation exactly once,
//! leaving the wrapped state untouched by the failed call.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use gather_core::{GroupId, Message};
use parking_lot::Mutex;

use super::memory::InMemoryGroupStore;
use crate::storage::event_group::EventGroup;
use crate::storage::group_store::{GroupStore, StoreAccessError, StoreOp};

#[derive(Debug, Default)]
pub(crate) struct FlakyGroupStore {
    inner: InMemoryGroupStore,
    armed: Mutex<HashSet<StoreOp>>,
    listing_armed: AtomicBool,
}

impl FlakyGroupStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Makes the next call of `op` fail.
    pub(crate) fn fail_next(&self, op: StoreOp) {
        self.armed.lock().insert(op);
    }

    /// Makes the next `groups()` call fail.
    pub(crate) fn fail_next_listing(&self) {
        self.listing_armed.store(true, Ordering::SeqCst);
    }

    fn trip(&self, group_id: &GroupId, op: StoreOp) -> Result<(), StoreAccessError> {
        if self.armed.lock().remove(&op) {
            return Err(StoreAccessError::group(
                group_id,
                op,
                anyhow::anyhow!("injected {op} fault"),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl GroupStore for FlakyGroupStore {
    async fn create_if_absent(&self, group: EventGroup) -> Result<EventGroup, StoreAccessError> {
        self.trip(&group.group_id, StoreOp::Create)?;
        self.inner.create_if_absent(group).await
    }

    async fn load(&self, group_id: &GroupId) -> Result<Option<EventGroup>, StoreAccessError> {
        self.trip(group_id, StoreOp::Load)?;
        self.inner.load(group_id).await
    }

    async fn append(
        &self,
        group_id: &GroupId,
        message: &Message,
    ) -> Result<EventGroup, StoreAccessError> {
        self.trip(group_id, StoreOp::Append)?;
        self.inner.append(group_id, message).await
    }

    async fn read(&self, group_id: &GroupId) -> Result<Vec<Message>, StoreAccessError> {
        self.trip(group_id, StoreOp::Read)?;
        self.inner.read(group_id).await
    }

    async fn update(&self, group: &EventGroup) -> Result<(), StoreAccessError> {
        self.trip(&group.group_id, StoreOp::Update)?;
        self.inner.update(group).await
    }

    async fn remove(&self, group_id: &GroupId) -> Result<Option<EventGroup>, StoreAccessError> {
        self.trip(group_id, StoreOp::Remove)?;
        self.inner.remove(group_id).await
    }

    async fn groups(&self) -> Result<Vec<EventGroup>, StoreAccessError> {
        if self.listing_armed.swap(false, Ordering::SeqCst) {
            return Err(StoreAccessError::List(anyhow::anyhow!("injected listing fault")));
        }
        self.inner.groups().await
    }

    fn len(&self) -> usize {
        self.inner.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn armed_fault_fires_once() {
        let store = FlakyGroupStore::new();
        let id = GroupId::from("g");
        store
            .create_if_absent(EventGroup::new(id.clone(), None))
            .await
            .unwrap();

        store.fail_next(StoreOp::Append);
        let err = store.append(&id, &Message::new("a")).await.unwrap_err();
        assert_eq!(err.op(), Some(StoreOp::Append));
        assert_eq!(store.load(&id).await.unwrap().unwrap().member_count, 0);

        store.append(&id, &Message::new("a")).await.unwrap();
        assert_eq!(store.load(&id).await.unwrap().unwrap().member_count, 1);
    }

    #[tokio::test]
    async fn armed_listing_fault_fires_once() {
        let store = FlakyGroupStore::new();
        store.fail_next_listing();
        assert!(matches!(store.groups().await, Err(StoreAccessError::List(_))));
        assert!(store.groups().await.unwrap().is_empty());
    }
}
