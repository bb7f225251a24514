//! Correlation group storage.
//!
//! - [`EventGroup`]: persisted header of one group (identity, expected size,
//!   creation time, member count, lifecycle state)
//! - [`GroupStore`]: pluggable backing for headers and ordered members
//! - [`stores`]: the in-memory and `MsgPack`-encoded implementations

pub mod event_group;
pub mod group_store;
pub mod stores;

pub use event_group::*;
pub use group_store::*;
pub use stores::{EncodedBackend, EncodedGroup, EncodedGroupStore, InMemoryGroupStore};
#[cfg(test)]
pub(crate) use stores::FlakyGroupStore;
