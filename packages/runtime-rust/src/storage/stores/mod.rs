//! Concrete [`GroupStore`](super::GroupStore) implementations.

pub mod encoded;
#[cfg(test)]
pub(crate) mod flaky;
pub mod memory;

pub use encoded::{EncodedBackend, EncodedGroup, EncodedGroupStore};
#[cfg(test)]
pub(crate) use flaky::FlakyGroupStore;
pub use memory::InMemoryGroupStore;
