//! `gather` core: messages, payloads, and runtime values shared by the
//! correlation and fork-join routing runtime.

pub mod message;
pub mod types;

pub use message::{merge_variables, GroupCorrelation, GroupId, Message, Payload};
pub use types::Value;
