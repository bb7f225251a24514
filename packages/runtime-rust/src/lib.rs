//! `gather` runtime: correlation-based aggregation and fork-join routing.
//!
//! The [`correlation`] module groups related messages and emits one merged
//! message per complete group; [`routing`] fans one message out to several
//! routes and merges their results. Both run on tokio.

pub mod correlation;
pub mod routing;
pub mod storage;

pub use correlation::{Correlator, CorrelatorConfig, CorrelatorPolicy, CorrelationError};
pub use routing::{ForkJoinConfig, ForkJoinError, ForkJoinStrategy, Route, RouteError};
pub use storage::{EventGroup, GroupStore, InMemoryGroupStore, StoreAccessError};
