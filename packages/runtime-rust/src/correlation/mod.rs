//! Correlation-based aggregation.
//!
//! - [`Correlator`]: per-group serialized membership, completion and merge
//! - [`CorrelatorPolicy`]: pluggable key, completion and merge rules
//! - [`policies`]: threshold and fan-out collection policies
//! - [`ExpirySweeper`]: background expiry of stale groups

pub mod config;
pub mod correlator;
pub mod error;
pub mod expiry;
pub mod policies;
pub mod policy;

pub use config::{CorrelatorConfig, ExpiryAction, FailureAction};
pub use correlator::Correlator;
pub use error::{AggregationCause, AggregationError, CorrelationError};
pub use expiry::{ExpiryOutcome, ExpirySweeper, SweepTask, SweeperStopped};
pub use policies::{CollectionPolicy, ThresholdPolicy};
pub use policy::{CorrelatorPolicy, FnPolicy};
