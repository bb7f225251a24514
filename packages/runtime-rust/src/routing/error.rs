use std::collections::BTreeMap;

use super::merger::MergeError;
use super::outcome::RouteFailure;

/// Every failure of a fan-out, keyed by pair sequence.
#[derive(Debug, thiserror::Error)]
#[error("{} of {total} routes failed", .failures.len())]
pub struct CompositeRoutingError {
    /// Number of pairs in the fan-out.
    pub total: usize,
    pub failures: BTreeMap<usize, RouteFailure>,
}

impl CompositeRoutingError {
    #[must_use]
    pub fn failure(&self, sequence: usize) -> Option<&RouteFailure> {
        self.failures.get(&sequence)
    }

    /// Sequences that hit the deadline.
    pub fn timed_out(&self) -> impl Iterator<Item = usize> + '_ {
        self.failures
            .iter()
            .filter(|(_, failure)| failure.is_timeout())
            .map(|(sequence, _)| *sequence)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ForkJoinError {
    #[error(transparent)]
    Composite(#[from] CompositeRoutingError),
    #[error(transparent)]
    Merge(#[from] MergeError),
    #[error("invalid fork-join configuration: {reason}")]
    InvalidConfig { reason: String },
}
