//! Correlation group metadata.
//!
//! [`EventGroup`] is the persisted header of one correlation group. Members
//! themselves live in the [`GroupStore`](super::GroupStore); the header
//! tracks identity, the expected-size hint, creation time, the member count,
//! and the group's lifecycle [`GroupState`].

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use gather_core::GroupId;
use serde::{Deserialize, Serialize};

/// Lifecycle state of a correlation group.
///
/// State machine: Open -> {Aggregating -> Closed} | {Expired -> Closed}.
/// A failed aggregation that is retained for retry returns to Open.
/// Nothing leaves `Closed`. The correlator moves through `Aggregating` and
/// `Expired` on its working copy only; stored headers stay `Open`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum GroupState {
    /// Accepting members.
    Open,
    /// Completeness was decided; the policy is merging members.
    Aggregating,
    /// The group outlived its timeout and is being swept.
    Expired,
    /// Terminal. The group has been removed from the store.
    Closed,
}

impl GroupState {
    /// Whether `self -> next` is a valid lifecycle transition.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Open, Self::Aggregating | Self::Expired)
                | (Self::Aggregating, Self::Closed | Self::Open)
                | (Self::Expired, Self::Closed)
        )
    }
}

/// Header of one in-flight correlation group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventGroup {
    /// Correlation key shared by every member.
    pub group_id: GroupId,
    /// Expected number of members, if the policy knows it up front.
    pub expected_size: Option<usize>,
    /// Wall-clock creation time (millis since epoch). Drives expiry.
    pub created_at: i64,
    /// Number of members appended so far.
    pub member_count: usize,
    /// Current lifecycle state.
    pub state: GroupState,
}

impl EventGroup {
    /// Creates an empty, open group stamped with the current time.
    #[must_use]
    pub fn new(group_id: GroupId, expected_size: Option<usize>) -> Self {
        Self {
            group_id,
            expected_size,
            created_at: now_millis(),
            member_count: 0,
            state: GroupState::Open,
        }
    }

    #[must_use]
    pub fn with_created_at(mut self, created_at: i64) -> Self {
        self.created_at = created_at;
        self
    }

    /// Number of members appended so far.
    #[must_use]
    pub fn size(&self) -> usize {
        self.member_count
    }

    /// Time elapsed since creation, saturating at zero for clock skew.
    #[must_use]
    pub fn age(&self, now: i64) -> Duration {
        let elapsed = now.saturating_sub(self.created_at).max(0);
        Duration::from_millis(u64::try_from(elapsed).unwrap_or_default())
    }

    /// Whether the group is older than `timeout` at time `now`.
    #[must_use]
    pub fn is_expired(&self, now: i64, timeout: Duration) -> bool {
        self.age(now) >= timeout
    }

    /// Moves the group to `next`, returning `false` if the transition is invalid.
    pub fn transition(&mut self, next: GroupState) -> bool {
        if self.state.can_transition_to(next) {
            self.state = next;
            true
        } else {
            false
        }
    }

    pub(crate) fn record_member(&mut self) {
        self.member_count = self.member_count.saturating_add(1);
    }
}

/// Current wall-clock time in millis since the Unix epoch.
#[must_use]
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
}
