//! Correlation orchestrator.
//!
//! [`Correlator`] maps each inbound message to a group, appends it, asks the
//! policy whether the group is complete, and on completion merges the group
//! into one outgoing message and removes it from the store.
//!
//! Every operation on one group (`process`, the expiry sweep, forced expiry)
//! runs under that group's async mutex. The mutex slot is retired together
//! with the group, so a message arriving after aggregation opens a fresh
//! group instead of joining the closed one.

use std::sync::Arc;

use dashmap::DashMap;
use gather_core::{GroupId, Message};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

use super::config::{CorrelatorConfig, ExpiryAction, FailureAction};
use super::error::{AggregationError, CorrelationError};
use super::expiry::ExpiryOutcome;
use super::policy::CorrelatorPolicy;
use crate::storage::{now_millis, EventGroup, GroupState, GroupStore, StoreAccessError};

// ---------------------------------------------------------------------------
// Per-group locking
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct LockSlot {
    retired: bool,
}

/// Exclusive hold on one group's mutation domain.
struct GroupLock {
    group_id: GroupId,
    slot: Arc<Mutex<LockSlot>>,
    guard: OwnedMutexGuard<LockSlot>,
}

// ---------------------------------------------------------------------------
// Correlator
// ---------------------------------------------------------------------------

/// Groups related messages and emits one merged message per complete group.
pub struct Correlator {
    policy: Arc<dyn CorrelatorPolicy>,
    store: Arc<dyn GroupStore>,
    config: CorrelatorConfig,
    locks: DashMap<GroupId, Arc<Mutex<LockSlot>>>,
}

impl Correlator {
    #[must_use]
    pub fn new(
        policy: Arc<dyn CorrelatorPolicy>,
        store: Arc<dyn GroupStore>,
        config: CorrelatorConfig,
    ) -> Self {
        Self {
            policy,
            store,
            config,
            locks: DashMap::new(),
        }
    }

    #[must_use]
    pub fn config(&self) -> &CorrelatorConfig {
        &self.config
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn GroupStore> {
        &self.store
    }

    /// Adds `message` to its group and returns the merged message if the
    /// group became complete.
    ///
    /// Returns `Ok(None)` while the group is still collecting members.
    ///
    /// # Errors
    ///
    /// Store faults propagate as [`CorrelationError::Store`]; the stored
    /// group stays open with every member it had. A failing `aggregate`
    /// returns [`CorrelationError::Aggregation`] and the group is removed or
    /// kept according to `on_aggregation_failure`. A stored header that is
    /// not `Open` is refused with [`CorrelationError::GroupNotOpen`] before
    /// anything is appended.
    pub async fn process(&self, message: Message) -> Result<Option<Message>, CorrelationError> {
        let group_id = self.policy.group_id(&message);
        let mut lock = self.lock_group(&group_id).await;

        match self.store.load(&group_id).await? {
            None => {
                let group = self.policy.create_group(&message, group_id.clone());
                self.store.create_if_absent(group).await?;
                debug!(group_id = %group_id, "opened correlation group");
            }
            Some(header) if header.state != GroupState::Open => {
                warn!(group_id = %group_id, state = ?header.state, "refusing member for group that is not open");
                return Err(CorrelationError::GroupNotOpen {
                    group_id,
                    state: header.state,
                });
            }
            Some(_) => {}
        }

        let group = self.store.append(&group_id, &message).await?;
        debug!(group_id = %group_id, members = group.size(), "appended member");

        if !self.policy.should_aggregate(&group) {
            return Ok(None);
        }
        self.aggregate_locked(&mut lock, group).await.map(Some)
    }

    /// Expires every group older than `group_timeout`.
    ///
    /// Does nothing when no timeout is configured. Each candidate is
    /// re-checked under its group lock, so a group completed concurrently by
    /// `process` is skipped.
    ///
    /// # Errors
    ///
    /// Returns an error only if the store cannot list its groups; per-group
    /// faults are reported as [`ExpiryOutcome::Failed`].
    pub async fn expire_groups(&self) -> Result<Vec<ExpiryOutcome>, StoreAccessError> {
        let Some(timeout) = self.config.group_timeout else {
            return Ok(Vec::new());
        };

        let now = now_millis();
        let candidates: Vec<GroupId> = self
            .store
            .groups()
            .await?
            .into_iter()
            .filter(|g| g.is_expired(now, timeout))
            .map(|g| g.group_id)
            .collect();

        let mut outcomes = Vec::with_capacity(candidates.len());
        for group_id in candidates {
            let outcome = self
                .expire_with(&group_id, |g| g.is_expired(now_millis(), timeout))
                .await;
            outcomes.extend(outcome);
        }
        Ok(outcomes)
    }

    /// Expires one group regardless of its age.
    ///
    /// Returns `None` if the group no longer exists.
    pub async fn expire_group(&self, group_id: &GroupId) -> Option<ExpiryOutcome> {
        self.expire_with(group_id, |_| true).await
    }

    // -- internals ----------------------------------------------------------

    async fn lock_group(&self, group_id: &GroupId) -> GroupLock {
        loop {
            let slot = Arc::clone(
                self.locks
                    .entry(group_id.clone())
                    .or_insert_with(|| Arc::new(Mutex::new(LockSlot::default())))
                    .value(),
            );
            let guard = Arc::clone(&slot).lock_owned().await;
            if !guard.retired {
                return GroupLock {
                    group_id: group_id.clone(),
                    slot,
                    guard,
                };
            }
        }
    }

    /// Drops the lock slot so later callers start from a fresh one.
    fn retire(&self, lock: &mut GroupLock) {
        lock.guard.retired = true;
        self.locks
            .remove_if(&lock.group_id, |_, slot| Arc::ptr_eq(slot, &lock.slot));
    }

    /// Moves `group` to `Closed`, removes it and retires its lock.
    async fn close(
        &self,
        lock: &mut GroupLock,
        mut group: EventGroup,
    ) -> Result<(), StoreAccessError> {
        group.transition(GroupState::Closed);
        self.store.remove(&group.group_id).await?;
        self.retire(lock);
        debug!(group_id = %group.group_id, "closed correlation group");
        Ok(())
    }

    /// Merges a complete group held under `lock`.
    ///
    /// `Aggregating` lives only in this header copy. The stored header stays
    /// `Open` until the group is removed, so a fault at any step leaves a
    /// group that the next member or the sweep can still settle.
    async fn aggregate_locked(
        &self,
        lock: &mut GroupLock,
        mut group: EventGroup,
    ) -> Result<Message, CorrelationError> {
        group.transition(GroupState::Aggregating);

        let members = match self.store.read(&group.group_id).await {
            Ok(members) => members,
            Err(err) => {
                metrics::counter!("gather_aggregation_failures_total").increment(1);
                warn!(group_id = %group.group_id, error = %err, "could not read members, group stays open");
                return Err(AggregationError::store(&group, err).into());
            }
        };

        match self.policy.aggregate(&group, &members) {
            Ok(message) => {
                let member_count = group.size();
                let group_id = group.group_id.clone();
                if let Err(err) = self.close(lock, group).await {
                    warn!(group_id = %group_id, error = %err, "could not remove aggregated group, it stays open");
                    return Err(err.into());
                }
                metrics::counter!("gather_groups_aggregated_total").increment(1);
                info!(group_id = %group_id, members = member_count, "aggregated correlation group");
                Ok(message)
            }
            Err(err) => Err(self.aggregation_failed(lock, group, err).await),
        }
    }

    async fn aggregation_failed(
        &self,
        lock: &mut GroupLock,
        group: EventGroup,
        err: AggregationError,
    ) -> CorrelationError {
        metrics::counter!("gather_aggregation_failures_total").increment(1);
        warn!(
            group_id = %group.group_id,
            members = group.size(),
            action = ?self.config.on_aggregation_failure,
            error = %err,
            "aggregation failed"
        );

        match self.config.on_aggregation_failure {
            FailureAction::Remove => {
                if let Err(cleanup_err) = self.close(lock, group).await {
                    warn!(group_id = %lock.group_id, error = %cleanup_err, "could not remove group after aggregation failure");
                }
            }
            // The stored header never left `Open`.
            FailureAction::Retain => {
                debug!(group_id = %group.group_id, "retaining group for retry");
            }
        }
        CorrelationError::Aggregation(err)
    }

    async fn expire_with<F>(&self, group_id: &GroupId, due: F) -> Option<ExpiryOutcome>
    where
        F: FnOnce(&EventGroup) -> bool,
    {
        let mut lock = self.lock_group(group_id).await;
        let mut group = match self.store.load(group_id).await {
            Ok(Some(group)) => group,
            Ok(None) => {
                self.retire(&mut lock);
                return None;
            }
            Err(err) => {
                return Some(ExpiryOutcome::Failed {
                    group_id: group_id.clone(),
                    error: err.into(),
                })
            }
        };

        // Intermediate states are never persisted by a lock holder, so one
        // found here was left by an interrupted writer.
        if group.state != GroupState::Open {
            warn!(group_id = %group_id, state = ?group.state, "reclaiming group left in a non-open state");
            group.state = GroupState::Open;
        }
        if !due(&group) || !group.transition(GroupState::Expired) {
            return None;
        }
        let member_count = group.size();
        let age = group.age(now_millis());
        let action = self.config.expiry_action;
        metrics::counter!("gather_groups_expired_total").increment(1);
        info!(group_id = %group_id, members = member_count, age_ms = u64::try_from(age.as_millis()).unwrap_or(u64::MAX), ?action, "expiring correlation group");

        let outcome = match action {
            ExpiryAction::Discard => ExpiryOutcome::Discarded {
                group_id: group_id.clone(),
                member_count,
            },
            ExpiryAction::Fail => ExpiryOutcome::Failed {
                group_id: group_id.clone(),
                error: CorrelationError::GroupExpired {
                    group_id: group_id.clone(),
                    member_count,
                    age,
                },
            },
            ExpiryAction::Aggregate => {
                let members = match self.store.read(group_id).await {
                    Ok(members) => members,
                    Err(err) => {
                        metrics::counter!("gather_aggregation_failures_total").increment(1);
                        warn!(group_id = %group_id, error = %err, "could not read expired group, leaving it for the next sweep");
                        return Some(ExpiryOutcome::Failed {
                            group_id: group_id.clone(),
                            error: AggregationError::store(&group, err).into(),
                        });
                    }
                };
                match self.policy.aggregate(&group, &members) {
                    Ok(message) => ExpiryOutcome::Aggregated {
                        group_id: group_id.clone(),
                        message,
                    },
                    Err(err) => {
                        metrics::counter!("gather_aggregation_failures_total").increment(1);
                        warn!(group_id = %group_id, error = %err, "partial aggregation of expired group failed");
                        ExpiryOutcome::Failed {
                            group_id: group_id.clone(),
                            error: err.into(),
                        }
                    }
                }
            }
        };

        match self.close(&mut lock, group).await {
            Ok(()) => Some(outcome),
            Err(err) => Some(ExpiryOutcome::Failed {
                group_id: group_id.clone(),
                error: err.into(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
