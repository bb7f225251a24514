//! Background expiry of stale correlation groups.
//!
//! [`ExpirySweeper`] owns a tokio task that sweeps the store for groups older
//! than the configured timeout on every `sweep_interval` tick, and runs
//! submitted [`SweepTask`]s in between. Each [`ExpiryOutcome`] is forwarded
//! to an mpsc channel so callers can route partial aggregates and failures.
//!
//! Stopping the sweeper drains the queued tasks and runs one final sweep, so
//! nothing submitted before `stop` is lost.

use std::sync::Arc;
use std::time::Duration;

use gather_core::{GroupId, Message};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use super::correlator::Correlator;
use super::error::CorrelationError;
use crate::storage::StoreAccessError;

/// Capacity of the task queue. Submitting to a full queue waits.
const TASK_QUEUE_CAPACITY: usize = 256;

/// Result of expiring one group, or of a sweep that could not start.
#[derive(Debug)]
pub enum ExpiryOutcome {
    /// Best-effort aggregation of the members that arrived.
    Aggregated { group_id: GroupId, message: Message },
    /// The group was dropped.
    Discarded {
        group_id: GroupId,
        member_count: usize,
    },
    /// Fail-fast expiry, or a fault while expiring.
    Failed {
        group_id: GroupId,
        error: CorrelationError,
    },
    /// The store could not list its groups; no group was examined.
    ListFailed { error: StoreAccessError },
}

impl ExpiryOutcome {
    /// The expired group, or `None` for a failed listing.
    #[must_use]
    pub fn group_id(&self) -> Option<&GroupId> {
        match self {
            Self::Aggregated { group_id, .. }
            | Self::Discarded { group_id, .. }
            | Self::Failed { group_id, .. } => Some(group_id),
            Self::ListFailed { .. } => None,
        }
    }
}

/// On-demand work for an [`ExpirySweeper`].
#[derive(Debug, Clone)]
pub enum SweepTask {
    /// Run a timeout sweep now instead of waiting for the next tick.
    SweepNow,
    /// Expire one group regardless of its age.
    Expire { group_id: GroupId },
}

/// Returned by [`ExpirySweeper::submit`] once the sweeper has stopped.
#[derive(Debug, thiserror::Error)]
#[error("expiry sweeper is stopped")]
pub struct SweeperStopped(pub SweepTask);

/// Sweep loop state living on the spawned task.
struct SweepLoop {
    correlator: Arc<Correlator>,
    outcomes: mpsc::Sender<ExpiryOutcome>,
}

impl SweepLoop {
    async fn run(&self, task: SweepTask) {
        match task {
            SweepTask::SweepNow => self.sweep().await,
            SweepTask::Expire { group_id } => {
                if let Some(outcome) = self.correlator.expire_group(&group_id).await {
                    self.forward(outcome).await;
                }
            }
        }
    }

    async fn sweep(&self) {
        match self.correlator.expire_groups().await {
            Ok(outcomes) => {
                for outcome in outcomes {
                    self.forward(outcome).await;
                }
            }
            Err(error) => {
                warn!(error = %error, "expiry sweep could not list groups");
                self.forward(ExpiryOutcome::ListFailed { error }).await;
            }
        }
    }

    async fn forward(&self, outcome: ExpiryOutcome) {
        if let Err(mpsc::error::SendError(dropped)) = self.outcomes.send(outcome).await {
            warn!(group_id = ?dropped.group_id(), "expiry outcome dropped, receiver closed");
        }
    }

    /// Runs queued tasks, then one last sweep.
    async fn finish(&self, tasks: &mut mpsc::Receiver<SweepTask>) {
        tasks.close();
        while let Some(task) = tasks.recv().await {
            self.run(task).await;
        }
        self.sweep().await;
    }
}

/// Handle to the background expiry sweep of one correlator.
pub struct ExpirySweeper {
    tasks: Option<mpsc::Sender<SweepTask>>,
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl ExpirySweeper {
    /// Spawns the sweep loop on the current tokio runtime.
    ///
    /// The first sweep runs one `sweep_interval` after start.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    #[must_use]
    pub fn start(correlator: Arc<Correlator>, outcomes: mpsc::Sender<ExpiryOutcome>) -> Self {
        let every = correlator
            .config()
            .sweep_interval
            .max(Duration::from_millis(1));
        let (tasks_tx, mut tasks_rx) = mpsc::channel(TASK_QUEUE_CAPACITY);
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
        let sweep_loop = SweepLoop {
            correlator,
            outcomes,
        };

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    task = tasks_rx.recv() => match task {
                        Some(task) => sweep_loop.run(task).await,
                        None => break,
                    },
                    _ = ticker.tick() => sweep_loop.sweep().await,
                }
            }

            sweep_loop.finish(&mut tasks_rx).await;
            debug!("expiry sweeper stopped");
        });

        Self {
            tasks: Some(tasks_tx),
            shutdown: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    /// Queues `task` for the sweep loop.
    ///
    /// # Errors
    ///
    /// Returns the task back in [`SweeperStopped`] once the sweeper stopped.
    pub async fn submit(&self, task: SweepTask) -> Result<(), SweeperStopped> {
        match &self.tasks {
            Some(tx) => tx
                .send(task)
                .await
                .map_err(|mpsc::error::SendError(task)| SweeperStopped(task)),
            None => Err(SweeperStopped(task)),
        }
    }

    /// Whether the sweep loop is still alive.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stops the loop and waits for the queued tasks and the final sweep.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        self.tasks.take();
        if let Some(handle) = self.handle.take() {
            if let Err(err) = handle.await {
                warn!(error = %err, "expiry sweeper task failed");
            }
        }
    }
}

impl Correlator {
    /// Starts a background sweep ticking on `sweep_interval`.
    ///
    /// Expiry outcomes are delivered on `outcomes`.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn start_sweeper(self: &Arc<Self>, outcomes: mpsc::Sender<ExpiryOutcome>) -> ExpirySweeper {
        ExpirySweeper::start(Arc::clone(self), outcomes)
    }
}
