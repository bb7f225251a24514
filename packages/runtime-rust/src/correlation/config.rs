use std::time::Duration;

/// What the expiry sweep does with a group that outlived `group_timeout`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExpiryAction {
    /// Drop the group and its members.
    #[default]
    Discard,
    /// Best-effort: aggregate whatever members arrived.
    Aggregate,
    /// Fail-fast: report `CorrelationError::GroupExpired`.
    Fail,
}

/// What happens to a group whose aggregation failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailureAction {
    /// Remove the group so a poison member cannot loop forever.
    #[default]
    Remove,
    /// Keep the group open; the next member re-runs the completeness check.
    Retain,
}

/// Correlator behaviour settings.
#[derive(Debug, Clone)]
pub struct CorrelatorConfig {
    /// Maximum group age before the sweep expires it. `None` disables expiry.
    pub group_timeout: Option<Duration>,
    /// Action applied to expired groups.
    pub expiry_action: ExpiryAction,
    /// Interval between background expiry sweeps.
    pub sweep_interval: Duration,
    /// Action applied when `aggregate` fails.
    pub on_aggregation_failure: FailureAction,
}

impl Default for CorrelatorConfig {
    fn default() -> Self {
        Self {
            group_timeout: None,
            expiry_action: ExpiryAction::Discard,
            sweep_interval: Duration::from_secs(1),
            on_aggregation_failure: FailureAction::Remove,
        }
    }
}
