use std::time::Duration;

use gather_core::Message;

use super::route::RouteError;

/// Why one pair of a fan-out produced no result.
#[derive(Debug, thiserror::Error)]
pub enum RouteFailure {
    #[error("route {route} failed: {error}")]
    Execution {
        route: String,
        #[source]
        error: RouteError,
    },
    #[error("route {route} timed out after {}ms", .timeout.as_millis())]
    TimedOut { route: String, timeout: Duration },
}

impl RouteFailure {
    /// Name of the route that failed.
    #[must_use]
    pub fn route(&self) -> &str {
        match self {
            Self::Execution { route, .. } | Self::TimedOut { route, .. } => route,
        }
    }

    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::TimedOut { .. })
    }

    /// Metric label for this failure.
    pub(crate) fn kind(&self) -> &'static str {
        match self {
            Self::Execution {
                error: RouteError::Cancelled,
                ..
            } => "cancelled",
            Self::Execution { .. } => "execution",
            Self::TimedOut { .. } => "timeout",
        }
    }
}

/// Result of one pair, tagged with its sequence. Holds a result or a
/// failure, never both.
#[derive(Debug)]
pub struct RouteOutcome {
    pub sequence: usize,
    pub route: String,
    pub result: Result<Message, RouteFailure>,
}

impl RouteOutcome {
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}
