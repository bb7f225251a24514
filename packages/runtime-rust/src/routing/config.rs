use std::time::Duration;

/// Fan-out execution settings.
#[derive(Debug, Clone)]
pub struct ForkJoinConfig {
    /// Maximum pairs in flight at once. 1 runs routes sequentially.
    pub max_concurrency: usize,
    /// Deadline for the whole fan-out. `None` waits indefinitely.
    pub timeout: Option<Duration>,
    /// Collect every outcome before failing. When false, the first failure
    /// cancels the remaining pairs.
    pub delay_errors: bool,
    /// Merge the successful results when some, but not all, routes failed.
    pub tolerate_partial_failure: bool,
}

impl Default for ForkJoinConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 256,
            timeout: None,
            delay_errors: true,
            tolerate_partial_failure: false,
        }
    }
}
