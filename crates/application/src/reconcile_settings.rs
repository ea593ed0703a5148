use std::time::Duration;

/// Timing knobs shared by the reconciliation services.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileSettings {
    /// Fixed delay between poll attempts.
    pub poll_interval: Duration,
    /// Budget for a create, including visibility waits.
    pub create_timeout: Duration,
    /// Budget for a read.
    pub read_timeout: Duration,
    /// Budget for a policy update.
    pub update_timeout: Duration,
    /// Budget for a delete, including visibility waits.
    pub delete_timeout: Duration,
    /// Consecutive observations required before a change counts as visible.
    pub visibility_occurrences: u32,
}

impl Default for ReconcileSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            create_timeout: Duration::from_secs(30 * 60),
            read_timeout: Duration::from_secs(5 * 60),
            update_timeout: Duration::from_secs(30 * 60),
            delete_timeout: Duration::from_secs(30 * 60),
            visibility_occurrences: 5,
        }
    }
}
