use std::time::Duration;

use crate::retry::RetryPolicy;

/// Runtime knobs for device operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperationConfig {
    /// Wait for a single response or notification
    pub response_timeout: Duration,
    /// Wait for each follow-up chunk of the OEPL config
    pub chunk_timeout: Duration,
    /// Notifications buffered per connection before new ones are dropped
    pub notification_queue: usize,
    /// Unacknowledged direct-write data frames allowed in flight
    pub pipeline_depth: usize,
    pub retry: RetryPolicy,
}

impl Default for OperationConfig {
    fn default() -> Self {
        Self {
            response_timeout: Duration::from_secs(10),
            chunk_timeout: Duration::from_secs(2),
            notification_queue: 100,
            pipeline_depth: 3,
            retry: RetryPolicy::default(),
        }
    }
}
