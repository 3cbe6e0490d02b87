//! Incremental delivery configuration.

use serde::{Deserialize, Serialize};
use trickle_core::CoreResult;

/// Incremental delivery configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IncrementalConfig {
    /// Honor `@defer`/`@stream`; when off every field resolves inline
    pub enabled: bool,
    /// Payloads buffered between the coordinator and the subscriber
    pub sink_capacity: usize,
    /// Calls running at once (0 = no limit)
    pub max_concurrent_calls: usize,
}

impl IncrementalConfig {
    /// Create the default configuration
    #[must_use]
    pub fn new() -> Self {
        Self {
            enabled: true,
            sink_capacity: 1,
            max_concurrent_calls: 0,
        }
    }

    /// Enable or disable incremental delivery
    #[must_use]
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Set sink capacity (clamped to at least 1)
    #[must_use]
    pub fn with_sink_capacity(mut self, capacity: usize) -> Self {
        self.sink_capacity = capacity.max(1);
        self
    }

    /// Set the concurrent call ceiling
    #[must_use]
    pub fn with_max_concurrent_calls(mut self, max: usize) -> Self {
        self.max_concurrent_calls = max;
        self
    }

    /// Load from JSON; missing keys take their defaults
    ///
    /// # Errors
    ///
    /// Returns error if the JSON is malformed
    pub fn from_json(json: &str) -> CoreResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        let capacity = config.sink_capacity;
        Ok(config.with_sink_capacity(capacity))
    }
}

impl Default for IncrementalConfig {
    fn default() -> Self {
        Self::new()
    }
}
