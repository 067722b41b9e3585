use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::bluetooth::constants::{DEFAULT_COMMAND_BUFFER, DEFAULT_LINK_POLL_INTERVAL_MS};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// How often the radio backend checks that the link is still up
    pub link_poll_interval_ms: u64,

    /// Capacity of the manager command queue
    pub command_buffer: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            link_poll_interval_ms: DEFAULT_LINK_POLL_INTERVAL_MS,
            command_buffer: DEFAULT_COMMAND_BUFFER,
        }
    }
}

impl SessionConfig {
    pub fn link_poll_interval(&self) -> Duration {
        Duration::from_millis(self.link_poll_interval_ms.max(1))
    }
}
