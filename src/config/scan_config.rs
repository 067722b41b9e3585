use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::bluetooth::constants::{DEFAULT_SCAN_TIMEOUT_MS, DEFAULT_TARGET_NAME};
use crate::core::bluetooth::filter::{AdvertisementFilter, NameMatch};

/// Scan settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Advertised name of the peripheral to look for
    pub target_name: String,

    /// Exact or substring comparison of the advertised name
    pub name_match: NameMatch,

    /// Reports weaker than this (dBm) are ignored. `None` accepts any signal.
    pub min_rssi: Option<i16>,

    /// Scan window in milliseconds
    pub timeout_ms: u64,

    /// Connect straight away when the target is found
    pub auto_connect: bool,
}

impl Default for ScanConfig {
    fn default() -> Self {
        ScanConfig {
            target_name: DEFAULT_TARGET_NAME.to_string(),
            name_match: NameMatch::Exact,
            min_rssi: None,
            timeout_ms: DEFAULT_SCAN_TIMEOUT_MS,
            auto_connect: false,
        }
    }
}

impl ScanConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Filter for `target_name` using this config's match options
    pub fn filter_for(&self, target_name: &str) -> AdvertisementFilter {
        AdvertisementFilter::new(target_name)
            .with_name_match(self.name_match)
            .with_min_rssi(self.min_rssi)
    }
}
