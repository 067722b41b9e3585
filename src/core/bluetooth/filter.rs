//! Advertisement filtering
//! Decides whether an advertisement report belongs to the target peripheral.

use serde::{Deserialize, Serialize};

use crate::core::bluetooth::types::ScanReport;

/// How the advertised name is compared against the target name
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum NameMatch {
    /// The advertised name must equal the target
    #[default]
    Exact,
    /// The advertised name must contain the target
    Contains,
}

/// Pure predicate over advertisement reports
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvertisementFilter {
    target_name: String,
    name_match: NameMatch,
    min_rssi: Option<i16>,
}

impl AdvertisementFilter {
    pub fn new(target_name: impl Into<String>) -> Self {
        Self {
            target_name: target_name.into(),
            name_match: NameMatch::Exact,
            min_rssi: None,
        }
    }

    pub fn with_name_match(mut self, name_match: NameMatch) -> Self {
        self.name_match = name_match;
        self
    }

    /// Reports weaker than `min_rssi` (or without RSSI) are rejected
    pub fn with_min_rssi(mut self, min_rssi: Option<i16>) -> Self {
        self.min_rssi = min_rssi;
        self
    }

    pub fn target_name(&self) -> &str {
        &self.target_name
    }

    /// Returns true if the report is the target peripheral.
    /// A report without a readable name never matches.
    pub fn matches(&self, report: &ScanReport) -> bool {
        let name_ok = report
            .name
            .as_deref()
            .map(|name| match self.name_match {
                NameMatch::Exact => name == self.target_name,
                NameMatch::Contains => name.contains(self.target_name.as_str()),
            })
            .unwrap_or(false);

        if !name_ok {
            return false;
        }

        match self.min_rssi {
            Some(threshold) => report.rssi.map(|rssi| rssi >= threshold).unwrap_or(false),
            None => true,
        }
    }
}
