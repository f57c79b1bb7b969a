// blescan Source Code File
//
// Copyright 2020 Nonpolynomial Labs LLC. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

use crate::api::{ScanFilter, ScanSettings};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
#[cfg(feature = "serde")]
use serde_cr as serde;
use std::time::Duration;

/// The longest a scan window stays open when nobody stops it.
pub const DEFAULT_SCAN_PERIOD: Duration = Duration::from_millis(12_000);

/// Everything a [`ScanSessionController`](crate::ScanSessionController) needs besides its engine
/// and sink.
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_cr", default)
)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanConfig {
    /// How long a window stays open before the auto-stop timer closes it.
    #[cfg_attr(
        feature = "serde",
        serde(rename = "scan_timeout_ms", with = "crate::serde::millis")
    )]
    pub scan_timeout: Duration,
    /// Passed unmodified to the engine on every start.
    pub filters: Vec<ScanFilter>,
    pub settings: ScanSettings,
}

impl Default for ScanConfig {
    fn default() -> Self {
        ScanConfig {
            scan_timeout: DEFAULT_SCAN_PERIOD,
            filters: vec![],
            settings: ScanSettings::default(),
        }
    }
}

impl ScanConfig {
    /// Sets how long a scan window may stay open.
    pub fn with_scan_timeout(mut self, scan_timeout: Duration) -> Self {
        self.scan_timeout = scan_timeout;
        self
    }

    /// Adds a filter to pass to the engine.
    pub fn with_filter(mut self, filter: ScanFilter) -> Self {
        self.filters.push(filter);
        self
    }

    /// Replaces the engine settings.
    pub fn with_settings(mut self, settings: ScanSettings) -> Self {
        self.settings = settings;
        self
    }
}
