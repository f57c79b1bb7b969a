// blescan Source Code File
//
// Copyright 2020 Nonpolynomial Labs LLC. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! blescan drives a Bluetooth LE discovery engine through bounded scan windows.
//!
//! The central type is [`ScanSessionController`]. Each call to
//! [`toggle_scan`](ScanSessionController::toggle_scan) either opens a scan window, or closes the
//! one that is currently open. An open window is closed automatically once the configured scan
//! timeout elapses. Hook actions can be registered to run right before a window opens and right
//! after it closes, which is where an application disables its "scan" button, clears its device
//! list, and so on.
//!
//! The radio itself is not part of this crate. It is reached through the
//! [`DiscoveryEngine`](api::DiscoveryEngine) trait, and raw discovery events are relayed,
//! untouched, to a [`DiscoveryEventSink`](api::DiscoveryEventSink).
//!
//! ```no_run
//! # use blescan::api::{DiscoveryEngine, ScanFilter, ScanSettings};
//! # use blescan::{ScanCallback, ScanConfig, ScanSessionController, sink::BroadcastSink};
//! # struct Radio;
//! # impl DiscoveryEngine for Radio {
//! #     fn start_discovery(&self, _: &[ScanFilter], _: &ScanSettings, _: &ScanCallback) -> blescan::Result<()> { Ok(()) }
//! #     fn stop_discovery(&self, _: &ScanCallback) -> blescan::Result<()> { Ok(()) }
//! # }
//! # #[tokio::main]
//! # async fn main() -> blescan::Result<()> {
//! let sink = BroadcastSink::default();
//! let controller = ScanSessionController::new(Radio, ScanConfig::default(), sink.clone())?;
//!
//! controller.register_pre_scan_action(|| println!("clearing device list"));
//! controller.register_post_scan_action(|| println!("scan finished"));
//!
//! controller.toggle_scan();
//! # Ok(())
//! # }
//! ```

pub mod api;
mod callback;
mod config;
mod controller;
mod hooks;
#[cfg(feature = "serde")]
pub mod serde;
pub mod sink;

pub use callback::{CallbackId, ScanCallback};
pub use config::{ScanConfig, DEFAULT_SCAN_PERIOD};
pub use controller::ScanSessionController;
pub use hooks::{HookFailure, HookReport};

use api::ScanErrorCode;
use static_assertions::assert_impl_all;
use std::result;

/// The main error type returned by most methods in blescan.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Permission denied")]
    PermissionDenied,

    #[error("The operation is not supported: {}", _0)]
    NotSupported(String),

    #[error("Scan failed: {}", _0)]
    ScanFailed(ScanErrorCode),

    #[error("No Tokio runtime available to schedule scan timers")]
    NoRuntime,

    #[error("{}", _0)]
    Other(Box<dyn std::error::Error + Send + Sync>),
}

/// Convenience type for a result using the blescan [`Error`] type.
pub type Result<T> = result::Result<T, Error>;

impl Error {
    /// The code reported to the event sink when an engine request fails with this error.
    pub fn scan_error_code(&self) -> ScanErrorCode {
        match self {
            Error::ScanFailed(code) => *code,
            Error::NotSupported(_) => ScanErrorCode::FeatureUnsupported,
            _ => ScanErrorCode::InternalError,
        }
    }
}

// The controller is shared between the caller and its timer task.
assert_impl_all!(ScanSessionController<Box<dyn api::DiscoveryEngine>>: Clone, std::fmt::Debug, Send, Sync);
assert_impl_all!(ScanCallback: Clone, std::fmt::Debug, Send, Sync);
assert_impl_all!(Error: Send, Sync);
