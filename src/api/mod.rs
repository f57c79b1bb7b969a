// blescan Source Code File
//
// Copyright 2020 Nonpolynomial Labs LLC. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! The `api` module contains the traits and types which make up blescan's boundary with the
//! outside world: the [`DiscoveryEngine`] the controller drives, the [`DiscoveryEventSink`] it
//! relays to, and the plain data exchanged with both.

pub(crate) mod bdaddr;

pub use self::bdaddr::{BDAddr, ParseBDAddrError};

use crate::{Result, ScanCallback};
use bitflags::bitflags;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
#[cfg(feature = "serde")]
use serde_cr as serde;
use std::fmt::{self, Display, Formatter};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Filters handed to the engine when a scan starts.
///
/// The controller never evaluates a filter itself. They are passed through unmodified and it is
/// up to the [`DiscoveryEngine`] to decide what matches.
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_cr")
)]
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ScanFilter {
    /// If non-empty, only devices advertising at least one of these services are reported.
    #[cfg_attr(feature = "serde", serde(default))]
    pub services: Vec<Uuid>,
    /// Only report devices advertising exactly this local name.
    #[cfg_attr(feature = "serde", serde(default))]
    pub local_name: Option<String>,
    /// Only report the device with this address.
    #[cfg_attr(feature = "serde", serde(default))]
    pub address: Option<BDAddr>,
}

impl ScanFilter {
    /// A filter matching devices that advertise the given service.
    pub fn service(uuid: Uuid) -> Self {
        ScanFilter {
            services: vec![uuid],
            ..Default::default()
        }
    }
}

/// Power/latency trade-off requested from the radio.
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_cr", rename_all = "snake_case")
)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScanMode {
    /// Only receive results from scans started by someone else.
    Opportunistic,
    LowPower,
    Balanced,
    #[default]
    LowLatency,
}

bitflags! {
    /// Which advertisement matches the engine should report.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct CallbackType: u32 {
        const ALL_MATCHES = 0x01;
        const FIRST_MATCH = 0x02;
        const MATCH_LOST = 0x04;
    }
}

impl Default for CallbackType {
    fn default() -> Self {
        CallbackType::ALL_MATCHES
    }
}

/// Engine settings passed, opaque to the controller, along with the filters on every start.
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_cr", default)
)]
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ScanSettings {
    pub scan_mode: ScanMode,
    #[cfg_attr(feature = "serde", serde(with = "crate::serde::callback_type"))]
    pub callback_type: CallbackType,
    /// Zero asks for results as they arrive. Anything larger lets the engine batch them.
    #[cfg_attr(
        feature = "serde",
        serde(rename = "report_delay_ms", with = "crate::serde::millis")
    )]
    pub report_delay: Duration,
}

/// A single advertisement as reported by the engine.
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_cr")
)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanResult {
    pub address: BDAddr,
    pub local_name: Option<String>,
    /// Received signal strength, in dBm.
    pub rssi: i16,
}

/// Reasons an engine gives for failing a scan.
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_cr")
)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScanErrorCode {
    /// A scan with the same settings is already running.
    AlreadyStarted,
    ApplicationRegistrationFailed,
    InternalError,
    FeatureUnsupported,
    OutOfHardwareResources,
    /// Scans were started and stopped too often in a short time.
    ScanningTooFrequently,
    Other(i32),
}

impl ScanErrorCode {
    /// Maps a numeric error code reported by a radio stack.
    pub fn from_i32(code: i32) -> ScanErrorCode {
        match code {
            1 => ScanErrorCode::AlreadyStarted,
            2 => ScanErrorCode::ApplicationRegistrationFailed,
            3 => ScanErrorCode::InternalError,
            4 => ScanErrorCode::FeatureUnsupported,
            5 => ScanErrorCode::OutOfHardwareResources,
            6 => ScanErrorCode::ScanningTooFrequently,
            other => ScanErrorCode::Other(other),
        }
    }

    /// The numeric form of this code.
    pub fn code(&self) -> i32 {
        match *self {
            ScanErrorCode::AlreadyStarted => 1,
            ScanErrorCode::ApplicationRegistrationFailed => 2,
            ScanErrorCode::InternalError => 3,
            ScanErrorCode::FeatureUnsupported => 4,
            ScanErrorCode::OutOfHardwareResources => 5,
            ScanErrorCode::ScanningTooFrequently => 6,
            ScanErrorCode::Other(code) => code,
        }
    }
}

impl From<i32> for ScanErrorCode {
    fn from(code: i32) -> Self {
        ScanErrorCode::from_i32(code)
    }
}

impl Display for ScanErrorCode {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            ScanErrorCode::Other(code) => write!(f, "unknown error {}", code),
            known => write!(f, "{:?} ({})", known, known.code()),
        }
    }
}

/// Raw discovery events, as delivered by the engine through a [`ScanCallback`].
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_cr")
)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryEvent {
    DeviceFound(ScanResult),
    /// Results the engine held back because of a non-zero report delay.
    BatchScanResults(Vec<ScanResult>),
    ScanFailed(ScanErrorCode),
}

/// The radio, or whatever else actually searches for devices.
///
/// Both requests are fire-and-forget: an implementation should hand the request to the radio and
/// return. Results and asynchronous failures are reported through the given [`ScanCallback`].
/// The same callback is used for every start/stop pair issued by one controller, so it can be
/// used to correlate them.
pub trait DiscoveryEngine: Send + Sync + 'static {
    /// Begin delivering advertisements matching `filters` to `callback`.
    fn start_discovery(
        &self,
        filters: &[ScanFilter],
        settings: &ScanSettings,
        callback: &ScanCallback,
    ) -> Result<()>;

    /// Stop the discovery previously started with `callback`.
    fn stop_discovery(&self, callback: &ScanCallback) -> Result<()>;
}

impl<E: DiscoveryEngine + ?Sized> DiscoveryEngine for Box<E> {
    fn start_discovery(
        &self,
        filters: &[ScanFilter],
        settings: &ScanSettings,
        callback: &ScanCallback,
    ) -> Result<()> {
        (**self).start_discovery(filters, settings, callback)
    }

    fn stop_discovery(&self, callback: &ScanCallback) -> Result<()> {
        (**self).stop_discovery(callback)
    }
}

impl<E: DiscoveryEngine + ?Sized> DiscoveryEngine for Arc<E> {
    fn start_discovery(
        &self,
        filters: &[ScanFilter],
        settings: &ScanSettings,
        callback: &ScanCallback,
    ) -> Result<()> {
        (**self).start_discovery(filters, settings, callback)
    }

    fn stop_discovery(&self, callback: &ScanCallback) -> Result<()> {
        (**self).stop_discovery(callback)
    }
}

/// Consumer of raw discovery events.
///
/// Events are relayed in the order the engine produced them, without filtering, deduplication,
/// or buffering. See [`crate::sink`] for ready-made sinks.
pub trait DiscoveryEventSink: Send + Sync + 'static {
    fn on_event(&self, event: DiscoveryEvent);
}

impl<F> DiscoveryEventSink for F
where
    F: Fn(DiscoveryEvent) + Send + Sync + 'static,
{
    fn on_event(&self, event: DiscoveryEvent) {
        self(event)
    }
}
