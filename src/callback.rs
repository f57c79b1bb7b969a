// blescan Source Code File
//
// Copyright 2020 Nonpolynomial Labs LLC. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

use crate::api::{DiscoveryEvent, ScanErrorCode, ScanResult};
use futures::channel::mpsc::{self, UnboundedReceiver, UnboundedSender};
use log::{error, trace};
use std::fmt::{self, Display, Formatter};
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_CALLBACK_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a [`ScanCallback`], unique within the process.
#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct CallbackId(u64);

impl Display for CallbackId {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "scan-callback-{}", self.0)
    }
}

/// The handle a [`DiscoveryEngine`](crate::api::DiscoveryEngine) reports discovery events to.
///
/// A controller creates exactly one callback and passes it on every start and stop request, so
/// engines can use [`id`](ScanCallback::id) to pair a stop with the start it ends. Reporting never
/// blocks: events are queued and relayed to the controller's sink on the runtime.
#[derive(Clone, Debug)]
pub struct ScanCallback {
    id: CallbackId,
    sender: UnboundedSender<DiscoveryEvent>,
}

impl ScanCallback {
    pub(crate) fn new() -> (ScanCallback, UnboundedReceiver<DiscoveryEvent>) {
        let (sender, receiver) = mpsc::unbounded();
        let id = CallbackId(NEXT_CALLBACK_ID.fetch_add(1, Ordering::Relaxed));
        (ScanCallback { id, sender }, receiver)
    }

    /// The identity shared by every start and stop request of one controller.
    pub fn id(&self) -> CallbackId {
        self.id
    }

    /// Reports a single advertisement.
    pub fn on_scan_result(&self, result: ScanResult) {
        trace!("{} - scan result {:?}", self.id, result);
        self.send(DiscoveryEvent::DeviceFound(result));
    }

    /// Reports advertisements the engine held back and delivers together.
    pub fn on_batch_scan_results(&self, results: Vec<ScanResult>) {
        trace!("{} - batch of {} scan results", self.id, results.len());
        self.send(DiscoveryEvent::BatchScanResults(results));
    }

    /// Reports that the scan could not be carried out.
    pub fn on_scan_failed(&self, code: ScanErrorCode) {
        error!("{} - scan failed with error '{}'", self.id, code);
        self.send(DiscoveryEvent::ScanFailed(code));
    }

    fn send(&self, event: DiscoveryEvent) {
        if let Err(lost) = self.sender.unbounded_send(event) {
            trace!(
                "Lost discovery event, controller is gone: {:?}",
                lost.into_inner()
            );
        }
    }
}
