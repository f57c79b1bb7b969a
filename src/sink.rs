// blescan Source Code File
//
// Copyright 2020 Nonpolynomial Labs LLC. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! Ready-made [`DiscoveryEventSink`]s.
//!
//! Any `Fn(DiscoveryEvent) + Send + Sync` closure is a sink as well.

use crate::api::{DiscoveryEvent, DiscoveryEventSink};
use futures::stream::{Stream, StreamExt};
use log::trace;
use std::pin::Pin;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

/// Fans discovery events out to any number of async subscribers.
///
/// Subscribers that fall more than `capacity` events behind lose the oldest ones. Events emitted
/// while nobody is subscribed are dropped.
#[derive(Clone, Debug)]
pub struct BroadcastSink {
    events_channel: broadcast::Sender<DiscoveryEvent>,
}

impl Default for BroadcastSink {
    fn default() -> Self {
        BroadcastSink::with_capacity(16)
    }
}

impl BroadcastSink {
    /// A sink letting each subscriber lag at most `capacity` events behind.
    pub fn with_capacity(capacity: usize) -> Self {
        let (events_channel, _) = broadcast::channel(capacity);
        BroadcastSink { events_channel }
    }

    /// A stream of every event delivered after this call.
    pub fn event_stream(&self) -> Pin<Box<dyn Stream<Item = DiscoveryEvent> + Send>> {
        let receiver = self.events_channel.subscribe();
        Box::pin(BroadcastStream::new(receiver).filter_map(|x| async move { x.ok() }))
    }

    /// Number of live event streams.
    pub fn subscriber_count(&self) -> usize {
        self.events_channel.receiver_count()
    }
}

impl DiscoveryEventSink for BroadcastSink {
    fn on_event(&self, event: DiscoveryEvent) {
        if let Err(lost) = self.events_channel.send(event) {
            trace!("Lost discovery event, while nothing subscribed: {:?}", lost);
        }
    }
}
