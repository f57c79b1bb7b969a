use blescan::api::{
    BDAddr, DiscoveryEngine, DiscoveryEvent, ScanFilter, ScanResult, ScanSettings,
};
use blescan::sink::BroadcastSink;
use blescan::{ScanCallback, ScanConfig, ScanSessionController};
use futures::stream::StreamExt;
use rand::Rng;
use std::error::Error;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;

/// Pretends to be a radio: reports a random advertisement every 300ms while scanning.
#[derive(Default)]
struct SimulatedRadio {
    advertiser: Mutex<Option<JoinHandle<()>>>,
}

impl DiscoveryEngine for SimulatedRadio {
    fn start_discovery(
        &self,
        filters: &[ScanFilter],
        settings: &ScanSettings,
        callback: &ScanCallback,
    ) -> blescan::Result<()> {
        println!(
            "radio: start ({:?}, {} filters) for {}",
            settings.scan_mode,
            filters.len(),
            callback.id()
        );
        let callback = callback.clone();
        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_millis(300));
            loop {
                interval.tick().await;
                let (address, rssi) = {
                    let mut rng = rand::rng();
                    let last = rng.random_range(0..4u8);
                    (
                        BDAddr::from([0xc0, 0xff, 0xee, 0x00, 0x00, last]),
                        rng.random_range(-95..-30),
                    )
                };
                callback.on_scan_result(ScanResult {
                    address,
                    local_name: Some(format!("sensor-{}", address.into_inner()[5])),
                    rssi,
                });
            }
        });
        if let Some(previous) = self.advertiser.lock().unwrap().replace(task) {
            previous.abort();
        }
        Ok(())
    }

    fn stop_discovery(&self, callback: &ScanCallback) -> blescan::Result<()> {
        println!("radio: stop for {}", callback.id());
        if let Some(task) = self.advertiser.lock().unwrap().take() {
            task.abort();
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    pretty_env_logger::init();

    let sink = BroadcastSink::default();
    let mut events = sink.event_stream();
    let config = ScanConfig::default().with_scan_timeout(Duration::from_secs(2));
    let controller = ScanSessionController::new(SimulatedRadio::default(), config, sink)?;

    let found = Arc::new(AtomicUsize::new(0));
    controller.register_pre_scan_action(|| println!("hook: disable scan button"));
    controller.register_pre_scan_action(|| println!("hook: clear device list"));
    controller.register_post_scan_action(|| println!("hook: enable scan button"));

    tokio::spawn({
        let found = found.clone();
        async move {
            while let Some(event) = events.next().await {
                match event {
                    DiscoveryEvent::DeviceFound(result) => {
                        found.fetch_add(1, Ordering::Relaxed);
                        println!("found {} at {} dBm", result.address, result.rssi);
                    }
                    DiscoveryEvent::BatchScanResults(results) => {
                        found.fetch_add(results.len(), Ordering::Relaxed);
                    }
                    DiscoveryEvent::ScanFailed(code) => println!("scan failed: {}", code),
                }
            }
        }
    });

    // First window runs until the timeout closes it.
    controller.toggle_scan();
    tokio::time::sleep(Duration::from_secs(3)).await;
    println!("scanning after timeout: {}", controller.is_scanning());

    // Second window is closed early by toggling again.
    controller.toggle_scan();
    tokio::time::sleep(Duration::from_secs(1)).await;
    controller.toggle_scan();
    println!("scanning after second toggle: {}", controller.is_scanning());

    println!("{} advertisements seen", found.load(Ordering::Relaxed));
    Ok(())
}
