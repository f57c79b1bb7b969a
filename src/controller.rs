// blescan Source Code File
//
// Copyright 2020 Nonpolynomial Labs LLC. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

use crate::{
    api::{DiscoveryEngine, DiscoveryEventSink, ScanFilter, ScanSettings},
    hooks::{HookList, HookReport},
    CallbackId, Error, Result, ScanCallback, ScanConfig,
};
use futures::{FutureExt, StreamExt};
use log::{debug, trace, warn};
use std::fmt::{self, Debug, Formatter};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

/// Opens and closes bounded scan windows on a [`DiscoveryEngine`].
///
/// The controller is cheap to clone; all clones share one session. Dropping the last clone
/// closes a window that is still open.
pub struct ScanSessionController<E: DiscoveryEngine> {
    inner: Arc<Inner<E>>,
}

impl<E: DiscoveryEngine> Clone for ScanSessionController<E> {
    fn clone(&self) -> Self {
        ScanSessionController {
            inner: self.inner.clone(),
        }
    }
}

impl<E: DiscoveryEngine> Debug for ScanSessionController<E> {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        let session = self.inner.session();
        f.debug_struct("ScanSessionController")
            .field("state", &session.state)
            .field("scan_timeout", &self.inner.scan_timeout)
            .field("filters", &self.inner.filters)
            .field("callback", &self.inner.callback.id())
            .field("pre_scan_actions", &session.pre_scan_actions)
            .field("post_scan_actions", &session.post_scan_actions)
            .finish()
    }
}

struct Inner<E: DiscoveryEngine> {
    engine: E,
    scan_timeout: Duration,
    filters: Vec<ScanFilter>,
    settings: ScanSettings,
    callback: ScanCallback,
    runtime: Handle,
    session: Mutex<Session>,
}

#[derive(Debug, Default)]
struct Session {
    state: ScanState,
    last_session_id: u64,
    pre_scan_actions: HookList,
    post_scan_actions: HookList,
}

#[derive(Debug, Default)]
enum ScanState {
    #[default]
    Idle,
    /// Pre-scan actions are running; the engine has not been asked to start yet.
    Starting,
    Scanning {
        id: u64,
        timer: Option<JoinHandle<()>>,
    },
}

#[derive(Debug, Clone, Copy)]
enum StopReason {
    Explicit,
    /// The auto-stop timer of the given session fired.
    Timeout(u64),
}

impl<E: DiscoveryEngine> ScanSessionController<E> {
    /// Creates a controller whose timers run on the current Tokio runtime.
    ///
    /// Fails with [`Error::NoRuntime`] when called outside of one, and with
    /// [`Error::NotSupported`] when that runtime was built without a time driver.
    pub fn new(engine: E, config: ScanConfig, sink: impl DiscoveryEventSink) -> Result<Self> {
        let runtime = Handle::try_current().map_err(|_| Error::NoRuntime)?;
        Self::with_handle(engine, config, sink, runtime)
    }

    /// Creates a controller whose timers and event relay run on `runtime`.
    ///
    /// The runtime must have its time driver enabled (`Builder::enable_time`), otherwise scan
    /// windows could never be closed automatically and [`Error::NotSupported`] is returned.
    pub fn with_handle(
        engine: E,
        config: ScanConfig,
        sink: impl DiscoveryEventSink,
        runtime: Handle,
    ) -> Result<Self> {
        if !has_time_driver(&runtime) {
            return Err(Error::NotSupported(
                "scan timeouts need a Tokio runtime with the time driver enabled".to_string(),
            ));
        }

        let (callback, mut events) = ScanCallback::new();
        runtime.spawn(async move {
            while let Some(event) = events.next().await {
                trace!("Relaying discovery event {:?}", event);
                sink.on_event(event);
            }
        });

        Ok(ScanSessionController {
            inner: Arc::new(Inner {
                engine,
                scan_timeout: config.scan_timeout,
                filters: config.filters,
                settings: config.settings,
                callback,
                runtime,
                session: Mutex::new(Session::default()),
            }),
        })
    }

    /// Opens a scan window when idle, or closes the open one.
    ///
    /// Opening runs the pre-scan actions on the calling thread, asks the engine to start, and
    /// schedules the window to close after the scan timeout. Calling this while a window is
    /// still being opened, from another thread or from a pre-scan action, does nothing.
    pub fn toggle_scan(&self) {
        let pre_scan_actions = {
            let mut session = self.inner.session();
            if matches!(session.state, ScanState::Scanning { .. }) {
                drop(session);
                self.inner.stop(StopReason::Explicit);
                return;
            }
            if matches!(session.state, ScanState::Starting) {
                debug!("Scan start already in progress");
                return;
            }
            session.state = ScanState::Starting;
            session.pre_scan_actions.clone()
        };

        pre_scan_actions.run("pre-scan");
        self.start();
    }

    fn start(&self) {
        let inner = &self.inner;
        let mut session = inner.session();
        if !matches!(session.state, ScanState::Starting) {
            return;
        }

        debug!("scan start");
        let started = panic::catch_unwind(AssertUnwindSafe(|| {
            inner
                .engine
                .start_discovery(&inner.filters, &inner.settings, &inner.callback)
        }));
        match started {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                warn!("Discovery engine rejected scan start: {}", err);
                inner.callback.on_scan_failed(err.scan_error_code());
            }
            Err(payload) => {
                // Leave the session startable again before passing the panic on.
                session.state = ScanState::Idle;
                drop(session);
                panic::resume_unwind(payload);
            }
        }

        session.last_session_id += 1;
        let id = session.last_session_id;
        let weak = Arc::downgrade(inner);
        let timer = inner
            .runtime
            .spawn(auto_stop(weak, id, inner.scan_timeout));
        session.state = ScanState::Scanning {
            id,
            timer: Some(timer),
        };
    }

    /// Closes the open scan window, if there is one. Does nothing while a window is still being
    /// opened.
    pub fn stop_scan(&self) {
        self.inner.stop(StopReason::Explicit);
    }

    /// Whether the engine has been asked to start, and not yet to stop.
    pub fn is_scanning(&self) -> bool {
        matches!(self.inner.session().state, ScanState::Scanning { .. })
    }

    /// Appends an action to run right before every scan start.
    pub fn register_pre_scan_action<F>(&self, action: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner.session().pre_scan_actions.push(Arc::new(action));
    }

    /// Appends an action to run right after every scan stop.
    pub fn register_post_scan_action<F>(&self, action: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner.session().post_scan_actions.push(Arc::new(action));
    }

    /// Runs the pre-scan actions now, without starting a scan.
    pub fn execute_pre_scan_actions(&self) -> HookReport {
        let actions = self.inner.session().pre_scan_actions.clone();
        actions.run("pre-scan")
    }

    /// Runs the post-scan actions now, without stopping a scan.
    pub fn execute_post_scan_actions(&self) -> HookReport {
        let actions = self.inner.session().post_scan_actions.clone();
        actions.run("post-scan")
    }

    /// Number of registered pre-scan actions.
    pub fn pre_scan_action_count(&self) -> usize {
        self.inner.session().pre_scan_actions.len()
    }

    /// Number of registered post-scan actions.
    pub fn post_scan_action_count(&self) -> usize {
        self.inner.session().post_scan_actions.len()
    }

    /// How long a scan window stays open unless closed earlier.
    pub fn scan_timeout(&self) -> Duration {
        self.inner.scan_timeout
    }

    /// Filters passed to the engine on every start.
    pub fn filters(&self) -> &[ScanFilter] {
        &self.inner.filters
    }

    /// Settings passed to the engine on every start.
    pub fn settings(&self) -> &ScanSettings {
        &self.inner.settings
    }

    /// Identity of the callback passed to the engine on every start and stop.
    pub fn callback_id(&self) -> CallbackId {
        self.inner.callback.id()
    }
}

/// Tokio timers panic when the runtime has no time driver.
fn has_time_driver(runtime: &Handle) -> bool {
    let _guard = runtime.enter();
    panic::catch_unwind(|| tokio::time::sleep(Duration::ZERO).now_or_never()).is_ok()
}

async fn auto_stop<E: DiscoveryEngine>(inner: Weak<Inner<E>>, id: u64, timeout: Duration) {
    tokio::time::sleep(timeout).await;
    if let Some(inner) = inner.upgrade() {
        trace!("Scan timeout reached for session {}", id);
        inner.stop(StopReason::Timeout(id));
    }
}

impl<E: DiscoveryEngine> Inner<E> {
    fn session(&self) -> MutexGuard<'_, Session> {
        // Hook actions never run under this lock.
        self.session.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Closes the open window and runs the post-scan actions. Does nothing when no window is
    /// open, or when a timer fires for a session that has already ended.
    fn stop(&self, reason: StopReason) {
        let post_scan_actions = {
            let mut session = self.session();
            let timer = match &mut session.state {
                ScanState::Scanning { id, timer } => match reason {
                    StopReason::Timeout(fired) if fired != *id => {
                        trace!("Ignoring stale timer of session {}", fired);
                        return;
                    }
                    _ => timer.take(),
                },
                _ => return,
            };

            debug!("scan stop");
            if let Err(err) = self.engine.stop_discovery(&self.callback) {
                warn!("Discovery engine rejected scan stop: {}", err);
                self.callback.on_scan_failed(err.scan_error_code());
            }
            session.state = ScanState::Idle;

            if let (StopReason::Explicit, Some(timer)) = (reason, timer) {
                timer.abort();
            }
            session.post_scan_actions.clone()
        };

        post_scan_actions.run("post-scan");
    }
}

impl<E: DiscoveryEngine> Drop for Inner<E> {
    fn drop(&mut self) {
        self.stop(StopReason::Explicit);
    }
}

#[cfg(test)]
impl<E: DiscoveryEngine> ScanSessionController<E> {
    /// Puts the controller into a scanning state without talking to the engine.
    fn force_scanning(&self) {
        let mut session = self.inner.session();
        session.last_session_id += 1;
        let id = session.last_session_id;
        session.state = ScanState::Scanning { id, timer: None };
    }

    fn current_session_id(&self) -> u64 {
        self.inner.session().last_session_id
    }

    fn fire_timer(&self, id: u64) {
        self.inner.stop(StopReason::Timeout(id));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{BDAddr, DiscoveryEvent, ScanErrorCode, ScanMode, ScanResult};
    use crate::sink::BroadcastSink;
    use crate::DEFAULT_SCAN_PERIOD;
    use rand::{rngs::StdRng, Rng, SeedableRng};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Call {
        Start,
        Stop,
        Pre(usize),
        Post(usize),
    }

    type CallLog = Arc<Mutex<Vec<Call>>>;

    #[derive(Default)]
    struct RecordingEngine {
        calls: CallLog,
        callback: Mutex<Option<ScanCallback>>,
        reject_start: Option<ScanErrorCode>,
        panic_on_next_start: AtomicBool,
    }

    impl RecordingEngine {
        fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }

        fn engine_calls(&self) -> Vec<Call> {
            self.calls()
                .into_iter()
                .filter(|c| matches!(c, Call::Start | Call::Stop))
                .collect()
        }
    }

    impl DiscoveryEngine for RecordingEngine {
        fn start_discovery(
            &self,
            _filters: &[ScanFilter],
            _settings: &ScanSettings,
            callback: &ScanCallback,
        ) -> Result<()> {
            if self.panic_on_next_start.swap(false, Ordering::SeqCst) {
                panic!("radio driver crashed");
            }
            self.calls.lock().unwrap().push(Call::Start);
            *self.callback.lock().unwrap() = Some(callback.clone());
            match self.reject_start {
                Some(code) => Err(Error::ScanFailed(code)),
                None => Ok(()),
            }
        }

        fn stop_discovery(&self, callback: &ScanCallback) -> Result<()> {
            let started_with = self.callback.lock().unwrap().as_ref().map(|c| c.id());
            assert_eq!(started_with, Some(callback.id()));
            self.calls.lock().unwrap().push(Call::Stop);
            Ok(())
        }
    }

    fn controller(engine: &Arc<RecordingEngine>) -> ScanSessionController<Arc<RecordingEngine>> {
        ScanSessionController::new(engine.clone(), ScanConfig::default(), ignore).unwrap()
    }

    fn ignore(_: DiscoveryEvent) {}

    fn log_hook(log: &CallLog, call: Call) -> impl Fn() + Send + Sync + 'static {
        let log = log.clone();
        move || log.lock().unwrap().push(call.clone())
    }

    async fn advance(duration: Duration) {
        tokio::time::sleep(duration).await;
        tokio::task::yield_now().await;
    }

    #[test]
    fn new_requires_a_runtime() {
        let result = ScanSessionController::new(
            RecordingEngine::default(),
            ScanConfig::default(),
            ignore,
        );
        assert!(matches!(result, Err(Error::NoRuntime)));
    }

    #[test]
    fn with_handle_works_from_outside_the_runtime() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let engine = Arc::new(RecordingEngine::default());
        let controller = ScanSessionController::with_handle(
            engine.clone(),
            ScanConfig::default(),
            ignore,
            runtime.handle().clone(),
        )
        .unwrap();
        controller.toggle_scan();
        controller.toggle_scan();
        assert_eq!(engine.engine_calls(), vec![Call::Start, Call::Stop]);
    }

    #[test]
    fn runtime_without_timers_is_rejected() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        let result = ScanSessionController::with_handle(
            RecordingEngine::default(),
            ScanConfig::default().with_scan_timeout(Duration::from_millis(1)),
            ignore,
            runtime.handle().clone(),
        );
        assert!(matches!(result, Err(Error::NotSupported(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn toggle_starts_and_auto_stops() {
        let engine = Arc::new(RecordingEngine::default());
        let controller = controller(&engine);
        controller.register_post_scan_action(log_hook(&engine.calls, Call::Post(0)));

        controller.toggle_scan();
        assert!(controller.is_scanning());
        assert_eq!(engine.calls(), vec![Call::Start]);

        advance(DEFAULT_SCAN_PERIOD - Duration::from_millis(1)).await;
        assert!(controller.is_scanning());
        assert_eq!(engine.calls(), vec![Call::Start]);

        advance(Duration::from_millis(2)).await;
        assert!(!controller.is_scanning());
        assert_eq!(engine.calls(), vec![Call::Start, Call::Stop, Call::Post(0)]);
    }

    #[tokio::test(start_paused = true)]
    async fn second_toggle_stops_immediately() {
        let engine = Arc::new(RecordingEngine::default());
        let controller = controller(&engine);
        controller.register_pre_scan_action(log_hook(&engine.calls, Call::Pre(0)));
        controller.register_post_scan_action(log_hook(&engine.calls, Call::Post(0)));

        controller.toggle_scan();
        controller.toggle_scan();
        assert!(!controller.is_scanning());

        advance(DEFAULT_SCAN_PERIOD * 2).await;
        assert_eq!(
            engine.calls(),
            vec![Call::Pre(0), Call::Start, Call::Stop, Call::Post(0)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn toggle_while_scanning_never_starts() {
        let engine = Arc::new(RecordingEngine::default());
        let controller = controller(&engine);
        *engine.callback.lock().unwrap() = Some(controller.inner.callback.clone());
        controller.force_scanning();

        controller.toggle_scan();

        assert_eq!(engine.calls(), vec![Call::Stop]);
        assert!(!controller.is_scanning());
    }

    #[tokio::test(start_paused = true)]
    async fn stale_timer_is_a_noop() {
        let engine = Arc::new(RecordingEngine::default());
        let controller = controller(&engine);
        controller.register_post_scan_action(log_hook(&engine.calls, Call::Post(0)));

        controller.toggle_scan();
        let first = controller.current_session_id();
        controller.toggle_scan();
        controller.fire_timer(first);
        assert_eq!(engine.calls(), vec![Call::Start, Call::Stop, Call::Post(0)]);

        // A timer from an earlier session must not close the current one.
        controller.toggle_scan();
        controller.fire_timer(first);
        assert!(controller.is_scanning());
        assert_eq!(engine.engine_calls(), vec![Call::Start, Call::Stop, Call::Start]);
    }

    #[tokio::test(start_paused = true)]
    async fn new_session_gets_a_full_window() {
        let engine = Arc::new(RecordingEngine::default());
        let controller = controller(&engine);

        controller.toggle_scan();
        advance(Duration::from_secs(6)).await;
        controller.toggle_scan();
        controller.toggle_scan();

        advance(Duration::from_secs(7)).await;
        assert!(controller.is_scanning());
        advance(Duration::from_secs(6)).await;
        assert!(!controller.is_scanning());
        assert_eq!(
            engine.engine_calls(),
            vec![Call::Start, Call::Stop, Call::Start, Call::Stop]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn engine_calls_alternate() {
        let engine = Arc::new(RecordingEngine::default());
        let controller = ScanSessionController::new(
            engine.clone(),
            ScanConfig::default().with_scan_timeout(Duration::from_millis(500)),
            ignore,
        )
        .unwrap();
        let mut rng = StdRng::seed_from_u64(0x5ca9);

        for _ in 0..200 {
            if rng.random_bool(0.7) {
                controller.toggle_scan();
            } else {
                advance(Duration::from_millis(rng.random_range(0..800))).await;
            }
        }

        let calls = engine.engine_calls();
        assert!(!calls.is_empty());
        for (i, call) in calls.iter().enumerate() {
            let expected = if i % 2 == 0 { Call::Start } else { Call::Stop };
            assert_eq!(*call, expected, "call #{} out of order: {:?}", i, calls);
        }
        assert_eq!(controller.is_scanning(), calls.len() % 2 == 1);
    }

    #[tokio::test(start_paused = true)]
    async fn hooks_run_in_order_despite_failures() {
        let engine = Arc::new(RecordingEngine::default());
        let controller = controller(&engine);
        controller.register_pre_scan_action(log_hook(&engine.calls, Call::Pre(0)));
        controller.register_pre_scan_action(|| panic!("list view is gone"));
        controller.register_pre_scan_action(log_hook(&engine.calls, Call::Pre(2)));
        controller.register_post_scan_action(log_hook(&engine.calls, Call::Post(0)));
        controller.register_post_scan_action(log_hook(&engine.calls, Call::Post(1)));
        assert_eq!(controller.pre_scan_action_count(), 3);
        assert_eq!(controller.post_scan_action_count(), 2);

        let report = controller.execute_pre_scan_actions();
        assert_eq!(report.ran, 3);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].index, 1);
        assert_eq!(report.failures[0].message, "list view is gone");

        let report = controller.execute_post_scan_actions();
        assert!(report.is_ok());
        assert_eq!(
            engine.calls(),
            vec![Call::Pre(0), Call::Pre(2), Call::Post(0), Call::Post(1)]
        );

        // A failing hook does not stop the transition either.
        controller.toggle_scan();
        assert!(controller.is_scanning());
    }

    #[tokio::test(start_paused = true)]
    async fn empty_hook_lists_are_noops() {
        let engine = Arc::new(RecordingEngine::default());
        let controller = controller(&engine);
        assert_eq!(controller.execute_pre_scan_actions(), HookReport::default());
        assert_eq!(controller.execute_post_scan_actions(), HookReport::default());
        assert!(engine.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn hooks_observe_consistent_state() {
        let engine = Arc::new(RecordingEngine::default());
        let controller = controller(&engine);
        let seen = Arc::new(Mutex::new(vec![]));

        for _ in 0..2 {
            let seen = seen.clone();
            let weak = Arc::downgrade(&controller.inner);
            let observe = move || {
                let inner = weak.upgrade().unwrap();
                let scanning = ScanSessionController { inner }.is_scanning();
                seen.lock().unwrap().push(scanning);
            };
            controller.register_pre_scan_action(observe.clone());
            controller.register_post_scan_action(observe);
        }

        controller.toggle_scan();
        advance(DEFAULT_SCAN_PERIOD * 2).await;

        assert_eq!(*seen.lock().unwrap(), vec![false, false, false, false]);
    }

    #[tokio::test(start_paused = true)]
    async fn registering_during_a_run_affects_only_later_runs() {
        let engine = Arc::new(RecordingEngine::default());
        let controller = controller(&engine);
        let runs = Arc::new(AtomicUsize::new(0));

        let weak = Arc::downgrade(&controller.inner);
        let counter = runs.clone();
        controller.register_pre_scan_action(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            let inner = weak.upgrade().unwrap();
            let counter = counter.clone();
            ScanSessionController { inner }.register_pre_scan_action(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        });

        assert_eq!(controller.execute_pre_scan_actions().ran, 1);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(controller.pre_scan_action_count(), 2);

        assert_eq!(controller.execute_pre_scan_actions().ran, 2);
        assert_eq!(runs.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn events_reach_the_sink_unmodified() {
        let engine = Arc::new(RecordingEngine::default());
        let sink = BroadcastSink::default();
        let mut events = sink.event_stream();
        let controller =
            ScanSessionController::new(engine.clone(), ScanConfig::default(), sink).unwrap();

        controller.toggle_scan();
        let callback = engine.callback.lock().unwrap().clone().unwrap();
        assert_eq!(callback.id(), controller.callback_id());

        let found = ScanResult {
            address: BDAddr::from([0xc0, 0xff, 0xee, 0x00, 0x00, 0x01]),
            local_name: None,
            rssi: -88,
        };
        callback.on_scan_result(found.clone());
        callback.on_scan_result(found.clone());
        callback.on_scan_failed(ScanErrorCode::OutOfHardwareResources);

        assert_eq!(events.next().await, Some(DiscoveryEvent::DeviceFound(found.clone())));
        assert_eq!(events.next().await, Some(DiscoveryEvent::DeviceFound(found)));
        assert_eq!(
            events.next().await,
            Some(DiscoveryEvent::ScanFailed(ScanErrorCode::OutOfHardwareResources))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_start_is_reported_through_the_sink() {
        let engine = Arc::new(RecordingEngine {
            reject_start: Some(ScanErrorCode::ScanningTooFrequently),
            ..Default::default()
        });
        let sink = BroadcastSink::default();
        let mut events = sink.event_stream();
        let controller =
            ScanSessionController::new(engine.clone(), ScanConfig::default(), sink).unwrap();

        controller.toggle_scan();

        assert_eq!(
            events.next().await,
            Some(DiscoveryEvent::ScanFailed(ScanErrorCode::ScanningTooFrequently))
        );
        assert!(controller.is_scanning());
        advance(DEFAULT_SCAN_PERIOD + Duration::from_millis(1)).await;
        assert_eq!(engine.engine_calls(), vec![Call::Start, Call::Stop]);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_controller_stops_the_scan() {
        let engine = Arc::new(RecordingEngine::default());
        let controller = controller(&engine);
        controller.register_post_scan_action(log_hook(&engine.calls, Call::Post(0)));
        let clone = controller.clone();

        controller.toggle_scan();
        drop(controller);
        assert!(clone.is_scanning());
        drop(clone);

        assert_eq!(engine.calls(), vec![Call::Start, Call::Stop, Call::Post(0)]);
        advance(DEFAULT_SCAN_PERIOD * 2).await;
        assert_eq!(engine.calls().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_scan_is_idempotent() {
        let engine = Arc::new(RecordingEngine::default());
        let controller = controller(&engine);

        controller.stop_scan();
        assert!(engine.calls().is_empty());

        controller.toggle_scan();
        controller.stop_scan();
        controller.stop_scan();
        assert_eq!(engine.calls(), vec![Call::Start, Call::Stop]);
    }

    #[tokio::test(start_paused = true)]
    async fn configuration_is_passed_through() {
        let engine = Arc::new(RecordingEngine::default());
        let settings = ScanSettings {
            scan_mode: ScanMode::Balanced,
            ..Default::default()
        };
        let config = ScanConfig::default()
            .with_scan_timeout(Duration::from_secs(10))
            .with_filter(ScanFilter {
                local_name: Some("Polar H10".into()),
                ..Default::default()
            })
            .with_settings(settings.clone());
        let controller = ScanSessionController::new(engine, config, ignore).unwrap();

        assert_eq!(controller.scan_timeout(), Duration::from_secs(10));
        assert_eq!(controller.filters().len(), 1);
        assert_eq!(controller.settings(), &settings);
        assert!(format!("{:?}", controller).contains("Idle"));
    }

    #[tokio::test(start_paused = true)]
    async fn toggle_from_pre_scan_action_is_ignored() {
        let engine = Arc::new(RecordingEngine::default());
        let controller = controller(&engine);
        let weak = Arc::downgrade(&controller.inner);
        controller.register_pre_scan_action(move || {
            if let Some(inner) = weak.upgrade() {
                let controller = ScanSessionController { inner };
                controller.toggle_scan();
                controller.stop_scan();
                assert!(!controller.is_scanning());
            }
        });

        controller.toggle_scan();

        assert_eq!(engine.engine_calls(), vec![Call::Start]);
        assert!(controller.is_scanning());
    }

    #[tokio::test(start_paused = true)]
    async fn post_scan_action_can_start_the_next_window() {
        let engine = Arc::new(RecordingEngine::default());
        let controller = controller(&engine);
        let weak = Arc::downgrade(&controller.inner);
        let restarted = Arc::new(AtomicBool::new(false));
        let flag = restarted.clone();
        controller.register_post_scan_action(move || {
            if flag.swap(true, Ordering::SeqCst) {
                return;
            }
            if let Some(inner) = weak.upgrade() {
                ScanSessionController { inner }.toggle_scan();
            }
        });

        controller.toggle_scan();
        controller.toggle_scan();

        assert!(restarted.load(Ordering::SeqCst));
        assert_eq!(engine.engine_calls(), vec![Call::Start, Call::Stop, Call::Start]);
        assert!(controller.is_scanning());
    }

    #[tokio::test(start_paused = true)]
    async fn engine_panic_on_start_leaves_controller_usable() {
        let engine = Arc::new(RecordingEngine::default());
        let controller = controller(&engine);
        engine.panic_on_next_start.store(true, Ordering::SeqCst);

        let toggled = panic::catch_unwind(AssertUnwindSafe(|| controller.toggle_scan()));
        assert!(toggled.is_err());
        assert!(!controller.is_scanning());
        assert!(engine.calls().is_empty());

        controller.toggle_scan();
        assert!(controller.is_scanning());
        assert_eq!(engine.engine_calls(), vec![Call::Start]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn explicit_stop_racing_the_timer_stops_once() {
        let mut rng = StdRng::seed_from_u64(0xb1e);
        for _ in 0..50 {
            let engine = Arc::new(RecordingEngine::default());
            let controller = ScanSessionController::new(
                engine.clone(),
                ScanConfig::default().with_scan_timeout(Duration::from_millis(1)),
                ignore,
            )
            .unwrap();
            let post_runs = Arc::new(AtomicUsize::new(0));
            let counter = post_runs.clone();
            controller.register_post_scan_action(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });

            controller.toggle_scan();
            let delay = Duration::from_micros(rng.random_range(0..2_000));
            let stopper = controller.clone();
            tokio::task::spawn_blocking(move || {
                std::thread::sleep(delay);
                stopper.stop_scan();
            })
            .await
            .unwrap();
            tokio::time::sleep(Duration::from_millis(10)).await;

            assert_eq!(engine.engine_calls(), vec![Call::Start, Call::Stop]);
            assert_eq!(post_runs.load(Ordering::SeqCst), 1);
            assert!(!controller.is_scanning());
        }
    }
}
