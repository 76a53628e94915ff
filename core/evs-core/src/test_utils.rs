//! Fakes shared by the unit and integration tests.

use crate::activity::{ActivityIntent, ActivityLauncher};
use crate::client::{
    BufferDescriptor, DeathNotifier, StatusListener, StatusListenerRegistry, StreamCallback,
};
use crate::config::{EvsConfig, ServiceConfig, StreamSharing, TimingConfig};
use crate::error::{DeliveryError, EvsError, Result};
use crate::events::{Event, Scheduler};
use crate::hal::{HalEventSink, HalSession};
use crate::service::CarEvsService;
use crate::state_machine::StateMachine;
use crossbeam::channel::{self, Receiver};
use evs_protocol::{EvsStatus, RequestPriority, ServiceType, StreamEvent};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

pub const TEST_ACTIVITY: &str = "com.example.evs/.Viewer";
pub const TEST_CAMERA: &str = "/dev/video10";
const FAST_RECONNECT_MS: u64 = 20;

#[derive(Debug, Default)]
pub struct FakeHalState {
    pub connected: bool,
    pub fail_connect: bool,
    pub fail_open: bool,
    pub fail_start: bool,
    pub camera: Option<String>,
    pub opened: Vec<String>,
    pub streaming: bool,
    pub connect_calls: usize,
    pub start_calls: usize,
    pub stop_calls: usize,
    pub released: Vec<u32>,
}

/// Shared handle onto a fake HAL; the session itself is moved into the machine.
#[derive(Debug, Clone, Default)]
pub struct FakeHalHandle {
    state: Arc<Mutex<FakeHalState>>,
}

impl FakeHalHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session(&self) -> Box<dyn HalSession> {
        Box::new(FakeHal {
            state: Arc::clone(&self.state),
        })
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut FakeHalState) -> R) -> R {
        f(&mut self.state.lock().unwrap())
    }
}

struct FakeHal {
    state: Arc<Mutex<FakeHalState>>,
}

impl HalSession for FakeHal {
    fn connect_if_necessary(&mut self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.connect_calls += 1;
        if state.fail_connect {
            return Err(EvsError::hal("connect", "fake connection refused"));
        }
        state.connected = true;
        Ok(())
    }

    fn disconnect(&mut self) {
        let mut state = self.state.lock().unwrap();
        state.connected = false;
        state.camera = None;
        state.streaming = false;
    }

    fn is_connected(&self) -> bool {
        self.state.lock().unwrap().connected
    }

    fn open_camera(&mut self, camera_id: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_open || !state.connected {
            return Err(EvsError::hal("open camera", "fake open failure"));
        }
        state.camera = Some(camera_id.to_string());
        state.opened.push(camera_id.to_string());
        Ok(())
    }

    fn close_camera(&mut self) {
        self.state.lock().unwrap().camera = None;
    }

    fn start_stream(&mut self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.start_calls += 1;
        if state.fail_start {
            return Err(EvsError::hal("start stream", "fake start failure"));
        }
        state.streaming = true;
        Ok(())
    }

    fn stop_stream(&mut self) {
        let mut state = self.state.lock().unwrap();
        state.stop_calls += 1;
        state.streaming = false;
    }

    fn done_with_frame(&mut self, buffer_id: u32) {
        self.state.lock().unwrap().released.push(buffer_id);
    }
}

/// Stream callback that records everything it is handed.
#[derive(Default)]
pub struct RecordingClient {
    events: Mutex<Vec<StreamEvent>>,
    frames: Mutex<Vec<u32>>,
    notifier: Mutex<Option<DeathNotifier>>,
    fail_frames: AtomicBool,
    fail_link: AtomicBool,
}

impl RecordingClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<StreamEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Packed buffer ids, in delivery order.
    pub fn frames(&self) -> Vec<u32> {
        self.frames.lock().unwrap().clone()
    }

    pub fn fail_frames(&self) {
        self.fail_frames.store(true, Ordering::SeqCst);
    }

    pub fn fail_link(&self) {
        self.fail_link.store(true, Ordering::SeqCst);
    }

    pub fn is_linked(&self) -> bool {
        self.notifier.lock().unwrap().is_some()
    }

    /// Simulates the client's process dying.
    pub fn die(&self) {
        let notifier = self.notifier.lock().unwrap().take();
        if let Some(notifier) = notifier {
            notifier.notify();
        }
    }
}

impl StreamCallback for RecordingClient {
    fn on_stream_event(&self, event: StreamEvent) -> std::result::Result<(), DeliveryError> {
        self.events.lock().unwrap().push(event);
        Ok(())
    }

    fn on_new_frame(&self, buffer: &BufferDescriptor) -> std::result::Result<(), DeliveryError> {
        if self.fail_frames.load(Ordering::SeqCst) {
            return Err(DeliveryError::Disconnected);
        }
        self.frames.lock().unwrap().push(buffer.id);
        Ok(())
    }

    fn link_to_death(&self, notifier: DeathNotifier) -> std::result::Result<(), DeliveryError> {
        if self.fail_link.load(Ordering::SeqCst) {
            return Err(DeliveryError::Disconnected);
        }
        *self.notifier.lock().unwrap() = Some(notifier);
        Ok(())
    }

    fn unlink_to_death(&self) {
        self.notifier.lock().unwrap().take();
    }
}

#[derive(Default)]
pub struct RecordingListener {
    statuses: Mutex<Vec<EvsStatus>>,
    notifier: Mutex<Option<DeathNotifier>>,
}

impl RecordingListener {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn statuses(&self) -> Vec<EvsStatus> {
        self.statuses.lock().unwrap().clone()
    }

    pub fn die(&self) {
        let notifier = self.notifier.lock().unwrap().take();
        if let Some(notifier) = notifier {
            notifier.notify();
        }
    }
}

impl StatusListener for RecordingListener {
    fn on_status_changed(&self, status: EvsStatus) -> std::result::Result<(), DeliveryError> {
        self.statuses.lock().unwrap().push(status);
        Ok(())
    }

    fn link_to_death(&self, notifier: DeathNotifier) -> std::result::Result<(), DeliveryError> {
        *self.notifier.lock().unwrap() = Some(notifier);
        Ok(())
    }

    fn unlink_to_death(&self) {
        self.notifier.lock().unwrap().take();
    }
}

#[derive(Default)]
pub struct RecordingLauncher {
    intents: Mutex<Vec<ActivityIntent>>,
}

impl RecordingLauncher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn intents(&self) -> Vec<ActivityIntent> {
        self.intents.lock().unwrap().clone()
    }
}

impl ActivityLauncher for RecordingLauncher {
    fn start_activity(&self, intent: ActivityIntent) -> std::result::Result<(), DeliveryError> {
        self.intents.lock().unwrap().push(intent);
        Ok(())
    }
}

/// One rearview state machine wired to fakes.
pub struct MachineHarness {
    pub machine: StateMachine,
    pub hal: FakeHalHandle,
    pub launcher: Arc<RecordingLauncher>,
    pub listener: Arc<RecordingListener>,
    pub registry: Arc<StatusListenerRegistry>,
    pub events: Receiver<Event>,
}

impl MachineHarness {
    /// A fresh machine in `UNAVAILABLE`.
    pub fn new() -> Self {
        Self::build(
            ServiceConfig::new(ServiceType::Rearview, TEST_CAMERA).with_activity(TEST_ACTIVITY),
            StreamSharing::Exclusive,
        )
    }

    pub fn without_activity() -> Self {
        Self::build(
            ServiceConfig::new(ServiceType::Rearview, TEST_CAMERA),
            StreamSharing::Exclusive,
        )
    }

    /// A connected machine in `INACTIVE`.
    pub fn inactive() -> Self {
        let harness = Self::new();
        let _ = harness.machine.request_stop_activity(RequestPriority::Low);
        harness
    }

    pub fn with_sharing(sharing: StreamSharing) -> Self {
        Self::build(
            ServiceConfig::new(ServiceType::Rearview, TEST_CAMERA).with_activity(TEST_ACTIVITY),
            sharing,
        )
    }

    fn build(service: ServiceConfig, sharing: StreamSharing) -> Self {
        let (tx, rx) = channel::unbounded();
        let scheduler = Scheduler::new(tx);
        let registry = Arc::new(StatusListenerRegistry::new(scheduler.clone()));
        let listener = RecordingListener::new();
        registry
            .register(listener.clone())
            .expect("register listener");

        let hal = FakeHalHandle::new();
        let launcher = RecordingLauncher::new();
        let machine = StateMachine::new(
            &service,
            hal.session(),
            sharing,
            TimingConfig::default(),
            scheduler,
            launcher.clone(),
            Arc::clone(&registry),
        );

        Self {
            machine,
            hal,
            launcher,
            listener,
            registry,
            events: rx,
        }
    }
}

/// A full service facade over fake HALs, one per configured service type.
pub struct ServiceHarness {
    pub service: CarEvsService,
    pub launcher: Arc<RecordingLauncher>,
    pub listener: Arc<RecordingListener>,
    hals: HashMap<ServiceType, FakeHalHandle>,
    sinks: HashMap<ServiceType, HalEventSink>,
}

impl ServiceHarness {
    pub fn new(config: EvsConfig) -> Self {
        let launcher = RecordingLauncher::new();
        let mut hals = HashMap::new();
        let mut sinks = HashMap::new();
        let service = CarEvsService::new(&config, launcher.clone(), |service, sink| {
            let hal = FakeHalHandle::new();
            let session = hal.session();
            hals.insert(service.service_type, hal);
            sinks.insert(service.service_type, sink);
            session
        })
        .expect("build service");

        let listener = RecordingListener::new();
        service
            .register_status_listener(listener.clone())
            .expect("register listener");

        Self {
            service,
            launcher,
            listener,
            hals,
            sinks,
        }
    }

    /// Rearview with an activity and a short reconnect interval. The viewer
    /// timeout is taken from `config`.
    pub fn rearview(mut config: EvsConfig) -> Self {
        if config.services.is_empty() && config.descriptors.is_empty() {
            config.services.push(
                ServiceConfig::new(ServiceType::Rearview, TEST_CAMERA)
                    .with_activity(TEST_ACTIVITY),
            );
        }
        config.timing.hal_reconnect_interval_ms = FAST_RECONNECT_MS;
        Self::new(config)
    }

    /// Rearview harness already initialized to `INACTIVE`.
    pub fn initialized(config: EvsConfig) -> Self {
        let harness = Self::rearview(config);
        harness.service.init();
        harness
    }

    pub fn hal(&self, service_type: ServiceType) -> &FakeHalHandle {
        &self.hals[&service_type]
    }

    pub fn sink(&self, service_type: ServiceType) -> &HalEventSink {
        &self.sinks[&service_type]
    }

    pub fn machine(&self, service_type: ServiceType) -> &StateMachine {
        self.service.machine(service_type).expect("configured machine")
    }

    pub fn dispatch(&self) -> usize {
        self.service.dispatch_pending_events()
    }

    /// Handles events until `done` holds or a generous deadline passes.
    pub fn dispatch_until(&self, mut done: impl FnMut(&Self) -> bool) -> bool {
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(2);
        while std::time::Instant::now() < deadline {
            if done(self) {
                return true;
            }
            self.service
                .dispatch_next_event(std::time::Duration::from_millis(20));
        }
        done(self)
    }
}
