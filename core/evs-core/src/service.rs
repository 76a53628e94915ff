//! Service facade: the externally callable EVS surface.
//!
//! Owns one [`StateMachine`] per configured service type and the event queue
//! that serializes HAL callbacks, vehicle signals, display changes, client
//! deaths, and timer expiries. Synchronous API calls go straight to the state
//! machines; everything asynchronous is posted to the queue and handled by
//! [`CarEvsService::run`] (or drained with `dispatch_pending_events`).

use crate::activity::{ActivityIntent, ActivityLauncher};
use crate::client::{ClientId, StatusListener, StatusListenerRegistry, StreamClient};
use crate::config::{EvsConfig, ServiceConfig, TimingConfig, TriggerSource};
use crate::error::{EvsError, Result};
use crate::events::{Event, Scheduler};
use crate::hal::{HalEventSink, HalSession};
use crate::state_machine::{DeadClientOutcome, EvsHalEvent, HalEventOutcome, StateMachine};
use crate::token::SessionToken;
use crossbeam::channel::{self, Receiver, RecvTimeoutError};
use evs_protocol::{
    unpack_buffer_id, ErrorCode, EvsStatus, Gear, RequestPriority, ServiceState, ServiceType,
};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub struct CarEvsService {
    trigger: TriggerSource,
    trusted_uid: u32,
    timing: TimingConfig,
    machines: BTreeMap<ServiceType, StateMachine>,
    listeners: Arc<StatusListenerRegistry>,
    scheduler: Scheduler,
    events: Receiver<Event>,
    display_on: Mutex<Option<bool>>,
}

impl CarEvsService {
    /// Builds one state machine per configured service. `hal_factory` is
    /// called once per service with the sink its HAL should report through.
    pub fn new<F>(
        config: &EvsConfig,
        launcher: Arc<dyn ActivityLauncher>,
        mut hal_factory: F,
    ) -> Result<Self>
    where
        F: FnMut(&ServiceConfig, HalEventSink) -> Box<dyn HalSession>,
    {
        let (tx, rx) = channel::unbounded();
        let scheduler = Scheduler::new(tx);
        let listeners = Arc::new(StatusListenerRegistry::new(scheduler.clone()));

        let mut machines = BTreeMap::new();
        for service in config.service_configs()? {
            let sink = HalEventSink::new(service.service_type, scheduler.clone());
            let hal = hal_factory(&service, sink);
            let machine = StateMachine::new(
                &service,
                hal,
                config.stream_sharing,
                config.timing.clone(),
                scheduler.clone(),
                Arc::clone(&launcher),
                Arc::clone(&listeners),
            );
            machines.insert(service.service_type, machine);
        }

        tracing::info!(
            services = ?machines.keys().collect::<Vec<_>>(),
            trigger = ?config.trigger,
            sharing = ?config.stream_sharing,
            "EVS service configured"
        );

        Ok(Self {
            trigger: config.trigger,
            trusted_uid: config.trusted_uid,
            timing: config.timing.clone(),
            machines,
            listeners,
            scheduler,
            events: rx,
            display_on: Mutex::new(None),
        })
    }

    /// Connects every service to its HAL. Services that fail stay
    /// `UNAVAILABLE` and retry on the reconnect interval.
    pub fn init(&self) {
        for machine in self.machines.values() {
            let result = machine.execute(RequestPriority::Low, ServiceState::Inactive, None, None);
            if !result.is_ok() {
                tracing::warn!(
                    service_type = %machine.service_type(),
                    error = %result,
                    "Initial HAL connection failed; will retry"
                );
                self.schedule_reconnect(machine.service_type());
            }
        }
    }

    /// Tears down every session and stops the event loop.
    pub fn release(&self) {
        for machine in self.machines.values() {
            let _ = machine.execute(RequestPriority::High, ServiceState::Unavailable, None, None);
        }
        self.listeners.clear();
        self.scheduler.post(Event::Shutdown);
        tracing::info!("EVS service released");
    }

    // ─────────────────────────────────────────────────────────────────────
    // Public API
    // ─────────────────────────────────────────────────────────────────────

    pub fn start_activity(&self, service_type: ServiceType) -> ErrorCode {
        match self.machines.get(&service_type) {
            Some(machine) => machine.request_start_activity(RequestPriority::Normal),
            None => unsupported(service_type),
        }
    }

    pub fn stop_activity(&self, service_type: ServiceType) -> ErrorCode {
        match self.machines.get(&service_type) {
            Some(machine) => machine.request_stop_activity(RequestPriority::Normal),
            None => unsupported(service_type),
        }
    }

    pub fn start_video_stream(
        &self,
        service_type: ServiceType,
        token: Option<&SessionToken>,
        client: &StreamClient,
    ) -> ErrorCode {
        match self.machines.get(&service_type) {
            Some(machine) => machine.request_start_video_stream(client, token),
            None => unsupported(service_type),
        }
    }

    /// Stream start from the viewer a launch intent brought up. Only the
    /// trusted system caller may use it; the stream runs at the priority of
    /// the launching request so the same requester can dismiss it again.
    pub fn start_launched_video_stream(
        &self,
        caller_uid: u32,
        intent: &ActivityIntent,
        client: &StreamClient,
    ) -> Result<ErrorCode> {
        if caller_uid != self.trusted_uid {
            return Err(EvsError::PermissionDenied {
                uid: caller_uid,
                operation: "stream on behalf of a launched viewer",
            });
        }
        Ok(match self.machines.get(&intent.service_type) {
            Some(machine) => machine.request_start_launched_video_stream(
                client,
                intent.priority,
                intent.session_token.as_ref(),
            ),
            None => unsupported(intent.service_type),
        })
    }

    /// `None` stops every client of the service.
    pub fn stop_video_stream(
        &self,
        service_type: ServiceType,
        client: Option<&StreamClient>,
    ) -> ErrorCode {
        match self.machines.get(&service_type) {
            Some(machine) => machine.request_stop_video_stream(client),
            None => unsupported(service_type),
        }
    }

    pub fn return_frame_buffer(&self, buffer_id: u32) {
        let (service_type, hal_buffer_id) = unpack_buffer_id(buffer_id);
        match service_type.and_then(|ty| self.machines.get(&ty)) {
            Some(machine) => machine.done_with_frame(hal_buffer_id),
            None => tracing::warn!(buffer_id, "Returned buffer belongs to no known service"),
        }
    }

    pub fn current_status(&self, service_type: ServiceType) -> EvsStatus {
        self.machines
            .get(&service_type)
            .map(StateMachine::status)
            .unwrap_or_else(|| EvsStatus::new(service_type, ServiceState::Unavailable))
    }

    pub fn statuses(&self) -> Vec<EvsStatus> {
        self.machines.values().map(StateMachine::status).collect()
    }

    /// Mints the session token for the rearview viewer. Only the trusted
    /// system caller may do this; it does not cause a transition.
    pub fn generate_session_token(&self, caller_uid: u32) -> Result<SessionToken> {
        if caller_uid != self.trusted_uid {
            return Err(EvsError::PermissionDenied {
                uid: caller_uid,
                operation: "generate a session token",
            });
        }
        let machine = self
            .machines
            .get(&ServiceType::Rearview)
            .ok_or(EvsError::UnsupportedServiceType(ServiceType::Rearview))?;
        let token = SessionToken::mint();
        machine.set_session_token(Some(token));
        Ok(token)
    }

    pub fn is_supported(&self, service_type: ServiceType) -> bool {
        self.machines.contains_key(&service_type)
    }

    pub fn is_connected(&self, service_type: ServiceType) -> bool {
        self.machines
            .get(&service_type)
            .map(StateMachine::is_connected)
            .unwrap_or(false)
    }

    pub fn register_status_listener(&self, listener: Arc<dyn StatusListener>) -> Result<ClientId> {
        self.listeners.register(listener)
    }

    pub fn unregister_status_listener(&self, id: ClientId) -> bool {
        self.listeners.unregister(id)
    }

    /// Returns `false` for unsupported service types.
    pub fn set_camera_id(&self, service_type: ServiceType, camera_id: &str) -> bool {
        match self.machines.get(&service_type) {
            Some(machine) => {
                machine.set_camera_id(camera_id);
                true
            }
            None => false,
        }
    }

    pub fn camera_id(&self, service_type: ServiceType) -> Option<String> {
        self.machines.get(&service_type).map(StateMachine::camera_id)
    }

    pub fn machine(&self, service_type: ServiceType) -> Option<&StateMachine> {
        self.machines.get(&service_type)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Event inputs
    // ─────────────────────────────────────────────────────────────────────

    pub fn post_event(&self, event: Event) {
        self.scheduler.post(event);
    }

    pub fn notify_gear_changed(&self, gear: Gear, timestamp_ms: i64) {
        self.post_event(Event::GearChanged { gear, timestamp_ms });
    }

    pub fn notify_service_request(&self, service_type: ServiceType, on: bool, timestamp_ms: i64) {
        self.post_event(Event::ServiceRequest {
            service_type,
            on,
            timestamp_ms,
        });
    }

    pub fn notify_display_changed(&self, on: bool) {
        self.post_event(Event::DisplayChanged { on });
    }

    /// Processes queued events until `release` is called.
    pub fn run(&self) {
        tracing::debug!("EVS event loop started");
        loop {
            match self.events.recv() {
                Ok(Event::Shutdown) | Err(_) => break,
                Ok(event) => self.handle_event(event),
            }
        }
        tracing::debug!("EVS event loop stopped");
    }

    /// Handles everything already queued without blocking.
    pub fn dispatch_pending_events(&self) -> usize {
        let mut handled = 0;
        while let Ok(event) = self.events.try_recv() {
            self.handle_event(event);
            handled += 1;
        }
        handled
    }

    /// Waits up to `timeout` for one event and handles it.
    pub fn dispatch_next_event(&self, timeout: Duration) -> bool {
        match self.events.recv_timeout(timeout) {
            Ok(event) => {
                self.handle_event(event);
                true
            }
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => false,
        }
    }

    pub fn handle_event(&self, event: Event) {
        match event {
            Event::HalFrame {
                service_type,
                frame,
            } => {
                if let Some(machine) = self.machines.get(&service_type) {
                    machine.deliver_frame(frame);
                }
            }
            Event::HalStreamEvent {
                service_type,
                event,
            } => {
                if let Some(machine) = self.machines.get(&service_type) {
                    machine.forward_stream_event(event);
                }
            }
            Event::HalDied { service_type } => self.handle_hal_death(service_type),
            Event::GearChanged { gear, timestamp_ms } => {
                self.handle_gear_changed(gear, timestamp_ms)
            }
            Event::ServiceRequest {
                service_type,
                on,
                timestamp_ms,
            } => self.handle_service_request(service_type, on, timestamp_ms),
            Event::DisplayChanged { on } => self.handle_display_changed(on),
            Event::StreamClientDied {
                service_type,
                client,
            } => self.handle_stream_client_death(service_type, client),
            Event::StatusListenerDied { listener } => {
                tracing::warn!(listener = %listener, "Status listener died");
                self.listeners.unregister(listener);
            }
            Event::ActivityRequestTimeout {
                service_type,
                generation,
            } => self.handle_activity_request_timeout(service_type, generation),
            Event::ReconnectHal { service_type } => self.handle_reconnect(service_type),
            Event::Shutdown => {}
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Event handlers
    // ─────────────────────────────────────────────────────────────────────

    fn handle_hal_death(&self, service_type: ServiceType) {
        let Some(machine) = self.machines.get(&service_type) else {
            return;
        };
        let _ = machine.execute(RequestPriority::High, ServiceState::Unavailable, None, None);
        self.schedule_reconnect(service_type);
    }

    fn schedule_reconnect(&self, service_type: ServiceType) {
        self.scheduler.schedule_after(
            self.timing.hal_reconnect_interval(),
            Event::ReconnectHal { service_type },
        );
    }

    fn handle_reconnect(&self, service_type: ServiceType) {
        let Some(machine) = self.machines.get(&service_type) else {
            return;
        };
        if machine.state() != ServiceState::Unavailable {
            return;
        }
        let result = machine.execute(RequestPriority::Low, ServiceState::Inactive, None, None);
        if result.is_ok() {
            tracing::info!(service_type = %service_type, "Reconnected to the EVS HAL");
        } else {
            tracing::debug!(service_type = %service_type, "HAL reconnect failed; retrying");
            self.schedule_reconnect(service_type);
        }
    }

    fn handle_gear_changed(&self, gear: Gear, timestamp_ms: i64) {
        if self.trigger != TriggerSource::GearSelection {
            tracing::debug!(gear = gear.as_str(), "Gear trigger disabled; ignoring");
            return;
        }
        self.handle_vehicle_trigger(ServiceType::Rearview, gear == Gear::Reverse, timestamp_ms);
    }

    fn handle_service_request(&self, service_type: ServiceType, on: bool, timestamp_ms: i64) {
        if self.trigger != TriggerSource::ServiceRequest {
            tracing::debug!(service_type = %service_type, "Service request trigger disabled; ignoring");
            return;
        }
        self.handle_vehicle_trigger(service_type, on, timestamp_ms);
    }

    fn handle_vehicle_trigger(&self, service_type: ServiceType, on: bool, timestamp_ms: i64) {
        let Some(machine) = self.machines.get(&service_type) else {
            tracing::debug!(service_type = %service_type, "Trigger for unsupported service");
            return;
        };

        let event = EvsHalEvent {
            timestamp_ms,
            service_type,
            on,
        };
        match machine.record_hal_event(event) {
            HalEventOutcome::Stale => {
                tracing::debug!(service_type = %service_type, timestamp_ms, "Ignoring stale trigger");
                return;
            }
            HalEventOutcome::Unchanged => return,
            HalEventOutcome::Changed => {}
        }

        let result = if on {
            machine.request_start_activity(RequestPriority::High)
        } else {
            machine.request_stop_activity(RequestPriority::High)
        };
        if !result.is_ok() {
            tracing::warn!(
                service_type = %service_type,
                on,
                error = %result,
                "Failed to handle vehicle trigger"
            );
        }
    }

    fn handle_display_changed(&self, on: bool) {
        let previous = {
            let mut display_on = self
                .display_on
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            display_on.replace(on)
        };
        if previous == Some(on) {
            tracing::debug!(on, "Duplicate display state; ignoring");
            return;
        }

        for machine in self.machines.values() {
            let state = machine.state();
            if on {
                let pending = matches!(state, ServiceState::Requested | ServiceState::Active);
                if !pending && machine.trigger_asserted() {
                    let _ = machine.request_start_activity(RequestPriority::High);
                }
            } else if matches!(state, ServiceState::Requested | ServiceState::Active) {
                let _ = machine.request_stop_video_stream(None);
            }
        }
    }

    fn handle_stream_client_death(&self, service_type: ServiceType, client: ClientId) {
        let Some(machine) = self.machines.get(&service_type) else {
            return;
        };
        match machine.remove_dead_client(client) {
            DeadClientOutcome::LastRemoved | DeadClientOutcome::PrivilegedRemoved
                if machine.trigger_asserted() =>
            {
                let _ = machine.request_start_activity(RequestPriority::High);
            }
            DeadClientOutcome::PrivilegedRemoved => {
                tracing::info!(
                    service_type = %service_type,
                    "Privileged viewer died with the trigger released; stopping the stream"
                );
                let _ = machine.request_stop_video_stream(None);
            }
            DeadClientOutcome::LastRemoved
            | DeadClientOutcome::Removed
            | DeadClientOutcome::Unknown => {}
        }
    }

    fn handle_activity_request_timeout(&self, service_type: ServiceType, generation: u64) {
        let Some(machine) = self.machines.get(&service_type) else {
            return;
        };
        if !machine.take_expired_activity_request(generation) {
            return;
        }
        if machine.requires_system_activity() || machine.trigger_asserted() {
            tracing::info!(
                service_type = %service_type,
                "Viewer did not start streaming in time; requesting again"
            );
            let _ = machine.request_start_activity(RequestPriority::High);
        }
    }
}

fn unsupported(service_type: ServiceType) -> ErrorCode {
    tracing::debug!(service_type = %service_type, "Request for unsupported service type");
    ErrorCode::Unavailable
}
