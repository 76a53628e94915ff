//! Session state machine for one EVS service type.
//!
//! Four states (`UNAVAILABLE`, `INACTIVE`, `REQUESTED`, `ACTIVE`) driven by a
//! single priority-tagged entry point, [`StateMachine::execute`]. All mutable
//! fields live in one `MachineState` behind one mutex. HAL calls and timer
//! arming happen under that lock so they are atomic with the state change;
//! client notifications, activity launches, and status broadcasts are
//! collected as effects and run after the lock is released.

use crate::activity::{ActivityIntent, ActivityLauncher};
use crate::client::{BufferDescriptor, ClientId, DeathNotifier, StatusListenerRegistry, StreamClient};
use crate::config::{ServiceConfig, StreamSharing, TimingConfig};
use crate::error::{EvsError, Result};
use crate::events::{Event, Scheduler};
use crate::hal::{HalFrame, HalSession};
use crate::ledger::{FrameLedger, RecordOutcome};
use crate::token::SessionToken;
use evs_protocol::{
    pack_buffer_id, ErrorCode, EvsStatus, RequestPriority, ServiceState, ServiceType, StreamEvent,
};
use std::sync::{Arc, Mutex, MutexGuard};

/// The last hardware trigger observed for a service type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvsHalEvent {
    pub timestamp_ms: i64,
    pub service_type: ServiceType,
    pub on: bool,
}

impl EvsHalEvent {
    pub fn is_requesting_to_start_activity(&self) -> bool {
        self.on
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HalEventOutcome {
    /// Timestamp not newer than the last recorded event; nothing changed.
    Stale,
    /// Recorded, but the trigger is in the same on/off position as before.
    Unchanged,
    Changed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeadClientOutcome {
    Unknown,
    Removed,
    /// The last stream client went away and the machine fell back to INACTIVE.
    LastRemoved,
    /// The only `HIGH` client went away while lower priority clients keep
    /// streaming. The machine now runs at their priority.
    PrivilegedRemoved,
}

/// A stream client together with the priority it was admitted at.
#[derive(Debug, Clone)]
struct Registration {
    client: StreamClient,
    priority: RequestPriority,
}

enum Effect {
    StreamStopped(StreamClient),
    Unlink(StreamClient),
    LaunchActivity(ActivityIntent),
}

struct MachineState {
    state: ServiceState,
    last_request_priority: RequestPriority,
    session_token: Option<SessionToken>,
    clients: Vec<Registration>,
    ledger: FrameLedger,
    hal: Box<dyn HalSession>,
    camera_id: String,
    camera_open: bool,
    streaming: bool,
    armed_activity_request: Option<u64>,
    next_generation: u64,
    latest_hal_event: EvsHalEvent,
}

impl MachineState {
    fn trigger_asserted(&self) -> bool {
        self.latest_hal_event.is_requesting_to_start_activity()
    }

    fn requires_system_activity(&self) -> bool {
        matches!(
            self.state,
            ServiceState::Active | ServiceState::Requested
        ) && self.last_request_priority == RequestPriority::High
    }

    fn take_client(&mut self, id: ClientId) -> Option<Registration> {
        let index = self
            .clients
            .iter()
            .position(|registration| registration.client.id() == id)?;
        Some(self.clients.remove(index))
    }

    fn registration_mut(&mut self, id: ClientId) -> Option<&mut Registration> {
        self.clients
            .iter_mut()
            .find(|registration| registration.client.id() == id)
    }

    fn has_client(&self, id: ClientId) -> bool {
        self.clients
            .iter()
            .any(|registration| registration.client.id() == id)
    }

    fn stream_clients(&self) -> Vec<StreamClient> {
        self.clients
            .iter()
            .map(|registration| registration.client.clone())
            .collect()
    }

    fn highest_client_priority(&self) -> Option<RequestPriority> {
        self.clients.iter().map(|registration| registration.priority).max()
    }

    /// `HIGH` only for the live session token.
    fn stream_priority(&self, token: Option<&SessionToken>) -> RequestPriority {
        match (self.session_token.as_ref(), token) {
            (Some(live), Some(given)) if live == given => RequestPriority::High,
            _ => RequestPriority::Low,
        }
    }

    fn stop_hal_stream(&mut self) {
        if self.streaming {
            self.hal.stop_stream();
            self.streaming = false;
        }
        if self.camera_open {
            self.hal.close_camera();
            self.camera_open = false;
        }
        self.ledger.clear();
    }

    fn stop_all_clients(&mut self, effects: &mut Vec<Effect>) {
        effects.extend(
            self.clients
                .drain(..)
                .map(|registration| Effect::StreamStopped(registration.client)),
        );
        self.stop_hal_stream();
    }
}

pub struct StateMachine {
    service_type: ServiceType,
    activity: Option<String>,
    default_camera_id: String,
    sharing: StreamSharing,
    timing: TimingConfig,
    scheduler: Scheduler,
    launcher: Arc<dyn ActivityLauncher>,
    listeners: Arc<StatusListenerRegistry>,
    inner: Mutex<MachineState>,
}

impl StateMachine {
    pub(crate) fn new(
        service: &ServiceConfig,
        hal: Box<dyn HalSession>,
        sharing: StreamSharing,
        timing: TimingConfig,
        scheduler: Scheduler,
        launcher: Arc<dyn ActivityLauncher>,
        listeners: Arc<StatusListenerRegistry>,
    ) -> Self {
        Self {
            service_type: service.service_type,
            activity: service.activity.clone(),
            default_camera_id: service.camera_id.clone(),
            sharing,
            timing,
            scheduler,
            launcher,
            listeners,
            inner: Mutex::new(MachineState {
                state: ServiceState::Unavailable,
                last_request_priority: RequestPriority::Low,
                session_token: None,
                clients: Vec::new(),
                ledger: FrameLedger::new(),
                hal,
                camera_id: service.camera_id.clone(),
                camera_open: false,
                streaming: false,
                armed_activity_request: None,
                next_generation: 0,
                latest_hal_event: EvsHalEvent {
                    timestamp_ms: 0,
                    service_type: service.service_type,
                    on: false,
                },
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MachineState> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn service_type(&self) -> ServiceType {
        self.service_type
    }

    pub fn has_activity(&self) -> bool {
        self.activity.is_some()
    }

    /// Requests a transition to `destination` on behalf of a client at
    /// `priority`. Never panics on ordinary arbitration outcomes.
    pub fn execute(
        &self,
        priority: RequestPriority,
        destination: ServiceState,
        token: Option<&SessionToken>,
        client: Option<&StreamClient>,
    ) -> ErrorCode {
        self.transition(|_| priority, destination, token, client)
    }

    /// Like [`Self::execute`], with the priority derived from the machine
    /// state inside the same critical section as the transition.
    fn transition(
        &self,
        resolve_priority: impl FnOnce(&MachineState) -> RequestPriority,
        destination: ServiceState,
        token: Option<&SessionToken>,
        client: Option<&StreamClient>,
    ) -> ErrorCode {
        let mut effects = Vec::new();
        let (result, previous, current) = {
            let mut inner = self.lock();
            let previous = inner.state;
            let priority = resolve_priority(&*inner);

            if previous == destination
                && priority < inner.last_request_priority
                && destination != ServiceState::Requested
            {
                tracing::debug!(
                    service_type = %self.service_type,
                    state = %previous,
                    priority = %priority,
                    "Already in the destination state; ignoring lower priority request"
                );
                return ErrorCode::None;
            }

            tracing::info!(
                service_type = %self.service_type,
                from = %previous,
                to = %destination,
                priority = %priority,
                "Transition requested"
            );

            let result = match destination {
                ServiceState::Unavailable => self.handle_to_unavailable(&mut inner, &mut effects),
                ServiceState::Inactive => {
                    self.handle_to_inactive(&mut inner, &mut effects, priority, client)
                }
                ServiceState::Requested => {
                    self.handle_to_requested(&mut inner, &mut effects, priority)
                }
                ServiceState::Active => {
                    self.handle_to_active(&mut inner, &mut effects, priority, token, client)
                }
            };
            (result, previous, inner.state)
        };

        if result.is_ok() {
            tracing::info!(
                service_type = %self.service_type,
                state = %current,
                "Transition completed"
            );
        } else {
            tracing::warn!(
                service_type = %self.service_type,
                destination = %destination,
                error = %result,
                "Transition failed"
            );
        }

        self.run_effects(effects);
        if result.is_ok() && previous != current {
            self.listeners
                .broadcast(EvsStatus::new(self.service_type, current));
        }
        result
    }

    pub fn request_start_activity(&self, priority: RequestPriority) -> ErrorCode {
        self.execute(priority, ServiceState::Requested, None, None)
    }

    pub fn request_stop_activity(&self, priority: RequestPriority) -> ErrorCode {
        self.execute(priority, ServiceState::Inactive, None, None)
    }

    /// Clients presenting the live session token stream at `HIGH`; everyone
    /// else at `LOW`.
    pub fn request_start_video_stream(
        &self,
        client: &StreamClient,
        token: Option<&SessionToken>,
    ) -> ErrorCode {
        self.transition(
            |inner| inner.stream_priority(token),
            ServiceState::Active,
            token,
            Some(client),
        )
    }

    /// Stream start from the viewer brought up by an activity launch. It
    /// streams at the priority of the request that launched it, up to
    /// `NORMAL`; `HIGH` still takes the live session token.
    pub fn request_start_launched_video_stream(
        &self,
        client: &StreamClient,
        launch_priority: RequestPriority,
        token: Option<&SessionToken>,
    ) -> ErrorCode {
        let inherited = launch_priority.min(RequestPriority::Normal);
        self.transition(
            |inner| inner.stream_priority(token).max(inherited),
            ServiceState::Active,
            token,
            Some(client),
        )
    }

    /// `None` stops every client.
    pub fn request_stop_video_stream(&self, client: Option<&StreamClient>) -> ErrorCode {
        self.execute(RequestPriority::High, ServiceState::Inactive, None, client)
    }

    pub fn connect_to_hal_if_necessary(&self) -> bool {
        let mut inner = self.lock();
        match inner.hal.connect_if_necessary() {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(
                    service_type = %self.service_type,
                    error = %err,
                    "Failed to connect to the EVS HAL"
                );
                false
            }
        }
    }

    pub fn cancel_activity_request(&self) {
        self.lock().armed_activity_request = None;
    }

    /// Consumes the armed activity request if `generation` is still current.
    pub fn take_expired_activity_request(&self, generation: u64) -> bool {
        let mut inner = self.lock();
        if inner.armed_activity_request == Some(generation) {
            inner.armed_activity_request = None;
            true
        } else {
            false
        }
    }

    pub fn has_pending_activity_request(&self) -> bool {
        self.lock().armed_activity_request.is_some()
    }

    pub fn status(&self) -> EvsStatus {
        EvsStatus::new(self.service_type, self.lock().state)
    }

    pub fn state(&self) -> ServiceState {
        self.lock().state
    }

    pub fn last_request_priority(&self) -> RequestPriority {
        self.lock().last_request_priority
    }

    pub fn requires_system_activity(&self) -> bool {
        self.lock().requires_system_activity()
    }

    pub fn session_token(&self) -> Option<SessionToken> {
        self.lock().session_token
    }

    pub fn set_session_token(&self, token: Option<SessionToken>) {
        self.lock().session_token = token;
    }

    pub fn is_session_token(&self, token: &SessionToken) -> bool {
        self.lock().session_token.as_ref() == Some(token)
    }

    pub fn is_connected(&self) -> bool {
        self.lock().hal.is_connected()
    }

    pub fn client_count(&self) -> usize {
        self.lock().clients.len()
    }

    pub fn has_client(&self, id: ClientId) -> bool {
        self.lock().has_client(id)
    }

    /// The priority a streaming client was admitted at.
    pub fn client_priority(&self, id: ClientId) -> Option<RequestPriority> {
        self.lock()
            .clients
            .iter()
            .find(|registration| registration.client.id() == id)
            .map(|registration| registration.priority)
    }

    pub fn outstanding_frames(&self) -> usize {
        self.lock().ledger.len()
    }

    pub fn camera_id(&self) -> String {
        self.lock().camera_id.clone()
    }

    /// Overrides the camera opened on the next ACTIVE entry; `"default"`
    /// restores the configured id.
    pub fn set_camera_id(&self, camera_id: &str) {
        let resolved = if camera_id == "default" {
            self.default_camera_id.clone()
        } else {
            camera_id.to_string()
        };
        tracing::info!(service_type = %self.service_type, camera_id = %resolved, "Camera id set");
        self.lock().camera_id = resolved;
    }

    pub fn latest_hal_event(&self) -> EvsHalEvent {
        self.lock().latest_hal_event
    }

    pub fn trigger_asserted(&self) -> bool {
        self.lock().trigger_asserted()
    }

    pub fn record_hal_event(&self, event: EvsHalEvent) -> HalEventOutcome {
        let mut inner = self.lock();
        let last = inner.latest_hal_event;
        if event.timestamp_ms <= last.timestamp_ms {
            return HalEventOutcome::Stale;
        }
        inner.latest_hal_event = event;
        if last.on == event.on {
            HalEventOutcome::Unchanged
        } else {
            HalEventOutcome::Changed
        }
    }

    /// Hands a HAL frame to every registered client.
    ///
    /// The ledger record is created with the full client count before any
    /// delivery, and each failed delivery is acknowledged on the client's
    /// behalf, so the frame is released once the accepting clients are done.
    pub fn deliver_frame(&self, frame: HalFrame) {
        let clients = {
            let mut guard = self.lock();
            let inner = &mut *guard;
            if inner.state != ServiceState::Active || inner.clients.is_empty() {
                inner.hal.done_with_frame(frame.buffer_id);
                return;
            }
            let consumers = inner.clients.len();
            if inner.ledger.record(frame.buffer_id, consumers) != RecordOutcome::Recorded {
                inner.hal.done_with_frame(frame.buffer_id);
                return;
            }
            inner.stream_clients()
        };

        let descriptor = BufferDescriptor {
            id: pack_buffer_id(self.service_type, frame.buffer_id),
            timestamp_ms: frame.timestamp_ms,
            payload: frame.payload,
        };
        for client in clients {
            if let Err(err) = client.callback().on_new_frame(&descriptor) {
                tracing::warn!(
                    service_type = %self.service_type,
                    client = %client.id(),
                    error = %err,
                    "Failed to deliver frame"
                );
                self.done_with_frame(frame.buffer_id);
            }
        }
    }

    pub fn done_with_frame(&self, hal_buffer_id: u32) {
        let mut inner = self.lock();
        if inner.ledger.acknowledge(hal_buffer_id) == Some(0) {
            inner.hal.done_with_frame(hal_buffer_id);
        }
    }

    pub fn forward_stream_event(&self, event: StreamEvent) {
        let clients = self.lock().stream_clients();
        tracing::debug!(
            service_type = %self.service_type,
            event = %event,
            clients = clients.len(),
            "Forwarding stream event"
        );
        for client in clients {
            if let Err(err) = client.callback().on_stream_event(event) {
                tracing::warn!(
                    client = %client.id(),
                    error = %err,
                    "Failed to deliver stream event"
                );
            }
        }
    }

    /// Drops a stream client whose process died. Falls back to INACTIVE when
    /// it was the last one; otherwise the machine continues at the highest
    /// priority among the remaining clients.
    pub fn remove_dead_client(&self, id: ClientId) -> DeadClientOutcome {
        let (outcome, removed, changed) = {
            let mut inner = self.lock();
            let Some(removed) = inner.take_client(id) else {
                return DeadClientOutcome::Unknown;
            };
            if inner.state != ServiceState::Active {
                (DeadClientOutcome::Removed, removed, false)
            } else {
                match inner.highest_client_priority() {
                    None => {
                        inner.stop_hal_stream();
                        inner.state = ServiceState::Inactive;
                        inner.session_token = None;
                        (DeadClientOutcome::LastRemoved, removed, true)
                    }
                    Some(remaining) => {
                        if remaining < inner.last_request_priority {
                            inner.last_request_priority = remaining;
                        }
                        let outcome = if removed.priority == RequestPriority::High
                            && remaining < RequestPriority::High
                        {
                            inner.session_token = None;
                            DeadClientOutcome::PrivilegedRemoved
                        } else {
                            DeadClientOutcome::Removed
                        };
                        (outcome, removed, false)
                    }
                }
            }
        };

        tracing::info!(
            service_type = %self.service_type,
            client = %id,
            outcome = ?outcome,
            "Stream client died"
        );
        self.run_effects(vec![Effect::Unlink(removed.client)]);
        if changed {
            self.listeners
                .broadcast(EvsStatus::new(self.service_type, ServiceState::Inactive));
        }
        outcome
    }

    // ─────────────────────────────────────────────────────────────────────
    // Per-destination handlers (lock held)
    // ─────────────────────────────────────────────────────────────────────

    fn handle_to_unavailable(
        &self,
        inner: &mut MachineState,
        effects: &mut Vec<Effect>,
    ) -> ErrorCode {
        if inner.state != ServiceState::Unavailable {
            inner.stop_all_clients(effects);
        }
        inner.armed_activity_request = None;
        inner.hal.disconnect();
        inner.state = ServiceState::Unavailable;
        ErrorCode::None
    }

    fn handle_to_inactive(
        &self,
        inner: &mut MachineState,
        effects: &mut Vec<Effect>,
        priority: RequestPriority,
        client: Option<&StreamClient>,
    ) -> ErrorCode {
        match inner.state {
            ServiceState::Unavailable => {
                if let Some(client) = client {
                    // Stop request after the HAL went away; just forget the client.
                    if let Some(removed) = inner.take_client(client.id()) {
                        effects.push(Effect::Unlink(removed.client));
                    }
                    return ErrorCode::None;
                }

                if let Err(err) = inner.hal.connect_if_necessary() {
                    tracing::warn!(
                        service_type = %self.service_type,
                        error = %err,
                        "Failed to connect to the EVS HAL"
                    );
                    return ErrorCode::Unavailable;
                }

                if inner.trigger_asserted() {
                    // The viewer was wanted when the connection dropped.
                    self.arm_activity_request(inner);
                }
            }
            ServiceState::Inactive => {}
            ServiceState::Requested => {
                if priority < inner.last_request_priority {
                    return ErrorCode::Busy;
                }
                inner.armed_activity_request = None;
            }
            ServiceState::Active => {
                if priority < inner.last_request_priority {
                    return ErrorCode::Busy;
                }
                match client {
                    Some(client) => {
                        match inner.take_client(client.id()) {
                            Some(removed) => effects.push(Effect::StreamStopped(removed.client)),
                            None => tracing::debug!(
                                client = %client.id(),
                                "Stop requested by a client that is not streaming"
                            ),
                        }
                        if let Some(remaining) = inner.highest_client_priority() {
                            inner.last_request_priority = remaining;
                            return ErrorCode::None;
                        }
                        inner.stop_hal_stream();
                    }
                    None => inner.stop_all_clients(effects),
                }
            }
        }

        inner.state = ServiceState::Inactive;
        inner.session_token = None;
        ErrorCode::None
    }

    fn handle_to_requested(
        &self,
        inner: &mut MachineState,
        effects: &mut Vec<Effect>,
        priority: RequestPriority,
    ) -> ErrorCode {
        let Some(component) = self.activity.clone() else {
            tracing::info!(
                service_type = %self.service_type,
                "No viewer activity registered; nothing to request"
            );
            return ErrorCode::None;
        };

        match inner.state {
            ServiceState::Unavailable => {
                if let Err(err) = inner.hal.connect_if_necessary() {
                    tracing::warn!(
                        service_type = %self.service_type,
                        error = %err,
                        "Failed to connect to the EVS HAL"
                    );
                    return ErrorCode::Unavailable;
                }
            }
            ServiceState::Inactive => {}
            ServiceState::Requested => {
                if priority < inner.last_request_priority {
                    tracing::warn!(
                        service_type = %self.service_type,
                        "Busy with a higher priority request"
                    );
                    return ErrorCode::Busy;
                }
                inner.armed_activity_request = None;
            }
            ServiceState::Active => {
                if priority < inner.last_request_priority {
                    return ErrorCode::Busy;
                }
                if priority == inner.last_request_priority {
                    // The stream was started at this priority already.
                    return ErrorCode::None;
                }
                inner.stop_all_clients(effects);
            }
        }

        if priority == RequestPriority::High {
            self.arm_activity_request(inner);
        }

        inner.state = ServiceState::Requested;
        inner.last_request_priority = priority;

        let session_token = if priority == RequestPriority::High {
            let token = SessionToken::mint();
            inner.session_token = Some(token);
            Some(token)
        } else {
            None
        };
        effects.push(Effect::LaunchActivity(ActivityIntent {
            component,
            service_type: self.service_type,
            priority,
            session_token,
        }));
        ErrorCode::None
    }

    fn handle_to_active(
        &self,
        inner: &mut MachineState,
        effects: &mut Vec<Effect>,
        priority: RequestPriority,
        token: Option<&SessionToken>,
        client: Option<&StreamClient>,
    ) -> ErrorCode {
        let Some(client) = client else {
            tracing::error!(
                service_type = %self.service_type,
                "ACTIVE requested without a stream client"
            );
            return ErrorCode::Unavailable;
        };

        match inner.state {
            ServiceState::Unavailable => return ErrorCode::Unavailable,
            ServiceState::Inactive => {
                if let Err(err) = self.start_service_and_stream(inner, client, priority) {
                    tracing::warn!(error = %err, "Failed to start the video stream");
                    return ErrorCode::Unavailable;
                }
            }
            ServiceState::Requested => {
                if priority < inner.last_request_priority {
                    return ErrorCode::Busy;
                }
                if priority == RequestPriority::High {
                    let valid = matches!(
                        (inner.session_token.as_ref(), token),
                        (Some(live), Some(given)) if live == given
                    );
                    if !valid {
                        tracing::warn!(
                            service_type = %self.service_type,
                            "Declining a request with an expired session token"
                        );
                        return ErrorCode::Busy;
                    }
                }
                if let Err(err) = self.start_service_and_stream(inner, client, priority) {
                    tracing::warn!(error = %err, "Failed to start the video stream");
                    return ErrorCode::Unavailable;
                }
                inner.armed_activity_request = None;
            }
            ServiceState::Active => {
                if priority < inner.last_request_priority {
                    tracing::info!(
                        service_type = %self.service_type,
                        "Declining a stream request with a lower priority"
                    );
                    return ErrorCode::None;
                }
                if let Some(registration) = inner.registration_mut(client.id()) {
                    registration.priority = priority;
                    inner.last_request_priority = priority;
                    return ErrorCode::None;
                }
                if let Err(err) = self.link_client(client) {
                    tracing::warn!(error = %err, "Failed to link stream client");
                    return ErrorCode::Unavailable;
                }
                if self.sharing == StreamSharing::Exclusive {
                    effects.extend(
                        inner
                            .clients
                            .drain(..)
                            .map(|registration| Effect::StreamStopped(registration.client)),
                    );
                }
                inner.clients.push(Registration {
                    client: client.clone(),
                    priority,
                });
            }
        }

        inner.state = ServiceState::Active;
        inner.last_request_priority = priority;
        ErrorCode::None
    }

    fn start_service_and_stream(
        &self,
        inner: &mut MachineState,
        client: &StreamClient,
        priority: RequestPriority,
    ) -> Result<()> {
        let camera_id = inner.camera_id.clone();
        inner.hal.open_camera(&camera_id)?;
        inner.camera_open = true;

        if let Err(err) = self.link_client(client) {
            inner.stop_hal_stream();
            return Err(err);
        }

        if let Err(err) = inner.hal.start_stream() {
            client.callback().unlink_to_death();
            inner.stop_hal_stream();
            return Err(err);
        }
        inner.streaming = true;
        inner.clients.push(Registration {
            client: client.clone(),
            priority,
        });
        Ok(())
    }

    fn link_client(&self, client: &StreamClient) -> Result<()> {
        let notifier =
            DeathNotifier::for_stream_client(self.scheduler.clone(), self.service_type, client.id());
        client
            .callback()
            .link_to_death(notifier)
            .map_err(EvsError::Delivery)
    }

    fn arm_activity_request(&self, inner: &mut MachineState) {
        inner.next_generation += 1;
        let generation = inner.next_generation;
        inner.armed_activity_request = Some(generation);
        self.scheduler.schedule_after(
            self.timing.stream_start_request_timeout(),
            Event::ActivityRequestTimeout {
                service_type: self.service_type,
                generation,
            },
        );
    }

    fn run_effects(&self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::StreamStopped(client) => {
                    if let Err(err) = client
                        .callback()
                        .on_stream_event(StreamEvent::StreamStopped)
                    {
                        tracing::warn!(
                            client = %client.id(),
                            error = %err,
                            "Failed to notify stream stop"
                        );
                    }
                    client.callback().unlink_to_death();
                }
                Effect::Unlink(client) => client.callback().unlink_to_death(),
                Effect::LaunchActivity(intent) => {
                    tracing::info!(
                        service_type = %intent.service_type,
                        component = %intent.component,
                        privileged = intent.session_token.is_some(),
                        "Launching viewer activity"
                    );
                    if let Err(err) = self.launcher.start_activity(intent) {
                        tracing::warn!(error = %err, "Failed to launch viewer activity");
                    }
                }
            }
        }
    }
}
