//! Built-in camera viewer.
//!
//! Stands in for the system viewer activity: every launch intent starts a
//! stream on behalf of the viewer, and every frame it is shown is handed
//! straight back to the service. All of this runs on one viewer thread, fed
//! by a channel, so callbacks never re-enter the service directly.

use crossbeam::channel::{Receiver, Sender};
use evs_core::{
    ActivityIntent, ActivityLauncher, BufferDescriptor, CarEvsService, DeathNotifier,
    DeliveryError, ErrorCode, ServiceType, StreamCallback, StreamClient, StreamEvent,
};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

pub enum ViewerMessage {
    Launch(ActivityIntent),
    FrameShown(u32),
    StreamEvent(ServiceType, StreamEvent),
}

#[derive(Debug, Default)]
pub struct ViewerStats {
    launches: AtomicU64,
    streams_started: AtomicU64,
    frames_shown: AtomicU64,
    frames_dropped: AtomicU64,
}

#[derive(Debug, Serialize)]
pub struct ViewerStatsSnapshot {
    pub launches: u64,
    pub streams_started: u64,
    pub frames_shown: u64,
    pub frames_dropped: u64,
}

impl ViewerStats {
    pub fn snapshot(&self) -> ViewerStatsSnapshot {
        ViewerStatsSnapshot {
            launches: self.launches.load(Ordering::Relaxed),
            streams_started: self.streams_started.load(Ordering::Relaxed),
            frames_shown: self.frames_shown.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
        }
    }
}

/// Hands launch intents to the viewer thread.
pub struct ViewerLauncher {
    tx: Sender<ViewerMessage>,
}

impl ViewerLauncher {
    pub fn new(tx: Sender<ViewerMessage>) -> Self {
        Self { tx }
    }
}

impl ActivityLauncher for ViewerLauncher {
    fn start_activity(&self, intent: ActivityIntent) -> Result<(), DeliveryError> {
        self.tx
            .send(ViewerMessage::Launch(intent))
            .map_err(|_| DeliveryError::Disconnected)
    }
}

/// Used when the built-in viewer is disabled; launches are only logged.
pub struct HeadlessLauncher;

impl ActivityLauncher for HeadlessLauncher {
    fn start_activity(&self, intent: ActivityIntent) -> Result<(), DeliveryError> {
        tracing::info!(
            service_type = %intent.service_type,
            component = %intent.component,
            "Viewer disabled; launch request not handled"
        );
        Ok(())
    }
}

struct ViewerCallback {
    service_type: ServiceType,
    tx: Sender<ViewerMessage>,
    notifier: Mutex<Option<DeathNotifier>>,
}

impl StreamCallback for ViewerCallback {
    fn on_stream_event(&self, event: StreamEvent) -> Result<(), DeliveryError> {
        self.tx
            .send(ViewerMessage::StreamEvent(self.service_type, event))
            .map_err(|_| DeliveryError::Disconnected)
    }

    fn on_new_frame(&self, buffer: &BufferDescriptor) -> Result<(), DeliveryError> {
        self.tx
            .send(ViewerMessage::FrameShown(buffer.id))
            .map_err(|_| DeliveryError::Disconnected)
    }

    fn link_to_death(&self, notifier: DeathNotifier) -> Result<(), DeliveryError> {
        *self
            .notifier
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(notifier);
        Ok(())
    }

    fn unlink_to_death(&self) {
        self.notifier
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
    }
}

pub fn spawn_viewer(
    service: Arc<CarEvsService>,
    tx: Sender<ViewerMessage>,
    rx: Receiver<ViewerMessage>,
    trusted_uid: u32,
    stats: Arc<ViewerStats>,
) {
    thread::spawn(move || {
        for message in rx {
            match message {
                ViewerMessage::Launch(intent) => {
                    stats.launches.fetch_add(1, Ordering::Relaxed);
                    open_session(&service, &tx, intent, trusted_uid, &stats);
                }
                ViewerMessage::FrameShown(buffer_id) => {
                    stats.frames_shown.fetch_add(1, Ordering::Relaxed);
                    service.return_frame_buffer(buffer_id);
                }
                ViewerMessage::StreamEvent(service_type, event) => match event {
                    StreamEvent::StreamStopped => {
                        tracing::info!(service_type = %service_type, "Viewer stream stopped");
                    }
                    StreamEvent::FrameDropped => {
                        stats.frames_dropped.fetch_add(1, Ordering::Relaxed);
                    }
                    other => {
                        tracing::debug!(service_type = %service_type, event = %other, "Viewer stream event");
                    }
                },
            }
        }
    });
}

/// The viewer streams as the trusted system component it stands in for, at
/// the priority of the request that launched it.
fn open_session(
    service: &CarEvsService,
    tx: &Sender<ViewerMessage>,
    intent: ActivityIntent,
    trusted_uid: u32,
    stats: &ViewerStats,
) {
    let service_type = intent.service_type;
    let client = StreamClient::new(Arc::new(ViewerCallback {
        service_type,
        tx: tx.clone(),
        notifier: Mutex::new(None),
    }));
    let result = match service.start_launched_video_stream(trusted_uid, &intent, &client) {
        Ok(result) => result,
        Err(err) => {
            tracing::warn!(error = %err, "Viewer is not allowed to stream");
            return;
        }
    };
    if result == ErrorCode::None {
        stats.streams_started.fetch_add(1, Ordering::Relaxed);
        tracing::info!(
            service_type = %service_type,
            client = %client.id(),
            priority = %intent.priority,
            "Viewer stream started"
        );
    } else {
        tracing::warn!(
            service_type = %service_type,
            error = %result,
            "Viewer failed to start stream"
        );
    }
}
