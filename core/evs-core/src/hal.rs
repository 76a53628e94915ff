//! Interface to the native camera/video connection.
//!
//! A `HalSession` is owned by exactly one state machine and is only called
//! while that machine's lock is held. Asynchronous callbacks travel the other
//! way through a [`HalEventSink`], which turns them into queued events.

use crate::error::Result;
use crate::events::{Event, Scheduler};
use evs_protocol::{ServiceType, StreamEvent};
use std::sync::Arc;

/// A frame buffer as delivered by the HAL. `buffer_id` is the HAL's own id.
#[derive(Debug, Clone)]
pub struct HalFrame {
    pub buffer_id: u32,
    pub timestamp_ms: i64,
    pub payload: Arc<[u8]>,
}

/// Operations the state machine drives on the native EVS connection.
///
/// Implementations should:
/// - Treat `connect_if_necessary` as cheap when already connected
/// - Mark themselves disconnected when the native service dies
/// - Tolerate stop/close calls after a connection loss
pub trait HalSession: Send {
    fn connect_if_necessary(&mut self) -> Result<()>;

    fn disconnect(&mut self);

    fn is_connected(&self) -> bool;

    fn open_camera(&mut self, camera_id: &str) -> Result<()>;

    fn close_camera(&mut self);

    fn start_stream(&mut self) -> Result<()>;

    fn stop_stream(&mut self);

    /// Returns a buffer to the HAL once every client is done with it.
    fn done_with_frame(&mut self, buffer_id: u32);
}

/// Callback path from a HAL session into the service event queue.
#[derive(Debug, Clone)]
pub struct HalEventSink {
    service_type: ServiceType,
    scheduler: Scheduler,
}

impl HalEventSink {
    pub fn new(service_type: ServiceType, scheduler: Scheduler) -> Self {
        Self {
            service_type,
            scheduler,
        }
    }

    pub fn service_type(&self) -> ServiceType {
        self.service_type
    }

    pub fn on_frame(&self, frame: HalFrame) {
        self.scheduler.post(Event::HalFrame {
            service_type: self.service_type,
            frame,
        });
    }

    pub fn on_stream_event(&self, event: StreamEvent) {
        self.scheduler.post(Event::HalStreamEvent {
            service_type: self.service_type,
            event,
        });
    }

    pub fn on_hal_death(&self) {
        tracing::warn!(service_type = %self.service_type, "EVS HAL service died");
        self.scheduler.post(Event::HalDied {
            service_type: self.service_type,
        });
    }
}
