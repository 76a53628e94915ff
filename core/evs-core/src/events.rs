//! The closed set of messages consumed by the service's event loop.
//!
//! HAL callbacks, vehicle signals, display changes, client deaths, and timer
//! expiries are all funneled through one channel so they are handled in a
//! single total order.

use crate::client::ClientId;
use crate::hal::HalFrame;
use crossbeam::channel::Sender;
use evs_protocol::{Gear, ServiceType, StreamEvent};
use std::time::Duration;

#[derive(Debug, Clone)]
pub enum Event {
    HalFrame {
        service_type: ServiceType,
        frame: HalFrame,
    },
    HalStreamEvent {
        service_type: ServiceType,
        event: StreamEvent,
    },
    HalDied {
        service_type: ServiceType,
    },
    GearChanged {
        gear: Gear,
        timestamp_ms: i64,
    },
    ServiceRequest {
        service_type: ServiceType,
        on: bool,
        timestamp_ms: i64,
    },
    DisplayChanged {
        on: bool,
    },
    StreamClientDied {
        service_type: ServiceType,
        client: ClientId,
    },
    StatusListenerDied {
        listener: ClientId,
    },
    ActivityRequestTimeout {
        service_type: ServiceType,
        generation: u64,
    },
    ReconnectHal {
        service_type: ServiceType,
    },
    Shutdown,
}

/// Posts events back onto the queue after a delay.
///
/// Each delayed event runs on its own short-lived thread. Cancellation is the
/// receiver's job: timed events carry a generation that the handler compares
/// against the currently armed one.
#[derive(Debug, Clone)]
pub struct Scheduler {
    tx: Sender<Event>,
}

impl Scheduler {
    pub fn new(tx: Sender<Event>) -> Self {
        Self { tx }
    }

    pub fn post(&self, event: Event) {
        if self.tx.send(event).is_err() {
            tracing::debug!("Event queue closed; dropping event");
        }
    }

    pub fn schedule_after(&self, delay: Duration, event: Event) {
        let tx = self.tx.clone();
        std::thread::spawn(move || {
            std::thread::sleep(delay);
            // Receiver may have been dropped during shutdown.
            let _ = tx.send(event);
        });
    }
}
