//! Stream clients, status listeners, and their death linkage.
//!
//! Liveness is owned by the host IPC layer: when a peer goes away it fires the
//! [`DeathNotifier`] it was handed at registration, which queues a death event
//! for the service to process like any other input.

use crate::error::{DeliveryError, EvsError, Result};
use crate::events::{Event, Scheduler};
use evs_protocol::{EvsStatus, ServiceType, StreamEvent};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

static NEXT_CLIENT_ID: AtomicU64 = AtomicU64::new(1);

/// Registration identity for stream clients and status listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(u64);

impl ClientId {
    pub fn next() -> Self {
        Self(NEXT_CLIENT_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "client-{}", self.0)
    }
}

/// A frame as seen by a client. `id` is the packed, client-facing buffer id
/// to pass back through `return_frame_buffer`.
#[derive(Debug, Clone)]
pub struct BufferDescriptor {
    pub id: u32,
    pub timestamp_ms: i64,
    pub payload: Arc<[u8]>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DeathTarget {
    StreamClient(ServiceType),
    StatusListener,
}

/// Handed to a client at registration; fire it when the client's process dies.
#[derive(Debug, Clone)]
pub struct DeathNotifier {
    scheduler: Scheduler,
    client: ClientId,
    target: DeathTarget,
}

impl DeathNotifier {
    pub(crate) fn for_stream_client(
        scheduler: Scheduler,
        service_type: ServiceType,
        client: ClientId,
    ) -> Self {
        Self {
            scheduler,
            client,
            target: DeathTarget::StreamClient(service_type),
        }
    }

    pub(crate) fn for_status_listener(scheduler: Scheduler, client: ClientId) -> Self {
        Self {
            scheduler,
            client,
            target: DeathTarget::StatusListener,
        }
    }

    pub fn client(&self) -> ClientId {
        self.client
    }

    pub fn notify(&self) {
        let event = match self.target {
            DeathTarget::StreamClient(service_type) => Event::StreamClientDied {
                service_type,
                client: self.client,
            },
            DeathTarget::StatusListener => Event::StatusListenerDied {
                listener: self.client,
            },
        };
        self.scheduler.post(event);
    }
}

/// Consumer of video frames and stream lifecycle events.
pub trait StreamCallback: Send + Sync {
    fn on_stream_event(&self, event: StreamEvent) -> std::result::Result<(), DeliveryError>;

    fn on_new_frame(&self, buffer: &BufferDescriptor) -> std::result::Result<(), DeliveryError>;

    /// Fails if the client is already gone; the registration is then refused.
    fn link_to_death(&self, notifier: DeathNotifier) -> std::result::Result<(), DeliveryError>;

    fn unlink_to_death(&self) {}
}

/// A stream callback paired with its registration identity.
#[derive(Clone)]
pub struct StreamClient {
    id: ClientId,
    callback: Arc<dyn StreamCallback>,
}

impl StreamClient {
    pub fn new(callback: Arc<dyn StreamCallback>) -> Self {
        Self {
            id: ClientId::next(),
            callback,
        }
    }

    pub fn id(&self) -> ClientId {
        self.id
    }

    pub fn callback(&self) -> &Arc<dyn StreamCallback> {
        &self.callback
    }
}

impl fmt::Debug for StreamClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamClient").field("id", &self.id).finish()
    }
}

impl PartialEq for StreamClient {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for StreamClient {}

/// Observer of `{serviceType, state}` changes.
pub trait StatusListener: Send + Sync {
    fn on_status_changed(&self, status: EvsStatus) -> std::result::Result<(), DeliveryError>;

    fn link_to_death(&self, notifier: DeathNotifier) -> std::result::Result<(), DeliveryError>;

    fn unlink_to_death(&self) {}
}

/// Fan-out of status changes to registered listeners.
///
/// Delivery happens outside the registry lock; one failing listener never
/// blocks the others.
pub struct StatusListenerRegistry {
    scheduler: Scheduler,
    listeners: Mutex<Vec<(ClientId, Arc<dyn StatusListener>)>>,
}

impl StatusListenerRegistry {
    pub(crate) fn new(scheduler: Scheduler) -> Self {
        Self {
            scheduler,
            listeners: Mutex::new(Vec::new()),
        }
    }

    pub fn register(&self, listener: Arc<dyn StatusListener>) -> Result<ClientId> {
        let id = ClientId::next();
        listener
            .link_to_death(DeathNotifier::for_status_listener(
                self.scheduler.clone(),
                id,
            ))
            .map_err(EvsError::Delivery)?;
        self.listeners
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push((id, listener));
        tracing::debug!(listener = %id, "Status listener registered");
        Ok(id)
    }

    /// Returns `true` if the listener was registered.
    pub fn unregister(&self, id: ClientId) -> bool {
        let removed = {
            let mut listeners = self
                .listeners
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            let index = listeners.iter().position(|(candidate, _)| *candidate == id);
            index.map(|index| listeners.remove(index).1)
        };
        match removed {
            Some(listener) => {
                listener.unlink_to_death();
                tracing::debug!(listener = %id, "Status listener unregistered");
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.listeners
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn broadcast(&self, status: EvsStatus) {
        let snapshot: Vec<(ClientId, Arc<dyn StatusListener>)> = self
            .listeners
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();

        for (id, listener) in snapshot {
            if let Err(err) = listener.on_status_changed(status) {
                tracing::warn!(
                    listener = %id,
                    error = %err,
                    "Failed to deliver status change"
                );
            }
        }
    }

    pub fn clear(&self) {
        let drained: Vec<_> = self
            .listeners
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .drain(..)
            .collect();
        for (_, listener) in drained {
            listener.unlink_to_death();
        }
    }
}
