//! # evs-core
//!
//! Core library for the Extended View System (EVS) service: the per-service
//! session state machine, the frame ledger, and the service facade that
//! hosts expose over their IPC surface.
//!
//! ## Design Principles
//!
//! - **Synchronous**: No async runtime dependency. Asynchronous inputs arrive
//!   on one event queue and are handled in a single total order.
//! - **One lock per service**: Each state machine guards its fields with one
//!   mutex. Client callbacks always run after that lock is released.
//! - **Arbitration is not failure**: Transition outcomes are reported as
//!   [`ErrorCode`]; [`EvsError`] is reserved for real errors.
//! - **Host-agnostic**: The HAL, viewer launcher, and client transports are
//!   traits supplied by the host.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use evs_core::{load_config, CarEvsService};
//!
//! let config = load_config(None)?;
//! let service = CarEvsService::new(&config, launcher, |service, sink| {
//!     Box::new(MyHal::new(&service.camera_id, sink))
//! })?;
//! service.init();
//! service.run();
//! ```

pub mod activity;
pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod hal;
pub mod ledger;
pub mod service;
pub mod state_machine;
pub mod token;

#[cfg(test)]
pub mod test_utils;


pub use activity::{ActivityIntent, ActivityLauncher};
pub use client::{
    BufferDescriptor, ClientId, DeathNotifier, StatusListener, StatusListenerRegistry,
    StreamCallback, StreamClient,
};
pub use config::{
    default_config_path, load_config, parse_service_descriptor, DaemonConfig, EvsConfig,
    ServiceConfig, StreamSharing, TimingConfig, TriggerSource,
};
pub use error::{DeliveryError, EvsError, Result};
pub use events::{Event, Scheduler};
pub use hal::{HalEventSink, HalFrame, HalSession};
pub use ledger::{FrameLedger, RecordOutcome};
pub use service::CarEvsService;
pub use state_machine::{DeadClientOutcome, EvsHalEvent, HalEventOutcome, StateMachine};
pub use token::SessionToken;

pub use evs_protocol::{
    ErrorCode, EvsStatus, Gear, RequestPriority, ServiceState, ServiceType, StreamEvent,
};
