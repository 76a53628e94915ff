//! Launching the system camera-viewer activity.

use crate::error::DeliveryError;
use crate::token::SessionToken;
use evs_protocol::{RequestPriority, ServiceType};

/// Request to bring up the viewer. Carries a session token only for
/// high-priority requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivityIntent {
    pub component: String,
    pub service_type: ServiceType,
    /// Priority of the request that launched the viewer.
    pub priority: RequestPriority,
    pub session_token: Option<SessionToken>,
}

pub trait ActivityLauncher: Send + Sync {
    fn start_activity(&self, intent: ActivityIntent) -> Result<(), DeliveryError>;
}
