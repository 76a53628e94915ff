//! Shared EVS vocabulary.
//!
//! These enums are the canonical names used on the wire, in config files, and
//! in logs. Each carries `as_str`/`from_str` so callers never hand-roll the
//! string forms.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Buffer ids handed to clients carry the service type in the top byte.
pub const SERVICE_TYPE_SHIFT: u32 = 24;
pub const BUFFER_DATA_MASK: u32 = (1 << SERVICE_TYPE_SHIFT) - 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServiceType {
    Rearview,
    Surroundview,
    Frontview,
    Leftview,
    Rightview,
    Driverview,
    FrontPassengersview,
    RearPassengersview,
    UserDefined,
}

impl ServiceType {
    pub const ALL: [ServiceType; 9] = [
        ServiceType::Rearview,
        ServiceType::Surroundview,
        ServiceType::Frontview,
        ServiceType::Leftview,
        ServiceType::Rightview,
        ServiceType::Driverview,
        ServiceType::FrontPassengersview,
        ServiceType::RearPassengersview,
        ServiceType::UserDefined,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceType::Rearview => "REARVIEW",
            ServiceType::Surroundview => "SURROUNDVIEW",
            ServiceType::Frontview => "FRONTVIEW",
            ServiceType::Leftview => "LEFTVIEW",
            ServiceType::Rightview => "RIGHTVIEW",
            ServiceType::Driverview => "DRIVERVIEW",
            ServiceType::FrontPassengersview => "FRONT_PASSENGERSVIEW",
            ServiceType::RearPassengersview => "REAR_PASSENGERSVIEW",
            ServiceType::UserDefined => "USER_DEFINED",
        }
    }

    /// Case-insensitive; accepts the canonical names only.
    pub fn from_str(value: &str) -> Option<Self> {
        let upper = value.trim().to_ascii_uppercase();
        ServiceType::ALL
            .iter()
            .copied()
            .find(|candidate| candidate.as_str() == upper)
    }

    pub fn code(&self) -> u8 {
        match self {
            ServiceType::Rearview => 0,
            ServiceType::Surroundview => 1,
            ServiceType::Frontview => 2,
            ServiceType::Leftview => 3,
            ServiceType::Rightview => 4,
            ServiceType::Driverview => 5,
            ServiceType::FrontPassengersview => 6,
            ServiceType::RearPassengersview => 7,
            ServiceType::UserDefined => 8,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        ServiceType::ALL
            .iter()
            .copied()
            .find(|candidate| candidate.code() == code)
    }
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServiceState {
    Unavailable,
    Inactive,
    Requested,
    Active,
}

impl ServiceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceState::Unavailable => "UNAVAILABLE",
            ServiceState::Inactive => "INACTIVE",
            ServiceState::Requested => "REQUESTED",
            ServiceState::Active => "ACTIVE",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "UNAVAILABLE" => Some(ServiceState::Unavailable),
            "INACTIVE" => Some(ServiceState::Inactive),
            "REQUESTED" => Some(ServiceState::Requested),
            "ACTIVE" => Some(ServiceState::Active),
            _ => None,
        }
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Arbitration key. Variant order is the priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestPriority {
    Low,
    Normal,
    High,
}

impl RequestPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestPriority::Low => "LOW",
            RequestPriority::Normal => "NORMAL",
            RequestPriority::High => "HIGH",
        }
    }
}

impl fmt::Display for RequestPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a transition request. Arbitration results are values, not errors.
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    None,
    Busy,
    Unavailable,
}

impl ErrorCode {
    pub fn is_ok(&self) -> bool {
        matches!(self, ErrorCode::None)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::None => "NONE",
            ErrorCode::Busy => "BUSY",
            ErrorCode::Unavailable => "UNAVAILABLE",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StreamEvent {
    None,
    StreamStarted,
    StreamStopped,
    FrameDropped,
    Timeout,
    ParameterChanged,
    PrimaryOwnerChanged,
    OtherErrors,
}

impl StreamEvent {
    /// Maps a raw HAL event code. Unknown codes collapse to `OtherErrors`.
    pub fn from_hal_code(code: i32) -> Self {
        match code {
            0 => StreamEvent::None,
            1 => StreamEvent::StreamStarted,
            2 => StreamEvent::StreamStopped,
            3 => StreamEvent::FrameDropped,
            4 => StreamEvent::Timeout,
            5 => StreamEvent::ParameterChanged,
            6 => StreamEvent::PrimaryOwnerChanged,
            _ => StreamEvent::OtherErrors,
        }
    }

    pub fn hal_code(&self) -> i32 {
        match self {
            StreamEvent::None => 0,
            StreamEvent::StreamStarted => 1,
            StreamEvent::StreamStopped => 2,
            StreamEvent::FrameDropped => 3,
            StreamEvent::Timeout => 4,
            StreamEvent::ParameterChanged => 5,
            StreamEvent::PrimaryOwnerChanged => 6,
            StreamEvent::OtherErrors => 7,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StreamEvent::None => "NONE",
            StreamEvent::StreamStarted => "STREAM_STARTED",
            StreamEvent::StreamStopped => "STREAM_STOPPED",
            StreamEvent::FrameDropped => "FRAME_DROPPED",
            StreamEvent::Timeout => "TIMEOUT",
            StreamEvent::ParameterChanged => "PARAMETER_CHANGED",
            StreamEvent::PrimaryOwnerChanged => "PRIMARY_OWNER_CHANGED",
            StreamEvent::OtherErrors => "OTHER_ERRORS",
        }
    }
}

impl fmt::Display for StreamEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The `{serviceType, state}` pair broadcast on every state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvsStatus {
    pub service_type: ServiceType,
    pub state: ServiceState,
}

impl EvsStatus {
    pub fn new(service_type: ServiceType, state: ServiceState) -> Self {
        Self {
            service_type,
            state,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Gear {
    Park,
    Reverse,
    Neutral,
    Drive,
}

impl Gear {
    pub fn as_str(&self) -> &'static str {
        match self {
            Gear::Park => "park",
            Gear::Reverse => "reverse",
            Gear::Neutral => "neutral",
            Gear::Drive => "drive",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "park" | "p" => Some(Gear::Park),
            "reverse" | "r" => Some(Gear::Reverse),
            "neutral" | "n" => Some(Gear::Neutral),
            "drive" | "d" => Some(Gear::Drive),
            _ => None,
        }
    }
}

pub fn pack_buffer_id(service_type: ServiceType, hal_buffer_id: u32) -> u32 {
    (u32::from(service_type.code()) << SERVICE_TYPE_SHIFT) | (hal_buffer_id & BUFFER_DATA_MASK)
}

/// Splits a client-facing buffer id into its service type and HAL buffer id.
/// The service type is `None` when the top byte is not a known code.
pub fn unpack_buffer_id(buffer_id: u32) -> (Option<ServiceType>, u32) {
    let code = (buffer_id >> SERVICE_TYPE_SHIFT) as u8;
    (ServiceType::from_code(code), buffer_id & BUFFER_DATA_MASK)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_type_names_are_stable() {
        for ty in ServiceType::ALL {
            assert_eq!(ServiceType::from_str(ty.as_str()), Some(ty));
            assert_eq!(ServiceType::from_code(ty.code()), Some(ty));
        }
        assert_eq!(
            ServiceType::from_str("front_passengersview"),
            Some(ServiceType::FrontPassengersview)
        );
        assert_eq!(ServiceType::from_str("sideview"), None);
    }

    #[test]
    fn service_type_serializes_as_canonical_name() {
        let value = serde_json::to_value(ServiceType::RearPassengersview).expect("serialize");
        assert_eq!(value, serde_json::json!("REAR_PASSENGERSVIEW"));
    }

    #[test]
    fn priorities_are_ordered() {
        assert!(RequestPriority::Low < RequestPriority::Normal);
        assert!(RequestPriority::Normal < RequestPriority::High);
        assert_eq!(
            RequestPriority::High.max(RequestPriority::Low),
            RequestPriority::High
        );
    }

    #[test]
    fn unknown_hal_event_codes_map_to_other_errors() {
        assert_eq!(StreamEvent::from_hal_code(2), StreamEvent::StreamStopped);
        assert_eq!(StreamEvent::from_hal_code(42), StreamEvent::OtherErrors);
        assert_eq!(StreamEvent::from_hal_code(-1), StreamEvent::OtherErrors);
    }

    #[test]
    fn buffer_id_carries_service_type() {
        let packed = pack_buffer_id(ServiceType::Leftview, 0x1234);
        assert_eq!(packed >> SERVICE_TYPE_SHIFT, 3);
        assert_eq!(
            unpack_buffer_id(packed),
            (Some(ServiceType::Leftview), 0x1234)
        );
    }

    #[test]
    fn buffer_id_masks_oversized_hal_ids() {
        let packed = pack_buffer_id(ServiceType::Rearview, 0xFF00_0001);
        assert_eq!(unpack_buffer_id(packed), (Some(ServiceType::Rearview), 1));
    }

    #[test]
    fn buffer_id_with_unknown_type_code() {
        let (ty, id) = unpack_buffer_id(0x7F00_0005);
        assert_eq!(ty, None);
        assert_eq!(id, 5);
    }

    #[test]
    fn gear_accepts_short_names() {
        assert_eq!(Gear::from_str("R"), Some(Gear::Reverse));
        assert_eq!(Gear::from_str("park"), Some(Gear::Park));
        assert_eq!(Gear::from_str("overdrive"), None);
    }
}
