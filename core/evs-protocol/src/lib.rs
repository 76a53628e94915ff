//! IPC protocol types and validation for evs-daemon.
//!
//! This crate is shared by the daemon and its clients to prevent schema drift.
//! The daemon remains the authority on validation, but clients can reuse the
//! same types to construct valid requests.

use chrono::DateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value;

mod types;

pub use types::{
    pack_buffer_id, unpack_buffer_id, ErrorCode, EvsStatus, Gear, RequestPriority, ServiceState,
    ServiceType, StreamEvent, BUFFER_DATA_MASK, SERVICE_TYPE_SHIFT,
};

pub const PROTOCOL_VERSION: u32 = 1;
pub const MAX_REQUEST_BYTES: usize = 1024 * 1024; // 1MB
pub const MAX_CAMERA_ID_LEN: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub enum Method {
    GetHealth,
    GetStatus,
    StartActivity,
    StopActivity,
    ServiceRequest,
    GearChanged,
    DisplayChanged,
    SetCameraId,
    GetCameraId,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Request {
    pub protocol_version: u32,
    pub method: Method,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub params: Option<Value>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Response {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

impl Response {
    pub fn ok(id: Option<String>, data: Value) -> Self {
        Self {
            ok: true,
            id,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(id: Option<String>, code: &str, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            id,
            data: None,
            error: Some(ErrorInfo::new(code, message)),
        }
    }

    pub fn error_with_info(id: Option<String>, error: ErrorInfo) -> Self {
        Self {
            ok: false,
            id,
            data: None,
            error: Some(error),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────
// Request parameters
// ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceTargetParams {
    #[serde(default)]
    pub service_type: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceRequestParams {
    pub service_type: String,
    pub on: bool,
    #[serde(default)]
    pub recorded_at: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct GearChangeParams {
    pub gear: String,
    #[serde(default)]
    pub recorded_at: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct DisplayChangeParams {
    pub on: bool,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct CameraIdParams {
    pub service_type: String,
    #[serde(default)]
    pub camera_id: Option<String>,
}

/// A validated vehicle service request (`{type, on}` from the vehicle bus).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceRequest {
    pub service_type: ServiceType,
    pub on: bool,
    pub timestamp_ms: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GearChange {
    pub gear: Gear,
    pub timestamp_ms: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraIdChange {
    pub service_type: ServiceType,
    pub camera_id: String,
}

/// Resolves the optional `service_type` parameter, defaulting to the rearview.
pub fn parse_service_target(params: Option<Value>) -> Result<ServiceType, ErrorInfo> {
    let parsed: ServiceTargetParams = match params {
        Some(value) => from_params(value, "service target")?,
        None => ServiceTargetParams::default(),
    };
    match parsed.service_type {
        Some(name) => require_service_type(&name),
        None => Ok(ServiceType::Rearview),
    }
}

pub fn parse_service_request(params: Value) -> Result<ServiceRequest, ErrorInfo> {
    let parsed: ServiceRequestParams = from_params(params, "service_request")?;
    Ok(ServiceRequest {
        service_type: require_service_type(&parsed.service_type)?,
        on: parsed.on,
        timestamp_ms: parse_recorded_at(&parsed.recorded_at)?,
    })
}

pub fn parse_gear_change(params: Value) -> Result<GearChange, ErrorInfo> {
    let parsed: GearChangeParams = from_params(params, "gear_changed")?;
    let gear = Gear::from_str(&parsed.gear).ok_or_else(|| {
        ErrorInfo::new(
            "invalid_params",
            format!("unknown gear '{}'", parsed.gear),
        )
    })?;
    Ok(GearChange {
        gear,
        timestamp_ms: parse_recorded_at(&parsed.recorded_at)?,
    })
}

pub fn parse_display_change(params: Value) -> Result<bool, ErrorInfo> {
    let parsed: DisplayChangeParams = from_params(params, "display_changed")?;
    Ok(parsed.on)
}

pub fn parse_set_camera_id(params: Value) -> Result<CameraIdChange, ErrorInfo> {
    let parsed: CameraIdParams = from_params(params, "set_camera_id")?;
    let service_type = require_service_type(&parsed.service_type)?;
    let camera_id = require_string(&parsed.camera_id, "camera_id")?;
    if camera_id.len() > MAX_CAMERA_ID_LEN {
        return Err(ErrorInfo::new(
            "invalid_params",
            format!("camera_id must be {} characters or fewer", MAX_CAMERA_ID_LEN),
        ));
    }
    Ok(CameraIdChange {
        service_type,
        camera_id: camera_id.to_string(),
    })
}

pub fn parse_get_camera_id(params: Value) -> Result<ServiceType, ErrorInfo> {
    let parsed: CameraIdParams = from_params(params, "get_camera_id")?;
    require_service_type(&parsed.service_type)
}

fn from_params<T: serde::de::DeserializeOwned>(params: Value, label: &str) -> Result<T, ErrorInfo> {
    if !params.is_object() {
        return Err(ErrorInfo::new("invalid_params", "params must be an object"));
    }
    serde_json::from_value(params).map_err(|err| {
        ErrorInfo::new(
            "invalid_params",
            format!("{} payload is invalid: {}", label, err),
        )
    })
}

fn require_service_type(value: &str) -> Result<ServiceType, ErrorInfo> {
    ServiceType::from_str(value).ok_or_else(|| {
        ErrorInfo::new(
            "unsupported_service_type",
            format!("unknown service type '{}'", value),
        )
    })
}

fn require_string<'a>(value: &'a Option<String>, field: &str) -> Result<&'a str, ErrorInfo> {
    if let Some(candidate) = value {
        let trimmed = candidate.trim();
        if !trimmed.is_empty() {
            return Ok(trimmed);
        }
    }
    Err(ErrorInfo::new(
        "missing_field",
        format!("{} is required", field),
    ))
}

fn parse_recorded_at(value: &Option<String>) -> Result<Option<i64>, ErrorInfo> {
    match value {
        None => Ok(None),
        Some(raw) => DateTime::parse_from_rfc3339(raw)
            .map(|ts| Some(ts.timestamp_millis()))
            .map_err(|_| ErrorInfo::new("invalid_timestamp", "recorded_at must be RFC3339")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn service_target_defaults_to_rearview() {
        assert_eq!(parse_service_target(None).unwrap(), ServiceType::Rearview);
        assert_eq!(
            parse_service_target(Some(json!({}))).unwrap(),
            ServiceType::Rearview
        );
        assert_eq!(
            parse_service_target(Some(json!({"service_type": "frontview"}))).unwrap(),
            ServiceType::Frontview
        );
    }

    #[test]
    fn service_target_rejects_unknown_type() {
        let err = parse_service_target(Some(json!({"service_type": "sideview"}))).unwrap_err();
        assert_eq!(err.code, "unsupported_service_type");
    }

    #[test]
    fn service_target_rejects_non_object() {
        let err = parse_service_target(Some(json!(["REARVIEW"]))).unwrap_err();
        assert_eq!(err.code, "invalid_params");
    }

    #[test]
    fn service_request_parses_timestamp() {
        let request = parse_service_request(json!({
            "service_type": "REARVIEW",
            "on": true,
            "recorded_at": "2026-01-30T12:00:00Z"
        }))
        .expect("valid request");
        assert_eq!(request.service_type, ServiceType::Rearview);
        assert!(request.on);
        assert_eq!(request.timestamp_ms, Some(1_769_774_400_000));
    }

    #[test]
    fn service_request_rejects_bad_timestamp() {
        let err = parse_service_request(json!({
            "service_type": "REARVIEW",
            "on": true,
            "recorded_at": "not-a-time"
        }))
        .unwrap_err();
        assert_eq!(err.code, "invalid_timestamp");
    }

    #[test]
    fn service_request_requires_on_flag() {
        let err = parse_service_request(json!({"service_type": "REARVIEW"})).unwrap_err();
        assert_eq!(err.code, "invalid_params");
    }

    #[test]
    fn gear_change_rejects_unknown_gear() {
        let err = parse_gear_change(json!({"gear": "warp"})).unwrap_err();
        assert_eq!(err.code, "invalid_params");
        let change = parse_gear_change(json!({"gear": "reverse"})).expect("valid gear");
        assert_eq!(change.gear, Gear::Reverse);
        assert_eq!(change.timestamp_ms, None);
    }

    #[test]
    fn set_camera_id_requires_camera_id() {
        let err = parse_set_camera_id(json!({"service_type": "REARVIEW"})).unwrap_err();
        assert_eq!(err.code, "missing_field");
        let err =
            parse_set_camera_id(json!({"service_type": "REARVIEW", "camera_id": "  "})).unwrap_err();
        assert_eq!(err.code, "missing_field");
    }

    #[test]
    fn set_camera_id_rejects_long_ids() {
        let err = parse_set_camera_id(json!({
            "service_type": "REARVIEW",
            "camera_id": "a".repeat(MAX_CAMERA_ID_LEN + 1)
        }))
        .unwrap_err();
        assert_eq!(err.code, "invalid_params");
    }

    #[test]
    fn rejects_unknown_fields() {
        let err = parse_display_change(json!({"on": true, "brightness": 3})).unwrap_err();
        assert_eq!(err.code, "invalid_params");
    }

    #[test]
    fn request_round_trips_method_names() {
        let request: Request = serde_json::from_value(json!({
            "protocol_version": 1,
            "method": "start_activity",
            "id": "req-1"
        }))
        .expect("valid request");
        assert!(matches!(request.method, Method::StartActivity));
        assert!(request.params.is_none());
    }
}
