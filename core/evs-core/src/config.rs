//! Configuration for the EVS service.
//!
//! Loaded from `~/.evs/evs.toml`. Every field has a default, so a missing file
//! yields a working single-rearview setup.
//!
//! ```toml
//! trigger = "gear_selection"
//! stream_sharing = "exclusive"
//! trusted_uid = 1000
//!
//! [timing]
//! stream_start_request_timeout_ms = 3000
//! hal_reconnect_interval_ms = 1000
//!
//! [[services]]
//! service_type = "REARVIEW"
//! camera_id = "/dev/video10"
//! activity = "com.example.evs/.PreviewActivity"
//! ```
//!
//! Service descriptors in the legacy `key=value,...` form are accepted too:
//! `descriptors = ["serviceType=FRONTVIEW,cameraId=/dev/video2"]`.

use crate::error::{EvsError, Result};
use evs_protocol::ServiceType;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_CONFIG_RELATIVE_PATH: &str = ".evs/evs.toml";
pub const DEFAULT_REARVIEW_CAMERA_ID: &str = "/dev/video10";
pub const DEFAULT_TRUSTED_UID: u32 = 1000;

/// Which vehicle signal drives the rearview activity.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TriggerSource {
    #[default]
    ServiceRequest,
    GearSelection,
}

/// Whether concurrent stream clients share one stream or preempt each other.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StreamSharing {
    #[default]
    Exclusive,
    Shared,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct TimingConfig {
    #[serde(default = "default_stream_start_request_timeout_ms")]
    pub stream_start_request_timeout_ms: u64,
    #[serde(default = "default_hal_reconnect_interval_ms")]
    pub hal_reconnect_interval_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            stream_start_request_timeout_ms: default_stream_start_request_timeout_ms(),
            hal_reconnect_interval_ms: default_hal_reconnect_interval_ms(),
        }
    }
}

impl TimingConfig {
    pub fn stream_start_request_timeout(&self) -> Duration {
        Duration::from_millis(self.stream_start_request_timeout_ms)
    }

    pub fn hal_reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.hal_reconnect_interval_ms)
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ServiceConfig {
    pub service_type: ServiceType,
    pub camera_id: String,
    #[serde(default)]
    pub activity: Option<String>,
}

impl ServiceConfig {
    pub fn new(service_type: ServiceType, camera_id: impl Into<String>) -> Self {
        Self {
            service_type,
            camera_id: camera_id.into(),
            activity: None,
        }
    }

    pub fn with_activity(mut self, activity: impl Into<String>) -> Self {
        self.activity = Some(activity.into());
        self
    }
}

/// Settings consumed only by the daemon host.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct DaemonConfig {
    #[serde(default)]
    pub socket_path: Option<PathBuf>,
    #[serde(default = "default_frame_interval_ms")]
    pub frame_interval_ms: u64,
    #[serde(default = "default_max_in_flight_frames")]
    pub max_in_flight_frames: usize,
    #[serde(default = "default_true")]
    pub viewer_enabled: bool,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            socket_path: None,
            frame_interval_ms: default_frame_interval_ms(),
            max_in_flight_frames: default_max_in_flight_frames(),
            viewer_enabled: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct EvsConfig {
    #[serde(default)]
    pub trigger: TriggerSource,
    #[serde(default)]
    pub stream_sharing: StreamSharing,
    #[serde(default = "default_trusted_uid")]
    pub trusted_uid: u32,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub services: Vec<ServiceConfig>,
    #[serde(default)]
    pub descriptors: Vec<String>,
    #[serde(default)]
    pub daemon: DaemonConfig,
}

impl Default for EvsConfig {
    fn default() -> Self {
        Self {
            trigger: TriggerSource::default(),
            stream_sharing: StreamSharing::default(),
            trusted_uid: DEFAULT_TRUSTED_UID,
            timing: TimingConfig::default(),
            services: Vec::new(),
            descriptors: Vec::new(),
            daemon: DaemonConfig::default(),
        }
    }
}

impl EvsConfig {
    /// All configured services: `[[services]]` entries first, then parsed
    /// descriptors. Falls back to a single rearview service when nothing is
    /// configured.
    pub fn service_configs(&self) -> Result<Vec<ServiceConfig>> {
        let mut configs = self.services.clone();
        for descriptor in &self.descriptors {
            configs.push(parse_service_descriptor(descriptor)?);
        }

        if configs.is_empty() {
            configs.push(ServiceConfig::new(
                ServiceType::Rearview,
                DEFAULT_REARVIEW_CAMERA_ID,
            ));
        }

        let mut seen = HashSet::new();
        for config in &configs {
            if !seen.insert(config.service_type) {
                return Err(EvsError::InvalidDescriptor {
                    descriptor: config.service_type.to_string(),
                    reason: "service type configured more than once".to_string(),
                });
            }
            if config.camera_id.trim().is_empty() {
                return Err(EvsError::InvalidDescriptor {
                    descriptor: config.service_type.to_string(),
                    reason: "camera id is empty".to_string(),
                });
            }
        }

        Ok(configs)
    }
}

/// Parses `serviceType=REARVIEW,cameraId=/dev/video10,activityName=pkg/.Cls`.
pub fn parse_service_descriptor(descriptor: &str) -> Result<ServiceConfig> {
    let invalid = |reason: &str| EvsError::InvalidDescriptor {
        descriptor: descriptor.to_string(),
        reason: reason.to_string(),
    };

    let mut service_type = None;
    let mut camera_id = None;
    let mut activity = None;

    for entry in descriptor.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let (key, value) = entry
            .split_once('=')
            .ok_or_else(|| invalid("expected key=value pairs"))?;
        let value = value.trim();
        match key.trim() {
            "serviceType" => {
                service_type = Some(
                    ServiceType::from_str(value).ok_or_else(|| invalid("unknown service type"))?,
                );
            }
            "cameraId" => camera_id = Some(value.to_string()),
            "activityName" => activity = Some(value.to_string()).filter(|v| !v.is_empty()),
            other => {
                tracing::warn!(key = other, descriptor, "Ignoring unknown descriptor key");
            }
        }
    }

    let service_type = service_type.ok_or_else(|| invalid("serviceType is required"))?;
    let camera_id = camera_id
        .filter(|id| !id.is_empty())
        .ok_or_else(|| invalid("cameraId is required"))?;

    Ok(ServiceConfig {
        service_type,
        camera_id,
        activity,
    })
}

pub fn default_config_path() -> Result<PathBuf> {
    let home = dirs::home_dir().ok_or(EvsError::HomeDirNotFound)?;
    Ok(home.join(DEFAULT_CONFIG_RELATIVE_PATH))
}

pub fn load_config(path: Option<PathBuf>) -> Result<EvsConfig> {
    let config_path = match path {
        Some(path) => path,
        None => default_config_path()?,
    };

    if !config_path.exists() {
        return Ok(EvsConfig::default());
    }

    let content = fs_err::read_to_string(&config_path).map_err(|err| EvsError::Io {
        context: format!("Failed to read EVS config {}", config_path.display()),
        source: err,
    })?;
    let config = toml::from_str::<EvsConfig>(&content).map_err(|err| EvsError::ConfigMalformed {
        path: config_path.clone(),
        details: err.to_string(),
    })?;
    // Surface descriptor errors at load time rather than at service start.
    config.service_configs()?;
    Ok(config)
}

fn default_stream_start_request_timeout_ms() -> u64 {
    3000
}

fn default_hal_reconnect_interval_ms() -> u64 {
    1000
}

fn default_trusted_uid() -> u32 {
    DEFAULT_TRUSTED_UID
}

fn default_frame_interval_ms() -> u64 {
    33
}

fn default_max_in_flight_frames() -> usize {
    4
}

fn default_true() -> bool {
    true
}
