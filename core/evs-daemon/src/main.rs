//! EVS daemon entrypoint.
//!
//! Hosts one `CarEvsService` over a unix socket. Each configured service type
//! gets a simulated camera HAL; vehicle signals (gear, service requests,
//! display power) arrive as IPC requests and are queued onto the service's
//! event loop. The built-in viewer answers launch intents by streaming.

use chrono::Utc;
use crossbeam::channel;
use fs_err as fs;
use serde::Serialize;
use std::env;
use std::io::{Read, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use evs_core::{
    load_config, ActivityLauncher, CarEvsService, ErrorCode, EvsConfig, ServiceState, ServiceType,
};
use evs_protocol::{
    parse_display_change, parse_gear_change, parse_get_camera_id, parse_service_request,
    parse_service_target, parse_set_camera_id, ErrorInfo, Method, Request, Response,
    MAX_REQUEST_BYTES, PROTOCOL_VERSION,
};
use serde_json::Value;

mod hal;
mod viewer;

use hal::SimulatedHal;
use viewer::{HeadlessLauncher, ViewerLauncher, ViewerStats};

const SOCKET_NAME: &str = "daemon.sock";
const READ_TIMEOUT_SECS: u64 = 2;
const READ_CHUNK_SIZE: usize = 4096;

struct DaemonState {
    service: Arc<CarEvsService>,
    viewer: Option<Arc<ViewerStats>>,
    started_at: Instant,
}

#[derive(Debug, Serialize)]
struct ServiceSnapshot {
    service_type: ServiceType,
    state: ServiceState,
    camera_id: String,
    connected: bool,
    clients: usize,
    outstanding_frames: usize,
    requires_system_activity: bool,
}

fn main() {
    init_logging();

    let config = match load_config(None) {
        Ok(config) => config,
        Err(err) => {
            warn!(error = %err, "Failed to load EVS config; using defaults");
            EvsConfig::default()
        }
    };

    let socket_path = match daemon_socket_path(&config) {
        Ok(path) => path,
        Err(err) => {
            error!(error = %err, "Failed to resolve daemon socket path");
            std::process::exit(1);
        }
    };

    let state = match start_service(&config) {
        Ok(state) => Arc::new(state),
        Err(err) => {
            error!(error = %err, "Failed to start EVS service");
            std::process::exit(1);
        }
    };

    if let Err(err) = prepare_socket_dir(&socket_path) {
        error!(error = %err, "Failed to prepare daemon socket directory");
        std::process::exit(1);
    }

    if let Err(err) = remove_existing_socket(&socket_path) {
        error!(error = %err, path = %socket_path.display(), "Failed to remove existing socket");
        std::process::exit(1);
    }

    let listener = match UnixListener::bind(&socket_path) {
        Ok(listener) => listener,
        Err(err) => {
            error!(error = %err, path = %socket_path.display(), "Failed to bind daemon socket");
            std::process::exit(1);
        }
    };

    info!(
        path = %socket_path.display(),
        services = state.service.statuses().len(),
        viewer_enabled = state.viewer.is_some(),
        "EVS daemon started"
    );

    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                let state = Arc::clone(&state);
                thread::spawn(|| handle_connection(stream, state));
            }
            Err(err) => {
                warn!(error = %err, "Failed to accept daemon connection");
            }
        }
    }
}

fn start_service(config: &EvsConfig) -> evs_core::Result<DaemonState> {
    let frame_interval = Duration::from_millis(config.daemon.frame_interval_ms.max(1));
    let max_in_flight = config.daemon.max_in_flight_frames;

    let (viewer_tx, viewer_rx) = channel::unbounded();
    let launcher: Arc<dyn ActivityLauncher> = if config.daemon.viewer_enabled {
        Arc::new(ViewerLauncher::new(viewer_tx.clone()))
    } else {
        Arc::new(HeadlessLauncher)
    };

    let service = CarEvsService::new(config, launcher, |service, sink| {
        info!(
            service_type = %service.service_type,
            camera_id = %service.camera_id,
            activity = ?service.activity,
            "Configuring simulated HAL"
        );
        Box::new(SimulatedHal::new(sink, frame_interval, max_in_flight))
    })?;
    let service = Arc::new(service);

    let viewer = if config.daemon.viewer_enabled {
        let stats = Arc::new(ViewerStats::default());
        viewer::spawn_viewer(
            Arc::clone(&service),
            viewer_tx,
            viewer_rx,
            config.trusted_uid,
            Arc::clone(&stats),
        );
        Some(stats)
    } else {
        None
    };

    service.init();
    let event_loop = Arc::clone(&service);
    thread::spawn(move || event_loop.run());

    Ok(DaemonState {
        service,
        viewer,
        started_at: Instant::now(),
    })
}

fn init_logging() {
    let debug_enabled = env::var("EVS_DEBUG_LOG")
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(false);
    let filter = if debug_enabled {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn daemon_socket_path(config: &EvsConfig) -> Result<PathBuf, String> {
    if let Some(path) = &config.daemon.socket_path {
        return Ok(path.clone());
    }
    let home = dirs::home_dir().ok_or_else(|| "Home directory not found".to_string())?;
    Ok(home.join(".evs").join(SOCKET_NAME))
}

fn prepare_socket_dir(socket_path: &Path) -> Result<(), String> {
    let parent = socket_path
        .parent()
        .ok_or_else(|| "Socket path has no parent".to_string())?;
    fs::create_dir_all(parent).map_err(|err| format!("Failed to create socket directory: {}", err))
}

fn remove_existing_socket(socket_path: &Path) -> Result<(), String> {
    if socket_path.exists() {
        fs::remove_file(socket_path)
            .map_err(|err| format!("Failed to remove existing socket: {}", err))?;
    }
    Ok(())
}

fn handle_connection(mut stream: UnixStream, state: Arc<DaemonState>) {
    let request = match read_request(&mut stream) {
        Ok(request) => request,
        Err(err) => {
            warn!(code = %err.code, message = %err.message, "Failed to read request");
            let response = Response::error_with_info(None, err);
            let _ = write_response(&mut stream, response);
            return;
        }
    };

    tracing::debug!(method = ?request.method, id = ?request.id, "Daemon request received");
    let response = handle_request(request, &state);
    let _ = write_response(&mut stream, response);
}

fn read_request(stream: &mut UnixStream) -> Result<Request, ErrorInfo> {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(READ_TIMEOUT_SECS)));

    let mut buffer = Vec::new();
    let mut chunk = [0u8; READ_CHUNK_SIZE];

    loop {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                buffer.extend_from_slice(&chunk[..n]);
                if buffer.len() > MAX_REQUEST_BYTES {
                    return Err(ErrorInfo::new(
                        "request_too_large",
                        "request exceeded maximum size",
                    ));
                }
                if chunk[..n].contains(&b'\n') {
                    break;
                }
            }
            Err(err)
                if matches!(
                    err.kind(),
                    std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                ) =>
            {
                return Err(ErrorInfo::new("read_timeout", "request timed out"));
            }
            Err(err) => {
                return Err(ErrorInfo::new(
                    "read_error",
                    format!("failed to read request: {}", err),
                ));
            }
        }
    }

    let request_bytes = match buffer.iter().position(|b| *b == b'\n') {
        Some(index) => &buffer[..index],
        None => buffer.as_slice(),
    };

    if request_bytes.iter().all(|b| b.is_ascii_whitespace()) {
        return Err(ErrorInfo::new("empty_request", "request body was empty"));
    }

    serde_json::from_slice(request_bytes).map_err(|err| {
        ErrorInfo::new(
            "invalid_json",
            format!("request was not valid JSON: {}", err),
        )
    })
}

fn handle_request(request: Request, state: &DaemonState) -> Response {
    if request.protocol_version != PROTOCOL_VERSION {
        return Response::error(
            request.id,
            "protocol_mismatch",
            "unsupported protocol version",
        );
    }

    let service = &state.service;
    match request.method {
        Method::GetHealth => {
            let mut data = serde_json::json!({
                "status": "ok",
                "pid": std::process::id(),
                "version": env!("CARGO_PKG_VERSION"),
                "protocol_version": PROTOCOL_VERSION,
                "uptime_secs": state.started_at.elapsed().as_secs(),
                "services": service.statuses().len(),
            });
            if let Some(stats) = &state.viewer {
                if let Ok(value) = serde_json::to_value(stats.snapshot()) {
                    data["viewer"] = value;
                }
            }
            Response::ok(request.id, data)
        }
        Method::GetStatus => {
            let filter = match request.params {
                Some(params) => match parse_service_target(Some(params)) {
                    Ok(service_type) => Some(service_type),
                    Err(err) => return Response::error_with_info(request.id, err),
                },
                None => None,
            };
            let snapshots = service_snapshots(service, filter);
            tracing::debug!(services = snapshots.len(), "Status snapshot");
            match serde_json::to_value(snapshots) {
                Ok(value) => Response::ok(request.id, value),
                Err(err) => Response::error(
                    request.id,
                    "serialization_error",
                    format!("Failed to serialize status: {}", err),
                ),
            }
        }
        Method::StartActivity => {
            with_service_target(request.id, request.params, |service_type| {
                arbitration_result(service_type, service.start_activity(service_type))
            })
        }
        Method::StopActivity => {
            with_service_target(request.id, request.params, |service_type| {
                arbitration_result(service_type, service.stop_activity(service_type))
            })
        }
        Method::ServiceRequest => {
            let params = match require_params(&request.id, request.params) {
                Ok(params) => params,
                Err(response) => return response,
            };
            match parse_service_request(params) {
                Ok(parsed) => {
                    let timestamp_ms = parsed.timestamp_ms.unwrap_or_else(now_millis);
                    info!(
                        service_type = %parsed.service_type,
                        on = parsed.on,
                        timestamp_ms,
                        "Vehicle service request"
                    );
                    service.notify_service_request(parsed.service_type, parsed.on, timestamp_ms);
                    Response::ok(request.id, serde_json::json!({ "accepted": true }))
                }
                Err(err) => Response::error_with_info(request.id, err),
            }
        }
        Method::GearChanged => {
            let params = match require_params(&request.id, request.params) {
                Ok(params) => params,
                Err(response) => return response,
            };
            match parse_gear_change(params) {
                Ok(parsed) => {
                    let timestamp_ms = parsed.timestamp_ms.unwrap_or_else(now_millis);
                    info!(gear = parsed.gear.as_str(), timestamp_ms, "Gear changed");
                    service.notify_gear_changed(parsed.gear, timestamp_ms);
                    Response::ok(request.id, serde_json::json!({ "accepted": true }))
                }
                Err(err) => Response::error_with_info(request.id, err),
            }
        }
        Method::DisplayChanged => {
            let params = match require_params(&request.id, request.params) {
                Ok(params) => params,
                Err(response) => return response,
            };
            match parse_display_change(params) {
                Ok(on) => {
                    info!(on, "Display state changed");
                    service.notify_display_changed(on);
                    Response::ok(request.id, serde_json::json!({ "accepted": true }))
                }
                Err(err) => Response::error_with_info(request.id, err),
            }
        }
        Method::SetCameraId => {
            let params = match require_params(&request.id, request.params) {
                Ok(params) => params,
                Err(response) => return response,
            };
            match parse_set_camera_id(params) {
                Ok(change) => {
                    if service.set_camera_id(change.service_type, &change.camera_id) {
                        Response::ok(
                            request.id,
                            serde_json::json!({
                                "service_type": change.service_type,
                                "camera_id": service.camera_id(change.service_type),
                            }),
                        )
                    } else {
                        unsupported(request.id, change.service_type)
                    }
                }
                Err(err) => Response::error_with_info(request.id, err),
            }
        }
        Method::GetCameraId => {
            let params = match require_params(&request.id, request.params) {
                Ok(params) => params,
                Err(response) => return response,
            };
            match parse_get_camera_id(params) {
                Ok(service_type) => match service.camera_id(service_type) {
                    Some(camera_id) => Response::ok(
                        request.id,
                        serde_json::json!({
                            "service_type": service_type,
                            "camera_id": camera_id,
                        }),
                    ),
                    None => unsupported(request.id, service_type),
                },
                Err(err) => Response::error_with_info(request.id, err),
            }
        }
    }
}

fn service_snapshots(
    service: &CarEvsService,
    filter: Option<ServiceType>,
) -> Vec<ServiceSnapshot> {
    ServiceType::ALL
        .iter()
        .filter(|service_type| filter.map_or(true, |wanted| wanted == **service_type))
        .filter_map(|service_type| service.machine(*service_type))
        .map(|machine| ServiceSnapshot {
            service_type: machine.service_type(),
            state: machine.state(),
            camera_id: machine.camera_id(),
            connected: machine.is_connected(),
            clients: machine.client_count(),
            outstanding_frames: machine.outstanding_frames(),
            requires_system_activity: machine.requires_system_activity(),
        })
        .collect()
}

fn with_service_target(
    id: Option<String>,
    params: Option<Value>,
    f: impl FnOnce(ServiceType) -> Value,
) -> Response {
    match parse_service_target(params) {
        Ok(service_type) => Response::ok(id, f(service_type)),
        Err(err) => Response::error_with_info(id, err),
    }
}

/// Arbitration outcomes are data, not transport errors: `BUSY` is a valid answer.
fn arbitration_result(service_type: ServiceType, result: ErrorCode) -> Value {
    serde_json::json!({
        "service_type": service_type,
        "result": result.as_str(),
    })
}

fn require_params(id: &Option<String>, params: Option<Value>) -> Result<Value, Response> {
    params.ok_or_else(|| Response::error(id.clone(), "invalid_params", "params are required"))
}

fn unsupported(id: Option<String>, service_type: ServiceType) -> Response {
    Response::error(
        id,
        "unsupported_service_type",
        format!("service type {} is not configured", service_type),
    )
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

fn write_response(stream: &mut UnixStream, response: Response) -> std::io::Result<()> {
    serde_json::to_writer(&mut *stream, &response)?;
    stream.write_all(b"\n")?;
    stream.flush()?;
    Ok(())
}
