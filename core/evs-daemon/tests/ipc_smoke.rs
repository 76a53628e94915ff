use chrono::{Duration as ChronoDuration, Utc};
use evs_protocol::{Method, Request, Response, PROTOCOL_VERSION};
use serde_json::{json, Value};
use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread::sleep;
use std::time::{Duration, Instant};
use tempfile::TempDir;

const CONFIG: &str = r#"
[[services]]
service_type = "REARVIEW"
camera_id = "/dev/video10"
activity = "com.example.evs/.Viewer"

[daemon]
frame_interval_ms = 5
"#;

struct DaemonGuard {
    child: Child,
}

impl Drop for DaemonGuard {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

fn spawn_daemon(home: &Path) -> Child {
    Command::new(env!("CARGO_BIN_EXE_evs-daemon"))
        .env("HOME", home)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("Failed to spawn evs-daemon")
}

fn write_config(home: &Path) {
    let dir = home.join(".evs");
    std::fs::create_dir_all(&dir).expect("create config dir");
    std::fs::write(dir.join("evs.toml"), CONFIG).expect("write config");
}

fn socket_path(home: &Path) -> PathBuf {
    home.join(".evs").join("daemon.sock")
}

fn wait_for_socket(path: &Path, timeout: Duration) {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if path.exists() && UnixStream::connect(path).is_ok() {
            return;
        }
        sleep(Duration::from_millis(25));
    }
    panic!("Timed out waiting for daemon socket at {}", path.display());
}

fn send_request(socket: &Path, method: Method, params: Option<Value>) -> Response {
    let request = Request {
        protocol_version: PROTOCOL_VERSION,
        method,
        id: Some("smoke".to_string()),
        params,
    };
    let mut stream = UnixStream::connect(socket).expect("Failed to connect to daemon socket");
    serde_json::to_writer(&mut stream, &request).expect("Failed to serialize request");
    stream.write_all(b"\n").expect("Failed to write request");
    stream.flush().ok();
    read_response(&mut stream)
}

fn read_response(stream: &mut UnixStream) -> Response {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 4096];

    loop {
        let n = stream.read(&mut chunk).expect("Failed to read response");
        if n == 0 {
            break;
        }
        buffer.extend_from_slice(&chunk[..n]);
        if chunk[..n].contains(&b'\n') {
            break;
        }
    }

    let response_bytes = match buffer.iter().position(|b| *b == b'\n') {
        Some(index) => &buffer[..index],
        None => buffer.as_slice(),
    };

    serde_json::from_slice(response_bytes).expect("Failed to parse response JSON")
}

fn rearview_field(socket: &Path, field: &str) -> Value {
    let status = send_request(socket, Method::GetStatus, None);
    assert!(status.ok, "status response was not ok");
    let data = status.data.expect("status payload");
    let services = data.as_array().expect("status payload is array");
    services
        .iter()
        .find(|entry| entry.get("service_type").and_then(Value::as_str) == Some("REARVIEW"))
        .and_then(|entry| entry.get(field))
        .cloned()
        .unwrap_or(Value::Null)
}

fn wait_for_state(socket: &Path, expected: &str) {
    let deadline = Instant::now() + Duration::from_secs(3);
    while Instant::now() < deadline {
        if rearview_field(socket, "state").as_str() == Some(expected) {
            return;
        }
        sleep(Duration::from_millis(20));
    }
    panic!(
        "Timed out waiting for state {}; last was {}",
        expected,
        rearview_field(socket, "state")
    );
}

fn result_code(response: &Response) -> Option<String> {
    response
        .data
        .as_ref()
        .and_then(|data| data.get("result"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

#[test]
fn daemon_ipc_viewer_session_smoke() {
    let home = TempDir::new().expect("Failed to create temp HOME");
    write_config(home.path());
    let socket = socket_path(home.path());
    let child = spawn_daemon(home.path());
    let _guard = DaemonGuard { child };

    wait_for_socket(&socket, Duration::from_secs(2));

    let health = send_request(&socket, Method::GetHealth, None);
    assert!(health.ok, "health response was not ok");
    let status = health
        .data
        .as_ref()
        .and_then(|data| data.get("status"))
        .and_then(Value::as_str)
        .unwrap_or("missing");
    assert_eq!(status, "ok");

    assert_eq!(rearview_field(&socket, "state"), json!("INACTIVE"));
    assert_eq!(rearview_field(&socket, "connected"), json!(true));

    // The built-in viewer answers the launch and starts streaming.
    let start = send_request(&socket, Method::StartActivity, None);
    assert!(start.ok, "start_activity response was not ok");
    assert_eq!(result_code(&start).as_deref(), Some("NONE"));
    wait_for_state(&socket, "ACTIVE");
    assert_eq!(rearview_field(&socket, "clients"), json!(1));

    // The viewer streams at the priority that launched it, so the same
    // requester can dismiss it.
    let stop = send_request(&socket, Method::StopActivity, None);
    assert_eq!(result_code(&stop).as_deref(), Some("NONE"));
    wait_for_state(&socket, "INACTIVE");
    assert_eq!(rearview_field(&socket, "clients"), json!(0));

    let now = Utc::now();
    let request_on = send_request(
        &socket,
        Method::ServiceRequest,
        Some(json!({
            "service_type": "REARVIEW",
            "on": true,
            "recorded_at": now.to_rfc3339(),
        })),
    );
    assert!(request_on.ok, "service_request on was not ok");
    wait_for_state(&socket, "ACTIVE");

    // A trigger-launched viewer outranks normal requests.
    let stop = send_request(&socket, Method::StopActivity, None);
    assert_eq!(result_code(&stop).as_deref(), Some("BUSY"));

    let request_off = send_request(
        &socket,
        Method::ServiceRequest,
        Some(json!({
            "service_type": "REARVIEW",
            "on": false,
            "recorded_at": (now + ChronoDuration::seconds(1)).to_rfc3339(),
        })),
    );
    assert!(request_off.ok, "service_request off was not ok");
    wait_for_state(&socket, "INACTIVE");
    assert_eq!(rearview_field(&socket, "clients"), json!(0));
    assert_eq!(rearview_field(&socket, "outstanding_frames"), json!(0));
}

#[test]
fn daemon_ipc_camera_id_and_errors() {
    let home = TempDir::new().expect("Failed to create temp HOME");
    write_config(home.path());
    let socket = socket_path(home.path());
    let child = spawn_daemon(home.path());
    let _guard = DaemonGuard { child };

    wait_for_socket(&socket, Duration::from_secs(2));

    let set = send_request(
        &socket,
        Method::SetCameraId,
        Some(json!({"service_type": "REARVIEW", "camera_id": "/dev/video3"})),
    );
    assert!(set.ok, "set_camera_id response was not ok");

    let get = send_request(
        &socket,
        Method::GetCameraId,
        Some(json!({"service_type": "REARVIEW"})),
    );
    assert_eq!(
        get.data
            .as_ref()
            .and_then(|data| data.get("camera_id"))
            .and_then(Value::as_str),
        Some("/dev/video3")
    );

    let unsupported = send_request(
        &socket,
        Method::GetCameraId,
        Some(json!({"service_type": "FRONTVIEW"})),
    );
    assert!(!unsupported.ok);
    assert_eq!(
        unsupported.error.map(|err| err.code).as_deref(),
        Some("unsupported_service_type")
    );

    let unknown = send_request(
        &socket,
        Method::StartActivity,
        Some(json!({"service_type": "SIDEVIEW"})),
    );
    assert!(!unknown.ok);

    let missing = send_request(&socket, Method::GearChanged, None);
    assert_eq!(
        missing.error.map(|err| err.code).as_deref(),
        Some("invalid_params")
    );

    let mut stream = UnixStream::connect(&socket).expect("connect");
    stream
        .write_all(b"{\"protocol_version\":99,\"method\":\"get_health\"}\n")
        .expect("write");
    let mismatch = read_response(&mut stream);
    assert_eq!(
        mismatch.error.map(|err| err.code).as_deref(),
        Some("protocol_mismatch")
    );
}
