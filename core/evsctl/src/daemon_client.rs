//! Client helper for talking to the EVS daemon over its unix socket.
//!
//! One request per connection. Transport failures are retried once; daemon
//! error responses are returned as-is.

use chrono::Utc;
use evs_protocol::{Method, Request, Response, MAX_REQUEST_BYTES, PROTOCOL_VERSION};
use rand::RngCore;
use serde_json::Value;
use std::env;
use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::time::Duration;

const SOCKET_ENV: &str = "EVS_DAEMON_SOCKET";
const SOCKET_NAME: &str = "daemon.sock";
const READ_TIMEOUT_MS: u64 = 2000;
const WRITE_TIMEOUT_MS: u64 = 600;
const RETRY_DELAY_MS: u64 = 50;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Home directory not found")]
    HomeDirNotFound,

    #[error("Failed to connect to daemon socket {path}: {source}")]
    Connect {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to talk to daemon: {0}")]
    Io(#[from] std::io::Error),

    #[error("Timed out waiting for daemon response")]
    Timeout,

    #[error("Invalid daemon response: {0}")]
    Protocol(String),

    #[error("Daemon rejected request: {code}: {message}")]
    Daemon { code: String, message: String },
}

impl ClientError {
    fn is_transport(&self) -> bool {
        matches!(
            self,
            ClientError::Connect { .. } | ClientError::Io(_) | ClientError::Timeout
        )
    }
}

/// Sends one request and returns the response payload.
pub fn call(method: Method, params: Option<Value>) -> Result<Value, ClientError> {
    let socket = socket_path()?;
    let build = || Request {
        protocol_version: PROTOCOL_VERSION,
        method,
        id: Some(make_request_id()),
        params: params.clone(),
    };

    let response = match send_request(&socket, build()) {
        Ok(response) => response,
        Err(err) if err.is_transport() => {
            tracing::warn!(error = %err, "Daemon request failed; retrying");
            std::thread::sleep(Duration::from_millis(RETRY_DELAY_MS));
            send_request(&socket, build()).map_err(|retry_err| {
                tracing::warn!(error = %retry_err, "Retry failed");
                retry_err
            })?
        }
        Err(err) => return Err(err),
    };

    into_payload(response)
}

fn into_payload(response: Response) -> Result<Value, ClientError> {
    if response.ok {
        return Ok(response.data.unwrap_or(Value::Null));
    }
    Err(match response.error {
        Some(error) => ClientError::Daemon {
            code: error.code,
            message: error.message,
        },
        None => ClientError::Protocol("error response without details".to_string()),
    })
}

/// `EVS_DAEMON_SOCKET`, then the config file's socket override, then
/// `~/.evs/daemon.sock`.
pub fn socket_path() -> Result<PathBuf, ClientError> {
    if let Ok(path) = env::var(SOCKET_ENV) {
        return Ok(PathBuf::from(path));
    }
    match evs_core::load_config(None) {
        Ok(config) => {
            if let Some(path) = config.daemon.socket_path {
                return Ok(path);
            }
        }
        Err(err) => tracing::debug!(error = %err, "Ignoring unreadable EVS config"),
    }
    let home = dirs::home_dir().ok_or(ClientError::HomeDirNotFound)?;
    Ok(home.join(".evs").join(SOCKET_NAME))
}

fn send_request(socket: &PathBuf, request: Request) -> Result<Response, ClientError> {
    let mut stream = UnixStream::connect(socket).map_err(|source| ClientError::Connect {
        path: socket.clone(),
        source,
    })?;
    let _ = stream.set_read_timeout(Some(Duration::from_millis(READ_TIMEOUT_MS)));
    let _ = stream.set_write_timeout(Some(Duration::from_millis(WRITE_TIMEOUT_MS)));

    tracing::debug!(method = ?request.method, id = ?request.id, "Sending daemon request");
    serde_json::to_writer(&mut stream, &request)
        .map_err(|err| ClientError::Protocol(format!("failed to encode request: {}", err)))?;
    stream.write_all(b"\n")?;
    stream.flush()?;
    read_response(&mut stream)
}

fn read_response(stream: &mut UnixStream) -> Result<Response, ClientError> {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 4096];

    loop {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                buffer.extend_from_slice(&chunk[..n]);
                if buffer.len() > MAX_REQUEST_BYTES {
                    return Err(ClientError::Protocol(
                        "response exceeded maximum size".to_string(),
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
                return Err(ClientError::Timeout);
            }
            Err(err) => return Err(ClientError::Io(err)),
        }
    }

    let response_bytes = match buffer.iter().position(|b| *b == b'\n') {
        Some(index) => &buffer[..index],
        None => buffer.as_slice(),
    };
    if response_bytes.is_empty() {
        return Err(ClientError::Protocol("daemon response was empty".to_string()));
    }

    serde_json::from_slice(response_bytes)
        .map_err(|err| ClientError::Protocol(format!("response was not valid JSON: {}", err)))
}

fn make_request_id() -> String {
    let mut random = rand::thread_rng();
    format!(
        "req-{}-{}-{:x}",
        Utc::now().timestamp_millis(),
        std::process::id(),
        random.next_u64()
    )
}
