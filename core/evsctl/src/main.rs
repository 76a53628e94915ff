//! evsctl: command-line client for the EVS daemon.
//!
//! Every subcommand is one request over the daemon socket. The response
//! payload is printed as JSON on stdout; failures go to stderr with exit
//! status 1.
//!
//! ## Subcommands
//!
//! - `health`, `status [--service TYPE]`: inspect the daemon and its camera services
//! - `start-activity`, `stop-activity`: normal-priority viewer requests
//! - `gear`, `request`, `display`: inject vehicle signals
//! - `camera-id`: read or override a service's camera

mod daemon_client;
mod logging;

use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use daemon_client::ClientError;
use evs_protocol::{Gear, Method, ServiceType};
use serde_json::{json, Value};

#[derive(Parser)]
#[command(name = "evsctl")]
#[command(about = "Control the EVS camera daemon")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum Switch {
    On,
    Off,
}

impl Switch {
    fn is_on(self) -> bool {
        matches!(self, Switch::On)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Show daemon health and viewer statistics
    Health,

    /// Show the state of the camera services
    Status {
        /// Only this service type
        #[arg(long)]
        service: Option<String>,
    },

    /// Ask for the camera viewer to be shown
    StartActivity {
        /// Service type (defaults to REARVIEW)
        #[arg(long)]
        service: Option<String>,
    },

    /// Ask for the camera viewer to be dismissed
    StopActivity {
        /// Service type (defaults to REARVIEW)
        #[arg(long)]
        service: Option<String>,
    },

    /// Report a gear change (park, reverse, neutral, drive)
    Gear {
        #[arg(value_name = "GEAR")]
        gear: String,
    },

    /// Report a vehicle service request
    Request {
        /// Service type, e.g. REARVIEW
        #[arg(value_name = "SERVICE")]
        service: String,

        #[arg(value_enum, value_name = "STATE")]
        state: Switch,
    },

    /// Report a display power change
    Display {
        #[arg(value_enum, value_name = "STATE")]
        state: Switch,
    },

    /// Read a service's camera id, or override it
    CameraId {
        #[arg(value_name = "SERVICE")]
        service: String,

        /// New camera id; "default" restores the configured one
        #[arg(value_name = "CAMERA_ID")]
        camera_id: Option<String>,
    },
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("Unknown service type '{0}'")]
    UnknownService(String),

    #[error("Unknown gear '{0}'")]
    UnknownGear(String),

    #[error(transparent)]
    Client(#[from] ClientError),
}

fn main() {
    let _logging_guard = logging::init();
    let cli = Cli::parse();

    match run(cli.command) {
        Ok(payload) => match serde_json::to_string_pretty(&payload) {
            Ok(text) => println!("{}", text),
            Err(err) => {
                eprintln!("evsctl: failed to render response: {}", err);
                std::process::exit(1);
            }
        },
        Err(err) => {
            tracing::error!(error = %err, "evsctl command failed");
            eprintln!("evsctl: {}", err);
            std::process::exit(1);
        }
    }
}

fn run(command: Commands) -> Result<Value, CliError> {
    let (method, params) = build_request(command)?;
    tracing::info!(method = ?method, "Sending command to daemon");
    Ok(daemon_client::call(method, params)?)
}

fn build_request(command: Commands) -> Result<(Method, Option<Value>), CliError> {
    let request = match command {
        Commands::Health => (Method::GetHealth, None),
        Commands::Status { service } => (Method::GetStatus, service_target(service.as_deref())?),
        Commands::StartActivity { service } => {
            (Method::StartActivity, service_target(service.as_deref())?)
        }
        Commands::StopActivity { service } => {
            (Method::StopActivity, service_target(service.as_deref())?)
        }
        Commands::Gear { gear } => {
            let gear = Gear::from_str(&gear).ok_or(CliError::UnknownGear(gear))?;
            (
                Method::GearChanged,
                Some(json!({
                    "gear": gear.as_str(),
                    "recorded_at": Utc::now().to_rfc3339(),
                })),
            )
        }
        Commands::Request { service, state } => (
            Method::ServiceRequest,
            Some(json!({
                "service_type": service_name(&service)?,
                "on": state.is_on(),
                "recorded_at": Utc::now().to_rfc3339(),
            })),
        ),
        Commands::Display { state } => (
            Method::DisplayChanged,
            Some(json!({ "on": state.is_on() })),
        ),
        Commands::CameraId {
            service,
            camera_id: Some(camera_id),
        } => (
            Method::SetCameraId,
            Some(json!({
                "service_type": service_name(&service)?,
                "camera_id": camera_id,
            })),
        ),
        Commands::CameraId {
            service,
            camera_id: None,
        } => (
            Method::GetCameraId,
            Some(json!({ "service_type": service_name(&service)? })),
        ),
    };
    Ok(request)
}

fn service_name(value: &str) -> Result<&'static str, CliError> {
    ServiceType::from_str(value)
        .map(|service_type| service_type.as_str())
        .ok_or_else(|| CliError::UnknownService(value.to_string()))
}

fn service_target(service: Option<&str>) -> Result<Option<Value>, CliError> {
    service
        .map(|name| service_name(name).map(|name| json!({ "service_type": name })))
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_valid() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn request_command_normalizes_service_name() {
        let cli = Cli::try_parse_from(["evsctl", "request", "rearview", "on"]).unwrap();
        let (method, params) = build_request(cli.command).unwrap();
        assert_eq!(method, Method::ServiceRequest);
        let params = params.unwrap();
        assert_eq!(params["service_type"], "REARVIEW");
        assert_eq!(params["on"], true);
        assert!(params["recorded_at"].is_string());
    }

    #[test]
    fn camera_id_without_value_reads_it() {
        let cli = Cli::try_parse_from(["evsctl", "camera-id", "REARVIEW"]).unwrap();
        let (method, params) = build_request(cli.command).unwrap();
        assert_eq!(method, Method::GetCameraId);
        assert_eq!(params.unwrap(), json!({"service_type": "REARVIEW"}));

        let cli =
            Cli::try_parse_from(["evsctl", "camera-id", "REARVIEW", "/dev/video3"]).unwrap();
        let (method, params) = build_request(cli.command).unwrap();
        assert_eq!(method, Method::SetCameraId);
        assert_eq!(params.unwrap()["camera_id"], "/dev/video3");
    }

    #[test]
    fn status_can_target_one_service() {
        let cli = Cli::try_parse_from(["evsctl", "status", "--service", "surroundview"]).unwrap();
        let (method, params) = build_request(cli.command).unwrap();
        assert_eq!(method, Method::GetStatus);
        assert_eq!(params.unwrap(), json!({"service_type": "SURROUNDVIEW"}));
    }

    #[test]
    fn start_activity_defaults_to_no_params() {
        let cli = Cli::try_parse_from(["evsctl", "start-activity"]).unwrap();
        let (method, params) = build_request(cli.command).unwrap();
        assert_eq!(method, Method::StartActivity);
        assert!(params.is_none());
    }

    #[test]
    fn unknown_inputs_are_rejected_before_sending() {
        let cli = Cli::try_parse_from(["evsctl", "gear", "overdrive"]).unwrap();
        assert!(matches!(
            build_request(cli.command),
            Err(CliError::UnknownGear(_))
        ));

        let cli = Cli::try_parse_from(["evsctl", "request", "SIDEVIEW", "off"]).unwrap();
        assert!(matches!(
            build_request(cli.command),
            Err(CliError::UnknownService(_))
        ));

        assert!(Cli::try_parse_from(["evsctl", "display", "dim"]).is_err());
    }
}
