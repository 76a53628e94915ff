//! File logging for evsctl.
//!
//! stdout carries command output, so diagnostics go to a daily log file under
//! `~/.evs/logs`. The default level is `warn`; `EVSCTL_LOG` takes a custom
//! filter and `EVS_DEBUG_LOG=1` forces debug.

use std::env;
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

const LOG_FILE_PREFIX: &str = "evsctl.log";
const FILTER_ENV: &str = "EVSCTL_LOG";

pub fn init() -> Option<WorkerGuard> {
    let dir = log_dir()?;
    if let Err(err) = fs_err::create_dir_all(&dir) {
        eprintln!("evsctl: logging disabled: {}", err);
        return None;
    }

    let appender = tracing_appender::rolling::RollingFileAppender::new(
        tracing_appender::rolling::Rotation::DAILY,
        &dir,
        LOG_FILE_PREFIX,
    );
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let filter = if debug_enabled() {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_env(FILTER_ENV).unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(false),
        )
        .try_init();

    installed.ok().map(|_| guard)
}

fn log_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".evs").join("logs"))
}

fn debug_enabled() -> bool {
    env::var("EVS_DEBUG_LOG")
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(false)
}
