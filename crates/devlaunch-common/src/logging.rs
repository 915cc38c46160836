//! ---
//! dl_section: "01-core-functionality"
//! dl_subsection: "module"
//! dl_type: "source"
//! dl_scope: "code"
//! dl_description: "Tracing subscriber setup with stdout and rolling file layers."
//! dl_version: "v0.0.0-prealpha"
//! dl_owner: "tbd"
//! ---
use anyhow::{Context, Result};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::LoggingConfig;

const LOG_ENV: &str = "DEVLAUNCH_LOG";
const DEFAULT_DIRECTIVE: &str = "info";

/// Keeps the file writer flushing for the life of the process.
static LOG_FILE_GUARD: OnceCell<WorkerGuard> = OnceCell::new();

/// Console log encoding. Console output goes to stderr so command output on
/// stdout stays machine-readable.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum LogFormat {
    StructuredJson,
    #[default]
    Pretty,
}

/// Install the global subscriber: a console layer in `config.format` and a
/// daily JSON file `<prefix>.log` under `config.directory`.
///
/// The filter comes from `DEVLAUNCH_LOG`, then `RUST_LOG`, then `info`.
/// Calling this again after a subscriber is installed is a no-op.
pub fn init_tracing(service_name: &str, config: &LoggingConfig) -> Result<()> {
    std::fs::create_dir_all(&config.directory).with_context(|| {
        format!("unable to create log directory {}", config.directory.display())
    })?;
    let prefix = config.file_prefix.as_deref().unwrap_or(service_name);
    let appender = tracing_appender::rolling::daily(&config.directory, format!("{prefix}.log"));
    let (file_writer, guard) = tracing_appender::non_blocking(appender);

    let console = fmt::layer()
        .with_writer(std::io::stderr)
        .with_timer(fmt::time::UtcTime::rfc_3339());
    let console = match config.format {
        LogFormat::StructuredJson => console.json().with_target(false).boxed(),
        LogFormat::Pretty => console.boxed(),
    };
    let file = fmt::layer()
        .json()
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .with_writer(file_writer);

    let installed = tracing_subscriber::registry()
        .with(filter_from_env())
        .with(console)
        .with(file)
        .try_init()
        .is_ok();
    if installed {
        let _ = LOG_FILE_GUARD.set(guard);
        info!(service = %service_name, log_dir = %config.directory.display(), "tracing initialised");
    }
    Ok(())
}

fn filter_from_env() -> EnvFilter {
    if let Ok(directive) = std::env::var(LOG_ENV) {
        match EnvFilter::try_new(&directive) {
            Ok(filter) => return filter,
            Err(err) => eprintln!("ignoring invalid {LOG_ENV} directive '{directive}': {err}"),
        }
    }
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVE))
}
