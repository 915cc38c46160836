//! ---
//! dl_section: "01-core-functionality"
//! dl_subsection: "module"
//! dl_type: "source"
//! dl_scope: "code"
//! dl_description: "Shared primitives and utilities for the launcher workspace."
//! dl_version: "v0.0.0-prealpha"
//! dl_owner: "tbd"
//! ---
//! Shared primitives for the devlaunch workspace.
//! This crate exposes configuration loading, tracing initialisation and the
//! metrics registry type consumed by the update store and the launcher.

pub mod config;
pub mod logging;
pub mod metrics;

pub use config::{
    AppConfig, LauncherSettings, LoggingConfig, RecentAppsConfig, RuntimeVersionFormat,
    StorageConfig, UpdatesConfig,
};
pub use logging::{init_tracing, LogFormat};
pub use metrics::{new_registry, SharedRegistry};
