//! ---
//! dl_section: "04-launcher"
//! dl_subsection: "module"
//! dl_type: "source"
//! dl_scope: "code"
//! dl_description: "Launcher controller, deep-link buffering and runtime switching."
//! dl_version: "v0.0.0-prealpha"
//! dl_owner: "tbd"
//! ---
//! Launcher controller for devlaunch.
//!
//! The controller owns exactly one active runtime at a time: the launcher
//! runtime, held strongly, or an app runtime bound to an [`Update`], held
//! weakly because the presenting window owns it. Switching to an app is
//! asynchronous; deep links that arrive before the new runtime is confirmed
//! are buffered in a [`PendingDeepLinkRegistry`] and flushed in order.
//!
//! [`Update`]: devlaunch_updates::Update

use devlaunch_updates::{StorageError, ValidationError};
use uuid::Uuid;

mod controller;
mod deep_link;
mod metrics;
mod recent;
mod registry;
mod runtime;
mod target;

pub use controller::{LauncherController, LauncherState, SwitchTicket};
pub use deep_link::{DeepLink, LaunchOptions};
pub use metrics::LauncherMetrics;
pub use recent::{RecentApp, RecentlyOpenedApps};
pub use registry::PendingDeepLinkRegistry;
pub use runtime::{
    AppRuntimeRef, AppWindow, ErrorManager, LauncherDelegate, Runtime, RuntimeHandle, RuntimeHost,
    TracingErrorManager,
};
pub use target::resolve_update;

/// Errors surfaced by the launcher controller.
#[derive(Debug, thiserror::Error)]
pub enum LauncherError {
    /// The operation requires `start_with_window` to have succeeded.
    #[error("launcher has not been started")]
    NotStarted,
    /// `start_with_window` was called on a running launcher.
    #[error("launcher is already started")]
    AlreadyStarted,
    /// `<scheme>://latest` was requested but no stored update is launchable.
    #[error("no launchable update is available")]
    NoLaunchableUpdate,
    /// The requested update id is not in the store.
    #[error("update {0} is not in the store")]
    UnknownUpdate(Uuid),
    /// The load URL is malformed or uses a scheme the launcher cannot serve.
    #[error("unsupported app url '{0}'")]
    UnsupportedUrl(String),
    /// The stored update cannot run on this host.
    #[error("update {id} targets runtime '{runtime_version}', host expects '{expected}'")]
    IncompatibleUpdate {
        /// Update that was requested.
        id: Uuid,
        /// Runtime version the update was built for.
        runtime_version: String,
        /// Runtime version the host provides.
        expected: String,
    },
    /// A later `load_app` or `navigate_to_launcher` replaced this switch.
    #[error("runtime switch was superseded")]
    Superseded,
    /// The runtime host failed to create a runtime.
    #[error("runtime creation failed: {0}")]
    RuntimeCreation(String),
    /// A deep link was malformed or its scheme is not accepted.
    #[error("deep link rejected: {0}")]
    DeepLinkRejected(String),
    /// A development update could not be synthesized.
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// The update store or the recent-app history failed.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl LauncherError {
    /// Stable label used for metrics and structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            LauncherError::NotStarted => "not_started",
            LauncherError::AlreadyStarted => "already_started",
            LauncherError::NoLaunchableUpdate => "no_launchable_update",
            LauncherError::UnknownUpdate(_) => "unknown_update",
            LauncherError::UnsupportedUrl(_) => "unsupported_url",
            LauncherError::IncompatibleUpdate { .. } => "incompatible_update",
            LauncherError::Superseded => "superseded",
            LauncherError::RuntimeCreation(_) => "runtime_creation",
            LauncherError::DeepLinkRejected(_) => "deep_link_rejected",
            LauncherError::Validation(_) => "validation",
            LauncherError::Storage(_) => "storage",
        }
    }
}

/// Version of the launcher crate.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
