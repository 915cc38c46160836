//! ---
//! dl_section: "04-launcher"
//! dl_subsection: "module"
//! dl_type: "source"
//! dl_scope: "code"
//! dl_description: "Collaborator traits for runtimes, windows and error reporting."
//! dl_version: "v0.0.0-prealpha"
//! dl_owner: "tbd"
//! ---
use std::fmt;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use devlaunch_updates::Update;
use tracing::{error, warn};
use url::Url;

use crate::deep_link::{DeepLink, LaunchOptions};
use crate::LauncherError;

/// A running JavaScript runtime serving one bundle.
pub trait Runtime: Send + Sync + fmt::Debug {
    /// Bundle the runtime was created from.
    fn bundle_url(&self) -> &Url;
    /// Deliver a navigation intent to the running app.
    fn dispatch_deep_link(&self, link: &DeepLink);
}

/// Strong handle to a runtime.
pub type RuntimeHandle = Arc<dyn Runtime>;

/// Creates runtimes on behalf of the controller.
#[async_trait]
pub trait RuntimeHost: Send + Sync + 'static {
    /// Create the launcher runtime. Called once from `start_with_window`.
    fn create_launcher_runtime(
        &self,
        bundle_url: &Url,
        options: &LaunchOptions,
    ) -> anyhow::Result<RuntimeHandle>;

    /// Create an app runtime for `bundle_url`. Runs on a spawned task.
    async fn create_runtime(
        &self,
        bundle_url: &Url,
        options: &LaunchOptions,
    ) -> anyhow::Result<RuntimeHandle>;
}

/// Presents runtimes to the user.
pub trait AppWindow: Send {
    fn present_launcher(&mut self, runtime: &RuntimeHandle);
    /// Present an app runtime. The window becomes its owner; dropping the
    /// handle tears the app down.
    fn present_app(&mut self, runtime: RuntimeHandle);
}

/// Notified once the launcher runtime is (or failed to be) up.
pub trait LauncherDelegate: Send + Sync {
    fn did_start(&self, success: bool);
}

/// Sink for errors the controller cannot return to a caller.
pub trait ErrorManager: Send + Sync {
    fn report(&self, error: &LauncherError, fatal: bool);
}

/// [`ErrorManager`] that only logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingErrorManager;

impl ErrorManager for TracingErrorManager {
    fn report(&self, err: &LauncherError, fatal: bool) {
        if fatal {
            error!(kind = err.kind(), error = %err, "fatal launcher error");
        } else {
            warn!(kind = err.kind(), error = %err, "launcher error");
        }
    }
}

/// Weak reference to the app runtime together with the update it runs.
#[derive(Debug, Clone)]
pub struct AppRuntimeRef {
    runtime: Weak<dyn Runtime>,
    update: Update,
}

impl AppRuntimeRef {
    pub fn new(runtime: &RuntimeHandle, update: Update) -> Self {
        Self {
            runtime: Arc::downgrade(runtime),
            update,
        }
    }

    /// Strong handle, if the window still owns the runtime.
    pub fn upgrade(&self) -> Option<RuntimeHandle> {
        self.runtime.upgrade()
    }

    pub fn is_alive(&self) -> bool {
        self.runtime.strong_count() > 0
    }

    pub fn update(&self) -> &Update {
        &self.update
    }
}
