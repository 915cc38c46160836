//! ---
//! dl_section: "04-launcher"
//! dl_subsection: "module"
//! dl_type: "source"
//! dl_scope: "code"
//! dl_description: "Launcher controller state machine and runtime switching."
//! dl_version: "v0.0.0-prealpha"
//! dl_owner: "tbd"
//! ---
use std::sync::Arc;

use chrono::{DateTime, Utc};
use devlaunch_common::config::LauncherSettings;
use devlaunch_updates::{GcReport, StorageError, Update, UpdateStore};
use indexmap::IndexMap;
use serde_json::{Map, Value};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use crate::deep_link::{DeepLink, LaunchOptions};
use crate::metrics::LauncherMetrics;
use crate::recent::RecentlyOpenedApps;
use crate::registry::PendingDeepLinkRegistry;
use crate::runtime::{
    AppRuntimeRef, AppWindow, ErrorManager, LauncherDelegate, RuntimeHandle, RuntimeHost,
    TracingErrorManager,
};
use crate::target::resolve_update;
use crate::LauncherError;

/// Observable state of the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LauncherState {
    Idle,
    LauncherActive,
    /// An app runtime for `target` is being created. A previously active app
    /// keeps running until the switch settles.
    Switching { target: Uuid },
    AppActive { update: Uuid },
}

/// Caller-side handle on one `load_app` request.
#[derive(Debug)]
pub struct SwitchTicket {
    generation: u64,
    target: Uuid,
    receiver: oneshot::Receiver<Result<(), LauncherError>>,
}

impl SwitchTicket {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Id of the update this switch targets.
    pub fn target(&self) -> Uuid {
        self.target
    }

    /// Wait for the switch to settle. Resolves once the controller has
    /// applied the runtime-creation result.
    pub async fn wait(self) -> Result<(), LauncherError> {
        self.receiver.await.unwrap_or(Err(LauncherError::Superseded))
    }

    /// Non-blocking check; `None` while the switch is still pending.
    pub fn try_result(&mut self) -> Option<Result<(), LauncherError>> {
        match self.receiver.try_recv() {
            Ok(result) => Some(result),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(LauncherError::Superseded)),
        }
    }
}

struct PendingSwitch {
    generation: u64,
    update: Update,
    ticket: oneshot::Sender<Result<(), LauncherError>>,
}

struct Completion {
    generation: u64,
    result: anyhow::Result<RuntimeHandle>,
}

/// Owns the active runtime and mediates deep links between the launcher and
/// the app.
///
/// All transitions go through `&mut self`. Runtime creation for an app runs
/// on a spawned Tokio task; its result is queued on a channel owned by the
/// controller and applied by [`process_completion`](Self::process_completion),
/// [`try_process_completions`](Self::try_process_completions) or
/// [`run_until_settled`](Self::run_until_settled).
pub struct LauncherController {
    settings: LauncherSettings,
    launcher_bundle_url: Url,
    store: UpdateStore,
    host: Arc<dyn RuntimeHost>,
    error_manager: Arc<dyn ErrorManager>,
    metrics: Option<LauncherMetrics>,
    recent: RecentlyOpenedApps,
    window: Option<Box<dyn AppWindow>>,
    delegate: Option<Arc<dyn LauncherDelegate>>,
    launch_options: LaunchOptions,
    launcher: Option<RuntimeHandle>,
    app: Option<AppRuntimeRef>,
    pending_switch: Option<PendingSwitch>,
    registry: PendingDeepLinkRegistry,
    generation: u64,
    completions_tx: mpsc::UnboundedSender<Completion>,
    completions_rx: mpsc::UnboundedReceiver<Completion>,
}

impl LauncherController {
    pub fn new(
        settings: LauncherSettings,
        store: UpdateStore,
        host: Arc<dyn RuntimeHost>,
    ) -> Result<Self, LauncherError> {
        let launcher_bundle_url = Url::parse(&settings.launcher_bundle_url)
            .map_err(|_| LauncherError::UnsupportedUrl(settings.launcher_bundle_url.clone()))?;
        let recent = RecentlyOpenedApps::in_memory(
            settings.recent_apps.capacity,
            settings.recent_apps.max_age,
        );
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();
        Ok(Self {
            settings,
            launcher_bundle_url,
            store,
            host,
            error_manager: Arc::new(TracingErrorManager),
            metrics: None,
            recent,
            window: None,
            delegate: None,
            launch_options: LaunchOptions::new(),
            launcher: None,
            app: None,
            pending_switch: None,
            registry: PendingDeepLinkRegistry::new(),
            generation: 0,
            completions_tx,
            completions_rx,
        })
    }

    pub fn with_error_manager(mut self, error_manager: Arc<dyn ErrorManager>) -> Self {
        self.error_manager = error_manager;
        self
    }

    pub fn with_metrics(mut self, metrics: LauncherMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Replace the in-memory history, e.g. with one opened from disk.
    pub fn with_recent_apps(mut self, recent: RecentlyOpenedApps) -> Self {
        self.recent = recent;
        self
    }

    pub fn state(&self) -> LauncherState {
        if let Some(switch) = &self.pending_switch {
            return LauncherState::Switching {
                target: switch.update.id(),
            };
        }
        if let Some(app) = &self.app {
            return LauncherState::AppActive {
                update: app.update().id(),
            };
        }
        if self.launcher.is_some() {
            LauncherState::LauncherActive
        } else {
            LauncherState::Idle
        }
    }

    /// Create the launcher runtime and present it in `window`.
    ///
    /// On failure the delegate is told `did_start(false)`, the error manager
    /// receives a fatal report and the controller stays idle.
    pub fn start_with_window(
        &mut self,
        mut window: Box<dyn AppWindow>,
        delegate: Arc<dyn LauncherDelegate>,
        launch_options: LaunchOptions,
    ) -> Result<(), LauncherError> {
        if self.launcher.is_some() {
            return Err(LauncherError::AlreadyStarted);
        }
        let runtime = match self
            .host
            .create_launcher_runtime(&self.launcher_bundle_url, &launch_options)
        {
            Ok(runtime) => runtime,
            Err(err) => {
                let err = LauncherError::RuntimeCreation(format!("{err:#}"));
                self.error_manager.report(&err, true);
                delegate.did_start(false);
                return Err(err);
            }
        };

        window.present_launcher(&runtime);
        self.window = Some(window);
        self.launch_options = launch_options;
        self.launcher = Some(runtime);
        delegate.did_start(true);
        self.delegate = Some(delegate);
        info!(bundle_url = %self.launcher_bundle_url, "launcher started");
        Ok(())
    }

    /// Begin switching to the app addressed by `url`.
    ///
    /// URL resolution happens synchronously and its failures are returned
    /// directly. Runtime creation continues on a spawned task and the
    /// returned ticket resolves once the result has been applied. Calling
    /// again before that supersedes the earlier request. Must be called from
    /// within a Tokio runtime.
    pub fn load_app(&mut self, url: &str) -> Result<SwitchTicket, LauncherError> {
        if self.launcher.is_none() {
            return Err(LauncherError::NotStarted);
        }
        let update = match resolve_update(url, &self.store, &self.settings) {
            Ok(update) => update,
            Err(err) => {
                self.error_manager.report(&err, false);
                self.record_switch("rejected");
                return Err(err);
            }
        };
        let handle = Handle::try_current()
            .map_err(|err| LauncherError::RuntimeCreation(err.to_string()))?;

        self.supersede_pending();
        self.generation += 1;
        let generation = self.generation;
        let target = update.id();
        let bundle_url = update.bundle_url().clone();

        let (ticket, receiver) = oneshot::channel();
        self.pending_switch = Some(PendingSwitch {
            generation,
            update,
            ticket,
        });

        let host = self.host.clone();
        let completions = self.completions_tx.clone();
        let options = self.launch_options.clone();
        let creation = handle.spawn(async move { host.create_runtime(&bundle_url, &options).await });
        handle.spawn(async move {
            let result = match creation.await {
                Ok(result) => result,
                Err(err) => Err(anyhow::anyhow!("runtime creation task failed: {err}")),
            };
            // The receiver is gone only when the controller was dropped.
            let _ = completions.send(Completion { generation, result });
        });

        self.record_switch("started");
        info!(update_id = %target, generation, "runtime switch started");
        Ok(SwitchTicket {
            generation,
            target,
            receiver,
        })
    }

    /// Wait for and apply the next runtime-creation result.
    ///
    /// Returns `false` without waiting when no switch is pending.
    pub async fn process_completion(&mut self) -> bool {
        if self.pending_switch.is_none() {
            return false;
        }
        match self.completions_rx.recv().await {
            Some(completion) => {
                self.apply_completion(completion);
                true
            }
            None => false,
        }
    }

    /// Apply every runtime-creation result that is already available.
    pub fn try_process_completions(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(completion) = self.completions_rx.try_recv() {
            self.apply_completion(completion);
            applied += 1;
        }
        applied
    }

    /// Apply results until no switch is pending.
    pub async fn run_until_settled(&mut self) {
        while self.pending_switch.is_some() {
            match self.completions_rx.recv().await {
                Some(completion) => self.apply_completion(completion),
                None => break,
            }
        }
    }

    /// Accept a deep link.
    ///
    /// Returns `false` for malformed links and schemes that are not
    /// accepted. Otherwise the link is delivered right away when a live app
    /// runtime is active and no switch is pending, or queued until the next
    /// app runtime is confirmed.
    pub fn on_deep_link(&mut self, raw: &str, options: LaunchOptions) -> bool {
        let link = match DeepLink::parse(raw, options).and_then(|link| {
            if self.settings.accepts_scheme(link.scheme()) {
                Ok(link)
            } else {
                Err(LauncherError::DeepLinkRejected(format!(
                    "scheme '{}' is not accepted",
                    link.scheme()
                )))
            }
        }) {
            Ok(link) => link,
            Err(err) => {
                debug!(error = %err, "deep link rejected");
                self.record_deep_link("rejected");
                return false;
            }
        };

        if self.pending_switch.is_none() {
            match self.app.as_ref().map(|app| (app.upgrade(), app.update().id())) {
                Some((Some(runtime), _)) => {
                    // Links left queued by a failed switch go out first.
                    self.flush_pending();
                    runtime.dispatch_deep_link(&link);
                    self.record_deep_link("dispatched");
                    debug!(url = %link, "deep link dispatched");
                    return true;
                }
                Some((None, update_id)) => {
                    warn!(%update_id, "app runtime is gone; returning to launcher");
                    self.app = None;
                    self.present_launcher();
                }
                None => {}
            }
        }

        debug!(url = %link, pending = self.registry.len() + 1, "deep link queued");
        self.registry.push(link);
        self.record_deep_link("queued");
        self.update_pending_gauge();
        true
    }

    /// Bundle URL of the bound app, or of the launcher when no app is bound.
    pub fn source_url(&self) -> Url {
        match &self.app {
            Some(app) => app.update().bundle_url().clone(),
            None => self.launcher_bundle_url.clone(),
        }
    }

    /// Return to the launcher, dropping the app reference and any pending
    /// switch.
    pub fn navigate_to_launcher(&mut self) -> Result<(), LauncherError> {
        if self.launcher.is_none() {
            return Err(LauncherError::NotStarted);
        }
        self.supersede_pending();
        if let Some(app) = self.app.take() {
            info!(update_id = %app.update().id(), "leaving app for launcher");
        }
        self.present_launcher();
        Ok(())
    }

    /// URL → last opened time, most recent first.
    pub fn recently_opened_apps(&self) -> IndexMap<String, DateTime<Utc>> {
        self.recent.as_map(Utc::now())
    }

    /// Whether an app is bound and its runtime is still alive. Stays true
    /// while a switch away from a running app is pending.
    pub fn is_app_running(&self) -> bool {
        self.app.as_ref().is_some_and(AppRuntimeRef::is_alive)
    }

    pub fn launch_options(&self) -> &LaunchOptions {
        &self.launch_options
    }

    /// Update bound to the app runtime, if any.
    pub fn app_update(&self) -> Option<&Update> {
        self.app.as_ref().map(AppRuntimeRef::update)
    }

    /// Manifest of the bound update, if any.
    pub fn app_manifest(&self) -> Option<&Map<String, Value>> {
        self.app_update().and_then(Update::manifest)
    }

    pub fn delegate(&self) -> Option<&Arc<dyn LauncherDelegate>> {
        self.delegate.as_ref()
    }

    pub fn error_manager(&self) -> &Arc<dyn ErrorManager> {
        &self.error_manager
    }

    pub fn version(&self) -> &'static str {
        crate::version()
    }

    pub fn pending_deep_links(&self) -> &PendingDeepLinkRegistry {
        &self.registry
    }

    /// Drop every queued deep link without delivering it.
    pub fn clear_pending_deep_links(&mut self) {
        self.registry.clear();
        self.update_pending_gauge();
    }

    pub fn store(&self) -> &UpdateStore {
        &self.store
    }

    /// Updates referenced by the bound app or by a pending switch.
    pub fn live_update_ids(&self) -> Vec<Uuid> {
        self.app
            .iter()
            .map(|app| app.update().id())
            .chain(self.pending_switch.iter().map(|switch| switch.update.id()))
            .collect()
    }

    /// Garbage-collect the store, sparing updates that are in use.
    pub fn collect_garbage(&self) -> Result<GcReport, StorageError> {
        self.store.collect_garbage(&self.live_update_ids())
    }

    fn apply_completion(&mut self, completion: Completion) {
        let current = self
            .pending_switch
            .as_ref()
            .is_some_and(|switch| switch.generation == completion.generation);
        if !current {
            debug!(
                generation = completion.generation,
                "discarding stale runtime creation result"
            );
            return;
        }
        let Some(switch) = self.pending_switch.take() else {
            return;
        };
        match completion.result {
            Ok(runtime) => self.finish_switch(switch, runtime),
            Err(err) => {
                self.fail_switch(switch, LauncherError::RuntimeCreation(format!("{err:#}")))
            }
        }
    }

    fn finish_switch(&mut self, switch: PendingSwitch, runtime: RuntimeHandle) {
        let Some(window) = self.window.as_mut() else {
            self.fail_switch(switch, LauncherError::NotStarted);
            return;
        };
        let PendingSwitch {
            generation,
            mut update,
            ticket,
        } = switch;

        if let Err(err) = self.store.set_keep(&mut update, true) {
            self.error_manager.report(&LauncherError::Storage(err), false);
        }
        let app = AppRuntimeRef::new(&runtime, update.clone());
        window.present_app(runtime);
        let name = update
            .manifest()
            .and_then(|manifest| manifest.get("name"))
            .and_then(Value::as_str);
        if let Err(err) = self
            .recent
            .record(update.bundle_url().as_str(), name, Utc::now())
        {
            self.error_manager.report(&LauncherError::Storage(err), false);
        }

        self.app = Some(app);
        let _ = ticket.send(Ok(()));
        self.record_switch("succeeded");
        info!(update_id = %update.id(), generation, "runtime switch complete");
        self.flush_pending();
    }

    fn fail_switch(&mut self, switch: PendingSwitch, err: LauncherError) {
        warn!(
            update_id = %switch.update.id(),
            generation = switch.generation,
            error = %err,
            "runtime switch failed; keeping current runtime"
        );
        self.error_manager.report(&err, false);
        self.record_switch("failed");
        let _ = switch.ticket.send(Err(err));
    }

    fn flush_pending(&mut self) {
        let Some(runtime) = self.app.as_ref().and_then(AppRuntimeRef::upgrade) else {
            return;
        };
        let mut flushed = 0;
        for link in self.registry.drain() {
            runtime.dispatch_deep_link(&link);
            flushed += 1;
        }
        if let Some(metrics) = &self.metrics {
            for _ in 0..flushed {
                metrics.record_deep_link("flushed");
            }
        }
        if flushed > 0 {
            debug!(flushed, "pending deep links delivered");
        }
        self.update_pending_gauge();
    }

    fn supersede_pending(&mut self) {
        if let Some(previous) = self.pending_switch.take() {
            debug!(generation = previous.generation, "runtime switch superseded");
            let _ = previous.ticket.send(Err(LauncherError::Superseded));
            self.record_switch("superseded");
        }
    }

    fn present_launcher(&mut self) {
        if let (Some(window), Some(launcher)) = (self.window.as_mut(), self.launcher.as_ref()) {
            window.present_launcher(launcher);
        }
    }

    fn record_switch(&self, outcome: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.record_switch(outcome);
        }
    }

    fn record_deep_link(&self, disposition: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.record_deep_link(disposition);
        }
    }

    fn update_pending_gauge(&self) {
        if let Some(metrics) = &self.metrics {
            metrics.set_pending(self.registry.len());
        }
    }
}

impl std::fmt::Debug for LauncherController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LauncherController")
            .field("state", &self.state())
            .field("generation", &self.generation)
            .field("pending_deep_links", &self.registry.len())
            .finish_non_exhaustive()
    }
}
