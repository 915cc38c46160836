//! ---
//! dl_section: "02-update-store"
//! dl_subsection: "module"
//! dl_type: "source"
//! dl_scope: "code"
//! dl_description: "Store facade: import, selection, keep flag and garbage collection."
//! dl_version: "v0.0.0-prealpha"
//! dl_owner: "tbd"
//! ---
use std::collections::HashSet;
use std::sync::Arc;

use devlaunch_common::config::UpdatesConfig;
use serde_json::Value;
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use crate::database::UpdateDatabase;
use crate::metrics::UpdateStoreMetrics;
use crate::update::{select_launchable, Update};
use crate::{StorageError, UpdateStoreError, ValidationError};

/// Outcome of a garbage collection pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GcReport {
    /// Updates deleted from the store.
    pub removed_updates: Vec<Uuid>,
    /// Asset keys deleted because no update references them anymore.
    pub removed_assets: Vec<String>,
    /// Updates kept because of `keep` or a live runtime reference.
    pub retained: Vec<Uuid>,
}

/// Facade over one shared persistence handle.
#[derive(Debug, Clone)]
pub struct UpdateStore {
    database: Arc<dyn UpdateDatabase>,
    config: UpdatesConfig,
    metrics: Option<UpdateStoreMetrics>,
}

impl UpdateStore {
    /// Create a store over `database`.
    pub fn new(database: Arc<dyn UpdateDatabase>, config: UpdatesConfig) -> Self {
        Self {
            database,
            config,
            metrics: None,
        }
    }

    /// Attach metrics.
    pub fn with_metrics(mut self, metrics: UpdateStoreMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Configuration used for validation and selection.
    pub fn config(&self) -> &UpdatesConfig {
        &self.config
    }

    /// Runtime version the host expects.
    pub fn expected_runtime_version(&self) -> &str {
        &self.config.expected_runtime_version
    }

    /// Validate a manifest into an update bound to this store, without saving it.
    pub fn create(&self, raw: &Value) -> Result<Update, ValidationError> {
        Update::from_manifest(raw, &self.config, Some(self.database.clone()))
    }

    /// Validate, then persist a manifest and reference its assets.
    ///
    /// Nothing is written when validation fails.
    pub fn import(&self, raw: &Value) -> Result<Update, UpdateStoreError> {
        let result = self.import_inner(raw);
        if let Some(metrics) = &self.metrics {
            metrics.record_import(match &result {
                Ok(_) => "imported",
                Err(UpdateStoreError::Validation(_)) => "invalid",
                Err(UpdateStoreError::Duplicate(_)) => "duplicate",
                Err(UpdateStoreError::Storage(_)) => "storage_error",
            });
        }
        result
    }

    fn import_inner(&self, raw: &Value) -> Result<Update, UpdateStoreError> {
        let update = self.create(raw).inspect_err(|err| {
            warn!(error = %err, "rejected update manifest");
        })?;
        if self.database.load(update.id())?.is_some() {
            return Err(UpdateStoreError::Duplicate(update.id()));
        }
        self.database.save(update.record())?;
        self.database
            .mark_assets_referenced(update.id(), update.assets())?;
        info!(
            update_id = %update.id(),
            runtime_version = %update.runtime_version(),
            commit_time = %update.commit_time(),
            "update imported"
        );
        Ok(update)
    }

    /// Load a stored update.
    pub fn load(&self, id: Uuid) -> Result<Option<Update>, StorageError> {
        Ok(self
            .database
            .load(id)?
            .map(|record| Update::from_record(record, Some(self.database.clone()))))
    }

    /// Every stored update.
    pub fn list(&self) -> Result<Vec<Update>, StorageError> {
        Ok(self
            .database
            .list()?
            .into_iter()
            .map(|record| Update::from_record(record, Some(self.database.clone())))
            .collect())
    }

    /// Change the retention flag of `update`.
    ///
    /// Persisted updates are written through to storage before the in-memory
    /// flag changes; transient updates only change in memory.
    pub fn set_keep(&self, update: &mut Update, keep: bool) -> Result<(), StorageError> {
        update.set_keep(keep)?;
        debug!(update_id = %update.id(), keep, "keep flag updated");
        Ok(())
    }

    /// The most recent stored update compatible with the host runtime.
    pub fn launchable(&self) -> Result<Option<Update>, StorageError> {
        let candidates = self.list()?;
        Ok(select_launchable(&candidates, self.expected_runtime_version()).cloned())
    }

    /// Synthesize a transient development-mode update serving `bundle_url`.
    pub fn development_update(&self, bundle_url: Url) -> Result<Update, ValidationError> {
        Update::development(bundle_url, &self.config)
    }

    /// Delete every stored update with `keep=false` that is not in `live`,
    /// together with assets no longer referenced by any update.
    pub fn collect_garbage(&self, live: &[Uuid]) -> Result<GcReport, StorageError> {
        let live: HashSet<Uuid> = live.iter().copied().collect();
        let mut report = GcReport::default();
        for record in self.database.list()? {
            if record.keep || live.contains(&record.id) {
                report.retained.push(record.id);
                continue;
            }
            // No stored update may outlive its assets.
            self.database.delete(record.id)?;
            report.removed_updates.push(record.id);
            let orphaned = self
                .database
                .mark_assets_unreferenced(record.id, &record.assets)?;
            for asset in orphaned {
                self.database.delete_asset(&asset)?;
                report.removed_assets.push(asset.key);
            }
        }
        if let Some(metrics) = &self.metrics {
            metrics.record_gc(report.removed_updates.len(), report.removed_assets.len());
        }
        info!(
            removed_updates = report.removed_updates.len(),
            removed_assets = report.removed_assets.len(),
            retained = report.retained.len(),
            "garbage collection complete"
        );
        Ok(report)
    }
}
