//! ---
//! dl_section: "02-update-store"
//! dl_subsection: "module"
//! dl_type: "source"
//! dl_scope: "code"
//! dl_description: "Prometheus counters for imports and garbage collection."
//! dl_version: "v0.0.0-prealpha"
//! dl_owner: "tbd"
//! ---
use devlaunch_common::metrics::SharedRegistry;
use prometheus::{IntCounterVec, Opts};

/// Metrics published by the update store.
#[derive(Clone)]
pub struct UpdateStoreMetrics {
    imports_total: IntCounterVec,
    gc_removed_total: IntCounterVec,
}

impl UpdateStoreMetrics {
    /// Register all update store metrics with the provided registry.
    pub fn new(registry: SharedRegistry) -> prometheus::Result<Self> {
        let imports_total = IntCounterVec::new(
            Opts::new(
                "devlaunch_update_imports_total",
                "Update manifests offered to the store, by outcome",
            ),
            &["outcome"],
        )?;
        registry.register(Box::new(imports_total.clone()))?;

        let gc_removed_total = IntCounterVec::new(
            Opts::new(
                "devlaunch_gc_removed_total",
                "Updates and assets removed by garbage collection",
            ),
            &["kind"],
        )?;
        registry.register(Box::new(gc_removed_total.clone()))?;

        Ok(Self {
            imports_total,
            gc_removed_total,
        })
    }

    /// Record the outcome of an import (`imported`, `invalid`, `duplicate`, `storage_error`).
    pub fn record_import(&self, outcome: &str) {
        self.imports_total.with_label_values(&[outcome]).inc();
    }

    /// Record a garbage collection pass.
    pub fn record_gc(&self, updates: usize, assets: usize) {
        self.gc_removed_total
            .with_label_values(&["update"])
            .inc_by(updates as u64);
        self.gc_removed_total
            .with_label_values(&["asset"])
            .inc_by(assets as u64);
    }
}

impl std::fmt::Debug for UpdateStoreMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpdateStoreMetrics").finish_non_exhaustive()
    }
}
