//! ---
//! dl_section: "03-persistence-logging"
//! dl_subsection: "module"
//! dl_type: "source"
//! dl_scope: "code"
//! dl_description: "Prometheus metrics for runtime switches and deep links."
//! dl_version: "v0.0.0-prealpha"
//! dl_owner: "tbd"
//! ---
use devlaunch_common::metrics::SharedRegistry;
use prometheus::{IntCounterVec, IntGauge, Opts};

/// Metrics published by the launcher controller.
#[derive(Clone)]
pub struct LauncherMetrics {
    switches_total: IntCounterVec,
    deep_links_total: IntCounterVec,
    pending_deep_links: IntGauge,
}

impl LauncherMetrics {
    pub fn new(registry: SharedRegistry) -> prometheus::Result<Self> {
        let switches_total = IntCounterVec::new(
            Opts::new(
                "devlaunch_runtime_switches_total",
                "Runtime switches by outcome",
            ),
            &["outcome"],
        )?;
        registry.register(Box::new(switches_total.clone()))?;

        let deep_links_total = IntCounterVec::new(
            Opts::new(
                "devlaunch_deep_links_total",
                "Deep links received, by disposition",
            ),
            &["disposition"],
        )?;
        registry.register(Box::new(deep_links_total.clone()))?;

        let pending_deep_links = IntGauge::with_opts(Opts::new(
            "devlaunch_pending_deep_links",
            "Deep links waiting for an app runtime",
        ))?;
        registry.register(Box::new(pending_deep_links.clone()))?;

        Ok(Self {
            switches_total,
            deep_links_total,
            pending_deep_links,
        })
    }

    /// `started`, `succeeded`, `failed`, `rejected` or `superseded`.
    pub fn record_switch(&self, outcome: &str) {
        self.switches_total.with_label_values(&[outcome]).inc();
    }

    /// `dispatched`, `queued`, `flushed` or `rejected`.
    pub fn record_deep_link(&self, disposition: &str) {
        self.deep_links_total.with_label_values(&[disposition]).inc();
    }

    pub fn set_pending(&self, pending: usize) {
        self.pending_deep_links.set(pending as i64);
    }
}

impl std::fmt::Debug for LauncherMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LauncherMetrics").finish_non_exhaustive()
    }
}
