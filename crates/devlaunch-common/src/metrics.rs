//! ---
//! dl_section: "03-persistence-logging"
//! dl_subsection: "module"
//! dl_type: "source"
//! dl_scope: "code"
//! dl_description: "Shared Prometheus registry and text rendering."
//! dl_version: "v0.0.0-prealpha"
//! dl_owner: "tbd"
//! ---
use std::sync::Arc;

use prometheus::{Registry, TextEncoder};

/// Shared registry type used across crates.
pub type SharedRegistry = Arc<Registry>;

/// Produce a new shared registry.
pub fn new_registry() -> SharedRegistry {
    Arc::new(Registry::new())
}

/// Render the registry in the Prometheus text exposition format.
pub fn render(registry: &SharedRegistry) -> prometheus::Result<String> {
    let families = registry.gather();
    TextEncoder::new().encode_to_string(&families)
}
