//! ---
//! dl_section: "04-launcher"
//! dl_subsection: "module"
//! dl_type: "source"
//! dl_scope: "code"
//! dl_description: "FIFO buffer of deep links awaiting an app runtime."
//! dl_version: "v0.0.0-prealpha"
//! dl_owner: "tbd"
//! ---
use std::collections::VecDeque;

use crate::deep_link::DeepLink;

/// Insertion-ordered queue of deep links received before an app runtime
/// could take them.
///
/// Every entry leaves the queue exactly once: through [`drain`](Self::drain)
/// when the controller flushes it, [`consume`](Self::consume) or
/// [`clear`](Self::clear). Duplicates are kept.
#[derive(Debug, Default, Clone)]
pub struct PendingDeepLinkRegistry {
    links: VecDeque<DeepLink>,
}

impl PendingDeepLinkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, link: DeepLink) {
        self.links.push_back(link);
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    /// Remove and return the oldest link.
    pub fn consume(&mut self) -> Option<DeepLink> {
        self.links.pop_front()
    }

    /// Remove every link, oldest first.
    pub fn drain(&mut self) -> impl Iterator<Item = DeepLink> + '_ {
        self.links.drain(..)
    }

    pub fn clear(&mut self) {
        self.links.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &DeepLink> {
        self.links.iter()
    }
}
