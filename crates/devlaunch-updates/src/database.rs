//! ---
//! dl_section: "02-update-store"
//! dl_subsection: "module"
//! dl_type: "source"
//! dl_scope: "code"
//! dl_description: "Persistence collaborator trait and in-memory implementation."
//! dl_version: "v0.0.0-prealpha"
//! dl_owner: "tbd"
//! ---
use std::collections::BTreeSet;
use std::fmt;

use indexmap::IndexMap;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::asset::Asset;
use crate::update::UpdateRecord;
use crate::{Result, StorageError};

/// Persistence collaborator shared by every update created against it.
///
/// Implementations report failures as [`StorageError`]; callers never retry.
pub trait UpdateDatabase: Send + Sync + fmt::Debug {
    /// Load a single record.
    fn load(&self, id: Uuid) -> Result<Option<UpdateRecord>>;
    /// Enumerate every stored record.
    fn list(&self) -> Result<Vec<UpdateRecord>>;
    /// Insert or replace a record.
    fn save(&self, record: &UpdateRecord) -> Result<()>;
    /// Remove a record. Removing an unknown id is not an error.
    fn delete(&self, id: Uuid) -> Result<()>;
    /// Durably change the retention flag of a stored record.
    fn set_keep(&self, id: Uuid, keep: bool) -> Result<()>;
    /// Record that `id` references each of `assets`.
    fn mark_assets_referenced(&self, id: Uuid, assets: &[Asset]) -> Result<()>;
    /// Drop the references of `id` to `assets`, returning the assets that are
    /// no longer referenced by any update.
    fn mark_assets_unreferenced(&self, id: Uuid, assets: &[Asset]) -> Result<Vec<Asset>>;
    /// Remove an unreferenced asset.
    fn delete_asset(&self, asset: &Asset) -> Result<()>;
}

#[derive(Debug, Default)]
struct MemoryInner {
    updates: IndexMap<Uuid, UpdateRecord>,
    asset_refs: IndexMap<String, BTreeSet<Uuid>>,
}

/// In-process database used for transient sessions and tests.
#[derive(Debug, Default)]
pub struct MemoryDatabase {
    inner: Mutex<MemoryInner>,
}

impl MemoryDatabase {
    /// Create an empty database.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of updates referencing the asset `key`.
    pub fn asset_reference_count(&self, key: &str) -> usize {
        self.inner
            .lock()
            .asset_refs
            .get(key)
            .map_or(0, BTreeSet::len)
    }

    /// Whether the asset `key` is still tracked.
    pub fn contains_asset(&self, key: &str) -> bool {
        self.inner.lock().asset_refs.contains_key(key)
    }
}

impl UpdateDatabase for MemoryDatabase {
    fn load(&self, id: Uuid) -> Result<Option<UpdateRecord>> {
        Ok(self.inner.lock().updates.get(&id).cloned())
    }

    fn list(&self) -> Result<Vec<UpdateRecord>> {
        Ok(self.inner.lock().updates.values().cloned().collect())
    }

    fn save(&self, record: &UpdateRecord) -> Result<()> {
        self.inner.lock().updates.insert(record.id, record.clone());
        Ok(())
    }

    fn delete(&self, id: Uuid) -> Result<()> {
        self.inner.lock().updates.shift_remove(&id);
        Ok(())
    }

    fn set_keep(&self, id: Uuid, keep: bool) -> Result<()> {
        let mut inner = self.inner.lock();
        let record = inner
            .updates
            .get_mut(&id)
            .ok_or(StorageError::NotFound(id))?;
        record.keep = keep;
        Ok(())
    }

    fn mark_assets_referenced(&self, id: Uuid, assets: &[Asset]) -> Result<()> {
        let mut inner = self.inner.lock();
        for asset in assets {
            inner
                .asset_refs
                .entry(asset.key.clone())
                .or_default()
                .insert(id);
        }
        Ok(())
    }

    fn mark_assets_unreferenced(&self, id: Uuid, assets: &[Asset]) -> Result<Vec<Asset>> {
        let mut inner = self.inner.lock();
        let mut orphaned = Vec::new();
        for asset in assets {
            if let Some(refs) = inner.asset_refs.get_mut(&asset.key) {
                refs.remove(&id);
                if refs.is_empty() {
                    orphaned.push(asset.clone());
                }
            }
        }
        Ok(orphaned)
    }

    fn delete_asset(&self, asset: &Asset) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner
            .asset_refs
            .get(&asset.key)
            .is_some_and(|refs| refs.is_empty())
        {
            inner.asset_refs.shift_remove(&asset.key);
        }
        Ok(())
    }
}
