//! ---
//! dl_section: "02-update-store"
//! dl_subsection: "integration-tests"
//! dl_type: "source"
//! dl_scope: "code"
//! dl_description: "Integration tests for the update store."
//! dl_version: "v0.0.0-prealpha"
//! dl_owner: "tbd"
//! ---
use std::sync::Arc;

use devlaunch_common::config::UpdatesConfig;
use devlaunch_common::metrics::new_registry;
use devlaunch_updates::{
    select_launchable, Asset, FileDatabase, MemoryDatabase, StorageError, UpdateDatabase,
    UpdateRecord, UpdateStore, UpdateStoreError, UpdateStoreMetrics, ValidationError,
};
use serde_json::{json, Value};
use tempfile::tempdir;
use uuid::Uuid;

fn config() -> UpdatesConfig {
    UpdatesConfig {
        expected_runtime_version: "40.0.0".into(),
        ..UpdatesConfig::default()
    }
}

fn manifest(id: &str, commit_millis: i64, runtime: &str, shared_asset: &str) -> Value {
    json!({
        "id": id,
        "commitTime": commit_millis,
        "runtimeVersion": runtime,
        "launchAsset": {
            "key": format!("bundle-{id}"),
            "url": format!("https://u.example.com/{id}/index.bundle"),
        },
        "assets": [
            {"key": shared_asset, "url": format!("https://u.example.com/assets/{shared_asset}.png")}
        ]
    })
}

const A: &str = "00000000-0000-4000-8000-00000000000a";
const B: &str = "00000000-0000-4000-8000-00000000000b";

#[test]
fn most_recent_compatible_update_is_selected() {
    let store = UpdateStore::new(Arc::new(MemoryDatabase::new()), config());
    let a = store.import(&manifest(A, 100, "40.0.0", "logo")).unwrap();
    let b = store.import(&manifest(B, 200, "40.0.0", "logo")).unwrap();

    let candidates = vec![a, b.clone()];
    assert_eq!(
        select_launchable(&candidates, "40.0.0").map(|u| u.id()),
        Some(b.id())
    );
    assert_eq!(store.launchable().unwrap().map(|u| u.id()), Some(b.id()));
}

#[test]
fn invalid_manifests_persist_nothing() {
    let db = Arc::new(MemoryDatabase::new());
    let registry = new_registry();
    let store = UpdateStore::new(db.clone(), config())
        .with_metrics(UpdateStoreMetrics::new(registry.clone()).unwrap());

    for field in ["id", "commitTime", "runtimeVersion"] {
        let mut raw = manifest(A, 100, "40.0.0", "logo");
        raw.as_object_mut().unwrap().remove(field);
        let err = store.import(&raw).unwrap_err();
        assert!(matches!(
            err,
            UpdateStoreError::Validation(ValidationError::MissingField(f)) if f == field
        ));
    }
    assert!(db.list().unwrap().is_empty());
    assert!(!db.contains_asset("logo"));

    let families = registry.gather();
    let imports = families
        .iter()
        .find(|family| family.get_name() == "devlaunch_update_imports_total")
        .expect("import counter registered");
    let invalid: f64 = imports
        .get_metric()
        .iter()
        .filter(|metric| metric.get_label().iter().any(|l| l.get_value() == "invalid"))
        .map(|metric| metric.get_counter().get_value())
        .sum();
    assert_eq!(invalid, 3.0);
}

#[test]
fn duplicate_imports_are_rejected() {
    let store = UpdateStore::new(Arc::new(MemoryDatabase::new()), config());
    store.import(&manifest(A, 100, "40.0.0", "logo")).unwrap();
    let err = store
        .import(&manifest(A, 100, "40.0.0", "logo"))
        .unwrap_err();
    assert!(matches!(err, UpdateStoreError::Duplicate(id) if id.to_string() == A));
}

#[test]
fn garbage_collection_honours_keep_and_live_references() {
    let db = Arc::new(MemoryDatabase::new());
    let store = UpdateStore::new(db.clone(), config());
    let mut a = store.import(&manifest(A, 100, "40.0.0", "logo")).unwrap();
    let b = store.import(&manifest(B, 200, "40.0.0", "logo")).unwrap();
    assert_eq!(db.asset_reference_count("logo"), 2);

    store.set_keep(&mut a, true).unwrap();
    let report = store.collect_garbage(&[b.id()]).unwrap();
    assert!(report.removed_updates.is_empty());
    assert_eq!(report.retained.len(), 2);

    store.set_keep(&mut a, false).unwrap();
    assert!(!a.keep());
    let report = store.collect_garbage(&[b.id()]).unwrap();
    assert_eq!(report.removed_updates, vec![a.id()]);
    assert_eq!(report.removed_assets, vec![format!("bundle-{A}")]);
    assert!(store.load(a.id()).unwrap().is_none());
    assert_eq!(db.asset_reference_count("logo"), 1);

    let report = store.collect_garbage(&[]).unwrap();
    assert_eq!(report.removed_updates, vec![b.id()]);
    assert!(report.removed_assets.contains(&"logo".to_owned()));
    assert!(!db.contains_asset("logo"));
}

#[test]
fn keep_flag_survives_reopening_the_file_store() {
    let dir = tempdir().unwrap();
    let id = {
        let store = UpdateStore::new(Arc::new(FileDatabase::open(dir.path()).unwrap()), config());
        let mut update = store.import(&manifest(A, 100, "40.0.0", "logo")).unwrap();
        store.set_keep(&mut update, true).unwrap();
        update.id()
    };

    let store = UpdateStore::new(Arc::new(FileDatabase::open(dir.path()).unwrap()), config());
    let reloaded = store.load(id).unwrap().expect("update persisted");
    assert!(reloaded.keep());
    assert!(reloaded.is_persisted());
    assert_eq!(reloaded.assets().len(), 2);

    let report = store.collect_garbage(&[]).unwrap();
    assert_eq!(report.retained, vec![id]);
}

#[test]
fn transient_updates_change_keep_in_memory_only() {
    let store = UpdateStore::new(Arc::new(MemoryDatabase::new()), config());
    let url = url::Url::parse("http://localhost:8081/index.bundle").unwrap();
    let mut dev = store.development_update(url).unwrap();
    store.set_keep(&mut dev, true).unwrap();
    assert!(dev.keep());
    assert!(store.load(dev.id()).unwrap().is_none());
}

/// Memory database whose writes can be made to fail one kind at a time.
#[derive(Debug, Default)]
struct FaultyDatabase {
    inner: MemoryDatabase,
    fail_keep: bool,
    fail_delete: bool,
}

impl UpdateDatabase for FaultyDatabase {
    fn load(&self, id: Uuid) -> devlaunch_updates::Result<Option<UpdateRecord>> {
        self.inner.load(id)
    }
    fn list(&self) -> devlaunch_updates::Result<Vec<UpdateRecord>> {
        self.inner.list()
    }
    fn save(&self, record: &UpdateRecord) -> devlaunch_updates::Result<()> {
        self.inner.save(record)
    }
    fn delete(&self, id: Uuid) -> devlaunch_updates::Result<()> {
        if self.fail_delete {
            return Err(StorageError::Unavailable("record is locked".into()));
        }
        self.inner.delete(id)
    }
    fn set_keep(&self, id: Uuid, keep: bool) -> devlaunch_updates::Result<()> {
        if self.fail_keep {
            return Err(StorageError::Unavailable("read-only volume".into()));
        }
        self.inner.set_keep(id, keep)
    }
    fn mark_assets_referenced(&self, id: Uuid, assets: &[Asset]) -> devlaunch_updates::Result<()> {
        self.inner.mark_assets_referenced(id, assets)
    }
    fn mark_assets_unreferenced(
        &self,
        id: Uuid,
        assets: &[Asset],
    ) -> devlaunch_updates::Result<Vec<Asset>> {
        self.inner.mark_assets_unreferenced(id, assets)
    }
    fn delete_asset(&self, asset: &Asset) -> devlaunch_updates::Result<()> {
        self.inner.delete_asset(asset)
    }
}

#[test]
fn failed_keep_write_leaves_memory_untouched() {
    let db = FaultyDatabase {
        fail_keep: true,
        ..FaultyDatabase::default()
    };
    let store = UpdateStore::new(Arc::new(db), config());
    let mut update = store.import(&manifest(A, 100, "40.0.0", "logo")).unwrap();
    let err = store.set_keep(&mut update, true).unwrap_err();
    assert!(matches!(err, StorageError::Unavailable(_)));
    assert!(!update.keep());
}

#[test]
fn failed_record_delete_keeps_its_assets() {
    let db = Arc::new(FaultyDatabase {
        fail_delete: true,
        ..FaultyDatabase::default()
    });
    let store = UpdateStore::new(db.clone(), config());
    let update = store.import(&manifest(A, 100, "40.0.0", "logo")).unwrap();

    let err = store.collect_garbage(&[]).unwrap_err();
    assert!(matches!(err, StorageError::Unavailable(_)));

    let survivor = store.launchable().unwrap().expect("record still stored");
    assert_eq!(survivor.id(), update.id());
    assert_eq!(db.inner.asset_reference_count(&format!("bundle-{A}")), 1);
    assert_eq!(db.inner.asset_reference_count("logo"), 1);
    assert!(db.inner.contains_asset("logo"));
}
