//! ---
//! dl_section: "02-update-store"
//! dl_subsection: "module"
//! dl_type: "source"
//! dl_scope: "code"
//! dl_description: "Directory-backed update database with hashed record envelopes."
//! dl_version: "v0.0.0-prealpha"
//! dl_owner: "tbd"
//! ---
use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};
use uuid::Uuid;
use walkdir::WalkDir;

use crate::asset::Asset;
use crate::database::UpdateDatabase;
use crate::update::UpdateRecord;
use crate::{Result, StorageError};

/// Current record envelope version.
pub const RECORD_VERSION: u16 = 1;

const UPDATES_DIR: &str = "updates";
const ASSETS_DIR: &str = "assets";
const ASSET_INDEX: &str = "assets.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RecordEnvelope {
    version: u16,
    saved_at: DateTime<Utc>,
    hash: String,
    record: UpdateRecord,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct AssetIndexEntry {
    relative_path: String,
    updates: BTreeSet<Uuid>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct AssetIndex {
    #[serde(default)]
    assets: BTreeMap<String, AssetIndexEntry>,
}

/// Directory-backed database.
///
/// Layout: `updates/<id>.json` holds one hashed record envelope per update,
/// `assets.json` maps asset keys to the updates referencing them and
/// `assets/` holds downloaded asset files.
#[derive(Debug)]
pub struct FileDatabase {
    root: PathBuf,
    // Serializes read-modify-write cycles on record files and the asset index.
    write_lock: Mutex<()>,
}

impl FileDatabase {
    /// Open (and create if needed) a database rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(root.join(UPDATES_DIR))?;
        fs::create_dir_all(root.join(ASSETS_DIR))?;
        debug!(root = %root.display(), "file database opened");
        Ok(Self {
            root,
            write_lock: Mutex::new(()),
        })
    }

    /// Root directory of the database.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding downloaded asset files.
    pub fn assets_dir(&self) -> PathBuf {
        self.root.join(ASSETS_DIR)
    }

    /// Verify `content` against `asset` and write it into the asset directory.
    ///
    /// `relaxed` accepts assets that carry no expected hash, as development
    /// updates do.
    pub fn write_asset(&self, asset: &Asset, content: &[u8], relaxed: bool) -> Result<PathBuf> {
        if !asset.verify(content, relaxed) {
            warn!(asset = %asset.key, "asset content rejected");
            return Err(StorageError::AssetIntegrity(asset.key.clone()));
        }
        let path = self.assets_dir().join(&asset.relative_path);
        let tmp = path.with_extension("part");
        fs::write(&tmp, content)?;
        fs::rename(&tmp, &path)?;
        debug!(asset = %asset.key, bytes = content.len(), "asset written");
        Ok(path)
    }

    fn record_path(&self, id: Uuid) -> PathBuf {
        self.root.join(UPDATES_DIR).join(format!("{id}.json"))
    }

    fn index_path(&self) -> PathBuf {
        self.root.join(ASSET_INDEX)
    }

    fn read_record(&self, path: &Path) -> Result<UpdateRecord> {
        let bytes = fs::read(path)?;
        let envelope: RecordEnvelope = serde_json::from_slice(&bytes)?;
        if envelope.hash != compute_hash(&envelope.record)? {
            return Err(StorageError::HashMismatch(envelope.record.id));
        }
        Ok(envelope.record)
    }

    fn write_record(&self, record: &UpdateRecord) -> Result<()> {
        let envelope = RecordEnvelope {
            version: RECORD_VERSION,
            saved_at: Utc::now(),
            hash: compute_hash(record)?,
            record: record.clone(),
        };
        write_atomically(&self.record_path(record.id), &envelope)
    }

    fn read_index(&self) -> Result<AssetIndex> {
        let path = self.index_path();
        if !path.exists() {
            return Ok(AssetIndex::default());
        }
        Ok(serde_json::from_slice(&fs::read(path)?)?)
    }
}

impl UpdateDatabase for FileDatabase {
    fn load(&self, id: Uuid) -> Result<Option<UpdateRecord>> {
        let path = self.record_path(id);
        if !path.exists() {
            return Ok(None);
        }
        self.read_record(&path).map(Some)
    }

    fn list(&self) -> Result<Vec<UpdateRecord>> {
        let mut paths: Vec<PathBuf> = WalkDir::new(self.root.join(UPDATES_DIR))
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.into_path())
            .filter(|path| path.extension().and_then(|ext| ext.to_str()) == Some("json"))
            .collect();
        paths.sort();
        paths.iter().map(|path| self.read_record(path)).collect()
    }

    fn save(&self, record: &UpdateRecord) -> Result<()> {
        let _guard = self.write_lock.lock();
        self.write_record(record)?;
        debug!(update_id = %record.id, "update record saved");
        Ok(())
    }

    fn delete(&self, id: Uuid) -> Result<()> {
        let _guard = self.write_lock.lock();
        let path = self.record_path(id);
        if path.exists() {
            fs::remove_file(&path)?;
            debug!(update_id = %id, "update record deleted");
        }
        Ok(())
    }

    fn set_keep(&self, id: Uuid, keep: bool) -> Result<()> {
        let _guard = self.write_lock.lock();
        let path = self.record_path(id);
        if !path.exists() {
            return Err(StorageError::NotFound(id));
        }
        let mut record = self.read_record(&path)?;
        record.keep = keep;
        self.write_record(&record)
    }

    fn mark_assets_referenced(&self, id: Uuid, assets: &[Asset]) -> Result<()> {
        let _guard = self.write_lock.lock();
        let mut index = self.read_index()?;
        for asset in assets {
            let entry = index.assets.entry(asset.key.clone()).or_default();
            entry.relative_path = asset.relative_path.clone();
            entry.updates.insert(id);
        }
        write_atomically(&self.index_path(), &index)
    }

    fn mark_assets_unreferenced(&self, id: Uuid, assets: &[Asset]) -> Result<Vec<Asset>> {
        let _guard = self.write_lock.lock();
        let mut index = self.read_index()?;
        let mut orphaned = Vec::new();
        for asset in assets {
            if let Some(entry) = index.assets.get_mut(&asset.key) {
                entry.updates.remove(&id);
                if entry.updates.is_empty() {
                    orphaned.push(asset.clone());
                }
            }
        }
        write_atomically(&self.index_path(), &index)?;
        Ok(orphaned)
    }

    fn delete_asset(&self, asset: &Asset) -> Result<()> {
        let _guard = self.write_lock.lock();
        let mut index = self.read_index()?;
        if index
            .assets
            .get(&asset.key)
            .is_some_and(|entry| !entry.updates.is_empty())
        {
            warn!(asset = %asset.key, "refusing to delete an asset that is still referenced");
            return Ok(());
        }
        index.assets.remove(&asset.key);
        let file = self.assets_dir().join(&asset.relative_path);
        if file.exists() {
            fs::remove_file(&file)?;
        }
        write_atomically(&self.index_path(), &index)?;
        debug!(asset = %asset.key, "asset deleted");
        Ok(())
    }
}

fn compute_hash(record: &UpdateRecord) -> Result<String> {
    let serialized = serde_json::to_vec(record)?;
    Ok(hex::encode(Sha256::digest(serialized)))
}

fn write_atomically<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let tmp = path.with_extension("json.tmp");
    {
        let mut writer = BufWriter::new(File::create(&tmp)?);
        serde_json::to_writer_pretty(&mut writer, value)?;
        writer.flush()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;
    use url::Url;

    fn record(id: Uuid) -> UpdateRecord {
        let url = Url::parse("https://u.example.com/bundle.js").unwrap();
        UpdateRecord {
            id,
            commit_time: Utc::now(),
            runtime_version: "40.0.0".into(),
            manifest: json!({"id": id.to_string()}).as_object().cloned(),
            keep: false,
            bundle_url: url.clone(),
            assets: vec![Asset {
                key: "bundle".into(),
                url,
                relative_path: "bundle.js".into(),
                hash: None,
                content_type: None,
                is_launch_asset: true,
            }],
            is_development_mode: false,
        }
    }

    #[test]
    fn save_load_and_list_records() {
        let dir = tempdir().unwrap();
        let db = FileDatabase::open(dir.path()).unwrap();
        let a = record(Uuid::new_v4());
        let b = record(Uuid::new_v4());
        db.save(&a).unwrap();
        db.save(&b).unwrap();

        assert_eq!(db.load(a.id).unwrap(), Some(a.clone()));
        assert_eq!(db.list().unwrap().len(), 2);

        db.delete(a.id).unwrap();
        assert_eq!(db.load(a.id).unwrap(), None);
        assert_eq!(db.list().unwrap().len(), 1);
    }

    #[test]
    fn set_keep_is_durable() {
        let dir = tempdir().unwrap();
        let id = Uuid::new_v4();
        {
            let db = FileDatabase::open(dir.path()).unwrap();
            db.save(&record(id)).unwrap();
            db.set_keep(id, true).unwrap();
        }
        let reopened = FileDatabase::open(dir.path()).unwrap();
        assert!(reopened.load(id).unwrap().unwrap().keep);
        assert!(matches!(
            reopened.set_keep(Uuid::new_v4(), true),
            Err(StorageError::NotFound(_))
        ));
    }

    #[test]
    fn tampered_record_is_rejected() {
        let dir = tempdir().unwrap();
        let db = FileDatabase::open(dir.path()).unwrap();
        let rec = record(Uuid::new_v4());
        db.save(&rec).unwrap();

        let path = db.record_path(rec.id);
        let mut envelope: serde_json::Value =
            serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        envelope["record"]["runtime_version"] = json!("99.0.0");
        fs::write(&path, serde_json::to_vec_pretty(&envelope).unwrap()).unwrap();

        assert!(matches!(db.load(rec.id), Err(StorageError::HashMismatch(id)) if id == rec.id));
    }

    #[test]
    fn asset_content_is_verified_before_write() {
        let dir = tempdir().unwrap();
        let db = FileDatabase::open(dir.path()).unwrap();
        let mut asset = record(Uuid::new_v4()).assets[0].clone();
        assert!(matches!(
            db.write_asset(&asset, b"bundle", false),
            Err(StorageError::AssetIntegrity(_))
        ));

        asset.hash = Some(crate::asset::sha256_hex(b"bundle"));
        assert!(db.write_asset(&asset, b"tampered", false).is_err());
        let path = db.write_asset(&asset, b"bundle", false).unwrap();
        assert_eq!(fs::read(path).unwrap(), b"bundle");
    }

    #[test]
    fn shared_assets_are_removed_with_last_reference() {
        let dir = tempdir().unwrap();
        let db = FileDatabase::open(dir.path()).unwrap();
        let first = record(Uuid::new_v4());
        let second = record(Uuid::new_v4());
        let asset = first.assets[0].clone();
        db.write_asset(&asset, b"bundle", true).unwrap();

        db.mark_assets_referenced(first.id, &first.assets).unwrap();
        db.mark_assets_referenced(second.id, &second.assets).unwrap();

        assert!(db
            .mark_assets_unreferenced(first.id, &first.assets)
            .unwrap()
            .is_empty());
        let orphaned = db
            .mark_assets_unreferenced(second.id, &second.assets)
            .unwrap();
        assert_eq!(orphaned, vec![asset.clone()]);

        db.delete_asset(&asset).unwrap();
        assert!(!db.assets_dir().join(&asset.relative_path).exists());
    }
}
