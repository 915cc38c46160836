//! ---
//! dl_section: "02-update-store"
//! dl_subsection: "module"
//! dl_type: "source"
//! dl_scope: "code"
//! dl_description: "Update model, manifest validation and launchable selection."
//! dl_version: "v0.0.0-prealpha"
//! dl_owner: "tbd"
//! ---
use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use devlaunch_common::config::UpdatesConfig;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;
use url::Url;
use uuid::Uuid;

use crate::asset::{sha256_hex, Asset};
use crate::database::UpdateDatabase;
use crate::{StorageError, ValidationError};

/// Persistable form of an update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateRecord {
    /// Unique identifier.
    pub id: Uuid,
    /// When the update was produced.
    pub commit_time: DateTime<Utc>,
    /// Compatibility tag matched against the host runtime.
    pub runtime_version: String,
    /// Raw manifest the update was built from.
    #[serde(default)]
    pub manifest: Option<Map<String, Value>>,
    /// Retention flag protecting the update from garbage collection.
    #[serde(default)]
    pub keep: bool,
    /// Location of the executable bundle.
    pub bundle_url: Url,
    /// Assets in manifest order.
    pub assets: Vec<Asset>,
    /// Whether integrity rules are relaxed for this update.
    #[serde(default)]
    pub is_development_mode: bool,
}

/// A downloaded (or synthetic) update eligible to be launched.
///
/// Identity and metadata are immutable; the only mutable state is `keep`,
/// changed through [`crate::UpdateStore::set_keep`] so that the in-memory
/// flag and the durable flag cannot diverge.
#[derive(Debug, Clone)]
pub struct Update {
    record: UpdateRecord,
    database: Option<Arc<dyn UpdateDatabase>>,
}

impl Update {
    /// Build an update from a raw manifest document.
    pub fn from_manifest(
        raw: &Value,
        config: &UpdatesConfig,
        database: Option<Arc<dyn UpdateDatabase>>,
    ) -> Result<Self, ValidationError> {
        let manifest = raw.as_object().ok_or(ValidationError::NotAnObject)?;

        let id = parse_id(manifest)?;
        let commit_time = parse_commit_time(manifest)?;
        let runtime_version = parse_runtime_version(manifest, config)?;

        let is_development_mode = manifest.contains_key("developer");
        if is_development_mode && !config.allow_development_mode {
            return Err(ValidationError::DevelopmentModeDisabled);
        }

        let mut assets = Vec::new();
        if let Some(descriptor) = manifest.get("launchAsset") {
            assets.push(Asset::from_descriptor(descriptor, "launchAsset", true)?);
        }
        match manifest.get("assets") {
            None | Some(Value::Null) => {}
            Some(Value::Array(descriptors)) => {
                for descriptor in descriptors {
                    assets.push(Asset::from_descriptor(descriptor, "assets", false)?);
                }
            }
            Some(_) => {
                return Err(ValidationError::Malformed {
                    field: "assets",
                    reason: "must be an array of asset descriptors".into(),
                })
            }
        }

        let mut seen = HashSet::new();
        for asset in &assets {
            if !seen.insert(asset.key.as_str()) {
                return Err(ValidationError::DuplicateAssetKey(asset.key.clone()));
            }
        }

        let bundle_url = resolve_bundle(manifest, &mut assets)?;

        if config.require_asset_hashes && !is_development_mode {
            if let Some(asset) = assets.iter().find(|asset| asset.hash.is_none()) {
                return Err(ValidationError::MissingAssetHash(asset.key.clone()));
            }
        }

        debug!(
            update_id = %id,
            runtime_version = %runtime_version,
            assets = assets.len(),
            development = is_development_mode,
            "update manifest validated"
        );

        Ok(Self {
            record: UpdateRecord {
                id,
                commit_time,
                runtime_version,
                manifest: Some(manifest.clone()),
                keep: false,
                bundle_url,
                assets,
                is_development_mode,
            },
            database,
        })
    }

    /// Synthesize a transient development-mode update that serves `bundle_url` live.
    pub fn development(bundle_url: Url, config: &UpdatesConfig) -> Result<Self, ValidationError> {
        if !config.allow_development_mode {
            return Err(ValidationError::DevelopmentModeDisabled);
        }
        let key = format!("dev-{}", &sha256_hex(bundle_url.as_str().as_bytes())[..16]);
        let asset = Asset {
            relative_path: format!("{key}.bundle"),
            key,
            url: bundle_url.clone(),
            hash: None,
            content_type: Some("application/javascript".to_owned()),
            is_launch_asset: true,
        };
        Ok(Self {
            record: UpdateRecord {
                id: Uuid::new_v4(),
                commit_time: Utc::now(),
                runtime_version: config.expected_runtime_version.clone(),
                manifest: None,
                keep: false,
                bundle_url,
                assets: vec![asset],
                is_development_mode: true,
            },
            database: None,
        })
    }

    /// Rehydrate an update from its persisted record.
    pub fn from_record(record: UpdateRecord, database: Option<Arc<dyn UpdateDatabase>>) -> Self {
        Self { record, database }
    }

    /// Unique identifier.
    pub fn id(&self) -> Uuid {
        self.record.id
    }

    /// Commit timestamp used for recency ordering.
    pub fn commit_time(&self) -> DateTime<Utc> {
        self.record.commit_time
    }

    /// Runtime version tag.
    pub fn runtime_version(&self) -> &str {
        &self.record.runtime_version
    }

    /// Raw manifest, absent for synthetic updates.
    pub fn manifest(&self) -> Option<&Map<String, Value>> {
        self.record.manifest.as_ref()
    }

    /// Retention flag.
    pub fn keep(&self) -> bool {
        self.record.keep
    }

    /// Location of the executable bundle.
    pub fn bundle_url(&self) -> &Url {
        &self.record.bundle_url
    }

    /// Assets in manifest order.
    pub fn assets(&self) -> &[Asset] {
        &self.record.assets
    }

    /// Whether integrity rules are relaxed.
    pub fn is_development_mode(&self) -> bool {
        self.record.is_development_mode
    }

    /// Whether the update has a persistence handle.
    pub fn is_persisted(&self) -> bool {
        self.database.is_some()
    }

    /// The asset serving `bundle_url`, if present.
    pub fn launch_asset(&self) -> Option<&Asset> {
        self.record
            .assets
            .iter()
            .find(|asset| asset.url == self.record.bundle_url)
    }

    /// Persistable form of this update.
    pub fn record(&self) -> &UpdateRecord {
        &self.record
    }

    /// Write-through retention change: the durable flag is written first and
    /// the in-memory flag only follows on success. Without a persistence
    /// handle the change is memory-only.
    pub(crate) fn set_keep(&mut self, keep: bool) -> Result<(), StorageError> {
        match &self.database {
            Some(database) => database.set_keep(self.record.id, keep)?,
            None => debug!(
                update_id = %self.record.id,
                keep,
                "update has no persistence handle; keep flag is memory-only"
            ),
        }
        self.record.keep = keep;
        Ok(())
    }
}

/// Pick the most recent launchable update.
///
/// Candidates must match `host_runtime_version` and resolve their bundle
/// asset. The greatest `commit_time` wins; among equal commit times the
/// candidate appearing last wins.
pub fn select_launchable<'a>(
    candidates: &'a [Update],
    host_runtime_version: &str,
) -> Option<&'a Update> {
    candidates
        .iter()
        .filter(|update| update.runtime_version() == host_runtime_version)
        .filter(|update| update.launch_asset().is_some())
        .max_by_key(|update| update.commit_time())
}

fn parse_id(manifest: &Map<String, Value>) -> Result<Uuid, ValidationError> {
    let raw = manifest
        .get("id")
        .ok_or(ValidationError::MissingField("id"))?
        .as_str()
        .ok_or_else(|| ValidationError::Malformed {
            field: "id",
            reason: "must be a string".into(),
        })?;
    Uuid::parse_str(raw).map_err(|err| ValidationError::Malformed {
        field: "id",
        reason: format!("'{raw}' is not a uuid: {err}"),
    })
}

fn parse_commit_time(manifest: &Map<String, Value>) -> Result<DateTime<Utc>, ValidationError> {
    let malformed = |reason: String| ValidationError::Malformed {
        field: "commitTime",
        reason,
    };
    match manifest
        .get("commitTime")
        .ok_or(ValidationError::MissingField("commitTime"))?
    {
        Value::String(raw) => DateTime::parse_from_rfc3339(raw)
            .map(|time| time.with_timezone(&Utc))
            .map_err(|err| malformed(format!("'{raw}' is not an RFC 3339 timestamp: {err}"))),
        Value::Number(number) => number
            .as_i64()
            .and_then(|millis| Utc.timestamp_millis_opt(millis).single())
            .ok_or_else(|| malformed(format!("{number} is not a millisecond timestamp"))),
        _ => Err(malformed("must be a string or an integer".into())),
    }
}

fn parse_runtime_version(
    manifest: &Map<String, Value>,
    config: &UpdatesConfig,
) -> Result<String, ValidationError> {
    let raw = manifest
        .get("runtimeVersion")
        .ok_or(ValidationError::MissingField("runtimeVersion"))?
        .as_str()
        .ok_or_else(|| ValidationError::Malformed {
            field: "runtimeVersion",
            reason: "must be a string".into(),
        })?;
    if raw.trim().is_empty() {
        return Err(ValidationError::Malformed {
            field: "runtimeVersion",
            reason: "must not be empty".into(),
        });
    }
    if !config.runtime_version_format.accepts(raw) {
        return Err(ValidationError::RuntimeVersionFormat(raw.to_owned()));
    }
    Ok(raw.to_owned())
}

fn resolve_bundle(
    manifest: &Map<String, Value>,
    assets: &mut [Asset],
) -> Result<Url, ValidationError> {
    if let Some(launch) = assets.iter().find(|asset| asset.is_launch_asset) {
        return Ok(launch.url.clone());
    }
    let raw = match manifest.get("bundleUrl") {
        Some(Value::String(raw)) => raw,
        Some(_) => {
            return Err(ValidationError::Malformed {
                field: "bundleUrl",
                reason: "must be a string".into(),
            })
        }
        None => return Err(ValidationError::MissingBundleAsset("(unspecified)".into())),
    };
    let bundle_url = Url::parse(raw).map_err(|err| ValidationError::Malformed {
        field: "bundleUrl",
        reason: format!("'{raw}' is not a url: {err}"),
    })?;
    let bundle = assets
        .iter_mut()
        .find(|asset| asset.url == bundle_url)
        .ok_or_else(|| ValidationError::MissingBundleAsset(bundle_url.to_string()))?;
    bundle.is_launch_asset = true;
    Ok(bundle_url)
}
