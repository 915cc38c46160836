//! ---
//! dl_section: "02-update-store"
//! dl_subsection: "module"
//! dl_type: "source"
//! dl_scope: "code"
//! dl_description: "Asset descriptors and content hashing."
//! dl_version: "v0.0.0-prealpha"
//! dl_owner: "tbd"
//! ---
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use url::Url;

use crate::ValidationError;

/// Content-addressable file referenced by one or more updates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asset {
    /// Content hash or logical name; unique within an update.
    pub key: String,
    /// Remote location the asset was (or will be) fetched from.
    pub url: Url,
    /// Path of the asset relative to the store's asset directory.
    pub relative_path: String,
    /// Expected lowercase hex SHA-256 of the asset content.
    #[serde(default)]
    pub hash: Option<String>,
    /// Declared MIME type.
    #[serde(default)]
    pub content_type: Option<String>,
    /// Whether this asset is the executable bundle of its update.
    #[serde(default)]
    pub is_launch_asset: bool,
}

impl Asset {
    /// Parse an asset descriptor from a manifest.
    ///
    /// `field` names the manifest field the descriptor came from and is used
    /// in validation errors.
    pub fn from_descriptor(
        descriptor: &Value,
        field: &'static str,
        is_launch_asset: bool,
    ) -> Result<Self, ValidationError> {
        let object = descriptor
            .as_object()
            .ok_or_else(|| malformed(field, "asset descriptor must be an object"))?;

        let raw_url = object
            .get("url")
            .and_then(Value::as_str)
            .ok_or_else(|| malformed(field, "asset descriptor requires a `url` string"))?;
        let url = Url::parse(raw_url)
            .map_err(|err| malformed(field, format!("invalid asset url '{raw_url}': {err}")))?;

        let hash = match object.get("hash") {
            None | Some(Value::Null) => None,
            Some(Value::String(hash)) => Some(normalize_hash(hash).ok_or_else(|| {
                malformed(field, format!("asset hash '{hash}' is not a hex sha-256"))
            })?),
            Some(_) => return Err(malformed(field, "asset `hash` must be a string")),
        };

        let key = match object.get("key").and_then(Value::as_str) {
            Some(key) if !key.trim().is_empty() => key.to_owned(),
            _ => hash
                .clone()
                .ok_or_else(|| malformed(field, "asset descriptor requires a `key` or `hash`"))?,
        };
        if key.contains('/') || key.contains('\\') || key.contains("..") {
            return Err(malformed(
                field,
                format!("asset key '{key}' must not contain path separators"),
            ));
        }

        let extension = object
            .get("fileExtension")
            .and_then(Value::as_str)
            .map(str::to_owned)
            .or_else(|| extension_from_url(&url))
            .map(|ext| {
                if ext.is_empty() || ext.starts_with('.') {
                    ext
                } else {
                    format!(".{ext}")
                }
            })
            .unwrap_or_default();

        let content_type = object
            .get("contentType")
            .and_then(Value::as_str)
            .map(str::to_owned);

        Ok(Self {
            relative_path: format!("{key}{extension}"),
            key,
            url,
            hash,
            content_type,
            is_launch_asset,
        })
    }

    /// Check `content` against the expected hash.
    ///
    /// Assets without an expected hash only verify when `relaxed` is set,
    /// which is the case for development-mode updates.
    pub fn verify(&self, content: &[u8], relaxed: bool) -> bool {
        match &self.hash {
            Some(expected) => sha256_hex(content) == *expected,
            None => relaxed,
        }
    }
}

/// Lowercase hex SHA-256 of `content`.
pub fn sha256_hex(content: &[u8]) -> String {
    hex::encode(Sha256::digest(content))
}

fn normalize_hash(raw: &str) -> Option<String> {
    let bytes = hex::decode(raw.trim()).ok()?;
    (bytes.len() == 32).then(|| hex::encode(bytes))
}

fn extension_from_url(url: &Url) -> Option<String> {
    let last = url.path_segments()?.next_back()?;
    let (_, ext) = last.rsplit_once('.')?;
    (!ext.is_empty()).then(|| ext.to_owned())
}

fn malformed(field: &'static str, reason: impl Into<String>) -> ValidationError {
    ValidationError::Malformed {
        field,
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn key_defaults_to_hash_and_extension_to_url() {
        let hash = sha256_hex(b"console.log(1)");
        let asset = Asset::from_descriptor(
            &json!({"url": "https://cdn.example.com/app/index.bundle", "hash": hash.to_uppercase()}),
            "assets",
            false,
        )
        .unwrap();
        assert_eq!(asset.key, hash);
        assert_eq!(asset.hash.as_deref(), Some(hash.as_str()));
        assert_eq!(asset.relative_path, format!("{hash}.bundle"));
    }

    #[test]
    fn explicit_file_extension_wins() {
        let asset = Asset::from_descriptor(
            &json!({"key": "logo", "url": "https://cdn.example.com/a?id=1", "fileExtension": "png"}),
            "assets",
            false,
        )
        .unwrap();
        assert_eq!(asset.relative_path, "logo.png");
    }

    #[test]
    fn rejects_descriptor_without_key_or_hash() {
        let err = Asset::from_descriptor(
            &json!({"url": "https://cdn.example.com/x.png"}),
            "assets",
            false,
        )
        .unwrap_err();
        assert!(matches!(err, ValidationError::Malformed { field: "assets", .. }));
    }

    #[test]
    fn rejects_short_hash() {
        let err = Asset::from_descriptor(
            &json!({"key": "a", "url": "https://cdn.example.com/x.png", "hash": "abcd"}),
            "assets",
            false,
        )
        .unwrap_err();
        assert!(err.to_string().contains("not a hex sha-256"));
    }

    #[test]
    fn rejects_path_like_keys() {
        let err = Asset::from_descriptor(
            &json!({"key": "../etc/passwd", "url": "https://cdn.example.com/x"}),
            "assets",
            false,
        )
        .unwrap_err();
        assert!(err.to_string().contains("path separators"));
    }

    #[test]
    fn verify_compares_content_hash() {
        let content = b"bundle-body";
        let asset = Asset::from_descriptor(
            &json!({"key": "bundle", "url": "https://cdn.example.com/b.js", "hash": sha256_hex(content)}),
            "launchAsset",
            true,
        )
        .unwrap();
        assert!(asset.verify(content, false));
        assert!(!asset.verify(b"tampered", true));

        let unhashed = Asset {
            hash: None,
            ..asset
        };
        assert!(!unhashed.verify(content, false));
        assert!(unhashed.verify(content, true));
    }
}
