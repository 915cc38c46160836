//! ---
//! dl_section: "04-launcher"
//! dl_subsection: "module"
//! dl_type: "source"
//! dl_scope: "code"
//! dl_description: "Resolution of app URLs to launchable updates."
//! dl_version: "v0.0.0-prealpha"
//! dl_owner: "tbd"
//! ---
use devlaunch_common::config::LauncherSettings;
use devlaunch_updates::{Update, UpdateStore};
use tracing::debug;
use url::Url;
use uuid::Uuid;

use crate::LauncherError;

const LATEST: &str = "latest";

/// Resolve an app URL to the update that should run.
///
/// * `<update_scheme>://latest` selects the most recent launchable update.
/// * `<update_scheme>://<uuid>` loads that stored update, which must match
///   the host runtime version.
/// * `http(s)://…` synthesizes a development-mode update serving the URL.
pub fn resolve_update(
    raw: &str,
    store: &UpdateStore,
    settings: &LauncherSettings,
) -> Result<Update, LauncherError> {
    let url = Url::parse(raw.trim()).map_err(|_| LauncherError::UnsupportedUrl(raw.to_owned()))?;
    let scheme = url.scheme();

    if scheme.eq_ignore_ascii_case(&settings.update_scheme) {
        let target = url
            .host_str()
            .filter(|host| !host.is_empty())
            .ok_or_else(|| LauncherError::UnsupportedUrl(raw.to_owned()))?;
        if target.eq_ignore_ascii_case(LATEST) {
            return store.launchable()?.ok_or(LauncherError::NoLaunchableUpdate);
        }
        let id =
            Uuid::parse_str(target).map_err(|_| LauncherError::UnsupportedUrl(raw.to_owned()))?;
        let update = store.load(id)?.ok_or(LauncherError::UnknownUpdate(id))?;
        let expected = store.expected_runtime_version();
        if update.runtime_version() != expected || update.launch_asset().is_none() {
            return Err(LauncherError::IncompatibleUpdate {
                id,
                runtime_version: update.runtime_version().to_owned(),
                expected: expected.to_owned(),
            });
        }
        debug!(update_id = %id, "resolved stored update");
        return Ok(update);
    }

    match scheme {
        "http" | "https" => Ok(store.development_update(url)?),
        _ => Err(LauncherError::UnsupportedUrl(raw.to_owned())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use devlaunch_common::config::UpdatesConfig;
    use devlaunch_updates::{MemoryDatabase, ValidationError};
    use serde_json::json;

    const ID: &str = "6b2c1f3e-5a7d-4e8f-9a0b-1c2d3e4f5a6b";

    fn store(config: UpdatesConfig) -> UpdateStore {
        UpdateStore::new(Arc::new(MemoryDatabase::new()), config)
    }

    fn import(store: &UpdateStore, runtime: &str) {
        store
            .import(&json!({
                "id": ID,
                "commitTime": "2024-05-01T10:00:00Z",
                "runtimeVersion": runtime,
                "launchAsset": {"key": "bundle", "url": "https://u.example.com/index.bundle"}
            }))
            .unwrap();
    }

    #[test]
    fn latest_uses_store_selection() {
        let settings = LauncherSettings::default();
        let store = store(UpdatesConfig::default());
        assert!(matches!(
            resolve_update("update://latest", &store, &settings),
            Err(LauncherError::NoLaunchableUpdate)
        ));
        import(&store, "1.0.0");
        let update = resolve_update("update://latest", &store, &settings).unwrap();
        assert_eq!(update.id().to_string(), ID);
    }

    #[test]
    fn stored_update_by_id_must_match_runtime() {
        let settings = LauncherSettings::default();
        let store = store(UpdatesConfig::default());
        let missing = Uuid::new_v4();
        assert!(matches!(
            resolve_update(&format!("update://{missing}"), &store, &settings),
            Err(LauncherError::UnknownUpdate(id)) if id == missing
        ));

        import(&store, "2.0.0");
        assert!(matches!(
            resolve_update(&format!("update://{ID}"), &store, &settings),
            Err(LauncherError::IncompatibleUpdate { expected, .. }) if expected == "1.0.0"
        ));
    }

    #[test]
    fn http_urls_become_development_updates() {
        let settings = LauncherSettings::default();
        let update = resolve_update(
            "http://localhost:8081/index.bundle",
            &store(UpdatesConfig::default()),
            &settings,
        )
        .unwrap();
        assert!(update.is_development_mode());
        assert!(!update.is_persisted());

        let locked = store(UpdatesConfig {
            allow_development_mode: false,
            ..UpdatesConfig::default()
        });
        assert!(matches!(
            resolve_update("https://dev.example.com/index.bundle", &locked, &settings),
            Err(LauncherError::Validation(ValidationError::DevelopmentModeDisabled))
        ));
    }

    #[test]
    fn other_urls_are_unsupported() {
        let settings = LauncherSettings::default();
        let store = store(UpdatesConfig::default());
        for raw in ["ftp://example.com/app", "update://not-a-uuid", "garbage", "update:"] {
            assert!(
                matches!(
                    resolve_update(raw, &store, &settings),
                    Err(LauncherError::UnsupportedUrl(_))
                ),
                "{raw}"
            );
        }
    }
}
