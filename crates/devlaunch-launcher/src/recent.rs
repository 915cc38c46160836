//! ---
//! dl_section: "04-launcher"
//! dl_subsection: "module"
//! dl_type: "source"
//! dl_scope: "code"
//! dl_description: "Persistent history of recently opened apps."
//! dl_version: "v0.0.0-prealpha"
//! dl_owner: "tbd"
//! ---
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use devlaunch_common::config::RecentAppsConfig;
use devlaunch_updates::StorageError;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// One entry of the history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecentApp {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub opened_at: DateTime<Utc>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RecentAppsFile {
    #[serde(default)]
    apps: Vec<RecentApp>,
}

/// Most-recent-first list of opened app URLs.
///
/// Entries older than `max_age` are pruned whenever the history is read or
/// written, and at most `capacity` entries are kept. Without a backing path
/// the history lives in memory only.
#[derive(Debug, Clone)]
pub struct RecentlyOpenedApps {
    path: Option<PathBuf>,
    capacity: usize,
    max_age: Duration,
    apps: Vec<RecentApp>,
}

impl RecentlyOpenedApps {
    pub fn in_memory(capacity: usize, max_age: Duration) -> Self {
        Self {
            path: None,
            capacity: capacity.max(1),
            max_age,
            apps: Vec::new(),
        }
    }

    /// Open the history file described by `config`. A missing file is an
    /// empty history.
    pub fn open(config: &RecentAppsConfig) -> Result<Self, StorageError> {
        let mut history = Self::in_memory(config.capacity, config.max_age);
        if config.path.exists() {
            let file: RecentAppsFile = serde_json::from_slice(&fs::read(&config.path)?)?;
            history.apps = file.apps;
            history.apps.sort_by(|a, b| b.opened_at.cmp(&a.opened_at));
            history.apps.truncate(history.capacity);
        }
        debug!(path = %config.path.display(), entries = history.apps.len(), "recent apps loaded");
        history.path = Some(config.path.clone());
        Ok(history)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Record that `url` was opened at `at`, moving it to the front.
    pub fn record(
        &mut self,
        url: &str,
        name: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        self.apps.retain(|app| app.url != url);
        self.apps.insert(
            0,
            RecentApp {
                url: url.to_owned(),
                name: name.map(str::to_owned),
                opened_at: at,
            },
        );
        self.prune(at);
        self.persist()
    }

    /// Entries that are not older than `max_age` at `now`, most recent first.
    pub fn entries(&self, now: DateTime<Utc>) -> Vec<RecentApp> {
        self.apps
            .iter()
            .filter(|app| is_fresh(app, now, self.max_age))
            .cloned()
            .collect()
    }

    /// URL → last opened time, most recent first.
    pub fn as_map(&self, now: DateTime<Utc>) -> IndexMap<String, DateTime<Utc>> {
        self.entries(now)
            .into_iter()
            .map(|app| (app.url, app.opened_at))
            .collect()
    }

    /// Forget every entry.
    pub fn clear(&mut self) -> Result<(), StorageError> {
        self.apps.clear();
        self.persist()
    }

    fn prune(&mut self, now: DateTime<Utc>) {
        let max_age = self.max_age;
        self.apps.retain(|app| is_fresh(app, now, max_age));
        self.apps.truncate(self.capacity);
    }

    fn persist(&self) -> Result<(), StorageError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("json.tmp");
        {
            let mut writer = BufWriter::new(File::create(&tmp)?);
            serde_json::to_writer_pretty(
                &mut writer,
                &RecentAppsFile {
                    apps: self.apps.clone(),
                },
            )?;
            writer.flush()?;
        }
        fs::rename(&tmp, path)?;
        Ok(())
    }
}

// Entries stamped in the future count as fresh.
fn is_fresh(app: &RecentApp, now: DateTime<Utc>, max_age: Duration) -> bool {
    (now - app.opened_at)
        .to_std()
        .map_or(true, |age| age <= max_age)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::tempdir;

    const DAY: Duration = Duration::from_secs(24 * 60 * 60);

    fn at(hours: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap() + chrono::Duration::hours(hours)
    }

    #[test]
    fn most_recent_first_without_duplicates() {
        let mut recent = RecentlyOpenedApps::in_memory(10, 3 * DAY);
        recent.record("http://a/index.bundle", None, at(0)).unwrap();
        recent.record("http://b/index.bundle", Some("B"), at(1)).unwrap();
        recent.record("http://a/index.bundle", None, at(2)).unwrap();

        let urls: Vec<String> = recent.as_map(at(3)).into_keys().collect();
        assert_eq!(urls, ["http://a/index.bundle", "http://b/index.bundle"]);
        assert_eq!(recent.entries(at(3))[1].name.as_deref(), Some("B"));
    }

    #[test]
    fn stale_entries_and_overflow_are_dropped() {
        let mut recent = RecentlyOpenedApps::in_memory(2, 3 * DAY);
        recent.record("http://old/", None, at(0)).unwrap();
        assert!(recent.entries(at(24 * 4)).is_empty());

        recent.record("http://a/", None, at(100)).unwrap();
        recent.record("http://b/", None, at(101)).unwrap();
        recent.record("http://c/", None, at(102)).unwrap();
        let urls: Vec<String> = recent.as_map(at(103)).into_keys().collect();
        assert_eq!(urls, ["http://c/", "http://b/"]);
    }

    #[test]
    fn history_survives_reopen() {
        let dir = tempdir().unwrap();
        let config = RecentAppsConfig {
            path: dir.path().join("nested/recent.json"),
            capacity: 5,
            max_age: 3 * DAY,
        };
        let mut recent = RecentlyOpenedApps::open(&config).unwrap();
        assert!(recent.entries(Utc::now()).is_empty());
        recent
            .record("http://a/index.bundle", Some("A"), Utc::now())
            .unwrap();

        let reopened = RecentlyOpenedApps::open(&config).unwrap();
        let entries = reopened.entries(Utc::now());
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name.as_deref(), Some("A"));
        assert_eq!(reopened.path(), Some(config.path.as_path()));
    }
}
