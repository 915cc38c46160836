//! ---
//! dl_section: "05-cli"
//! dl_subsection: "binary"
//! dl_type: "source"
//! dl_scope: "code"
//! dl_description: "Update store subcommands: import, list, select, keep and gc."
//! dl_version: "v0.0.0-prealpha"
//! dl_owner: "tbd"
//! ---
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::Subcommand;
use devlaunch_common::metrics::{new_registry, render};
use devlaunch_common::AppConfig;
use devlaunch_updates::{FileDatabase, Update, UpdateStore, UpdateStoreMetrics};
use uuid::Uuid;

#[derive(Debug, Subcommand)]
pub enum StoreCommand {
    /// Validate a manifest file and add it to the store.
    Import {
        #[arg(value_name = "MANIFEST")]
        manifest: PathBuf,
    },
    /// List stored updates, most recent first.
    List,
    /// Show the update that would launch on this host.
    Select,
    /// Protect an update from garbage collection.
    Keep {
        id: Uuid,
        /// Clear the flag instead of setting it.
        #[arg(long)]
        release: bool,
    },
    /// Delete updates that are neither kept nor live, and orphaned assets.
    Gc {
        /// Updates currently referenced by a running app.
        #[arg(long = "live", value_name = "ID", num_args = 1..)]
        live: Vec<Uuid>,
    },
}

pub fn run(command: StoreCommand, config: &AppConfig, print_metrics: bool) -> Result<()> {
    let registry = new_registry();
    let database = FileDatabase::open(&config.storage.directory).with_context(|| {
        format!(
            "unable to open update store at {}",
            config.storage.directory.display()
        )
    })?;
    let store = UpdateStore::new(Arc::new(database), config.updates.clone())
        .with_metrics(UpdateStoreMetrics::new(registry.clone())?);

    match command {
        StoreCommand::Import { manifest } => {
            let raw = fs::read_to_string(&manifest)
                .with_context(|| format!("unable to read {}", manifest.display()))?;
            let value: serde_json::Value = serde_json::from_str(&raw)
                .with_context(|| format!("{} is not valid JSON", manifest.display()))?;
            let update = store.import(&value)?;
            println!("imported {}", describe(&update));
        }
        StoreCommand::List => {
            let mut updates = store.list()?;
            updates.sort_by_key(|update| std::cmp::Reverse(update.commit_time()));
            if updates.is_empty() {
                println!("store is empty");
            }
            for update in &updates {
                println!("{}", describe(update));
            }
        }
        StoreCommand::Select => match store.launchable()? {
            Some(update) => println!("{}", describe(&update)),
            None => println!(
                "no launchable update for runtime {}",
                store.expected_runtime_version()
            ),
        },
        StoreCommand::Keep { id, release } => {
            let mut update = store
                .load(id)?
                .ok_or_else(|| anyhow!("update {id} is not in the store"))?;
            store.set_keep(&mut update, !release)?;
            println!("{}", describe(&update));
        }
        StoreCommand::Gc { live } => {
            let report = store.collect_garbage(&live)?;
            println!(
                "removed {} update(s) and {} asset(s); retained {}",
                report.removed_updates.len(),
                report.removed_assets.len(),
                report.retained.len()
            );
            for id in &report.removed_updates {
                println!("  - {id}");
            }
        }
    }

    if print_metrics {
        print!("{}", render(&registry)?);
    }
    Ok(())
}

fn describe(update: &Update) -> String {
    format!(
        "{} runtime={} committed={} keep={} bundle={}",
        update.id(),
        update.runtime_version(),
        update.commit_time().to_rfc3339(),
        update.keep(),
        update.bundle_url()
    )
}
