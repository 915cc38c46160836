//! ---
//! dl_section: "05-cli"
//! dl_subsection: "binary"
//! dl_type: "source"
//! dl_scope: "code"
//! dl_description: "Recent-app history subcommand."
//! dl_version: "v0.0.0-prealpha"
//! dl_owner: "tbd"
//! ---
use anyhow::{Context, Result};
use chrono::Utc;
use clap::Args;
use devlaunch_common::AppConfig;
use devlaunch_launcher::RecentlyOpenedApps;

#[derive(Debug, Args)]
pub struct RecentArgs {
    /// Forget every entry.
    #[arg(long)]
    clear: bool,
}

pub fn run(args: RecentArgs, config: &AppConfig) -> Result<()> {
    let settings = &config.launcher.recent_apps;
    let mut history = RecentlyOpenedApps::open(settings)
        .with_context(|| format!("unable to read {}", settings.path.display()))?;

    if args.clear {
        history.clear()?;
        println!("recent apps cleared");
        return Ok(());
    }

    let entries = history.entries(Utc::now());
    if entries.is_empty() {
        println!("no recently opened apps");
    }
    for app in entries {
        match app.name {
            Some(name) => println!("{}  {}  ({name})", app.opened_at.to_rfc3339(), app.url),
            None => println!("{}  {}", app.opened_at.to_rfc3339(), app.url),
        }
    }
    Ok(())
}
