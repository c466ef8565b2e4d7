//! Keyclack - keyboard and mouse sounds from profiles
//!
//! Run `keyclack start --profile <name>` to launch the daemon in the
//! background, or `keyclack daemon` to run it in the foreground.
//! Use `keyclack add-profile <dir>` to install a profile.

use clap::Parser;
use keyclack::cli::{Cli, Commands, SoundArgs};
use keyclack::config::{self, Config};
use keyclack::daemon::{Daemon, DaemonOptions};
use keyclack::daemon_manager::{DaemonManager, DaemonStatus, StartOptions, StartOutcome};
use keyclack::profile::ProfileStore;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.quiet {
        "error"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(format!("keyclack={},warn", log_level))),
        )
        .with_target(false)
        .init();

    // Load configuration
    let config = config::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Daemon { sound } => {
            let daemon = Daemon::new(config, daemon_options(sound));
            daemon.run().await?;
        }

        Commands::Start { sound } => {
            let manager =
                DaemonManager::from_config(&config).with_config_path(cli.config.clone());
            run_start(&config, &manager, sound).await?;
        }

        Commands::Stop => {
            let manager = DaemonManager::from_config(&config);
            if manager.stop()? {
                println!("Stopped keyclack daemon.");
            } else {
                println!("keyclack daemon is not running.");
            }
        }

        Commands::Status { full, format } => {
            let manager = DaemonManager::from_config(&config);
            print_status(&manager.status(), full, &format)?;
        }

        Commands::ListProfiles => {
            list_profiles(&ProfileStore::new(config.profiles_dir()))?;
        }

        Commands::AddProfile { path } => {
            add_profile(&config, &path)?;
        }

        Commands::ExportProfile { name, output } => {
            let output = output.unwrap_or_else(|| PathBuf::from(format!("{}.zip", name)));
            ProfileStore::new(config.profiles_dir()).export(&name, &output)?;
            println!("Exported profile '{}' to {}.", name, output.display());
        }

        Commands::RemoveProfile { name } => {
            ProfileStore::new(config.profiles_dir()).remove(&name)?;
            println!("Removed profile '{}'.", name);
        }
    }

    Ok(())
}

fn daemon_options(sound: SoundArgs) -> DaemonOptions {
    DaemonOptions {
        volume: sound.volume,
        profile: sound.profile,
        mouse_profile: sound.mouse_profile,
        pitch: sound.pitch,
        pitch_profile: sound.pitch_profile,
    }
}

async fn run_start(
    config: &Config,
    manager: &DaemonManager,
    sound: SoundArgs,
) -> anyhow::Result<()> {
    let options = StartOptions {
        volume: sound.volume.unwrap_or(config.defaults.volume),
        profile: sound.profile,
        mouse_profile: sound.mouse_profile,
        pitch: sound.pitch,
        pitch_profile: sound.pitch_profile,
    };

    if manager.status().is_running() {
        println!("Reconfiguring running keyclack daemon...");
    } else {
        println!("Starting keyclack daemon...");
    }

    match manager.start(&options).await? {
        StartOutcome::Reconfigured { pid } => println!("Reconfigured keyclack (pid {}).", pid),
        StartOutcome::Spawned {
            pid,
            confirmed: true,
        } => println!("Started keyclack (pid {}).", pid),
        StartOutcome::Spawned {
            pid,
            confirmed: false,
        } => {
            println!("Launched keyclack (pid {}), but it has not reported in yet.", pid);
            println!("Run 'keyclack status' to check on it.");
        }
    }
    Ok(())
}

fn print_status(status: &DaemonStatus, full: bool, format: &str) -> anyhow::Result<()> {
    let record = match status {
        DaemonStatus::Running(record) => Some(record),
        DaemonStatus::Stale(record) => record.as_ref(),
        DaemonStatus::Free => None,
    };

    if format == "json" {
        let mut value = serde_json::json!({ "status": status.as_str() });
        if let (true, Some(record), Some(object)) = (full, record, value.as_object_mut()) {
            object.insert("state".to_string(), serde_json::to_value(record)?);
        }
        println!("{}", value);
        return Ok(());
    }

    println!("{}", status);
    if let (true, Some(record)) = (full, record) {
        println!("  pid:           {}", record.pid);
        println!("  volume:        {}", record.volume);
        println!(
            "  profile:       {}",
            record.profile.as_deref().unwrap_or("(none)")
        );
        println!(
            "  mouse profile: {}",
            record.mouse_profile.as_deref().unwrap_or("(none)")
        );
        match record.pitch_shift {
            Some(ref pitch) => println!(
                "  pitch shift:   {},{} ({})",
                pitch.lower,
                pitch.upper,
                pitch.profile.as_deref().unwrap_or("all profiles")
            ),
            None => println!("  pitch shift:   off"),
        }
        println!("  control port:  {}", record.api_port);
    }
    Ok(())
}

fn list_profiles(store: &ProfileStore) -> anyhow::Result<()> {
    let mut rows = Vec::new();
    for name in store.list()? {
        match store.load(&name) {
            Ok(profile) => rows.push((
                name,
                profile.device().to_string(),
                profile.meta.author.clone().unwrap_or_default(),
                profile.meta.description.clone().unwrap_or_default(),
            )),
            Err(e) => tracing::warn!("Skipping profile '{}': {}", name, e),
        }
    }

    if rows.is_empty() {
        println!("No profiles installed in {:?}", store.root());
        return Ok(());
    }

    let name_len = rows.iter().map(|r| r.0.len()).max().unwrap_or(0).max(4);
    let device_len = 8;
    let author_len = rows.iter().map(|r| r.2.len()).max().unwrap_or(0).max(6);

    println!(
        "{:name_len$} | {:device_len$} | {:author_len$} | Description",
        "Name", "Device", "Author"
    );
    println!(
        "{} | {} | {} | -----------",
        "-".repeat(name_len),
        "-".repeat(device_len),
        "-".repeat(author_len)
    );
    for (name, device, author, description) in rows {
        println!(
            "{:name_len$} | {:device_len$} | {:author_len$} | {}",
            name, device, author, description
        );
    }
    Ok(())
}

fn add_profile(config: &Config, path: &Path) -> anyhow::Result<()> {
    config.ensure_directories()?;
    let store = ProfileStore::new(config.profiles_dir());
    let profile = store.add(path)?;
    println!(
        "Added {} profile '{}'.",
        profile.device(),
        profile.name()
    );
    Ok(())
}
