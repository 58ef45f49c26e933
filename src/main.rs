//! audio-profiles - save and restore per-application volume levels
//!
//! This is the main entry point for the command-line front end.

mod cli;

use audio_profiles::audio::DefaultBackend;
use audio_profiles::models::MasterOutcome;
use audio_profiles::state::StoreWarning;
use audio_profiles::{settings, ProfileEvent, ProfileManager, ProfileStore};
use clap::Parser;
use cli::{Args, Command};
use log::{debug, error, info};
use std::process::ExitCode;

fn main() -> ExitCode {
    // Parse command-line arguments and initialize logging
    let args = Args::parse();
    cli::init_logging(&args);

    let verb = args.command.verb();
    let subject = match &args.command {
        Command::Capture { name, .. }
        | Command::Apply { name }
        | Command::Delete { name }
        | Command::Show { name } => Some(name.clone()),
        _ => None,
    };

    match run(args) {
        Ok(code) => code,
        Err(err) => {
            debug!("{:?}", err);
            let reason = match err.downcast_ref::<audio_profiles::Error>() {
                Some(e) => e.user_message(),
                None => err.to_string(),
            };
            match subject {
                Some(name) => error!("Could not {} profile \"{}\": {}", verb, name, reason),
                None => error!("Could not {} profiles: {}", verb, reason),
            }
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> anyhow::Result<ExitCode> {
    let store_path = settings::resolve_store_path(args.store.as_deref());
    info!("Using profile store {}", store_path.display());

    let mut manager = ProfileManager::new(DefaultBackend::default(), ProfileStore::new(store_path))
        .with_duplicate_policy(settings::get_duplicate_policy());
    manager.subscribe(|event| {
        if let ProfileEvent::StoreRecovered(StoreWarning::Corrupt { backup, .. }) = event {
            match backup {
                Some(path) => eprintln!(
                    "The profile file was damaged and has been reset. A copy was kept at {}",
                    path.display()
                ),
                None => eprintln!("The profile file was damaged and has been reset."),
            }
        }
    });

    match args.command {
        Command::Capture { name, duplicates } => {
            if let Some(policy) = duplicates {
                manager = manager.with_duplicate_policy(policy);
            }
            let profile = manager.request_capture(&name)?;
            println!(
                "Saved \"{}\" with {} application(s)",
                name.trim(),
                profile.levels.len()
            );
        }
        Command::Apply { name } => {
            let report = manager.request_apply(&name)?;
            for (identity, volume) in &report.restored {
                println!("  {:<32} {:>3}%", identity, percent(*volume));
            }
            for skipped in &report.skipped {
                println!("  {:<32} skipped ({})", skipped.identity, skipped.reason);
            }
            match &report.master {
                MasterOutcome::Applied(volume) => {
                    println!("  {:<32} {:>3}%", "master volume", percent(*volume))
                }
                MasterOutcome::Failed(e) => {
                    error!("Could not set the master volume: {}", e);
                    return Ok(ExitCode::FAILURE);
                }
            }
        }
        Command::Delete { name } => {
            manager.request_delete(&name)?;
            println!("Deleted \"{}\"", name.trim());
        }
        Command::List => {
            let names = manager.request_list()?;
            if names.is_empty() {
                println!("Create a profile to get started");
            }
            for name in names {
                println!("{}", name);
            }
        }
        Command::Show { name } => {
            let profile = manager.request_show(&name)?;
            for (identity, volume) in &profile.levels {
                println!("{:<32} {:>3}%", identity, percent(*volume));
            }
            println!("{:<32} {:>3}%", "master volume", percent(profile.master_volume));
        }
        Command::Sessions => {
            let (sessions, master) = manager.request_sessions()?;
            for session in &sessions {
                let identity = session.identity().unwrap_or("(system)");
                println!("{:>6}  {:<32} {:>3}%", session.id, identity, percent(session.volume));
            }
            println!("{:>6}  {:<32} {:>3}%", "", "master volume", percent(master));
        }
        Command::Config {
            duplicate_policy,
            store_path,
        } => {
            if let Some(policy) = duplicate_policy {
                settings::set_duplicate_policy(policy);
            }
            if let Some(path) = store_path {
                settings::set_store_path(&path);
            }
            println!("duplicate-policy: {}", settings::get_duplicate_policy());
            println!(
                "store-path:       {}",
                settings::resolve_store_path(None).display()
            );
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn percent(volume: f32) -> u32 {
    (volume * 100.0).round() as u32
}
