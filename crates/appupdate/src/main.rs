//! Command-line host for the update checker.
//!
//! `appupdate [check] [SETTINGS]` runs one check using the settings file
//! (default: `settings.json` in the platform config directory) and prints
//! the outcome. `appupdate init [SETTINGS]` writes a settings template.
//! Set `APPUPDATE_HOME` to keep settings, logs and throttle state under one
//! directory.

mod logging;
mod settings;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use appupdate_core::{CheckOutcome, FileThrottleStore, UpdateChecker};
use appupdate_platform::AppPaths;
use log::debug;

use crate::settings::AppSettings;

const HOME_ENV: &str = "APPUPDATE_HOME";

enum Command {
    Check(Option<PathBuf>),
    Init(Option<PathBuf>),
}

fn parse_args(mut args: impl Iterator<Item = String>) -> Result<Command, String> {
    let first = args.next();
    let command = match first.as_deref() {
        Some("init") => Command::Init(args.next().map(PathBuf::from)),
        Some("check") => Command::Check(args.next().map(PathBuf::from)),
        Some(flag) if flag.starts_with('-') => return Err(format!("unknown option '{flag}'")),
        Some(path) => Command::Check(Some(PathBuf::from(path))),
        None => Command::Check(None),
    };
    if let Some(extra) = args.next() {
        return Err(format!("unexpected argument '{extra}'"));
    }

    Ok(command)
}

fn resolve_paths() -> Result<AppPaths, String> {
    match std::env::var_os(HOME_ENV) {
        Some(root) if !root.is_empty() => Ok(AppPaths::from_root(&PathBuf::from(root))),
        _ => AppPaths::new().map_err(|error| error.to_string()),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let command = match parse_args(std::env::args().skip(1)) {
        Ok(command) => command,
        Err(error) => {
            eprintln!("appupdate: {error}");
            eprintln!("usage: appupdate [check|init] [SETTINGS]");
            return ExitCode::from(2);
        }
    };

    let paths = match resolve_paths() {
        Ok(paths) => paths,
        Err(error) => {
            eprintln!("appupdate: {error}");
            return ExitCode::FAILURE;
        }
    };

    match command {
        Command::Init(path) => init(&path.unwrap_or_else(|| paths.settings_file())),
        Command::Check(path) => check(&paths, &path.unwrap_or_else(|| paths.settings_file())).await,
    }
}

fn init(settings_path: &std::path::Path) -> ExitCode {
    if settings_path.exists() {
        eprintln!(
            "appupdate: {} already exists, leaving it untouched",
            settings_path.display()
        );
        return ExitCode::FAILURE;
    }

    match AppSettings::template().save_to(settings_path) {
        Ok(()) => {
            println!("Wrote settings template to {}", settings_path.display());
            ExitCode::SUCCESS
        }
        Err(error) => {
            eprintln!("appupdate: {error}");
            ExitCode::FAILURE
        }
    }
}

async fn check(paths: &AppPaths, settings_path: &std::path::Path) -> ExitCode {
    let settings = match AppSettings::load_from(settings_path) {
        Ok(settings) => settings,
        Err(error) => {
            eprintln!("appupdate: {error}");
            return ExitCode::FAILURE;
        }
    };

    logging::init_logging(paths, settings.debug_logging, settings.max_log_size_bytes);
    debug!("Loaded settings from {}", settings_path.display());

    let client = match settings.http_client() {
        Ok(client) => client,
        Err(error) => {
            eprintln!("appupdate: {error}");
            return ExitCode::FAILURE;
        }
    };

    let store = Arc::new(FileThrottleStore::new(paths.throttle_state_file()));
    let mut checker = UpdateChecker::new(settings.checker_config(), store, client);

    match checker.run_to_completion().await {
        Some(outcome) => report(&outcome),
        None => {
            eprintln!("appupdate: update check did not complete");
            ExitCode::FAILURE
        }
    }
}

fn report(outcome: &CheckOutcome) -> ExitCode {
    match outcome {
        CheckOutcome::UpdateAvailable { record, show: true } => {
            println!("Update available: {}", record.version_name);
            println!("Download: {}", record.download_url);
            if let Some(notes) = &record.release_notes {
                println!();
                println!("{notes}");
            }
            ExitCode::SUCCESS
        }
        CheckOutcome::UpdateAvailable { record, show: false } => {
            debug!(
                "Update {} available but not shown this time",
                record.version_name
            );
            ExitCode::SUCCESS
        }
        CheckOutcome::NoUpdate { latest } => {
            println!("Up to date (latest is {})", latest.version_name);
            ExitCode::SUCCESS
        }
        CheckOutcome::Failed(error) => {
            eprintln!("appupdate: {error}");
            ExitCode::FAILURE
        }
    }
}
