//! Application settings persistence using dconf
//!
//! Settings are stored in dconf under `/com/audio-profiles/`

use crate::models::DuplicatePolicy;
use crate::state::ProfileStore;
use log::{error, warn};
use std::path::{Path, PathBuf};

const DCONF_PATH: &str = "/com/audio-profiles/";

/// Environment variable that overrides the store location
pub const STORE_ENV: &str = "AUDIO_PROFILES_STORE";

/// Keys for dconf settings
mod keys {
    pub const STORE_PATH: &str = "store-path";
    pub const DUPLICATE_POLICY: &str = "duplicate-policy";
}

fn key(name: &str) -> String {
    format!("{}{}", DCONF_PATH, name)
}

/// Get the configured profile store path from dconf
pub fn get_store_path() -> Option<PathBuf> {
    dconf_rs::get_string(&key(keys::STORE_PATH))
        .ok()
        .filter(|s| !s.trim().is_empty())
        .map(PathBuf::from)
}

/// Set the profile store path in dconf
pub fn set_store_path(path: &Path) {
    if let Err(e) = dconf_rs::set_string(&key(keys::STORE_PATH), &path.to_string_lossy()) {
        error!("Failed to save store path to dconf: {}", e);
    }
}

/// Get the duplicate-session policy from dconf (defaults to average)
pub fn get_duplicate_policy() -> DuplicatePolicy {
    match dconf_rs::get_string(&key(keys::DUPLICATE_POLICY)) {
        Ok(value) if !value.trim().is_empty() => value.parse().unwrap_or_else(|e| {
            warn!("Ignoring dconf {}: {}", keys::DUPLICATE_POLICY, e);
            DuplicatePolicy::default()
        }),
        _ => DuplicatePolicy::default(),
    }
}

/// Set the duplicate-session policy in dconf
pub fn set_duplicate_policy(policy: DuplicatePolicy) {
    if let Err(e) = dconf_rs::set_string(&key(keys::DUPLICATE_POLICY), policy.as_str()) {
        error!("Failed to save duplicate policy to dconf: {}", e);
    }
}

/// Resolve where the profile store lives: flag, environment, dconf, default
pub fn resolve_store_path(flag: Option<&Path>) -> PathBuf {
    let env = std::env::var_os(STORE_ENV).map(PathBuf::from);
    choose_store_path(flag, env, get_store_path)
}

fn choose_store_path(
    flag: Option<&Path>,
    env: Option<PathBuf>,
    configured: impl FnOnce() -> Option<PathBuf>,
) -> PathBuf {
    flag.map(Path::to_path_buf)
        .or_else(|| env.filter(|p| !p.as_os_str().is_empty()))
        .or_else(configured)
        .unwrap_or_else(ProfileStore::default_path)
}
