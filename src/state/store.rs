//! JSON-based store for persisting volume profiles
//!
//! All profiles live in one JSON document, by default at
//! ~/.local/share/audio-profiles/profiles.json. Every write replaces the
//! whole document through a temporary file and a rename.

use crate::error::{Error, Result};
use crate::models::{Profile, ProfileCollection};
use log::{debug, info, warn};
use serde::Serialize;
use std::cell::RefCell;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

/// Recoverable problem found while loading the store
#[derive(Debug, Clone, PartialEq)]
pub enum StoreWarning {
    /// The document could not be parsed and was treated as empty.
    /// `backup` holds a copy of the unreadable contents when one could be made.
    Corrupt {
        reason: String,
        backup: Option<PathBuf>,
    },
}

/// Profiles read from disk, plus any warning raised while reading them
#[derive(Debug, Clone, Default)]
pub struct Loaded {
    pub profiles: ProfileCollection,
    pub warning: Option<StoreWarning>,
}

/// Trim a profile name, rejecting one that is blank
pub fn normalize_name(name: &str) -> Result<&str> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(Error::InvalidName {
            name: name.to_string(),
        });
    }
    Ok(trimmed)
}

/// Store for named volume profiles
#[derive(Debug, Clone)]
pub struct ProfileStore {
    path: PathBuf,
    /// Most recent load warning not yet collected with [`ProfileStore::take_warning`]
    pending_warning: RefCell<Option<StoreWarning>>,
}

impl ProfileStore {
    /// Create a store backed by the given document
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            pending_warning: RefCell::new(None),
        }
    }

    /// Get the default store path
    pub fn default_path() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("audio-profiles")
            .join("profiles.json")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn ensure_dir(&self) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
        }
        Ok(())
    }

    /// Load every profile.
    ///
    /// A missing or blank document is an empty collection. A malformed one is
    /// also an empty collection, reported through [`Loaded::warning`] and kept
    /// for [`ProfileStore::take_warning`] so callers of `get`, `put` and
    /// `delete` can learn about it too.
    pub fn load(&self) -> Result<Loaded> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No profile store at {}", self.path.display());
                return Ok(Loaded::default());
            }
            Err(e) => return Err(Error::io(&self.path, e)),
        };

        if contents.trim().is_empty() {
            return Ok(Loaded::default());
        }

        match serde_json::from_str::<ProfileCollection>(&contents) {
            Ok(profiles) => Ok(Loaded {
                profiles,
                warning: None,
            }),
            Err(e) => {
                warn!(
                    "Profile store {} is unreadable, starting empty: {}",
                    self.path.display(),
                    e
                );
                let warning = StoreWarning::Corrupt {
                    reason: e.to_string(),
                    backup: self.backup_corrupt(&contents),
                };
                self.pending_warning.replace(Some(warning.clone()));
                Ok(Loaded {
                    profiles: ProfileCollection::new(),
                    warning: Some(warning),
                })
            }
        }
    }

    /// Take the warning raised by the last load that found a damaged document
    pub fn take_warning(&self) -> Option<StoreWarning> {
        self.pending_warning.take()
    }

    /// Keep a copy of an unparseable document next to the store.
    /// Each copy gets its own name so earlier backups survive.
    fn backup_corrupt(&self, contents: &str) -> Option<PathBuf> {
        let backup = self
            .path
            .with_extension(format!("json.corrupt-{}", uuid::Uuid::new_v4()));
        match fs::write(&backup, contents) {
            Ok(()) => {
                warn!("Unreadable profiles copied to {}", backup.display());
                Some(backup)
            }
            Err(e) => {
                warn!("Failed to back up unreadable profiles: {}", e);
                None
            }
        }
    }

    /// Replace the whole document with `profiles`
    pub fn save(&self, profiles: &ProfileCollection) -> Result<()> {
        if let Some((name, identity)) = profiles
            .iter()
            .find_map(|(name, p)| p.reserved_conflict().map(|id| (name, id)))
        {
            debug!("Refusing to save profile '{}' with reserved entry", name);
            return Err(Error::ReservedIdentity {
                identity: identity.to_string(),
            });
        }
        if let Some((name, identity)) = profiles
            .iter()
            .find_map(|(name, p)| p.non_finite_entry().map(|id| (name, id)))
        {
            debug!("Refusing to save profile '{}' with non-finite level", name);
            return Err(Error::InvalidVolume {
                profile: name.clone(),
                identity: identity.to_string(),
            });
        }

        self.ensure_dir()?;

        let mut contents = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut serializer = serde_json::Serializer::with_formatter(&mut contents, formatter);
        profiles.serialize(&mut serializer)?;
        contents.push(b'\n');

        self.write_atomic(&contents)?;
        debug!(
            "Saved {} profile(s) to {}",
            profiles.len(),
            self.path.display()
        );
        Ok(())
    }

    fn write_atomic(&self, contents: &[u8]) -> Result<()> {
        let temp_path = self
            .path
            .with_extension(format!("tmp-{}", uuid::Uuid::new_v4()));

        let written = fs::File::create(&temp_path).and_then(|mut file| {
            file.write_all(contents)?;
            file.sync_all()
        });
        if let Err(e) = written {
            let _ = fs::remove_file(&temp_path);
            return Err(Error::io(&temp_path, e));
        }

        fs::rename(&temp_path, &self.path).map_err(|e| {
            let _ = fs::remove_file(&temp_path);
            Error::io(&self.path, e)
        })
    }

    /// Look up a single profile
    pub fn get(&self, name: &str) -> Result<Profile> {
        let name = normalize_name(name)?;
        self.load()?
            .profiles
            .remove(name)
            .ok_or_else(|| Error::NotFound {
                name: name.to_string(),
            })
    }

    /// Store a profile under `name`, replacing any previous one wholesale
    pub fn put(&self, name: &str, profile: Profile) -> Result<()> {
        let name = normalize_name(name)?;
        let mut profiles = self.load()?.profiles;
        if profiles.insert(name.to_string(), profile).is_some() {
            info!("Overwriting profile '{}'", name);
        }
        self.save(&profiles)
    }

    /// Delete a profile and save the remaining ones
    pub fn delete(&self, name: &str) -> Result<()> {
        let name = normalize_name(name)?;
        let mut profiles = self.load()?.profiles;
        if profiles.remove(name).is_none() {
            return Err(Error::NotFound {
                name: name.to_string(),
            });
        }
        self.save(&profiles)?;
        info!("Deleted profile '{}'", name);
        Ok(())
    }

    /// Profile names in store order
    pub fn list(&self) -> Result<Vec<String>> {
        Ok(self.load()?.profiles.into_keys().collect())
    }
}

impl Default for ProfileStore {
    fn default() -> Self {
        Self::new(Self::default_path())
    }
}
