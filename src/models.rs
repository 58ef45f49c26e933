use crate::error::EndpointError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Key under which the master volume sits inside a stored profile object.
/// No live session with this identity may be captured.
pub const MASTER_VOLUME_KEY: &str = "master_volume";

/// A named snapshot of per-process volumes plus the device master volume.
///
/// On disk the levels and the master volume share one JSON object; in memory
/// they are kept apart so a process identity can never overwrite the master.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    /// Process identity -> volume scalar (0.0-1.0)
    #[serde(flatten)]
    pub levels: BTreeMap<String, f32>,
    pub master_volume: f32,
}

impl Profile {
    pub fn new(master_volume: f32) -> Self {
        Self {
            levels: BTreeMap::new(),
            master_volume,
        }
    }

    /// Stored level for a process identity
    pub fn level(&self, identity: &str) -> Option<f32> {
        self.levels.get(identity).copied()
    }

    /// First level entry that uses the reserved master volume key, if any
    pub fn reserved_conflict(&self) -> Option<&str> {
        self.levels
            .keys()
            .find(|k| k.as_str() == MASTER_VOLUME_KEY)
            .map(String::as_str)
    }

    /// First entry whose level is NaN or infinite; JSON has no way to write those
    pub fn non_finite_entry(&self) -> Option<&str> {
        if !self.master_volume.is_finite() {
            return Some(MASTER_VOLUME_KEY);
        }
        self.levels
            .iter()
            .find(|(_, level)| !level.is_finite())
            .map(|(identity, _)| identity.as_str())
    }
}

/// Every stored profile keyed by name; loaded and saved as one document.
pub type ProfileCollection = BTreeMap<String, Profile>;

/// One audio-producing session currently known to the endpoint
#[derive(Debug, Clone, PartialEq)]
pub struct LiveSession {
    /// Endpoint-specific handle, only valid for the connection that produced it
    pub id: u32,
    /// Executable name, absent for system sounds
    pub identity: Option<String>,
    pub volume: f32,
}

impl LiveSession {
    pub fn new(id: u32, identity: Option<&str>, volume: f32) -> Self {
        Self {
            id,
            identity: identity.map(str::to_string),
            volume,
        }
    }

    /// Identity usable for matching; empty names count as absent
    pub fn identity(&self) -> Option<&str> {
        self.identity.as_deref().filter(|name| !name.trim().is_empty())
    }
}

/// How capture folds several live sessions of the same process into one level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DuplicatePolicy {
    /// Arithmetic mean of every session's volume
    #[default]
    Average,
    /// Volume of the session enumerated last
    Last,
    /// Highest volume among the sessions
    Loudest,
}

impl DuplicatePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            DuplicatePolicy::Average => "average",
            DuplicatePolicy::Last => "last",
            DuplicatePolicy::Loudest => "loudest",
        }
    }

    /// Fold the volumes observed for one identity, in enumeration order
    pub fn combine(&self, volumes: &[f32]) -> Option<f32> {
        let last = *volumes.last()?;
        Some(match self {
            DuplicatePolicy::Average => volumes.iter().sum::<f32>() / volumes.len() as f32,
            DuplicatePolicy::Last => last,
            DuplicatePolicy::Loudest => volumes.iter().copied().fold(f32::MIN, f32::max),
        })
    }
}

impl fmt::Display for DuplicatePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DuplicatePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "average" | "avg" | "mean" => Ok(DuplicatePolicy::Average),
            "last" => Ok(DuplicatePolicy::Last),
            "loudest" | "max" => Ok(DuplicatePolicy::Loudest),
            other => Err(format!(
                "unknown duplicate policy '{}' (expected average, last or loudest)",
                other
            )),
        }
    }
}

/// A live session the reconciler could not update
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedSession {
    pub id: u32,
    pub identity: String,
    pub reason: EndpointError,
}

/// Result of the master volume step of an apply
#[derive(Debug, Clone, PartialEq)]
pub enum MasterOutcome {
    Applied(f32),
    Failed(EndpointError),
}

/// What an apply call changed, skipped and left alone
#[derive(Debug, Clone, PartialEq)]
pub struct ApplyReport {
    pub profile: String,
    /// Sessions whose volume was set, with the value written
    pub restored: Vec<(String, f32)>,
    pub skipped: Vec<SkippedSession>,
    /// Identified sessions that are not part of the profile
    pub untouched: usize,
    pub master: MasterOutcome,
}

impl ApplyReport {
    pub fn is_complete(&self) -> bool {
        self.skipped.is_empty() && matches!(self.master, MasterOutcome::Applied(_))
    }

    pub fn skipped_identities(&self) -> Vec<&str> {
        self.skipped.iter().map(|s| s.identity.as_str()).collect()
    }
}

/// Clamp a volume into the 0.0-1.0 domain; NaN becomes silence
pub fn clamp_volume(volume: f32) -> f32 {
    if volume.is_nan() {
        0.0
    } else {
        volume.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_profile_serializes_master_inline() {
        let mut profile = Profile::new(0.9);
        profile.levels.insert("game.exe".into(), 0.8);
        profile.levels.insert("voice.exe".into(), 0.5);

        let json = serde_json::to_string(&profile).unwrap();
        assert_eq!(
            json,
            r#"{"game.exe":0.8,"voice.exe":0.5,"master_volume":0.9}"#
        );
    }

    #[test]
    fn test_profile_deserialize_keeps_master_out_of_levels() {
        let profile: Profile =
            serde_json::from_str(r#"{"game.exe": 0.8, "master_volume": 0.9}"#).unwrap();
        assert_eq!(profile.levels.len(), 1);
        assert_relative_eq!(profile.master_volume, 0.9);
        assert!(profile.reserved_conflict().is_none());
    }

    #[test]
    fn test_non_finite_entry() {
        let mut profile = Profile::new(0.5);
        profile.levels.insert("ok".into(), 0.2);
        assert_eq!(profile.non_finite_entry(), None);

        profile.levels.insert("broken".into(), f32::INFINITY);
        assert_eq!(profile.non_finite_entry(), Some("broken"));
        assert_eq!(Profile::new(f32::NAN).non_finite_entry(), Some(MASTER_VOLUME_KEY));
    }

    #[test]
    fn test_profile_requires_master_volume() {
        assert!(serde_json::from_str::<Profile>(r#"{"game.exe": 0.8}"#).is_err());
    }

    #[test]
    fn test_live_session_blank_identity_is_absent() {
        assert_eq!(LiveSession::new(1, Some("  "), 0.5).identity(), None);
        assert_eq!(LiveSession::new(2, None, 0.5).identity(), None);
        assert_eq!(
            LiveSession::new(3, Some("game.exe"), 0.5).identity(),
            Some("game.exe")
        );
    }

    #[test]
    fn test_duplicate_policy_combine() {
        let volumes = [0.2, 0.6, 0.4];
        assert_relative_eq!(
            DuplicatePolicy::Average.combine(&volumes).unwrap(),
            0.4,
            epsilon = 1e-6
        );
        assert_relative_eq!(DuplicatePolicy::Last.combine(&volumes).unwrap(), 0.4);
        assert_relative_eq!(DuplicatePolicy::Loudest.combine(&volumes).unwrap(), 0.6);
        assert_eq!(DuplicatePolicy::Average.combine(&[]), None);
    }

    #[test]
    fn test_duplicate_policy_parse() {
        assert_eq!("Loudest".parse::<DuplicatePolicy>(), Ok(DuplicatePolicy::Loudest));
        assert_eq!("mean".parse::<DuplicatePolicy>(), Ok(DuplicatePolicy::Average));
        assert!("median".parse::<DuplicatePolicy>().is_err());
    }

    #[test]
    fn test_clamp_volume() {
        assert_eq!(clamp_volume(1.4), 1.0);
        assert_eq!(clamp_volume(-0.1), 0.0);
        assert_eq!(clamp_volume(f32::NAN), 0.0);
        assert_eq!(clamp_volume(0.3), 0.3);
    }
}
