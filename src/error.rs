//! Error types for profile storage and live audio reconciliation.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for profile operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Failures reported by a live audio endpoint.
///
/// Session-level failures (`SessionStale`) are skipped by the reconciler;
/// everything else fails the operation that hit it.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EndpointError {
    #[error("no default output device")]
    DeviceUnavailable,

    #[error("audio subsystem refused access: {0}")]
    PermissionDenied(String),

    #[error("session {id} is no longer available")]
    SessionStale { id: u32 },

    #[error("audio backend error: {0}")]
    Backend(String),
}

/// Errors surfaced by the profile store, reconciler and profile manager.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Failed to access profile store {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize profiles: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Profile not found: {name}")]
    NotFound { name: String },

    #[error("Invalid profile name: {name:?}")]
    InvalidName { name: String },

    #[error("Process identity {identity:?} collides with the reserved master volume key")]
    ReservedIdentity { identity: String },

    #[error("Profile {profile:?} has a non-finite level for {identity:?}")]
    InvalidVolume { profile: String, identity: String },

    #[error("No default audio output device")]
    DeviceUnavailable,

    #[error("Audio subsystem cannot be queried: {0}")]
    PermissionDenied(String),

    #[error("Audio endpoint failure: {0}")]
    Endpoint(EndpointError),
}

impl From<EndpointError> for Error {
    fn from(err: EndpointError) -> Self {
        match err {
            EndpointError::DeviceUnavailable => Error::DeviceUnavailable,
            EndpointError::PermissionDenied(reason) => Error::PermissionDenied(reason),
            other => Error::Endpoint(other),
        }
    }
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    /// Short explanation a non-technical user can act on.
    pub fn user_message(&self) -> String {
        match self {
            Error::Io { .. } => "the profile file could not be read or written".to_string(),
            Error::Serialize(_) => "the profiles could not be saved".to_string(),
            Error::NotFound { .. } => "profile not found".to_string(),
            Error::InvalidName { .. } => "profile names cannot be empty".to_string(),
            Error::ReservedIdentity { identity } => format!(
                "a running program is named \"{}\", which is reserved for the master volume",
                identity
            ),
            Error::InvalidVolume { .. } => {
                "the profile contains a volume level that is not a number".to_string()
            }
            Error::DeviceUnavailable => "no audio device found".to_string(),
            Error::PermissionDenied(_) => "access to the audio system was denied".to_string(),
            Error::Endpoint(_) => "the audio system reported an error".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_errors_map_to_typed_variants() {
        assert!(matches!(
            Error::from(EndpointError::DeviceUnavailable),
            Error::DeviceUnavailable
        ));
        assert!(matches!(
            Error::from(EndpointError::PermissionDenied("no".into())),
            Error::PermissionDenied(_)
        ));
        assert!(matches!(
            Error::from(EndpointError::SessionStale { id: 4 }),
            Error::Endpoint(EndpointError::SessionStale { id: 4 })
        ));
    }

    #[test]
    fn test_user_message_hides_internal_detail() {
        let err = Error::io(
            "/tmp/profiles.json",
            std::io::Error::new(std::io::ErrorKind::Other, "EIO at sector 42"),
        );
        assert!(!err.user_message().contains("sector"));
        assert_eq!(
            Error::NotFound {
                name: "Gaming".into()
            }
            .user_message(),
            "profile not found"
        );
    }
}
