//! Named volume profiles for desktop audio
//!
//! Captures the per-application and master volume levels of the default
//! output device into named profiles, persists them as one JSON document,
//! and reapplies them onto whichever applications are running later.

pub mod app;
pub mod audio;
pub mod error;
pub mod models;
pub mod reconcile;
pub mod settings;
pub mod state;

pub use app::{ProfileEvent, ProfileManager};
pub use error::{EndpointError, Error, Result};
pub use models::{ApplyReport, DuplicatePolicy, LiveSession, MasterOutcome, Profile};
pub use reconcile::SessionReconciler;
pub use state::ProfileStore;
