//! Capture live volumes into profiles and apply profiles back onto live sessions
//!
//! Every call opens its own endpoint connection and enumerates sessions from
//! scratch; the connection is dropped on every exit path. Apply only touches
//! sessions whose process identity appears in the profile.

use crate::audio::{AudioBackend, AudioConnection};
use crate::error::{Error, Result};
use crate::models::{
    clamp_volume, ApplyReport, DuplicatePolicy, LiveSession, MasterOutcome, Profile,
    SkippedSession, MASTER_VOLUME_KEY,
};
use crate::state::{normalize_name, ProfileStore};
use log::{debug, info, warn};
use std::collections::BTreeMap;

/// Bridges a live audio endpoint and the profile store
pub struct SessionReconciler<'a, B: AudioBackend> {
    backend: &'a B,
    store: &'a ProfileStore,
    duplicate_policy: DuplicatePolicy,
}

impl<'a, B: AudioBackend> SessionReconciler<'a, B> {
    pub fn new(backend: &'a B, store: &'a ProfileStore) -> Self {
        Self {
            backend,
            store,
            duplicate_policy: DuplicatePolicy::default(),
        }
    }

    /// Set how several sessions of one process are folded during capture
    pub fn with_duplicate_policy(mut self, policy: DuplicatePolicy) -> Self {
        self.duplicate_policy = policy;
        self
    }

    /// Snapshot the live sessions and master volume, and save them as `profile_name`.
    ///
    /// Replaces any existing profile of that name. Fails without saving when a
    /// live process uses the reserved master volume key as its identity.
    pub fn capture(&self, profile_name: &str) -> Result<Profile> {
        let name = normalize_name(profile_name)?;
        let mut conn = self.backend.connect()?;

        let sessions = conn.sessions()?;
        let levels = collect_levels(&sessions, self.duplicate_policy)?;
        let master_volume = clamp_volume(conn.master_volume()?);
        drop(conn);

        let profile = Profile {
            levels,
            master_volume,
        };
        self.store.put(name, profile.clone())?;
        info!(
            "Captured profile '{}' ({} application(s), master {:.2})",
            name,
            profile.levels.len(),
            profile.master_volume
        );
        Ok(profile)
    }

    /// Restore a stored profile onto whatever is running right now.
    ///
    /// Per-session failures are recorded in the report and do not stop the
    /// remaining sessions. The master volume is set last; if that fails the
    /// session changes stay in place and the failure is in the report.
    pub fn apply(&self, profile_name: &str) -> Result<ApplyReport> {
        let profile_name = normalize_name(profile_name)?;
        let profile = self.store.get(profile_name)?;
        let mut conn = self.backend.connect()?;
        let sessions = conn.sessions()?;
        debug!(
            "Applying '{}' across {} live session(s)",
            profile_name,
            sessions.len()
        );

        let pass = restore_sessions(&mut conn, &profile, &sessions);

        let master = clamp_volume(profile.master_volume);
        let master = match conn.set_master_volume(master) {
            Ok(()) => MasterOutcome::Applied(master),
            Err(e) => {
                warn!("Failed to set master volume for '{}': {}", profile_name, e);
                MasterOutcome::Failed(e)
            }
        };

        let report = ApplyReport {
            profile: profile_name.to_string(),
            restored: pass.restored,
            skipped: pass.skipped,
            untouched: pass.untouched,
            master,
        };

        info!(
            "Applied profile '{}': {} restored, {} skipped, {} untouched",
            profile_name,
            report.restored.len(),
            report.skipped.len(),
            report.untouched
        );
        Ok(report)
    }

    /// Enumerate the live sessions without changing anything
    pub fn sessions(&self) -> Result<Vec<LiveSession>> {
        let mut conn = self.backend.connect()?;
        Ok(conn.sessions()?)
    }

    /// Current master volume of the default output device
    pub fn master_volume(&self) -> Result<f32> {
        let mut conn = self.backend.connect()?;
        Ok(conn.master_volume()?)
    }
}

/// Fold identified sessions into one level per process identity
fn collect_levels(
    sessions: &[LiveSession],
    policy: DuplicatePolicy,
) -> Result<BTreeMap<String, f32>> {
    let mut observed: BTreeMap<&str, Vec<f32>> = BTreeMap::new();
    for session in sessions {
        let Some(identity) = session.identity() else {
            debug!("Skipping unnamed session {}", session.id);
            continue;
        };
        if identity == MASTER_VOLUME_KEY {
            return Err(Error::ReservedIdentity {
                identity: identity.to_string(),
            });
        }
        observed
            .entry(identity)
            .or_default()
            .push(clamp_volume(session.volume));
    }

    let mut levels = BTreeMap::new();
    for (identity, volumes) in observed {
        if volumes.len() > 1 {
            debug!(
                "{} sessions for {}, combining with {} policy",
                volumes.len(),
                identity,
                policy
            );
        }
        if let Some(level) = policy.combine(&volumes) {
            levels.insert(identity.to_string(), level);
        }
    }
    Ok(levels)
}

#[derive(Default)]
struct SessionPass {
    restored: Vec<(String, f32)>,
    skipped: Vec<SkippedSession>,
    untouched: usize,
}

/// Set every recognised session to its stored level, skipping failures
fn restore_sessions<C: AudioConnection>(
    conn: &mut C,
    profile: &Profile,
    sessions: &[LiveSession],
) -> SessionPass {
    let mut pass = SessionPass::default();

    for session in sessions {
        let Some(identity) = session.identity() else {
            continue;
        };
        let Some(level) = profile.level(identity) else {
            pass.untouched += 1;
            continue;
        };

        let level = clamp_volume(level);
        match conn.set_session_volume(session.id, level) {
            Ok(()) => {
                debug!("{} (session {}) -> {:.2}", identity, session.id, level);
                pass.restored.push((identity.to_string(), level));
            }
            Err(e) => {
                warn!("Skipping {} (session {}): {}", identity, session.id, e);
                pass.skipped.push(SkippedSession {
                    id: session.id,
                    identity: identity.to_string(),
                    reason: e,
                });
            }
        }
    }
    pass
}
