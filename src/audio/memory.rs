//! In-process audio mixer
//!
//! Simulates a default output device with per-application sessions. Used by
//! the test suite and by callers that want to rehearse a profile without
//! touching real audio.

use super::{AudioBackend, AudioConnection};
use crate::error::EndpointError;
use crate::models::{clamp_volume, LiveSession};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};

/// Shared mixer state - cloning gives another handle to the same mixer
#[derive(Clone, Debug)]
pub struct MemoryBackend {
    inner: Arc<Mutex<MixerInner>>,
}

#[derive(Debug)]
struct MixerInner {
    /// Session id -> (identity, volume), in enumeration order
    sessions: BTreeMap<u32, (Option<String>, f32)>,
    next_id: u32,
    /// Master volume; None means there is no default output device
    master: Option<f32>,
    /// Sessions that enumerate but vanish as soon as they are touched
    stale: BTreeSet<u32>,
    access_denied: bool,
    master_write_fails: bool,
    open_connections: usize,
    connects: usize,
}

impl MemoryBackend {
    /// A mixer with a default device at the given master volume and no sessions
    pub fn new(master_volume: f32) -> Self {
        Self {
            inner: Arc::new(Mutex::new(MixerInner {
                sessions: BTreeMap::new(),
                next_id: 1,
                master: Some(clamp_volume(master_volume)),
                stale: BTreeSet::new(),
                access_denied: false,
                master_write_fails: false,
                open_connections: 0,
                connects: 0,
            })),
        }
    }

    /// A mixer with no default output device
    pub fn without_device() -> Self {
        let backend = Self::new(0.0);
        backend.inner.lock().unwrap().master = None;
        backend
    }

    /// Start a session and return its id
    pub fn add_session(&self, identity: Option<&str>, volume: f32) -> u32 {
        let mut inner = self.inner.lock().unwrap();
        let id = inner.next_id;
        inner.next_id += 1;
        inner
            .sessions
            .insert(id, (identity.map(str::to_string), clamp_volume(volume)));
        id
    }

    /// End a session
    pub fn remove_session(&self, id: u32) {
        let mut inner = self.inner.lock().unwrap();
        inner.sessions.remove(&id);
        inner.stale.remove(&id);
    }

    /// Keep listing the session but fail any volume change on it
    pub fn mark_stale(&self, id: u32) {
        self.inner.lock().unwrap().stale.insert(id);
    }

    pub fn set_access_denied(&self, denied: bool) {
        self.inner.lock().unwrap().access_denied = denied;
    }

    /// Make master volume writes fail while reads keep working
    pub fn set_master_write_fails(&self, fails: bool) {
        self.inner.lock().unwrap().master_write_fails = fails;
    }

    /// Change a session's volume from outside, like another mixer would
    pub fn set_volume(&self, id: u32, volume: f32) {
        if let Some(session) = self.inner.lock().unwrap().sessions.get_mut(&id) {
            session.1 = clamp_volume(volume);
        }
    }

    pub fn session_volume(&self, id: u32) -> Option<f32> {
        self.inner.lock().unwrap().sessions.get(&id).map(|s| s.1)
    }

    pub fn master(&self) -> Option<f32> {
        self.inner.lock().unwrap().master
    }

    /// Connections currently open
    pub fn open_connections(&self) -> usize {
        self.inner.lock().unwrap().open_connections
    }

    /// Connections opened over the mixer's lifetime
    pub fn connects(&self) -> usize {
        self.inner.lock().unwrap().connects
    }

    /// Snapshot of every session, in enumeration order
    pub fn snapshot(&self) -> Vec<LiveSession> {
        self.inner
            .lock()
            .unwrap()
            .sessions
            .iter()
            .map(|(id, (identity, volume))| LiveSession {
                id: *id,
                identity: identity.clone(),
                volume: *volume,
            })
            .collect()
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new(1.0)
    }
}

impl AudioBackend for MemoryBackend {
    type Connection = MemoryConnection;

    fn connect(&self) -> Result<MemoryConnection, EndpointError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.access_denied {
            return Err(EndpointError::PermissionDenied(
                "mixer access denied".to_string(),
            ));
        }
        inner.open_connections += 1;
        inner.connects += 1;
        Ok(MemoryConnection {
            backend: self.clone(),
        })
    }
}

/// An open handle on a [`MemoryBackend`]
#[derive(Debug)]
pub struct MemoryConnection {
    backend: MemoryBackend,
}

impl AudioConnection for MemoryConnection {
    fn sessions(&mut self) -> Result<Vec<LiveSession>, EndpointError> {
        Ok(self.backend.snapshot())
    }

    fn set_session_volume(&mut self, id: u32, volume: f32) -> Result<(), EndpointError> {
        let mut inner = self.backend.inner.lock().unwrap();
        if inner.stale.contains(&id) {
            return Err(EndpointError::SessionStale { id });
        }
        match inner.sessions.get_mut(&id) {
            Some(session) => {
                session.1 = clamp_volume(volume);
                Ok(())
            }
            None => Err(EndpointError::SessionStale { id }),
        }
    }

    fn master_volume(&mut self) -> Result<f32, EndpointError> {
        self.backend
            .inner
            .lock()
            .unwrap()
            .master
            .ok_or(EndpointError::DeviceUnavailable)
    }

    fn set_master_volume(&mut self, volume: f32) -> Result<(), EndpointError> {
        let mut inner = self.backend.inner.lock().unwrap();
        if inner.master.is_none() {
            return Err(EndpointError::DeviceUnavailable);
        }
        if inner.master_write_fails {
            return Err(EndpointError::Backend("master volume is locked".to_string()));
        }
        inner.master = Some(clamp_volume(volume));
        Ok(())
    }
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        let mut inner = self.backend.inner.lock().unwrap();
        inner.open_connections = inner.open_connections.saturating_sub(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_is_released_on_drop() {
        let mixer = MemoryBackend::new(0.5);
        {
            let _conn = mixer.connect().unwrap();
            assert_eq!(mixer.open_connections(), 1);
        }
        assert_eq!(mixer.open_connections(), 0);
        assert_eq!(mixer.connects(), 1);
    }

    #[test]
    fn test_stale_session_rejects_writes() {
        let mixer = MemoryBackend::new(0.5);
        let id = mixer.add_session(Some("game.exe"), 0.3);
        mixer.mark_stale(id);

        let mut conn = mixer.connect().unwrap();
        assert_eq!(conn.sessions().unwrap().len(), 1);
        assert_eq!(
            conn.set_session_volume(id, 0.9),
            Err(EndpointError::SessionStale { id })
        );
        assert_eq!(mixer.session_volume(id), Some(0.3));
    }

    #[test]
    fn test_missing_device() {
        let mixer = MemoryBackend::without_device();
        let mut conn = mixer.connect().unwrap();
        assert_eq!(conn.master_volume(), Err(EndpointError::DeviceUnavailable));
    }

    #[test]
    fn test_denied_access() {
        let mixer = MemoryBackend::new(0.5);
        mixer.set_access_denied(true);
        assert!(matches!(
            mixer.connect(),
            Err(EndpointError::PermissionDenied(_))
        ));
        assert_eq!(mixer.open_connections(), 0);
    }
}
