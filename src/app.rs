//! Profile manager - the verbs a front end drives
//!
//! Front ends register listeners instead of reaching into shared state; every
//! verb that changes what the store holds notifies them once it has finished.
//! A damaged store is reported before the verb's own event, whether or not
//! the verb succeeded.

use crate::audio::AudioBackend;
use crate::error::Result;
use crate::models::{ApplyReport, DuplicatePolicy, LiveSession, Profile};
use crate::reconcile::SessionReconciler;
use crate::state::{normalize_name, ProfileStore, StoreWarning};

/// Something a front end may want to redraw for
#[derive(Debug, Clone, PartialEq)]
pub enum ProfileEvent {
    Saved(String),
    Applied(String),
    Deleted(String),
    /// The store was unreadable and has been treated as empty
    StoreRecovered(StoreWarning),
}

type Listener = Box<dyn FnMut(&ProfileEvent)>;

/// Owns the audio backend and the store, and exposes one method per user action
pub struct ProfileManager<B: AudioBackend> {
    backend: B,
    store: ProfileStore,
    duplicate_policy: DuplicatePolicy,
    listeners: Vec<Listener>,
}

impl<B: AudioBackend> ProfileManager<B> {
    pub fn new(backend: B, store: ProfileStore) -> Self {
        Self {
            backend,
            store,
            duplicate_policy: DuplicatePolicy::default(),
            listeners: Vec::new(),
        }
    }

    pub fn with_duplicate_policy(mut self, policy: DuplicatePolicy) -> Self {
        self.duplicate_policy = policy;
        self
    }

    pub fn store(&self) -> &ProfileStore {
        &self.store
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Register a listener for profile events
    pub fn subscribe(&mut self, listener: impl FnMut(&ProfileEvent) + 'static) {
        self.listeners.push(Box::new(listener));
    }

    fn emit(&mut self, event: ProfileEvent) {
        for listener in &mut self.listeners {
            listener(&event);
        }
    }

    fn report_store_warning(&mut self) {
        if let Some(warning) = self.store.take_warning() {
            self.emit(ProfileEvent::StoreRecovered(warning));
        }
    }

    fn reconciler(&self) -> SessionReconciler<'_, B> {
        SessionReconciler::new(&self.backend, &self.store)
            .with_duplicate_policy(self.duplicate_policy)
    }

    /// Save the current volumes under `name`
    pub fn request_capture(&mut self, name: &str) -> Result<Profile> {
        let captured = self.reconciler().capture(name);
        self.report_store_warning();
        let profile = captured?;
        self.emit(ProfileEvent::Saved(normalize_name(name)?.to_string()));
        Ok(profile)
    }

    /// Restore the volumes saved under `name`
    pub fn request_apply(&mut self, name: &str) -> Result<ApplyReport> {
        let applied = self.reconciler().apply(name);
        self.report_store_warning();
        let report = applied?;
        self.emit(ProfileEvent::Applied(report.profile.clone()));
        Ok(report)
    }

    pub fn request_delete(&mut self, name: &str) -> Result<()> {
        let deleted = self.store.delete(name);
        self.report_store_warning();
        deleted?;
        self.emit(ProfileEvent::Deleted(normalize_name(name)?.to_string()));
        Ok(())
    }

    /// Names of every saved profile
    pub fn request_list(&mut self) -> Result<Vec<String>> {
        let listed = self.store.list();
        self.report_store_warning();
        listed
    }

    pub fn request_show(&mut self, name: &str) -> Result<Profile> {
        let shown = self.store.get(name);
        self.report_store_warning();
        shown
    }

    /// Live sessions and the current master volume
    pub fn request_sessions(&self) -> Result<(Vec<LiveSession>, f32)> {
        let reconciler = self.reconciler();
        Ok((reconciler.sessions()?, reconciler.master_volume()?))
    }
}
