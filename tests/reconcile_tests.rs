//! Integration Tests
//!
//! Capture/apply behavior against the in-process mixer and a temporary store.

use approx::assert_relative_eq;
use audio_profiles::audio::MemoryBackend;
use audio_profiles::models::{MasterOutcome, MASTER_VOLUME_KEY};
use audio_profiles::state::StoreWarning;
use audio_profiles::{EndpointError, Error, ProfileStore, SessionReconciler};
use pretty_assertions::assert_eq;
use std::fs;
use tempfile::TempDir;

/// Helper to create an isolated store
fn create_store() -> (TempDir, ProfileStore) {
    let temp_dir = tempfile::tempdir().unwrap();
    let store = ProfileStore::new(temp_dir.path().join("profiles.json"));
    (temp_dir, store)
}

fn volumes(mixer: &MemoryBackend) -> Vec<(Option<String>, f32)> {
    mixer
        .snapshot()
        .into_iter()
        .map(|s| (s.identity, s.volume))
        .collect()
}

// === Worked example ===

#[test]
fn test_gaming_profile_example() {
    let (_dir, store) = create_store();
    let mixer = MemoryBackend::new(0.9);
    mixer.add_session(Some("game.exe"), 0.8);
    mixer.add_session(Some("voice.exe"), 0.5);

    SessionReconciler::new(&mixer, &store)
        .capture("Gaming")
        .unwrap();

    let document: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(store.path()).unwrap()).unwrap();
    let expected: serde_json::Value = serde_json::from_str(
        r#"{"Gaming": {"game.exe": 0.8, "voice.exe": 0.5, "master_volume": 0.9}}"#,
    )
    .unwrap();
    assert_eq!(document, expected);

    // Later: only the game is running, at a different volume
    let later = MemoryBackend::new(0.4);
    let game_later = later.add_session(Some("game.exe"), 0.3);

    let report = SessionReconciler::new(&later, &store)
        .apply("Gaming")
        .unwrap();

    assert_relative_eq!(later.session_volume(game_later).unwrap(), 0.8);
    assert_eq!(later.master(), Some(0.9));
    assert_eq!(report.restored, vec![("game.exe".to_string(), 0.8)]);
    assert!(report.skipped.is_empty());
    assert!(report.is_complete());
}

// === Testable properties ===

#[test]
fn test_capture_then_apply_round_trip() {
    let (_dir, store) = create_store();
    let mixer = MemoryBackend::new(0.65);
    mixer.add_session(Some("music"), 0.25);
    mixer.add_session(Some("chat"), 1.0);
    mixer.add_session(None, 0.5);
    let before = volumes(&mixer);

    let reconciler = SessionReconciler::new(&mixer, &store);
    reconciler.capture("Evening").unwrap();
    reconciler.apply("Evening").unwrap();

    assert_eq!(volumes(&mixer), before);
    assert_eq!(mixer.master(), Some(0.65));
}

#[test]
fn test_apply_is_idempotent() {
    let (_dir, store) = create_store();
    let mixer = MemoryBackend::new(0.5);
    let a = mixer.add_session(Some("a"), 0.2);
    mixer.add_session(Some("b"), 0.7);

    let reconciler = SessionReconciler::new(&mixer, &store);
    reconciler.capture("P").unwrap();
    mixer.set_volume(a, 0.9);

    let first = reconciler.apply("P").unwrap();
    let after_once = (volumes(&mixer), mixer.master());
    let second = reconciler.apply("P").unwrap();

    assert_eq!((volumes(&mixer), mixer.master()), after_once);
    assert_eq!(first, second);
}

#[test]
fn test_partial_match_leaves_others_untouched() {
    let (_dir, store) = create_store();
    let capture_mixer = MemoryBackend::new(0.8);
    capture_mixer.add_session(Some("a.exe"), 0.3);
    capture_mixer.add_session(Some("b.exe"), 0.6);
    SessionReconciler::new(&capture_mixer, &store)
        .capture("AB")
        .unwrap();

    let mixer = MemoryBackend::new(0.2);
    let a = mixer.add_session(Some("a.exe"), 1.0);
    let other = mixer.add_session(Some("other.exe"), 0.45);
    let system = mixer.add_session(None, 0.15);

    let report = SessionReconciler::new(&mixer, &store).apply("AB").unwrap();

    assert_relative_eq!(mixer.session_volume(a).unwrap(), 0.3);
    assert_relative_eq!(mixer.session_volume(other).unwrap(), 0.45);
    assert_relative_eq!(mixer.session_volume(system).unwrap(), 0.15);
    assert_eq!(report.untouched, 1);
    assert!(report.skipped.is_empty());
    assert_eq!(report.master, MasterOutcome::Applied(0.8));
}

#[test]
fn test_stale_session_is_skipped_and_rest_restored() {
    let (_dir, store) = create_store();
    let mixer = MemoryBackend::new(0.5);
    let first = mixer.add_session(Some("first"), 0.1);
    let gone = mixer.add_session(Some("gone"), 0.2);
    let last = mixer.add_session(Some("last"), 0.3);

    let reconciler = SessionReconciler::new(&mixer, &store);
    reconciler.capture("Three").unwrap();
    for id in [first, gone, last] {
        mixer.set_volume(id, 1.0);
    }
    mixer.mark_stale(gone);

    let report = reconciler.apply("Three").unwrap();

    assert_eq!(report.skipped_identities(), vec!["gone"]);
    assert_eq!(
        report.skipped[0].reason,
        EndpointError::SessionStale { id: gone }
    );
    assert_relative_eq!(mixer.session_volume(first).unwrap(), 0.1);
    assert_relative_eq!(mixer.session_volume(last).unwrap(), 0.3);
    assert_eq!(report.master, MasterOutcome::Applied(0.5));
    assert_eq!(mixer.open_connections(), 0);
}

#[test]
fn test_delete_then_load() {
    let (_dir, store) = create_store();
    let mixer = MemoryBackend::new(0.5);
    let reconciler = SessionReconciler::new(&mixer, &store);
    reconciler.capture("Keep").unwrap();
    reconciler.capture("Drop").unwrap();

    store.delete("Drop").unwrap();
    let loaded = store.load().unwrap();
    assert!(!loaded.profiles.contains_key("Drop"));
    assert!(loaded.profiles.contains_key("Keep"));

    let before = fs::read_to_string(store.path()).unwrap();
    assert!(matches!(
        store.delete("Drop"),
        Err(Error::NotFound { name }) if name == "Drop"
    ));
    assert_eq!(fs::read_to_string(store.path()).unwrap(), before);
}

#[test]
fn test_corrupt_store_recovery() {
    let (_dir, store) = create_store();
    fs::write(store.path(), "{\"Gaming\": {\"game.exe\": oops").unwrap();

    let loaded = store.load().unwrap();
    assert!(loaded.profiles.is_empty());
    assert!(matches!(
        loaded.warning,
        Some(StoreWarning::Corrupt { .. })
    ));

    let mixer = MemoryBackend::new(0.5);
    mixer.add_session(Some("game.exe"), 0.4);
    SessionReconciler::new(&mixer, &store)
        .capture("Gaming")
        .unwrap();

    let text = fs::read_to_string(store.path()).unwrap();
    assert!(serde_json::from_str::<serde_json::Value>(&text).is_ok());
    assert!(store.load().unwrap().warning.is_none());
}

#[test]
fn test_reserved_identity_conflict_rejects_capture() {
    // A process named like the reserved master key cannot be stored in the
    // same object as the master volume, so capture refuses it outright.
    let (_dir, store) = create_store();
    let mixer = MemoryBackend::new(0.5);
    mixer.add_session(Some("game.exe"), 0.4);
    mixer.add_session(Some(MASTER_VOLUME_KEY), 0.1);

    let result = SessionReconciler::new(&mixer, &store).capture("Clash");

    assert!(matches!(
        result,
        Err(Error::ReservedIdentity { identity }) if identity == MASTER_VOLUME_KEY
    ));
    assert!(store.load().unwrap().profiles.is_empty());
    assert_eq!(mixer.open_connections(), 0);
}

// === Device-level failures ===

#[test]
fn test_capture_without_device() {
    let (_dir, store) = create_store();
    let mixer = MemoryBackend::without_device();
    mixer.add_session(Some("game.exe"), 0.4);

    let result = SessionReconciler::new(&mixer, &store).capture("Nothing");

    assert!(matches!(result, Err(Error::DeviceUnavailable)));
    assert!(!store.path().exists());
    assert_eq!(mixer.open_connections(), 0);
}

#[test]
fn test_permission_denied_is_surfaced() {
    let (_dir, store) = create_store();
    let mixer = MemoryBackend::new(0.5);
    let reconciler = SessionReconciler::new(&mixer, &store);
    reconciler.capture("P").unwrap();

    mixer.set_access_denied(true);
    assert!(matches!(
        reconciler.capture("Q"),
        Err(Error::PermissionDenied(_))
    ));
    assert!(matches!(
        reconciler.apply("P"),
        Err(Error::PermissionDenied(_))
    ));
    assert_eq!(store.list().unwrap(), vec!["P".to_string()]);
}

#[test]
fn test_every_call_enumerates_fresh() {
    let (_dir, store) = create_store();
    let mixer = MemoryBackend::new(0.5);
    let reconciler = SessionReconciler::new(&mixer, &store);

    let early = mixer.add_session(Some("late.exe"), 0.6);
    reconciler.capture("Late").unwrap();
    mixer.remove_session(early);

    // A new session of the same program appears after capture
    let fresh = mixer.add_session(Some("late.exe"), 0.1);
    let report = reconciler.apply("Late").unwrap();

    assert_relative_eq!(mixer.session_volume(fresh).unwrap(), 0.6);
    assert_eq!(report.restored.len(), 1);
    assert_eq!(mixer.connects(), 2);
}
