//! Session file round-trips: what is saved is what loads back.

use ralph_core::{Clock, FakeClock, Task};
use ralph_storage::{PersistedSession, SessionStore, TaskSnapshot, TrackerState};
use tempfile::tempdir;

fn sample(cwd: std::path::PathBuf, clock: &FakeClock) -> PersistedSession {
    let tasks = [Task::new("a", "first").with_priority(3)];
    PersistedSession::new(
        "b2a1c3d4-0000-4000-8000-1234567890ab",
        "claude",
        Some("opus".to_string()),
        TrackerState {
            plugin: "beads".to_string(),
            epic_id: Some("epic-9".to_string()),
            prd_path: None,
            total_tasks: 1,
            tasks: tasks.iter().map(TaskSnapshot::from).collect(),
        },
        25,
        cwd,
        clock.now(),
    )
}

#[test]
fn save_then_load_is_identity_modulo_updated_at() {
    let dir = tempdir().unwrap();
    let clock = FakeClock::fixed();
    let store = SessionStore::new(clock.clone());

    let mut session = sample(dir.path().to_path_buf(), &clock);
    session.add_skipped_task("x");
    clock.advance(chrono::Duration::seconds(7));
    store.save(&mut session).unwrap();

    // `save` stamps updated_at; the stamped value is what round-trips.
    let loaded = store.load(dir.path()).unwrap().unwrap();
    assert_eq!(loaded, session);
    assert_eq!(loaded.updated_at, clock.now());
}

#[test]
fn repeated_saves_only_move_updated_at() {
    let dir = tempdir().unwrap();
    let clock = FakeClock::fixed();
    let store = SessionStore::new(clock.clone());

    let mut session = sample(dir.path().to_path_buf(), &clock);
    store.save(&mut session).unwrap();
    let first = store.load(dir.path()).unwrap().unwrap();

    clock.advance(chrono::Duration::minutes(1));
    store.save(&mut session).unwrap();
    let second = store.load(dir.path()).unwrap().unwrap();

    assert!(second.updated_at > first.updated_at);
    let mut normalized = second.clone();
    normalized.updated_at = first.updated_at;
    assert_eq!(normalized, first);
}
