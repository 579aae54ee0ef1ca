//! Scenario: two registered sessions; one working directory lost its
//! session file out of band. Cleanup drops exactly that entry.

use ralph_core::{Clock, FakeClock, Task};
use ralph_storage::{
    ListFilter, PersistedSession, RegistryEntry, SessionRegistry, SessionStatus, SessionStore,
    TaskSnapshot, TrackerState, REGISTRY_FILE_NAME,
};
use tempfile::tempdir;

fn entry(id: &str, cwd: std::path::PathBuf, clock: &FakeClock) -> RegistryEntry {
    RegistryEntry {
        session_id: id.to_string(),
        cwd,
        status: SessionStatus::Running,
        started_at: clock.now(),
        updated_at: clock.now(),
        agent_plugin: "claude".to_string(),
        tracker_plugin: "json".to_string(),
        epic_id: None,
        prd_path: None,
        sandbox: None,
    }
}

fn write_session(store: &SessionStore<FakeClock>, cwd: &std::path::Path, clock: &FakeClock) {
    let tasks = [Task::new("a", "first")];
    let mut session = PersistedSession::new(
        "c0ffee00-0000-4000-8000-000000000001",
        "claude",
        None,
        TrackerState {
            plugin: "json".to_string(),
            epic_id: None,
            prd_path: None,
            total_tasks: 1,
            tasks: tasks.iter().map(TaskSnapshot::from).collect(),
        },
        0,
        cwd.to_path_buf(),
        clock.now(),
    );
    store.save(&mut session).unwrap();
}

#[test]
fn cleanup_stale_removes_only_the_dead_cwd() {
    let config_dir = tempdir().unwrap();
    let cwd1 = tempdir().unwrap();
    let cwd2 = tempdir().unwrap();
    let clock = FakeClock::fixed();

    let store = SessionStore::new(clock.clone());
    let registry = SessionRegistry::open(
        config_dir.path().join(REGISTRY_FILE_NAME),
        clock.clone(),
    );

    // Both sessions registered; only cwd1 still has its session file.
    write_session(&store, cwd1.path(), &clock);
    registry
        .register(entry("s-1", cwd1.path().to_path_buf(), &clock))
        .unwrap();
    registry
        .register(entry("s-2", cwd2.path().to_path_buf(), &clock))
        .unwrap();

    let removed = registry.cleanup_stale(|cwd| store.has(cwd)).unwrap();
    assert_eq!(removed, 1);

    let remaining = registry.list(ListFilter::All).unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].session_id, "s-1");
    assert_eq!(remaining[0].cwd, cwd1.path());
}

#[test]
fn get_by_cwd_tracks_resumability_exactly() {
    let config_dir = tempdir().unwrap();
    let cwd = tempdir().unwrap();
    let clock = FakeClock::fixed();
    let registry = SessionRegistry::open(
        config_dir.path().join(REGISTRY_FILE_NAME),
        clock.clone(),
    );

    // No entry: nothing to resume.
    assert!(registry.get_by_cwd(cwd.path()).unwrap().is_none());

    registry
        .register(entry("s-1", cwd.path().to_path_buf(), &clock))
        .unwrap();
    assert!(registry.get_by_cwd(cwd.path()).unwrap().is_some());

    // A terminal status makes the cwd free again.
    registry
        .update_status("s-1", SessionStatus::Failed)
        .unwrap();
    assert!(registry.get_by_cwd(cwd.path()).unwrap().is_none());

    // Interrupted is resumable.
    registry
        .update_status("s-1", SessionStatus::Interrupted)
        .unwrap();
    assert_eq!(
        registry.get_by_cwd(cwd.path()).unwrap().unwrap().session_id,
        "s-1"
    );
}
