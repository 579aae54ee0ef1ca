// SPDX-License-Identifier: MIT

use super::*;
use chrono::Duration;
use ralph_core::FakeClock;
use tempfile::tempdir;

fn entry(id: &str, cwd: &str, status: SessionStatus, now: DateTime<Utc>) -> RegistryEntry {
    RegistryEntry {
        session_id: id.to_string(),
        cwd: PathBuf::from(cwd),
        status,
        started_at: now,
        updated_at: now,
        agent_plugin: "claude".to_string(),
        tracker_plugin: "fake".to_string(),
        epic_id: None,
        prd_path: None,
        sandbox: None,
    }
}

fn registry(dir: &Path, clock: FakeClock) -> SessionRegistry<FakeClock> {
    SessionRegistry::open(dir.join(REGISTRY_FILE_NAME), clock)
}

#[test]
fn register_then_get_by_id() {
    let dir = tempdir().unwrap();
    let clock = FakeClock::fixed();
    let reg = registry(dir.path(), clock.clone());

    reg.register(entry("s-1", "/w1", SessionStatus::Running, clock.now()))
        .unwrap();

    let found = reg.get_by_id("s-1").unwrap().unwrap();
    assert_eq!(found.cwd, PathBuf::from("/w1"));
    assert!(reg.get_by_id("s-2").unwrap().is_none());
}

#[test]
fn register_replaces_by_id() {
    let dir = tempdir().unwrap();
    let clock = FakeClock::fixed();
    let reg = registry(dir.path(), clock.clone());

    reg.register(entry("s-1", "/w1", SessionStatus::Running, clock.now()))
        .unwrap();
    reg.register(entry("s-1", "/w2", SessionStatus::Paused, clock.now()))
        .unwrap();

    assert_eq!(reg.list(ListFilter::All).unwrap().len(), 1);
    let found = reg.get_by_id("s-1").unwrap().unwrap();
    assert_eq!(found.cwd, PathBuf::from("/w2"));
    assert_eq!(found.status, SessionStatus::Paused);
}

#[test]
fn unregister_then_get_returns_none() {
    let dir = tempdir().unwrap();
    let clock = FakeClock::fixed();
    let reg = registry(dir.path(), clock.clone());

    let e = entry("s-1", "/w1", SessionStatus::Running, clock.now());
    reg.register(e.clone()).unwrap();
    reg.unregister(&e.session_id).unwrap();
    assert!(reg.get_by_id(&e.session_id).unwrap().is_none());
}

#[test]
fn update_status_is_silent_for_unknown_id() {
    let dir = tempdir().unwrap();
    let clock = FakeClock::fixed();
    let reg = registry(dir.path(), clock.clone());

    reg.update_status("ghost", SessionStatus::Completed).unwrap();
    assert!(reg.list(ListFilter::All).unwrap().is_empty());
}

#[test]
fn update_status_refreshes_updated_at() {
    let dir = tempdir().unwrap();
    let clock = FakeClock::fixed();
    let reg = registry(dir.path(), clock.clone());

    reg.register(entry("s-1", "/w1", SessionStatus::Running, clock.now()))
        .unwrap();
    clock.advance(Duration::seconds(10));
    reg.update_status("s-1", SessionStatus::Paused).unwrap();

    let found = reg.get_by_id("s-1").unwrap().unwrap();
    assert_eq!(found.status, SessionStatus::Paused);
    assert_eq!(found.updated_at, clock.now());
}

#[test]
fn get_by_cwd_returns_newest_resumable() {
    let dir = tempdir().unwrap();
    let clock = FakeClock::fixed();
    let reg = registry(dir.path(), clock.clone());

    reg.register(entry("s-old", "/w1", SessionStatus::Interrupted, clock.now()))
        .unwrap();
    clock.advance(Duration::seconds(60));
    reg.register(entry("s-new", "/w1", SessionStatus::Paused, clock.now()))
        .unwrap();
    reg.register(entry("s-done", "/w1", SessionStatus::Completed, clock.now()))
        .unwrap();
    reg.register(entry("s-other", "/w2", SessionStatus::Running, clock.now()))
        .unwrap();

    let found = reg.get_by_cwd(Path::new("/w1")).unwrap().unwrap();
    assert_eq!(found.session_id, "s-new");

    assert!(reg.get_by_cwd(Path::new("/w3")).unwrap().is_none());
}

#[test]
fn get_by_cwd_ignores_terminal_sessions() {
    let dir = tempdir().unwrap();
    let clock = FakeClock::fixed();
    let reg = registry(dir.path(), clock.clone());

    reg.register(entry("s-1", "/w1", SessionStatus::Failed, clock.now()))
        .unwrap();
    assert!(reg.get_by_cwd(Path::new("/w1")).unwrap().is_none());
}

#[test]
fn list_filters_resumable() {
    let dir = tempdir().unwrap();
    let clock = FakeClock::fixed();
    let reg = registry(dir.path(), clock.clone());

    reg.register(entry("s-1", "/w1", SessionStatus::Running, clock.now()))
        .unwrap();
    reg.register(entry("s-2", "/w2", SessionStatus::Completed, clock.now()))
        .unwrap();

    assert_eq!(reg.list(ListFilter::All).unwrap().len(), 2);
    let resumable = reg.list(ListFilter::Resumable).unwrap();
    assert_eq!(resumable.len(), 1);
    assert_eq!(resumable[0].session_id, "s-1");
}

#[test]
fn find_by_prefix_matches_multiple() {
    let dir = tempdir().unwrap();
    let clock = FakeClock::fixed();
    let reg = registry(dir.path(), clock.clone());

    reg.register(entry("abc-1", "/w1", SessionStatus::Running, clock.now()))
        .unwrap();
    reg.register(entry("abc-2", "/w2", SessionStatus::Running, clock.now()))
        .unwrap();
    reg.register(entry("xyz-1", "/w3", SessionStatus::Running, clock.now()))
        .unwrap();

    let hits = reg.find_by_prefix("abc").unwrap();
    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].session_id, "abc-1");
    assert!(reg.find_by_prefix("zzz").unwrap().is_empty());
}

#[test]
fn cleanup_stale_removes_unoccupied_cwds() {
    let dir = tempdir().unwrap();
    let clock = FakeClock::fixed();
    let reg = registry(dir.path(), clock.clone());

    reg.register(entry("s-1", "/alive", SessionStatus::Running, clock.now()))
        .unwrap();
    reg.register(entry("s-2", "/gone", SessionStatus::Paused, clock.now()))
        .unwrap();

    let removed = reg.cleanup_stale(|cwd| cwd == Path::new("/alive")).unwrap();
    assert_eq!(removed, 1);

    let remaining = reg.list(ListFilter::All).unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].session_id, "s-1");
}

#[test]
fn concurrent_registers_all_land() {
    let dir = tempdir().unwrap();
    let clock = FakeClock::fixed();
    let path = dir.path().join(REGISTRY_FILE_NAME);

    let mut handles = Vec::new();
    for i in 0..8 {
        let reg = SessionRegistry::open(path.clone(), clock.clone());
        let now = clock.now();
        handles.push(std::thread::spawn(move || {
            reg.register(entry(
                &format!("s-{i}"),
                &format!("/w{i}"),
                SessionStatus::Running,
                now,
            ))
            .unwrap();
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    let reg = SessionRegistry::open(path, clock);
    assert_eq!(reg.list(ListFilter::All).unwrap().len(), 8);
}

#[test]
fn corrupt_registry_starts_fresh_with_bak() {
    let dir = tempdir().unwrap();
    let clock = FakeClock::fixed();
    let path = dir.path().join(REGISTRY_FILE_NAME);
    std::fs::write(&path, b"{broken").unwrap();

    let reg = SessionRegistry::open(path.clone(), clock.clone());
    assert!(reg.list(ListFilter::All).unwrap().is_empty());
    assert!(path.with_extension("bak").exists());

    // The registry is usable after recovery.
    reg.register(entry("s-1", "/w1", SessionStatus::Running, clock.now()))
        .unwrap();
    assert_eq!(reg.list(ListFilter::All).unwrap().len(), 1);
}
