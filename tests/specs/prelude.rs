//! Shared helpers for the behavioral specs.

use ralph_adapters::{FakeAgentAdapter, FakeTracker};
use ralph_core::{
    Clock, EngineState, EngineStatus, FakeClock, SequentialIdGen, SystemClock, Task, UuidIdGen,
};
use ralph_engine::{Engine, EngineConfig, SessionPersistence};
use ralph_remote::{ConfigPaths, RemoteServer, ServerTuning, TokenStore};
use ralph_storage::{
    PersistedSession, RegistryEntry, SessionRegistry, SessionStatus, SessionStore, TaskSnapshot,
    TrackerState, REGISTRY_FILE_NAME,
};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

pub const SESSION_ID: &str = "3f8e7a10-aaaa-bbbb-cccc-000000000001";

/// An engine wired to real session/registry files in temp dirs.
pub struct EngineHarness {
    pub engine: Engine<FakeTracker>,
    pub tracker: FakeTracker,
    pub agents: FakeAgentAdapter,
    pub store: SessionStore<FakeClock>,
    pub registry: SessionRegistry<FakeClock>,
    pub work: TempDir,
    _config_dir: TempDir,
}

pub fn engine_config() -> EngineConfig {
    EngineConfig {
        iteration_delay: Duration::ZERO,
        ..EngineConfig::default()
    }
}

pub fn persisted_engine(tasks: Vec<Task>, config: EngineConfig) -> EngineHarness {
    let work = TempDir::new().unwrap();
    let config_dir = TempDir::new().unwrap();
    let clock = FakeClock::fixed();
    let agents = FakeAgentAdapter::new();
    let tracker = FakeTracker::new(tasks.clone());

    let store = SessionStore::new(clock.clone());
    let registry = SessionRegistry::open(
        config_dir.path().join(REGISTRY_FILE_NAME),
        clock.clone(),
    );

    let session = PersistedSession::new(
        SESSION_ID,
        "fake",
        None,
        TrackerState {
            plugin: "fake".to_string(),
            epic_id: None,
            prd_path: None,
            total_tasks: tasks.len() as u32,
            tasks: tasks.iter().map(TaskSnapshot::from).collect(),
        },
        config.max_iterations,
        work.path().to_path_buf(),
        clock.now(),
    );
    registry
        .register(RegistryEntry {
            session_id: SESSION_ID.to_string(),
            cwd: work.path().to_path_buf(),
            status: SessionStatus::Running,
            started_at: clock.now(),
            updated_at: clock.now(),
            agent_plugin: "fake".to_string(),
            tracker_plugin: "fake".to_string(),
            epic_id: None,
            prd_path: None,
            sandbox: None,
        })
        .unwrap();

    let persistence = SessionPersistence::new(
        store.clone(),
        registry.clone(),
        session,
        clock.clone(),
    );
    let engine = Engine::new(
        agents.clone(),
        tracker.clone(),
        clock.clone(),
        SequentialIdGen::new("agent"),
        config,
        Some(persistence),
    );

    EngineHarness {
        engine,
        tracker,
        agents,
        store,
        registry,
        work,
        _config_dir: config_dir,
    }
}

/// Poll until the engine satisfies `pred` (or panic after ~10s).
pub async fn wait_for(engine: &Engine<FakeTracker>, pred: impl Fn(&EngineState) -> bool) {
    for _ in 0..1_000 {
        if pred(&engine.snapshot()) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("engine never reached expected state: {:?}", engine.snapshot());
}

pub async fn wait_idle(engine: &Engine<FakeTracker>) {
    wait_for(engine, |s| s.status == EngineStatus::Idle).await;
}

/// A live server over loopback wired to a real engine on fakes.
pub struct RemoteHarness {
    pub server: RemoteServer<Engine<FakeTracker>, SystemClock>,
    pub engine: Arc<Engine<FakeTracker>>,
    pub url: String,
    pub token: String,
    pub addr: SocketAddr,
    pub tokens_path: PathBuf,
    pub home: TempDir,
    pub remote_cwd: TempDir,
    _token_dir: TempDir,
}

pub async fn remote_harness(tasks: Vec<Task>) -> RemoteHarness {
    let agents = FakeAgentAdapter::new();
    let tracker = FakeTracker::new(tasks);
    let engine = Arc::new(Engine::new(
        agents,
        tracker,
        SystemClock,
        UuidIdGen,
        engine_config(),
        None,
    ));

    let token_dir = TempDir::new().unwrap();
    let home = TempDir::new().unwrap();
    let remote_cwd = TempDir::new().unwrap();
    let tokens_path = token_dir.path().join("server-token.json");
    let tokens = Arc::new(
        TokenStore::load_or_generate(tokens_path.clone(), SystemClock, false).unwrap(),
    );
    let token = tokens.server_token().token.clone();

    let server = bind_server(
        "127.0.0.1:0".to_string(),
        Arc::clone(&engine),
        tokens,
        home.path(),
        remote_cwd.path(),
    )
    .await;
    let addr = server.local_addr();

    RemoteHarness {
        url: format!("ws://{addr}"),
        server,
        engine,
        token,
        addr,
        tokens_path,
        home,
        remote_cwd,
        _token_dir: token_dir,
    }
}

pub async fn bind_server(
    addr: String,
    engine: Arc<Engine<FakeTracker>>,
    tokens: Arc<TokenStore<SystemClock>>,
    home: &std::path::Path,
    remote_cwd: &std::path::Path,
) -> RemoteServer<Engine<FakeTracker>, SystemClock> {
    RemoteServer::bind(
        addr,
        engine,
        tokens,
        ConfigPaths::resolve(home, remote_cwd),
        ServerTuning::default(),
        SystemClock,
    )
    .await
    .unwrap()
}
