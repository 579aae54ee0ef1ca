//! Scenario: pushing over an existing global config backs the old
//! content up and reports whether a restart is needed.

use crate::prelude::*;
use ralph_remote::{ClientError, ClientTuning, ConfigScope, RemoteClient};

#[tokio::test]
async fn overwrite_backs_up_and_reports_restart_need() {
    let h = remote_harness(vec![]).await;
    let (client, _events) = RemoteClient::connect(&h.url, &h.token, ClientTuning::default())
        .await
        .unwrap();

    // Existing global config "X" on the server host.
    let global = h
        .home
        .path()
        .join(".config")
        .join("ralph-tui")
        .join("config.toml");
    std::fs::create_dir_all(global.parent().unwrap()).unwrap();
    std::fs::write(&global, "maxIterations = 1\n").unwrap();

    // Pushing "Y" without overwrite is refused.
    let err = client
        .push_config(ConfigScope::Global, "maxIterations = 2\n".to_string(), false)
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Refused(_)));

    // With overwrite: target holds Y, the backup holds X, and a
    // maxIterations-only change needs no restart.
    let outcome = client
        .push_config(ConfigScope::Global, "maxIterations = 2\n".to_string(), true)
        .await
        .unwrap();
    assert_eq!(
        std::fs::read_to_string(&global).unwrap(),
        "maxIterations = 2\n"
    );
    let backup = outcome.backup_path.unwrap();
    assert!(backup
        .file_name()
        .unwrap()
        .to_string_lossy()
        .contains(".backup."));
    assert_eq!(
        std::fs::read_to_string(&backup).unwrap(),
        "maxIterations = 1\n"
    );
    assert!(!outcome.requires_restart);
    assert!(!outcome.migration_triggered);

    // A port change does require a restart.
    let outcome = client
        .push_config(
            ConfigScope::Global,
            "maxIterations = 2\nport = 9100\n".to_string(),
            true,
        )
        .await
        .unwrap();
    assert!(outcome.requires_restart);

    client.disconnect().await;
    h.server.shutdown();
}
