use std::time::Duration;

use serial_test::serial;
use voicelab_core::SupervisorConfig;

#[test]
#[serial]
fn default_reads_environment_overrides() {
    let dir = tempfile::tempdir().unwrap();
    std::env::set_var("VOICELAB_DATA_DIR", dir.path());
    std::env::set_var("VOICELAB_WORKER_BIN", "/opt/voicelab/worker");
    std::env::set_var("VOICELAB_PORT_MIN", "21000");
    std::env::set_var("VOICELAB_STARTUP_TIMEOUT_MS", "1500");

    let cfg = SupervisorConfig::default();

    std::env::remove_var("VOICELAB_DATA_DIR");
    std::env::remove_var("VOICELAB_WORKER_BIN");
    std::env::remove_var("VOICELAB_PORT_MIN");
    std::env::remove_var("VOICELAB_STARTUP_TIMEOUT_MS");

    assert_eq!(cfg.data_dir, dir.path());
    assert_eq!(cfg.log_path, dir.path().join("logs").join("worker.log"));
    assert_eq!(
        cfg.env.get("HF_HOME").map(String::as_str),
        Some(dir.path().join("cache").to_str().unwrap())
    );
    assert_eq!(cfg.candidates[0].program.to_str(), Some("/opt/voicelab/worker"));
    assert_eq!(cfg.port_min, 21_000);
    assert_eq!(cfg.port_max, 40_000);
    assert_eq!(cfg.startup_timeout, Duration::from_millis(1500));
}

#[test]
#[serial]
fn unparsable_values_fall_back_to_defaults() {
    std::env::set_var("VOICELAB_PORT_MAX", "lots");
    let cfg = SupervisorConfig::default();
    std::env::remove_var("VOICELAB_PORT_MAX");

    assert_eq!(cfg.port_max, 40_000);
    assert_eq!(cfg.shutdown_grace, Duration::from_secs(5));
    assert_eq!(cfg.host, "127.0.0.1");
}
