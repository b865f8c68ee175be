use std::path::PathBuf;
use std::time::Duration;

use serial_test::serial;
use voicelab_shell::config::{DEFAULT_LOG_TAIL_LINES, DEFAULT_STARTUP_BUDGET};
use voicelab_shell::ShellConfig;

#[test]
#[serial]
fn missing_file_keeps_defaults() {
    let dir = tempfile::tempdir().unwrap();
    std::env::set_var("VOICELAB_CONFIG", dir.path().join("absent.toml"));
    let cfg = ShellConfig::load();
    std::env::remove_var("VOICELAB_CONFIG");

    assert_eq!(cfg.startup_budget, DEFAULT_STARTUP_BUDGET);
    assert_eq!(cfg.log_tail_lines, DEFAULT_LOG_TAIL_LINES);
    assert_eq!(cfg.output_dir, cfg.supervisor.data_dir.join("outputs"));
}

#[test]
#[serial]
fn toml_overlay_applies_tables() {
    let dir = tempfile::tempdir().unwrap();
    let data_dir = dir.path().join("data");
    let path = dir.path().join("voicelab.toml");
    std::fs::write(
        &path,
        format!(
            r#"
[worker]
bin = "/usr/bin/python3"
args = ["/srv/worker/worker_main.py"]
data_dir = "{}"
port_min = 25000
port_max = 26000
shutdown_grace_ms = 750

[worker.env]
VOICELAB_DEVICE = "cpu"

[startup]
timeout_ms = 45000
log_tail_lines = 5
"#,
            data_dir.display()
        ),
    )
    .unwrap();

    std::env::set_var("VOICELAB_CONFIG", &path);
    let cfg = ShellConfig::load();
    std::env::remove_var("VOICELAB_CONFIG");

    let sup = &cfg.supervisor;
    assert_eq!(sup.candidates[0].program, PathBuf::from("/usr/bin/python3"));
    assert_eq!(sup.candidates[0].args, vec!["/srv/worker/worker_main.py"]);
    assert!(sup.candidates.len() > 1);
    assert_eq!((sup.port_min, sup.port_max), (25_000, 26_000));
    assert_eq!(sup.shutdown_grace, Duration::from_millis(750));
    assert_eq!(sup.env.get("VOICELAB_DEVICE").map(String::as_str), Some("cpu"));
    assert_eq!(sup.log_path, data_dir.join("logs").join("worker.log"));
    assert_eq!(cfg.output_dir, data_dir.join("outputs"));
    assert_eq!(cfg.startup_budget, Duration::from_secs(45));
    assert_eq!(cfg.log_tail_lines, 5);
}

#[test]
#[serial]
fn explicit_output_dir_wins() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("voicelab.toml");
    std::fs::write(
        &path,
        "[worker]\ndata_dir = \"/tmp/voicelab-data\"\n\n[output]\ndir = \"/tmp/voicelab-out\"\n",
    )
    .unwrap();

    let cfg = ShellConfig::load_from(&path);
    assert_eq!(cfg.output_dir, PathBuf::from("/tmp/voicelab-out"));
    assert_eq!(cfg.supervisor.data_dir, PathBuf::from("/tmp/voicelab-data"));
}

#[test]
#[serial]
fn broken_toml_falls_back_to_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("voicelab.toml");
    std::fs::write(&path, "[startup\ntimeout_ms = ").unwrap();

    let cfg = ShellConfig::load_from(&path);
    assert_eq!(cfg.startup_budget, DEFAULT_STARTUP_BUDGET);
}
