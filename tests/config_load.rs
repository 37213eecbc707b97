// tests/config_load.rs
use std::fs;

use stream_notifier::config::load_config;
use stream_notifier::{ConfigError, Scheduler, SchedulerCfg};

fn write(dir: &tempfile::TempDir, name: &str, body: &str) -> std::path::PathBuf {
    let p = dir.path().join(name);
    fs::write(&p, body).unwrap();
    p
}

#[test]
fn yaml_config_builds_a_scheduler() {
    let dir = tempfile::tempdir().unwrap();
    let state = write(&dir, "state.yml", "id: 1\nshould_push: true\n");
    let cfg_path = write(
        &dir,
        "config.yml",
        &format!(
            r#"
push methods:
  tg:
    type: telegram
    token: "123:abc"
    chat id: [-1001, -1002]
    skip verify: true
  broken:
    type: carrier-pigeon
local:
  type: debug
  file: {}
  report: [tg]
  push rules:
    - contents:
        tg: "debug {{id}}"
"#,
            state.display()
        ),
    );

    let cfg = load_config(&cfg_path).unwrap();
    let opts = SchedulerCfg {
        cache_dir: dir.path().join("cache"),
        test_mode: true,
        ..Default::default()
    };
    let scheduler = Scheduler::from_config(&cfg, &opts).unwrap();
    assert_eq!(scheduler.sources().collect::<Vec<_>>(), vec!["local"]);
    assert_eq!(scheduler.mux().names().collect::<Vec<_>>(), vec!["tg"]);
    assert!(scheduler.mux().is_test_mode());
}

#[test]
fn unknown_source_type_is_fatal_and_lists_valid_types() {
    let dir = tempfile::tempdir().unwrap();
    let cfg_path = write(&dir, "config.json", r#"{"x": {"type": "mastodon"}}"#);
    let cfg = load_config(&cfg_path).unwrap();

    let err = match Scheduler::from_config(&cfg, &SchedulerCfg::default()) {
        Ok(_) => panic!("unknown source type must fail"),
        Err(e) => e,
    };
    let msg = format!("{err:#}");
    assert!(msg.contains("mastodon"));
    assert!(msg.contains("debug, twitch, youtube, twitter"));
    assert!(matches!(
        err.downcast_ref::<ConfigError>(),
        Some(ConfigError::UnknownType { .. })
    ));
}

#[test]
fn toml_config_is_read_by_extension() {
    let dir = tempfile::tempdir().unwrap();
    let cfg_path = write(
        &dir,
        "config.toml",
        r##"
[push_methods.hook]
type = "slack"
webhook_url = "https://hooks.slack.invalid/x"

[yt]
type = "youtube"
client_id = "id"
client_secret = "secret"
refresh_token = "token"
color = "#ff0000"
"##,
    );
    let cfg = load_config(&cfg_path).unwrap();
    assert_eq!(cfg.push_methods["hook"].kind, "slack");
    assert_eq!(cfg.sources["yt"].color(), Some(0xff0000));
}

#[test]
fn malformed_yaml_is_a_parse_error() {
    let dir = tempfile::tempdir().unwrap();
    let cfg_path = write(&dir, "config.yml", "local: [unterminated");
    assert!(matches!(
        load_config(&cfg_path).unwrap_err(),
        ConfigError::Parse { format: "YAML", .. }
    ));
}
