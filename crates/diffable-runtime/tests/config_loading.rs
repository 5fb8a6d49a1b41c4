#![forbid(unsafe_code)]

//! Loading `ControllerConfig` from TOML and JSON.
//!
//! Run:
//!   cargo test -p diffable-runtime --features controller-config --test config_loading

use std::io::Write;

use diffable_runtime::{ConfigError, ControllerConfig};

#[test]
fn partial_toml_keeps_defaults() {
    let config = ControllerConfig::from_toml_str("full_reload_threshold = 250\n").unwrap();
    assert_eq!(config.full_reload_threshold, Some(250));
    assert!(config.animate_by_default);
    assert_eq!(config.notice_capacity, ControllerConfig::default().notice_capacity);
}

#[test]
fn toml_file_round_trip() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        "animate_by_default = false\nfull_reload_ratio = 0.4\nforce_full_reload = true"
    )
    .unwrap();

    let config = ControllerConfig::from_toml_file(file.path()).unwrap();
    assert!(!config.animate_by_default);
    assert_eq!(config.full_reload_ratio, Some(0.4));
    assert!(config.force_full_reload);
}

#[test]
fn json_file_loads() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("diffable.json");
    std::fs::write(&path, r#"{ "notice_capacity": 8, "full_reload_threshold": 32 }"#).unwrap();

    let config = ControllerConfig::from_json_file(&path).unwrap();
    assert_eq!(config.notice_capacity, 8);
    assert_eq!(config.full_reload_threshold, Some(32));
    assert_eq!(config.full_reload_ratio, None);
}

#[test]
fn serialized_default_reloads_identically() {
    let defaults = ControllerConfig::default();
    let json = serde_json::to_string(&defaults).unwrap();
    assert_eq!(ControllerConfig::from_json_str(&json).unwrap(), defaults);
}

#[test]
fn invalid_values_are_rejected_on_load() {
    let err = ControllerConfig::from_toml_str("full_reload_threshold = 0\nnotice_capacity = 0")
        .unwrap_err();
    match err {
        ConfigError::Validation(problems) => assert_eq!(problems.len(), 2),
        other => panic!("expected validation error, got {other}"),
    }
}

#[test]
fn malformed_input_reports_parser() {
    assert!(matches!(
        ControllerConfig::from_toml_str("full_reload_threshold = \"many\""),
        Err(ConfigError::Toml(_))
    ));
    assert!(matches!(
        ControllerConfig::from_json_str("{ not json"),
        Err(ConfigError::Json(_))
    ));
}

#[test]
fn missing_file_is_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = ControllerConfig::from_toml_file(dir.path().join("absent.toml")).unwrap_err();
    assert!(matches!(err, ConfigError::Io(_)));
}
