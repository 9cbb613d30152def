//! Configuration loading and engine construction from configuration.

use pretty_assertions::assert_eq;
use rtxconf::config::EngineConfig;
use rtxconf::sequence::SequencePolicy;
use rtxconf::telemetry::config::{LogFormat, LogLevel};
use rtxconf::Engine;
use serial_test::serial;
use std::fs;
use tempfile::TempDir;

// ============================================================================
// File Formats
// ============================================================================

#[test]
fn test_load_toml() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("rtxconf.toml");
    fs::write(
        &path,
        r#"
[sequence]
default_start = 200
default_step = 5

[logging]
level = "debug"
format = "json"
"#,
    )
    .unwrap();

    let config = EngineConfig::from_file(&path).unwrap();
    assert_eq!(config.sequence.default_start, 200);
    assert_eq!(config.sequence.default_step, 5);
    assert_eq!(config.sequence.max, 65535);
    assert_eq!(config.logging.level, LogLevel::Debug);
    assert_eq!(config.logging.format, LogFormat::Json);
}

#[test]
fn test_load_yaml() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("rtxconf.yaml");
    fs::write(
        &path,
        "preprocessor:\n  extra_command_heads: [pp, schedule]\nsequence:\n  max: 2000\n",
    )
    .unwrap();

    let config = EngineConfig::from_file(&path).unwrap();
    assert_eq!(config.preprocessor.extra_command_heads, vec!["pp", "schedule"]);
    assert_eq!(config.sequence.max, 2000);
    assert_eq!(config.sequence.default_start, 10);
}

#[test]
fn test_load_json() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("rtxconf.json");
    fs::write(&path, r#"{"catalog": {"path": "/etc/rtxconf/catalog.yaml"}}"#).unwrap();

    let config = EngineConfig::from_file(&path).unwrap();
    assert_eq!(
        config.catalog.path.as_deref(),
        Some(std::path::Path::new("/etc/rtxconf/catalog.yaml"))
    );
}

#[test]
fn test_invalid_file_is_an_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("rtxconf.toml");
    fs::write(&path, "[sequence\ndefault_start = ").unwrap();
    assert!(EngineConfig::from_file(&path).is_err());
}

// ============================================================================
// Environment Overrides
// ============================================================================

#[test]
#[serial]
fn test_env_overrides_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("rtxconf.toml");
    fs::write(&path, "[sequence]\ndefault_start = 200\n").unwrap();

    std::env::set_var("RTXCONF_SEQUENCE_START", "1000");
    std::env::set_var("RTXCONF_LOG_LEVEL", "info");
    let config = EngineConfig::load(Some(&path));
    std::env::remove_var("RTXCONF_SEQUENCE_START");
    std::env::remove_var("RTXCONF_LOG_LEVEL");

    let config = config.unwrap();
    assert_eq!(config.sequence.default_start, 1000);
    assert_eq!(config.logging.level, LogLevel::Info);
}

#[test]
#[serial]
fn test_unparseable_env_value_is_ignored() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("rtxconf.toml");
    fs::write(&path, "[sequence]\ndefault_step = 20\n").unwrap();

    std::env::set_var("RTXCONF_SEQUENCE_STEP", "twenty");
    let config = EngineConfig::load(Some(&path));
    std::env::remove_var("RTXCONF_SEQUENCE_STEP");

    assert_eq!(config.unwrap().sequence.default_step, 20);
}

#[test]
#[serial]
fn test_catalog_path_from_env() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("rtxconf.toml");
    fs::write(&path, "").unwrap();

    std::env::set_var("RTXCONF_CATALOG", "/srv/catalog.yaml");
    let config = EngineConfig::load(Some(&path));
    std::env::remove_var("RTXCONF_CATALOG");

    assert_eq!(
        config.unwrap().catalog.path.as_deref(),
        Some(std::path::Path::new("/srv/catalog.yaml"))
    );
}

// ============================================================================
// Engine From Config
// ============================================================================

#[test]
fn test_engine_uses_sequence_settings() {
    let mut config = EngineConfig::default();
    config.sequence.max = 500;
    config.sequence.default_start = 490;
    let engine = Engine::from_config(&config).unwrap();
    assert_eq!(engine.allocator().max(), 500);

    let policy = SequencePolicy::from_config(&config.sequence);
    assert_eq!(engine.allocate_sequence(&policy, 1).unwrap(), vec![490]);
    assert!(engine.allocate_sequence(&policy, 2).is_err());
}

#[test]
fn test_engine_with_missing_catalog_fails() {
    let dir = TempDir::new().unwrap();
    let mut config = EngineConfig::default();
    config.catalog.path = Some(dir.path().join("missing.yaml"));
    assert!(Engine::from_config(&config).is_err());
}
