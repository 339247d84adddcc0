//! Tests for config file resolution and TOML loading
//!
//! Uses serial_test because several tests manipulate process environment
//! variables.

use mv_common::config::{env_override, load_toml, resolve_config_path, LoggingConfig};
use serde::Deserialize;
use serial_test::serial;
use std::env;
use std::io::Write;
use std::path::Path;

#[derive(Debug, Default, Deserialize, PartialEq)]
struct SampleConfig {
    #[serde(default)]
    port: u16,
    #[serde(default)]
    logging: LoggingConfig,
}

#[test]
#[serial]
fn test_cli_argument_wins_over_env() {
    env::set_var("MV_TEST_CONFIG", "/from/env.toml");

    let resolved = resolve_config_path(
        Some(Path::new("/from/cli.toml")),
        "MV_TEST_CONFIG",
        "does-not-exist.toml",
    );
    assert_eq!(resolved.as_deref(), Some(Path::new("/from/cli.toml")));

    env::remove_var("MV_TEST_CONFIG");
}

#[test]
#[serial]
fn test_env_used_when_no_cli_argument() {
    env::set_var("MV_TEST_CONFIG", "/from/env.toml");

    let resolved = resolve_config_path(None, "MV_TEST_CONFIG", "does-not-exist.toml");
    assert_eq!(resolved.as_deref(), Some(Path::new("/from/env.toml")));

    env::remove_var("MV_TEST_CONFIG");
}

#[test]
#[serial]
fn test_empty_env_value_is_ignored() {
    env::set_var("MV_TEST_EMPTY", "   ");
    assert_eq!(env_override("MV_TEST_EMPTY"), None);
    env::remove_var("MV_TEST_EMPTY");
}

#[test]
fn test_missing_file_falls_back_to_defaults() {
    let config: SampleConfig = load_toml(None).unwrap();
    assert_eq!(config, SampleConfig::default());
    assert_eq!(config.logging.level, "info");
}

#[test]
fn test_load_toml_reads_values() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "port = 8080\n\n[logging]\nlevel = \"debug\"").unwrap();

    let config: SampleConfig = load_toml(Some(file.path())).unwrap();
    assert_eq!(config.port, 8080);
    assert_eq!(config.logging.level, "debug");
}

#[test]
fn test_explicit_missing_file_is_error() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("absent.toml");

    let result: mv_common::Result<SampleConfig> = load_toml(Some(&missing));
    assert!(matches!(result, Err(mv_common::Error::Config(_))));
}

#[test]
fn test_malformed_file_is_error() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "port = \"not a number\"").unwrap();

    let result: mv_common::Result<SampleConfig> = load_toml(Some(file.path()));
    assert!(matches!(result, Err(mv_common::Error::Config(_))));
}
