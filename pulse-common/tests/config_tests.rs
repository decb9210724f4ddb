//! Unit tests for configuration and graceful degradation
//!
//! Tests the implementation of:
//! - Root folder priority: CLI > PULSE_ROOT_FOLDER > PULSE_ROOT > TOML > default
//! - Missing / invalid TOML files do not abort loading
//! - TOML round-trip through write_toml_config
//! - Root folder initializer creates the directory and names its files
//!
//! Note: Uses serial_test crate to prevent ENV variable race conditions.
//! Tests that manipulate PULSE_* variables are marked with #[serial].

use pulse_common::config::{
    load_toml_config, load_toml_from, log_filter, write_toml_config, CompiledDefaults,
    LoggingConfig, ProviderSection, RootFolderInitializer, RootFolderResolver, TomlConfig,
    WebhookConfig, CONFIG_FILE_ENV, DEFAULT_BIND, DEFAULT_MAX_BODY_BYTES, ROOT_ENV,
    ROOT_FOLDER_ENV,
};
use serial_test::serial;
use std::env;
use std::path::PathBuf;
use tempfile::TempDir;

fn clear_root_env() {
    env::remove_var(ROOT_FOLDER_ENV);
    env::remove_var(ROOT_ENV);
}

#[test]
fn test_compiled_defaults() {
    let defaults = CompiledDefaults::for_current_platform();
    assert!(!defaults.root_folder.as_os_str().is_empty());
    assert!(defaults.root_folder.ends_with("pulse") || defaults.root_folder.ends_with("pulse_data"));
    assert_eq!(TomlConfig::default().bind_address(), DEFAULT_BIND);
    assert_eq!(defaults.bind, DEFAULT_BIND);
}

#[test]
#[serial]
fn test_resolver_with_no_overrides_uses_default() {
    clear_root_env();

    let root = RootFolderResolver::new("test-module").resolve();
    assert_eq!(root, CompiledDefaults::for_current_platform().root_folder);
}

#[test]
#[serial]
fn test_resolver_cli_arg_wins() {
    clear_root_env();
    env::set_var(ROOT_FOLDER_ENV, "/tmp/pulse-env");

    let root = RootFolderResolver::new("test-module")
        .with_cli_arg(Some(PathBuf::from("/tmp/pulse-cli")))
        .resolve();
    assert_eq!(root, PathBuf::from("/tmp/pulse-cli"));

    clear_root_env();
}

#[test]
#[serial]
fn test_resolver_env_priority() {
    clear_root_env();
    env::set_var(ROOT_FOLDER_ENV, "/tmp/pulse-priority-1");
    env::set_var(ROOT_ENV, "/tmp/pulse-priority-2");

    let root = RootFolderResolver::new("test-module").resolve();
    assert_eq!(root, PathBuf::from("/tmp/pulse-priority-1"));

    env::remove_var(ROOT_FOLDER_ENV);
    let root = RootFolderResolver::new("test-module").resolve();
    assert_eq!(root, PathBuf::from("/tmp/pulse-priority-2"));

    clear_root_env();
}

#[test]
#[serial]
fn test_resolver_toml_below_env() {
    clear_root_env();
    let toml = TomlConfig {
        root_folder: Some(PathBuf::from("/tmp/pulse-toml")),
        ..Default::default()
    };

    let root = RootFolderResolver::new("test-module").with_toml(&toml).resolve();
    assert_eq!(root, PathBuf::from("/tmp/pulse-toml"));

    env::set_var(ROOT_ENV, "/tmp/pulse-env-root");
    let root = RootFolderResolver::new("test-module").with_toml(&toml).resolve();
    assert_eq!(root, PathBuf::from("/tmp/pulse-env-root"));

    clear_root_env();
}

#[test]
fn test_toml_parsing_with_partial_tables() {
    let config: TomlConfig = toml::from_str(
        r#"
        bind = "0.0.0.0:8080"

        [webhook]
        secret = "shh"
        "#,
    )
    .unwrap();

    assert_eq!(config.bind_address(), "0.0.0.0:8080");
    assert_eq!(config.webhook.secret.as_deref(), Some("shh"));
    assert_eq!(config.logging, LoggingConfig::default());
    assert!(config.capture_enabled());
    assert_eq!(config.body_limit(), DEFAULT_MAX_BODY_BYTES);
}

#[test]
fn test_empty_toml_is_all_defaults() {
    let config: TomlConfig = toml::from_str("").unwrap();
    assert_eq!(config, TomlConfig::default());
    assert_eq!(config.bind_address(), DEFAULT_BIND);
}

#[test]
fn test_write_then_load_round_trip() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("conf").join("pulse.toml");
    let config = TomlConfig {
        root_folder: Some(PathBuf::from("/srv/pulse")),
        bind: Some("127.0.0.1:9999".into()),
        capture_events: Some(false),
        max_body_bytes: Some(1024),
        logging: LoggingConfig {
            level: "debug".into(),
        },
        webhook: WebhookConfig {
            secret: Some("topsecret".into()),
            url: Some("https://example.com/api/webhook".into()),
        },
        provider: ProviderSection {
            base_url: Some("https://sandbox.example.com".into()),
            client_id: Some("client".into()),
            client_secret: Some("secret".into()),
        },
    };

    write_toml_config(&config, &path).unwrap();
    assert_eq!(load_toml_from(&path).unwrap(), config);
    assert!(!path.with_extension("toml.tmp").exists());
}

#[test]
fn test_load_invalid_toml_is_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("pulse.toml");
    std::fs::write(&path, "bind = [unterminated").unwrap();
    assert!(load_toml_from(&path).is_err());
}

#[test]
#[serial]
fn test_load_toml_config_degrades_gracefully() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("pulse.toml");

    // Missing file
    env::set_var(CONFIG_FILE_ENV, &path);
    assert_eq!(load_toml_config(), TomlConfig::default());

    // Invalid file
    std::fs::write(&path, "logging = 3 = 4").unwrap();
    assert_eq!(load_toml_config(), TomlConfig::default());

    // Valid file
    std::fs::write(&path, "capture_events = false\n").unwrap();
    assert!(!load_toml_config().capture_enabled());

    env::remove_var(CONFIG_FILE_ENV);
}

#[test]
#[serial]
fn test_log_filter_prefers_rust_log() {
    let config = TomlConfig {
        logging: LoggingConfig {
            level: "warn".into(),
        },
        ..Default::default()
    };

    env::remove_var("RUST_LOG");
    assert_eq!(log_filter(&config), "warn");

    env::set_var("RUST_LOG", "pulse_hook=trace");
    assert_eq!(log_filter(&config), "pulse_hook=trace");
    env::remove_var("RUST_LOG");
}

#[test]
fn test_initializer_creates_directory() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("a").join("b");
    let initializer = RootFolderInitializer::new(root.clone());

    initializer.ensure_directory_exists().unwrap();
    assert!(root.is_dir());
    // Idempotent
    initializer.ensure_directory_exists().unwrap();

    assert_eq!(initializer.aggregate_path(), root.join("aggregates.json"));
    assert_eq!(initializer.capture_log_path(), root.join("webhook-events.jsonl"));
    assert_eq!(initializer.settings_path(), root.join("webhook-settings.json"));
}
