//! Host configuration file tests
//!
//! Run with: `cargo test -p host --test config_tests`

use host::HostConfig;
use host::backend::BackendKind;
use std::fs;
use tempfile::TempDir;

fn write_config(dir: &TempDir, content: &str) -> std::path::PathBuf {
    let path = dir.path().join("host.toml");
    fs::write(&path, content).unwrap();
    path
}

#[test]
fn test_load_full_file() {
    let dir = TempDir::new().unwrap();
    let path = write_config(
        &dir,
        r#"
[logging]
level = "debug"

[backend]
order = ["libusb0", "libusb1"]

[transfer]
default_timeout_ms = 5000
"#,
    );

    let config = HostConfig::load(Some(path)).unwrap();
    assert_eq!(config.logging.level, "debug");
    assert_eq!(config.backend.order, vec!["libusb0", "libusb1"]);
    assert_eq!(config.transfer.default_timeout_ms, 5000);
}

#[test]
fn test_load_empty_file_gives_defaults() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, "");

    let config = HostConfig::load(Some(path)).unwrap();
    assert_eq!(config.logging.level, "info");
    assert_eq!(config.transfer.default_timeout_ms, 1000);
    assert_eq!(config.backend.order.len(), 3);
}

#[test]
fn test_load_rejects_invalid_values() {
    let dir = TempDir::new().unwrap();

    let path = write_config(&dir, "[logging]\nlevel = \"loud\"\n");
    let err = HostConfig::load(Some(path)).unwrap_err();
    assert!(err.to_string().contains("Invalid log level"));

    let path = write_config(&dir, "[backend]\norder = [\"libusb1\", \"libusb-1.0\"]\n");
    assert!(HostConfig::load(Some(path)).is_err());

    let path = write_config(&dir, "[backend]\norder = [\"winusb\"]\n");
    let err = HostConfig::load(Some(path)).unwrap_err();
    assert!(err.to_string().contains("winusb"));
}

#[test]
fn test_load_malformed_toml() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, "[transfer\ndefault_timeout_ms = ");
    let err = HostConfig::load(Some(path)).unwrap_err();
    assert!(err.to_string().contains("Failed to parse config file"));
}

#[test]
fn test_load_negative_timeout_rejected() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, "[transfer]\ndefault_timeout_ms = -1\n");
    assert!(HostConfig::load(Some(path)).is_err());
}

#[test]
fn test_load_missing_file() {
    let dir = TempDir::new().unwrap();
    let err = HostConfig::load(Some(dir.path().join("absent.toml"))).unwrap_err();
    assert!(err.to_string().contains("Failed to read config file"));
}

#[test]
fn test_save_and_reload() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("dir").join("host.toml");

    let mut config = HostConfig::default();
    config.logging.level = "trace".to_string();
    config.backend.order = vec!["openusb".to_string()];
    config.transfer.default_timeout_ms = 20;
    config.save(&path).unwrap();

    let loaded = HostConfig::load(Some(path)).unwrap();
    assert_eq!(loaded.logging.level, "trace");
    assert_eq!(loaded.backend.order, vec!["openusb"]);
    assert_eq!(loaded.transfer.default_timeout_ms, 20);
}

#[test]
fn test_backend_kinds_follow_order() {
    let mut config = HostConfig::default();
    config.backend.order = vec!["libusb0".to_string(), "openusb".to_string()];
    // The override variable is not set in the test environment
    if std::env::var(host::config::BACKEND_ENV_VAR).is_err() {
        assert_eq!(
            config.backend_kinds(),
            vec![BackendKind::Libusb0, BackendKind::OpenUsb]
        );
    }
}

#[test]
fn test_default_path_location() {
    let path = HostConfig::default_path();
    assert!(path.ends_with("usb-host/host.toml"));
}
