//! Configuration snapshot and parameter stores

mod common;

use parkgate_core::config::{FileParameterStore, GateConfig, CONFIG_FILE_NAME};
use parkgate_core::demo::MemoryStore;
use parkgate_core::orchestrator::TicketNumbering;
use parkgate_core::store::ParameterStore;
use pretty_assertions::assert_eq;
use std::fs;
use tempfile::TempDir;

#[test]
fn test_save_and_load_round_trip() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join(CONFIG_FILE_NAME);

    let mut config = GateConfig::default();
    config.serial.port_name = "/dev/ttyACM0".to_string();
    config.anpr.host = "192.168.1.50".to_string();
    config.anpr.plate_read_delay_ms = 2500;
    config.relay.entry_command = "A1ON".to_string();
    config.relay.exit_command = "A2ON".to_string();
    config.ticket.numbering = TicketNumbering::Optimistic;
    config.save(&path).unwrap();

    assert_eq!(GateConfig::load(&path).unwrap(), config);
}

#[test]
fn test_missing_file_gives_defaults() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join(CONFIG_FILE_NAME);
    assert!(GateConfig::load(&path).is_err());
    assert_eq!(GateConfig::load_or_default(&path).unwrap(), GateConfig::default());
}

#[test]
fn test_malformed_file_is_rejected() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join(CONFIG_FILE_NAME);
    fs::write(&path, "{ not json").unwrap();
    assert!(GateConfig::load_or_default(&path).is_err());
}

#[test]
fn test_default_path_ends_with_file_name() {
    if let Ok(path) = GateConfig::default_path() {
        assert!(path.ends_with(format!("parkgate/{}", CONFIG_FILE_NAME)));
    }
}

#[tokio::test]
async fn test_file_store_rereads_on_every_load() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join(CONFIG_FILE_NAME);
    let store = FileParameterStore::new(&path);

    assert_eq!(store.load().await.unwrap(), GateConfig::default());

    fs::write(&path, r#"{"printer":{"name":"EPSON"}}"#).unwrap();
    let config = store.load().await.unwrap();
    assert_eq!(config.printer.name, "EPSON");
    assert_eq!(config.ticket.access_label, "A1");

    fs::write(&path, "[]").unwrap();
    assert!(store.load().await.is_err());
}

#[tokio::test]
async fn test_memory_store_serves_snapshot() {
    let store = MemoryStore::new();
    let mut config = GateConfig::default();
    config.anpr.enabled = false;
    store.set_config(config.clone());
    assert_eq!(store.load().await.unwrap(), config);

    store.set_unavailable(true);
    assert!(store.load().await.is_err());
}
