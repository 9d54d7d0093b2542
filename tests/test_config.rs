use std::time::Duration;

use warden::config::{Config, LISTEN_ENV, StoreBackend};

#[test]
fn test_config_defaults() {
    let cfg = Config::default();
    assert_eq!(cfg.server.listen_addr, "127.0.0.1:9006");
    assert_eq!(cfg.server.tick(), Duration::from_secs(5));
    assert_eq!(cfg.server.idle_timeout(), Duration::from_secs(25));
    assert_eq!(cfg.server.write_idle_timeout(), Duration::from_secs(15));
    assert_eq!(cfg.workers.threads, 8);
    assert_eq!(cfg.workers.max_requests, 10000);
    assert_eq!(cfg.store.backend, StoreBackend::Memory);
    assert!(cfg.validate().is_ok());
}

#[test]
fn test_config_empty_yaml_is_default() {
    let cfg = Config::from_yaml("  \n").unwrap();
    assert_eq!(cfg.server.listen_addr, Config::default().server.listen_addr);
}

#[test]
fn test_config_partial_yaml_keeps_other_defaults() {
    let cfg = Config::from_yaml(
        "server:\n  listen_addr: 0.0.0.0:8080\n  tick_secs: 2\nworkers:\n  threads: 2\n",
    )
    .unwrap();
    assert_eq!(cfg.server.listen_addr, "0.0.0.0:8080");
    assert_eq!(cfg.server.idle_timeout(), Duration::from_secs(10));
    assert_eq!(cfg.server.max_events, 10000);
    assert_eq!(cfg.workers.threads, 2);
    assert_eq!(cfg.workers.max_requests, 10000);
}

#[test]
fn test_config_file_backend() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("warden.yaml");
    std::fs::write(
        &path,
        "store:\n  backend: file\n  path: /var/lib/warden/users.yaml\n  pool_size: 4\n",
    )
    .unwrap();

    let cfg = Config::from_file(&path).unwrap();
    assert_eq!(cfg.store.backend, StoreBackend::File);
    assert_eq!(cfg.store.pool_size, 4);
    assert!(cfg.validate().is_ok());
}

#[test]
fn test_config_validate_rejects_bad_values() {
    let mut cfg = Config::default();
    cfg.workers.threads = 0;
    assert!(cfg.validate().is_err());

    let mut cfg = Config::default();
    cfg.store.backend = StoreBackend::File;
    assert!(cfg.validate().is_err());

    let mut cfg = Config::default();
    cfg.server.listen_addr = "not an address".to_string();
    assert!(cfg.validate().is_err());
}

#[test]
fn test_config_unknown_backend_is_an_error() {
    assert!(Config::from_yaml("store:\n  backend: postgres\n").is_err());
}

#[test]
fn test_config_override_port() {
    let mut cfg = Config::default();
    cfg.override_port(3000).unwrap();
    assert_eq!(cfg.server.listen_addr, "127.0.0.1:3000");
}

#[test]
fn test_config_listen_from_env() {
    unsafe {
        std::env::set_var(LISTEN_ENV, "0.0.0.0:3000");
    }
    let mut cfg = Config::default();
    cfg.apply_env();
    assert_eq!(cfg.server.listen_addr, "0.0.0.0:3000");
    unsafe {
        std::env::remove_var(LISTEN_ENV);
    }
}
