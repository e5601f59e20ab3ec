use std::{env, fs, time::Duration};

use medgate_server::StorageBackend;
use medgate_server::config::LogFormat;
use medgate_server::config::loader::load_config;

#[test]
fn config_parsing_and_env_overrides_and_validation() {
    let dir = tempfile::tempdir().expect("tmp dir");
    let path = dir.path().join("medgate.toml");

    let toml_content = r#"
[server]
host = "127.0.0.1"
port = 8081
read_timeout_ms = 1000
write_timeout_ms = 2000
body_limit_bytes = 1024

[storage]
backend = "memory"

[upstream]
base_url = "http://fhir.example.org/baseR4"
timeout_ms = 3000

[cache]
patient_ttl_secs = 120

[logging]
level = "debug"
format = "text"

[bootstrap]
seed_demo_patients = true
"#;
    fs::write(&path, toml_content).expect("write toml");

    // 1) Valid config parses
    let cfg = load_config(path.to_str()).expect("should parse config");
    assert_eq!(cfg.server.port, 8081);
    assert_eq!(cfg.write_timeout(), Duration::from_secs(2));
    assert_eq!(cfg.storage.backend, StorageBackend::Memory);
    assert_eq!(cfg.upstream.base_url, "http://fhir.example.org/baseR4");
    assert_eq!(cfg.upstream.timeout(), Duration::from_secs(3));
    assert_eq!(cfg.cache.patient_ttl(), Duration::from_secs(120));
    assert!(cfg.cache.enabled);
    assert_eq!(cfg.logging.format, LogFormat::Text);
    assert!(cfg.bootstrap.seed_demo_patients);
    assert!(!cfg.redis.enabled);

    // 2) Env override should win over file
    unsafe {
        env::set_var("MEDGATE__SERVER__PORT", "9090");
        env::set_var("MEDGATE__CACHE__ENABLED", "false");
    }
    let cfg_env = load_config(path.to_str()).expect("should parse config with env overrides");
    assert_eq!(cfg_env.server.port, 9090);
    assert!(!cfg_env.cache.enabled);
    unsafe {
        env::remove_var("MEDGATE__SERVER__PORT");
        env::remove_var("MEDGATE__CACHE__ENABLED");
    }

    // 3) Invalid configs are rejected
    let invalid_path = dir.path().join("invalid.toml");
    fs::write(
        &invalid_path,
        r#"
[storage]
backend = "memory"

[cache]
patient_ttl_secs = 0
"#,
    )
    .expect("write invalid toml");
    let err = load_config(invalid_path.to_str()).expect_err("expected validation error");
    assert!(err.contains("patient_ttl_secs"));

    fs::write(
        &invalid_path,
        r#"
[upstream]
base_url = "not a url"
"#,
    )
    .expect("write invalid toml");
    let err = load_config(invalid_path.to_str()).expect_err("expected validation error");
    assert!(err.contains("upstream.base_url"));

    fs::write(
        &invalid_path,
        r#"
[otel]
enabled = true
"#,
    )
    .expect("write invalid toml");
    let err = load_config(invalid_path.to_str()).expect_err("expected validation error");
    assert!(err.contains("otel.endpoint"));
}

#[test]
fn missing_file_falls_back_to_defaults() {
    let dir = tempfile::tempdir().expect("tmp dir");
    let path = dir.path().join("absent.toml");
    let cfg = load_config(path.to_str()).expect("defaults are valid");
    assert_eq!(cfg.storage.backend, StorageBackend::Postgres);
    assert_eq!(cfg.cache.patient_ttl(), Duration::from_secs(3600));
}
