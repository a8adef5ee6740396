use crate::config::models::AppConfig;

#[test]
fn test_default_config() {
    let config = AppConfig::default();
    assert!(config.validate().is_ok());

    // 验证默认值
    assert_eq!(config.database.max_connections, 5);
    assert!(config.dispatcher.enabled);
    assert_eq!(config.dispatcher.probe_timeout_ms, 500);
    assert_eq!(config.dispatcher.orphan_timeout_seconds, 600);
    assert!(!config.manager.enabled);
    assert!(config.api.enabled);
}

#[test]
fn test_config_from_toml() {
    let toml_content = r#"
[database]
url = "sqlite://farm_test.db"
max_connections = 8

[dispatcher]
claim_retry_limit = 3
job_failure_threshold = 3

[manager]
enabled = true
name = "render-node-a"
server_url = "http://farm.local:8080"
advertise_host = "10.0.0.12"
bind_address = "0.0.0.0:7001"
worker_slots = 4
job_types = "blender_simple_render"

[api]
bind_address = "127.0.0.1:9090"

[observability]
log_level = "debug"
log_format = "json"
"#;

    let config = AppConfig::from_toml(toml_content).unwrap();

    assert_eq!(config.database.url, "sqlite://farm_test.db");
    assert_eq!(config.database.max_connections, 8);
    // 未出现的字段保持默认值
    assert_eq!(config.database.min_connections, 1);
    assert_eq!(config.dispatcher.claim_retry_limit, 3);
    assert_eq!(config.dispatcher.job_failure_threshold, 3);
    assert_eq!(config.manager.name, "render-node-a");
    assert_eq!(config.manager.worker_slots, 4);
    assert_eq!(config.manager.listen_port(), Some(7001));
    assert_eq!(
        config.manager.job_types.as_deref(),
        Some("blender_simple_render")
    );
    assert_eq!(config.api.bind_address, "127.0.0.1:9090");
    assert_eq!(config.observability.log_format, "json");
}

#[test]
fn test_config_to_toml() {
    let config = AppConfig::default();
    let toml_str = config.to_toml().unwrap();

    assert!(toml_str.contains("[database]"));
    assert!(toml_str.contains("[dispatcher]"));
    assert!(toml_str.contains("[manager]"));

    let parsed = AppConfig::from_toml(&toml_str).unwrap();
    assert_eq!(parsed.api.bind_address, config.api.bind_address);
}

#[test]
fn test_invalid_toml_section_rejected() {
    let toml_content = r#"
[dispatcher]
probe_timeout_ms = 0
"#;

    assert!(AppConfig::from_toml(toml_content).is_err());
}
