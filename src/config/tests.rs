//! Config module tests

use super::*;

#[test]
fn test_substitute_env_vars_simple() {
    std::env::set_var("SW_TEST_VAR_SIMPLE", "hello");
    let result = substitute_env_vars("value = \"${SW_TEST_VAR_SIMPLE}\"");
    assert_eq!(result, "value = \"hello\"");
    std::env::remove_var("SW_TEST_VAR_SIMPLE");
}

#[test]
fn test_substitute_env_vars_with_default() {
    // Unset var should use default
    std::env::remove_var("SW_TEST_VAR_UNSET");
    let result = substitute_env_vars("value = \"${SW_TEST_VAR_UNSET:-default_value}\"");
    assert_eq!(result, "value = \"default_value\"");

    // Set var should use env value
    std::env::set_var("SW_TEST_VAR_SET", "env_value");
    let result = substitute_env_vars("value = \"${SW_TEST_VAR_SET:-default_value}\"");
    assert_eq!(result, "value = \"env_value\"");
    std::env::remove_var("SW_TEST_VAR_SET");
}

#[test]
fn test_substitute_env_vars_missing_no_default() {
    std::env::remove_var("SW_TEST_VAR_MISSING");
    let result = substitute_env_vars("value = \"${SW_TEST_VAR_MISSING}\"");
    assert_eq!(result, "value = \"\"");
}

#[test]
fn test_load_config_with_env_substitution() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = dir.path().join("slotwise.toml");

    std::env::set_var("SW_TEST_GOSSIP_HOST", "127.0.0.1");
    std::env::set_var("SW_TEST_GOSSIP_PORT", "7950");

    let config_content = r#"
[cluster]
enabled = true
gossip_addr = "${SW_TEST_GOSSIP_HOST}:${SW_TEST_GOSSIP_PORT}"
notification_window = ${SW_TEST_WINDOW:-16}
"#;

    std::fs::write(&config_path, config_content).unwrap();

    let config = Config::load(&config_path).unwrap();
    assert!(config.cluster.enabled);
    assert_eq!(config.cluster.gossip_addr.to_string(), "127.0.0.1:7950");
    assert_eq!(config.cluster.notification_window, 16); // Uses default

    std::env::remove_var("SW_TEST_GOSSIP_HOST");
    std::env::remove_var("SW_TEST_GOSSIP_PORT");
}

#[test]
fn test_load_missing_file_uses_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config::load(dir.path().join("absent.toml")).unwrap();
    assert_eq!(config.log.level, "info");
    assert!(!config.cluster.enabled);
    assert_eq!(config.coordination.queue_topic, "queue-changed");
}

#[test]
fn test_default_config() {
    let config = Config::default();
    assert_eq!(config.log.level, "info");
    assert_eq!(config.cluster.gossip_addr.port(), 7946);
    assert_eq!(config.cluster.gossip_interval, 1000);
    assert_eq!(
        config.coordination.topic_name(NotificationChannel::Subscription),
        "subscription-changed"
    );
    assert_eq!(config.coordination.id_counter, "message-id-seed");
    assert!(config.validate().is_ok());
}

#[test]
fn test_parse_full_config() {
    let toml = r#"
[log]
level = "debug"

[cluster]
enabled = true
node_uuid = "0b0c5bb4-7c2e-4b53-9d43-39a1b6a3e0f1"
cluster_id = "orders"
gossip_addr = "0.0.0.0:8000"
gossip_advertise_addr = "10.1.2.3:8000"
seeds = ["10.1.2.4:8000", "10.1.2.5:8000"]
gossip_interval = 200
failure_timeout = 3
dead_node_grace_period = 10
notification_window = 32
id_claim_attempts = 4

[coordination]
subscription_topic = "subs"
queue_topic = "queues"
exchange_topic = "exchanges"
binding_topic = "bindings"
id_counter = "seed"
"#;

    let config = Config::parse(toml).unwrap();
    assert_eq!(config.log.level, "debug");
    assert_eq!(config.cluster.cluster_id, "orders");
    assert_eq!(
        config.cluster.get_gossip_advertise_addr().to_string(),
        "10.1.2.3:8000"
    );
    assert_eq!(config.cluster.seeds.len(), 2);
    assert_eq!(config.cluster.notification_window, 32);
    assert_eq!(config.cluster.id_claim_attempts, 4);
    assert_eq!(
        config.coordination.topic_name(NotificationChannel::Binding),
        "bindings"
    );
    assert_eq!(config.coordination.id_counter, "seed");
}

#[test]
fn test_validation_rejects_duplicate_topics() {
    let toml = r#"
[coordination]
queue_topic = "changes"
binding_topic = "changes"
"#;
    let err = Config::parse(toml).unwrap_err();
    assert!(matches!(err, ConfigError::Validation(msg) if msg.contains("'changes'")));
}

#[test]
fn test_validation_rejects_empty_topic() {
    let toml = r#"
[coordination]
exchange_topic = ""
"#;
    assert!(matches!(
        Config::parse(toml),
        Err(ConfigError::Validation(_))
    ));
}

#[test]
fn test_validation_rejects_zero_window_and_interval() {
    assert!(Config::parse("[cluster]\nnotification_window = 0\n").is_err());
    assert!(Config::parse("[cluster]\ngossip_interval = 0\n").is_err());
    assert!(Config::parse("[cluster]\nid_claim_attempts = 0\n").is_err());
    assert!(Config::parse("[cluster]\nfailure_timeout = 0\n").is_err());
}

#[test]
fn test_validation_rejects_bad_uuid() {
    let err = Config::parse("[cluster]\nnode_uuid = \"not-a-uuid\"\n").unwrap_err();
    assert!(err.to_string().contains("not-a-uuid"));
}

#[test]
fn test_parse_invalid_toml() {
    assert!(matches!(
        Config::parse("[cluster\nenabled = true"),
        Err(ConfigError::Parse(_))
    ));
}
