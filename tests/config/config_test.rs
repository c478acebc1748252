//! Coverage for config parsing and env-override precedence.

use switchboard::config::GatewayConfig;

#[test]
fn default_server_binds_to_8080() {
    let config = GatewayConfig::default();
    assert_eq!(config.server.port, 8080);
    assert_eq!(config.server.host, "0.0.0.0");
}

#[test]
fn parse_full_toml_config() {
    let toml_str = r#"
demo_mode = false
master_security_token = "token123"
webhook_base_url = "https://gw.example.com"
credentials_encryption_key = "deadbeef"

[server]
host = "127.0.0.1"
port = 9000

[providers]
twilio_account_sid = "ACxxxx"
twilio_auth_token = "authxxxx"
resend_api_key = "re_xxxx"

[database]
url = "sqlite://gateway.db"

[hardening]
max_token_verification_attempts_per_minute = 10
replay_cache_capacity = 5000
replay_cache_max_age_secs = 120
"#;
    let config = GatewayConfig::from_toml(toml_str).expect("should parse");
    assert_eq!(config.server.port, 9000);
    assert_eq!(config.webhook_base_url, "https://gw.example.com");
    assert_eq!(config.providers.twilio_account_sid.as_deref(), Some("ACxxxx"));
    assert_eq!(config.database.url, "sqlite://gateway.db");
    assert_eq!(config.hardening.replay_cache_capacity, 5000);
}

#[test]
fn debug_output_redacts_secrets() {
    let config = GatewayConfig::from_toml(
        r#"
master_security_token = "super-secret-token"
credentials_encryption_key = "super-secret-key"

[providers]
twilio_auth_token = "super-secret-twilio"
"#,
    )
    .unwrap();
    let debug_str = format!("{config:?}");
    assert!(!debug_str.contains("super-secret-token"));
    assert!(!debug_str.contains("super-secret-key"));
    assert!(!debug_str.contains("super-secret-twilio"));
}
