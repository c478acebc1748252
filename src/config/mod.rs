//! Configuration loading (spec §6, SPEC_FULL §A.3).
//!
//! Loads from `./switchboard.toml` (or `$SWITCHBOARD_CONFIG_PATH`);
//! environment variables override file values, file values override
//! built-in defaults. The precedence mechanism (an injectable env
//! resolver, so tests never need `std::env::set_var`) follows the
//! teacher's own config loader.

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Immutable, fully-resolved gateway configuration. Constructed once at
/// startup and handed by value/reference to every component — there is no
/// global mutable singleton.
#[derive(Clone, Default, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub server: ServerConfig,
    pub demo_mode: bool,
    pub master_security_token: String,
    pub webhook_base_url: String,
    pub credentials_encryption_key: String,
    pub providers: ProviderCredentialsConfig,
    pub database: DatabaseConfig,
    pub hardening: HardeningConfig,
}

impl std::fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("server", &self.server)
            .field("demo_mode", &self.demo_mode)
            .field("master_security_token", &"__REDACTED__")
            .field("webhook_base_url", &self.webhook_base_url)
            .field("credentials_encryption_key", &"__REDACTED__")
            .field("providers", &self.providers)
            .field("database", &self.database)
            .field("hardening", &self.hardening)
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_owned(),
            port: 8080,
        }
    }
}

#[derive(Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProviderCredentialsConfig {
    pub twilio_account_sid: Option<String>,
    pub twilio_auth_token: Option<String>,
    pub resend_api_key: Option<String>,
    pub elevenlabs_api_key: Option<String>,
    pub anthropic_api_key: Option<String>,
}

impl std::fmt::Debug for ProviderCredentialsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderCredentialsConfig")
            .field("twilio_account_sid", &self.twilio_account_sid.as_ref().map(|_| "__REDACTED__"))
            .field("twilio_auth_token", &self.twilio_auth_token.as_ref().map(|_| "__REDACTED__"))
            .field("resend_api_key", &self.resend_api_key.as_ref().map(|_| "__REDACTED__"))
            .field("elevenlabs_api_key", &self.elevenlabs_api_key.as_ref().map(|_| "__REDACTED__"))
            .field("anthropic_api_key", &self.anthropic_api_key.as_ref().map(|_| "__REDACTED__"))
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://switchboard.db".to_owned(),
        }
    }
}

/// Knobs governing the ambient hardening posture (security headers,
/// verification throttling) rather than feature behavior.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HardeningConfig {
    pub max_token_verification_attempts_per_minute: u32,
    pub replay_cache_capacity: usize,
    pub replay_cache_max_age_secs: u64,
}

impl Default for HardeningConfig {
    fn default() -> Self {
        Self {
            max_token_verification_attempts_per_minute: 20,
            replay_cache_capacity: 10_000,
            replay_cache_max_age_secs: 300,
        }
    }
}

impl GatewayConfig {
    /// Load with precedence: env vars > TOML file > defaults.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from_file()?;
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    fn load_from_file() -> Result<Self> {
        let path = Self::config_path_with(|key| std::env::var(key).ok());
        match std::fs::read_to_string(&path) {
            Ok(contents) => {
                tracing::info!(path = %path.display(), "loading config from file");
                let config: GatewayConfig = toml::from_str(&contents).context("failed to parse config TOML")?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("no config file found, using defaults");
                Ok(GatewayConfig::default())
            }
            Err(e) => Err(anyhow::anyhow!("failed to read config file: {e}")),
        }
    }

    fn config_path_with(env: impl Fn(&str) -> Option<String>) -> PathBuf {
        if let Some(p) = env("SWITCHBOARD_CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("switchboard.toml")
    }

    fn apply_overrides(&mut self, env: impl Fn(&str) -> Option<String>) {
        if let Some(v) = env("DEMO_MODE") {
            match v.parse() {
                Ok(b) => self.demo_mode = b,
                Err(_) => tracing::warn!(var = "DEMO_MODE", value = %v, "ignoring invalid env override"),
            }
        }
        if let Some(v) = env("MASTER_SECURITY_TOKEN") {
            self.master_security_token = v;
        }
        if let Some(v) = env("WEBHOOK_BASE_URL") {
            self.webhook_base_url = v;
        }
        if let Some(v) = env("CREDENTIALS_ENCRYPTION_KEY") {
            self.credentials_encryption_key = v;
        }
        if let Some(v) = env("DATABASE_URL") {
            self.database.url = v;
        }
        if let Some(v) = env("PORT") {
            match v.parse() {
                Ok(p) => self.server.port = p,
                Err(_) => tracing::warn!(var = "PORT", value = %v, "ignoring invalid env override"),
            }
        }

        if let Some(v) = env("TWILIO_ACCOUNT_SID") {
            self.providers.twilio_account_sid = Some(v);
        }
        if let Some(v) = env("TWILIO_AUTH_TOKEN") {
            self.providers.twilio_auth_token = Some(v);
        }
        if let Some(v) = env("RESEND_API_KEY") {
            self.providers.resend_api_key = Some(v);
        }
        if let Some(v) = env("ELEVENLABS_API_KEY") {
            self.providers.elevenlabs_api_key = Some(v);
        }
        if let Some(v) = env("ANTHROPIC_API_KEY") {
            self.providers.anthropic_api_key = Some(v);
        }
    }

    /// Parse a TOML string into config (for testing).
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: GatewayConfig = toml::from_str(toml_str).context("failed to parse config TOML")?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = GatewayConfig::default();
        assert_eq!(config.server.port, 8080);
        assert!(!config.demo_mode);
    }

    #[test]
    fn env_overrides_demo_mode_and_token() {
        let mut config = GatewayConfig::default();
        let env = |key: &str| -> Option<String> {
            match key {
                "DEMO_MODE" => Some("true".to_owned()),
                "MASTER_SECURITY_TOKEN" => Some("secret123".to_owned()),
                _ => None,
            }
        };
        config.apply_overrides(env);
        assert!(config.demo_mode);
        assert_eq!(config.master_security_token, "secret123");
    }

    #[test]
    fn invalid_port_override_is_ignored() {
        let mut config = GatewayConfig::default();
        config.apply_overrides(|key| if key == "PORT" { Some("not-a-number".to_owned()) } else { None });
        assert_eq!(config.server.port, 8080);
    }

    #[test]
    fn from_toml_parses_provider_credentials() {
        let config = GatewayConfig::from_toml(
            r#"
            demo_mode = true

            [providers]
            twilio_account_sid = "ACxxxx"
            "#,
        )
        .unwrap();
        assert!(config.demo_mode);
        assert_eq!(config.providers.twilio_account_sid.as_deref(), Some("ACxxxx"));
    }
}
