#![allow(missing_docs)]

//! switchboard — multi-tenant dispatch and routing gateway for autonomous
//! agents across SMS, WhatsApp, email, voice, and LINE.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use switchboard::auth::VerificationThrottle;
use switchboard::config::GatewayConfig;
use switchboard::credentials::CredentialCipher;
use switchboard::db::Db;
use switchboard::dispatch::Dispatcher;
use switchboard::http::{self, AppState};
use switchboard::metrics::Metrics;
use switchboard::providers::email::{LiveEmail, MockEmail};
use switchboard::providers::storage::LiveStorage;
use switchboard::providers::telephony::{LiveTelephony, MockTelephony};
use switchboard::providers::tts::{LiveTts, MockTts};
use switchboard::providers::whatsapp::{LiveWhatsapp, MockWhatsapp};
use switchboard::providers::ProviderSet;
use switchboard::replay::ReplayCache;
use switchboard::session::SessionRegistry;

#[derive(Parser)]
#[command(name = "switchboard", version, about = "Multi-tenant agent communication gateway")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP server.
    Serve,
    /// Apply the schema to the configured database and exit.
    Migrate,
    /// Walk the audit chain and report whether it is intact.
    VerifyAudit,
    /// Run every pending erasure request to completion.
    RunErasure,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve => {
            let _guard = switchboard::logging::init_production(std::path::Path::new("./logs"))?;
            run_serve().await
        }
        Commands::Migrate => {
            switchboard::logging::init_cli();
            run_migrate().await
        }
        Commands::VerifyAudit => {
            switchboard::logging::init_cli();
            run_verify_audit().await
        }
        Commands::RunErasure => {
            switchboard::logging::init_cli();
            run_erasure().await
        }
    }
}

async fn run_migrate() -> Result<()> {
    let config = GatewayConfig::load().context("failed to load config")?;
    Db::connect(&config.database.url).await.context("migration failed")?;
    info!("migration complete");
    Ok(())
}

async fn run_verify_audit() -> Result<()> {
    let config = GatewayConfig::load().context("failed to load config")?;
    let db = Db::connect(&config.database.url).await.context("failed to open database")?;
    let result = switchboard::audit::verify(db.pool()).await.context("audit verification failed")?;
    if result.valid {
        info!(checked = result.checked_count, "audit chain intact");
    } else {
        tracing::error!(
            checked = result.checked_count,
            broken_at = ?result.broken_at_index,
            "audit chain is broken"
        );
        std::process::exit(1);
    }
    Ok(())
}

async fn run_erasure() -> Result<()> {
    let config = GatewayConfig::load().context("failed to load config")?;
    let db = Db::connect(&config.database.url).await.context("failed to open database")?;
    let completed = switchboard::erasure::run_pending(db.pool())
        .await
        .context("erasure worker failed")?;
    info!(completed, "erasure requests processed");
    Ok(())
}

async fn run_serve() -> Result<()> {
    let config = GatewayConfig::load().context("failed to load config")?;
    info!(demo_mode = config.demo_mode, "switchboard starting");

    let db = Db::connect(&config.database.url).await.context("failed to open database")?;
    let providers = build_providers(&config);
    let credential_cipher = Arc::new(CredentialCipher::new(&config.credentials_encryption_key));

    let dispatcher = Dispatcher {
        db: db.pool().clone(),
        providers: Arc::new(providers),
        metrics: Metrics::new(),
        sessions: Arc::new(SessionRegistry::new()),
        replay: Arc::new(ReplayCache::new(
            config.hardening.replay_cache_capacity,
            std::time::Duration::from_secs(config.hardening.replay_cache_max_age_secs),
        )),
        webhook_base_url: config.webhook_base_url.clone(),
        demo_mode: config.demo_mode,
    };

    let state = AppState {
        metrics: dispatcher.metrics.clone(),
        dispatcher,
        throttle: Arc::new(VerificationThrottle::default()),
        master_security_token: config.master_security_token.clone(),
        demo_mode: config.demo_mode,
        credential_cipher,
    };

    let app = http::build_router(state, &config);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "listening");

    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}

fn build_providers(config: &GatewayConfig) -> ProviderSet {
    if config.demo_mode {
        return ProviderSet::mock();
    }

    let telephony: Box<dyn switchboard::providers::Telephony> =
        match (&config.providers.twilio_account_sid, &config.providers.twilio_auth_token) {
            (Some(sid), Some(token)) => Box::new(LiveTelephony::new(
                sid.clone(),
                token.clone(),
                config.webhook_base_url.clone(),
            )),
            _ => Box::new(MockTelephony::default()),
        };

    let whatsapp: Box<dyn switchboard::providers::WhatsappProvider> =
        match (&config.providers.twilio_account_sid, &config.providers.twilio_auth_token) {
            (Some(sid), Some(token)) => Box::new(LiveWhatsapp::new(sid.clone(), token.clone())),
            _ => Box::new(MockWhatsapp::default()),
        };

    let email: Box<dyn switchboard::providers::EmailProvider> = match &config.providers.resend_api_key {
        Some(key) => Box::new(LiveEmail::new(key.clone(), String::new())),
        None => Box::new(MockEmail::default()),
    };

    let tts: Box<dyn switchboard::providers::Tts> = match &config.providers.elevenlabs_api_key {
        Some(key) => Box::new(LiveTts::new(key.clone())),
        None => Box::new(MockTts::default()),
    };

    let storage: Box<dyn switchboard::providers::Storage> = Box::new(LiveStorage::new(format!(
        "{}/storage",
        config.webhook_base_url
    )));

    ProviderSet {
        telephony,
        email,
        whatsapp,
        tts,
        storage,
    }
}
