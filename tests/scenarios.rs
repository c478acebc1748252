//! End-to-end scenario coverage driven through the HTTP surface, exercising
//! the same literal inputs/outputs the pipeline's invariants are checked
//! against: country-prefix sender routing, DNC blocking, provisioning
//! rollback, audit tamper detection, and offline dead-lettering with
//! fetch-ack.

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use serde_json::{json, Value};
use switchboard::auth::{hash_token, VerificationThrottle};
use switchboard::config::GatewayConfig;
use switchboard::db::Db;
use switchboard::dispatch::Dispatcher;
use switchboard::http::{build_router, AppState};
use switchboard::metrics::Metrics;
use switchboard::providers::telephony::MockTelephony;
use switchboard::providers::{email, storage, tts, whatsapp, ProviderSet};
use switchboard::replay::ReplayCache;
use switchboard::session::SessionRegistry;
use switchboard::types::now_iso;
use tower::ServiceExt;

async fn app_with_providers(demo_mode: bool, providers: ProviderSet) -> (axum::Router, sqlx::SqlitePool) {
    let db = Db::connect_in_memory().await.expect("connect");
    let pool = db.pool().clone();
    let dispatcher = Dispatcher {
        db: pool.clone(),
        providers: std::sync::Arc::new(providers),
        metrics: Metrics::new(),
        sessions: std::sync::Arc::new(SessionRegistry::new()),
        replay: std::sync::Arc::new(ReplayCache::default()),
        webhook_base_url: "https://gateway.example.test".to_owned(),
        demo_mode,
    };
    let state = AppState {
        metrics: dispatcher.metrics.clone(),
        dispatcher,
        throttle: std::sync::Arc::new(VerificationThrottle::default()),
        master_security_token: "master-secret".to_owned(),
        demo_mode,
        credential_cipher: std::sync::Arc::new(switchboard::credentials::CredentialCipher::new("test-key")),
    };
    let mut config = GatewayConfig::default();
    config.demo_mode = demo_mode;
    (build_router(state, &config), pool)
}

async fn app(demo_mode: bool) -> (axum::Router, sqlx::SqlitePool) {
    app_with_providers(demo_mode, ProviderSet::mock()).await
}

async fn seed_org(pool: &sqlx::SqlitePool, org_id: &str) {
    sqlx::query("INSERT INTO organizations (id, name, slug, created_at) VALUES (?1, 'Org', ?1, ?2)")
        .bind(org_id)
        .bind(now_iso())
        .execute(pool)
        .await
        .unwrap();
}

async fn seed_agent(pool: &sqlx::SqlitePool, agent_id: &str, org_id: &str, phone: Option<&str>) {
    sqlx::query(
        "INSERT INTO agent_channels (agent_id, org_id, display_name, phone_number, blocked_channels, created_at) \
         VALUES (?1, ?2, 'Agent', ?3, '', ?4)",
    )
    .bind(agent_id)
    .bind(org_id)
    .bind(phone)
    .bind(now_iso())
    .execute(pool)
    .await
    .unwrap();
}

/// Mints an agent-scoped bearer token and returns the plaintext.
async fn mint_agent_token(pool: &sqlx::SqlitePool, agent_id: &str, org_id: &str) -> String {
    let token = format!("agent-token-{agent_id}");
    sqlx::query("INSERT INTO agent_tokens (token_hash, agent_id, org_id, created_at) VALUES (?1, ?2, ?3, ?4)")
        .bind(hash_token(&token))
        .bind(agent_id)
        .bind(org_id)
        .bind(now_iso())
        .execute(pool)
        .await
        .unwrap();
    token
}

/// Mints an org-scoped admin bearer token and returns the plaintext.
async fn mint_org_token(pool: &sqlx::SqlitePool, org_id: &str) -> String {
    let token = format!("org-token-{org_id}");
    sqlx::query("INSERT INTO org_tokens (token_hash, org_id, created_at) VALUES (?1, ?2, ?3)")
        .bind(hash_token(&token))
        .bind(org_id)
        .bind(now_iso())
        .execute(pool)
        .await
        .unwrap();
    token
}

async fn seed_number(pool: &sqlx::SqlitePool, number: &str, org_id: &str, country: &str, is_default: bool) {
    sqlx::query(
        "INSERT INTO number_pool (phone_number, org_id, country_code, is_default, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5)",
    )
    .bind(number)
    .bind(org_id)
    .bind(country)
    .bind(is_default)
    .bind(now_iso())
    .execute(pool)
    .await
    .unwrap();
}

async fn send_json(app: axum::Router, method: &str, uri: &str, token: Option<&str>, body: Value) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri).header(header::CONTENT_TYPE, "application/json");
    if let Some(t) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {t}"));
    }
    let req = builder.body(Body::from(body.to_string())).unwrap();
    let resp = app.oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let value: Value = if bytes.is_empty() { json!(null) } else { serde_json::from_slice(&bytes).unwrap() };
    (status, value)
}

/// S1: an IL-coded number in the pool wins over the US default for an IL
/// recipient, the country derived from the recipient's E.164 prefix.
#[tokio::test]
async fn s1_sms_country_routing_picks_il_number() {
    let (app, pool) = app(false).await;
    seed_org(&pool, "org1").await;
    seed_agent(&pool, "A", "org1", Some("+18452514056")).await;
    seed_number(&pool, "+18452514056", "org1", "US", true).await;
    seed_number(&pool, "+97243760273", "org1", "IL", false).await;
    let token = mint_agent_token(&pool, "A", "org1").await;

    let (status, body) = send_json(
        app,
        "POST",
        "/api/v1/send-message",
        Some(&token),
        json!({
            "agent_id": "A",
            "channel": "sms",
            "to": "+972502629999",
            "body": "hello",
            "recipient_timezone": "UTC",
        }),
    )
    .await;

    assert_eq!(status, StatusCode::OK, "{body:?}");
    assert_eq!(body["success"], json!(true));
    assert_eq!(body["from"], json!("+97243760273"));
    assert_eq!(body["to"], json!("+972502629999"));
}

/// S2: a call to a US number is placed from the US default and produces a
/// pending outbound `call_logs` row.
#[tokio::test]
async fn s2_make_call_to_us_logs_call_row() {
    let (app, pool) = app(false).await;
    seed_org(&pool, "org1").await;
    seed_agent(&pool, "A", "org1", Some("+18452514056")).await;
    seed_number(&pool, "+18452514056", "org1", "US", true).await;
    let token = mint_agent_token(&pool, "A", "org1").await;

    let (status, body) = send_json(
        app,
        "POST",
        "/api/v1/make-call",
        Some(&token),
        json!({ "agent_id": "A", "to": "+18001234567" }),
    )
    .await;

    assert_eq!(status, StatusCode::OK, "{body:?}");
    assert_eq!(body["success"], json!(true));
    assert_eq!(body["from"], json!("+18452514056"));

    let (direction, call_status): (String, String) =
        sqlx::query_as("SELECT direction, status FROM call_logs WHERE agent_id = 'A'")
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(direction, "outbound");
    assert!(!call_status.is_empty());
}

/// S3: a DNC-listed destination is rejected with `compliance_denied` and no
/// usage is recorded.
#[tokio::test]
async fn s3_dnc_blocks_send_and_records_no_usage() {
    let (app, pool) = app(false).await;
    seed_org(&pool, "org1").await;
    seed_agent(&pool, "A", "org1", Some("+18452514056")).await;
    seed_number(&pool, "+18452514056", "org1", "US", true).await;
    sqlx::query(
        "INSERT INTO dnc_list (id, org_id, phone_number, reason, added_by, added_at) \
         VALUES ('d1', 'org1', '+15559999999', 'opt-out', 'admin', ?1)",
    )
    .bind(now_iso())
    .execute(&pool)
    .await
    .unwrap();
    let token = mint_agent_token(&pool, "A", "org1").await;

    let (status, body) = send_json(
        app,
        "POST",
        "/api/v1/send-message",
        Some(&token),
        json!({
            "agent_id": "A",
            "channel": "sms",
            "to": "+15559999999",
            "body": "hi",
            "recipient_timezone": "UTC",
        }),
    )
    .await;

    assert_eq!(status, StatusCode::FORBIDDEN, "{body:?}");
    assert_eq!(body["error"], json!("compliance_denied"));
    assert!(body["message"].as_str().unwrap().contains("Do Not Contact"));

    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM usage_logs").fetch_one(&pool).await.unwrap();
    assert_eq!(count, 0);
}

/// S4: a telephony failure on `buyNumber` unwinds every step the saga had
/// already committed.
#[tokio::test]
async fn s4_provisioning_rollback_on_buy_number_failure() {
    let telephony = MockTelephony::default();
    telephony.set_fail_buy_number(true);
    let providers = ProviderSet {
        telephony: Box::new(telephony),
        email: Box::new(email::MockEmail::default()),
        whatsapp: Box::new(whatsapp::MockWhatsapp::default()),
        tts: Box::new(tts::MockTts::default()),
        storage: Box::new(storage::MockStorage::default()),
    };
    let (app, pool) = app_with_providers(false, providers).await;
    seed_org(&pool, "org1").await;
    let token = mint_org_token(&pool, "org1").await;

    let (status, _body) = send_json(
        app,
        "POST",
        "/api/v1/provision",
        Some(&token),
        json!({
            "agent_id": "x",
            "display_name": "X",
            "capabilities": { "phone": true },
            "country": "US",
        }),
    )
    .await;

    assert_ne!(status, StatusCode::OK);
    let (agent_rows,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM agent_channels WHERE agent_id = 'x'").fetch_one(&pool).await.unwrap();
    assert_eq!(agent_rows, 0);
    let (token_rows,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM agent_tokens WHERE agent_id = 'x'").fetch_one(&pool).await.unwrap();
    assert_eq!(token_rows, 0);
    let pool_row: Option<(i64,)> =
        sqlx::query_as("SELECT active_agents FROM agent_pool WHERE org_id = 'org1'").fetch_optional(&pool).await.unwrap();
    assert!(pool_row.is_none() || pool_row.unwrap().0 == 0);
}

/// S5: tampering with a middle row is caught at the index it occurred.
#[tokio::test]
async fn s5_audit_tamper_detection_reports_broken_index() {
    let db = Db::connect_in_memory().await.unwrap();
    for i in 0..3 {
        switchboard::audit::append(db.pool(), Some("org1"), "agent_provisioned", "admin", Some(&format!("a{i}")), None)
            .await
            .unwrap();
    }
    sqlx::query("UPDATE audit_log SET details = '{\"tampered\":true}' WHERE target = 'a1'")
        .execute(db.pool())
        .await
        .unwrap();

    let result = switchboard::audit::verify(db.pool()).await.unwrap();
    assert!(!result.valid);
    assert_eq!(result.broken_at_index, Some(1));
}

/// S6: an inbound SMS to an agent with no reachable callback is
/// dead-lettered with `reason="agent_offline"`, acknowledged exactly once
/// by `get_waiting_messages`.
#[tokio::test]
async fn s6_inbound_offline_dead_letters_and_acks_once() {
    let (app, pool) = app(true).await;
    seed_org(&pool, "org1").await;
    sqlx::query(
        "INSERT INTO agent_channels (agent_id, org_id, display_name, phone_number, blocked_channels, \
         callback_url, created_at) VALUES ('A', 'org1', 'Agent', '+19995550000', '', \
         'http://127.0.0.1:1/unreachable', ?1)",
    )
    .bind(now_iso())
    .execute(&pool)
    .await
    .unwrap();

    let req = Request::builder()
        .method("POST")
        .uri("/webhooks/A/sms")
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(
            "From=%2B15551234567&To=%2B19995550000&Body=hello&MessageSid=SM00000001",
        ))
        .unwrap();
    let resp = tokio::time::timeout(std::time::Duration::from_secs(5), app.oneshot(req))
        .await
        .expect("webhook should respond within 5s")
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&bytes[..], b"<Response/>");

    // the carrier reply above returns before the agent callback is even
    // attempted; give the spawned fan-out task a moment to dead-letter.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    let (reason, direction): (String, String) =
        sqlx::query_as("SELECT reason, direction FROM dead_letters WHERE agent_id = 'A'")
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(reason, "agent_offline");
    assert_eq!(direction, "inbound");

    let first = switchboard::deadletter::get_waiting_messages(&pool, "A", None, 10).await.unwrap();
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].from_address.as_deref(), Some("+15551234567"));

    let second = switchboard::deadletter::get_waiting_messages(&pool, "A", None, 10).await.unwrap();
    assert!(second.is_empty());
}
