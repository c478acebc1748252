//! The REST mirror of the tool-call surface (spec §6): one endpoint per
//! operation, all bearer-authenticated, bodies matching §3 field names.

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::audit;
use crate::auth;
use crate::dispatch::outbound::{self, OutboundAction, OutboundRequest};
use crate::error::GatewayError;
use crate::otp;
use crate::provisioning::{self, Capabilities, ProvisionRequest};
use crate::ratelimit;
use crate::types::Channel;

use super::AppState;

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

async fn resolve(state: &AppState, headers: &HeaderMap) -> Result<crate::types::Principal, GatewayError> {
    auth::resolve_principal(
        &state.dispatcher.db,
        &state.throttle,
        bearer_token(headers),
        &state.master_security_token,
        state.demo_mode,
    )
    .await
    .map_err(|_| GatewayError::AuthDenied("invalid or missing bearer token".to_owned()))
}

#[derive(Debug, Deserialize)]
pub struct SendMessageBody {
    pub agent_id: String,
    pub channel: String,
    pub to: String,
    pub body: Option<String>,
    pub template_id: Option<String>,
    pub template_vars: Option<serde_json::Value>,
    pub media_url: Option<String>,
    pub recipient_timezone: Option<String>,
    pub subject: Option<String>,
    pub html: Option<String>,
}

pub async fn send_message(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<SendMessageBody>,
) -> Response {
    let principal = match resolve(&state, &headers).await {
        Ok(p) => p,
        Err(e) => return e.into_response(),
    };

    let Some(channel) = Channel::parse(&req.channel) else {
        return GatewayError::bad_input("channel", "unknown channel").into_response();
    };

    let action = match channel {
        Channel::Email => OutboundAction::Email {
            subject: req.subject.unwrap_or_default(),
            body: req.body.unwrap_or_default(),
            html: req.html,
        },
        _ => OutboundAction::Send {
            body: req.body,
            template_id: req.template_id,
            template_vars: req.template_vars,
            media_url: req.media_url,
        },
    };

    let outcome = outbound::send(
        &state.dispatcher,
        &principal,
        OutboundRequest {
            agent_id: req.agent_id,
            channel,
            to: req.to,
            recipient_timezone: req.recipient_timezone,
            action,
        },
    )
    .await;

    match outcome {
        Ok(result) => (StatusCode::OK, Json(result)).into_response(),
        Err(e) => e.into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct MakeCallBody {
    pub agent_id: String,
    pub to: String,
    pub config: Option<serde_json::Value>,
}

pub async fn make_call(State(state): State<AppState>, headers: HeaderMap, Json(req): Json<MakeCallBody>) -> Response {
    let principal = match resolve(&state, &headers).await {
        Ok(p) => p,
        Err(e) => return e.into_response(),
    };

    let outcome = outbound::send(
        &state.dispatcher,
        &principal,
        OutboundRequest {
            agent_id: req.agent_id,
            channel: Channel::Voice,
            to: req.to,
            recipient_timezone: None,
            action: OutboundAction::AiVoiceCall {
                config: req.config.unwrap_or_else(|| json!({})),
            },
        },
    )
    .await;

    match outcome {
        Ok(result) => (StatusCode::OK, Json(result)).into_response(),
        Err(e) => e.into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct TransferCallBody {
    pub agent_id: String,
    pub call_sid: String,
    pub transfer_to: String,
}

pub async fn transfer_call(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<TransferCallBody>,
) -> Response {
    let principal = match resolve(&state, &headers).await {
        Ok(p) => p,
        Err(e) => return e.into_response(),
    };

    let outcome = outbound::send(
        &state.dispatcher,
        &principal,
        OutboundRequest {
            agent_id: req.agent_id,
            channel: Channel::Voice,
            to: req.transfer_to.clone(),
            recipient_timezone: None,
            action: OutboundAction::CallTransfer {
                call_sid: req.call_sid,
                transfer_to: req.transfer_to,
            },
        },
    )
    .await;

    match outcome {
        Ok(result) => (StatusCode::OK, Json(result)).into_response(),
        Err(e) => e.into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct ListMessagesQuery {
    pub agent_id: String,
    pub channel: Option<String>,
    pub limit: Option<i64>,
}

/// Returns pending dead-lettered messages for the agent with fetch-ack
/// semantics (spec §4.9) — this is the HTTP mirror of `get_waiting_messages`.
pub async fn list_messages(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ListMessagesQuery>,
) -> Response {
    let principal = match resolve(&state, &headers).await {
        Ok(p) => p,
        Err(e) => return e.into_response(),
    };
    if auth::require_agent_in_org(&state.dispatcher.db, &principal, &query.agent_id)
        .await
        .is_err()
    {
        return GatewayError::AuthDenied(query.agent_id).into_response();
    }

    let channel = match query.channel.as_deref().map(Channel::parse) {
        Some(Some(channel)) => Some(channel),
        Some(None) => return GatewayError::bad_input("channel", "unknown channel").into_response(),
        None => None,
    };

    match crate::deadletter::get_waiting_messages(&state.dispatcher.db, &query.agent_id, channel, query.limit.unwrap_or(50))
        .await
    {
        Ok(rows) => (StatusCode::OK, Json(rows)).into_response(),
        Err(e) => GatewayError::Internal(anyhow::anyhow!(e)).into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct ProvisionBody {
    pub agent_id: String,
    pub display_name: String,
    pub capabilities: CapabilitiesBody,
    pub country: Option<String>,
    pub email_domain: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct CapabilitiesBody {
    #[serde(default)]
    pub phone: bool,
    #[serde(default)]
    pub whatsapp: bool,
    #[serde(default)]
    pub email: bool,
    #[serde(default)]
    pub voice_ai: bool,
}

pub async fn provision(State(state): State<AppState>, headers: HeaderMap, Json(req): Json<ProvisionBody>) -> Response {
    let principal = match resolve(&state, &headers).await {
        Ok(p) => p,
        Err(e) => return e.into_response(),
    };
    let Some(org_id) = principal.org_id.clone() else {
        return GatewayError::AuthDenied("principal has no bound org".to_owned()).into_response();
    };

    let outcome = provisioning::provision(
        &state.dispatcher.db,
        &state.dispatcher.providers,
        ProvisionRequest {
            agent_id: req.agent_id,
            org_id,
            display_name: req.display_name,
            capabilities: Capabilities {
                phone: req.capabilities.phone,
                whatsapp: req.capabilities.whatsapp,
                email: req.capabilities.email,
                voice_ai: req.capabilities.voice_ai,
            },
            country: req.country.unwrap_or_else(|| "US".to_owned()),
            email_domain: req.email_domain.unwrap_or_else(|| "agents.example.com".to_owned()),
        },
    )
    .await;

    match outcome {
        Ok(result) => (StatusCode::OK, Json(result)).into_response(),
        Err(e) => GatewayError::from(e).into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct DeprovisionBody {
    pub agent_id: String,
}

pub async fn deprovision(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<DeprovisionBody>,
) -> Response {
    let principal = match resolve(&state, &headers).await {
        Ok(p) => p,
        Err(e) => return e.into_response(),
    };
    let Some(org_id) = principal.org_id.clone() else {
        return GatewayError::AuthDenied("principal has no bound org".to_owned()).into_response();
    };
    if auth::require_agent(&principal, &req.agent_id).is_err() && !principal.is_admin() {
        return GatewayError::AuthDenied(req.agent_id).into_response();
    }

    match provisioning::deprovision(&state.dispatcher.db, &state.dispatcher.providers, &req.agent_id, &org_id).await {
        Ok(()) => (StatusCode::OK, Json(json!({ "ok": true }))).into_response(),
        Err(e) => GatewayError::from(e).into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct UsageQuery {
    pub agent_id: String,
}

pub async fn get_usage(State(state): State<AppState>, headers: HeaderMap, Query(query): Query<UsageQuery>) -> Response {
    let principal = match resolve(&state, &headers).await {
        Ok(p) => p,
        Err(e) => return e.into_response(),
    };
    if auth::require_agent_in_org(&state.dispatcher.db, &principal, &query.agent_id)
        .await
        .is_err()
    {
        return GatewayError::AuthDenied(query.agent_id).into_response();
    }

    match ratelimit::effective_limits(&state.dispatcher.db, &query.agent_id).await {
        Ok(limits) => (StatusCode::OK, Json(json!(limits_body(&limits)))).into_response(),
        Err(e) => GatewayError::Internal(anyhow::anyhow!(e)).into_response(),
    }
}

fn limits_body(limits: &ratelimit::Limits) -> serde_json::Value {
    json!({
        "max_actions_per_minute": limits.max_actions_per_minute,
        "max_actions_per_hour": limits.max_actions_per_hour,
        "max_actions_per_day": limits.max_actions_per_day,
        "max_spend_per_day": limits.max_spend_per_day,
        "max_spend_per_month": limits.max_spend_per_month,
    })
}

#[derive(Debug, Deserialize)]
pub struct BillingQuery {
    pub org_id: Option<String>,
}

pub async fn get_billing(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<BillingQuery>,
) -> Response {
    let principal = match resolve(&state, &headers).await {
        Ok(p) => p,
        Err(e) => return e.into_response(),
    };
    let org_id = match query.org_id.or_else(|| principal.org_id.clone()) {
        Some(o) => o,
        None => return GatewayError::bad_input("org_id", "org_id is required").into_response(),
    };
    // Super-admins (no bound org, `org_scope_clause` returns `None`) may
    // query any org; everyone else is pinned to their own bound org even
    // if they hold `Scope::Admin` — admin status alone is not a cross-org
    // pass.
    if let Some(scope) = auth::org_scope_clause(&principal) {
        if scope.org_id != org_id {
            return GatewayError::AuthDenied(org_id).into_response();
        }
    }

    let row: Option<(String,)> = sqlx::query_as("SELECT tier FROM billing_config WHERE org_id = ?1")
        .bind(&org_id)
        .fetch_optional(&state.dispatcher.db)
        .await
        .unwrap_or(None);

    (StatusCode::OK, Json(json!({ "org_id": org_id, "tier": row.map(|r| r.0).unwrap_or_else(|| "free".to_owned()) })))
        .into_response()
}

#[derive(Debug, Deserialize)]
pub struct OtpRequestBody {
    pub contact_address: String,
    pub purpose: String,
}

/// Issue a one-time code for `contact_address`/`purpose` (SPEC_FULL §B).
/// Delivery of the code over SMS/email is the caller's job — this only
/// returns the expiry, never the plaintext code, over HTTP.
pub async fn otp_request(State(state): State<AppState>, Json(req): Json<OtpRequestBody>) -> Response {
    match otp::request(&state.dispatcher.db, &req.contact_address, &req.purpose).await {
        Ok(issued) => (StatusCode::OK, Json(json!({ "id": issued.id, "expires_at": issued.expires_at }))).into_response(),
        Err(e) => GatewayError::Internal(anyhow::anyhow!(e)).into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct OtpVerifyBody {
    pub contact_address: String,
    pub purpose: String,
    pub code: String,
}

pub async fn otp_verify(State(state): State<AppState>, Json(req): Json<OtpVerifyBody>) -> Response {
    match otp::verify(&state.dispatcher.db, &req.contact_address, &req.purpose, &req.code).await {
        Ok(()) => (StatusCode::OK, Json(json!({ "verified": true }))).into_response(),
        Err(e @ otp::OtpError::Db(_)) => GatewayError::Internal(anyhow::anyhow!(e)).into_response(),
        Err(e) => GatewayError::bad_input("code", e.to_string()).into_response(),
    }
}

/// Not part of the REST mirror table directly, but surfaced here for
/// operators who want to check chain integrity over HTTP rather than the
/// `verify-audit` CLI subcommand.
pub async fn verify_audit_chain(State(state): State<AppState>) -> Response {
    match audit::verify(&state.dispatcher.db).await {
        Ok(result) => (StatusCode::OK, Json(result)).into_response(),
        Err(e) => GatewayError::Internal(anyhow::anyhow!(e)).into_response(),
    }
}
