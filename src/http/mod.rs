//! HTTP surface (spec §6): carrier webhook ingress, the REST mirror, and
//! the operational endpoints (health, readiness, metrics).

pub mod health;
pub mod rest;
pub mod webhooks;

use std::sync::Arc;

use axum::extract::Request;
use axum::http::HeaderValue;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::auth::SharedThrottle;
use crate::config::GatewayConfig;
use crate::credentials::CredentialCipher;
use crate::dispatch::Dispatcher;
use crate::metrics::Metrics;

/// Shared application state handed to every handler. Everything inside is
/// already cheaply cloneable (`Arc`/pool-backed), matching [`Dispatcher`].
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Dispatcher,
    pub throttle: SharedThrottle,
    pub master_security_token: String,
    pub demo_mode: bool,
    pub metrics: Metrics,
    pub credential_cipher: Arc<CredentialCipher>,
}

pub fn build_router(state: AppState, config: &GatewayConfig) -> Router {
    let cors = if let Ok(origins) = std::env::var("CORS_ALLOWED_ORIGINS") {
        let layer = CorsLayer::new();
        origins
            .split(',')
            .filter_map(|o| o.trim().parse::<HeaderValue>().ok())
            .fold(layer, |layer, origin| layer.allow_origin(origin))
    } else {
        CorsLayer::new()
    };

    let production = !config.demo_mode;

    Router::new()
        .route("/webhooks/{agent_id}/{channel}", post(webhooks::handle_webhook))
        .route("/api/v1/send-message", post(rest::send_message))
        .route("/api/v1/make-call", post(rest::make_call))
        .route("/api/v1/transfer-call", post(rest::transfer_call))
        .route("/api/v1/messages", get(rest::list_messages))
        .route("/api/v1/provision", post(rest::provision))
        .route("/api/v1/deprovision", post(rest::deprovision))
        .route("/api/v1/usage", get(rest::get_usage))
        .route("/api/v1/billing", get(rest::get_billing))
        .route("/api/v1/otp/request", post(rest::otp_request))
        .route("/api/v1/otp/verify", post(rest::otp_verify))
        .route("/health", get(health::liveness))
        .route("/health/ready", get(health::readiness))
        .route("/metrics", get(health::metrics))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(move |req, next| security_headers(req, next, production)))
        .with_state(state)
}

/// Apply the fixed security header set (spec §6) to every response. Admin
/// HTML pages are an external collaborator (spec §1 Non-goals) so the
/// relaxed CSP branch for them is not implemented here — every response
/// this core produces gets the strict, non-admin policy.
async fn security_headers(req: Request, next: Next, production: bool) -> Response {
    let mut response = next.run(req).await;
    let headers = response.headers_mut();
    headers.insert("X-Frame-Options", HeaderValue::from_static("DENY"));
    headers.insert("X-Content-Type-Options", HeaderValue::from_static("nosniff"));
    headers.insert(
        "Referrer-Policy",
        HeaderValue::from_static("strict-origin-when-cross-origin"),
    );
    headers.insert(
        "Content-Security-Policy",
        HeaderValue::from_static("default-src 'none'"),
    );
    if production {
        headers.insert(
            "Strict-Transport-Security",
            HeaderValue::from_static("max-age=63072000; includeSubDomains"),
        );
    }
    response
}
