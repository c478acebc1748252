//! Unified error surface for the gateway (error kinds).
//!
//! Every module owns its own `thiserror` enum for the failures it can
//! produce; this module maps all of them onto the small, stable set of
//! error *kinds* that the HTTP layer and the tool-call surface expose to
//! callers. A kind never leaks its underlying cause text to the caller
//! except where the cause is itself caller-controlled (field name, limit
//! name).

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::audit::AuditError;
use crate::compliance::ComplianceError;
use crate::provisioning::ProvisioningError;
use crate::providers::ProviderError;
use crate::ratelimit::RateLimitError;
use crate::sanitize::SanitizeError;

/// The stable error vocabulary every public entry point returns.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Missing, invalid, or insufficiently scoped bearer token.
    #[error("auth denied: {0}")]
    AuthDenied(String),

    /// Resource absent within the caller's tenant scope.
    #[error("not found: {0}")]
    NotFound(String),

    /// Sanitization or schema validation failure.
    #[error("bad input: field {field}: {reason}")]
    BadInput {
        /// Which field failed validation.
        field: String,
        /// Why it failed.
        reason: String,
    },

    /// Uniqueness violation (agent already exists, pool full, ...).
    #[error("conflict: {0}")]
    Conflict(String),

    /// DNC / content / TCPA compliance gate rejection.
    #[error("compliance denied: {0}")]
    ComplianceDenied(String),

    /// A rate or spend limit was exceeded.
    #[error("rate limited: {limit_name} (resets {reset_hint})")]
    RateLimited {
        /// Name of the tightest-binding limit.
        limit_name: String,
        /// Human-readable reset hint.
        reset_hint: String,
    },

    /// Upstream provider failure or timeout. The dispatcher has already
    /// written a dead-letter by the time this is returned to the caller.
    #[error("provider error: {provider}")]
    ProviderError {
        /// Provider name (telephony, email, whatsapp, tts, storage).
        provider: String,
    },

    /// Unhandled internal failure. Never surfaces `cause` to the caller.
    #[error("internal error")]
    Internal(#[source] anyhow::Error),
}

impl GatewayError {
    /// String tag matching spec error kinds exactly.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::AuthDenied(_) => "auth_denied",
            Self::NotFound(_) => "not_found",
            Self::BadInput { .. } => "bad_input",
            Self::Conflict(_) => "conflict",
            Self::ComplianceDenied(_) => "compliance_denied",
            Self::RateLimited { .. } => "rate_limited",
            Self::ProviderError { .. } => "provider_error",
            Self::Internal(_) => "internal",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            Self::AuthDenied(_) => StatusCode::UNAUTHORIZED,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadInput { .. } => StatusCode::BAD_REQUEST,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::ComplianceDenied(_) => StatusCode::FORBIDDEN,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::ProviderError { .. } => StatusCode::BAD_GATEWAY,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Build a `bad_input` error for a named field.
    pub fn bad_input(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::BadInput {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    field: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    limit_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reset_hint: Option<String>,
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();
        let kind = self.kind();
        if let Self::Internal(ref cause) = self {
            tracing::error!(error = %cause, "internal error");
        }
        let body = match &self {
            Self::BadInput { field, reason } => ErrorBody {
                error: kind,
                message: reason.clone(),
                field: Some(field.clone()),
                limit_name: None,
                reset_hint: None,
            },
            Self::RateLimited {
                limit_name,
                reset_hint,
            } => ErrorBody {
                error: kind,
                message: self.to_string(),
                field: None,
                limit_name: Some(limit_name.clone()),
                reset_hint: Some(reset_hint.clone()),
            },
            Self::Internal(_) => ErrorBody {
                error: kind,
                message: "an internal error occurred".to_owned(),
                field: None,
                limit_name: None,
                reset_hint: None,
            },
            other => ErrorBody {
                error: kind,
                message: other.to_string(),
                field: None,
                limit_name: None,
                reset_hint: None,
            },
        };
        (status, axum::Json(body)).into_response()
    }
}

impl From<sqlx::Error> for GatewayError {
    fn from(e: sqlx::Error) -> Self {
        Self::Internal(anyhow::anyhow!(e))
    }
}

impl From<SanitizeError> for GatewayError {
    fn from(e: SanitizeError) -> Self {
        Self::bad_input(e.field, e.reason)
    }
}

impl From<ComplianceError> for GatewayError {
    fn from(e: ComplianceError) -> Self {
        Self::ComplianceDenied(e.to_string())
    }
}

impl From<RateLimitError> for GatewayError {
    fn from(e: RateLimitError) -> Self {
        Self::RateLimited {
            limit_name: e.limit_name,
            reset_hint: e.reset_hint,
        }
    }
}

impl From<ProviderError> for GatewayError {
    fn from(e: ProviderError) -> Self {
        Self::ProviderError {
            provider: e.provider,
        }
    }
}

impl From<AuditError> for GatewayError {
    fn from(e: AuditError) -> Self {
        Self::Internal(anyhow::anyhow!(e))
    }
}

impl From<ProvisioningError> for GatewayError {
    fn from(e: ProvisioningError) -> Self {
        match e {
            ProvisioningError::AlreadyExists(msg) => Self::Conflict(msg),
            ProvisioningError::PoolFull => Self::Conflict("resource pool exhausted".to_owned()),
            ProvisioningError::Provider(detail) => Self::ProviderError { provider: detail },
            ProvisioningError::Db(err) => Self::Internal(anyhow::anyhow!(err)),
        }
    }
}
