//! Carrier ingress: `POST /webhooks/{agentId}/{channel}` (spec §6).
//!
//! Forms are decoded per provider (Twilio form-encoded, LINE/email JSON),
//! but signature verification always runs against the raw body captured
//! before any decoder touches it (spec §9, Open Question c).

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};

use crate::dispatch::inbound::{self, IngressError};
use crate::providers::{EmailProvider, Telephony};
use crate::types::{Channel, NeutralInbound};

use super::AppState;

pub async fn handle_webhook(
    State(state): State<AppState>,
    Path((agent_id, channel_str)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Some(channel) = Channel::parse(&channel_str) else {
        return (StatusCode::NOT_FOUND, "unknown channel").into_response();
    };

    let (from, to, text_body, media_url, external_id, form_params) = match channel {
        Channel::Email | Channel::Line => parse_json_body(&body),
        Channel::Sms | Channel::Voice | Channel::Whatsapp => parse_form_body(&body),
    };

    let Some(from) = from else {
        return (StatusCode::BAD_REQUEST, "missing from address").into_response();
    };
    let Some(to) = to else {
        return (StatusCode::BAD_REQUEST, "missing to address").into_response();
    };

    let url = format!("{}/webhooks/{agent_id}/{channel_str}", state.dispatcher.webhook_base_url);
    let signature = signature_header(&headers, channel);

    let telephony = &state.dispatcher.providers.telephony;
    let email = &state.dispatcher.providers.email;

    let verify_result = inbound::verify_signature(
        &state.dispatcher,
        channel,
        &body,
        &url,
        &form_params,
        signature.unwrap_or(""),
        |url, params, sig| telephony.verify_webhook_signature(url, params, sig),
        |raw, sig| email.verify_signature(raw, sig),
    );

    if let Err(IngressError::BadSignature) = verify_result {
        return (StatusCode::UNAUTHORIZED, "signature verification failed").into_response();
    }

    let dedupe_key = external_id
        .clone()
        .unwrap_or_else(|| format!("{agent_id}:{channel_str}:{:x}", seahash_body(&body)));
    if !inbound::check_replay(&state.dispatcher, &dedupe_key) {
        return carrier_reply(channel);
    }

    let msg = NeutralInbound {
        channel,
        from,
        to,
        body: text_body,
        media_url,
        external_id,
    };

    match inbound::handle(&state.dispatcher, msg).await {
        Ok(outcome) => {
            let body = outcome.reply.body();
            let content_type = match outcome.reply {
                inbound::CarrierReply::Twiml => "application/xml",
                inbound::CarrierReply::Empty => "text/plain",
                inbound::CarrierReply::JsonOk => "application/json",
            };
            ([(axum::http::header::CONTENT_TYPE, content_type)], body).into_response()
        }
        Err(IngressError::UnknownAgent) => (StatusCode::NOT_FOUND, "unknown agent").into_response(),
        Err(IngressError::BadSignature) => {
            (StatusCode::UNAUTHORIZED, "signature verification failed").into_response()
        }
        Err(IngressError::Db(_)) => (StatusCode::INTERNAL_SERVER_ERROR, "internal error").into_response(),
    }
}

fn carrier_reply(channel: Channel) -> Response {
    let reply = inbound::CarrierReply::for_channel(channel);
    let content_type = match reply {
        inbound::CarrierReply::Twiml => "application/xml",
        inbound::CarrierReply::Empty => "text/plain",
        inbound::CarrierReply::JsonOk => "application/json",
    };
    ([(axum::http::header::CONTENT_TYPE, content_type)], reply.body()).into_response()
}

fn signature_header(headers: &HeaderMap, channel: Channel) -> Option<&str> {
    let name = match channel {
        Channel::Sms | Channel::Voice | Channel::Whatsapp => "x-twilio-signature",
        Channel::Line => "x-line-signature",
        Channel::Email => "x-webhook-signature",
    };
    headers.get(name).and_then(|v| v.to_str().ok())
}

type ParsedInbound = (
    Option<String>,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<String>,
    Vec<(String, String)>,
);

fn parse_form_body(body: &[u8]) -> ParsedInbound {
    let params: Vec<(String, String)> = serde_urlencoded::from_bytes(body).unwrap_or_default();
    let get = |key: &str| params.iter().find(|(k, _)| k == key).map(|(_, v)| v.clone());
    let from = get("From");
    let to = get("To");
    let text_body = get("Body");
    let media_url = get("MediaUrl0");
    let external_id = get("MessageSid").or_else(|| get("CallSid"));
    (from, to, text_body, media_url, external_id, params)
}

fn parse_json_body(body: &[u8]) -> ParsedInbound {
    let value: serde_json::Value = serde_json::from_slice(body).unwrap_or(serde_json::Value::Null);
    let from = value.get("from").and_then(|v| v.as_str()).map(str::to_owned);
    let to = value.get("to").and_then(|v| v.as_str()).map(str::to_owned);
    let text_body = value.get("body").and_then(|v| v.as_str()).map(str::to_owned);
    let media_url = value.get("media_url").and_then(|v| v.as_str()).map(str::to_owned);
    let external_id = value.get("id").and_then(|v| v.as_str()).map(str::to_owned);
    (from, to, text_body, media_url, external_id, Vec::new())
}

fn seahash_body(body: &[u8]) -> u64 {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(body);
    let digest = hasher.finalize();
    u64::from_be_bytes(digest[..8].try_into().unwrap_or([0; 8]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_twilio_form_body() {
        let body = b"From=%2B15551234567&To=%2B19995550000&Body=hi&MessageSid=SM123";
        let (from, to, text_body, _media, external_id, _params) = parse_form_body(body);
        assert_eq!(from.as_deref(), Some("+15551234567"));
        assert_eq!(to.as_deref(), Some("+19995550000"));
        assert_eq!(text_body.as_deref(), Some("hi"));
        assert_eq!(external_id.as_deref(), Some("SM123"));
    }

    #[test]
    fn parses_json_body() {
        let body = br#"{"from":"+15551234567","to":"+19995550000","body":"hi","id":"ext1"}"#;
        let (from, to, text_body, _media, external_id, _params) = parse_json_body(body);
        assert_eq!(from.as_deref(), Some("+15551234567"));
        assert_eq!(to.as_deref(), Some("+19995550000"));
        assert_eq!(text_body.as_deref(), Some("hi"));
        assert_eq!(external_id.as_deref(), Some("ext1"));
    }
}
