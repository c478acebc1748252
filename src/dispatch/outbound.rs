//! Outbound send pipeline (spec §4.5): auth -> agent lookup -> sanitize ->
//! compliance -> rate limit -> sender-select -> provider dispatch ->
//! audit/usage/metrics, with a dead-letter on provider failure.

use serde_json::json;
use uuid::Uuid;

use crate::auth;
use crate::compliance::{self, ComplianceRequest};
use crate::deadletter::{self, NewDeadLetter};
use crate::error::GatewayError;
use crate::providers::{EmailProvider, SendMessageRequest, Storage, Telephony, Tts, WhatsappProvider};
use crate::ratelimit;
use crate::routing;
use crate::sanitize;
use crate::types::{AgentChannel, AgentStatus, Channel, Direction, Principal, SendResult};

use super::Dispatcher;

/// What kind of outbound action this is, driving step 7's channel-specific
/// branch.
#[derive(Debug, Clone)]
pub enum OutboundAction {
    Send {
        body: Option<String>,
        template_id: Option<String>,
        template_vars: Option<serde_json::Value>,
        media_url: Option<String>,
    },
    Email {
        subject: String,
        body: String,
        html: Option<String>,
    },
    VoiceMessage {
        body: String,
    },
    AiVoiceCall {
        config: serde_json::Value,
    },
    CallTransfer {
        call_sid: String,
        transfer_to: String,
    },
}

#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub agent_id: String,
    pub channel: Channel,
    pub to: String,
    pub recipient_timezone: Option<String>,
    pub action: OutboundAction,
}

async fn load_active_agent(
    db: &sqlx::SqlitePool,
    agent_id: &str,
    org_id: &str,
) -> Result<AgentChannel, GatewayError> {
    let row: Option<(
        String,
        String,
        String,
        Option<String>,
        Option<String>,
        Option<String>,
        Option<String>,
        Option<String>,
        Option<String>,
        String,
        String,
    )> = sqlx::query_as(
        "SELECT agent_id, org_id, display_name, phone_number, whatsapp_sender_sid, email_address, \
         voice_id, system_prompt, greeting, blocked_channels, status \
         FROM agent_channels WHERE agent_id = ?1 AND org_id = ?2",
    )
    .bind(agent_id)
    .bind(org_id)
    .fetch_optional(db)
    .await?;

    let Some((
        agent_id,
        org_id,
        display_name,
        phone_number,
        whatsapp_sender_sid,
        email_address,
        voice_id,
        system_prompt,
        greeting,
        blocked_channels,
        status,
    )) = row
    else {
        return Err(GatewayError::NotFound(format!("agent {agent_id} not found")));
    };

    Ok(AgentChannel {
        agent_id,
        org_id,
        display_name,
        phone_number,
        whatsapp_sender_sid,
        email_address,
        voice_id,
        system_prompt,
        greeting,
        blocked_channels: crate::types::decode_blocked_channels(&blocked_channels),
        status: AgentStatus::parse(&status).unwrap_or(AgentStatus::Active),
    })
}

/// Run the full outbound pipeline for a single send.
pub async fn send(
    dispatcher: &Dispatcher,
    principal: &Principal,
    req: OutboundRequest,
) -> Result<SendResult, GatewayError> {
    // 1. auth
    auth::require_agent(principal, &req.agent_id).map_err(|_| GatewayError::AuthDenied(req.agent_id.clone()))?;
    let org_id = principal
        .org_id
        .clone()
        .ok_or_else(|| GatewayError::AuthDenied("principal has no bound org".to_owned()))?;

    // 2. agent lookup
    let agent = load_active_agent(&dispatcher.db, &req.agent_id, &org_id).await?;
    if agent.status != AgentStatus::Active {
        return Err(GatewayError::Conflict("agent is deprovisioned".to_owned()));
    }
    if agent.blocks(req.channel) {
        return Err(GatewayError::ComplianceDenied(format!(
            "{} is blocked for this agent",
            req.channel
        )));
    }

    // 3. sanitize
    sanitize::validate_e164("to", &req.to).or_else(|_| sanitize::validate_email("to", &req.to))?;
    let body_for_checks = action_body(&req.action);
    if let Some(body) = &body_for_checks {
        sanitize::sanitize_text("body", body)?;
    }

    // the recipient country is never trusted from the caller: it's derived
    // here, once, from the E.164 prefix, and fed to both the compliance
    // gate's TCPA window check and sender selection's country match.
    let recipient_country = routing::country_from_e164(&req.to);

    // 4. compliance gate
    let outcome = compliance::check(
        &dispatcher.db,
        &ComplianceRequest {
            org_id: &org_id,
            to_address: &req.to,
            body: body_for_checks.as_deref().unwrap_or(""),
            channel: req.channel,
            recipient_timezone: req.recipient_timezone.as_deref(),
            recipient_country,
            has_recording_announcement: matches!(&req.action, OutboundAction::AiVoiceCall { config } if config.get("announcement").is_some()),
            all_party_consent_jurisdiction: matches!(req.channel, Channel::Voice),
        },
    )
    .await?;
    if let Some(warning) = outcome.warning {
        crate::audit::append(
            &dispatcher.db,
            Some(&org_id),
            "recording_consent_warning",
            &req.agent_id,
            Some(&req.to),
            Some(&json!({ "warning": warning })),
        )
        .await
        .map_err(anyhow_internal)?;
    }

    // 5. rate limit
    ratelimit::check(&dispatcher.db, &req.agent_id).await?;

    // 6. sender selection (email dispatches from the agent's own mailbox,
    // never the phone-number pool, so routing is skipped entirely)
    let from = if req.channel == Channel::Email {
        String::new()
    } else {
        routing::select_sender(
            &dispatcher.db,
            &org_id,
            req.channel,
            recipient_country,
            agent.phone_number.as_deref(),
        )
        .await
        .map_err(|e| GatewayError::Internal(anyhow::anyhow!(e)))?
    };

    // 7. provider dispatch + 8/9 outcome handling
    dispatch_action(dispatcher, &org_id, &agent, &from, &req).await
}

fn action_body(action: &OutboundAction) -> Option<String> {
    match action {
        OutboundAction::Send { body, .. } => body.clone(),
        OutboundAction::Email { body, .. } => Some(body.clone()),
        OutboundAction::VoiceMessage { body } => Some(body.clone()),
        OutboundAction::AiVoiceCall { .. } => None,
        OutboundAction::CallTransfer { .. } => None,
    }
}

fn anyhow_internal(e: crate::audit::AuditError) -> GatewayError {
    GatewayError::Internal(anyhow::anyhow!(e))
}

/// Apply the agent's `billing_config.markup_percent` (default 0, when no
/// row exists) to a raw provider cost: `cost * (1 + markup_percent/100)`.
async fn apply_markup(db: &sqlx::SqlitePool, agent_id: &str, cost: f64) -> f64 {
    let row: Option<(f64,)> = sqlx::query_as("SELECT markup_percent FROM billing_config WHERE agent_id = ?1")
        .bind(agent_id)
        .fetch_optional(db)
        .await
        .unwrap_or(None);
    let markup_percent = row.map(|(m,)| m).unwrap_or(0.0);
    cost * (1.0 + markup_percent / 100.0)
}

async fn dispatch_action(
    dispatcher: &Dispatcher,
    org_id: &str,
    agent: &AgentChannel,
    from: &str,
    req: &OutboundRequest,
) -> Result<SendResult, GatewayError> {
    let action_type = action_type_name(&req.action, req.channel);

    let result = match (&req.action, req.channel) {
        (OutboundAction::Send { body, template_id, template_vars, media_url }, Channel::Sms) => {
            let send_req = SendMessageRequest {
                from: from.to_owned(),
                to: req.to.clone(),
                body: body.clone(),
                template_id: template_id.clone(),
                template_vars: template_vars.clone(),
                media_url: media_url.clone(),
            };
            dispatcher.providers.telephony.send_sms(&send_req).await
        }
        (OutboundAction::Send { body, template_id, template_vars, media_url }, Channel::Whatsapp) => {
            let send_req = SendMessageRequest {
                from: from.to_owned(),
                to: req.to.clone(),
                body: body.clone(),
                template_id: template_id.clone(),
                template_vars: template_vars.clone(),
                media_url: media_url.clone(),
            };
            dispatcher.providers.whatsapp.send(&send_req).await
        }
        (OutboundAction::VoiceMessage { body }, Channel::Voice) => {
            let audio = dispatcher
                .providers
                .tts
                .synthesize(agent.voice_id.as_deref(), body)
                .await;
            match audio {
                Ok(bytes) => {
                    let key = format!("voice-{}.wav", Uuid::new_v4());
                    let url = dispatcher.providers.storage.put(&key, bytes, "audio/wav").await;
                    match url {
                        Ok(url) => {
                            let twiml = format!("<Response><Play>{url}</Play></Response>");
                            dispatcher
                                .providers
                                .telephony
                                .make_call(from, &req.to, &twiml)
                                .await
                                .map(|r| crate::providers::DispatchReceipt {
                                    external_id: r.call_sid,
                                    provider_status: r.status,
                                    cost: 0.02,
                                })
                        }
                        Err(e) => Err(e),
                    }
                }
                Err(e) => Err(e),
            }
        }
        (OutboundAction::AiVoiceCall { config }, Channel::Voice) => {
            let session_id = Uuid::new_v4().to_string();
            dispatcher.sessions.create(&session_id, &agent.agent_id, config.clone());
            let webhook_url = format!(
                "{}/webhooks/{}/outbound-voice?session={session_id}",
                dispatcher.webhook_base_url, agent.agent_id
            );
            dispatcher
                .providers
                .telephony
                .make_call(from, &req.to, &webhook_url)
                .await
                .map(|r| {
                    dispatcher.sessions.attach_call_sid(&session_id, &r.call_sid);
                    crate::providers::DispatchReceipt {
                        external_id: r.call_sid,
                        provider_status: r.status,
                        cost: 0.02,
                    }
                })
        }
        (OutboundAction::CallTransfer { call_sid, transfer_to }, Channel::Voice) => dispatcher
            .providers
            .telephony
            .transfer_call(call_sid, transfer_to)
            .await
            .map(|_| crate::providers::DispatchReceipt {
                external_id: call_sid.clone(),
                provider_status: "transferring".to_owned(),
                cost: 0.0,
            }),
        (OutboundAction::Email { subject, body, html }, Channel::Email) => {
            if subject.is_empty() {
                return Err(GatewayError::bad_input("subject", "subject is required"));
            }
            let from_addr = agent
                .email_address
                .clone()
                .ok_or_else(|| GatewayError::Conflict("agent has no email address".to_owned()))?;
            dispatcher
                .providers
                .email
                .send(&from_addr, &req.to, subject, body, html.as_deref())
                .await
        }
        _ => {
            return Err(GatewayError::bad_input(
                "channel",
                "action does not match requested channel",
            ))
        }
    };

    match result {
        Ok(receipt) => {
            let usage_id = Uuid::new_v4().to_string();
            let cost = apply_markup(&dispatcher.db, &agent.agent_id, receipt.cost).await;
            ratelimit::record_usage(
                &dispatcher.db,
                &usage_id,
                &agent.agent_id,
                org_id,
                &action_type,
                req.channel,
                &req.to,
                cost,
                Some(&receipt.external_id),
            )
            .await?;
            dispatcher
                .metrics
                .incr_counter("mcp_messages_sent_total", &[("channel", req.channel.as_str())]);

            if matches!(req.channel, Channel::Voice) {
                sqlx::query(
                    "INSERT INTO call_logs (id, agent_id, org_id, call_sid, direction, from_address, \
                     to_address, status, created_at) VALUES (?1, ?2, ?3, ?4, 'outbound', ?5, ?6, ?7, ?8)",
                )
                .bind(Uuid::new_v4().to_string())
                .bind(&agent.agent_id)
                .bind(org_id)
                .bind(&receipt.external_id)
                .bind(from)
                .bind(&req.to)
                .bind(&receipt.provider_status)
                .bind(crate::types::now_iso())
                .execute(&dispatcher.db)
                .await?;
            }

            Ok(SendResult {
                success: true,
                external_id: receipt.external_id,
                from: from.to_owned(),
                to: req.to.clone(),
                status: receipt.provider_status,
            })
        }
        Err(provider_err) => {
            deadletter::enqueue(
                &dispatcher.db,
                NewDeadLetter {
                    agent_id: &agent.agent_id,
                    org_id,
                    channel: req.channel,
                    direction: Direction::Outbound,
                    reason: "send_failed",
                    from_address: Some(from),
                    to_address: Some(&req.to),
                    body: action_body(&req.action).as_deref(),
                    media_url: None,
                    original_request: Some(&json!({ "to": req.to, "channel": req.channel.as_str() })),
                    error_details: Some(&provider_err.detail),
                    external_id: None,
                },
            )
            .await?;
            Err(GatewayError::ProviderError {
                provider: provider_err.provider,
            })
        }
    }
}

fn action_type_name(action: &OutboundAction, channel: Channel) -> String {
    match action {
        OutboundAction::Send { .. } => format!("{}_send", channel.as_str()),
        OutboundAction::Email { .. } => "email_send".to_owned(),
        OutboundAction::VoiceMessage { .. } => "voice_message".to_owned(),
        OutboundAction::AiVoiceCall { .. } => "ai_voice_call".to_owned(),
        OutboundAction::CallTransfer { .. } => "call_transfer".to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::ProviderSet;
    use crate::replay::ReplayCache;
    use crate::session::SessionRegistry;
    use crate::types::Scope;
    use std::sync::Arc;

    async fn test_dispatcher() -> Dispatcher {
        let db = crate::db::Db::connect_in_memory().await.unwrap();
        Dispatcher {
            db: db.pool().clone(),
            providers: Arc::new(ProviderSet::mock()),
            metrics: crate::metrics::Metrics::new(),
            sessions: Arc::new(SessionRegistry::new()),
            replay: Arc::new(ReplayCache::default()),
            webhook_base_url: "https://example.test".to_owned(),
            demo_mode: true,
        }
    }

    async fn seed_agent(dispatcher: &Dispatcher) {
        sqlx::query("INSERT INTO organizations (id, name, slug, created_at) VALUES ('org1','Org','org1', ?1)")
            .bind(crate::types::now_iso())
            .execute(&dispatcher.db)
            .await
            .unwrap();
        sqlx::query(
            "INSERT INTO agent_channels (agent_id, org_id, display_name, phone_number, blocked_channels, created_at) \
             VALUES ('agent1', 'org1', 'Agent', '+15550001111', '', ?1)",
        )
        .bind(crate::types::now_iso())
        .execute(&dispatcher.db)
        .await
        .unwrap();
        sqlx::query(
            "INSERT INTO number_pool (phone_number, org_id, country_code, is_default, created_at) \
             VALUES ('+15550001111', 'org1', 'US', 1, ?1)",
        )
        .bind(crate::types::now_iso())
        .execute(&dispatcher.db)
        .await
        .unwrap();
    }

    fn agent_principal() -> Principal {
        Principal {
            org_id: Some("org1".to_owned()),
            agent_id: Some("agent1".to_owned()),
            scopes: vec![Scope::Agent],
        }
    }

    #[tokio::test]
    async fn sms_send_succeeds_and_records_usage() {
        let dispatcher = test_dispatcher().await;
        seed_agent(&dispatcher).await;

        let result = send(
            &dispatcher,
            &agent_principal(),
            OutboundRequest {
                agent_id: "agent1".to_owned(),
                channel: Channel::Sms,
                to: "+15559998888".to_owned(),
                recipient_timezone: Some("UTC".to_owned()),
                action: OutboundAction::Send {
                    body: Some("hello there".to_owned()),
                    template_id: None,
                    template_vars: None,
                    media_url: None,
                },
            },
        )
        .await;

        assert!(result.is_ok(), "{result:?}");
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM usage_logs")
            .fetch_one(&dispatcher.db)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn blocked_channel_is_rejected() {
        let dispatcher = test_dispatcher().await;
        sqlx::query("INSERT INTO organizations (id, name, slug, created_at) VALUES ('org1','Org','org1', ?1)")
            .bind(crate::types::now_iso())
            .execute(&dispatcher.db)
            .await
            .unwrap();
        sqlx::query(
            "INSERT INTO agent_channels (agent_id, org_id, display_name, blocked_channels, created_at) \
             VALUES ('agent1', 'org1', 'Agent', 'sms', ?1)",
        )
        .bind(crate::types::now_iso())
        .execute(&dispatcher.db)
        .await
        .unwrap();

        let result = send(
            &dispatcher,
            &agent_principal(),
            OutboundRequest {
                agent_id: "agent1".to_owned(),
                channel: Channel::Sms,
                to: "+15559998888".to_owned(),
                recipient_timezone: Some("UTC".to_owned()),
                action: OutboundAction::Send {
                    body: Some("hi".to_owned()),
                    template_id: None,
                    template_vars: None,
                    media_url: None,
                },
            },
        )
        .await;

        assert!(matches!(result, Err(GatewayError::ComplianceDenied(_))));
    }

    #[tokio::test]
    async fn other_agent_principal_is_denied() {
        let dispatcher = test_dispatcher().await;
        seed_agent(&dispatcher).await;
        let other = Principal {
            org_id: Some("org1".to_owned()),
            agent_id: Some("agent2".to_owned()),
            scopes: vec![Scope::Agent],
        };

        let result = send(
            &dispatcher,
            &other,
            OutboundRequest {
                agent_id: "agent1".to_owned(),
                channel: Channel::Sms,
                to: "+15559998888".to_owned(),
                recipient_timezone: Some("UTC".to_owned()),
                action: OutboundAction::Send {
                    body: Some("hi".to_owned()),
                    template_id: None,
                    template_vars: None,
                    media_url: None,
                },
            },
        )
        .await;

        assert!(matches!(result, Err(GatewayError::AuthDenied(_))));
    }
}
