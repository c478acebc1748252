//! Provisioning saga (spec §4.7): allocate cross-resource identities for a
//! new agent with compensating rollback on any step failure, and its
//! inverse for deprovisioning. Grounded on the teacher's multi-step
//! recoverable-flow idiom (its deleted `kernel::recovery`/`kernel::pipeline`
//! modules chained fallible steps with explicit undo), rebuilt here as an
//! explicit `Vec` of compensations pushed only once a step actually
//! committed, so a rollback never calls an inverse for work that never
//! happened.

use rand::RngCore;
use serde_json::json;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::auth::hash_token;
use crate::providers::ProviderSet;
use crate::types::{encode_blocked_channels, now_iso, Channel};

#[derive(Debug, thiserror::Error)]
pub enum ProvisioningError {
    #[error("agent {0} already exists")]
    AlreadyExists(String),
    #[error("organization has no free agent slots")]
    PoolFull,
    #[error("provider error: {0}")]
    Provider(String),
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
}

#[derive(Debug, Clone, Default)]
pub struct Capabilities {
    pub phone: bool,
    pub whatsapp: bool,
    pub email: bool,
    pub voice_ai: bool,
}

#[derive(Debug, Clone)]
pub struct ProvisionRequest {
    pub agent_id: String,
    pub org_id: String,
    pub display_name: String,
    pub capabilities: Capabilities,
    pub country: String,
    pub email_domain: String,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ProvisionResult {
    pub agent_id: String,
    pub plaintext_token: String,
    pub phone_number: Option<String>,
    pub whatsapp_sender_sid: Option<String>,
    pub email_address: Option<String>,
    pub pool_slots_remaining: i64,
}

enum Compensation {
    ReleaseNumber(String),
    DeleteAgentRow(String),
    ReturnWhatsappToPool(String),
    DecrementActiveAgents(String),
    RevokeToken(String),
}

async fn run_compensations(db: &SqlitePool, providers: &ProviderSet, mut stack: Vec<Compensation>) {
    while let Some(step) = stack.pop() {
        let result: Result<(), String> = match &step {
            Compensation::ReleaseNumber(number) => providers
                .telephony
                .release_number(number)
                .await
                .map_err(|e| e.to_string()),
            Compensation::DeleteAgentRow(agent_id) => sqlx::query("DELETE FROM agent_channels WHERE agent_id = ?1")
                .bind(agent_id)
                .execute(db)
                .await
                .map(|_| ())
                .map_err(|e| e.to_string()),
            Compensation::ReturnWhatsappToPool(sender_sid) => sqlx::query(
                "UPDATE whatsapp_pool SET status = 'available', assigned_to_agent = NULL WHERE sender_sid = ?1",
            )
            .bind(sender_sid)
            .execute(db)
            .await
            .map(|_| ())
            .map_err(|e| e.to_string()),
            Compensation::DecrementActiveAgents(org_id) => {
                sqlx::query("UPDATE agent_pool SET active_agents = active_agents - 1 WHERE org_id = ?1")
                    .bind(org_id)
                    .execute(db)
                    .await
                    .map(|_| ())
                    .map_err(|e| e.to_string())
            }
            Compensation::RevokeToken(token_hash) => {
                sqlx::query("UPDATE agent_tokens SET revoked_at = ?1 WHERE token_hash = ?2")
                    .bind(now_iso())
                    .bind(token_hash)
                    .execute(db)
                    .await
                    .map(|_| ())
                    .map_err(|e| e.to_string())
            }
        };
        if let Err(detail) = result {
            tracing::error!(detail, "provisioning compensation step failed; continuing rollback");
        }
    }
}

/// Run the provisioning saga. On any step failure, every committed step so
/// far is compensated in reverse order before the error is returned.
pub async fn provision(
    db: &SqlitePool,
    providers: &ProviderSet,
    req: ProvisionRequest,
) -> Result<ProvisionResult, ProvisioningError> {
    let existing: Option<(String,)> = sqlx::query_as("SELECT agent_id FROM agent_channels WHERE agent_id = ?1")
        .bind(&req.agent_id)
        .fetch_optional(db)
        .await?;
    if existing.is_some() {
        return Err(ProvisioningError::AlreadyExists(req.agent_id));
    }

    let pool: Option<(i64, i64)> = sqlx::query_as("SELECT max_agents, active_agents FROM agent_pool WHERE org_id = ?1")
        .bind(&req.org_id)
        .fetch_optional(db)
        .await?;
    let (max_agents, active_agents) = pool.unwrap_or((i64::MAX, 0));
    if active_agents >= max_agents {
        return Err(ProvisioningError::PoolFull);
    }

    let mut compensations = Vec::new();

    // Step 1: phone / voice-AI number.
    let phone_number = if req.capabilities.phone || req.capabilities.voice_ai {
        match providers.telephony.buy_number(&req.country, req.capabilities.voice_ai).await {
            Ok(purchased) => {
                compensations.push(Compensation::ReleaseNumber(purchased.phone_number.clone()));
                if let Err(e) = providers
                    .telephony
                    .configure_webhooks(&purchased.phone_number, "https://placeholder.invalid")
                    .await
                {
                    run_compensations(db, providers, compensations).await;
                    return Err(ProvisioningError::Provider(e.to_string()));
                }
                Some(purchased.phone_number)
            }
            Err(e) => {
                run_compensations(db, providers, compensations).await;
                return Err(ProvisioningError::Provider(e.to_string()));
            }
        }
    } else {
        None
    };

    // Step 2: email local-part derivation (no external call, no compensation).
    let email_address = req.capabilities.email.then(|| format!("{}@{}", req.agent_id, req.email_domain));

    // Step 3: insert agent_channels row.
    let insert_result = sqlx::query(
        "INSERT INTO agent_channels (agent_id, org_id, display_name, phone_number, email_address, \
         blocked_channels, status, created_at) VALUES (?1, ?2, ?3, ?4, ?5, '', 'active', ?6)",
    )
    .bind(&req.agent_id)
    .bind(&req.org_id)
    .bind(&req.display_name)
    .bind(&phone_number)
    .bind(&email_address)
    .bind(now_iso())
    .execute(db)
    .await;

    if let Err(e) = insert_result {
        run_compensations(db, providers, compensations).await;
        return Err(ProvisioningError::Db(e));
    }
    compensations.push(Compensation::DeleteAgentRow(req.agent_id.clone()));

    // Step 4: WhatsApp pool assignment (soft failure — a miss does not
    // abort the saga, it only records `whatsapp_status='unavailable'`).
    let mut whatsapp_sender_sid = None;
    if req.capabilities.whatsapp {
        let assigned: Option<(String,)> = match sqlx::query_as(
            "UPDATE whatsapp_pool SET status = 'assigned', assigned_to_agent = ?1 \
             WHERE phone_number = (SELECT phone_number FROM whatsapp_pool WHERE org_id = ?2 AND status = 'available' LIMIT 1) \
             RETURNING sender_sid",
        )
        .bind(&req.agent_id)
        .bind(&req.org_id)
        .fetch_optional(db)
        .await
        {
            Ok(row) => row,
            Err(e) => {
                run_compensations(db, providers, compensations).await;
                return Err(ProvisioningError::Db(e));
            }
        };

        match assigned {
            Some((sender_sid,)) => {
                if let Err(e) = sqlx::query("UPDATE agent_channels SET whatsapp_sender_sid = ?1 WHERE agent_id = ?2")
                    .bind(&sender_sid)
                    .bind(&req.agent_id)
                    .execute(db)
                    .await
                {
                    run_compensations(db, providers, compensations).await;
                    return Err(ProvisioningError::Db(e));
                }
                compensations.push(Compensation::ReturnWhatsappToPool(sender_sid.clone()));
                whatsapp_sender_sid = Some(sender_sid);
            }
            None => {
                tracing::warn!(agent_id = %req.agent_id, "whatsapp pool exhausted, soft failure");
            }
        }
    }

    // Step 5: increment active_agents. The `WHERE` on the conflict action
    // makes this the sole point of truth for the pool cap: it affects zero
    // rows if a concurrent provision already filled the last slot between
    // the precheck above and here, rather than trusting that earlier read.
    match sqlx::query(
        "INSERT INTO agent_pool (org_id, max_agents, active_agents) VALUES (?1, 999999, 1) \
         ON CONFLICT(org_id) DO UPDATE SET active_agents = active_agents + 1 \
         WHERE agent_pool.active_agents < agent_pool.max_agents",
    )
    .bind(&req.org_id)
    .execute(db)
    .await
    {
        Ok(result) if result.rows_affected() == 0 => {
            run_compensations(db, providers, compensations).await;
            return Err(ProvisioningError::PoolFull);
        }
        Ok(_) => {}
        Err(e) => {
            run_compensations(db, providers, compensations).await;
            return Err(ProvisioningError::Db(e));
        }
    }
    compensations.push(Compensation::DecrementActiveAgents(req.org_id.clone()));

    // Step 6: mint agent token.
    let mut raw = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut raw);
    let plaintext_token = hex::encode(raw);
    let token_hash = hash_token(&plaintext_token);
    if let Err(e) = sqlx::query(
        "INSERT INTO agent_tokens (token_hash, agent_id, org_id, created_at) VALUES (?1, ?2, ?3, ?4)",
    )
    .bind(&token_hash)
    .bind(&req.agent_id)
    .bind(&req.org_id)
    .bind(now_iso())
    .execute(db)
    .await
    {
        run_compensations(db, providers, compensations).await;
        return Err(ProvisioningError::Db(e));
    }
    compensations.push(Compensation::RevokeToken(token_hash));

    // Step 7: default spending limits.
    if let Err(e) = sqlx::query(
        "INSERT INTO spending_limits (agent_id, max_actions_per_minute, max_actions_per_hour, \
         max_actions_per_day, max_spend_per_day, max_spend_per_month) VALUES (?1, 5, 60, 200, 2.0, 20.0)",
    )
    .bind(&req.agent_id)
    .execute(db)
    .await
    {
        run_compensations(db, providers, compensations).await;
        return Err(ProvisioningError::Db(e));
    }

    // Step 8: audit.
    let _ = crate::audit::append(
        db,
        Some(&req.org_id),
        "agent_provisioned",
        "system",
        Some(&req.agent_id),
        Some(&json!({ "displayName": req.display_name })),
    )
    .await;

    let (_, active_agents): (i64, i64) = sqlx::query_as("SELECT max_agents, active_agents FROM agent_pool WHERE org_id = ?1")
        .bind(&req.org_id)
        .fetch_one(db)
        .await?;

    Ok(ProvisionResult {
        agent_id: req.agent_id,
        plaintext_token,
        phone_number,
        whatsapp_sender_sid,
        email_address,
        pool_slots_remaining: (max_agents - active_agents).max(0),
    })
}

/// Deprovision: the same saga inverted. Release number and WhatsApp return
/// are non-fatal (logged, not aborting); token revocation, spending-limit
/// deletion, pool decrement, and status flip always run.
pub async fn deprovision(
    db: &SqlitePool,
    providers: &ProviderSet,
    agent_id: &str,
    org_id: &str,
) -> Result<(), ProvisioningError> {
    let row: Option<(Option<String>, Option<String>)> =
        sqlx::query_as("SELECT phone_number, whatsapp_sender_sid FROM agent_channels WHERE agent_id = ?1 AND org_id = ?2")
            .bind(agent_id)
            .bind(org_id)
            .fetch_optional(db)
            .await?;
    let Some((phone_number, whatsapp_sender_sid)) = row else {
        return Err(ProvisioningError::Db(sqlx::Error::RowNotFound));
    };

    if let Some(number) = &phone_number {
        if let Err(e) = providers.telephony.release_number(number).await {
            tracing::warn!(error = %e, "release_number failed during deprovisioning, continuing");
        }
    }
    if let Some(sender_sid) = &whatsapp_sender_sid {
        let _ = sqlx::query(
            "UPDATE whatsapp_pool SET status = 'available', assigned_to_agent = NULL WHERE sender_sid = ?1",
        )
        .bind(sender_sid)
        .execute(db)
        .await;
    }

    sqlx::query("UPDATE agent_tokens SET revoked_at = ?1 WHERE agent_id = ?2 AND revoked_at IS NULL")
        .bind(now_iso())
        .bind(agent_id)
        .execute(db)
        .await?;
    sqlx::query("DELETE FROM spending_limits WHERE agent_id = ?1")
        .bind(agent_id)
        .execute(db)
        .await?;
    sqlx::query("UPDATE agent_channels SET status = 'deprovisioned' WHERE agent_id = ?1")
        .bind(agent_id)
        .execute(db)
        .await?;
    sqlx::query("UPDATE agent_pool SET active_agents = active_agents - 1 WHERE org_id = ?1")
        .bind(org_id)
        .execute(db)
        .await?;

    crate::audit::append(db, Some(org_id), "agent_deprovisioned", "system", Some(agent_id), None)
        .await
        .map_err(|e| match e {
            crate::audit::AuditError::Db(inner) => ProvisioningError::Db(inner),
        })?;

    Ok(())
}

/// Unused in the current row shape but documents the wildcard-block
/// encoding referenced by agent-blocking code elsewhere.
#[allow(dead_code)]
fn block_all() -> String {
    encode_blocked_channels(&[Channel::Sms, Channel::Whatsapp, Channel::Email, Channel::Voice, Channel::Line])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::ProviderSet;

    async fn seed_org(db: &SqlitePool) {
        sqlx::query("INSERT INTO organizations (id, name, slug, created_at) VALUES ('org1','Org','org1', ?1)")
            .bind(now_iso())
            .execute(db)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn successful_provision_mints_a_token_and_a_number() {
        let db = crate::db::Db::connect_in_memory().await.unwrap();
        seed_org(db.pool()).await;
        let providers = ProviderSet::mock();

        let result = provision(
            db.pool(),
            &providers,
            ProvisionRequest {
                agent_id: "agentx".to_owned(),
                org_id: "org1".to_owned(),
                display_name: "Agent X".to_owned(),
                capabilities: Capabilities {
                    phone: true,
                    ..Default::default()
                },
                country: "US".to_owned(),
                email_domain: "example.com".to_owned(),
            },
        )
        .await
        .unwrap();

        assert!(result.phone_number.is_some());
        assert!(!result.plaintext_token.is_empty());
    }

    #[tokio::test]
    async fn buy_number_failure_rolls_back_fully() {
        let db = crate::db::Db::connect_in_memory().await.unwrap();
        seed_org(db.pool()).await;
        let telephony = crate::providers::telephony::MockTelephony::default();
        telephony.set_fail_buy_number(true);
        let providers = ProviderSet {
            telephony: Box::new(telephony),
            email: Box::new(crate::providers::email::MockEmail::default()),
            whatsapp: Box::new(crate::providers::whatsapp::MockWhatsapp::default()),
            tts: Box::new(crate::providers::tts::MockTts::default()),
            storage: Box::new(crate::providers::storage::MockStorage::default()),
        };

        let result = provision(
            db.pool(),
            &providers,
            ProvisionRequest {
                agent_id: "agentx".to_owned(),
                org_id: "org1".to_owned(),
                display_name: "Agent X".to_owned(),
                capabilities: Capabilities {
                    phone: true,
                    ..Default::default()
                },
                country: "US".to_owned(),
                email_domain: "example.com".to_owned(),
            },
        )
        .await;

        assert!(result.is_err());
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM agent_channels WHERE agent_id = 'agentx'")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(count, 0);
        let (tokens,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM agent_tokens WHERE agent_id = 'agentx'")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(tokens, 0);
    }

    /// Exercises the atomic increment query in isolation: this is the
    /// overshoot guard the saga's step 5 relies on, independent of the
    /// single-threaded precheck that runs before it.
    #[tokio::test]
    async fn atomic_increment_refuses_once_pool_is_full() {
        let db = crate::db::Db::connect_in_memory().await.unwrap();
        sqlx::query("INSERT INTO agent_pool (org_id, max_agents, active_agents) VALUES ('org1', 1, 1)")
            .execute(db.pool())
            .await
            .unwrap();

        let result = sqlx::query(
            "INSERT INTO agent_pool (org_id, max_agents, active_agents) VALUES (?1, 999999, 1) \
             ON CONFLICT(org_id) DO UPDATE SET active_agents = active_agents + 1 \
             WHERE agent_pool.active_agents < agent_pool.max_agents",
        )
        .bind("org1")
        .execute(db.pool())
        .await
        .unwrap();
        assert_eq!(result.rows_affected(), 0);

        let (active_agents,): (i64,) = sqlx::query_as("SELECT active_agents FROM agent_pool WHERE org_id = 'org1'")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(active_agents, 1, "a refused increment must not have mutated the row");
    }
}
