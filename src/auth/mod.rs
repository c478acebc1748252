//! Multi-tenant authorization and tenant scoping (spec §4.1).
//!
//! Bearer tokens are SHA-256-hashed on presentation and never stored or
//! logged in plaintext, the same redaction discipline the teacher crate
//! applies to its own `Credentials` (`src/credentials.rs`).

use std::sync::Arc;
use std::time::Duration;

use sha2::{Digest, Sha256};
use sqlx::SqlitePool;

use crate::types::{Principal, Scope};

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("missing or invalid bearer token")]
    Denied,
    #[error("too many verification attempts")]
    RateLimited,
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
}

pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

/// Guards token verification against online brute force: a small
/// sliding-window counter per caller-presented hash prefix, independent of
/// the usage-log rate limiter since this runs before a principal — and
/// therefore an agent_id to key on — even exists.
pub struct VerificationThrottle {
    attempts: dashmap::DashMap<String, (u32, std::time::Instant)>,
    max_attempts: u32,
    window: Duration,
}

impl Default for VerificationThrottle {
    fn default() -> Self {
        Self {
            attempts: dashmap::DashMap::new(),
            max_attempts: 20,
            window: Duration::from_secs(60),
        }
    }
}

impl VerificationThrottle {
    pub fn check(&self, key: &str) -> Result<(), AuthError> {
        let mut entry = self
            .attempts
            .entry(key.to_owned())
            .or_insert((0, std::time::Instant::now()));
        if entry.1.elapsed() > self.window {
            *entry = (0, std::time::Instant::now());
        }
        if entry.0 >= self.max_attempts {
            return Err(AuthError::RateLimited);
        }
        entry.0 += 1;
        Ok(())
    }
}

/// Resolve a principal from an `Authorization: Bearer <token>` header
/// value (already stripped of the `Bearer ` prefix), the master token, and
/// `demo_mode`. Never logs the raw token.
pub async fn resolve_principal(
    db: &SqlitePool,
    throttle: &VerificationThrottle,
    presented_token: Option<&str>,
    master_token: &str,
    demo_mode: bool,
) -> Result<Principal, AuthError> {
    let Some(token) = presented_token else {
        if demo_mode {
            return Ok(Principal::demo_admin());
        }
        return Err(AuthError::Denied);
    };

    let hash = hash_token(token);
    throttle.check(&hash)?;

    if constant_time_str_eq(token, master_token) {
        return Ok(Principal {
            org_id: None,
            agent_id: None,
            scopes: vec![Scope::Admin, Scope::SuperAdmin],
        });
    }

    if let Some((org_id,)) = sqlx::query_as::<_, (String,)>(
        "SELECT org_id FROM org_tokens WHERE token_hash = ?1 AND revoked_at IS NULL",
    )
    .bind(&hash)
    .fetch_optional(db)
    .await?
    {
        return Ok(Principal {
            org_id: Some(org_id),
            agent_id: None,
            scopes: vec![Scope::Admin],
        });
    }

    if let Some((agent_id, org_id)) = sqlx::query_as::<_, (String, String)>(
        "SELECT agent_id, org_id FROM agent_tokens WHERE token_hash = ?1 AND revoked_at IS NULL",
    )
    .bind(&hash)
    .fetch_optional(db)
    .await?
    {
        sqlx::query("UPDATE agent_tokens SET last_used_at = ?1 WHERE token_hash = ?2")
            .bind(crate::types::now_iso())
            .bind(&hash)
            .execute(db)
            .await?;
        return Ok(Principal {
            org_id: Some(org_id),
            agent_id: Some(agent_id),
            scopes: vec![Scope::Agent],
        });
    }

    Err(AuthError::Denied)
}

fn constant_time_str_eq(a: &str, b: &str) -> bool {
    use subtle::ConstantTimeEq;
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

/// A `WHERE` clause fragment plus its bound parameters, appended by every
/// tenant-scoped query. Every public read/write ANDs this in.
pub struct ScopeClause {
    pub fragment: &'static str,
    pub org_id: String,
}

/// Build the tenant-scope clause for a principal. Super-admins (no bound
/// `org_id`) get an always-true fragment since they are not scoped to a
/// single org; every other principal is scoped to its own org.
pub fn org_scope_clause(principal: &Principal) -> Option<ScopeClause> {
    principal.org_id.as_ref().map(|org_id| ScopeClause {
        fragment: "org_id = ?",
        org_id: org_id.clone(),
    })
}

/// `requireAgent`: fails unless the principal *is* this agent, or is admin.
pub fn require_agent(principal: &Principal, agent_id: &str) -> Result<(), AuthError> {
    if principal.require_agent(agent_id) {
        Ok(())
    } else {
        Err(AuthError::Denied)
    }
}

/// `requireAgentInOrg`: additionally verifies the agent row's `org_id`
/// matches the principal's bound org (a no-op check for super-admins, who
/// have no bound org).
pub async fn require_agent_in_org(
    db: &SqlitePool,
    principal: &Principal,
    agent_id: &str,
) -> Result<(), AuthError> {
    require_agent(principal, agent_id)?;
    if principal.is_super_admin() {
        return Ok(());
    }
    let Some(principal_org) = &principal.org_id else {
        return Err(AuthError::Denied);
    };
    let row: Option<(String,)> = sqlx::query_as("SELECT org_id FROM agent_channels WHERE agent_id = ?1")
        .bind(agent_id)
        .fetch_optional(db)
        .await?;
    match row {
        Some((org_id,)) if &org_id == principal_org => Ok(()),
        _ => Err(AuthError::Denied),
    }
}

/// Super-admin-only operations (org create/list).
pub fn require_super_admin(principal: &Principal) -> Result<(), AuthError> {
    if principal.is_super_admin() {
        Ok(())
    } else {
        Err(AuthError::Denied)
    }
}

pub type SharedThrottle = Arc<VerificationThrottle>;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn demo_mode_injects_admin_without_token() {
        let db = crate::db::Db::connect_in_memory().await.unwrap();
        let throttle = VerificationThrottle::default();
        let principal = resolve_principal(db.pool(), &throttle, None, "master", true)
            .await
            .unwrap();
        assert!(principal.is_admin());
        assert!(principal.is_super_admin());
    }

    #[tokio::test]
    async fn no_token_denied_outside_demo_mode() {
        let db = crate::db::Db::connect_in_memory().await.unwrap();
        let throttle = VerificationThrottle::default();
        let result = resolve_principal(db.pool(), &throttle, None, "master", false).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn master_token_grants_super_admin() {
        let db = crate::db::Db::connect_in_memory().await.unwrap();
        let throttle = VerificationThrottle::default();
        let principal = resolve_principal(db.pool(), &throttle, Some("master-secret"), "master-secret", false)
            .await
            .unwrap();
        assert!(principal.is_super_admin());
    }

    #[tokio::test]
    async fn agent_token_resolves_scoped_principal() {
        let db = crate::db::Db::connect_in_memory().await.unwrap();
        sqlx::query("INSERT INTO organizations (id, name, slug, created_at) VALUES ('org1','Org','org1', ?1)")
            .bind(crate::types::now_iso())
            .execute(db.pool())
            .await
            .unwrap();
        sqlx::query(
            "INSERT INTO agent_channels (agent_id, org_id, display_name, blocked_channels, created_at) \
             VALUES ('agent1', 'org1', 'Agent', '', ?1)",
        )
        .bind(crate::types::now_iso())
        .execute(db.pool())
        .await
        .unwrap();
        let hash = hash_token("plaintext-token");
        sqlx::query(
            "INSERT INTO agent_tokens (token_hash, agent_id, org_id, created_at) VALUES (?1, 'agent1', 'org1', ?2)",
        )
        .bind(&hash)
        .bind(crate::types::now_iso())
        .execute(db.pool())
        .await
        .unwrap();

        let throttle = VerificationThrottle::default();
        let principal = resolve_principal(db.pool(), &throttle, Some("plaintext-token"), "master", false)
            .await
            .unwrap();
        assert_eq!(principal.agent_id.as_deref(), Some("agent1"));
        assert_eq!(principal.org_id.as_deref(), Some("org1"));
        assert!(!principal.is_admin());
    }

    #[tokio::test]
    async fn require_agent_rejects_other_agent() {
        let principal = Principal {
            org_id: Some("org1".to_owned()),
            agent_id: Some("agent1".to_owned()),
            scopes: vec![Scope::Agent],
        };
        assert!(require_agent(&principal, "agent1").is_ok());
        assert!(require_agent(&principal, "agent2").is_err());
    }

    #[test]
    fn throttle_trips_after_max_attempts() {
        let throttle = VerificationThrottle {
            attempts: dashmap::DashMap::new(),
            max_attempts: 3,
            window: Duration::from_secs(60),
        };
        for _ in 0..3 {
            throttle.check("h").unwrap();
        }
        assert!(throttle.check("h").is_err());
    }
}
