//! Sliding-window rate limiting and spend caps (spec §4.3).
//!
//! Counts and sums are computed directly from `usage_logs` at request time
//! rather than maintained as a separate running counter, the same
//! compute-on-read approach the teacher crate takes for session working
//! memory (`src/kernel/session.rs`) instead of a background aggregator.

use sqlx::SqlitePool;

/// The tightest-binding limit that was exceeded, named so the caller can
/// report which one and when it resets.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{limit_name} exceeded")]
pub struct RateLimitError {
    pub limit_name: String,
    pub reset_hint: String,
}

/// Per-agent limits, falling back to the billing tier default when the
/// agent has no `spending_limits` row of its own (SPEC_FULL §B).
#[derive(Debug, Clone, Default)]
pub struct Limits {
    pub max_actions_per_minute: Option<i64>,
    pub max_actions_per_hour: Option<i64>,
    pub max_actions_per_day: Option<i64>,
    pub max_spend_per_day: Option<f64>,
    pub max_spend_per_month: Option<f64>,
}

const TIER_FREE: Limits = Limits {
    max_actions_per_minute: Some(5),
    max_actions_per_hour: Some(60),
    max_actions_per_day: Some(200),
    max_spend_per_day: Some(2.0),
    max_spend_per_month: Some(20.0),
};

const TIER_PRO: Limits = Limits {
    max_actions_per_minute: Some(30),
    max_actions_per_hour: Some(600),
    max_actions_per_day: Some(5000),
    max_spend_per_day: Some(50.0),
    max_spend_per_month: Some(1000.0),
};

fn default_limits_for_tier(tier: &str) -> Limits {
    match tier {
        "pro" => TIER_PRO,
        "enterprise" => Limits::default(),
        _ => TIER_FREE,
    }
}

/// Load the effective limits for an agent: its own `spending_limits` row if
/// present, else the billing tier default, else the free tier.
pub async fn effective_limits(db: &SqlitePool, agent_id: &str) -> Result<Limits, sqlx::Error> {
    let own: Option<(
        Option<i64>,
        Option<i64>,
        Option<i64>,
        Option<f64>,
        Option<f64>,
    )> = sqlx::query_as(
        "SELECT max_actions_per_minute, max_actions_per_hour, max_actions_per_day, \
         max_spend_per_day, max_spend_per_month FROM spending_limits WHERE agent_id = ?1",
    )
    .bind(agent_id)
    .fetch_optional(db)
    .await?;

    if let Some((min, hour, day, spend_day, spend_month)) = own {
        return Ok(Limits {
            max_actions_per_minute: min,
            max_actions_per_hour: hour,
            max_actions_per_day: day,
            max_spend_per_day: spend_day,
            max_spend_per_month: spend_month,
        });
    }

    let tier: Option<(String,)> =
        sqlx::query_as("SELECT tier FROM billing_config WHERE agent_id = ?1")
            .bind(agent_id)
            .fetch_optional(db)
            .await?;

    Ok(default_limits_for_tier(
        tier.as_ref().map(|(t,)| t.as_str()).unwrap_or("free"),
    ))
}

/// Check every configured limit for `agent_id`, returning the first (most
/// binding, in minute/hour/day/spend-day/spend-month order) that is
/// exceeded.
pub async fn check(db: &SqlitePool, agent_id: &str) -> Result<(), RateLimitError> {
    let limits = effective_limits(db, agent_id)
        .await
        .map_err(|e| RateLimitError {
            limit_name: "lookup".to_owned(),
            reset_hint: e.to_string(),
        })?;

    if let Some(max) = limits.max_actions_per_minute {
        let count = count_actions_since(db, agent_id, "-1 minute").await?;
        if count >= max {
            return Err(RateLimitError {
                limit_name: "max_actions_per_minute".to_owned(),
                reset_hint: "60s".to_owned(),
            });
        }
    }
    if let Some(max) = limits.max_actions_per_hour {
        let count = count_actions_since(db, agent_id, "-1 hour").await?;
        if count >= max {
            return Err(RateLimitError {
                limit_name: "max_actions_per_hour".to_owned(),
                reset_hint: "1h".to_owned(),
            });
        }
    }
    if let Some(max) = limits.max_actions_per_day {
        let count = count_actions_since(db, agent_id, "-1 day").await?;
        if count >= max {
            return Err(RateLimitError {
                limit_name: "max_actions_per_day".to_owned(),
                reset_hint: "24h".to_owned(),
            });
        }
    }
    if let Some(max) = limits.max_spend_per_day {
        let spend = spend_since(db, agent_id, "-1 day").await?;
        if spend >= max {
            return Err(RateLimitError {
                limit_name: "max_spend_per_day".to_owned(),
                reset_hint: "24h".to_owned(),
            });
        }
    }
    if let Some(max) = limits.max_spend_per_month {
        let spend = spend_since(db, agent_id, "-30 days").await?;
        if spend >= max {
            return Err(RateLimitError {
                limit_name: "max_spend_per_month".to_owned(),
                reset_hint: "30d".to_owned(),
            });
        }
    }
    Ok(())
}

async fn count_actions_since(
    db: &SqlitePool,
    agent_id: &str,
    window: &str,
) -> Result<i64, RateLimitError> {
    let query = format!(
        "SELECT COUNT(*) FROM usage_logs WHERE agent_id = ?1 AND created_at >= datetime('now', '{window}')"
    );
    let (count,): (i64,) = sqlx::query_as(&query)
        .bind(agent_id)
        .fetch_one(db)
        .await
        .map_err(|e| RateLimitError {
            limit_name: "count".to_owned(),
            reset_hint: e.to_string(),
        })?;
    Ok(count)
}

async fn spend_since(db: &SqlitePool, agent_id: &str, window: &str) -> Result<f64, RateLimitError> {
    let query = format!(
        "SELECT COALESCE(SUM(cost), 0) FROM usage_logs WHERE agent_id = ?1 AND created_at >= datetime('now', '{window}')"
    );
    let (sum,): (f64,) = sqlx::query_as(&query)
        .bind(agent_id)
        .fetch_one(db)
        .await
        .map_err(|e| RateLimitError {
            limit_name: "spend".to_owned(),
            reset_hint: e.to_string(),
        })?;
    Ok(sum)
}

/// Record a usage event. Called by the dispatcher immediately after a
/// successful (or attempted) provider send.
#[allow(clippy::too_many_arguments)]
pub async fn record_usage(
    db: &SqlitePool,
    id: &str,
    agent_id: &str,
    org_id: &str,
    action_type: &str,
    channel: crate::types::Channel,
    target_address: &str,
    cost: f64,
    external_id: Option<&str>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO usage_logs (id, agent_id, org_id, action_type, channel, target_address, \
         cost, external_id, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
    )
    .bind(id)
    .bind(agent_id)
    .bind(org_id)
    .bind(action_type)
    .bind(channel.as_str())
    .bind(target_address)
    .bind(cost)
    .bind(external_id)
    .bind(crate::types::now_iso())
    .execute(db)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Channel;

    async fn seed_agent(db: &SqlitePool, agent_id: &str, org_id: &str) {
        sqlx::query(
            "INSERT INTO organizations (id, name, slug, created_at) VALUES (?1, 'Org', 'org', ?2)",
        )
        .bind(org_id)
        .bind(crate::types::now_iso())
        .execute(db)
        .await
        .unwrap();
        sqlx::query(
            "INSERT INTO agent_channels (agent_id, org_id, display_name, blocked_channels, created_at) \
             VALUES (?1, ?2, 'Agent', '', ?3)",
        )
        .bind(agent_id)
        .bind(org_id)
        .bind(crate::types::now_iso())
        .execute(db)
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn unconfigured_agent_falls_back_to_free_tier() {
        let db = crate::db::Db::connect_in_memory().await.unwrap();
        let limits = effective_limits(db.pool(), "agent1").await.unwrap();
        assert_eq!(limits.max_actions_per_minute, Some(5));
    }

    #[tokio::test]
    async fn minute_limit_trips_after_threshold() {
        let db = crate::db::Db::connect_in_memory().await.unwrap();
        seed_agent(db.pool(), "agent1", "org1").await;
        sqlx::query(
            "INSERT INTO spending_limits (agent_id, max_actions_per_minute) VALUES ('agent1', 2)",
        )
        .execute(db.pool())
        .await
        .unwrap();

        for i in 0..2 {
            record_usage(
                db.pool(),
                &format!("u{i}"),
                "agent1",
                "org1",
                "send",
                Channel::Sms,
                "+15551234567",
                0.01,
                None,
            )
            .await
            .unwrap();
        }

        let err = check(db.pool(), "agent1").await.unwrap_err();
        assert_eq!(err.limit_name, "max_actions_per_minute");
    }

    #[tokio::test]
    async fn under_threshold_passes() {
        let db = crate::db::Db::connect_in_memory().await.unwrap();
        seed_agent(db.pool(), "agent1", "org1").await;
        assert!(check(db.pool(), "agent1").await.is_ok());
    }
}
