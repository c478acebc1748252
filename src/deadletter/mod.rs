//! Dead-letter buffer (spec §4.9): producer (dispatcher/webhook ingress on
//! failure) and consumer (fetch-acknowledge) sides of the same table.

use sqlx::SqlitePool;
use uuid::Uuid;

use crate::types::{now_iso, Channel, Direction};

#[derive(Debug, thiserror::Error)]
pub enum DeadLetterError {
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
}

/// Input to [`enqueue`].
#[allow(clippy::too_many_arguments)]
pub struct NewDeadLetter<'a> {
    pub agent_id: &'a str,
    pub org_id: &'a str,
    pub channel: Channel,
    pub direction: Direction,
    pub reason: &'a str,
    pub from_address: Option<&'a str>,
    pub to_address: Option<&'a str>,
    pub body: Option<&'a str>,
    pub media_url: Option<&'a str>,
    pub original_request: Option<&'a serde_json::Value>,
    pub error_details: Option<&'a str>,
    pub external_id: Option<&'a str>,
}

/// Record a delivery or send failure. Unlike every other table in the
/// gateway, a dead-letter row is the one place message content is allowed
/// to persist (`body`/`media_url`), so an operator can inspect and re-drive
/// it.
pub async fn enqueue(db: &SqlitePool, entry: NewDeadLetter<'_>) -> Result<String, DeadLetterError> {
    let id = Uuid::new_v4().to_string();
    sqlx::query(
        "INSERT INTO dead_letters (id, agent_id, org_id, channel, direction, reason, \
         from_address, to_address, body, media_url, original_request, error_details, \
         external_id, status, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, 'pending', ?14)",
    )
    .bind(&id)
    .bind(entry.agent_id)
    .bind(entry.org_id)
    .bind(entry.channel.as_str())
    .bind(entry.direction.as_str())
    .bind(entry.reason)
    .bind(entry.from_address)
    .bind(entry.to_address)
    .bind(entry.body)
    .bind(entry.media_url)
    .bind(entry.original_request.map(|v| v.to_string()))
    .bind(entry.error_details)
    .bind(entry.external_id)
    .bind(now_iso())
    .execute(db)
    .await?;
    Ok(id)
}

/// One dead-letter row as surfaced to an operator.
#[derive(Debug, Clone, serde::Serialize)]
pub struct DeadLetterRow {
    pub id: String,
    pub agent_id: String,
    pub channel: String,
    pub direction: String,
    pub reason: String,
    pub from_address: Option<String>,
    pub to_address: Option<String>,
    pub body: Option<String>,
    pub media_url: Option<String>,
    pub status: String,
    pub created_at: String,
}

/// Fetch pending dead letters for an agent and atomically mark them
/// acknowledged in the same transaction, so a crash between fetch and ack
/// never silently drops or double-delivers a row.
pub async fn get_waiting_messages(
    db: &SqlitePool,
    agent_id: &str,
    channel: Option<Channel>,
    limit: i64,
) -> Result<Vec<DeadLetterRow>, DeadLetterError> {
    let mut tx = db.begin().await?;

    let rows: Vec<(
        String,
        String,
        String,
        String,
        String,
        Option<String>,
        Option<String>,
        Option<String>,
        Option<String>,
        String,
        String,
    )> = match channel {
        Some(channel) => {
            sqlx::query_as(
                "SELECT id, agent_id, channel, direction, reason, from_address, to_address, body, \
                 media_url, status, created_at FROM dead_letters \
                 WHERE agent_id = ?1 AND status = 'pending' AND channel = ?2 ORDER BY created_at ASC LIMIT ?3",
            )
            .bind(agent_id)
            .bind(channel.as_str())
            .bind(limit)
            .fetch_all(&mut *tx)
            .await?
        }
        None => {
            sqlx::query_as(
                "SELECT id, agent_id, channel, direction, reason, from_address, to_address, body, \
                 media_url, status, created_at FROM dead_letters \
                 WHERE agent_id = ?1 AND status = 'pending' ORDER BY created_at ASC LIMIT ?2",
            )
            .bind(agent_id)
            .bind(limit)
            .fetch_all(&mut *tx)
            .await?
        }
    };

    if !rows.is_empty() {
        let ids: Vec<&str> = rows.iter().map(|r| r.0.as_str()).collect();
        let placeholders = ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let query = format!(
            "UPDATE dead_letters SET status = 'acknowledged', acknowledged_at = ? WHERE id IN ({placeholders})"
        );
        let mut q = sqlx::query(&query).bind(now_iso());
        for id in &ids {
            q = q.bind(*id);
        }
        q.execute(&mut *tx).await?;
    }

    tx.commit().await?;

    Ok(rows
        .into_iter()
        .map(
            |(id, agent_id, channel, direction, reason, from_address, to_address, body, media_url, status, created_at)| {
                DeadLetterRow {
                    id,
                    agent_id,
                    channel,
                    direction,
                    reason,
                    from_address,
                    to_address,
                    body,
                    media_url,
                    status,
                    created_at,
                }
            },
        )
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn seed(db: &SqlitePool) {
        sqlx::query("INSERT INTO organizations (id, name, slug, created_at) VALUES ('org1','Org','org1', ?1)")
            .bind(now_iso())
            .execute(db)
            .await
            .unwrap();
        sqlx::query(
            "INSERT INTO agent_channels (agent_id, org_id, display_name, blocked_channels, created_at) \
             VALUES ('agent1', 'org1', 'Agent', '', ?1)",
        )
        .bind(now_iso())
        .execute(db)
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn fetch_marks_acknowledged_and_wont_repeat() {
        let db = crate::db::Db::connect_in_memory().await.unwrap();
        seed(db.pool()).await;

        enqueue(
            db.pool(),
            NewDeadLetter {
                agent_id: "agent1",
                org_id: "org1",
                channel: Channel::Sms,
                direction: Direction::Inbound,
                reason: "agent_offline",
                from_address: Some("+15551234567"),
                to_address: Some("+15557654321"),
                body: Some("hello"),
                media_url: None,
                original_request: None,
                error_details: None,
                external_id: None,
            },
        )
        .await
        .unwrap();

        let first = get_waiting_messages(db.pool(), "agent1", None, 10).await.unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].status, "pending");

        let second = get_waiting_messages(db.pool(), "agent1", None, 10).await.unwrap();
        assert!(second.is_empty());
    }

    #[tokio::test]
    async fn channel_filter_excludes_other_channels() {
        let db = crate::db::Db::connect_in_memory().await.unwrap();
        seed(db.pool()).await;

        for channel in [Channel::Sms, Channel::Email] {
            enqueue(
                db.pool(),
                NewDeadLetter {
                    agent_id: "agent1",
                    org_id: "org1",
                    channel,
                    direction: Direction::Inbound,
                    reason: "agent_offline",
                    from_address: Some("+15551234567"),
                    to_address: Some("+15557654321"),
                    body: Some("hello"),
                    media_url: None,
                    original_request: None,
                    error_details: None,
                    external_id: None,
                },
            )
            .await
            .unwrap();
        }

        let sms_only = get_waiting_messages(db.pool(), "agent1", Some(Channel::Sms), 10).await.unwrap();
        assert_eq!(sms_only.len(), 1);
        assert_eq!(sms_only[0].channel, "sms");
    }
}
