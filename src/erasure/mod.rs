//! Erasure-request worker (SPEC_FULL §B): cascade delete by subject
//! identifier across every table that can carry one, run through a single
//! function rather than ad hoc multi-table deletes scattered across
//! request handlers, the way the teacher funnels destructive operations
//! through one path instead of letting every caller reinvent it.

use sqlx::SqlitePool;
use uuid::Uuid;

use crate::types::now_iso;

#[derive(Debug, thiserror::Error)]
pub enum ErasureError {
    #[error("unknown identifier type: {0}")]
    UnknownIdentifierType(String),
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
}

/// What a subject identifier can mean: a phone number (matches
/// `from_address`/`to_address`/`target_address`) or an email address
/// (matches `target_address`/`from_address`/`to_address` the same way,
/// since both tables store addresses untyped).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentifierType {
    Phone,
    Email,
}

impl IdentifierType {
    fn as_str(self) -> &'static str {
        match self {
            Self::Phone => "phone",
            Self::Email => "email",
        }
    }

    pub fn parse(s: &str) -> Result<Self, ErasureError> {
        match s {
            "phone" => Ok(Self::Phone),
            "email" => Ok(Self::Email),
            other => Err(ErasureError::UnknownIdentifierType(other.to_owned())),
        }
    }
}

/// File an erasure request; the worker that actually runs it is
/// `run_pending`/`run_one`, so filing and execution can be driven
/// separately (e.g. a scheduled job polling for `status = 'pending'`).
pub async fn file_request(db: &SqlitePool, subject_identifier: &str, identifier_type: IdentifierType) -> Result<String, ErasureError> {
    let id = Uuid::new_v4().to_string();
    sqlx::query(
        "INSERT INTO erasure_requests (id, subject_identifier, identifier_type, status, created_at) \
         VALUES (?1, ?2, ?3, 'pending', ?4)",
    )
    .bind(&id)
    .bind(subject_identifier)
    .bind(identifier_type.as_str())
    .bind(now_iso())
    .execute(db)
    .await?;
    Ok(id)
}

/// Run every pending erasure request to completion.
pub async fn run_pending(db: &SqlitePool) -> Result<u64, ErasureError> {
    let pending: Vec<(String,)> = sqlx::query_as("SELECT id FROM erasure_requests WHERE status = 'pending'")
        .fetch_all(db)
        .await?;
    let count = pending.len() as u64;
    for (id,) in pending {
        run_one(db, &id).await?;
    }
    Ok(count)
}

/// Cascade-delete every row naming `subject_identifier` and mark the
/// request completed. Runs inside one transaction so a crash mid-cascade
/// never leaves a request marked complete with rows still standing, or
/// vice versa.
pub async fn run_one(db: &SqlitePool, request_id: &str) -> Result<(), ErasureError> {
    let row: Option<(String, String)> =
        sqlx::query_as("SELECT subject_identifier, identifier_type FROM erasure_requests WHERE id = ?1")
            .bind(request_id)
            .fetch_optional(db)
            .await?;
    let Some((subject, _kind)) = row else {
        return Ok(());
    };

    let mut tx = db.begin().await?;
    let mut tables_affected = Vec::new();
    let mut rows_deleted: i64 = 0;

    let usage = sqlx::query("DELETE FROM usage_logs WHERE target_address = ?1")
        .bind(&subject)
        .execute(&mut *tx)
        .await?
        .rows_affected();
    if usage > 0 {
        tables_affected.push("usage_logs");
        rows_deleted += usage as i64;
    }

    let calls = sqlx::query("DELETE FROM call_logs WHERE from_address = ?1 OR to_address = ?1")
        .bind(&subject)
        .execute(&mut *tx)
        .await?
        .rows_affected();
    if calls > 0 {
        tables_affected.push("call_logs");
        rows_deleted += calls as i64;
    }

    let letters = sqlx::query("DELETE FROM dead_letters WHERE from_address = ?1 OR to_address = ?1")
        .bind(&subject)
        .execute(&mut *tx)
        .await?
        .rows_affected();
    if letters > 0 {
        tables_affected.push("dead_letters");
        rows_deleted += letters as i64;
    }

    let otp = sqlx::query("DELETE FROM otp_codes WHERE contact_address = ?1")
        .bind(&subject)
        .execute(&mut *tx)
        .await?
        .rows_affected();
    if otp > 0 {
        tables_affected.push("otp_codes");
        rows_deleted += otp as i64;
    }

    sqlx::query(
        "UPDATE erasure_requests SET status = 'completed', tables_affected = ?1, rows_deleted = ?2, \
         completed_at = ?3 WHERE id = ?4",
    )
    .bind(tables_affected.join(","))
    .bind(rows_deleted)
    .bind(now_iso())
    .bind(request_id)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    // The audit log itself is append-only and never erased (spec §4.4 —
    // tamper-evidence would break if rows could vanish); instead it gets a
    // redaction marker naming the request, the way the teacher's journal
    // module records an action without rewriting history. Appended after
    // commit since `audit::append` computes its chain against the
    // pool-visible tail, not an in-flight transaction.
    if let Err(e) = crate::audit::append(
        db,
        None,
        "erasure_completed",
        "system",
        Some(&subject),
        Some(&serde_json::json!({ "request_id": request_id, "rows_deleted": rows_deleted })),
    )
    .await
    {
        tracing::error!(error = %e, request_id, "failed to append erasure audit entry");
    }

    Ok(())
}
