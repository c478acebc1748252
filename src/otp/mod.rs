//! One-time-passcode issuance and verification (SPEC_FULL §B), backing the
//! out-of-scope registration UI's `/api/v1/otp/request` +
//! `/api/v1/otp/verify` pair. This module only owns issuance, verification,
//! and expiry — the UI that drives it is not this crate's concern.

use rand::RngCore;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::auth::hash_token;
use crate::types::now_iso;

const CODE_DIGITS: u32 = 6;
const DEFAULT_TTL_SECS: i64 = 600;
const MAX_ATTEMPTS: i64 = 5;

#[derive(Debug, thiserror::Error)]
pub enum OtpError {
    #[error("no matching code for this address and purpose")]
    NotFound,
    #[error("code expired")]
    Expired,
    #[error("code already used")]
    Consumed,
    #[error("too many attempts")]
    TooManyAttempts,
    #[error("code does not match")]
    Mismatch,
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
}

/// A freshly issued code, returned once so the caller's delivery channel
/// (SMS/email, outside this module) can send it. Never logged or
/// persisted in plaintext.
pub struct IssuedCode {
    pub id: String,
    pub plaintext: String,
    pub expires_at: String,
}

/// Issue a new code for `contact_address`/`purpose`, invalidating any
/// still-pending code previously issued for the same pair so a contact
/// address only ever has one live code at a time.
pub async fn request(db: &SqlitePool, contact_address: &str, purpose: &str) -> Result<IssuedCode, OtpError> {
    sqlx::query(
        "UPDATE otp_codes SET consumed_at = ?1 WHERE contact_address = ?2 AND purpose = ?3 AND consumed_at IS NULL",
    )
    .bind(now_iso())
    .bind(contact_address)
    .bind(purpose)
    .execute(db)
    .await?;

    let mut raw = [0u8; 4];
    rand::thread_rng().fill_bytes(&mut raw);
    let modulus = 10u32.pow(CODE_DIGITS);
    let code = u32::from_le_bytes(raw) % modulus;
    let plaintext = format!("{code:0width$}", width = CODE_DIGITS as usize);

    let id = Uuid::new_v4().to_string();
    let created_at = now_iso();
    let expires_at = crate::types::to_iso(chrono::Utc::now() + chrono::Duration::seconds(DEFAULT_TTL_SECS));

    sqlx::query(
        "INSERT INTO otp_codes (id, contact_address, code_hash, purpose, expires_at, attempts, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6)",
    )
    .bind(&id)
    .bind(contact_address)
    .bind(hash_token(&plaintext))
    .bind(purpose)
    .bind(&expires_at)
    .bind(&created_at)
    .execute(db)
    .await?;

    Ok(IssuedCode {
        id,
        plaintext,
        expires_at,
    })
}

/// Verify a presented code. Every call (right or wrong) increments the
/// attempt counter so a guessing spree against one code trips
/// `TooManyAttempts` before the space can be exhausted.
pub async fn verify(db: &SqlitePool, contact_address: &str, purpose: &str, code: &str) -> Result<(), OtpError> {
    let row: Option<(String, String, String, i64, Option<String>)> = sqlx::query_as(
        "SELECT id, code_hash, expires_at, attempts, consumed_at FROM otp_codes \
         WHERE contact_address = ?1 AND purpose = ?2 ORDER BY created_at DESC LIMIT 1",
    )
    .bind(contact_address)
    .bind(purpose)
    .fetch_optional(db)
    .await?;

    let Some((id, code_hash, expires_at, attempts, consumed_at)) = row else {
        return Err(OtpError::NotFound);
    };

    if consumed_at.is_some() {
        return Err(OtpError::Consumed);
    }
    if attempts >= MAX_ATTEMPTS {
        return Err(OtpError::TooManyAttempts);
    }
    if expires_at.as_str() < now_iso().as_str() {
        return Err(OtpError::Expired);
    }

    sqlx::query("UPDATE otp_codes SET attempts = attempts + 1 WHERE id = ?1")
        .bind(&id)
        .execute(db)
        .await?;

    if hash_token(code) != code_hash {
        return Err(OtpError::Mismatch);
    }

    sqlx::query("UPDATE otp_codes SET consumed_at = ?1 WHERE id = ?2")
        .bind(now_iso())
        .bind(&id)
        .execute(db)
        .await?;

    Ok(())
}
