//! Sender / number-pool selection (spec §4.4).
//!
//! Picks the outbound number for an org+channel+recipient triple: exact
//! country match among `number_pool` entries capable of the dispatch
//! channel, ties broken by `is_default DESC` then oldest row, falling back
//! to the org's channel default and finally the agent's own bound phone
//! number.

use sqlx::SqlitePool;

use crate::types::Channel;

#[derive(Debug, Clone, thiserror::Error)]
pub enum RoutingError {
    #[error("no sender available for org {org_id} country {country}")]
    NoSenderAvailable { org_id: String, country: String },
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
}

/// E.164 calling-code prefix -> ISO-3166-alpha2. Longest matching prefix
/// wins, so every entry is tried rather than relying on table order.
const PREFIX_TABLE: &[(&str, &str)] = &[
    ("1", "US"),
    ("44", "GB"),
    ("972", "IL"),
    ("91", "IN"),
    ("81", "JP"),
    ("86", "CN"),
    ("49", "DE"),
    ("33", "FR"),
    ("61", "AU"),
    ("55", "BR"),
    ("52", "MX"),
    ("34", "ES"),
    ("39", "IT"),
    ("31", "NL"),
    ("46", "SE"),
    ("47", "NO"),
    ("82", "KR"),
    ("65", "SG"),
    ("971", "AE"),
    ("27", "ZA"),
];

/// Derive an ISO-3166-alpha2 recipient country from an E.164 number by
/// longest-prefix match against [`PREFIX_TABLE`]; unmatched numbers
/// default to `"US"`.
pub fn country_from_e164(e164: &str) -> &'static str {
    let digits = e164.trim_start_matches('+');
    let mut best: Option<(usize, &'static str)> = None;
    for (prefix, country) in PREFIX_TABLE {
        if digits.starts_with(prefix) {
            let len = prefix.len();
            if best.as_ref().map(|(l, _)| len > *l).unwrap_or(true) {
                best = Some((len, country));
            }
        }
    }
    best.map(|(_, country)| country).unwrap_or("US")
}

/// Whether a `number_pool.capabilities` cell permits `channel`. An empty
/// cell is the wildcard (capable of everything); otherwise it's a
/// comma-separated list of [`Channel::as_str`] values.
fn capable_of(capabilities: &str, channel: Channel) -> bool {
    let capabilities = capabilities.trim();
    if capabilities.is_empty() {
        return true;
    }
    capabilities.split(',').any(|c| c.trim() == channel.as_str())
}

/// Select the outbound phone number to send from for `org_id` when
/// dispatching `channel` to a recipient resolved to `recipient_country`
/// (an ISO-3166 country code), falling back to the agent's own bound
/// phone number if the pool has nothing capable.
pub async fn select_sender(
    db: &SqlitePool,
    org_id: &str,
    channel: Channel,
    recipient_country: &str,
    agent_phone_fallback: Option<&str>,
) -> Result<String, RoutingError> {
    if let Some(number) = country_match(db, org_id, channel, recipient_country).await? {
        return Ok(number);
    }
    if let Some(number) = org_default(db, org_id, channel).await? {
        return Ok(number);
    }
    if let Some(fallback) = agent_phone_fallback {
        return Ok(fallback.to_owned());
    }
    Err(RoutingError::NoSenderAvailable {
        org_id: org_id.to_owned(),
        country: recipient_country.to_owned(),
    })
}

async fn country_match(
    db: &SqlitePool,
    org_id: &str,
    channel: Channel,
    recipient_country: &str,
) -> Result<Option<String>, sqlx::Error> {
    let rows: Vec<(String, String, String, bool, String)> = sqlx::query_as(
        "SELECT phone_number, country_code, capabilities, is_default, created_at FROM number_pool \
         WHERE org_id = ?1 ORDER BY is_default DESC, created_at ASC",
    )
    .bind(org_id)
    .fetch_all(db)
    .await?;

    for (number, country_code, capabilities, _is_default, _created_at) in rows {
        if country_code == recipient_country && capable_of(&capabilities, channel) {
            return Ok(Some(number));
        }
    }
    Ok(None)
}

async fn org_default(db: &SqlitePool, org_id: &str, channel: Channel) -> Result<Option<String>, sqlx::Error> {
    let rows: Vec<(String, String)> = sqlx::query_as(
        "SELECT phone_number, capabilities FROM number_pool WHERE org_id = ?1 AND is_default = 1 \
         ORDER BY created_at ASC",
    )
    .bind(org_id)
    .fetch_all(db)
    .await?;
    Ok(rows
        .into_iter()
        .find(|(_, capabilities)| capable_of(capabilities, channel))
        .map(|(number, _)| number))
}
