//! Compliance gate (spec §4.2): DNC lookup, content screen, TCPA
//! time-of-day window, and recording-consent warning. Steps run in the
//! fixed order the spec prescribes and short-circuit on the first hit.

use std::sync::OnceLock;

use chrono::{TimeZone, Utc};
use chrono_tz::Tz;
use regex::Regex;
use sqlx::SqlitePool;

use crate::types::Channel;

/// Compliance gate rejection, carrying a human-readable reason.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{0}")]
pub struct ComplianceError(pub String);

fn threat_patterns() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\b(kill you|bomb threat|i will hurt)\b").unwrap())
}

/// Static ISO-3166 country-code -> (TCPA-style) default timezone, used
/// when the caller does not supply a recipient timezone. Keyed by the
/// same [`crate::routing::country_from_e164`] derivation the sender
/// selection routing uses, so only a handful of entries are needed.
fn default_timezone_for_country(country: &str) -> Tz {
    match country {
        "US" => chrono_tz::America::New_York,
        "IL" => chrono_tz::Asia::Jerusalem,
        "GB" => chrono_tz::Europe::London,
        "IN" => chrono_tz::Asia::Kolkata,
        "JP" => chrono_tz::Asia::Tokyo,
        _ => chrono_tz::UTC,
    }
}

/// Input to the compliance gate for a single outbound dispatch.
pub struct ComplianceRequest<'a> {
    pub org_id: &'a str,
    pub to_address: &'a str,
    pub body: &'a str,
    pub channel: Channel,
    /// IANA timezone name supplied by the caller, if any.
    pub recipient_timezone: Option<&'a str>,
    /// ISO-3166 country code, used only as a timezone fallback.
    pub recipient_country: &'a str,
    /// For voice calls only: whether the call config includes a recording
    /// announcement.
    pub has_recording_announcement: bool,
    /// For voice calls only: whether the recipient's jurisdiction requires
    /// all-party consent.
    pub all_party_consent_jurisdiction: bool,
}

/// Outcome of a passed gate: whether a non-fatal warning should be
/// audited (e.g. missing recording announcement).
pub struct ComplianceOutcome {
    pub warning: Option<String>,
}

/// Run the compliance gate in spec order. Returns `Ok` (possibly carrying
/// a warning) on pass, `Err(ComplianceError)` on the first rejection.
pub async fn check(
    db: &SqlitePool,
    req: &ComplianceRequest<'_>,
) -> Result<ComplianceOutcome, ComplianceError> {
    dnc_check(db, req.org_id, req.to_address).await?;
    content_screen(req.body)?;
    if matches!(req.channel, Channel::Sms | Channel::Voice) {
        tcpa_window_check(req.recipient_timezone, req.recipient_country)?;
    }

    let mut warning = None;
    if req.channel == Channel::Voice
        && req.all_party_consent_jurisdiction
        && !req.has_recording_announcement
    {
        warning = Some(
            "all-party consent jurisdiction but call config has no recording announcement"
                .to_owned(),
        );
    }
    Ok(ComplianceOutcome { warning })
}

async fn dnc_check(db: &SqlitePool, org_id: &str, address: &str) -> Result<(), ComplianceError> {
    let hit: Option<(String,)> = sqlx::query_as(
        "SELECT reason FROM dnc_list WHERE org_id = ?1 AND (phone_number = ?2 OR email_address = ?2)",
    )
    .bind(org_id)
    .bind(address)
    .fetch_optional(db)
    .await
    .map_err(|e| ComplianceError(format!("DNC lookup failed: {e}")))?;

    if hit.is_some() {
        return Err(ComplianceError("Do Not Contact".to_owned()));
    }
    Ok(())
}

fn content_screen(body: &str) -> Result<(), ComplianceError> {
    if threat_patterns().is_match(body) {
        return Err(ComplianceError(
            "message content matched a disallowed threat pattern".to_owned(),
        ));
    }
    Ok(())
}

const TCPA_WINDOW_START_HOUR: u32 = 8;
const TCPA_WINDOW_END_HOUR: u32 = 21;

fn tcpa_window_check(
    recipient_timezone: Option<&str>,
    recipient_country: &str,
) -> Result<(), ComplianceError> {
    let tz: Tz = match recipient_timezone {
        Some(name) => name
            .parse()
            .unwrap_or_else(|_| default_timezone_for_country(recipient_country)),
        None => default_timezone_for_country(recipient_country),
    };
    let local_now = Utc::now().with_timezone(&tz);
    let hour = chrono::Timelike::hour(&local_now);
    if hour < TCPA_WINDOW_START_HOUR || hour >= TCPA_WINDOW_END_HOUR {
        return Err(ComplianceError(format!(
            "outside TCPA calling window (08:00-21:00 local, recipient local time is {hour:02}:00)"
        )));
    }
    Ok(())
}
