//! Input sanitizer (spec §4.2) and address validators.
//!
//! Enforced at every public entry point before any database read.
//! Compiling these patterns once via `once_cell`-style `std::sync::OnceLock`
//! statics avoids re-building a `Regex` per call, the same concern the
//! teacher crate addresses by keeping parsed config/templates in immutable
//! values constructed once at startup.

use std::sync::OnceLock;

use regex::Regex;

/// A sanitization failure naming the offending field.
#[derive(Debug, Clone, thiserror::Error)]
#[error("field {field}: {reason}")]
pub struct SanitizeError {
    pub field: String,
    pub reason: String,
}

impl SanitizeError {
    fn new(field: &str, reason: &str) -> Self {
        Self {
            field: field.to_owned(),
            reason: reason.to_owned(),
        }
    }
}

fn script_tag() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)<script[\s>]|javascript:|on\w+\s*=").unwrap())
}

fn sql_meta() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)';?\s*drop\b|\bor\s+1\s*=\s*1\b|--\s*$").unwrap())
}

fn path_traversal() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\.\./|\.\.\\").unwrap())
}

fn shell_meta() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r";\s*rm\b|\$\(|`").unwrap())
}

fn e164() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\+[1-9]\d{1,14}$").unwrap())
}

/// Validate and lightly sanitize a free-text field. Rejects CR/LF, script
/// injection, SQL metacharacters in syntactic positions, path traversal,
/// and shell metacharacters.
pub fn sanitize_text(field: &str, value: &str) -> Result<(), SanitizeError> {
    if value.contains('\r') || value.contains('\n') {
        return Err(SanitizeError::new(field, "must not contain CR or LF"));
    }
    if script_tag().is_match(value) {
        return Err(SanitizeError::new(field, "contains disallowed script markup"));
    }
    if sql_meta().is_match(value) {
        return Err(SanitizeError::new(field, "contains disallowed SQL metacharacters"));
    }
    if path_traversal().is_match(value) {
        return Err(SanitizeError::new(field, "contains path traversal sequence"));
    }
    if shell_meta().is_match(value) {
        return Err(SanitizeError::new(field, "contains disallowed shell metacharacters"));
    }
    Ok(())
}

/// Validate an E.164 phone number: `^\+[1-9]\d{1,14}$`.
pub fn validate_e164(field: &str, value: &str) -> Result<(), SanitizeError> {
    if !e164().is_match(value) {
        return Err(SanitizeError::new(field, "must be a valid E.164 phone number"));
    }
    Ok(())
}

/// Validate an email address: exactly one `@`, non-empty local and domain
/// parts, domain containing a dot.
pub fn validate_email(field: &str, value: &str) -> Result<(), SanitizeError> {
    let parts: Vec<&str> = value.split('@').collect();
    if parts.len() != 2 {
        return Err(SanitizeError::new(field, "must contain exactly one '@'"));
    }
    let (local, domain) = (parts[0], parts[1]);
    if local.is_empty() || domain.is_empty() || !domain.contains('.') {
        return Err(SanitizeError::new(field, "must be a valid email address"));
    }
    if value.contains('\r') || value.contains('\n') {
        return Err(SanitizeError::new(field, "must not contain CR or LF"));
    }
    Ok(())
}
