//! Core domain types shared across the gateway: channels, principals, and
//! the neutral message shape that every provider adapter normalizes into
//! or out of.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A transport kind a message can travel over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Sms,
    Whatsapp,
    Email,
    Voice,
    Line,
}

impl Channel {
    /// Stable lowercase string as stored in SQLite and used in URLs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sms => "sms",
            Self::Whatsapp => "whatsapp",
            Self::Email => "email",
            Self::Voice => "voice",
            Self::Line => "line",
        }
    }

    /// Parse from the string stored in the database or a URL path segment.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "sms" => Some(Self::Sms),
            "whatsapp" => Some(Self::Whatsapp),
            "email" => Some(Self::Email),
            "voice" => Some(Self::Voice),
            "line" => Some(Self::Line),
            _ => None,
        }
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The authenticated subject of a request, resolved once per call and
/// threaded through every downstream check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub org_id: Option<String>,
    pub agent_id: Option<String>,
    pub scopes: Vec<Scope>,
}

/// A single authorization scope granted to a principal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// Org-level administrative operations.
    Admin,
    /// Cross-org operations (organization create/list).
    SuperAdmin,
    /// A single agent's own operations.
    Agent,
}

impl Principal {
    /// The synthetic admin principal injected in demo mode when no token
    /// is presented. A single switch, never a per-call escape hatch.
    pub fn demo_admin() -> Self {
        Self {
            org_id: None,
            agent_id: None,
            scopes: vec![Scope::Admin, Scope::SuperAdmin],
        }
    }

    pub fn is_admin(&self) -> bool {
        self.scopes.contains(&Scope::Admin) || self.is_super_admin()
    }

    pub fn is_super_admin(&self) -> bool {
        self.scopes.contains(&Scope::SuperAdmin)
    }

    /// `requireAgent`: fails unless the principal *is* this agent, or is
    /// admin/super-admin.
    pub fn require_agent(&self, agent_id: &str) -> bool {
        self.is_admin() || self.agent_id.as_deref() == Some(agent_id)
    }
}

/// The neutral shape every inbound webhook payload is parsed into before
/// agent lookup and callback fan-out.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NeutralInbound {
    pub channel: Channel,
    pub from: String,
    pub to: String,
    pub body: Option<String>,
    pub media_url: Option<String>,
    pub external_id: Option<String>,
}

/// Result of a successful outbound send, returned to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendResult {
    pub success: bool,
    pub external_id: String,
    pub from: String,
    pub to: String,
    pub status: String,
}

/// Severity grading for alerts raised by the metrics/alerting component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AlertSeverity {
    Low,
    Medium,
    High,
    Critical,
}

/// Agent channel row lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Active,
    Deprovisioned,
}

impl AgentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Deprovisioned => "deprovisioned",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "deprovisioned" => Some(Self::Deprovisioned),
            _ => None,
        }
    }
}

/// A provisioned agent channel row (spec §3 "Agent channel").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentChannel {
    pub agent_id: String,
    pub org_id: String,
    pub display_name: String,
    pub phone_number: Option<String>,
    pub whatsapp_sender_sid: Option<String>,
    pub email_address: Option<String>,
    pub voice_id: Option<String>,
    pub system_prompt: Option<String>,
    pub greeting: Option<String>,
    pub blocked_channels: Vec<Channel>,
    pub status: AgentStatus,
}

impl AgentChannel {
    /// Whether `channel` is blocked for this agent, honoring the
    /// wildcard-block convention (a single `"*"` entry blocks everything).
    pub fn blocks(&self, channel: Channel) -> bool {
        self.blocked_channels.contains(&channel)
    }
}

/// Serialize a set of blocked channels (or a wildcard) to a comma-joined
/// string for storage, mirroring how SQLite stores the set.
pub fn encode_blocked_channels(channels: &[Channel]) -> String {
    channels
        .iter()
        .map(|c| c.as_str())
        .collect::<Vec<_>>()
        .join(",")
}

/// Inverse of [`encode_blocked_channels`]. A bare `*` is treated as "all
/// channels blocked" and expands to every variant.
pub fn decode_blocked_channels(raw: &str) -> Vec<Channel> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Vec::new();
    }
    if raw == "*" {
        return vec![
            Channel::Sms,
            Channel::Whatsapp,
            Channel::Email,
            Channel::Voice,
            Channel::Line,
        ];
    }
    raw.split(',').filter_map(Channel::parse).collect()
}

/// A dead-letter direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Inbound,
    Outbound,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Inbound => "inbound",
            Self::Outbound => "outbound",
        }
    }
}

/// Timestamp helper: UTC ISO-8601, the wire/storage format used everywhere
/// in the data model.
pub fn now_iso() -> String {
    Utc::now().to_rfc3339()
}

pub fn to_iso(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339()
}
