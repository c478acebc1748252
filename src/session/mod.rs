//! Voice session registry (spec §3 "Voice session"): short-lived
//! in-memory state keyed by session id, grounded on the teacher's
//! `src/kernel/session.rs` `SessionStore` (a `DashMap`-backed per-key
//! store with eviction) but TTL-driven rather than capacity-driven, since
//! a voice session's lifetime is bounded by call duration, not by how many
//! concurrent conversations memory can hold.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde_json::Value;

const DEFAULT_TTL: Duration = Duration::from_secs(10 * 60);

/// Config captured at session creation, later read by the outbound-voice
/// webhook handler to drive the AI voice call.
#[derive(Debug, Clone)]
pub struct VoiceSession {
    pub agent_id: String,
    pub call_sid: Option<String>,
    pub config: Value,
    created_at: Instant,
}

/// In-memory registry of active voice sessions. Entries past their TTL are
/// treated as absent by readers and are swept by [`SessionRegistry::sweep`].
#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<String, VoiceSession>,
    ttl: Option<Duration>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
            ttl: Some(DEFAULT_TTL),
        }
    }

    #[cfg(test)]
    fn with_ttl(ttl: Duration) -> Self {
        Self {
            sessions: DashMap::new(),
            ttl: Some(ttl),
        }
    }

    pub fn create(&self, session_id: &str, agent_id: &str, config: Value) {
        self.sessions.insert(
            session_id.to_owned(),
            VoiceSession {
                agent_id: agent_id.to_owned(),
                call_sid: None,
                config,
                created_at: Instant::now(),
            },
        );
    }

    pub fn attach_call_sid(&self, session_id: &str, call_sid: &str) {
        if let Some(mut entry) = self.sessions.get_mut(session_id) {
            entry.call_sid = Some(call_sid.to_owned());
        }
    }

    /// Look up a session, returning `None` if absent or expired.
    pub fn get(&self, session_id: &str) -> Option<VoiceSession> {
        let entry = self.sessions.get(session_id)?;
        let expired = self
            .ttl
            .map(|ttl| entry.created_at.elapsed() > ttl)
            .unwrap_or(false);
        if expired {
            drop(entry);
            self.sessions.remove(session_id);
            return None;
        }
        Some(entry.clone())
    }

    pub fn end(&self, session_id: &str) {
        self.sessions.remove(session_id);
    }

    /// Remove every expired entry. Call periodically from a background
    /// task; never required for correctness since `get` already treats
    /// expired entries as absent.
    pub fn sweep(&self) {
        let Some(ttl) = self.ttl else { return };
        self.sessions.retain(|_, v| v.created_at.elapsed() <= ttl);
    }

    pub fn active_count(&self) -> usize {
        self.sessions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn create_then_get_round_trips() {
        let reg = SessionRegistry::new();
        reg.create("s1", "agent1", serde_json::json!({"voiceId": "v1"}));
        let session = reg.get("s1").expect("present");
        assert_eq!(session.agent_id, "agent1");
    }

    #[test]
    fn expired_session_is_treated_as_absent() {
        let reg = SessionRegistry::with_ttl(Duration::from_millis(10));
        reg.create("s1", "agent1", Value::Null);
        sleep(Duration::from_millis(30));
        assert!(reg.get("s1").is_none());
    }

    #[test]
    fn sweep_removes_expired_entries() {
        let reg = SessionRegistry::with_ttl(Duration::from_millis(10));
        reg.create("s1", "agent1", Value::Null);
        sleep(Duration::from_millis(30));
        reg.sweep();
        assert_eq!(reg.active_count(), 0);
    }

    #[test]
    fn end_removes_session_immediately() {
        let reg = SessionRegistry::new();
        reg.create("s1", "agent1", Value::Null);
        reg.end("s1");
        assert!(reg.get("s1").is_none());
    }
}
