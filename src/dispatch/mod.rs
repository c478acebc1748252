//! Dispatch pipelines (spec §4.5 outbound, §4.6 inbound): the two places
//! every other component (auth, sanitize, compliance, ratelimit, routing,
//! providers, audit, metrics, deadletter) is wired together.

pub mod inbound;
pub mod outbound;

use std::sync::Arc;

use sqlx::SqlitePool;

use crate::metrics::Metrics;
use crate::providers::ProviderSet;
use crate::replay::ReplayCache;
use crate::session::SessionRegistry;

/// Shared context every dispatch call needs. Constructed once at startup
/// and cloned cheaply (everything inside is already `Arc`/pool-backed).
#[derive(Clone)]
pub struct Dispatcher {
    pub db: SqlitePool,
    pub providers: Arc<ProviderSet>,
    pub metrics: Metrics,
    pub sessions: Arc<SessionRegistry>,
    pub replay: Arc<ReplayCache>,
    pub webhook_base_url: String,
    pub demo_mode: bool,
}
